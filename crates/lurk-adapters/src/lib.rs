//! Source clients (Reddit listing API, JSON fixture pages) and the keyword classifier that
//! turns raw items into candidates.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lurk_core::{ChannelRules, ClassifiedCandidate, CursorToken, Intent, ItemKind, RawItem};
use lurk_storage::{FetchError, HttpFetcher, RetryDisposition};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "lurk-adapters";

pub const REDDIT_SOURCE_ID: &str = "reddit";
pub const REDDIT_BASE_URL: &str = "https://www.reddit.com";
const REDDIT_LANE: &str = "reddit";
const RULES_SUMMARY_LIMIT: usize = 5;

/// One page of raw items plus the cursor to resume from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBatch {
    pub items: Vec<RawItem>,
    pub next: CursorToken,
    pub exhausted: bool,
    pub descriptor: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SourceFetchError {
    #[error("cursor {0} is not understood by this source")]
    UnsupportedCursor(CursorToken),
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Fetch the batch starting at `cursor`. Must not mutate any persisted state.
    async fn fetch(&self, cursor: &CursorToken) -> Result<SourceBatch, SourceFetchError>;
}

/// Live score of a reply that was posted somewhere.
#[async_trait]
pub trait ReplyScores: Send + Sync {
    async fn comment_score(&self, reply_url: &str) -> Result<i64, SourceFetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("item is missing {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Message(String),
}

pub trait Classifier: Send + Sync {
    /// `Ok(None)` means the item is irrelevant and should be dropped silently.
    fn classify(&self, item: &RawItem) -> Result<Option<ClassifiedCandidate>, ClassificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    pub topic: String,
    pub url: String,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// Keyword lists, channel assignments and scan sizing, loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub keywords: Vec<String>,
    /// Keywords too generic to keep an item on their own; see `relevant_signals`.
    pub broad_keywords: Vec<String>,
    pub relevant_signals: Vec<String>,
    pub irrelevant_signals: Vec<String>,
    pub strong_qualifiers: Vec<String>,
    pub strong_disqualifiers: Vec<String>,
    pub high_intent_signals: Vec<String>,
    /// A matched keyword containing any of these marks the item HIGH intent.
    pub high_intent_keyword_terms: Vec<String>,
    /// persona -> channels that persona covers
    pub channels: BTreeMap<String, Vec<String>>,
    pub default_persona: Option<String>,
    pub companies: Vec<String>,
    pub resources: Vec<ResourceLink>,
    pub company_resource: Option<String>,
    pub max_item_age_hours: u64,
    pub items_per_channel: usize,
    pub channels_per_scan: usize,
    pub min_relevant_signals: usize,
    pub comments: CommentTemplates,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            keywords: strings(&[
                "interview prep",
                "mock interview",
                "coding interview",
                "interview questions",
                "interview",
            ]),
            broad_keywords: strings(&["interview"]),
            relevant_signals: strings(&["prepare", "practice", "tips", "advice", "technical", "upcoming"]),
            irrelevant_signals: strings(&["resume review", "cover letter", "offer letter"]),
            strong_qualifiers: strings(&["interview prep", "mock interview", "leetcode"]),
            strong_disqualifiers: strings(&["scam", "fake job", "layoff"]),
            high_intent_signals: strings(&["interview questions", "got an interview", "have an interview"]),
            high_intent_keyword_terms: strings(&["interview"]),
            channels: BTreeMap::new(),
            default_persona: None,
            companies: Vec::new(),
            resources: Vec::new(),
            company_resource: None,
            max_item_age_hours: 48,
            items_per_channel: 25,
            channels_per_scan: 3,
            min_relevant_signals: 2,
            comments: CommentTemplates::default(),
        }
    }
}

impl ScannerConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("parsing scanner config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels_per_scan == 0 {
            anyhow::bail!("channels_per_scan must be at least 1");
        }
        if !(1..=100).contains(&self.items_per_channel) {
            anyhow::bail!("items_per_channel must be between 1 and 100");
        }
        if let Some(key) = &self.company_resource {
            if !self.resources.iter().any(|r| &r.topic == key) {
                anyhow::bail!("company_resource {key:?} is not a configured resource topic");
            }
        }
        self.comments.validate()
    }

    /// Every configured channel, sorted and de-duplicated. This is the order the cursor walks.
    pub fn all_channels(&self) -> Vec<String> {
        let mut all = self
            .channels
            .values()
            .flatten()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>();
        all.sort();
        all.dedup();
        all
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            total_keywords: self.keywords.len(),
            total_channels: self.all_channels().len(),
            total_relevant_signals: self.relevant_signals.len(),
            total_irrelevant_signals: self.irrelevant_signals.len(),
            personas: self.channels.keys().cloned().collect(),
            max_item_age_hours: self.max_item_age_hours,
            items_per_channel: self.items_per_channel,
            channels_per_scan: self.channels_per_scan,
        }
    }

    pub fn persona_for_channel(&self, channel: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|(_, list)| list.iter().any(|c| c.eq_ignore_ascii_case(channel)))
            .map(|(persona, _)| persona.as_str())
            .or(self.default_persona.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub total_keywords: usize,
    pub total_channels: usize,
    pub total_relevant_signals: usize,
    pub total_irrelevant_signals: usize,
    pub personas: Vec<String>,
    pub max_item_age_hours: u64,
    pub items_per_channel: usize,
    pub channels_per_scan: usize,
}

/// Canned reply text for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentTopic {
    pub topic: String,
    /// Lowercase fragments that select this topic; the first topic with a hit wins.
    #[serde(default)]
    pub triggers: Vec<String>,
    pub opening: String,
    pub advice: String,
    /// Whole reply for LOW intent items; topics without one use the fallback topic's.
    #[serde(default)]
    pub low_intent: Option<String>,
}

impl CommentTopic {
    fn new(topic: &str, triggers: &[&str], opening: &str, advice: &str, low_intent: Option<&str>) -> Self {
        Self {
            topic: topic.into(),
            triggers: strings(triggers),
            opening: opening.into(),
            advice: advice.into(),
            low_intent: low_intent.map(str::to_string),
        }
    }
}

/// Templates for suggested replies. `{resource}` in `closing_with_resource` is replaced by the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentTemplates {
    pub topics: Vec<CommentTopic>,
    /// Used when no trigger matched but a watched company is mentioned.
    pub company_topic: Option<String>,
    pub fallback_topic: String,
    pub closing_with_resource: String,
    pub closing_with_links: String,
    pub closing_without_links: String,
}

impl Default for CommentTemplates {
    fn default() -> Self {
        Self {
            topics: vec![
                CommentTopic::new(
                    "sql",
                    &["sql"],
                    "sql rounds get tricky once they move past syntax into messy business questions.",
                    "what helped me was practicing on realistic scenarios instead of drills: window functions, ctes and joins with awkward edge cases came up constantly.",
                    Some("sql opens a lot of doors. practicing against real datasets with business-style questions sticks much better than syntax drills imo."),
                ),
                CommentTopic::new(
                    "python",
                    &["python"],
                    "python interviews usually care more about how you reason than about syntax.",
                    "talking through my approach out loud while solving practice problems made the biggest difference for me.",
                    Some("python is worth it for how many directions it takes you. small practical projects stick better than tutorials."),
                ),
                CommentTopic::new(
                    "machine learning",
                    &["machine learning", "ml "],
                    "ml interviews can be intense because they mix theory with implementation.",
                    "in my experience they cared less about memorized algorithms and more about trade-offs, and explaining model choices simply was key.",
                    Some("ml is huge, so picking one area and going deep beats trying to cover everything at once."),
                ),
                CommentTopic::new(
                    "data science",
                    &["data scientist", "data science"],
                    "data science loops cover a lot of ground: stats, coding and product sense.",
                    "practicing how to explain technical ideas in plain words is what separated people in the final rounds i saw.",
                    Some("the field moves fast, but solid stats and coding fundamentals never go out of date."),
                ),
                CommentTopic::new(
                    "data analyst",
                    &["data analyst", "data analysis"],
                    "analyst interviews lean hard on sql and on how you communicate what you found.",
                    "framing every answer around business impact, not only technical correctness, worked well for me.",
                    Some("analytics is a great way in. a portfolio showing real business impact stands out more than certificates."),
                ),
                CommentTopic::new(
                    "data engineer",
                    &["data engineer"],
                    "data engineering interviews tend to go deep on pipelines and system design.",
                    "being able to walk a piece of data end to end through the system got tested in every loop i did.",
                    Some("data engineering is in demand. hands-on time with orchestration and cloud tooling pays off."),
                ),
                CommentTopic::new(
                    "probability",
                    &["probability", "statistics"],
                    "probability questions are tough because you have to reason on the spot.",
                    "working through problems step by step out loud helped me far more than memorizing formulas.",
                    None,
                ),
                CommentTopic::new(
                    "coding",
                    &["leetcode", "coding"],
                    "getting back into coding prep feels overwhelming at first but it returns quickly.",
                    "focusing on patterns like sliding window and two pointers beat grinding random problems for me.",
                    Some("consistency beats intensity with coding practice. half an hour a day adds up."),
                ),
                CommentTopic::new(
                    "behavioral",
                    &["behavioral"],
                    "behavioral rounds get underestimated but they decide a lot of offers.",
                    "i wrote out a handful of specific stories in star format and practiced until they felt natural.",
                    None,
                ),
                CommentTopic::new(
                    "job search",
                    &["resume", "job search"],
                    "the search grind is real, but small changes add up.",
                    "tailoring the resume for each role and quantifying impact got me past the first filters.",
                    Some("the market is rough but persistence pays. targeted applications and networking beat mass applying."),
                ),
                CommentTopic::new(
                    "company interview",
                    &[],
                    "company-specific prep matters since every company runs its loop differently.",
                    "reading other candidates' write-ups and a company guide beforehand meant nothing surprised me on the day.",
                    None,
                ),
                CommentTopic::new(
                    "general interview",
                    &[],
                    "interview prep can feel like a lot, but breaking it down helps.",
                    "splitting prep into technical, behavioral and company research and doing one at a time made it manageable.",
                    Some("smaller goals and tracking progress keep the momentum going. you've got this!"),
                ),
            ],
            company_topic: Some("company interview".into()),
            fallback_topic: "general interview".into(),
            closing_with_resource: "a structured question bank helped me too, this set of [practice questions]({resource}) is close to what comes up in real loops. good luck!".into(),
            closing_with_links: "a structured question bank with company guides is worth a look if you want more direction. good luck!".into(),
            closing_without_links: "good luck with your prep! happy to answer more specific questions.".into(),
        }
    }
}

impl CommentTemplates {
    fn topic(&self, name: &str) -> Option<&CommentTopic> {
        self.topics.iter().find(|t| t.topic == name)
    }

    pub fn validate(&self) -> Result<()> {
        let Some(fallback) = self.topic(&self.fallback_topic) else {
            anyhow::bail!("fallback_topic {:?} is not a configured comment topic", self.fallback_topic);
        };
        if fallback.low_intent.is_none() {
            anyhow::bail!("fallback_topic {:?} needs low_intent text", self.fallback_topic);
        }
        if let Some(key) = &self.company_topic {
            if self.topic(key).is_none() {
                anyhow::bail!("company_topic {key:?} is not a configured comment topic");
            }
        }
        Ok(())
    }
}

/// Builds a reply suggestion from topic templates, intent and whether the channel allows links.
#[derive(Debug, Clone)]
pub struct CommentSuggester {
    templates: CommentTemplates,
}

impl CommentSuggester {
    pub fn new(templates: CommentTemplates) -> Self {
        Self { templates }
    }

    pub fn detect_topic(&self, text_lower: &str, matched: &[String], has_company: bool) -> &str {
        let combined = format!("{text_lower} {}", matched.join(" ").to_lowercase());
        self.templates
            .topics
            .iter()
            .find(|t| t.triggers.iter().any(|tr| combined.contains(&tr.to_lowercase())))
            .map(|t| t.topic.as_str())
            .or_else(|| self.templates.company_topic.as_deref().filter(|_| has_company))
            .unwrap_or(self.templates.fallback_topic.as_str())
    }

    pub fn suggest(&self, candidate: &ClassifiedCandidate) -> Option<String> {
        let t = &self.templates;
        let text = candidate.item.searchable_text().to_lowercase();
        let name = self.detect_topic(
            &text,
            &candidate.matched_keywords,
            !candidate.companies_mentioned.is_empty(),
        );
        let fallback = t.topic(&t.fallback_topic)?;
        let topic = t.topic(name).unwrap_or(fallback);

        if candidate.intent == Intent::Low {
            return topic.low_intent.clone().or_else(|| fallback.low_intent.clone());
        }

        // unknown rules count as links allowed
        let links_allowed = candidate
            .item
            .channel_rules
            .as_ref()
            .map_or(true, |r| r.links_allowed);
        let closing = match (links_allowed, candidate.suggested_resource.as_deref()) {
            (true, Some(url)) => t.closing_with_resource.replace("{resource}", url),
            (true, None) => t.closing_with_links.clone(),
            (false, _) => t.closing_without_links.clone(),
        };
        Some(format!("{} {} {}", topic.opening, topic.advice, closing))
    }
}

/// Channels covered by one fetch starting at a cursor index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelWindow {
    pub channels: Vec<String>,
    pub next: u64,
    pub exhausted: bool,
}

pub fn plan_window(all_channels: &[String], start: u64, channels_per_scan: usize) -> ChannelWindow {
    let len = all_channels.len();
    let begin = usize::try_from(start).unwrap_or(usize::MAX).min(len);
    let end = begin.saturating_add(channels_per_scan.max(1)).min(len);
    ChannelWindow {
        channels: all_channels[begin..end].to_vec(),
        next: if begin == end { start } else { end as u64 },
        exhausted: end >= len,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListing {
    pub data: RedditListingData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingData {
    #[serde(default)]
    pub children: Vec<RedditChild>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditChild {
    pub kind: String,
    pub data: RedditPost,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub subreddit: Option<String>,
}

/// `/api/info.json` response; only the score of each thing is read.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditInfo {
    pub data: RedditInfoData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditInfoData {
    #[serde(default)]
    pub children: Vec<RedditInfoChild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditInfoChild {
    pub data: RedditScore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditScore {
    #[serde(default)]
    pub score: i64,
}

/// Last path segment of a comment permalink, e.g. `c1` in `.../comments/abc/title/c1/`.
pub fn comment_id_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?.trim_end_matches('/');
    let (_, id) = path.rsplit_once('/')?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())).then_some(id)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditRules {
    #[serde(default)]
    pub rules: Vec<RedditRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditRule {
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
}

/// Only link posts (`t3`) are kept; comments lack the context needed to judge intent.
pub fn items_from_listing(channel: &str, listing: RedditListing, rules: &ChannelRules) -> Vec<RawItem> {
    listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind == "t3")
        .map(|child| {
            let post = child.data;
            RawItem {
                source: REDDIT_SOURCE_ID.to_string(),
                source_item_id: post.name.unwrap_or_else(|| format!("t3_{}", post.id)),
                kind: ItemKind::Post,
                channel: post.subreddit.unwrap_or_else(|| channel.to_string()),
                title: post.title,
                body: post.selftext,
                url: if post.permalink.is_empty() {
                    String::new()
                } else {
                    format!("https://reddit.com{}", post.permalink)
                },
                author: post.author.filter(|a| a != "[deleted]"),
                score: post.score,
                num_comments: post.num_comments,
                created_at_source: post
                    .created_utc
                    .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
                channel_rules: Some(rules.clone()),
            }
        })
        .collect()
}

pub fn parse_listing(channel: &str, json: &str, rules: &ChannelRules) -> Result<Vec<RawItem>> {
    let listing: RedditListing = serde_json::from_str(json).context("parsing reddit listing")?;
    Ok(items_from_listing(channel, listing, rules))
}

/// Reduce posted channel rules to a summary plus link/self-promotion flags.
pub fn summarize_rules(rules: &RedditRules) -> ChannelRules {
    let mut summary = ChannelRules::default();
    for rule in &rules.rules {
        let text = format!("{}: {}", rule.short_name, rule.description);
        let lower = text.to_lowercase();
        let restrictive = ["no link", "no url", "no self-promotion", "no spam", "no advertising"]
            .iter()
            .any(|term| lower.contains(term));
        if restrictive {
            if lower.contains("link") || lower.contains("url") {
                summary.links_allowed = false;
            }
            if lower.contains("self-promotion") || lower.contains("advertising") {
                summary.self_promo_allowed = false;
            }
        }
        if summary.summary.len() < RULES_SUMMARY_LIMIT {
            summary.summary.push(text);
        }
    }
    summary
}

/// Reads the public `new` listing of each configured channel, `channels_per_scan` at a time.
///
/// The cursor is an index into the sorted channel list. Every rotation re-reads each channel's
/// newest page, so posts that show up out of order are caught on the next pass and the
/// storage-level dedup absorbs the overlap.
pub struct RedditClient {
    http: Arc<HttpFetcher>,
    base_url: String,
    channels: Vec<String>,
    items_per_channel: usize,
    channels_per_scan: usize,
    rules_cache: Mutex<HashMap<String, ChannelRules>>,
}

impl RedditClient {
    pub fn new(http: Arc<HttpFetcher>, config: &ScannerConfig) -> Self {
        Self {
            http,
            base_url: REDDIT_BASE_URL.to_string(),
            channels: config.all_channels(),
            items_per_channel: config.items_per_channel,
            channels_per_scan: config.channels_per_scan,
            rules_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    async fn channel_rules(&self, channel: &str) -> ChannelRules {
        if let Some(rules) = self.rules_cache.lock().await.get(channel) {
            return rules.clone();
        }
        let url = format!("{}/r/{channel}/about/rules.json", self.base_url);
        match self.http.get_json::<RedditRules>(REDDIT_LANE, &url).await {
            Ok(raw) => {
                let rules = summarize_rules(&raw);
                self.rules_cache
                    .lock()
                    .await
                    .insert(channel.to_string(), rules.clone());
                rules
            }
            Err(err) => {
                debug!(channel, error = %err, "channel rules unavailable; assuming permissive");
                ChannelRules {
                    summary: vec![format!("Could not fetch rules: {err}")],
                    ..ChannelRules::default()
                }
            }
        }
    }
}

#[async_trait]
impl SourceClient for RedditClient {
    fn source_id(&self) -> &'static str {
        REDDIT_SOURCE_ID
    }

    async fn fetch(&self, cursor: &CursorToken) -> Result<SourceBatch, SourceFetchError> {
        let start = cursor
            .as_index()
            .ok_or_else(|| SourceFetchError::UnsupportedCursor(cursor.clone()))?;
        let window = plan_window(&self.channels, start, self.channels_per_scan);

        let mut items = Vec::new();
        for channel in &window.channels {
            let url = format!(
                "{}/r/{channel}/new.json?limit={}",
                self.base_url, self.items_per_channel
            );
            let listing = match self.http.get_json::<RedditListing>(REDDIT_LANE, &url).await {
                Ok(listing) => listing,
                Err(err @ FetchError::HttpStatus { .. })
                    if err.disposition() == RetryDisposition::NonRetryable =>
                {
                    warn!(channel, error = %err, "skipping channel");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let rules = self.channel_rules(channel).await;
            items.extend(items_from_listing(channel, listing, &rules));
        }

        Ok(SourceBatch {
            items,
            next: CursorToken::Index(window.next),
            exhausted: window.exhausted,
            descriptor: window.channels,
        })
    }
}

#[async_trait]
impl ReplyScores for RedditClient {
    async fn comment_score(&self, reply_url: &str) -> Result<i64, SourceFetchError> {
        let id = comment_id_from_url(reply_url)
            .ok_or_else(|| SourceFetchError::Message(format!("no comment id in {reply_url}")))?;
        let url = format!("{}/api/info.json?id=t1_{id}", self.base_url);
        let info = self.http.get_json::<RedditInfo>(REDDIT_LANE, &url).await?;
        info.data
            .children
            .first()
            .map(|child| child.data.score)
            .ok_or_else(|| SourceFetchError::Message(format!("comment {id} not found")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixturePage {
    #[serde(default)]
    pub descriptor: Vec<String>,
    #[serde(default)]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureFeed {
    pages: Vec<FixturePage>,
}

/// Replays pre-captured pages; the cursor index selects the page.
#[derive(Debug, Clone)]
pub struct FixtureSourceClient {
    pages: Vec<FixturePage>,
}

impl FixtureSourceClient {
    pub fn new(pages: Vec<FixturePage>) -> Self {
        Self { pages }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let feed: FixtureFeed =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::new(feed.pages))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[async_trait]
impl SourceClient for FixtureSourceClient {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch(&self, cursor: &CursorToken) -> Result<SourceBatch, SourceFetchError> {
        let index = cursor
            .as_index()
            .ok_or_else(|| SourceFetchError::UnsupportedCursor(cursor.clone()))?;
        let position = usize::try_from(index).unwrap_or(usize::MAX);
        let Some(page) = self.pages.get(position) else {
            return Ok(SourceBatch {
                items: Vec::new(),
                next: cursor.clone(),
                exhausted: true,
                descriptor: Vec::new(),
            });
        };
        let next = index + 1;
        Ok(SourceBatch {
            items: page.items.clone(),
            next: CursorToken::Index(next),
            exhausted: position + 1 >= self.pages.len(),
            descriptor: page.descriptor.clone(),
        })
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(at, _)| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn any_in(text: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| text.contains(&n.to_lowercase()))
}

/// Case-insensitive keyword matcher with a relevance gate for broad keywords.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    config: Arc<ScannerConfig>,
    suggester: CommentSuggester,
}

impl KeywordClassifier {
    pub fn new(config: Arc<ScannerConfig>) -> Self {
        let suggester = CommentSuggester::new(config.comments.clone());
        Self { config, suggester }
    }

    pub fn matched_keywords(&self, text_lower: &str) -> Vec<String> {
        self.config
            .keywords
            .iter()
            .filter(|k| text_lower.contains(&k.to_lowercase()))
            .cloned()
            .collect()
    }

    fn only_broad(&self, matched: &[String]) -> bool {
        matched
            .iter()
            .all(|k| self.config.broad_keywords.iter().any(|b| b.eq_ignore_ascii_case(k)))
    }

    /// Relevance check for items that matched nothing but broad keywords.
    pub fn is_relevant(&self, text_lower: &str) -> bool {
        let c = &self.config;
        if any_in(text_lower, &c.strong_disqualifiers) {
            return false;
        }
        if any_in(text_lower, &c.strong_qualifiers) {
            return true;
        }
        if any_in(text_lower, &c.irrelevant_signals) {
            return false;
        }
        let hits = c
            .relevant_signals
            .iter()
            .filter(|s| text_lower.contains(&s.to_lowercase()))
            .count();
        hits >= c.min_relevant_signals
    }

    pub fn companies(&self, text_lower: &str) -> Vec<String> {
        self.config
            .companies
            .iter()
            .filter(|c| contains_word(text_lower, &c.to_lowercase()))
            .cloned()
            .collect()
    }

    pub fn intent(&self, text_lower: &str, matched: &[String]) -> Intent {
        let c = &self.config;
        let keyword_hit = matched.iter().any(|k| {
            let k = k.to_lowercase();
            c.high_intent_keyword_terms
                .iter()
                .any(|term| k.contains(&term.to_lowercase()))
        });
        if any_in(text_lower, &c.high_intent_signals) || keyword_hit {
            Intent::High
        } else {
            Intent::Low
        }
    }

    pub fn resource(&self, text_lower: &str, matched: &[String], has_company: bool) -> Option<String> {
        let combined = format!("{text_lower} {}", matched.join(" ").to_lowercase());
        let by_topic = self
            .config
            .resources
            .iter()
            .find(|r| combined.contains(&r.topic.to_lowercase()))
            .map(|r| r.url.clone());
        by_topic.or_else(|| {
            let key = self.config.company_resource.as_deref().filter(|_| has_company)?;
            self.config
                .resources
                .iter()
                .find(|r| r.topic == key)
                .map(|r| r.url.clone())
        })
    }

    pub fn classify_at(
        &self,
        item: &RawItem,
        now: DateTime<Utc>,
    ) -> Result<Option<ClassifiedCandidate>, ClassificationError> {
        if item.source_item_id.trim().is_empty() {
            return Err(ClassificationError::MissingField("source_item_id"));
        }
        if item.url.trim().is_empty() {
            return Err(ClassificationError::MissingField("url"));
        }
        if item.title.trim().is_empty() {
            return Err(ClassificationError::MissingField("title"));
        }

        let max_age = self.config.max_item_age_hours;
        if let (Some(created), true) = (item.created_at_source, max_age > 0) {
            // capped at a century so the subtraction cannot overflow
            let cutoff = now - Duration::hours(max_age.min(876_000) as i64);
            if created < cutoff {
                return Ok(None);
            }
        }

        let text = item.searchable_text().to_lowercase();
        let matched = self.matched_keywords(&text);
        if matched.is_empty() {
            return Ok(None);
        }
        if self.only_broad(&matched) && !self.is_relevant(&text) {
            return Ok(None);
        }

        let companies = self.companies(&text);
        let mut candidate = ClassifiedCandidate {
            intent: self.intent(&text, &matched),
            suggested_resource: self.resource(&text, &matched, !companies.is_empty()),
            recommended_persona: self.config.persona_for_channel(&item.channel).map(str::to_string),
            matched_keywords: matched,
            companies_mentioned: companies,
            comment_suggestion: None,
            item: item.clone(),
        };
        candidate.comment_suggestion = self.suggester.suggest(&candidate);
        Ok(Some(candidate))
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, item: &RawItem) -> Result<Option<ClassifiedCandidate>, ClassificationError> {
        self.classify_at(item, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().unwrap()
    }

    fn test_config() -> ScannerConfig {
        ScannerConfig {
            keywords: strings(&["interview prep", "sql interview", "interview"]),
            broad_keywords: strings(&["interview"]),
            relevant_signals: strings(&["prepare", "practice", "technical", "tomorrow"]),
            irrelevant_signals: strings(&["cover letter"]),
            strong_qualifiers: strings(&["leetcode"]),
            strong_disqualifiers: strings(&["focus group"]),
            high_intent_signals: strings(&["got an interview"]),
            high_intent_keyword_terms: strings(&["prep"]),
            channels: BTreeMap::from([
                ("ana".to_string(), strings(&["cscareerquestions", "leetcode"])),
                ("ben".to_string(), strings(&["datascience", "leetcode"])),
            ]),
            default_persona: Some("ana".into()),
            companies: strings(&["meta", "google"]),
            resources: vec![
                ResourceLink {
                    topic: "sql".into(),
                    url: "https://example.test/sql".into(),
                },
                ResourceLink {
                    topic: "company guides".into(),
                    url: "https://example.test/companies".into(),
                },
            ],
            company_resource: Some("company guides".into()),
            ..ScannerConfig::default()
        }
    }

    fn item(title: &str, body: &str) -> RawItem {
        RawItem {
            source: "reddit".into(),
            source_item_id: "t3_abc".into(),
            kind: ItemKind::Post,
            channel: "DataScience".into(),
            title: title.into(),
            body: body.into(),
            url: "https://reddit.com/r/datascience/comments/abc/".into(),
            author: Some("someone".into()),
            score: 4,
            num_comments: 2,
            created_at_source: Some(now() - Duration::hours(3)),
            channel_rules: None,
        }
    }

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::new(Arc::new(test_config()))
    }

    #[test]
    fn specific_keyword_yields_candidate_with_metadata() {
        let c = classifier()
            .classify_at(&item("SQL interview at Meta next week", "any advice?"), now())
            .unwrap()
            .expect("candidate");
        assert_eq!(c.matched_keywords, strings(&["sql interview", "interview"]));
        assert_eq!(c.companies_mentioned, strings(&["meta"]));
        assert_eq!(c.recommended_persona.as_deref(), Some("ben"));
        assert_eq!(c.suggested_resource.as_deref(), Some("https://example.test/sql"));
        assert_eq!(c.intent, Intent::Low);
    }

    #[test]
    fn broad_keyword_alone_needs_relevance() {
        let cls = classifier();
        let weak = item("Interview outfit", "what colour tie");
        assert_eq!(cls.classify_at(&weak, now()).unwrap(), None);

        let two_signals = item("Interview tomorrow", "how do I prepare");
        assert!(cls.classify_at(&two_signals, now()).unwrap().is_some());

        let disqualified = item("Interview for a focus group", "prepare practice leetcode");
        assert_eq!(cls.classify_at(&disqualified, now()).unwrap(), None);

        let qualified = item("Interview", "grinding leetcode");
        assert!(cls.classify_at(&qualified, now()).unwrap().is_some());

        let irrelevant = item("Interview:", "practice and technical rounds, cover letter too");
        assert_eq!(
            cls.matched_keywords("interview: practice and technical rounds, cover letter too"),
            strings(&["interview"])
        );
        assert_eq!(cls.classify_at(&irrelevant, now()).unwrap(), None);

        let same_without_noise = item("Interview:", "practice and technical rounds");
        assert!(cls.classify_at(&same_without_noise, now()).unwrap().is_some());
    }

    #[test]
    fn high_intent_suggestion_links_resource_only_where_allowed() {
        let cls = classifier();
        let post = item("SQL interview prep", "window functions keep tripping me up");
        let c = cls.classify_at(&post, now()).unwrap().unwrap();
        assert_eq!(c.intent, Intent::High);
        let text = c.comment_suggestion.expect("suggestion");
        assert!(text.starts_with("sql rounds"), "{text}");
        assert!(text.contains("(https://example.test/sql)"), "{text}");

        let mut no_links = post.clone();
        no_links.channel_rules = Some(ChannelRules {
            summary: vec![],
            links_allowed: false,
            self_promo_allowed: true,
        });
        let text = cls
            .classify_at(&no_links, now())
            .unwrap()
            .unwrap()
            .comment_suggestion
            .unwrap();
        assert!(!text.contains("https://"), "{text}");
        assert!(text.ends_with(&CommentTemplates::default().closing_without_links));
    }

    #[test]
    fn low_intent_suggestion_uses_topic_or_fallback_text() {
        let cls = classifier();
        let defaults = CommentTemplates::default();
        let low = |topic: &str| {
            defaults
                .topics
                .iter()
                .find(|t| t.topic == topic)
                .and_then(|t| t.low_intent.clone())
        };

        let coding = cls
            .classify_at(&item("SQL interview stories", "mostly leetcode talk"), now())
            .unwrap()
            .unwrap();
        assert_eq!(coding.intent, Intent::Low);
        assert_eq!(coding.comment_suggestion, low("sql"));

        let behavioral = cls
            .classify_at(&item("Interview tomorrow", "behavioral round, how do I prepare"), now())
            .unwrap()
            .unwrap();
        assert_eq!(behavioral.intent, Intent::Low);
        assert_eq!(behavioral.comment_suggestion, low("general interview"));
    }

    #[test]
    fn company_mention_picks_company_topic() {
        let suggester = CommentSuggester::new(CommentTemplates::default());
        assert_eq!(suggester.detect_topic("onsite at meta", &[], true), "company interview");
        assert_eq!(suggester.detect_topic("onsite at meta", &[], false), "general interview");
        assert_eq!(
            suggester.detect_topic("onsite at meta", &strings(&["python interview"]), true),
            "python"
        );
    }

    #[test]
    fn companies_match_whole_words_only() {
        let cls = classifier();
        assert_eq!(cls.companies("metadata pipelines at google."), strings(&["google"]));
        assert!(cls.companies("googled it").is_empty());
    }

    #[test]
    fn company_resource_is_fallback_when_no_topic_matches() {
        let c = classifier()
            .classify_at(&item("Google interview prep", ""), now())
            .unwrap()
            .unwrap();
        assert_eq!(c.suggested_resource.as_deref(), Some("https://example.test/companies"));
        assert_eq!(c.intent, Intent::High);
    }

    #[test]
    fn stale_and_incomplete_items() {
        let cls = classifier();
        let mut old = item("interview prep", "");
        old.created_at_source = Some(now() - Duration::hours(49));
        assert_eq!(cls.classify_at(&old, now()).unwrap(), None);

        let mut no_url = item("interview prep", "");
        no_url.url = " ".into();
        assert_eq!(
            cls.classify_at(&no_url, now()).unwrap_err(),
            ClassificationError::MissingField("url")
        );
    }

    #[test]
    fn unknown_channel_uses_default_persona() {
        let config = test_config();
        assert_eq!(config.persona_for_channel("LEETCODE"), Some("ana"));
        assert_eq!(config.persona_for_channel("elsewhere"), Some("ana"));
        assert_eq!(
            config.all_channels(),
            strings(&["cscareerquestions", "datascience", "leetcode"])
        );
    }

    #[test]
    fn window_walks_channels_and_reports_exhaustion() {
        let all = strings(&["a", "b", "c", "d", "e"]);
        assert_eq!(
            plan_window(&all, 0, 3),
            ChannelWindow {
                channels: strings(&["a", "b", "c"]),
                next: 3,
                exhausted: false
            }
        );
        assert_eq!(
            plan_window(&all, 3, 3),
            ChannelWindow {
                channels: strings(&["d", "e"]),
                next: 5,
                exhausted: true
            }
        );
        let past_end = plan_window(&all, 5, 3);
        assert!(past_end.channels.is_empty());
        assert_eq!(past_end.next, 5);
        assert!(past_end.exhausted);
    }

    #[test]
    fn reddit_listing_fixture_parses_posts_only() {
        let path = workspace_root().join("fixtures/reddit/new_cscareerquestions.json");
        let text = std::fs::read_to_string(path).expect("listing fixture");
        let rules = ChannelRules::default();
        let items = parse_listing("cscareerquestions", &text, &rules).expect("parse");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_item_id, "t3_1b2c3d");
        assert_eq!(
            items[0].url,
            "https://reddit.com/r/cscareerquestions/comments/1b2c3d/mock_interview_partners/"
        );
        assert!(items[0].created_at_source.is_some());
        assert_eq!(items[1].author, None);
    }

    #[test]
    fn rules_fixture_disables_links_and_self_promotion() {
        let path = workspace_root().join("fixtures/reddit/rules_cscareerquestions.json");
        let text = std::fs::read_to_string(path).expect("rules fixture");
        let raw: RedditRules = serde_json::from_str(&text).expect("parse rules");
        let rules = summarize_rules(&raw);
        assert!(!rules.links_allowed);
        assert!(!rules.self_promo_allowed);
        assert_eq!(rules.summary.len(), 3);
    }

    #[test]
    fn comment_ids_come_from_the_permalink_tail() {
        assert_eq!(
            comment_id_from_url("https://reddit.com/r/leetcode/comments/abc/title/kx9q2/"),
            Some("kx9q2")
        );
        assert_eq!(
            comment_id_from_url("https://www.reddit.com/r/x/comments/abc/t/kx9q2?context=3"),
            Some("kx9q2")
        );
        assert_eq!(comment_id_from_url("kx9q2"), None);
        assert_eq!(comment_id_from_url("https://reddit.com/r/x/comments/abc/my-title/"), None);
    }

    #[test]
    fn info_fixture_yields_comment_score() {
        let path = workspace_root().join("fixtures/reddit/info_comment.json");
        let text = std::fs::read_to_string(path).expect("info fixture");
        let info: RedditInfo = serde_json::from_str(&text).expect("parse info");
        assert_eq!(info.data.children.first().map(|c| c.data.score), Some(17));
    }

    #[test]
    fn summary_counts_config_lists() {
        let summary = test_config().summary();
        assert_eq!(summary.total_keywords, 3);
        assert_eq!(summary.total_channels, 3);
        assert_eq!(summary.personas, strings(&["ana", "ben"]));
        assert_eq!(summary.max_item_age_hours, 48);
    }

    #[test]
    fn yaml_config_fills_defaults_and_validates() {
        let config = ScannerConfig::from_yaml_str("keywords: [\"mock interview\"]\nchannels_per_scan: 2\n").unwrap();
        assert_eq!(config.keywords, strings(&["mock interview"]));
        assert_eq!(config.channels_per_scan, 2);
        assert_eq!(config.max_item_age_hours, 48);

        assert!(ScannerConfig::from_yaml_str("channels_per_scan: 0\n").is_err());
        assert!(ScannerConfig::from_yaml_str("company_resource: nope\n").is_err());
        assert!(ScannerConfig::from_yaml_str("comments:\n  fallback_topic: missing\n").is_err());

        let closing = ScannerConfig::from_yaml_str("comments:\n  closing_without_links: cheers\n").unwrap();
        assert_eq!(closing.comments.closing_without_links, "cheers");
        assert_eq!(closing.comments.topics, CommentTemplates::default().topics);
    }

    #[test]
    fn sample_scanner_config_loads() {
        let config = ScannerConfig::load(workspace_root().join("config/scanner.yaml")).unwrap();
        assert!(!config.all_channels().is_empty());
        assert!(config.default_persona.is_some());
        assert_eq!(config.comments.topics, CommentTemplates::default().topics);
    }

    #[tokio::test]
    async fn fixture_client_pages_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.json");
        let page_item = item("interview prep", "");
        let feed = serde_json::json!({
            "pages": [
                { "descriptor": ["p0"], "items": [page_item] },
                { "descriptor": ["p1"], "items": [] }
            ]
        });
        std::fs::write(&path, feed.to_string()).unwrap();

        let client = FixtureSourceClient::load(&path).await.unwrap();
        let first = client.fetch(&CursorToken::start()).await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.next, CursorToken::Index(1));
        assert!(!first.exhausted);

        let second = client.fetch(&first.next).await.unwrap();
        assert!(second.exhausted);
        assert_eq!(second.descriptor, strings(&["p1"]));

        let beyond = client.fetch(&CursorToken::Index(7)).await.unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.next, CursorToken::Index(7));

        assert!(matches!(
            client.fetch(&CursorToken::Token("abc".into())).await,
            Err(SourceFetchError::UnsupportedCursor(_))
        ));
    }
}
