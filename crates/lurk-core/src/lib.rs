//! Core domain model, scan cursor and review workflow for lurk.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "lurk-core";

/// Fixed key of the single `scan_state` row.
pub const SCAN_CURSOR_ROW_ID: i32 = 1;

pub const TITLE_MAX_CHARS: usize = 200;
pub const SNIPPET_MAX_CHARS: usize = 300;
pub const MAX_MATCHED_KEYWORDS: usize = 5;
pub const MAX_RULE_SUMMARIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Comment,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
        }
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Self::Post),
            "comment" => Ok(Self::Comment),
            other => Err(format!("unknown item kind {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    High,
    Low,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Low => "LOW",
        }
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Self::High),
            "LOW" => Ok(Self::Low),
            other => Err(format!("unknown intent {other:?}")),
        }
    }
}

/// Posting rules of the channel an item was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRules {
    pub summary: Vec<String>,
    pub links_allowed: bool,
    pub self_promo_allowed: bool,
}

impl Default for ChannelRules {
    fn default() -> Self {
        Self {
            summary: Vec::new(),
            links_allowed: true,
            self_promo_allowed: true,
        }
    }
}

/// Unclassified item as handed over by a source client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source: String,
    pub source_item_id: String,
    pub kind: ItemKind,
    pub channel: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_at_source: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel_rules: Option<ChannelRules>,
}

impl RawItem {
    /// Title and body joined the way classifiers scan them.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

/// Raw item plus the metadata a classifier attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedCandidate {
    pub item: RawItem,
    pub intent: Intent,
    pub matched_keywords: Vec<String>,
    pub companies_mentioned: Vec<String>,
    pub recommended_persona: Option<String>,
    pub suggested_resource: Option<String>,
    pub comment_suggestion: Option<String>,
}

impl ClassifiedCandidate {
    pub fn dedup_key(&self) -> &str {
        &self.item.url
    }

    pub fn opportunity_id(&self) -> Uuid {
        opportunity_id_for(&self.item.source, &self.item.source_item_id)
    }

    pub fn into_opportunity(self, scan_time: DateTime<Utc>) -> Opportunity {
        let id = self.opportunity_id();
        let rules = self.item.channel_rules.clone();
        let mut matched_keywords = self.matched_keywords;
        matched_keywords.truncate(MAX_MATCHED_KEYWORDS);

        Opportunity {
            id,
            url: self.item.url,
            kind: self.item.kind,
            intent: self.intent,
            origin_channel: self.item.channel,
            title: truncate_chars(&self.item.title, TITLE_MAX_CHARS),
            text_snippet: truncate_chars(&self.item.body, SNIPPET_MAX_CHARS),
            author: self
                .item
                .author
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| "[deleted]".to_string()),
            score: self.item.score,
            num_comments: self.item.num_comments,
            created_at_source: self.item.created_at_source,
            matched_keywords,
            companies_mentioned: self.companies_mentioned,
            recommended_persona: self.recommended_persona,
            suggested_resource: self.suggested_resource,
            links_allowed: rules.as_ref().map(|r| r.links_allowed),
            self_promo_allowed: rules.as_ref().map(|r| r.self_promo_allowed),
            channel_rules: rules
                .map(|r| r.summary.into_iter().take(MAX_RULE_SUMMARIES).collect())
                .unwrap_or_default(),
            comment_suggestion: self.comment_suggestion,
            status: ReviewStatus::Pending.as_str().to_string(),
            reply_url: None,
            reply_timestamp: None,
            feedback: None,
            scan_time,
            ingested_at: None,
        }
    }
}

/// Stable identity of a source item, independent of its URL.
pub fn opportunity_id_for(source: &str, source_item_id: &str) -> Uuid {
    let name = format!("{}:{}", source.trim().to_ascii_lowercase(), source_item_id.trim());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

/// Persisted record of one discovered source item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub intent: Intent,
    pub origin_channel: String,
    pub title: String,
    pub text_snippet: String,
    pub author: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_at_source: Option<DateTime<Utc>>,
    pub matched_keywords: Vec<String>,
    pub companies_mentioned: Vec<String>,
    pub recommended_persona: Option<String>,
    pub suggested_resource: Option<String>,
    pub links_allowed: Option<bool>,
    pub self_promo_allowed: Option<bool>,
    pub channel_rules: Vec<String>,
    pub comment_suggestion: Option<String>,
    pub status: String,
    pub reply_url: Option<String>,
    pub reply_timestamp: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
    pub scan_time: DateTime<Utc>,
    pub ingested_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    pub fn review_status(&self) -> Result<ReviewStatus, TransitionError> {
        self.status.parse()
    }

    /// Copy `update` onto the workflow fields, leaving absent values untouched.
    pub fn apply_review_update(&mut self, update: &ReviewUpdate) {
        self.status = update.status.clone();
        if let Some(reply_url) = &update.reply_url {
            self.reply_url = Some(reply_url.clone());
        }
        if let Some(ts) = update.reply_timestamp {
            self.reply_timestamp = Some(ts);
        }
        if let Some(feedback) = &update.feedback {
            self.feedback = Some(feedback.clone());
        }
    }
}

/// Resumable position in a source's ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorToken {
    Index(u64),
    Token(String),
}

impl CursorToken {
    pub fn start() -> Self {
        Self::Index(0)
    }

    pub fn as_index(&self) -> Option<u64> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Token(_) => None,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Self::Index(0))
    }
}

impl Default for CursorToken {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Token(t) => f.write_str(t),
        }
    }
}

/// What a cycle does once the source reported it has nothing past the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    #[default]
    Wrap,
    Hold,
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wrap" => Ok(Self::Wrap),
            "hold" => Ok(Self::Hold),
            other => Err(format!("unknown exhaustion policy {other:?}")),
        }
    }
}

/// Descriptor of the last completed batch, kept on the cursor for diagnostics and replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub from: CursorToken,
    pub to: CursorToken,
    pub exhausted: bool,
    #[serde(default)]
    pub descriptor: Vec<String>,
    pub fetched: usize,
    pub classified: usize,
    pub filtered: usize,
    pub classification_failures: usize,
    pub inserted: usize,
    pub duplicate: usize,
    pub failed: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanCursor {
    pub next_index: CursorToken,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub last_batch: Option<BatchSummary>,
}

impl ScanCursor {
    /// Token the next fetch starts from under `policy`.
    pub fn resume_from(&self, policy: ExhaustionPolicy) -> CursorToken {
        let exhausted = self.last_batch.as_ref().is_some_and(|b| b.exhausted);
        match (exhausted, policy) {
            (true, ExhaustionPolicy::Wrap) => CursorToken::start(),
            _ => self.next_index.clone(),
        }
    }

    pub fn advanced(&self, summary: BatchSummary, scanned_at: DateTime<Utc>) -> Self {
        Self {
            next_index: summary.to.clone(),
            last_scan_time: Some(scanned_at),
            last_batch: Some(summary),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub url: String,
    pub reason: String,
}

/// Per-item outcome counts of one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicate: usize,
    pub failed: usize,
    pub failures: Vec<IngestFailure>,
    pub inserted_ids: Vec<Uuid>,
}

impl IngestReport {
    pub fn record_inserted(&mut self, id: Uuid) {
        self.inserted += 1;
        self.inserted_ids.push(id);
    }

    pub fn record_duplicate(&mut self) {
        self.duplicate += 1;
    }

    pub fn record_failure(&mut self, url: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(IngestFailure {
            url: url.into(),
            reason: reason.into(),
        });
    }

    pub fn total(&self) -> usize {
        self.inserted + self.duplicate + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Replied,
    Ignored,
    Skipped,
    FeedbackRecorded,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 8] = [
        Self::Pending,
        Self::InProgress,
        Self::Approved,
        Self::Rejected,
        Self::Replied,
        Self::Ignored,
        Self::Skipped,
        Self::FeedbackRecorded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Replied => "replied",
            Self::Ignored => "ignored",
            Self::Skipped => "skipped",
            Self::FeedbackRecorded => "feedback_recorded",
        }
    }

    /// Payload fields that must be present to enter this status.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Replied => &["reply_url"],
            Self::Skipped | Self::FeedbackRecorded => &["feedback"],
            _ => &[],
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == needle)
            .ok_or_else(|| TransitionError::UnknownStatus(s.to_string()))
    }
}

/// Every permitted `(from, to)` move. Anything absent is rejected.
pub const ALLOWED_TRANSITIONS: &[(ReviewStatus, ReviewStatus)] = {
    use ReviewStatus::*;
    &[
        (Pending, InProgress),
        (Pending, Approved),
        (Pending, Rejected),
        (Pending, Replied),
        (Pending, Ignored),
        (Pending, Skipped),
        (InProgress, Pending),
        (InProgress, Approved),
        (InProgress, Rejected),
        (InProgress, Replied),
        (InProgress, Ignored),
        (InProgress, Skipped),
        (Approved, Pending),
        (Approved, InProgress),
        (Approved, Replied),
        (Approved, Rejected),
        (Rejected, Pending),
        (Ignored, Pending),
        (Skipped, Pending),
        (Replied, FeedbackRecorded),
        (Replied, Pending),
        (FeedbackRecorded, Pending),
        // Re-entering a data-bearing status rewrites its fields.
        (Replied, Replied),
        (Skipped, Skipped),
        (FeedbackRecorded, FeedbackRecorded),
    ]
};

pub fn is_transition_allowed(from: ReviewStatus, to: ReviewStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// Asking for the status a row already has, where that status carries no data, changes nothing.
pub fn is_noop_repeat(from: ReviewStatus, to: ReviewStatus) -> bool {
    from == to && !is_transition_allowed(from, to)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
    #[error("missing {field} for status={status}")]
    MissingField {
        field: &'static str,
        status: ReviewStatus,
    },
    #[error("transition from {from} to {to} is not allowed")]
    NotAllowed {
        from: ReviewStatus,
        to: ReviewStatus,
    },
}

/// Data a reviewer supplies along with a new status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransitionPayload {
    #[serde(default)]
    pub reply_url: Option<String>,
    #[serde(default)]
    pub reply_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl TransitionPayload {
    pub fn reply(reply_url: impl Into<String>) -> Self {
        Self {
            reply_url: Some(reply_url.into()),
            ..Default::default()
        }
    }

    pub fn feedback(feedback: impl Into<String>) -> Self {
        Self {
            feedback: Some(feedback.into()),
            ..Default::default()
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "reply_url" => self.reply_url.as_deref(),
            "feedback" => self.feedback.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Workflow-field write produced by a validated transition; status travels as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub status: String,
    pub reply_url: Option<String>,
    pub reply_timestamp: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
}

/// Validate `from -> to` against the allow-list and the target's data preconditions.
pub fn plan_transition(
    from: ReviewStatus,
    to: ReviewStatus,
    payload: &TransitionPayload,
    now: DateTime<Utc>,
) -> Result<ReviewUpdate, TransitionError> {
    if !is_transition_allowed(from, to) {
        return Err(TransitionError::NotAllowed { from, to });
    }
    for &field in to.required_fields() {
        if payload.field(field).is_none() {
            return Err(TransitionError::MissingField { field, status: to });
        }
    }

    let reply_timestamp = match (payload.reply_timestamp, to) {
        (Some(ts), _) => Some(ts),
        (None, ReviewStatus::Replied) => Some(now),
        (None, _) => None,
    };

    Ok(ReviewUpdate {
        status: to.as_str().to_string(),
        reply_url: payload.field("reply_url").map(ToString::to_string),
        reply_timestamp,
        feedback: payload.field("feedback").map(ToString::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single().unwrap()
    }

    fn candidate(id: &str, url: &str) -> ClassifiedCandidate {
        ClassifiedCandidate {
            item: RawItem {
                source: "reddit".into(),
                source_item_id: id.into(),
                kind: ItemKind::Post,
                channel: "leetcode".into(),
                title: "é".repeat(250),
                body: "interview prep ".repeat(40),
                url: url.into(),
                author: None,
                score: 12,
                num_comments: 4,
                created_at_source: Some(ts()),
                channel_rules: Some(ChannelRules {
                    summary: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    links_allowed: false,
                    self_promo_allowed: true,
                }),
            },
            intent: Intent::High,
            matched_keywords: (0..8).map(|i| format!("kw{i}")).collect(),
            companies_mentioned: vec!["google".into()],
            recommended_persona: Some("east_coast".into()),
            suggested_resource: None,
            comment_suggestion: None,
        }
    }

    #[test]
    fn opportunity_id_is_stable_across_url_changes() {
        let a = candidate("t3_abc", "https://reddit.com/r/leetcode/comments/abc/x/");
        let b = candidate("t3_abc", "https://old.reddit.com/r/leetcode/comments/abc/");
        assert_eq!(a.opportunity_id(), b.opportunity_id());
        assert_ne!(a.opportunity_id(), candidate("t3_abd", "u").opportunity_id());
        assert_eq!(opportunity_id_for("Reddit", "t3_abc"), a.opportunity_id());
    }

    #[test]
    fn new_opportunity_starts_pending_with_bounded_fields() {
        let opp = candidate("t3_abc", "https://reddit.com/x").into_opportunity(ts());
        assert_eq!(opp.status, "pending");
        assert_eq!(opp.title.chars().count(), TITLE_MAX_CHARS);
        assert_eq!(opp.text_snippet.chars().count(), SNIPPET_MAX_CHARS);
        assert_eq!(opp.matched_keywords.len(), MAX_MATCHED_KEYWORDS);
        assert_eq!(opp.channel_rules, vec!["a", "b", "c"]);
        assert_eq!(opp.links_allowed, Some(false));
        assert_eq!(opp.author, "[deleted]");
        assert_eq!(opp.scan_time, ts());
    }

    #[test]
    fn replied_without_reply_url_names_the_missing_field() {
        let err = plan_transition(
            ReviewStatus::Pending,
            ReviewStatus::Replied,
            &TransitionPayload::default(),
            ts(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "missing reply_url for status=replied");

        let blank = TransitionPayload::reply("   ");
        assert!(matches!(
            plan_transition(ReviewStatus::Pending, ReviewStatus::Replied, &blank, ts()),
            Err(TransitionError::MissingField { field: "reply_url", .. })
        ));
    }

    #[test]
    fn replied_is_stamped_when_no_timestamp_given() {
        let update = plan_transition(
            ReviewStatus::Approved,
            ReviewStatus::Replied,
            &TransitionPayload::reply("https://reddit.com/r/x/comments/1/y/c1"),
            ts(),
        )
        .unwrap();
        assert_eq!(update.status, "replied");
        assert_eq!(update.reply_timestamp, Some(ts()));
        assert_eq!(update.feedback, None);
    }

    #[test]
    fn skip_and_feedback_require_feedback_text() {
        assert!(plan_transition(
            ReviewStatus::Pending,
            ReviewStatus::Skipped,
            &TransitionPayload::default(),
            ts()
        )
        .is_err());
        let update = plan_transition(
            ReviewStatus::Replied,
            ReviewStatus::FeedbackRecorded,
            &TransitionPayload::feedback("good thread"),
            ts(),
        )
        .unwrap();
        assert_eq!(update.feedback.as_deref(), Some("good thread"));
    }

    #[test]
    fn reopening_is_allowed_but_other_moves_out_of_terminal_states_are_not() {
        for from in [
            ReviewStatus::Rejected,
            ReviewStatus::Ignored,
            ReviewStatus::Skipped,
            ReviewStatus::Replied,
            ReviewStatus::FeedbackRecorded,
        ] {
            assert!(is_transition_allowed(from, ReviewStatus::Pending), "{from}");
        }
        assert_eq!(
            plan_transition(
                ReviewStatus::Rejected,
                ReviewStatus::Approved,
                &TransitionPayload::default(),
                ts()
            ),
            Err(TransitionError::NotAllowed {
                from: ReviewStatus::Rejected,
                to: ReviewStatus::Approved
            })
        );
        assert!(!is_transition_allowed(ReviewStatus::Pending, ReviewStatus::Pending));
        assert!(!is_transition_allowed(ReviewStatus::Pending, ReviewStatus::FeedbackRecorded));
    }

    #[test]
    fn same_status_repeats_update_or_do_nothing() {
        let corrected = plan_transition(
            ReviewStatus::Replied,
            ReviewStatus::Replied,
            &TransitionPayload::reply("https://reddit.com/r/x/comments/1/y/c2"),
            ts(),
        )
        .unwrap();
        assert_eq!(corrected.reply_url.as_deref(), Some("https://reddit.com/r/x/comments/1/y/c2"));
        assert!(plan_transition(
            ReviewStatus::FeedbackRecorded,
            ReviewStatus::FeedbackRecorded,
            &TransitionPayload::default(),
            ts()
        )
        .is_err());

        for status in [ReviewStatus::Pending, ReviewStatus::Approved, ReviewStatus::Ignored] {
            assert!(is_noop_repeat(status, status), "{status}");
        }
        for status in [ReviewStatus::Replied, ReviewStatus::Skipped, ReviewStatus::FeedbackRecorded] {
            assert!(!is_noop_repeat(status, status), "{status}");
        }
        assert!(!is_noop_repeat(ReviewStatus::Pending, ReviewStatus::Approved));
    }

    #[test]
    fn status_strings_parse_case_insensitively() {
        assert_eq!("In_Progress".parse::<ReviewStatus>().unwrap(), ReviewStatus::InProgress);
        assert_eq!(
            "archived".parse::<ReviewStatus>(),
            Err(TransitionError::UnknownStatus("archived".into()))
        );
    }

    #[test]
    fn wrap_policy_restarts_after_exhausted_batch() {
        let summary = BatchSummary {
            from: CursorToken::Index(9),
            to: CursorToken::Index(12),
            exhausted: true,
            descriptor: vec![],
            fetched: 0,
            classified: 0,
            filtered: 0,
            classification_failures: 0,
            inserted: 0,
            duplicate: 0,
            failed: 0,
            fingerprint: String::new(),
        };
        let cursor = ScanCursor::default().advanced(summary, ts());
        assert_eq!(cursor.next_index, CursorToken::Index(12));
        assert_eq!(cursor.resume_from(ExhaustionPolicy::Wrap), CursorToken::start());
        assert_eq!(cursor.resume_from(ExhaustionPolicy::Hold), CursorToken::Index(12));
        assert_eq!(ScanCursor::default().resume_from(ExhaustionPolicy::Wrap), CursorToken::start());
    }

    #[test]
    fn cursor_token_serializes_as_number_or_string() {
        assert_eq!(serde_json::to_string(&CursorToken::Index(3)).unwrap(), "3");
        let token: CursorToken = serde_json::from_str("\"t3_after\"").unwrap();
        assert_eq!(token, CursorToken::Token("t3_after".into()));
        assert_eq!(token.as_index(), None);
    }
}
