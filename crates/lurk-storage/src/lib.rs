//! Persistence for opportunities and the scan cursor, plus the rate-limited HTTP fetcher
//! source clients use.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lurk_core::{
    BatchSummary, CursorToken, Intent, ItemKind, Opportunity, ReviewUpdate, ScanCursor,
    SCAN_CURSOR_ROW_ID,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lurk-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Persistence(String),
    #[error("duplicate key ({key})")]
    DuplicateKey { key: String },
    #[error("stored row is unreadable: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return Self::DuplicateKey {
                    key: db_err.constraint().unwrap_or("unique").to_string(),
                };
            }
        }
        Self::Persistence(err.to_string())
    }
}

/// Opportunity rows. Uniqueness of `url` and `id` is enforced here, not by callers.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn url_exists(&self, url: &str) -> Result<bool, StoreError>;

    /// Insert a brand-new row. A clash on `url` or `id` is `StoreError::DuplicateKey`.
    async fn insert_new(&self, opportunity: &Opportunity) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError>;

    /// Newest scan first. `None` lists every status.
    async fn list_by_status(&self, status: Option<&str>) -> Result<Vec<Opportunity>, StoreError>;

    async fn list_with_replies(&self) -> Result<Vec<Opportunity>, StoreError>;

    /// Write workflow fields only if the row still has `expected_status`.
    /// Returns `Ok(false)` when the row is missing or another writer moved it first.
    async fn apply_review(
        &self,
        id: Uuid,
        expected_status: &str,
        update: &ReviewUpdate,
    ) -> Result<bool, StoreError>;
}

/// The singleton scan cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Current cursor; bootstraps the default row when none exists.
    async fn load(&self) -> Result<ScanCursor, StoreError>;

    /// Replace the cursor in one atomic write.
    async fn save(&self, cursor: &ScanCursor) -> Result<(), StoreError>;
}

fn newest_first(rows: &mut [Opportunity]) {
    rows.sort_by(|a, b| b.scan_time.cmp(&a.scan_time).then_with(|| a.id.cmp(&b.id)));
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<Uuid, Opportunity>,
    by_url: HashMap<String, Uuid>,
    cursor: Option<ScanCursor>,
    cursor_saves: usize,
    failing_urls: HashSet<String>,
    fail_cursor_saves: bool,
    unavailable: bool,
}

impl MemoryState {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Persistence("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

/// Process-local store with the same uniqueness rules as Postgres, plus fault injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert of `url` fail with a persistence error.
    pub async fn inject_insert_failure(&self, url: impl Into<String>) {
        self.state.lock().await.failing_urls.insert(url.into());
    }

    pub async fn set_cursor_save_failure(&self, fail: bool) {
        self.state.lock().await.fail_cursor_saves = fail;
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of successful cursor saves.
    pub async fn cursor_save_count(&self) -> usize {
        self.state.lock().await.cursor_saves
    }
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn url_exists(&self, url: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.by_url.contains_key(url))
    }

    async fn insert_new(&self, opportunity: &Opportunity) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        if state.failing_urls.contains(&opportunity.url) {
            return Err(StoreError::Persistence(format!(
                "injected insert failure for {}",
                opportunity.url
            )));
        }
        if state.by_url.contains_key(&opportunity.url) {
            return Err(StoreError::DuplicateKey {
                key: "opportunities_url_key".into(),
            });
        }
        if state.rows.contains_key(&opportunity.id) {
            return Err(StoreError::DuplicateKey {
                key: "opportunities_pkey".into(),
            });
        }

        let mut row = opportunity.clone();
        row.ingested_at = Some(Utc::now());
        state.by_url.insert(row.url.clone(), row.id);
        state.rows.insert(row.id, row);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.rows.get(&id).cloned())
    }

    async fn list_by_status(&self, status: Option<&str>) -> Result<Vec<Opportunity>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        let mut rows = state
            .rows
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect::<Vec<_>>();
        newest_first(&mut rows);
        Ok(rows)
    }

    async fn list_with_replies(&self) -> Result<Vec<Opportunity>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        let mut rows = state
            .rows
            .values()
            .filter(|o| o.reply_url.as_deref().is_some_and(|u| !u.is_empty()))
            .cloned()
            .collect::<Vec<_>>();
        newest_first(&mut rows);
        Ok(rows)
    }

    async fn apply_review(
        &self,
        id: Uuid,
        expected_status: &str,
        update: &ReviewUpdate,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        match state.rows.get_mut(&id) {
            Some(row) if row.status == expected_status => {
                row.apply_review_update(update);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load(&self) -> Result<ScanCursor, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        Ok(state.cursor.get_or_insert_with(ScanCursor::default).clone())
    }

    async fn save(&self, cursor: &ScanCursor) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        if state.fail_cursor_saves {
            return Err(StoreError::Persistence("injected cursor save failure".into()));
        }
        state.cursor = Some(cursor.clone());
        state.cursor_saves += 1;
        Ok(())
    }
}

const OPPORTUNITY_COLUMNS: &str = "id, url, item_type, intent, origin_channel, title, text_snippet, \
     author, score, num_comments, created_at_source, matched_keywords, companies_mentioned, \
     recommended_persona, suggested_resource, links_allowed, self_promo_allowed, channel_rules, \
     comment_suggestion, status, reply_url, reply_timestamp, feedback, scan_time, ingested_at";

#[derive(Debug, sqlx::FromRow)]
struct OpportunityRow {
    id: Uuid,
    url: String,
    item_type: Option<String>,
    intent: Option<String>,
    origin_channel: Option<String>,
    title: Option<String>,
    text_snippet: Option<String>,
    author: Option<String>,
    score: Option<i64>,
    num_comments: Option<i64>,
    created_at_source: Option<DateTime<Utc>>,
    matched_keywords: Option<Vec<String>>,
    companies_mentioned: Option<Vec<String>>,
    recommended_persona: Option<String>,
    suggested_resource: Option<String>,
    links_allowed: Option<bool>,
    self_promo_allowed: Option<bool>,
    channel_rules: Option<Vec<String>>,
    comment_suggestion: Option<String>,
    status: String,
    reply_url: Option<String>,
    reply_timestamp: Option<DateTime<Utc>>,
    feedback: Option<String>,
    scan_time: DateTime<Utc>,
    ingested_at: Option<DateTime<Utc>>,
}

impl TryFrom<OpportunityRow> for Opportunity {
    type Error = StoreError;

    fn try_from(row: OpportunityRow) -> Result<Self, Self::Error> {
        let kind = match row.item_type.as_deref() {
            Some(raw) => raw.parse::<ItemKind>().map_err(StoreError::Corrupt)?,
            None => ItemKind::Post,
        };
        let intent = match row.intent.as_deref() {
            Some(raw) => raw.parse::<Intent>().map_err(StoreError::Corrupt)?,
            None => Intent::Low,
        };
        Ok(Opportunity {
            id: row.id,
            url: row.url,
            kind,
            intent,
            origin_channel: row.origin_channel.unwrap_or_default(),
            title: row.title.unwrap_or_default(),
            text_snippet: row.text_snippet.unwrap_or_default(),
            author: row.author.unwrap_or_default(),
            score: row.score.unwrap_or_default(),
            num_comments: row.num_comments.unwrap_or_default(),
            created_at_source: row.created_at_source,
            matched_keywords: row.matched_keywords.unwrap_or_default(),
            companies_mentioned: row.companies_mentioned.unwrap_or_default(),
            recommended_persona: row.recommended_persona,
            suggested_resource: row.suggested_resource,
            links_allowed: row.links_allowed,
            self_promo_allowed: row.self_promo_allowed,
            channel_rules: row.channel_rules.unwrap_or_default(),
            comment_suggestion: row.comment_suggestion,
            status: row.status,
            reply_url: row.reply_url,
            reply_timestamp: row.reply_timestamp,
            feedback: row.feedback,
            scan_time: row.scan_time,
            ingested_at: row.ingested_at,
        })
    }
}

fn rows_to_opportunities(rows: Vec<OpportunityRow>) -> Result<Vec<Opportunity>, StoreError> {
    rows.into_iter().map(Opportunity::try_from).collect()
}

/// Split a cursor token into the `(next_index, next_token)` column pair.
fn cursor_columns(token: &CursorToken) -> Result<(i64, Option<&str>), StoreError> {
    match token {
        CursorToken::Index(i) => i64::try_from(*i)
            .map(|i| (i, None))
            .map_err(|_| StoreError::Corrupt(format!("cursor index {i} exceeds BIGINT"))),
        CursorToken::Token(t) => Ok((0, Some(t.as_str()))),
    }
}

fn cursor_from_columns(next_index: i64, next_token: Option<String>) -> Result<CursorToken, StoreError> {
    match next_token {
        Some(token) => Ok(CursorToken::Token(token)),
        None => u64::try_from(next_index)
            .map(CursorToken::Index)
            .map_err(|_| StoreError::Corrupt(format!("negative cursor index {next_index}"))),
    }
}

/// Postgres-backed store; `url` uniqueness comes from the `opportunities_url_key` constraint.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running lurk-storage migrations")
    }
}

#[async_trait]
impl OpportunityStore for PgStore {
    async fn url_exists(&self, url: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM opportunities WHERE url = $1)")
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_new(&self, o: &Opportunity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO opportunities (
                id, url, item_type, intent, origin_channel, title, text_snippet, author,
                score, num_comments, created_at_source, matched_keywords, companies_mentioned,
                recommended_persona, suggested_resource, links_allowed, self_promo_allowed,
                channel_rules, comment_suggestion, status, scan_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            "#,
        )
        .bind(o.id)
        .bind(&o.url)
        .bind(o.kind.as_str())
        .bind(o.intent.as_str())
        .bind(&o.origin_channel)
        .bind(&o.title)
        .bind(&o.text_snippet)
        .bind(&o.author)
        .bind(o.score)
        .bind(o.num_comments)
        .bind(o.created_at_source)
        .bind(o.matched_keywords.as_slice())
        .bind(o.companies_mentioned.as_slice())
        .bind(o.recommended_persona.as_deref())
        .bind(o.suggested_resource.as_deref())
        .bind(o.links_allowed)
        .bind(o.self_promo_allowed)
        .bind(o.channel_rules.as_slice())
        .bind(o.comment_suggestion.as_deref())
        .bind(&o.status)
        .bind(o.scan_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE id = $1");
        let row = sqlx::query_as::<_, OpportunityRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Opportunity::try_from).transpose()
    }

    async fn list_by_status(&self, status: Option<&str>) -> Result<Vec<Opportunity>, StoreError> {
        let sql = format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY scan_time DESC, id"
        );
        let rows = sqlx::query_as::<_, OpportunityRow>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        rows_to_opportunities(rows)
    }

    async fn list_with_replies(&self) -> Result<Vec<Opportunity>, StoreError> {
        let sql = format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities \
             WHERE reply_url IS NOT NULL AND reply_url <> '' \
             ORDER BY scan_time DESC, id"
        );
        let rows = sqlx::query_as::<_, OpportunityRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows_to_opportunities(rows)
    }

    async fn apply_review(
        &self,
        id: Uuid,
        expected_status: &str,
        update: &ReviewUpdate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE opportunities
               SET status = $3,
                   reply_url = COALESCE($4, reply_url),
                   reply_timestamp = COALESCE($5, reply_timestamp),
                   feedback = COALESCE($6, feedback)
             WHERE id = $1
               AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected_status)
        .bind(&update.status)
        .bind(update.reply_url.as_deref())
        .bind(update.reply_timestamp)
        .bind(update.feedback.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn load(&self) -> Result<ScanCursor, StoreError> {
        sqlx::query("INSERT INTO scan_state (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(SCAN_CURSOR_ROW_ID)
            .execute(&self.pool)
            .await?;

        let (next_index, next_token, last_scan_time, last_batch) = sqlx::query_as::<
            _,
            (i64, Option<String>, Option<DateTime<Utc>>, Option<Json<BatchSummary>>),
        >(
            "SELECT next_index, next_token, last_scan_time, last_batch FROM scan_state WHERE id = $1",
        )
        .bind(SCAN_CURSOR_ROW_ID)
        .fetch_one(&self.pool)
        .await?;

        Ok(ScanCursor {
            next_index: cursor_from_columns(next_index, next_token)?,
            last_scan_time,
            last_batch: last_batch.map(|Json(batch)| batch),
        })
    }

    async fn save(&self, cursor: &ScanCursor) -> Result<(), StoreError> {
        let (next_index, next_token) = cursor_columns(&cursor.next_index)?;
        sqlx::query(
            r#"
            INSERT INTO scan_state (id, next_index, next_token, last_scan_time, last_batch)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
               SET next_index = EXCLUDED.next_index,
                   next_token = EXCLUDED.next_token,
                   last_scan_time = EXCLUDED.last_scan_time,
                   last_batch = EXCLUDED.last_batch
            "#,
        )
        .bind(SCAN_CURSOR_ROW_ID)
        .bind(next_index)
        .bind(next_token)
        .bind(cursor.last_scan_time)
        .bind(cursor.last_batch.as_ref().map(Json))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Request budget refilled one token per `refill_every`.
#[derive(Debug, Clone, Copy)]
pub struct RequestBudgetConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

#[derive(Debug)]
struct RequestBudget {
    config: RequestBudgetConfig,
    state: Mutex<(u32, Instant)>,
}

impl RequestBudget {
    fn new(config: RequestBudgetConfig) -> Self {
        Self {
            config,
            state: Mutex::new((config.capacity, Instant::now())),
        }
    }

    /// Credit whole elapsed intervals. The clock advances by exactly those intervals so the
    /// partial one keeps counting; a full bucket restarts the clock at `now`.
    fn refill(&self, tokens: &mut u32, last_refill: &mut Instant, now: Instant) {
        let every = self.config.refill_every;
        if every.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(*last_refill);
        let refills = u32::try_from(elapsed.as_nanos() / every.as_nanos()).unwrap_or(u32::MAX);
        if refills == 0 {
            return;
        }
        *tokens = tokens.saturating_add(refills).min(self.config.capacity);
        if *tokens == self.config.capacity {
            *last_refill = now;
        } else {
            *last_refill += every * refills;
        }
    }

    async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let (tokens, last_refill) = &mut *state;
            self.refill(tokens, last_refill, Instant::now());
            if *tokens > 0 {
                *tokens -= 1;
                return;
            }
            drop(state);
            tokio::time::sleep(self.config.refill_every).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_lane_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub budget: Option<RequestBudgetConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            per_lane_concurrency: 2,
            backoff: BackoffPolicy::default(),
            // Unauthenticated Reddit JSON allows roughly one request per second.
            budget: Some(RequestBudgetConfig {
                capacity: 10,
                refill_every: Duration::from_secs(1),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding body of {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fetcher is shutting down")]
    Closed,
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Request { source, .. } => classify_reqwest_error(source),
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            Self::Decode { .. } | Self::Closed => RetryDisposition::NonRetryable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

/// GET client with global and per-lane concurrency caps, a request budget and retry backoff.
/// A lane is whatever the caller partitions traffic by (one channel, one API).
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_lane_limit: usize,
    lanes: Mutex<HashMap<String, Arc<Semaphore>>>,
    budget: Option<RequestBudget>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_lane_limit: config.per_lane_concurrency.max(1),
            lanes: Mutex::new(HashMap::new()),
            budget: config.budget.map(RequestBudget::new),
            backoff: config.backoff,
        })
    }

    async fn lane_semaphore(&self, lane: &str) -> Arc<Semaphore> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .entry(lane.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_lane_limit)))
            .clone()
    }

    pub async fn get(&self, lane: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let lane_limit = self.lane_semaphore(lane).await;
        let _lane = lane_limit.acquire().await.map_err(|_| FetchError::Closed)?;

        async {
            let mut attempt = 0;
            loop {
                if let Some(budget) = &self.budget {
                    budget.take().await;
                }
                let err = match self.get_once(url).await {
                    Ok(resp) => return Ok(resp),
                    Err(err) => err,
                };
                if err.disposition() == RetryDisposition::NonRetryable
                    || attempt >= self.backoff.max_retries
                {
                    return Err(err);
                }
                let delay = self.backoff.delay_for_attempt(attempt);
                debug!(attempt, ?delay, error = %err, "retrying request");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
        .instrument(info_span!("http_fetch", lane, url))
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, lane: &str, url: &str) -> Result<T, FetchError> {
        let resp = self.get(lane, url).await?;
        serde_json::from_slice(&resp.body).map_err(|source| FetchError::Decode {
            url: resp.final_url,
            source,
        })
    }

    async fn get_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(request_error)?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await.map_err(request_error)?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
