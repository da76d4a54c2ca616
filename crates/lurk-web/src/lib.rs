//! Axum JSON API for reviewing opportunities and driving scans.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use lurk_adapters::ScannerConfig;
use lurk_core::TransitionPayload;
use lurk_storage::StoreError;
use lurk_sync::{ReviewError, ReviewService, ScanError, ScanRunner, Services, SyncConfig};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lurk-web";

pub struct AppState {
    pub review: ReviewService,
    pub runner: Arc<ScanRunner>,
    pub scanner: Arc<ScannerConfig>,
}

impl From<Services> for AppState {
    fn from(services: Services) -> Self {
        Self {
            review: services.review,
            runner: services.runner,
            scanner: services.scanner,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct StatusQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusChange {
    status: String,
    #[serde(flatten)]
    payload: TransitionPayload,
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    reply_url: String,
}

#[derive(Debug, Deserialize)]
struct FeedbackBody {
    feedback: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/api/opportunities", get(list_handler))
        .route("/api/opportunities/{id}", get(detail_handler))
        .route("/api/opportunities/{id}/status", patch(status_handler))
        .route("/api/opportunities/{id}/reply", patch(reply_handler))
        .route("/api/opportunities/{id}/feedback", patch(feedback_handler))
        .route("/api/replies", get(replies_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/admin/skipped", get(skipped_handler))
        .route("/api/admin/config", get(config_handler))
        .route("/api/scan-state", get(scan_state_handler))
        .route("/api/scan", post(scan_handler))
        .route("/api/reset", post(reset_handler))
        .with_state(Arc::new(state))
}

/// Serve the API, running the cron scheduler alongside when it is enabled.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let stores = lurk_sync::open_stores(&config).await?;
    let services = lurk_sync::build_services(&config, &stores).await?;

    let scheduler = lurk_sync::maybe_build_scheduler(&config, services.runner.clone()).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %config.scan_cron, "scan scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "review api listening");
    axum::serve(listener, app(AppState::from(services))).await?;
    Ok(())
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::DuplicateKey { .. } => StatusCode::CONFLICT,
        StoreError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn review_error(err: ReviewError) -> Response {
    let status = match &err {
        ReviewError::NotFound(_) => StatusCode::NOT_FOUND,
        ReviewError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReviewError::Conflict { .. } => StatusCode::CONFLICT,
        ReviewError::Store(store) => store_status(store),
    };
    error_body(status, err.to_string())
}

fn scan_error(err: ScanError) -> Response {
    let status = match &err {
        ScanError::SourceFetch(_) => StatusCode::BAD_GATEWAY,
        ScanError::Persistence(store) => store_status(store),
        ScanError::CursorPersist { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ScanError::AlreadyRunning => StatusCode::CONFLICT,
    };
    if status != StatusCode::CONFLICT {
        warn!(error = %err, "scan request failed");
    }
    error_body(status, err.to_string())
}

fn reply<T: serde::Serialize>(result: Result<T, ReviewError>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => review_error(err),
    }
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok", "service": "lurk" })).into_response()
}

async fn list_handler(State(state): State<Arc<AppState>>, Query(query): Query<StatusQuery>) -> Response {
    let status = query.status.as_deref().filter(|s| !s.is_empty());
    reply(state.review.list_by_status(status).await)
}

async fn detail_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    reply(state.review.get(id).await)
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusChange>,
) -> Response {
    reply(state.review.transition(id, &body.status, body.payload).await)
}

async fn reply_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReplyBody>,
) -> Response {
    reply(state.review.save_reply(id, &body.reply_url).await)
}

async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<FeedbackBody>,
) -> Response {
    reply(state.review.save_feedback(id, &body.feedback).await)
}

async fn replies_handler(State(state): State<Arc<AppState>>) -> Response {
    reply(state.review.tracked_replies().await)
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    reply(state.review.stats().await)
}

async fn skipped_handler(State(state): State<Arc<AppState>>) -> Response {
    reply(state.review.skipped_with_feedback().await)
}

async fn config_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "config": state.scanner.as_ref(),
        "summary": state.scanner.summary(),
    }))
    .into_response()
}

async fn scan_state_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.runner.cursor().await {
        Ok(cursor) => Json(cursor).into_response(),
        Err(err) => scan_error(err),
    }
}

async fn scan_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.runner.try_run_cycle().await {
        Ok(report) => Json(report).into_response(),
        Err(err) => scan_error(err),
    }
}

async fn reset_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.runner.reset_cursor().await {
        Ok(cursor) => Json(cursor).into_response(),
        Err(err) => scan_error(err),
    }
}
