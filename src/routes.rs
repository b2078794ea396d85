//! HTTP adapter for the session poll surface and batch controls.

use crate::batch::BatchError;
use crate::config::AppConfig;
use crate::desk::{DeskError, LoadedProduct, ScrapeRequest};
use crate::metrics;
use crate::models::{ApiError, BatchView, Job, LogEntry, PendingPrompt, Product};
use crate::security::{AuthContext, AuthState, require_api_auth};
use crate::session::{Session, SessionRegistry};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<AppConfig>,
    pub prometheus_handle: PrometheusHandle,
}

impl AppState {
    async fn session(&self, context: &AuthContext) -> Arc<Session> {
        self.registry.get_or_create(&context.session).await
    }
}

pub fn router(state: AppState, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let body_limit = state.config.request_max_bytes;

    let protected = Router::new()
        .route("/state", get(get_state))
        .route("/logs", get(get_logs))
        .route("/log", post(append_log))
        .route("/prompts", get(get_prompt))
        .route("/prompts/{id}", post(respond_prompt))
        .route("/open-urls", get(drain_open_urls))
        .route("/updates", get(wait_for_update))
        .route("/scrape", post(single_scrape))
        .route("/list", post(single_list))
        .route("/load-json", post(single_load))
        .nest(
            "/bulk",
            Router::new()
                .route("/preview", post(bulk_preview))
                .route("/process", post(bulk_process))
                .route("/pause", post(bulk_pause))
                .route("/cancel", post(bulk_cancel)),
        )
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug)]
pub enum AppError {
    Batch(BatchError),
    Desk(DeskError),
    BadRequest(&'static str, String),
}

impl From<BatchError> for AppError {
    fn from(value: BatchError) -> Self {
        Self::Batch(value)
    }
}

impl From<DeskError> for AppError {
    fn from(value: DeskError) -> Self {
        Self::Desk(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::Batch(err) => {
                let (status, code) = match err {
                    BatchError::AlreadyRunning => (StatusCode::CONFLICT, "already_running"),
                    BatchError::NotRunning => (StatusCode::CONFLICT, "not_running"),
                    BatchError::EmptyInput => (StatusCode::BAD_REQUEST, "empty_input"),
                    BatchError::NoJobs => (StatusCode::BAD_REQUEST, "no_items"),
                    BatchError::Busy => (StatusCode::CONFLICT, "busy"),
                };
                (status, code, err.to_string())
            }
            AppError::Desk(err) => {
                let (status, code) = match err {
                    DeskError::Busy => (StatusCode::CONFLICT, "busy"),
                    DeskError::MissingUrl => (StatusCode::BAD_REQUEST, "missing_url"),
                    DeskError::NoProduct => (StatusCode::BAD_REQUEST, "no_product"),
                };
                (status, code, err.to_string())
            }
            AppError::BadRequest(code, detail) => (StatusCode::BAD_REQUEST, code, detail),
        };
        let payload = ApiError {
            error: error.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

/// Liveness check, no auth.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "relist-api-rs",
        "sessions": state.registry.len().await,
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.config.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret.as_str() {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

async fn get_state(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Json<BatchView> {
    metrics::inc_requests("/state");
    let session = state.session(&context).await;
    Json(session.controller.snapshot().await)
}

#[derive(Debug, Deserialize)]
struct SinceQuery {
    #[serde(default)]
    since: Option<i64>,
}

impl SinceQuery {
    fn since(&self) -> Result<u64, AppError> {
        match self.since {
            None => Ok(0),
            Some(value) if value >= 0 => Ok(value as u64),
            Some(value) => Err(AppError::BadRequest(
                "invalid_since",
                format!("since must be >= 0, got {value}"),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    entries: Vec<LogEntry>,
    last_id: u64,
}

async fn get_logs(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<LogsResponse>, AppError> {
    let since = query.since()?;
    let session = state.session(&context).await;
    let (entries, last_id) = session.prompts.logs_since(since).await;
    Ok(Json(LogsResponse { entries, last_id }))
}

#[derive(Debug, Deserialize)]
struct AppendLogRequest {
    #[serde(default)]
    message: String,
}

async fn append_log(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<AppendLogRequest>,
) -> Json<serde_json::Value> {
    let session = state.session(&context).await;
    let written = session.append_log(&payload.message).await;
    Json(json!({ "ok": written }))
}

#[derive(Debug, Serialize)]
struct PromptResponse {
    prompt: Option<PendingPrompt>,
}

async fn get_prompt(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Json<PromptResponse> {
    let session = state.session(&context).await;
    Json(PromptResponse {
        prompt: session.prompts.pending().await,
    })
}

#[derive(Debug, Deserialize)]
struct PromptAnswer {
    #[serde(default)]
    value: Option<serde_json::Value>,
}

async fn respond_prompt(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<u64>,
    Json(answer): Json<PromptAnswer>,
) -> Json<serde_json::Value> {
    let value = match answer.value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    };
    let session = state.session(&context).await;
    let ok = session.prompts.respond(id, value).await;
    Json(json!({ "ok": ok }))
}

async fn drain_open_urls(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Json<serde_json::Value> {
    let session = state.session(&context).await;
    Json(json!({ "urls": session.prompts.drain_open_urls().await }))
}

async fn wait_for_update(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let since = query.since()?;
    let session = state.session(&context).await;
    let update_id = session
        .updates
        .wait_past(since, state.config.update_wait())
        .await;
    Ok(Json(json!({ "update_id": update_id })))
}

#[derive(Debug, Deserialize)]
struct ScrapeForm {
    #[serde(default)]
    url: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    quantity: Option<serde_json::Value>,
    #[serde(default)]
    custom_specs: String,
}

impl ScrapeForm {
    /// Forms send the quantity as a number or as typed text; anything
    /// unreadable falls back to the default.
    fn quantity(&self) -> Option<u32> {
        match &self.quantity {
            Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(serde_json::Value::String(text)) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

async fn single_scrape(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(form): Json<ScrapeForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("/scrape");
    let session = state.session(&context).await;
    let quantity = form.quantity();
    session
        .desk
        .scrape(ScrapeRequest {
            url: form.url,
            note: form.note,
            quantity,
            custom_specifics: form.custom_specs,
        })
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn single_list(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("/list");
    let session = state.session(&context).await;
    session.desk.list().await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct LoadQuery {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoadResponse {
    ok: bool,
    #[serde(flatten)]
    product: LoadedProduct,
}

async fn single_load(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Query(query): Query<LoadQuery>,
    Json(product): Json<Product>,
) -> Result<Json<LoadResponse>, AppError> {
    metrics::inc_requests("/load-json");
    let source = query
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "uploaded JSON".to_string());
    let session = state.session(&context).await;
    let product = session.desk.load(product, &source).await?;
    Ok(Json(LoadResponse { ok: true, product }))
}

#[derive(Debug, Deserialize)]
struct BulkTextRequest {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    ok: bool,
    items: Vec<Job>,
}

async fn bulk_preview(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<BulkTextRequest>,
) -> Json<PreviewResponse> {
    metrics::inc_requests("/bulk/preview");
    let session = state.session(&context).await;
    let items = session.controller.preview(&payload.text).await;
    Json(PreviewResponse { ok: true, items })
}

async fn bulk_process(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<BulkTextRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("/bulk/process");
    let session = state.session(&context).await;
    let total = session
        .controller
        .start(&payload.text)
        .await
        .inspect_err(|err| {
            warn!(target: "relist.api", session = %context.session, error = %err, "bulk_start_rejected")
        })?;
    info!(
        target: "relist.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        session = %context.session,
        total,
        "bulk processing accepted"
    );
    Ok(Json(json!({ "ok": true, "total": total })))
}

async fn bulk_pause(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("/bulk/pause");
    let session = state.session(&context).await;
    let paused = session.controller.pause_or_resume().await?;
    Ok(Json(json!({ "ok": true, "paused": paused })))
}

async fn bulk_cancel(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("/bulk/cancel");
    let session = state.session(&context).await;
    session.controller.cancel().await?;
    Ok(Json(json!({ "ok": true })))
}
