//! REST surface for scheduled tasks.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use opsagent_cron::Scheduler;

use crate::service::{DEFAULT_PAGE_LIMIT, ServiceError, TaskDraft, TaskPatch, TaskService};

/// Upcoming fire instants returned by cron validation unless asked otherwise.
const DEFAULT_PREVIEW_COUNT: usize = 5;
const MAX_PREVIEW_COUNT: usize = 50;

/// Shared HTTP state.
pub struct AppState {
    pub service: Arc<TaskService>,
    pub auth_token: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidCronExpression { .. }
            | ServiceError::AgentNotFound(_)
            | ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::AlreadyRunning(_) => StatusCode::CONFLICT,
            ServiceError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::AgentBackend(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ServiceError>;

/// Build the router. `/health` is always open; `/api/*` requires the bearer
/// token when one is configured.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/scheduled-tasks", get(list_tasks).post(create_task))
        .route(
            "/scheduled-tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/scheduled-tasks/{id}/enable", post(enable_task))
        .route("/scheduled-tasks/{id}/disable", post(disable_task))
        .route("/scheduled-tasks/{id}/trigger", post(trigger_task))
        .route("/scheduled-tasks/{id}/executions", get(list_executions))
        .route(
            "/scheduled-tasks/{id}/executions/{execution_id}",
            get(get_execution),
        )
        .route("/scheduler/jobs", get(list_jobs))
        .route("/cron/validate", post(validate_cron))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .with_state(state)
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn require_auth(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected_token) = &state.auth_token {
        match extract_bearer_token(&headers) {
            Some(token) if token == expected_token => {}
            _ => {
                tracing::warn!(path = %request.uri().path(), "API authentication failed");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }
    Ok(next.run(request).await)
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let tasks = state.service.list_tasks().await?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<TaskDraft>,
) -> ApiResult<impl IntoResponse> {
    let task = state.service.create_task(draft).await?;
    Ok(Json(json!({ "task": task })))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.get_task(&id).await?))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<impl IntoResponse> {
    let task = state.service.update_task(&id, patch).await?;
    Ok(Json(json!({ "task": task })))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.service.delete_task(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn enable_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state.service.enable_task(&id).await?;
    Ok(Json(json!({ "task": task })))
}

async fn disable_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state.service.disable_task(&id).await?;
    Ok(Json(json!({ "task": task })))
}

async fn trigger_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let execution = state.service.trigger_task(&id).await?;
    Ok(Json(json!({ "execution": execution })))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .service
        .list_executions(
            &id,
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(json!({
        "executions": page.items,
        "total": page.total,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path((id, execution_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.get_execution(&id, &execution_id).await?))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "jobs": state.service.jobs().await }))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    expression: String,
    count: Option<usize>,
}

async fn validate_cron(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> impl IntoResponse {
    match Scheduler::validate_cron(&req.expression) {
        Ok(expr) => {
            let count = req
                .count
                .unwrap_or(DEFAULT_PREVIEW_COUNT)
                .min(MAX_PREVIEW_COUNT);
            let scheduler = state.service.scheduler();
            let upcoming: Vec<_> = expr.clone()
                .with_zone(scheduler.zone())
                .upcoming(scheduler.now())
                .take(count)
                .collect();
            Json(json!({
                "valid": true,
                "expression": expr.as_str(),
                "upcoming": upcoming,
            }))
        }
        Err(e) => Json(json!({
            "valid": false,
            "error": e.to_string(),
            "upcoming": [],
        })),
    }
}
