//! HTTP routes — provider webhooks and the dashboard API.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::config::DeployConfig;
use crate::dashboard::health::{self, ServerHealth};
use crate::models::deployment::DeploymentEvent;
use crate::models::webhook::WebhookEndpoint;
use crate::services::dispatcher::DeploymentDispatcher;
use crate::services::metrics_store::MetricsStore;
use crate::services::scheduler::{SchedulerState, TaskStatus};
use crate::services::webhook_service::CreateWebhookRequest;
use crate::services::webhook_store::WebhookRepository;

use self::api::{ApiResult, CreatedWebhook, HealthQuery, HistoryQuery};

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub webhooks: Arc<dyn WebhookRepository>,
    pub metrics: Arc<dyn MetricsStore>,
    pub dispatcher: DeploymentDispatcher,
    pub scheduler: Arc<SchedulerState>,
    pub config: Arc<DeployConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Webhook
        .route("/webhook/{id}/{token}", post(webhook_handler))
        // Webhook API
        .route("/api/webhooks", get(list_webhooks).post(create_webhook))
        .route("/api/webhooks/{id}", delete(delete_webhook))
        .route("/api/webhooks/{id}/toggle", post(toggle_webhook))
        .route("/api/webhooks/{id}/deployments", get(deployment_history))
        // Health API
        .route("/api/health", get(server_health))
        .route("/api/scheduler", get(scheduler_status))
        .with_state(state)
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<AppState>,
    Path((id, token)): Path<(i64, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<webhook::WebhookResponse>) {
    let (status, response) = webhook::handle_webhook(&state, id, &token, &headers, body).await;
    (status, Json(response))
}

// ── Webhook API ──

async fn list_webhooks(State(state): State<AppState>) -> ApiResult<Json<Vec<WebhookEndpoint>>> {
    api::list_webhooks(state.webhooks.as_ref()).await.map(Json)
}

async fn create_webhook(
    State(state): State<AppState>,
    Json(req): Json<CreateWebhookRequest>,
) -> ApiResult<(StatusCode, Json<CreatedWebhook>)> {
    api::create_webhook(state.webhooks.as_ref(), req)
        .await
        .map(|created| (StatusCode::CREATED, Json(created)))
}

async fn toggle_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WebhookEndpoint>> {
    api::toggle_webhook(state.webhooks.as_ref(), id).await.map(Json)
}

async fn delete_webhook(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    api::delete_webhook(state.webhooks.as_ref(), id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
}

async fn deployment_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<DeploymentEvent>>> {
    let limit = query.limit.unwrap_or(state.config.deploy_history_limit);
    api::deployment_history(state.webhooks.as_ref(), id, limit)
        .await
        .map(Json)
}

// ── Health API ──

async fn server_health(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> Result<Json<ServerHealth>, StatusCode> {
    let hours = query.hours.unwrap_or(state.config.monitoring_chart_hours);
    health::query_server_health(
        state.metrics.as_ref(),
        hours,
        state.config.monitoring_interval_minutes,
    )
    .await
    .map(Json)
    .map_err(|e| {
        tracing::error!("Health query error: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn scheduler_status(State(state): State<AppState>) -> Json<Vec<TaskStatus>> {
    Json(state.scheduler.snapshot())
}
