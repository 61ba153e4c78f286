//! REST API for webhook endpoints, their deployment history and server health.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::deployment::DeploymentEvent;
use crate::models::webhook::WebhookEndpoint;
use crate::services::webhook_service::{self, CreateWebhookError, CreateWebhookRequest};
use crate::services::webhook_store::WebhookRepository;

/// Upper bound for `?limit=` on deployment history.
const MAX_HISTORY_LIMIT: i64 = 200;

/// Error body for rejected API calls.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, axum::Json<ApiError>)>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, axum::Json<ApiError>) {
    (
        status,
        axum::Json(ApiError {
            error: message.into(),
        }),
    )
}

fn store_error(e: StoreError) -> (StatusCode, axum::Json<ApiError>) {
    match e {
        StoreError::NotFound(id) => api_error(StatusCode::NOT_FOUND, format!("webhook {id} not found")),
        other => {
            tracing::error!("Store error: {other}");
            crate::metrics::error_recorded("store");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// A freshly created endpoint. The only response that carries the secret.
#[derive(Debug, Serialize)]
pub struct CreatedWebhook {
    #[serde(flatten)]
    pub endpoint: WebhookEndpoint,
    pub secret_token: String,
    pub webhook_path: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    pub hours: Option<i64>,
}

pub async fn list_webhooks(repo: &dyn WebhookRepository) -> ApiResult<Vec<WebhookEndpoint>> {
    repo.list().await.map_err(store_error)
}

pub async fn create_webhook(
    repo: &dyn WebhookRepository,
    request: CreateWebhookRequest,
) -> ApiResult<CreatedWebhook> {
    match webhook_service::create_endpoint(repo, request).await {
        Ok(endpoint) => Ok(CreatedWebhook {
            webhook_path: format!("/webhook/{}/{}", endpoint.id, endpoint.secret_token),
            secret_token: endpoint.secret_token.clone(),
            endpoint,
        }),
        Err(CreateWebhookError::Invalid(e)) => {
            Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(CreateWebhookError::Store(e)) => Err(store_error(e)),
    }
}

pub async fn toggle_webhook(repo: &dyn WebhookRepository, id: i64) -> ApiResult<WebhookEndpoint> {
    webhook_service::toggle_active(repo, id)
        .await
        .map_err(store_error)
}

/// Delete an endpoint and its deployment history.
pub async fn delete_webhook(repo: &dyn WebhookRepository, id: i64) -> ApiResult<()> {
    repo.delete(id).await.map_err(store_error)
}

pub async fn deployment_history(
    repo: &dyn WebhookRepository,
    id: i64,
    limit: i64,
) -> ApiResult<Vec<DeploymentEvent>> {
    if repo.get(id).await.map_err(store_error)?.is_none() {
        return Err(store_error(StoreError::NotFound(id)));
    }
    repo.recent_events(id, limit.clamp(1, MAX_HISTORY_LIMIT))
        .await
        .map_err(store_error)
}
