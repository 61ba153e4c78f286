//! Endpoint registration and activation.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{StoreError, ValidationError};
use crate::models::webhook::{GitProvider, NewWebhookEndpoint, WebhookEndpoint};
use crate::services::webhook_store::WebhookRepository;

static DEPLOY_USER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]*$").unwrap());

/// Unix account names accepted for `deploy_user`.
pub fn is_valid_deploy_user(user: &str) -> bool {
    user.len() <= 255 && DEPLOY_USER_REGEX.is_match(user)
}

/// 64 random hex characters.
pub fn generate_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebhookRequest {
    pub name: String,
    pub domain: Option<String>,
    pub git_provider: String,
    pub repository_url: String,
    pub branch: Option<String>,
    pub local_path: String,
    pub deploy_user: Option<String>,
    pub pre_deploy_script: Option<String>,
    pub post_deploy_script: Option<String>,
    pub ssh_key_path: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateWebhookError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(field: &'static str, value: &str, max_len: usize) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::field(field, "is required"));
    }
    if value.len() > max_len {
        return Err(ValidationError::field(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(value.to_string())
}

/// Validate a create request into an insertable row with a fresh secret.
pub fn validate(request: CreateWebhookRequest) -> Result<NewWebhookEndpoint, ValidationError> {
    let name = required("name", &request.name, 255)?;
    let repository_url = required("repository_url", &request.repository_url, 512)?;
    let local_path = required("local_path", &request.local_path, 500)?;
    let git_provider: GitProvider = request
        .git_provider
        .trim()
        .parse()
        .map_err(|e: String| ValidationError::field("git_provider", e))?;

    let deploy_user = non_blank(request.deploy_user);
    if let Some(user) = &deploy_user {
        if !is_valid_deploy_user(user) {
            return Err(ValidationError::field(
                "deploy_user",
                "must be a lowercase unix account name",
            ));
        }
    }

    let branch = non_blank(request.branch);
    if branch.as_ref().is_some_and(|b| b.len() > 255) {
        return Err(ValidationError::field(
            "branch",
            "must be at most 255 characters",
        ));
    }

    Ok(NewWebhookEndpoint {
        name,
        domain: non_blank(request.domain),
        git_provider: git_provider.as_str().to_string(),
        repository_url,
        branch,
        local_path,
        deploy_user,
        secret_token: generate_secret(),
        pre_deploy_script: non_blank(request.pre_deploy_script),
        post_deploy_script: non_blank(request.post_deploy_script),
        ssh_key_path: non_blank(request.ssh_key_path),
        is_active: request.is_active,
    })
}

/// Validate and persist a new endpoint. The returned row is the only place
/// the generated secret is ever handed out.
pub async fn create_endpoint(
    repo: &dyn WebhookRepository,
    request: CreateWebhookRequest,
) -> Result<WebhookEndpoint, CreateWebhookError> {
    let new_endpoint = validate(request)?;
    Ok(repo.create(new_endpoint).await?)
}

/// Flip the active flag; returns the updated endpoint.
pub async fn toggle_active(
    repo: &dyn WebhookRepository,
    id: i64,
) -> Result<WebhookEndpoint, StoreError> {
    let endpoint = repo.toggle_active(id).await?;

    let status = if endpoint.is_active {
        "activated"
    } else {
        "deactivated"
    };
    tracing::info!(webhook_id = id, "Webhook {status}");
    Ok(endpoint)
}
