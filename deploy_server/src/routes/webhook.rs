//! Inbound provider webhook: verify, classify, hand off to the dispatcher.
//!
//! Nothing here waits on a deployment: the response goes out as soon as the
//! trigger is queued.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Serialize;

use crate::models::deployment::{DispatchOutcome, NewDeploymentEvent};
use crate::models::webhook::{GitProvider, WebhookEndpoint};
use crate::routes::AppState;
use crate::services::classifier::{self, Classification, IgnoreReason, PushDetails};
use crate::services::deploy_runner::DeployTrigger;
use crate::services::dispatcher::Submission;
use crate::services::signature::{self, Verification};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coalesced: Option<bool>,
}

impl WebhookResponse {
    fn error(reason: impl Into<String>) -> Self {
        Self {
            status: "error",
            reason: Some(reason.into()),
            coalesced: None,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// GitHub signs with HMAC. GitLab sends a shared token, but an HMAC header is
/// honoured when present.
fn verify(endpoint: &WebhookEndpoint, headers: &HeaderMap, body: &[u8]) -> Verification {
    let secret = &endpoint.secret_token;
    match endpoint.provider() {
        GitProvider::Github => signature::verify_signature(body, header(headers, SIGNATURE_HEADER), secret),
        GitProvider::Gitlab => match header(headers, SIGNATURE_HEADER) {
            Some(sig) => signature::verify_signature(body, Some(sig), secret),
            None => signature::verify_token(header(headers, GITLAB_TOKEN_HEADER), secret),
        },
    }
}

/// Handle one delivery to `/webhook/{id}/{token}`.
pub async fn handle_webhook(
    state: &AppState,
    webhook_id: i64,
    path_token: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> (StatusCode, WebhookResponse) {
    let received_at = Utc::now();

    let endpoint = match state.webhooks.get(webhook_id).await {
        Ok(Some(endpoint)) => endpoint,
        Ok(None) => {
            crate::metrics::webhook_rejected("unknown_endpoint");
            return (StatusCode::NOT_FOUND, WebhookResponse::error("not found"));
        }
        Err(e) => {
            tracing::error!(webhook_id, "Webhook lookup failed: {e}");
            crate::metrics::error_recorded("store");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                WebhookResponse::error("internal error"),
            );
        }
    };

    // Unknown id and wrong path token are indistinguishable to the caller.
    if !signature::verify_token(Some(path_token), &endpoint.secret_token).is_verified() {
        crate::metrics::webhook_rejected("unknown_endpoint");
        return (StatusCode::NOT_FOUND, WebhookResponse::error("not found"));
    }

    let verification = verify(&endpoint, headers, &body);
    if !verification.is_verified() {
        tracing::warn!(
            webhook_id,
            verification = verification.outcome(),
            "Webhook signature validation failed"
        );
        crate::metrics::webhook_rejected(verification.outcome());
        return (StatusCode::FORBIDDEN, WebhookResponse::error("invalid signature"));
    }

    let provider = endpoint.provider();
    let event_type = header(headers, provider.event_header())
        .unwrap_or("unknown")
        .to_string();
    crate::metrics::webhook_received(&event_type);

    let actionable = endpoint.is_active && classifier::is_push_event(provider, &event_type);
    let details = match classifier::decode_payload(header(headers, "content-type"), &body) {
        Ok(payload) => PushDetails::from_payload(&payload),
        Err(e) if actionable => {
            tracing::warn!(webhook_id, event = %event_type, "Malformed webhook payload: {e}");
            crate::metrics::webhook_rejected("malformed_payload");
            return (StatusCode::BAD_REQUEST, WebhookResponse::error("malformed payload"));
        }
        // Ignored either way; the body only adds detail to the event row.
        Err(_) => PushDetails::default(),
    };

    let classification = if endpoint.is_active {
        classifier::classify(
            provider,
            &event_type,
            endpoint.branch_filter(),
            details.branch.as_deref(),
        )
    } else {
        Classification::Ignore(IgnoreReason::EndpointInactive)
    };

    match classification {
        Classification::Ignore(reason) => {
            tracing::info!(
                webhook_id,
                event = %event_type,
                branch = ?details.branch,
                %reason,
                "Webhook ignored"
            );
            let event = NewDeploymentEvent {
                webhook_id,
                event_type,
                branch: details.branch,
                branch_matched: reason != IgnoreReason::BranchMismatch,
                commit_sha: details.commit_sha,
                verification: verification.outcome().to_string(),
                outcome: DispatchOutcome::Ignored.as_str().to_string(),
                reason: Some(reason.to_string()),
                output: None,
                error: None,
                duration_ms: None,
                received_at,
                recorded_at: Utc::now(),
            };
            if let Err(e) = state.webhooks.append_event(event).await {
                tracing::error!(webhook_id, "Failed to record ignored delivery: {e}");
                crate::metrics::error_recorded("store");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    WebhookResponse::error("internal error"),
                );
            }
            crate::metrics::deployment_outcome(DispatchOutcome::Ignored.as_str());
            (
                StatusCode::OK,
                WebhookResponse {
                    status: "ignored",
                    reason: Some(reason.to_string()),
                    coalesced: None,
                },
            )
        }
        Classification::Proceed => {
            let trigger = DeployTrigger {
                event_type,
                branch: details.branch,
                commit_sha: details.commit_sha,
                pusher: details.pusher,
                received_at,
            };
            tracing::info!(
                webhook_id,
                branch = ?trigger.branch,
                commit = ?trigger.commit_sha,
                "Deployment accepted"
            );
            let submission = state.dispatcher.submit(&endpoint, trigger).await;
            (
                StatusCode::ACCEPTED,
                WebhookResponse {
                    status: "accepted",
                    reason: None,
                    coalesced: Some(submission == Submission::Coalesced),
                },
            )
        }
    }
}
