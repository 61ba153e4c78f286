//! Decides whether a verified delivery should trigger a deployment.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::PayloadError;
use crate::models::webhook::GitProvider;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Why a verified delivery was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EventNotActionable,
    BranchMismatch,
    EndpointInactive,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EventNotActionable => "event type not actionable",
            Self::BranchMismatch => "branch mismatch",
            Self::EndpointInactive => "endpoint inactive",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Proceed,
    Ignore(IgnoreReason),
}

/// Push-class event tags per provider.
pub fn is_push_event(provider: GitProvider, event_type: &str) -> bool {
    match provider {
        GitProvider::Github => event_type == "push",
        GitProvider::Gitlab => event_type == "Push Hook" || event_type == "push",
    }
}

/// Classify a verified delivery.
///
/// A configured branch filter must match the payload branch exactly. Pushes
/// without a branch (tags) never match a filter.
pub fn classify(
    provider: GitProvider,
    event_type: &str,
    branch_filter: Option<&str>,
    payload_branch: Option<&str>,
) -> Classification {
    if !is_push_event(provider, event_type) {
        return Classification::Ignore(IgnoreReason::EventNotActionable);
    }

    match branch_filter.filter(|b| !b.is_empty()) {
        Some(wanted) if payload_branch != Some(wanted) => {
            Classification::Ignore(IgnoreReason::BranchMismatch)
        }
        _ => Classification::Proceed,
    }
}

#[derive(Deserialize)]
struct FormDelivery {
    payload: String,
}

/// Decode a delivery body. Form-encoded deliveries carry the JSON document
/// in their `payload` field.
pub fn decode_payload(content_type: Option<&str>, body: &[u8]) -> Result<Value, PayloadError> {
    let is_form = content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE));

    if is_form {
        let form: FormDelivery = serde_urlencoded::from_bytes(body)?;
        Ok(serde_json::from_str(&form.payload)?)
    } else {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Fields pulled out of a push payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushDetails {
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub pusher: Option<String>,
}

impl PushDetails {
    /// Extract branch, head commit and pusher from a GitHub or GitLab payload.
    pub fn from_payload(payload: &Value) -> Self {
        let branch = payload["ref"]
            .as_str()
            .and_then(|r| r.strip_prefix("refs/heads/"))
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        let commit_sha = payload["after"]
            .as_str()
            .or_else(|| payload["checkout_sha"].as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let pusher = payload["pusher"]["name"]
            .as_str()
            .or_else(|| payload["user_username"].as_str())
            .map(str::to_string);

        Self {
            branch,
            commit_sha,
            pusher,
        }
    }
}
