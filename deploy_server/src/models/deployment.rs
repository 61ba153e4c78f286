//! deployment_events — One immutable record per verified webhook delivery.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deployment_events;

/// What happened to a delivery after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Ignored,
    Dispatched,
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Dispatched => "dispatched",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deployment_events)]
pub struct DeploymentEvent {
    pub id: i64,
    pub webhook_id: i64,
    pub event_type: String,
    pub branch: Option<String>,
    pub branch_matched: bool,
    pub commit_sha: Option<String>,
    pub verification: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i32>,
    pub received_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = deployment_events)]
pub struct NewDeploymentEvent {
    pub webhook_id: i64,
    pub event_type: String,
    pub branch: Option<String>,
    pub branch_matched: bool,
    pub commit_sha: Option<String>,
    pub verification: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i32>,
    pub received_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}
