//! webhooks — Configured deployment targets that accept signed provider callbacks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::webhooks;

/// Git hosting provider that sends the callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    Github,
    Gitlab,
}

impl GitProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }

    /// Header carrying the provider's event type tag.
    pub fn event_header(self) -> &'static str {
        match self {
            Self::Github => "x-github-event",
            Self::Gitlab => "x-gitlab-event",
        }
    }
}

impl fmt::Display for GitProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            other => Err(format!("unsupported git provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = webhooks)]
pub struct WebhookEndpoint {
    pub id: i64,
    pub name: String,
    pub domain: Option<String>,
    pub git_provider: String,
    pub repository_url: String,
    pub branch: Option<String>,
    pub local_path: String,
    pub deploy_user: Option<String>,
    #[serde(skip_serializing)]
    pub secret_token: String,
    pub pre_deploy_script: Option<String>,
    pub post_deploy_script: Option<String>,
    pub ssh_key_path: Option<String>,
    pub is_active: bool,
    pub last_deployed_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    pub create_date: DateTime<Utc>,
    pub write_date: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Provider tag; rows written before validation existed fall back to GitHub.
    pub fn provider(&self) -> GitProvider {
        self.git_provider.parse().unwrap_or(GitProvider::Github)
    }

    /// Configured branch filter, treating an empty string as "any branch".
    pub fn branch_filter(&self) -> Option<&str> {
        self.branch.as_deref().filter(|b| !b.is_empty())
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhooks)]
pub struct NewWebhookEndpoint {
    pub name: String,
    pub domain: Option<String>,
    pub git_provider: String,
    pub repository_url: String,
    pub branch: Option<String>,
    pub local_path: String,
    pub deploy_user: Option<String>,
    pub secret_token: String,
    pub pre_deploy_script: Option<String>,
    pub post_deploy_script: Option<String>,
    pub ssh_key_path: Option<String>,
    pub is_active: bool,
}
