//! Shared fixtures for unit tests.

use std::path::Path;

use tempfile::TempDir;

use crate::models::webhook::NewWebhookEndpoint;

/// Fresh, empty directory, removed when the guard drops.
pub fn temp_dir(label: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("deployhook-{label}-"))
        .tempdir()
        .unwrap()
}

/// Active GitHub endpoint deploying `main` into `local_path`.
pub fn new_endpoint(local_path: &Path) -> NewWebhookEndpoint {
    NewWebhookEndpoint {
        name: "acme-site".into(),
        domain: Some("acme.example".into()),
        git_provider: "github".into(),
        repository_url: "git@github.com:acme/site.git".into(),
        branch: Some("main".into()),
        local_path: local_path.display().to_string(),
        deploy_user: None,
        secret_token: "0123456789abcdef".repeat(4),
        pre_deploy_script: None,
        post_deploy_script: None,
        ssh_key_path: None,
        is_active: true,
    }
}
