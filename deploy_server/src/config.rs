//! Server configuration, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Update step run between the pre- and post-deploy scripts.
pub const DEFAULT_UPDATE_COMMAND: &str = r#"git pull --ff-only origin "$DEPLOY_BRANCH""#;

#[derive(Clone, Debug)]
pub struct DeployConfig {
    /// Whether the system-monitor task is registered at all.
    pub monitoring_enabled: bool,
    /// Minutes between metric samples.
    pub monitoring_interval_minutes: u64,
    /// Hours a metric sample is kept before pruning.
    pub monitoring_retention_hours: i64,
    /// Default dashboard chart window in hours.
    pub monitoring_chart_hours: i64,
    /// Filesystem whose usage is reported.
    pub monitoring_disk_path: PathBuf,
    /// procfs mount point.
    pub monitoring_proc_root: PathBuf,
    /// Window between the two `/proc/stat` reads used for CPU usage.
    pub monitoring_cpu_window: Duration,
    /// Maximum deployments executing at once across all endpoints.
    pub max_concurrent_deploys: usize,
    /// Per-step timeout for deploy scripts.
    pub deploy_step_timeout: Duration,
    /// Shell command that updates the checkout.
    pub deploy_update_command: String,
    /// Default number of deployment events listed per endpoint.
    pub deploy_history_limit: i64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            monitoring_enabled: true,
            monitoring_interval_minutes: 2,
            monitoring_retention_hours: 24,
            monitoring_chart_hours: 6,
            monitoring_disk_path: PathBuf::from("/"),
            monitoring_proc_root: PathBuf::from("/proc"),
            monitoring_cpu_window: Duration::from_millis(500),
            max_concurrent_deploys: 4,
            deploy_step_timeout: Duration::from_secs(600),
            deploy_update_command: DEFAULT_UPDATE_COMMAND.to_string(),
            deploy_history_limit: 20,
        }
    }
}

impl DeployConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let monitoring_enabled = std::env::var("MONITORING_ENABLED")
            .ok()
            .and_then(|s| parse_bool(&s))
            .unwrap_or(defaults.monitoring_enabled);
        let monitoring_interval_minutes = env_parse(
            "MONITORING_INTERVAL_MINUTES",
            defaults.monitoring_interval_minutes,
        );
        let monitoring_retention_hours = env_parse(
            "MONITORING_RETENTION_HOURS",
            defaults.monitoring_retention_hours,
        );
        let monitoring_chart_hours =
            env_parse("MONITORING_CHART_HOURS", defaults.monitoring_chart_hours);
        let monitoring_disk_path = std::env::var("MONITORING_DISK_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.monitoring_disk_path);
        let monitoring_proc_root = std::env::var("MONITORING_PROC_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.monitoring_proc_root);
        let monitoring_cpu_window =
            Duration::from_millis(env_parse("MONITORING_CPU_WINDOW_MS", 500u64));
        let max_concurrent_deploys =
            env_parse("DEPLOY_MAX_CONCURRENT", defaults.max_concurrent_deploys);
        let deploy_step_timeout = Duration::from_secs(env_parse("DEPLOY_STEP_TIMEOUT", 600u64));
        let deploy_update_command = std::env::var("DEPLOY_UPDATE_COMMAND")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.deploy_update_command);
        let deploy_history_limit =
            env_parse("DEPLOY_HISTORY_LIMIT", defaults.deploy_history_limit);

        if monitoring_interval_minutes == 0 {
            tracing::warn!("MONITORING_INTERVAL_MINUTES is 0 -- using 1 minute");
        }
        if monitoring_retention_hours < monitoring_chart_hours {
            tracing::warn!(
                retention_hours = monitoring_retention_hours,
                chart_hours = monitoring_chart_hours,
                "Metric retention is shorter than the chart window"
            );
        }
        if max_concurrent_deploys == 0 {
            tracing::warn!("DEPLOY_MAX_CONCURRENT is 0 -- using 1");
        }

        Self {
            monitoring_enabled,
            monitoring_interval_minutes: monitoring_interval_minutes.max(1),
            monitoring_retention_hours,
            monitoring_chart_hours,
            monitoring_disk_path,
            monitoring_proc_root,
            monitoring_cpu_window,
            max_concurrent_deploys: max_concurrent_deploys.max(1),
            deploy_step_timeout,
            deploy_update_command,
            deploy_history_limit,
        }
    }

    /// Cadence of the system-monitor task.
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_minutes * 60)
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
