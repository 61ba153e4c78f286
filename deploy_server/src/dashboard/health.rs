//! Server health view for the dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::system_metric::SystemMetric;
use crate::services::metrics_store::MetricsStore;

/// Largest chart window accepted from a query string.
pub const MAX_CHART_HOURS: i64 = 24 * 7;

#[derive(Debug, Serialize)]
pub struct ServerHealth {
    pub latest: Option<SystemMetric>,
    pub samples: Vec<SystemMetric>,
    pub chart_hours: i64,
    pub interval_minutes: u64,
    /// The latest sample is older than two sampling intervals, or missing.
    pub stale: bool,
}

/// A sample is stale once two sampling ticks have passed without a new one.
pub fn is_stale(latest: Option<&SystemMetric>, interval_minutes: u64, now: DateTime<Utc>) -> bool {
    let Some(latest) = latest else {
        return true;
    };
    let max_age = chrono::Duration::minutes(interval_minutes.saturating_mul(2) as i64);
    now - latest.recorded_at > max_age
}

pub async fn query_server_health(
    store: &dyn MetricsStore,
    chart_hours: i64,
    interval_minutes: u64,
) -> Result<ServerHealth, StoreError> {
    let chart_hours = chart_hours.clamp(1, MAX_CHART_HOURS);
    let samples = store.recent_window(chart_hours).await?;
    let latest = match samples.last() {
        Some(last) => Some(last.clone()),
        None => store.latest().await?,
    };
    let stale = is_stale(latest.as_ref(), interval_minutes, Utc::now());

    Ok(ServerHealth {
        latest,
        samples,
        chart_hours,
        interval_minutes,
        stale,
    })
}
