//! system_metrics — Point-in-time host samples, pruned by age.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::system_metrics;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = system_metrics)]
pub struct SystemMetric {
    pub id: i64,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub memory_total: Option<i64>,
    pub memory_used: Option<i64>,
    pub disk_total: Option<i64>,
    pub disk_used: Option<i64>,
    pub disk_read_bytes: Option<i64>,
    pub disk_write_bytes: Option<i64>,
    pub network_rx_bytes: Option<i64>,
    pub network_tx_bytes: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

/// One collected snapshot, not yet persisted.
///
/// Percentages are in `[0, 100]`. IO and network fields are byte deltas since
/// the previous sample. `None` means the sub-metric could not be read.
#[derive(Debug, Clone, PartialEq, Insertable, Serialize)]
#[diesel(table_name = system_metrics)]
pub struct SystemMetricSample {
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub memory_total: Option<i64>,
    pub memory_used: Option<i64>,
    pub disk_total: Option<i64>,
    pub disk_used: Option<i64>,
    pub disk_read_bytes: Option<i64>,
    pub disk_write_bytes: Option<i64>,
    pub network_rx_bytes: Option<i64>,
    pub network_tx_bytes: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

impl SystemMetricSample {
    /// A sample with every sub-metric missing, stamped `recorded_at`.
    pub fn empty(recorded_at: DateTime<Utc>) -> Self {
        Self {
            cpu_usage: None,
            memory_usage: None,
            disk_usage: None,
            memory_total: None,
            memory_used: None,
            disk_total: None,
            disk_used: None,
            disk_read_bytes: None,
            disk_write_bytes: None,
            network_rx_bytes: None,
            network_tx_bytes: None,
            recorded_at,
        }
    }

    /// True when no sub-metric could be collected.
    pub fn is_empty(&self) -> bool {
        self.cpu_usage.is_none()
            && self.memory_usage.is_none()
            && self.disk_usage.is_none()
            && self.memory_total.is_none()
            && self.memory_used.is_none()
            && self.disk_total.is_none()
            && self.disk_used.is_none()
            && self.disk_read_bytes.is_none()
            && self.disk_write_bytes.is_none()
            && self.network_rx_bytes.is_none()
            && self.network_tx_bytes.is_none()
    }
}

/// Clamp a percentage into `[0, 100]`, rejecting NaN.
pub fn clamp_percent(value: f64) -> Option<f64> {
    if value.is_nan() {
        return None;
    }
    Some(value.clamp(0.0, 100.0))
}
