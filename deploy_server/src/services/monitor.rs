//! `system-monitor` scheduled task: sample the host, persist, prune.

use std::sync::Arc;

use async_trait::async_trait;

use crate::services::metrics_store::MetricsStore;
use crate::services::sampler::MetricsSampler;
use crate::services::scheduler::PeriodicTask;

pub const SYSTEM_MONITOR_TASK: &str = "system-monitor";

pub struct SystemMonitorTask {
    sampler: MetricsSampler,
    store: Arc<dyn MetricsStore>,
    retention_hours: i64,
}

impl SystemMonitorTask {
    pub fn new(sampler: MetricsSampler, store: Arc<dyn MetricsStore>, retention_hours: i64) -> Self {
        Self {
            sampler,
            store,
            retention_hours,
        }
    }
}

#[async_trait]
impl PeriodicTask for SystemMonitorTask {
    async fn run(&self) -> anyhow::Result<()> {
        let sample = self.sampler.sample().await.inspect_err(|_| {
            crate::metrics::error_recorded("sampling");
        })?;
        let saved = self.store.record(sample).await.inspect_err(|_| {
            crate::metrics::error_recorded("store");
        })?;
        crate::metrics::sample_recorded();
        tracing::debug!(
            sample_id = saved.id,
            cpu = ?saved.cpu_usage,
            memory = ?saved.memory_usage,
            disk = ?saved.disk_usage,
            "System metrics recorded"
        );

        let pruned = self.store.prune(self.retention_hours).await?;
        if pruned > 0 {
            tracing::info!(pruned, retention_hours = self.retention_hours, "Old metric samples pruned");
            crate::metrics::samples_pruned(pruned);
        }
        Ok(())
    }
}
