//! Time-series storage for host metric samples.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::{checkout, DbPool};
use crate::error::StoreError;
use crate::models::system_metric::{SystemMetric, SystemMetricSample};
use crate::schema::system_metrics;

#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Persist one sample.
    async fn record(&self, sample: SystemMetricSample) -> Result<SystemMetric, StoreError>;

    /// Samples recorded within the trailing `hours`, oldest first.
    async fn recent_window(&self, hours: i64) -> Result<Vec<SystemMetric>, StoreError>;

    /// Most recent sample, if any.
    async fn latest(&self) -> Result<Option<SystemMetric>, StoreError>;

    /// Delete samples older than `retention_hours`; returns how many went.
    async fn prune(&self, retention_hours: i64) -> Result<u64, StoreError>;
}

/// Oldest `recorded_at` still inside a trailing window of `hours`.
pub fn window_start(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now - Duration::hours(hours.max(0))
}

pub struct PgMetricsStore {
    pool: DbPool,
}

impl PgMetricsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for PgMetricsStore {
    async fn record(&self, sample: SystemMetricSample) -> Result<SystemMetric, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let result = diesel::insert_into(system_metrics::table)
            .values(&sample)
            .returning(SystemMetric::as_returning())
            .get_result(&mut *conn)
            .await?;
        Ok(result)
    }

    async fn recent_window(&self, hours: i64) -> Result<Vec<SystemMetric>, StoreError> {
        let cutoff = window_start(Utc::now(), hours);
        let mut conn = checkout(&self.pool).await?;
        let results = system_metrics::table
            .filter(system_metrics::recorded_at.ge(cutoff))
            .order((system_metrics::recorded_at.asc(), system_metrics::id.asc()))
            .select(SystemMetric::as_select())
            .load(&mut *conn)
            .await?;
        Ok(results)
    }

    async fn latest(&self) -> Result<Option<SystemMetric>, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let result = system_metrics::table
            .order((system_metrics::recorded_at.desc(), system_metrics::id.desc()))
            .select(SystemMetric::as_select())
            .first(&mut *conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn prune(&self, retention_hours: i64) -> Result<u64, StoreError> {
        let cutoff = window_start(Utc::now(), retention_hours);
        let mut conn = checkout(&self.pool).await?;
        // Single statement: rows inserted concurrently are newer than the cutoff.
        let deleted = diesel::delete(
            system_metrics::table.filter(system_metrics::recorded_at.lt(cutoff)),
        )
        .execute(&mut *conn)
        .await?;
        Ok(deleted as u64)
    }
}
