//! In-memory repository and metrics store used by unit tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::deployment::{DeploymentEvent, NewDeploymentEvent};
use crate::models::system_metric::{SystemMetric, SystemMetricSample};
use crate::models::webhook::{NewWebhookEndpoint, WebhookEndpoint};
use crate::services::metrics_store::{window_start, MetricsStore};
use crate::services::webhook_store::WebhookRepository;

#[derive(Default)]
struct WebhookTables {
    next_webhook_id: i64,
    next_event_id: i64,
    webhooks: BTreeMap<i64, WebhookEndpoint>,
    events: Vec<DeploymentEvent>,
}

#[derive(Default)]
pub struct MemoryWebhookRepository {
    tables: RwLock<WebhookTables>,
}

impl MemoryWebhookRepository {
    pub async fn all_events(&self) -> Vec<DeploymentEvent> {
        self.tables.read().await.events.clone()
    }
}

#[async_trait]
impl WebhookRepository for MemoryWebhookRepository {
    async fn get(&self, id: i64) -> Result<Option<WebhookEndpoint>, StoreError> {
        Ok(self.tables.read().await.webhooks.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<WebhookEndpoint>, StoreError> {
        Ok(self.tables.read().await.webhooks.values().cloned().collect())
    }

    async fn create(
        &self,
        new_endpoint: NewWebhookEndpoint,
    ) -> Result<WebhookEndpoint, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_webhook_id += 1;
        let now = Utc::now();
        let endpoint = WebhookEndpoint {
            id: tables.next_webhook_id,
            name: new_endpoint.name,
            domain: new_endpoint.domain,
            git_provider: new_endpoint.git_provider,
            repository_url: new_endpoint.repository_url,
            branch: new_endpoint.branch,
            local_path: new_endpoint.local_path,
            deploy_user: new_endpoint.deploy_user,
            secret_token: new_endpoint.secret_token,
            pre_deploy_script: new_endpoint.pre_deploy_script,
            post_deploy_script: new_endpoint.post_deploy_script,
            ssh_key_path: new_endpoint.ssh_key_path,
            is_active: new_endpoint.is_active,
            last_deployed_at: None,
            last_outcome: None,
            create_date: now,
            write_date: now,
        };
        tables.webhooks.insert(endpoint.id, endpoint.clone());
        Ok(endpoint)
    }

    async fn mark_deployed(
        &self,
        id: i64,
        at: DateTime<Utc>,
        outcome: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables.webhooks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.last_deployed_at = Some(at);
        row.last_outcome = Some(outcome.to_string());
        row.write_date = Utc::now();
        Ok(())
    }

    async fn toggle_active(&self, id: i64) -> Result<WebhookEndpoint, StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables.webhooks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.is_active = !row.is_active;
        row.write_date = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.webhooks.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        tables.events.retain(|e| e.webhook_id != id);
        Ok(())
    }

    async fn append_event(
        &self,
        event: NewDeploymentEvent,
    ) -> Result<DeploymentEvent, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.webhooks.contains_key(&event.webhook_id) {
            return Err(StoreError::NotFound(event.webhook_id));
        }
        tables.next_event_id += 1;
        let row = DeploymentEvent {
            id: tables.next_event_id,
            webhook_id: event.webhook_id,
            event_type: event.event_type,
            branch: event.branch,
            branch_matched: event.branch_matched,
            commit_sha: event.commit_sha,
            verification: event.verification,
            outcome: event.outcome,
            reason: event.reason,
            output: event.output,
            error: event.error,
            duration_ms: event.duration_ms,
            received_at: event.received_at,
            recorded_at: event.recorded_at,
        };
        tables.events.push(row.clone());
        Ok(row)
    }

    async fn recent_events(
        &self,
        webhook_id: i64,
        limit: i64,
    ) -> Result<Vec<DeploymentEvent>, StoreError> {
        let tables = self.tables.read().await;
        let mut events: Vec<_> = tables
            .events
            .iter()
            .filter(|e| e.webhook_id == webhook_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| (b.received_at, b.id).cmp(&(a.received_at, a.id)));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }
}

#[derive(Default)]
struct MetricRows {
    next_id: i64,
    rows: Vec<SystemMetric>,
}

#[derive(Default)]
pub struct MemoryMetricsStore {
    rows: RwLock<MetricRows>,
}

impl MemoryMetricsStore {
    pub async fn len(&self) -> usize {
        self.rows.read().await.rows.len()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn record(&self, sample: SystemMetricSample) -> Result<SystemMetric, StoreError> {
        let mut table = self.rows.write().await;
        table.next_id += 1;
        let row = SystemMetric {
            id: table.next_id,
            cpu_usage: sample.cpu_usage,
            memory_usage: sample.memory_usage,
            disk_usage: sample.disk_usage,
            memory_total: sample.memory_total,
            memory_used: sample.memory_used,
            disk_total: sample.disk_total,
            disk_used: sample.disk_used,
            disk_read_bytes: sample.disk_read_bytes,
            disk_write_bytes: sample.disk_write_bytes,
            network_rx_bytes: sample.network_rx_bytes,
            network_tx_bytes: sample.network_tx_bytes,
            recorded_at: sample.recorded_at,
        };
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn recent_window(&self, hours: i64) -> Result<Vec<SystemMetric>, StoreError> {
        let cutoff = window_start(Utc::now(), hours);
        let table = self.rows.read().await;
        let mut rows: Vec<_> = table
            .rows
            .iter()
            .filter(|r| r.recorded_at >= cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.recorded_at, r.id));
        Ok(rows)
    }

    async fn latest(&self) -> Result<Option<SystemMetric>, StoreError> {
        let table = self.rows.read().await;
        Ok(table.rows.iter().max_by_key(|r| (r.recorded_at, r.id)).cloned())
    }

    async fn prune(&self, retention_hours: i64) -> Result<u64, StoreError> {
        let cutoff = window_start(Utc::now(), retention_hours);
        let mut table = self.rows.write().await;
        let before = table.rows.len();
        table.rows.retain(|r| r.recorded_at >= cutoff);
        Ok((before - table.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    fn sample_at(minutes_ago: i64, cpu: f64) -> SystemMetricSample {
        let mut sample = SystemMetricSample::empty(Utc::now() - Duration::minutes(minutes_ago));
        sample.cpu_usage = Some(cpu);
        sample
    }

    #[tokio::test]
    async fn recent_window_excludes_old_samples_and_sorts_ascending() {
        let store = MemoryMetricsStore::default();
        store.record(sample_at(30, 3.0)).await.unwrap();
        store.record(sample_at(5 * 60, 2.0)).await.unwrap();
        store.record(sample_at(90, 1.0)).await.unwrap();
        store.record(sample_at(7 * 60, 9.0)).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(6);
        let window = store.recent_window(6).await.unwrap();
        assert!(window.iter().all(|s| s.recorded_at >= cutoff));
        let cpus: Vec<_> = window.iter().map(|s| s.cpu_usage.unwrap()).collect();
        assert_eq!(cpus, vec![2.0, 1.0, 3.0]);

        let again = store.recent_window(6).await.unwrap();
        assert_eq!(window, again);
    }

    #[tokio::test]
    async fn latest_is_most_recent_or_none() {
        let store = MemoryMetricsStore::default();
        assert!(store.latest().await.unwrap().is_none());
        store.record(sample_at(10, 1.0)).await.unwrap();
        store.record(sample_at(1, 2.0)).await.unwrap();
        store.record(sample_at(20, 3.0)).await.unwrap();
        assert_eq!(store.latest().await.unwrap().unwrap().cpu_usage, Some(2.0));
    }

    #[tokio::test]
    async fn prune_removes_all_and_only_old_samples() {
        let store = MemoryMetricsStore::default();
        store.record(sample_at(25 * 60, 1.0)).await.unwrap();
        store.record(sample_at(48 * 60, 2.0)).await.unwrap();
        store.record(sample_at(23 * 60, 3.0)).await.unwrap();
        store.record(sample_at(0, 4.0)).await.unwrap();

        assert_eq!(store.prune(24).await.unwrap(), 2);
        let remaining: Vec<_> = store
            .recent_window(48)
            .await
            .unwrap()
            .iter()
            .map(|s| s.cpu_usage.unwrap())
            .collect();
        assert_eq!(remaining, vec![3.0, 4.0]);
        assert_eq!(store.prune(24).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_prune_never_loses_fresh_samples() {
        let store = Arc::new(MemoryMetricsStore::default());
        for i in 0..50 {
            store.record(sample_at(48 * 60 + i, 0.0)).await.unwrap();
        }

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    store.record(sample_at(0, i as f64)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let pruner = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut deleted = 0;
                for _ in 0..50 {
                    deleted += store.prune(24).await.unwrap();
                    tokio::task::yield_now().await;
                }
                deleted
            })
        };

        writer.await.unwrap();
        assert_eq!(pruner.await.unwrap(), 50);
        assert_eq!(store.len().await, 50);
    }

    #[tokio::test]
    async fn recent_events_newest_first_and_limited() {
        let repo = MemoryWebhookRepository::default();
        let endpoint = repo
            .create(NewWebhookEndpoint {
                name: "site".into(),
                domain: None,
                git_provider: "github".into(),
                repository_url: "git@github.com:acme/site.git".into(),
                branch: Some("main".into()),
                local_path: "/srv/site".into(),
                deploy_user: None,
                secret_token: "s".repeat(64),
                pre_deploy_script: None,
                post_deploy_script: None,
                ssh_key_path: None,
                is_active: true,
            })
            .await
            .unwrap();

        for i in 0..25 {
            let at = Utc::now() - Duration::minutes(60 - i);
            repo.append_event(NewDeploymentEvent {
                webhook_id: endpoint.id,
                event_type: "push".into(),
                branch: Some("main".into()),
                branch_matched: true,
                commit_sha: Some(format!("c{i}")),
                verification: "verified".into(),
                outcome: "dispatched".into(),
                reason: None,
                output: None,
                error: None,
                duration_ms: Some(10),
                received_at: at,
                recorded_at: at,
            })
            .await
            .unwrap();
        }

        let recent = repo.recent_events(endpoint.id, 20).await.unwrap();
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].commit_sha.as_deref(), Some("c24"));
        assert_eq!(repo.all_events().await.len(), 25);
    }

    fn ignored_event(webhook_id: i64) -> NewDeploymentEvent {
        let now = Utc::now();
        NewDeploymentEvent {
            webhook_id,
            event_type: "ping".into(),
            branch: None,
            branch_matched: true,
            commit_sha: None,
            verification: "verified".into(),
            outcome: "ignored".into(),
            reason: Some("event type not actionable".into()),
            output: None,
            error: None,
            duration_ms: None,
            received_at: now,
            recorded_at: now,
        }
    }

    #[tokio::test]
    async fn mark_deployed_leaves_other_columns_alone() {
        let repo = MemoryWebhookRepository::default();
        let endpoint = repo
            .create(crate::test_support::new_endpoint(std::path::Path::new("/srv/site")))
            .await
            .unwrap();

        // Operator disables the endpoint after a dispatch read it as active.
        repo.toggle_active(endpoint.id).await.unwrap();
        let at = Utc::now();
        repo.mark_deployed(endpoint.id, at, "dispatched").await.unwrap();

        let row = repo.get(endpoint.id).await.unwrap().unwrap();
        assert!(!row.is_active);
        assert_eq!(row.last_deployed_at, Some(at));
        assert_eq!(row.last_outcome.as_deref(), Some("dispatched"));

        assert!(matches!(
            repo.mark_deployed(999, at, "failed").await,
            Err(StoreError::NotFound(999))
        ));
    }

    #[tokio::test]
    async fn delete_removes_endpoint_and_its_events() {
        let repo = MemoryWebhookRepository::default();
        let doomed = repo
            .create(crate::test_support::new_endpoint(std::path::Path::new("/srv/a")))
            .await
            .unwrap();
        let kept = repo
            .create(crate::test_support::new_endpoint(std::path::Path::new("/srv/b")))
            .await
            .unwrap();
        repo.append_event(ignored_event(doomed.id)).await.unwrap();
        repo.append_event(ignored_event(doomed.id)).await.unwrap();
        repo.append_event(ignored_event(kept.id)).await.unwrap();

        repo.delete(doomed.id).await.unwrap();

        assert!(repo.get(doomed.id).await.unwrap().is_none());
        let events = repo.all_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].webhook_id, kept.id);
        assert!(matches!(
            repo.delete(doomed.id).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
