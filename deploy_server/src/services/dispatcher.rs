//! Deployment dispatcher: runs deployments out-of-band, one at a time per endpoint.
//!
//! `submit` never waits for the deployment. The first trigger for an idle
//! endpoint starts a worker task; triggers arriving while that worker is busy
//! are coalesced into a single pending batch which the worker runs next.
//! A semaphore bounds how many deployments execute at once across endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, Semaphore};

use crate::error::{DispatchError, StoreError};
use crate::models::deployment::{DispatchOutcome, NewDeploymentEvent};
use crate::models::webhook::WebhookEndpoint;
use crate::services::deploy_runner::{DeployReport, DeployRunner, DeployTrigger};
use crate::services::signature::Verification;
use crate::services::webhook_store::WebhookRepository;

/// How a submitted trigger was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The endpoint was idle; a worker started.
    Started,
    /// A deployment is already running; the trigger joined the pending batch.
    Coalesced,
}

#[derive(Default)]
struct Slot {
    pending: Vec<DeployTrigger>,
}

struct Inner {
    repo: Arc<dyn WebhookRepository>,
    runner: Arc<dyn DeployRunner>,
    permits: Arc<Semaphore>,
    /// Presence of a key means a worker owns that endpoint.
    slots: Mutex<HashMap<i64, Slot>>,
    idle: Notify,
}

#[derive(Clone)]
pub struct DeploymentDispatcher {
    inner: Arc<Inner>,
}

impl DeploymentDispatcher {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        runner: Arc<dyn DeployRunner>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                runner,
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                slots: Mutex::new(HashMap::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue a deployment for `endpoint`.
    pub async fn submit(&self, endpoint: &WebhookEndpoint, trigger: DeployTrigger) -> Submission {
        let mut slots = self.inner.slots.lock().await;

        if let Some(slot) = slots.get_mut(&endpoint.id) {
            slot.pending.push(trigger);
            crate::metrics::deployment_coalesced();
            tracing::info!(
                webhook_id = endpoint.id,
                pending = slot.pending.len(),
                "Deployment already running, trigger coalesced"
            );
            return Submission::Coalesced;
        }

        slots.insert(endpoint.id, Slot::default());
        crate::metrics::active_deployments(slots.len());
        drop(slots);

        let inner = self.inner.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            inner.work(endpoint, vec![trigger]).await;
        });
        Submission::Started
    }

    /// Number of endpoints with a deployment in flight.
    pub async fn in_flight(&self) -> usize {
        self.inner.slots.lock().await.len()
    }

    /// Resolve once no endpoint has a deployment in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.slots.lock().await.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    /// Worker loop owning `endpoint`'s slot until nothing is pending.
    async fn work(self: Arc<Self>, mut endpoint: WebhookEndpoint, first: Vec<DeployTrigger>) {
        let mut batch = first;

        loop {
            self.run_batch(&endpoint, &batch).await;

            let mut slots = self.slots.lock().await;
            let next = match slots.get_mut(&endpoint.id) {
                Some(slot) if !slot.pending.is_empty() => std::mem::take(&mut slot.pending),
                _ => {
                    slots.remove(&endpoint.id);
                    crate::metrics::active_deployments(slots.len());
                    drop(slots);
                    self.idle.notify_waiters();
                    return;
                }
            };
            drop(slots);

            // Pick up configuration edits made while the last batch ran.
            match self.repo.get(endpoint.id).await {
                Ok(Some(fresh)) => endpoint = fresh,
                Ok(None) => {
                    tracing::warn!(
                        webhook_id = endpoint.id,
                        dropped = next.len(),
                        "Webhook deleted while deployments were pending"
                    );
                    let mut slots = self.slots.lock().await;
                    slots.remove(&endpoint.id);
                    crate::metrics::active_deployments(slots.len());
                    drop(slots);
                    self.idle.notify_waiters();
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        webhook_id = endpoint.id,
                        "Failed to reload webhook, using previous configuration: {e}"
                    );
                    crate::metrics::error_recorded("store");
                }
            }
            batch = next;
        }
    }

    /// Run one deployment for a batch of coalesced triggers and record an
    /// event per trigger.
    async fn run_batch(&self, endpoint: &WebhookEndpoint, batch: &[DeployTrigger]) {
        let Some(latest) = batch.last() else {
            return;
        };

        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(webhook_id = endpoint.id, "Deployment pool closed");
                return;
            }
        };

        tracing::info!(
            webhook_id = endpoint.id,
            branch = latest.branch.as_deref().unwrap_or(""),
            commit = latest.commit_sha.as_deref().unwrap_or(""),
            triggers = batch.len(),
            "Starting deployment"
        );

        // Run on its own task so a panicking runner is reported, not lost.
        let runner = self.runner.clone();
        let task_endpoint = endpoint.clone();
        let task_trigger = latest.clone();
        let result = tokio::spawn(async move { runner.run(&task_endpoint, &task_trigger).await }).await;

        let (outcome, output, error, duration_ms) = match result {
            Ok(Ok(report)) => summarize(&report),
            Ok(Err(e)) => {
                tracing::error!(webhook_id = endpoint.id, "Deployment could not start: {e}");
                crate::metrics::error_recorded("dispatch");
                (DispatchOutcome::Failed, None, Some(e.to_string()), None)
            }
            Err(join_err) => {
                tracing::error!(webhook_id = endpoint.id, "Deployment task aborted: {join_err}");
                crate::metrics::error_recorded("dispatch");
                let e = DispatchError::Aborted(join_err.to_string());
                (DispatchOutcome::Failed, None, Some(e.to_string()), None)
            }
        };

        crate::metrics::deployment_outcome(outcome.as_str());
        if let Some(ms) = duration_ms {
            crate::metrics::deployment_duration(ms as u64);
        }
        tracing::info!(
            webhook_id = endpoint.id,
            outcome = outcome.as_str(),
            duration_ms = duration_ms.unwrap_or_default(),
            "Deployment finished"
        );

        let recorded_at = Utc::now();
        for trigger in batch {
            let event = NewDeploymentEvent {
                webhook_id: endpoint.id,
                event_type: trigger.event_type.clone(),
                branch: trigger.branch.clone(),
                branch_matched: true,
                commit_sha: trigger.commit_sha.clone(),
                verification: Verification::Verified.outcome().to_string(),
                outcome: outcome.as_str().to_string(),
                reason: None,
                output: output.clone(),
                error: error.clone(),
                duration_ms,
                received_at: trigger.received_at,
                recorded_at,
            };
            if let Err(e) = self.repo.append_event(event).await {
                tracing::error!(webhook_id = endpoint.id, "Failed to record deployment event: {e}");
                crate::metrics::error_recorded("store");
            }
        }

        match self
            .repo
            .mark_deployed(endpoint.id, Utc::now(), outcome.as_str())
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(
                    webhook_id = endpoint.id,
                    "Webhook deleted before last deployment was recorded"
                );
            }
            Err(e) => {
                tracing::error!(webhook_id = endpoint.id, "Failed to update last deployment: {e}");
                crate::metrics::error_recorded("store");
            }
        }
    }
}

fn summarize(
    report: &DeployReport,
) -> (DispatchOutcome, Option<String>, Option<String>, Option<i32>) {
    let outcome = if report.succeeded() {
        DispatchOutcome::Dispatched
    } else {
        DispatchOutcome::Failed
    };
    let duration_ms = i32::try_from(report.duration_ms).unwrap_or(i32::MAX);
    (
        outcome,
        Some(report.output()),
        report.failure(),
        Some(duration_ms),
    )
}
