//! In-process periodic scheduler. Runs registered tasks on a fixed cadence
//! without ever overlapping two runs of the same task.
//!
//! Each task has one ticker. A tick that finds the previous run still going
//! is skipped and counted; it is not queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Body of a scheduled task.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub enum TickOutcome {
    Started(JoinHandle<()>),
    Skipped,
}

#[derive(Debug, Clone, Default)]
struct RunHistory {
    last_started_at: Option<DateTime<Utc>>,
    last_finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct ScheduledTask {
    name: String,
    cadence: Duration,
    task: Arc<dyn PeriodicTask>,
    running: AtomicBool,
    skipped: AtomicU64,
    runs: AtomicU64,
    failures: AtomicU64,
    history: Mutex<RunHistory>,
}

/// Point-in-time view of a task, served on `/api/scheduler`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub cadence_secs: u64,
    pub state: &'static str,
    pub runs: u64,
    pub failures: u64,
    pub skipped_ticks: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Resets the running flag however the run ends, including a panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, cadence: Duration, task: Arc<dyn PeriodicTask>) -> Self {
        Self {
            name: name.into(),
            cadence,
            task,
            running: AtomicBool::new(false),
            skipped: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            history: Mutex::new(RunHistory::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Start a run unless one is already in progress.
    pub fn tick(self: &Arc<Self>) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(task = %self.name, skipped, "Previous run still in progress, skipping tick");
            crate::metrics::tick_skipped(&self.name);
            return TickOutcome::Skipped;
        }

        let this = Arc::clone(self);
        TickOutcome::Started(tokio::spawn(async move { this.execute().await }))
    }

    async fn execute(self: Arc<Self>) {
        let _guard = RunningGuard(&self.running);
        self.update_history(|h| h.last_started_at = Some(Utc::now()));
        let start = Instant::now();

        // Panics surface as a JoinError here instead of tearing down the ticker.
        let task = Arc::clone(&self.task);
        let result = match tokio::spawn(async move { task.run().await }).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("task panicked: {e}")),
        };

        self.runs.fetch_add(1, Ordering::Relaxed);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                tracing::debug!(task = %self.name, elapsed_ms, "Scheduled run finished");
                self.update_history(|h| {
                    h.last_finished_at = Some(Utc::now());
                    h.last_error = None;
                });
                crate::metrics::task_finished(&self.name, true);
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(task = %self.name, elapsed_ms, "Scheduled run failed: {e:#}");
                self.update_history(|h| {
                    h.last_finished_at = Some(Utc::now());
                    h.last_error = Some(format!("{e:#}"));
                });
                crate::metrics::task_finished(&self.name, false);
            }
        }
    }

    fn update_history(&self, f: impl FnOnce(&mut RunHistory)) {
        if let Ok(mut history) = self.history.lock() {
            f(&mut history);
        }
    }

    pub fn status(&self) -> TaskStatus {
        let history = self
            .history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default();
        TaskStatus {
            name: self.name.clone(),
            cadence_secs: self.cadence.as_secs(),
            state: if self.is_running() { "running" } else { "idle" },
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks(),
            last_started_at: history.last_started_at,
            last_finished_at: history.last_finished_at,
            last_error: history.last_error,
        }
    }
}

/// Process-wide scheduler: register tasks, `start` the tickers once,
/// `shutdown` on exit.
#[derive(Default)]
pub struct SchedulerState {
    tasks: Vec<Arc<ScheduledTask>>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        cadence: Duration,
        task: Arc<dyn PeriodicTask>,
    ) -> Arc<ScheduledTask> {
        let scheduled = Arc::new(ScheduledTask::new(name, cadence, task));
        tracing::info!(
            task = %scheduled.name,
            cadence_secs = cadence.as_secs(),
            "Scheduled task registered"
        );
        self.tasks.push(Arc::clone(&scheduled));
        scheduled
    }

    /// Spawn one ticker per task. The first tick fires immediately.
    pub fn start(&self) {
        let Ok(mut tickers) = self.tickers.lock() else {
            return;
        };
        if !tickers.is_empty() {
            tracing::warn!("Scheduler already started");
            return;
        }
        for task in &self.tasks {
            let task = Arc::clone(task);
            tickers.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(task.cadence);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    // Finished runs need no joining; the handle is dropped.
                    let _ = task.tick();
                }
            }));
        }
        tracing::info!(tasks = self.tasks.len(), "Scheduler started");
    }

    /// Stop the tickers. Runs already in progress are left to finish.
    pub fn shutdown(&self) {
        if let Ok(mut tickers) = self.tickers.lock() {
            for ticker in tickers.drain(..) {
                ticker.abort();
            }
        }
        tracing::info!("Scheduler stopped");
    }

    pub fn snapshot(&self) -> Vec<TaskStatus> {
        self.tasks.iter().map(|t| t.status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    /// Blocks until released, so a run can be held open across ticks.
    struct GatedTask {
        release: Notify,
        started: Notify,
    }

    #[async_trait]
    impl PeriodicTask for GatedTask {
        async fn run(&self) -> anyhow::Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    struct FailingTask;

    #[async_trait]
    impl PeriodicTask for FailingTask {
        async fn run(&self) -> anyhow::Result<()> {
            anyhow::bail!("sampling failed")
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl PeriodicTask for PanickingTask {
        async fn run(&self) -> anyhow::Result<()> {
            panic!("boom")
        }
    }

    fn scheduled(task: Arc<dyn PeriodicTask>) -> Arc<ScheduledTask> {
        Arc::new(ScheduledTask::new("test", Duration::from_secs(60), task))
    }

    #[tokio::test]
    async fn tick_while_running_is_skipped() {
        let gated = Arc::new(GatedTask {
            release: Notify::new(),
            started: Notify::new(),
        });
        let task = scheduled(gated.clone());

        let TickOutcome::Started(handle) = task.tick() else {
            panic!("first tick should start a run");
        };
        gated.started.notified().await;
        assert!(task.is_running());

        assert!(matches!(task.tick(), TickOutcome::Skipped));
        assert!(matches!(task.tick(), TickOutcome::Skipped));
        assert_eq!(task.skipped_ticks(), 2);

        gated.release.notify_one();
        handle.await.unwrap();
        assert!(!task.is_running());

        let status = task.status();
        assert_eq!(status.runs, 1);
        assert_eq!(status.skipped_ticks, 2);
        assert_eq!(status.state, "idle");

        // Idle again: the next tick runs.
        let TickOutcome::Started(handle) = task.tick() else {
            panic!("tick after completion should start a run");
        };
        gated.release.notify_one();
        handle.await.unwrap();
        assert_eq!(task.status().runs, 2);
    }

    #[tokio::test]
    async fn failure_is_counted_and_flag_reset() {
        let task = scheduled(Arc::new(FailingTask));
        let TickOutcome::Started(handle) = task.tick() else {
            panic!("expected run");
        };
        handle.await.unwrap();

        let status = task.status();
        assert_eq!(status.failures, 1);
        assert_eq!(status.last_error.as_deref(), Some("sampling failed"));
        assert!(!task.is_running());
        assert!(matches!(task.tick(), TickOutcome::Started(_)));
    }

    #[tokio::test]
    async fn panic_is_counted_and_flag_reset() {
        let task = scheduled(Arc::new(PanickingTask));
        let TickOutcome::Started(handle) = task.tick() else {
            panic!("expected run");
        };
        handle.await.unwrap();

        let status = task.status();
        assert_eq!(status.failures, 1);
        assert!(status.last_error.unwrap().contains("panicked"));
        assert!(!task.is_running());
    }

    #[tokio::test]
    async fn start_runs_immediately_and_shutdown_stops_tickers() {
        let gated = Arc::new(GatedTask {
            release: Notify::new(),
            started: Notify::new(),
        });
        let mut scheduler = SchedulerState::new();
        let task = scheduler.register("gated", Duration::from_secs(3600), gated.clone());

        scheduler.start();
        gated.started.notified().await;
        assert_eq!(scheduler.snapshot()[0].state, "running");

        scheduler.shutdown();
        gated.release.notify_one();
        while task.is_running() {
            tokio::task::yield_now().await;
        }
        assert_eq!(task.status().runs, 1);
        assert_eq!(scheduler.snapshot()[0].name, "gated");
    }
}
