//! Deployhook server — self-hosted deployment automation.
//!
//! A standalone binary that accepts signed push webhooks from GitHub and
//! GitLab, runs each endpoint's deploy scripts out-of-band (one deployment at
//! a time per endpoint), and periodically samples host metrics for the
//! server-health dashboard.

mod config;
mod dashboard;
mod db;
mod error;
mod metrics;
mod migration;
mod models;
mod routes;
mod schema;
mod services;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::services::deploy_runner::ShellDeployRunner;
use crate::services::dispatcher::DeploymentDispatcher;
use crate::services::metrics_store::{MetricsStore, PgMetricsStore};
use crate::services::monitor::{SystemMonitorTask, SYSTEM_MONITOR_TASK};
use crate::services::sampler::MetricsSampler;
use crate::services::scheduler::SchedulerState;
use crate::services::webhook_store::{PgWebhookRepository, WebhookRepository};

#[derive(Parser)]
#[command(name = "deployhook", about = "Webhook-driven deployment server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "DEPLOY_PORT", default_value = "8080")]
    port: u16,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum pooled database connections
    #[arg(long, env = "DATABASE_POOL_SIZE", default_value = "10")]
    pool_size: usize,

    /// Request timeout in seconds (webhook handlers only enqueue)
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "30")]
    http_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = Arc::new(config::DeployConfig::from_env());

    tracing::info!("Starting deployhook server...");

    // Database
    let pool = db::create_pool(&cli.database_url, cli.pool_size)?;
    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        tracing::info!("Running database migration...");
        migration::run_migration(&mut conn).await?;
        tracing::info!("Database migration completed.");
    }

    // Initialize metrics
    metrics::init_metrics();

    // Services
    let webhooks: Arc<dyn WebhookRepository> = Arc::new(PgWebhookRepository::new(pool.clone()));
    let metric_store: Arc<dyn MetricsStore> = Arc::new(PgMetricsStore::new(pool));
    let runner = Arc::new(ShellDeployRunner::new(
        config.deploy_update_command.clone(),
        config.deploy_step_timeout,
    ));
    let dispatcher =
        DeploymentDispatcher::new(webhooks.clone(), runner, config.max_concurrent_deploys);

    // Scheduler
    let mut scheduler = SchedulerState::new();
    if config.monitoring_enabled {
        let sampler = MetricsSampler::new(
            config.monitoring_proc_root.clone(),
            config.monitoring_disk_path.clone(),
            config.monitoring_cpu_window,
        );
        scheduler.register(
            SYSTEM_MONITOR_TASK,
            config.monitoring_interval(),
            Arc::new(SystemMonitorTask::new(
                sampler,
                metric_store.clone(),
                config.monitoring_retention_hours,
            )),
        );
    } else {
        tracing::info!("System monitoring disabled");
    }
    let scheduler = Arc::new(scheduler);
    scheduler.start();

    // Router
    let state = routes::AppState {
        webhooks,
        metrics: metric_store,
        dispatcher: dispatcher.clone(),
        scheduler: scheduler.clone(),
        config,
    };
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(cli.http_timeout_secs)));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Deployhook server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Stopping scheduler...");
    scheduler.shutdown();
    tracing::info!(
        in_flight = dispatcher.in_flight().await,
        "Waiting for in-flight deployments..."
    );
    dispatcher.wait_idle().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
