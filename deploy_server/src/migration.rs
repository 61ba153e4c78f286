//! Schema migration for the deployhook tables.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// SQL migration for all server tables.
///
/// Idempotent: every statement uses `IF NOT EXISTS`, so it runs on each start.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Webhook endpoints
-- ================================================================

CREATE TABLE IF NOT EXISTS webhooks (
    id                  BIGSERIAL PRIMARY KEY,
    name                VARCHAR(255) NOT NULL,
    domain              VARCHAR(255),
    git_provider        VARCHAR(16) NOT NULL DEFAULT 'github',
    repository_url      VARCHAR(512) NOT NULL,
    branch              VARCHAR(255),
    local_path          VARCHAR(500) NOT NULL,
    deploy_user         VARCHAR(255),
    secret_token        VARCHAR(64) NOT NULL,
    pre_deploy_script   TEXT,
    post_deploy_script  TEXT,
    ssh_key_path        VARCHAR(500),
    is_active           BOOLEAN NOT NULL DEFAULT TRUE,
    last_deployed_at    TIMESTAMPTZ,
    last_outcome        VARCHAR(16),
    create_date         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    write_date          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- ================================================================
-- Deployment event log (append-only)
-- ================================================================

CREATE TABLE IF NOT EXISTS deployment_events (
    id              BIGSERIAL PRIMARY KEY,
    webhook_id      BIGINT NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
    event_type      VARCHAR(64) NOT NULL,
    branch          VARCHAR(255),
    branch_matched  BOOLEAN NOT NULL DEFAULT FALSE,
    commit_sha      VARCHAR(64),
    verification    VARCHAR(32) NOT NULL,
    outcome         VARCHAR(16) NOT NULL,
    reason          VARCHAR(255),
    output          TEXT,
    error           TEXT,
    duration_ms     INTEGER,
    received_at     TIMESTAMPTZ NOT NULL,
    recorded_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_deployment_events_webhook
    ON deployment_events (webhook_id, received_at DESC);

-- ================================================================
-- Host metric samples
-- ================================================================

CREATE TABLE IF NOT EXISTS system_metrics (
    id                  BIGSERIAL PRIMARY KEY,
    cpu_usage           DOUBLE PRECISION,
    memory_usage        DOUBLE PRECISION,
    disk_usage          DOUBLE PRECISION,
    memory_total        BIGINT,
    memory_used         BIGINT,
    disk_total          BIGINT,
    disk_used           BIGINT,
    disk_read_bytes     BIGINT,
    disk_write_bytes    BIGINT,
    network_rx_bytes    BIGINT,
    network_tx_bytes    BIGINT,
    recorded_at         TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_system_metrics_recorded ON system_metrics (recorded_at);
"#;

/// Run the migration SQL.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL).await?;
    Ok(())
}
