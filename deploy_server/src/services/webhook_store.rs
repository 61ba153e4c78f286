//! Webhook endpoint repository and deployment event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::{checkout, DbPool};
use crate::error::StoreError;
use crate::models::deployment::{DeploymentEvent, NewDeploymentEvent};
use crate::models::webhook::{NewWebhookEndpoint, WebhookEndpoint};
use crate::schema::{deployment_events, webhooks};

/// Narrow interface the webhook pipeline uses to read endpoints and append
/// to their event log.
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<WebhookEndpoint>, StoreError>;

    async fn list(&self) -> Result<Vec<WebhookEndpoint>, StoreError>;

    async fn create(&self, new_endpoint: NewWebhookEndpoint)
        -> Result<WebhookEndpoint, StoreError>;

    /// Record the end of a dispatch. Touches only the last-deployment
    /// columns, so concurrent edits to the endpoint survive.
    async fn mark_deployed(
        &self,
        id: i64,
        at: DateTime<Utc>,
        outcome: &str,
    ) -> Result<(), StoreError>;

    /// Flip `is_active` in a single statement and return the updated row.
    async fn toggle_active(&self, id: i64) -> Result<WebhookEndpoint, StoreError>;

    /// Remove an endpoint together with its event log.
    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    async fn append_event(&self, event: NewDeploymentEvent)
        -> Result<DeploymentEvent, StoreError>;

    /// Most recent events first.
    async fn recent_events(
        &self,
        webhook_id: i64,
        limit: i64,
    ) -> Result<Vec<DeploymentEvent>, StoreError>;
}

pub struct PgWebhookRepository {
    pool: DbPool,
}

impl PgWebhookRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRepository for PgWebhookRepository {
    async fn get(&self, id: i64) -> Result<Option<WebhookEndpoint>, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let result = webhooks::table
            .find(id)
            .select(WebhookEndpoint::as_select())
            .first(&mut *conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn list(&self) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let results = webhooks::table
            .order(webhooks::id.asc())
            .select(WebhookEndpoint::as_select())
            .load(&mut *conn)
            .await?;
        Ok(results)
    }

    async fn create(
        &self,
        new_endpoint: NewWebhookEndpoint,
    ) -> Result<WebhookEndpoint, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let result = diesel::insert_into(webhooks::table)
            .values(&new_endpoint)
            .returning(WebhookEndpoint::as_returning())
            .get_result(&mut *conn)
            .await?;

        tracing::info!(webhook_id = result.id, name = %result.name, "Webhook created");
        Ok(result)
    }

    async fn mark_deployed(
        &self,
        id: i64,
        at: DateTime<Utc>,
        outcome: &str,
    ) -> Result<(), StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let updated = diesel::update(webhooks::table.find(id))
            .set((
                webhooks::last_deployed_at.eq(Some(at)),
                webhooks::last_outcome.eq(Some(outcome)),
                webhooks::write_date.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn toggle_active(&self, id: i64) -> Result<WebhookEndpoint, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        diesel::update(webhooks::table.find(id))
            .set((
                webhooks::is_active.eq(diesel::dsl::not(webhooks::is_active)),
                webhooks::write_date.eq(Utc::now()),
            ))
            .returning(WebhookEndpoint::as_returning())
            .get_result(&mut *conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = checkout(&self.pool).await?;
        // deployment_events rows go with it (ON DELETE CASCADE).
        let deleted = diesel::delete(webhooks::table.find(id))
            .execute(&mut *conn)
            .await?;

        if deleted == 0 {
            return Err(StoreError::NotFound(id));
        }
        tracing::info!(webhook_id = id, "Webhook deleted");
        Ok(())
    }

    async fn append_event(
        &self,
        event: NewDeploymentEvent,
    ) -> Result<DeploymentEvent, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let result = diesel::insert_into(deployment_events::table)
            .values(&event)
            .returning(DeploymentEvent::as_returning())
            .get_result(&mut *conn)
            .await?;
        Ok(result)
    }

    async fn recent_events(
        &self,
        webhook_id: i64,
        limit: i64,
    ) -> Result<Vec<DeploymentEvent>, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let results = deployment_events::table
            .filter(deployment_events::webhook_id.eq(webhook_id))
            .order((
                deployment_events::received_at.desc(),
                deployment_events::id.desc(),
            ))
            .limit(limit)
            .select(DeploymentEvent::as_select())
            .load(&mut *conn)
            .await?;
        Ok(results)
    }
}
