//! Database service for billing-service.

use crate::models::{Owner, Subscription};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{BillableStore, SubscriptionStore};
use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, owner_id, name, stripe_id, stripe_plan, \
     quantity, trial_ends_at, ends_at, created_at, updated_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillableStore<Owner> for Database {
    #[instrument(skip(self))]
    async fn get_billable(&self, owner_id: Uuid) -> Result<Option<Owner>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_owner"])
            .start_timer();

        let owner = sqlx::query_as::<_, Owner>(
            r#"
            SELECT owner_id, email, stripe_id, card_brand, card_last_four, trial_ends_at, created_at, updated_at
            FROM billables
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get owner: {}", e)))?;

        timer.observe_duration();
        Ok(owner)
    }

    /// Upsert the owner's billing columns.
    #[instrument(skip(self, owner), fields(owner_id = %owner.owner_id))]
    async fn save_billable(&self, owner: &Owner) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_owner"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO billables (owner_id, email, stripe_id, card_brand, card_last_four, trial_ends_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (owner_id) DO UPDATE SET
                email = EXCLUDED.email,
                stripe_id = EXCLUDED.stripe_id,
                card_brand = EXCLUDED.card_brand,
                card_last_four = EXCLUDED.card_last_four,
                trial_ends_at = EXCLUDED.trial_ends_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(owner.owner_id)
        .bind(&owner.email)
        .bind(&owner.stripe_id)
        .bind(&owner.card_brand)
        .bind(&owner.card_last_four)
        .bind(owner.trial_ends_at)
        .bind(owner.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to save owner: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for Database {
    #[instrument(skip(self, subscription), fields(owner_id = %subscription.owner_id, name = %subscription.name))]
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        sqlx::query(&format!(
            "INSERT INTO subscriptions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription.subscription_id)
        .bind(subscription.owner_id)
        .bind(&subscription.name)
        .bind(&subscription.stripe_id)
        .bind(&subscription.stripe_plan)
        .bind(subscription.quantity)
        .bind(subscription.trial_ends_at)
        .bind(subscription.ends_at)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e))
        })?;

        timer.observe_duration();
        info!(
            subscription_id = %subscription.subscription_id,
            stripe_id = %subscription.stripe_id,
            "Subscription created"
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e)))?;

        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_subscription"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET stripe_plan = $2, quantity = $3, trial_ends_at = $4, ends_at = $5, updated_at = $6
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(&subscription.stripe_plan)
        .bind(subscription.quantity)
        .bind(subscription.trial_ends_at)
        .bind(subscription.ends_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to save subscription: {}", e))
        })?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                subscription.subscription_id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_subscriptions(&self, owner_id: Uuid) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE owner_id = $1 ORDER BY created_at DESC, subscription_id DESC",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list subscriptions: {}", e))
        })?;

        timer.observe_duration();
        Ok(subscriptions)
    }

    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}
