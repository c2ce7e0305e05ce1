//! Persistence contracts for owners and subscriptions.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{Billable, Subscription};

/// Loads and saves billable owners.
#[async_trait]
pub trait BillableStore<B: Billable>: Send + Sync {
    async fn get_billable(&self, billable_id: Uuid) -> Result<Option<B>, AppError>;

    /// Persist the owner's current field values.
    async fn save_billable(&self, billable: &B) -> Result<(), AppError>;
}

/// Loads and saves subscription rows.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;

    async fn get_subscription(&self, subscription_id: Uuid)
        -> Result<Option<Subscription>, AppError>;

    /// Persist the subscription's current field values.
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;

    /// All subscriptions of an owner, most recently created first.
    async fn list_subscriptions(&self, owner_id: Uuid) -> Result<Vec<Subscription>, AppError>;

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
