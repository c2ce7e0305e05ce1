//! In-memory store for local development and tests.

use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{Billable, Subscription};
use crate::services::store::{BillableStore, SubscriptionStore};

/// Keeps owners and subscriptions in process memory.
pub struct InMemoryStore<B> {
    billables: Mutex<HashMap<Uuid, B>>,
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
}

impl<B> Default for InMemoryStore<B> {
    fn default() -> Self {
        Self {
            billables: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

fn poisoned() -> AppError {
    AppError::InternalError(anyhow::anyhow!("in-memory store lock poisoned"))
}

impl<B: Billable> InMemoryStore<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an owner without going through the billing service.
    pub fn insert_billable(&self, billable: B) -> Result<(), AppError> {
        self.billables
            .lock()
            .map_err(|_| poisoned())?
            .insert(billable.billable_id(), billable);
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .lock()
            .map(|subscriptions| subscriptions.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl<B: Billable> BillableStore<B> for InMemoryStore<B> {
    async fn get_billable(&self, billable_id: Uuid) -> Result<Option<B>, AppError> {
        let billables = self.billables.lock().map_err(|_| poisoned())?;
        Ok(billables.get(&billable_id).cloned())
    }

    async fn save_billable(&self, billable: &B) -> Result<(), AppError> {
        self.billables
            .lock()
            .map_err(|_| poisoned())?
            .insert(billable.billable_id(), billable.clone());
        Ok(())
    }
}

#[async_trait]
impl<B: Billable> SubscriptionStore for InMemoryStore<B> {
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let mut subscriptions = self.subscriptions.lock().map_err(|_| poisoned())?;
        if subscriptions.contains_key(&subscription.subscription_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription {} already exists",
                subscription.subscription_id
            )));
        }
        subscriptions.insert(subscription.subscription_id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let subscriptions = self.subscriptions.lock().map_err(|_| poisoned())?;
        Ok(subscriptions.get(&subscription_id).cloned())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let mut subscriptions = self.subscriptions.lock().map_err(|_| poisoned())?;
        match subscriptions.get_mut(&subscription.subscription_id) {
            Some(existing) => {
                *existing = subscription.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                subscription.subscription_id
            ))),
        }
    }

    async fn list_subscriptions(&self, owner_id: Uuid) -> Result<Vec<Subscription>, AppError> {
        let subscriptions = self.subscriptions.lock().map_err(|_| poisoned())?;
        let mut owned: Vec<Subscription> = subscriptions
            .values()
            .filter(|subscription| subscription.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.subscription_id.cmp(&a.subscription_id))
        });
        Ok(owned)
    }
}
