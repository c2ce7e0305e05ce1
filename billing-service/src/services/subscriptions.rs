//! Subscription lifecycle transitions.
//!
//! Every transition talks to the gateway first and writes the local row
//! afterwards. Local fields are set to what was requested, not re-read from
//! the gateway. The caller's `Subscription` is only replaced once both the
//! remote call and the save succeed.

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    timestamp_to_utc, GatewayError, RemoteSubscription, SubscriptionUpdate, TrialEnd,
};
use crate::models::{Billable, Subscription, SubscriptionChange};
use crate::services::billing::{BillingService, InvoiceOutcome};
use crate::services::metrics::{record_error, record_subscription_operation};

pub struct SubscriptionService<B: Billable> {
    billing: BillingService<B>,
}

impl<B: Billable> Clone for SubscriptionService<B> {
    fn clone(&self) -> Self {
        Self {
            billing: self.billing.clone(),
        }
    }
}

impl<B: Billable> SubscriptionService<B> {
    pub fn new(billing: BillingService<B>) -> Self {
        Self { billing }
    }

    pub fn billing(&self) -> &BillingService<B> {
        &self.billing
    }

    /// Owner of the subscription.
    pub async fn owner(&self, subscription: &Subscription) -> BillingResult<B> {
        self.billing.find_billable(subscription.owner_id).await
    }

    /// Retrieve the remote subscription through the owner's customer.
    pub async fn as_remote_subscription(
        &self,
        subscription: &Subscription,
    ) -> BillingResult<RemoteSubscription> {
        let owner = self.owner(subscription).await?;
        self.remote_for(&owner, subscription).await
    }

    async fn remote_for(
        &self,
        owner: &B,
        subscription: &Subscription,
    ) -> BillingResult<RemoteSubscription> {
        let customer = owner.stripe_id().ok_or_else(|| {
            BillingError::Precondition("The customer does not have any subscriptions.".to_string())
        })?;

        let remote = self
            .billing
            .gateway()
            .retrieve_subscription(&subscription.stripe_id)
            .await?;

        if remote.customer != customer {
            return Err(GatewayError::NotFound {
                message: format!(
                    "Customer {} does not have a subscription with ID {}",
                    customer, subscription.stripe_id
                ),
            }
            .into());
        }

        Ok(remote)
    }

    async fn persist(
        &self,
        subscription: &mut Subscription,
        mut updated: Subscription,
    ) -> BillingResult<()> {
        updated.updated_at = Utc::now();
        self.billing
            .subscription_store()
            .save_subscription(&updated)
            .await?;
        *subscription = updated;
        Ok(())
    }

    fn track<T>(&self, subscription: &Subscription, operation: &str, result: &BillingResult<T>) {
        match result {
            Ok(_) => record_subscription_operation(&subscription.name, operation),
            Err(e) => {
                record_error(e.kind(), operation);
                warn!(
                    subscription_id = %subscription.subscription_id,
                    operation,
                    error = %e,
                    "Subscription operation failed"
                );
            }
        }
    }

    /// Move the subscription to `plan`, then invoice the owner.
    ///
    /// A running trial is carried over remotely; otherwise the trial ends now.
    /// The local `trial_ends_at` is left untouched either way.
    #[instrument(skip(self, subscription, change), fields(subscription_id = %subscription.subscription_id))]
    pub async fn swap(
        &self,
        subscription: &mut Subscription,
        plan: &str,
        change: SubscriptionChange,
    ) -> BillingResult<()> {
        let result = self.try_swap(subscription, plan, change).await;
        self.track(subscription, "swap", &result);
        result
    }

    async fn try_swap(
        &self,
        subscription: &mut Subscription,
        plan: &str,
        change: SubscriptionChange,
    ) -> BillingResult<()> {
        let owner = self.owner(subscription).await?;
        let remote = self.remote_for(&owner, subscription).await?;

        let update = SubscriptionUpdate {
            plan: Some(plan.to_string()),
            quantity: (subscription.quantity != 0).then_some(subscription.quantity),
            prorate: Some(change.prorate),
            trial_end: Some(TrialEnd::preserving(subscription.trial_ends_at, Utc::now())),
            billing_cycle_anchor: change.billing_cycle_anchor,
        };
        self.billing
            .gateway()
            .update_subscription(&remote.id, &update)
            .await?;

        self.billing.invoice(&owner).await?;

        let mut updated = subscription.clone();
        updated.stripe_plan = plan.to_string();
        updated.ends_at = None;
        self.persist(subscription, updated).await?;

        info!(plan, "Subscription swapped");
        Ok(())
    }

    /// Cancel at the end of the current period, entering the grace period.
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    pub async fn cancel(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let result = self.try_cancel(subscription).await;
        self.track(subscription, "cancel", &result);
        result
    }

    async fn try_cancel(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let remote = self.as_remote_subscription(subscription).await?;
        let cancelled = self
            .billing
            .gateway()
            .cancel_subscription(&remote.id, true)
            .await?;

        let mut updated = subscription.clone();
        updated.ends_at = if subscription.on_trial() {
            subscription.trial_ends_at
        } else {
            Some(timestamp_to_utc(cancelled.current_period_end)?)
        };
        self.persist(subscription, updated).await?;

        info!(ends_at = ?subscription.ends_at, "Subscription cancelled at period end");
        Ok(())
    }

    /// Cancel immediately, without a grace period.
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    pub async fn cancel_now(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let result = self.try_cancel_now(subscription).await;
        self.track(subscription, "cancel_now", &result);
        result
    }

    async fn try_cancel_now(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let remote = self.as_remote_subscription(subscription).await?;
        self.billing
            .gateway()
            .cancel_subscription(&remote.id, false)
            .await?;

        self.mark_as_cancelled(subscription).await
    }

    /// Record a cancellation that already happened remotely.
    pub async fn mark_as_cancelled(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let mut updated = subscription.clone();
        updated.ends_at = Some(Utc::now());
        self.persist(subscription, updated).await
    }

    /// Undo a scheduled cancellation while still in the grace period.
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    pub async fn resume(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let result = self.try_resume(subscription).await;
        self.track(subscription, "resume", &result);
        result
    }

    async fn try_resume(&self, subscription: &mut Subscription) -> BillingResult<()> {
        if !subscription.on_grace_period() {
            return Err(BillingError::Precondition(
                "Unable to resume subscription that is not within grace period.".to_string(),
            ));
        }

        let remote = self.as_remote_subscription(subscription).await?;
        let update = SubscriptionUpdate {
            plan: Some(subscription.stripe_plan.clone()),
            trial_end: Some(TrialEnd::preserving(subscription.trial_ends_at, Utc::now())),
            ..Default::default()
        };
        self.billing
            .gateway()
            .update_subscription(&remote.id, &update)
            .await?;

        let mut updated = subscription.clone();
        updated.ends_at = None;
        self.persist(subscription, updated).await?;

        info!("Subscription resumed");
        Ok(())
    }

    pub async fn increment_quantity(
        &self,
        subscription: &mut Subscription,
        count: i32,
        change: SubscriptionChange,
    ) -> BillingResult<()> {
        let quantity = subscription.quantity.saturating_add(count);
        self.update_quantity(subscription, quantity, change).await
    }

    /// Increase the quantity and invoice the owner immediately.
    pub async fn increment_and_invoice(
        &self,
        subscription: &mut Subscription,
        count: i32,
        change: SubscriptionChange,
    ) -> BillingResult<InvoiceOutcome> {
        self.increment_quantity(subscription, count, change).await?;
        let owner = self.owner(subscription).await?;
        self.billing.invoice(&owner).await
    }

    /// Decrease the quantity, never below 1.
    pub async fn decrement_quantity(
        &self,
        subscription: &mut Subscription,
        count: i32,
        change: SubscriptionChange,
    ) -> BillingResult<()> {
        let quantity = subscription.quantity.saturating_sub(count).max(1);
        self.update_quantity(subscription, quantity, change).await
    }

    #[instrument(skip(self, subscription, change), fields(subscription_id = %subscription.subscription_id))]
    pub async fn update_quantity(
        &self,
        subscription: &mut Subscription,
        quantity: i32,
        change: SubscriptionChange,
    ) -> BillingResult<()> {
        let result = self.try_update_quantity(subscription, quantity, change).await;
        self.track(subscription, "update_quantity", &result);
        result
    }

    async fn try_update_quantity(
        &self,
        subscription: &mut Subscription,
        quantity: i32,
        change: SubscriptionChange,
    ) -> BillingResult<()> {
        if quantity < 1 {
            return Err(BillingError::InvalidArgument(format!(
                "Subscription quantity must be at least 1, got {}.",
                quantity
            )));
        }

        let remote = self.as_remote_subscription(subscription).await?;
        let update = SubscriptionUpdate {
            quantity: Some(quantity),
            prorate: Some(change.prorate),
            ..Default::default()
        };
        self.billing
            .gateway()
            .update_subscription(&remote.id, &update)
            .await?;

        let mut updated = subscription.clone();
        updated.quantity = quantity;
        self.persist(subscription, updated).await?;

        info!(quantity, "Subscription quantity updated");
        Ok(())
    }
}
