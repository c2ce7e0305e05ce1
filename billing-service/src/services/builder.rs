//! Fluent creation of new subscriptions.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CreateSubscriptionRequest, TrialEnd};
use crate::models::{Billable, Subscription};
use crate::services::billing::{BillingService, CustomerOptions};
use crate::services::metrics::record_subscription_operation;

/// Collects the parameters of a subscription before it is created remotely
/// and persisted locally.
pub struct SubscriptionBuilder<'a, B: Billable> {
    billing: &'a BillingService<B>,
    name: String,
    plan: String,
    quantity: i32,
    trial_ends_at: Option<DateTime<Utc>>,
    /// Trial length that cannot be represented as an end date.
    invalid_trial_days: Option<i64>,
    skip_trial: bool,
    coupon: Option<String>,
}

impl<'a, B: Billable> SubscriptionBuilder<'a, B> {
    pub(crate) fn new(billing: &'a BillingService<B>, name: &str, plan: &str) -> Self {
        Self {
            billing,
            name: name.to_string(),
            plan: plan.to_string(),
            quantity: 1,
            trial_ends_at: None,
            invalid_trial_days: None,
            skip_trial: false,
            coupon: None,
        }
    }

    pub fn quantity(mut self, quantity: i32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Trial lasting `days` from now.
    ///
    /// An out-of-range `days` is reported by `create`.
    pub fn trial_days(mut self, days: i64) -> Self {
        match Duration::try_days(days).and_then(|trial| Utc::now().checked_add_signed(trial)) {
            Some(trial_ends_at) => {
                self.trial_ends_at = Some(trial_ends_at);
                self.invalid_trial_days = None;
            }
            None => self.invalid_trial_days = Some(days),
        }
        self
    }

    pub fn trial_until(mut self, trial_ends_at: DateTime<Utc>) -> Self {
        self.trial_ends_at = Some(trial_ends_at);
        self.invalid_trial_days = None;
        self
    }

    /// Start billing immediately, even if the plan has a trial.
    pub fn skip_trial(mut self) -> Self {
        self.skip_trial = true;
        self
    }

    pub fn with_coupon(mut self, coupon: impl Into<String>) -> Self {
        self.coupon = Some(coupon.into());
        self
    }

    fn trial_end(&self) -> Option<TrialEnd> {
        if self.skip_trial {
            Some(TrialEnd::Now)
        } else {
            self.trial_ends_at.map(TrialEnd::At)
        }
    }

    /// Create the subscription for an owner that is already a remote customer.
    pub async fn add(self, owner: &mut B) -> BillingResult<Subscription> {
        self.create(owner, None, CustomerOptions::default()).await
    }

    /// Create the subscription, making the owner a remote customer first if needed.
    #[instrument(skip(self, owner, token, options), fields(owner_id = %owner.billable_id(), name = %self.name, plan = %self.plan))]
    pub async fn create(
        self,
        owner: &mut B,
        token: Option<&str>,
        options: CustomerOptions,
    ) -> BillingResult<Subscription> {
        if self.quantity < 1 {
            return Err(BillingError::InvalidArgument(format!(
                "Subscription quantity must be at least 1, got {}.",
                self.quantity
            )));
        }

        if let Some(days) = self.invalid_trial_days {
            return Err(BillingError::InvalidArgument(format!(
                "Trial of {} days is out of range.",
                days
            )));
        }

        let customer_id = match owner.stripe_id() {
            Some(customer_id) => {
                let customer_id = customer_id.to_string();
                if let Some(token) = token {
                    self.billing.update_card(owner, token).await?;
                }
                customer_id
            }
            None => self.billing.create_as_customer(owner, token, options).await?.id,
        };

        let tax_percent = self.billing.tax_percentage(owner);
        let request = CreateSubscriptionRequest {
            customer: customer_id,
            plan: self.plan.clone(),
            quantity: self.quantity,
            trial_end: self.trial_end(),
            coupon: self.coupon.clone(),
            tax_percent: (tax_percent != Decimal::ZERO).then_some(tax_percent),
        };

        let remote = self.billing.gateway().create_subscription(&request).await?;

        let trial_ends_at = if self.skip_trial {
            None
        } else {
            self.trial_ends_at
        };
        let subscription = Subscription::new(
            owner.billable_id(),
            self.name.as_str(),
            remote.id,
            self.plan.as_str(),
            self.quantity,
            trial_ends_at,
        );

        self.billing
            .subscription_store()
            .create_subscription(&subscription)
            .await?;

        record_subscription_operation(&subscription.name, "create");
        info!(
            subscription_id = %subscription.subscription_id,
            stripe_id = %subscription.stripe_id,
            "Subscription created"
        );

        Ok(subscription)
    }
}
