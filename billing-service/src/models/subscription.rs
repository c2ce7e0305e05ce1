//! Subscription model.
//!
//! A `Subscription` row mirrors one remote subscription resource. Its
//! lifecycle is never stored as a status column; it is derived from the
//! `trial_ends_at` and `ends_at` timestamps against the current instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Name used when an owner only has one subscription.
pub const DEFAULT_SUBSCRIPTION: &str = "default";

/// Lifecycle state derived from a subscription's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Trialing,
    Active,
    GracePeriod,
    Cancelled,
}

impl SubscriptionState {
    /// Classify a subscription at `now`.
    ///
    /// A scheduled cancellation outranks a running trial, so a subscription
    /// cancelled while trialing reports `GracePeriod` until `ends_at`. A
    /// future trial outranks a past `ends_at`: such a subscription is still
    /// `valid`, so it reports `Trialing`. `Cancelled` therefore always means
    /// not valid.
    pub fn derive(
        trial_ends_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let trialing = trial_ends_at.is_some_and(|trial_ends_at| now < trial_ends_at);
        match ends_at {
            Some(ends_at) if now < ends_at => SubscriptionState::GracePeriod,
            _ if trialing => SubscriptionState::Trialing,
            Some(_) => SubscriptionState::Cancelled,
            None => SubscriptionState::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Trialing => "trialing",
            SubscriptionState::Active => "active",
            SubscriptionState::GracePeriod => "grace_period",
            SubscriptionState::Cancelled => "cancelled",
        }
    }
}

/// Subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub stripe_id: String,
    pub stripe_plan: String,
    pub quantity: i32,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Build a fresh, not yet persisted subscription row.
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        stripe_id: impl Into<String>,
        stripe_plan: impl Into<String>,
        quantity: i32,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            stripe_id: stripe_id.into(),
            stripe_plan: stripe_plan.into(),
            quantity,
            trial_ends_at,
            ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> SubscriptionState {
        SubscriptionState::derive(self.trial_ends_at, self.ends_at, now)
    }

    /// Active, on trial, or within its grace period.
    pub fn valid(&self) -> bool {
        self.valid_at(Utc::now())
    }

    pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
        // `active_at` already covers the grace period; the third operand is
        // kept so the predicate reads the same as the documented contract.
        self.active_at(now) || self.on_trial_at(now) || self.on_grace_period_at(now)
    }

    /// Not cancelled, or cancelled but still within the grace period.
    pub fn active(&self) -> bool {
        self.active_at(Utc::now())
    }

    pub fn active_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_none() || self.on_grace_period_at(now)
    }

    /// A cancellation has been scheduled or has already taken effect.
    pub fn cancelled(&self) -> bool {
        self.ends_at.is_some()
    }

    pub fn on_trial(&self) -> bool {
        self.on_trial_at(Utc::now())
    }

    pub fn on_trial_at(&self, now: DateTime<Utc>) -> bool {
        self.trial_ends_at.is_some_and(|trial_ends_at| now < trial_ends_at)
    }

    pub fn on_grace_period(&self) -> bool {
        self.on_grace_period_at(Utc::now())
    }

    pub fn on_grace_period_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|ends_at| now < ends_at)
    }

    /// Forget the local trial end.
    ///
    /// Only the in-memory record changes. Pair it with `swap` or `resume`,
    /// which push the trial state to the gateway and persist the row.
    pub fn skip_trial(&mut self) -> &mut Self {
        self.trial_ends_at = None;
        self
    }
}

/// Where the next billing cycle should be anchored after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingCycleAnchor {
    Now,
    At(DateTime<Utc>),
}

/// Modifiers for a single mutating call (`swap`, `update_quantity`, ...).
///
/// The value is consumed by the call it is passed to; nothing is remembered
/// on the subscription afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub prorate: bool,
    pub billing_cycle_anchor: Option<BillingCycleAnchor>,
}

impl Default for SubscriptionChange {
    fn default() -> Self {
        Self {
            prorate: true,
            billing_cycle_anchor: None,
        }
    }
}

impl SubscriptionChange {
    pub fn no_prorate(mut self) -> Self {
        self.prorate = false;
        self
    }

    pub fn anchor_billing_cycle_on(mut self, anchor: BillingCycleAnchor) -> Self {
        self.billing_cycle_anchor = Some(anchor);
        self
    }
}
