//! Subscription lifecycle endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{BillingCycleAnchor, Owner, Subscription, SubscriptionChange, SubscriptionState};
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub stripe_id: String,
    pub stripe_plan: String,
    pub quantity: i32,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub state: SubscriptionState,
    pub valid: bool,
    pub on_trial: bool,
    pub on_grace_period: bool,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionResponse {
    fn from(subscription: &Subscription) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: subscription.subscription_id,
            owner_id: subscription.owner_id,
            name: subscription.name.clone(),
            stripe_id: subscription.stripe_id.clone(),
            stripe_plan: subscription.stripe_plan.clone(),
            quantity: subscription.quantity,
            trial_ends_at: subscription.trial_ends_at,
            ends_at: subscription.ends_at,
            state: subscription.state_at(now),
            valid: subscription.valid_at(now),
            on_trial: subscription.on_trial_at(now),
            on_grace_period: subscription.on_grace_period_at(now),
            cancelled: subscription.cancelled(),
            created_at: subscription.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediately: bool,
}

fn default_prorate() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
    pub plan: String,
    #[serde(default = "default_prorate")]
    pub prorate: bool,
    /// Restart the billing cycle at the moment of the swap.
    #[serde(default)]
    pub anchor_now: bool,
}

#[derive(Debug, Deserialize)]
pub struct QuantityRequest {
    pub quantity: i32,
    #[serde(default = "default_prorate")]
    pub prorate: bool,
}

fn change(prorate: bool, anchor_now: bool) -> SubscriptionChange {
    let mut change = SubscriptionChange::default();
    if !prorate {
        change = change.no_prorate();
    }
    if anchor_now {
        change = change.anchor_billing_cycle_on(BillingCycleAnchor::Now);
    }
    change
}

/// Load the owner and its current subscription named `name`.
async fn current_subscription(
    state: &AppState,
    owner_id: Uuid,
    name: &str,
) -> Result<(Owner, Subscription), AppError> {
    let owner = state.billing.find_billable(owner_id).await?;
    let subscription = state
        .billing
        .subscription(&owner, name)
        .await?
        .ok_or_else(|| BillingError::SubscriptionNotFound(format!("{}/{}", owner_id, name)))?;
    Ok((owner, subscription))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path((owner_id, name)): Path<(Uuid, String)>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let (_, subscription) = current_subscription(&state, owner_id, &name).await?;
    Ok(Json(SubscriptionResponse::from(&subscription)))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path((owner_id, name)): Path<(Uuid, String)>,
    request: Option<Json<CancelRequest>>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let Json(request) = request.unwrap_or_default();
    let (_, mut subscription) = current_subscription(&state, owner_id, &name).await?;

    if request.immediately {
        state.subscriptions.cancel_now(&mut subscription).await?;
    } else {
        state.subscriptions.cancel(&mut subscription).await?;
    }

    Ok(Json(SubscriptionResponse::from(&subscription)))
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    Path((owner_id, name)): Path<(Uuid, String)>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let (_, mut subscription) = current_subscription(&state, owner_id, &name).await?;
    state.subscriptions.resume(&mut subscription).await?;
    Ok(Json(SubscriptionResponse::from(&subscription)))
}

pub async fn swap_subscription(
    State(state): State<AppState>,
    Path((owner_id, name)): Path<(Uuid, String)>,
    Json(request): Json<SwapRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    if request.plan.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("plan must not be empty")));
    }

    let (_, mut subscription) = current_subscription(&state, owner_id, &name).await?;
    state
        .subscriptions
        .swap(
            &mut subscription,
            &request.plan,
            change(request.prorate, request.anchor_now),
        )
        .await?;
    Ok(Json(SubscriptionResponse::from(&subscription)))
}

pub async fn update_quantity(
    State(state): State<AppState>,
    Path((owner_id, name)): Path<(Uuid, String)>,
    Json(request): Json<QuantityRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let (_, mut subscription) = current_subscription(&state, owner_id, &name).await?;
    state
        .subscriptions
        .update_quantity(
            &mut subscription,
            request.quantity,
            change(request.prorate, false),
        )
        .await?;
    Ok(Json(SubscriptionResponse::from(&subscription)))
}
