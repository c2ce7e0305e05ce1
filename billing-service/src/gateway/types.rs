//! Remote resources and request payloads exchanged with the payment gateway.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::GatewayError;
use crate::models::{BankAccount, BillingCycleAnchor, Card, PaymentSource};

/// Default page size for list endpoints.
pub const DEFAULT_LIST_LIMIT: u32 = 24;

/// Convert a gateway unix timestamp into UTC.
pub fn timestamp_to_utc(timestamp: i64) -> Result<DateTime<Utc>, GatewayError> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or(GatewayError::InvalidTimestamp(timestamp))
}

/// A page of gateway resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct List<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

/// Pagination for list endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub limit: u32,
    pub starting_after: Option<String>,
    pub ending_before: Option<String>,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            starting_after: None,
            ending_before: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub default_source: Option<String>,
    #[serde(default)]
    pub sources: List<PaymentSource>,
}

impl Customer {
    /// The source whose id matches `default_source`, if it is in the embedded page.
    pub fn default_payment_source(&self) -> Option<&PaymentSource> {
        let default_source = self.default_source.as_deref()?;
        self.sources
            .data
            .iter()
            .find(|source| source.id() == Some(default_source))
    }
}

/// A single-use tokenized card or bank account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub card: Option<Card>,
    #[serde(default)]
    pub bank_account: Option<BankAccount>,
}

impl Token {
    /// Id of the source wrapped by this token (`token[token.type].id`).
    pub fn source_id(&self) -> Option<&str> {
        match self.kind.as_str() {
            "card" => self.card.as_ref().map(|card| card.id.as_str()),
            "bank_account" => self.bank_account.as_ref().map(|account| account.id.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub charge: String,
    pub amount: i64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: String,
    pub customer: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRef {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Period {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    /// `subscription` or `invoiceitem`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub plan: Option<PlanRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInvoice {
    /// Upcoming invoices have no id yet.
    #[serde(default)]
    pub id: String,
    pub customer: String,
    pub currency: String,
    pub subtotal: i64,
    pub total: i64,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub starting_balance: i64,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub number: Option<String>,
    pub created: i64,
    #[serde(default)]
    pub lines: List<InvoiceLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    pub customer: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub plan: Option<PlanRef>,
    #[serde(default)]
    pub quantity: Option<i32>,
    pub current_period_end: i64,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

/// Trial end sent with subscription writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialEnd {
    /// End any running trial immediately.
    Now,
    At(DateTime<Utc>),
}

impl TrialEnd {
    /// Keep a still-running trial, otherwise end it now.
    pub fn preserving(trial_ends_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match trial_ends_at {
            Some(trial_ends_at) if now < trial_ends_at => TrialEnd::At(trial_ends_at),
            _ => TrialEnd::Now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateCustomer {
    pub email: Option<String>,
    pub description: Option<String>,
    /// Token attached as the initial default source.
    pub source: Option<String>,
    pub coupon: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCustomer {
    pub default_source: Option<String>,
    pub coupon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: i64,
    pub currency: String,
    pub customer: Option<String>,
    pub source: Option<String>,
    pub description: Option<String>,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub charge: String,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct InvoiceItemRequest {
    pub customer: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub customer: String,
    pub plan: String,
    pub quantity: i32,
    /// `None` leaves the plan's own trial in place.
    pub trial_end: Option<TrialEnd>,
    pub coupon: Option<String>,
    pub tax_percent: Option<Decimal>,
}

/// Partial update of a remote subscription; `None` fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionUpdate {
    pub plan: Option<String>,
    pub quantity: Option<i32>,
    pub prorate: Option<bool>,
    pub trial_end: Option<TrialEnd>,
    pub billing_cycle_anchor: Option<BillingCycleAnchor>,
}
