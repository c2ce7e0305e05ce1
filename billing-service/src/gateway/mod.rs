//! Payment gateway abstraction.
//!
//! Every call is a single request/response exchange keyed by opaque string
//! ids. Implementations never retry.

pub mod stripe;
pub mod types;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Card, PaymentSource};

pub use stripe::StripeClient;
pub use types::*;

/// Errors returned by a payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway credentials not configured")]
    NotConfigured,

    #[error("invalid request: {message}")]
    InvalidRequest {
        status: u16,
        code: Option<String>,
        param: Option<String>,
        message: String,
    },

    #[error("resource not found: {message}")]
    NotFound { message: String },

    #[error("card error: {message}")]
    Card {
        code: Option<String>,
        decline_code: Option<String>,
        message: String,
    },

    #[error("authentication with payment gateway failed: {0}")]
    Authentication(String),

    #[error("rate limited by payment gateway: {0}")]
    RateLimited(String),

    #[error("payment gateway error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("payment gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode payment gateway response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("payment gateway returned an out-of-range timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Error envelope returned by the gateway on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    param: Option<String>,
    message: Option<String>,
}

impl GatewayError {
    /// Classify a non-2xx response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
            return GatewayError::Api {
                status,
                message: body.to_string(),
            };
        };

        let error = envelope.error;
        let message = error.message.unwrap_or_else(|| "unknown error".to_string());

        match (error.kind.as_deref(), status) {
            (Some("card_error"), _) | (_, 402) => GatewayError::Card {
                code: error.code,
                decline_code: error.decline_code,
                message,
            },
            (_, 401) => GatewayError::Authentication(message),
            (_, 429) => GatewayError::RateLimited(message),
            (Some("invalid_request_error"), 404) | (None, 404) => {
                GatewayError::NotFound { message }
            }
            (Some("invalid_request_error"), _) | (None, 400) => GatewayError::InvalidRequest {
                status,
                code: error.code,
                param: error.param,
                message,
            },
            _ => GatewayError::Api { status, message },
        }
    }

    /// The gateway rejected the request itself (bad parameters, unknown id).
    ///
    /// Read paths that report "nothing found" instead of failing suppress
    /// exactly this class.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidRequest { .. } | GatewayError::NotFound { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotConfigured => "not_configured",
            GatewayError::InvalidRequest { .. } => "invalid_request",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Card { .. } => "card",
            GatewayError::Authentication(_) => "authentication",
            GatewayError::RateLimited(_) => "rate_limited",
            GatewayError::Api { .. } => "api",
            GatewayError::Transport(_) => "transport",
            GatewayError::Decode(_) | GatewayError::InvalidTimestamp(_) => "decode",
        }
    }
}

/// Remote payment gateway: customers, sources, charges, invoices and subscriptions.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    // Customers

    async fn create_customer(&self, request: &CreateCustomer) -> Result<Customer, GatewayError>;

    async fn retrieve_customer(&self, customer_id: &str) -> Result<Customer, GatewayError>;

    async fn update_customer(
        &self,
        customer_id: &str,
        update: &UpdateCustomer,
    ) -> Result<Customer, GatewayError>;

    // Tokens and sources

    async fn retrieve_token(&self, token_id: &str) -> Result<Token, GatewayError>;

    async fn create_source(
        &self,
        customer_id: &str,
        token_id: &str,
    ) -> Result<PaymentSource, GatewayError>;

    async fn retrieve_source(
        &self,
        customer_id: &str,
        source_id: &str,
    ) -> Result<PaymentSource, GatewayError>;

    async fn list_cards(
        &self,
        customer_id: &str,
        params: &ListParams,
    ) -> Result<List<Card>, GatewayError>;

    async fn delete_source(&self, customer_id: &str, source_id: &str)
        -> Result<(), GatewayError>;

    // Charges

    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError>;

    async fn create_refund(&self, request: &RefundRequest) -> Result<Refund, GatewayError>;

    // Invoices

    async fn create_invoice_item(
        &self,
        request: &InvoiceItemRequest,
    ) -> Result<InvoiceItem, GatewayError>;

    async fn create_invoice(&self, customer_id: &str) -> Result<RemoteInvoice, GatewayError>;

    async fn pay_invoice(&self, invoice_id: &str) -> Result<RemoteInvoice, GatewayError>;

    async fn upcoming_invoice(&self, customer_id: &str) -> Result<RemoteInvoice, GatewayError>;

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<RemoteInvoice, GatewayError>;

    async fn list_invoices(
        &self,
        customer_id: &str,
        params: &ListParams,
    ) -> Result<List<RemoteInvoice>, GatewayError>;

    // Subscriptions

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, GatewayError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<RemoteSubscription, GatewayError>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<RemoteSubscription, GatewayError>;

    /// Cancel immediately, or at the end of the current period.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<RemoteSubscription, GatewayError>;
}
