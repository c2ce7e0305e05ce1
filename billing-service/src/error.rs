//! Billing errors and their HTTP mapping.

use service_core::error::AppError;
use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum BillingError {
    /// The operation is not allowed in the current state.
    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("invoice not found")]
    InvoiceNotFound,

    /// The invoice exists but belongs to another customer.
    #[error("invoice does not belong to this owner")]
    InvoiceForbidden,

    #[error("owner not found: {0}")]
    OwnerNotFound(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] AppError),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl BillingError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::Precondition(_) => "precondition",
            BillingError::InvalidArgument(_) => "invalid_argument",
            BillingError::InvoiceNotFound => "invoice_not_found",
            BillingError::InvoiceForbidden => "invoice_forbidden",
            BillingError::OwnerNotFound(_) => "owner_not_found",
            BillingError::SubscriptionNotFound(_) => "subscription_not_found",
            BillingError::Gateway(_) => "gateway",
            BillingError::Store(_) => "store",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Precondition(message) => AppError::Conflict(anyhow::anyhow!(message)),
            BillingError::InvalidArgument(message) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            BillingError::InvoiceNotFound
            | BillingError::OwnerNotFound(_)
            | BillingError::SubscriptionNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            BillingError::InvoiceForbidden => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            BillingError::Gateway(e) if e.is_invalid_request() => {
                AppError::BadRequest(anyhow::Error::new(e))
            }
            BillingError::Gateway(e) => AppError::BadGateway(e.to_string()),
            BillingError::Store(e) => e,
        }
    }
}
