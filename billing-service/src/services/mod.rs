//! Services module for billing-service.

pub mod billing;
pub mod builder;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod subscriptions;

pub use billing::{
    BillingService, ChargeOptions, CustomerOptions, InvoiceItemOptions, InvoiceOutcome,
    RefundOptions,
};
pub use builder::SubscriptionBuilder;
pub use database::Database;
pub use memory::InMemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_billing_operation, record_error, record_gateway_request,
    record_gateway_request_duration, record_subscription_operation,
};
pub use store::{BillableStore, SubscriptionStore};
pub use subscriptions::SubscriptionService;
