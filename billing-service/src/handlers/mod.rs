//! HTTP handlers for billing-service.

pub mod health;
pub mod invoices;
pub mod subscriptions;

pub use health::{health_check, metrics_handler, readiness_check};
