//! Subscription billing on top of a remote payment gateway.
//!
//! Owners implement [`models::Billable`]; [`services::BillingService`] runs
//! customer, card, charge and invoice operations for them, and
//! [`services::SubscriptionService`] drives subscription transitions.

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::{BillingError, BillingResult};
