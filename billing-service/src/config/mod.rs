//! Billing service configuration, loaded from the environment.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::Config as CommonConfig;
use std::env;

pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
pub const DEFAULT_CURRENCY: &str = "usd";

#[derive(Deserialize, Clone, Debug)]
pub struct BillingConfig {
    pub common: CommonConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub invoice: InvoiceConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub api_base_url: String,
    /// Currency used when a charge does not name one.
    pub currency: String,
}

/// Vendor details printed on downloaded receipts.
#[derive(Deserialize, Clone, Debug)]
pub struct InvoiceConfig {
    pub vendor: String,
    pub product: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        Err(_) => Ok(default),
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let common = CommonConfig::load().context("Failed to load common configuration")?;

        let database_url =
            env::var("BILLING_DATABASE_URL").context("BILLING_DATABASE_URL must be set")?;

        Ok(Self {
            common,
            service_name: var_or("BILLING_SERVICE_NAME", "billing-service"),
            log_level: var_or("BILLING_LOG_LEVEL", "info"),
            otlp_endpoint: env::var("BILLING_OTLP_ENDPOINT")
                .ok()
                .filter(|endpoint| !endpoint.is_empty()),
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_or("BILLING_DB_MAX_CONNECTIONS", 10)?,
                min_connections: parse_or("BILLING_DB_MIN_CONNECTIONS", 2)?,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(var_or("STRIPE_SECRET", "")),
                api_base_url: var_or("STRIPE_API_BASE", DEFAULT_STRIPE_API_BASE),
                currency: var_or("BILLING_CURRENCY", DEFAULT_CURRENCY).to_lowercase(),
            },
            invoice: InvoiceConfig {
                vendor: var_or("BILLING_INVOICE_VENDOR", "Billing"),
                product: var_or("BILLING_INVOICE_PRODUCT", "Subscription"),
            },
        })
    }
}
