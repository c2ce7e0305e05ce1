//! Metrics module for billing-service.
//! Provides Prometheus metrics for gateway traffic and subscription transitions.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Payment gateway request counter
pub static GATEWAY_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment gateway request duration histogram
pub static GATEWAY_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Subscription transitions counter
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Charges and invoices counter
pub static BILLING_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    GATEWAY_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_gateway_requests_total",
                "Total payment gateway requests by operation and outcome"
            ),
            &["operation", "outcome"]
        )
        .expect("Failed to register GATEWAY_REQUESTS_TOTAL")
    });

    // Gateway round trips are dominated by network latency
    GATEWAY_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "billing_gateway_request_duration_seconds",
                "Payment gateway request duration",
                vec![0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            ),
            &["operation"]
        )
        .expect("Failed to register GATEWAY_REQUEST_DURATION")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_subscription_operations_total",
                "Total subscription operations by name and operation type"
            ),
            &["subscription", "operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    BILLING_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_operations_total",
                "Total customer billing operations by type and outcome"
            ),
            &["operation", "outcome"]
        )
        .expect("Failed to register BILLING_OPERATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a payment gateway request.
pub fn record_gateway_request(operation: &str, outcome: &str) {
    if let Some(counter) = GATEWAY_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
}

/// Record payment gateway request duration.
pub fn record_gateway_request_duration(operation: &str, duration_secs: f64) {
    if let Some(histogram) = GATEWAY_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}

/// Record a subscription operation.
pub fn record_subscription_operation(subscription: &str, operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[subscription, operation]).inc();
    }
}

/// Record a charge, refund or invoice operation.
pub fn record_billing_operation(operation: &str, outcome: &str) {
    if let Some(counter) = BILLING_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
