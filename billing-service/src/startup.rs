//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::gateway::{PaymentGateway, StripeClient};
use crate::handlers::{self, health_check, metrics_handler, readiness_check};
use crate::models::{InvoiceHeader, Owner};
use crate::services::{init_metrics, BillingService, Database, SubscriptionService};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub billing: BillingService<Owner>,
    pub subscriptions: SubscriptionService<Owner>,
    pub invoice_header: InvoiceHeader,
}

impl AppState {
    pub fn new(billing: BillingService<Owner>, invoice_header: InvoiceHeader) -> Self {
        Self {
            subscriptions: SubscriptionService::new(billing.clone()),
            billing,
            invoice_header,
        }
    }
}

/// HTTP routes of the service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route(
            "/owners/:owner_id/subscriptions/:name",
            get(handlers::subscriptions::get_subscription),
        )
        .route(
            "/owners/:owner_id/subscriptions/:name/cancel",
            post(handlers::subscriptions::cancel_subscription),
        )
        .route(
            "/owners/:owner_id/subscriptions/:name/resume",
            post(handlers::subscriptions::resume_subscription),
        )
        .route(
            "/owners/:owner_id/subscriptions/:name/swap",
            post(handlers::subscriptions::swap_subscription),
        )
        .route(
            "/owners/:owner_id/subscriptions/:name/quantity",
            put(handlers::subscriptions::update_quantity),
        )
        .route(
            "/owners/:owner_id/invoices",
            get(handlers::invoices::list_invoices),
        )
        .route(
            "/owners/:owner_id/invoices/:invoice_id",
            get(handlers::invoices::get_invoice),
        )
        .route(
            "/owners/:owner_id/invoices/:invoice_id/download",
            get(handlers::invoices::download_invoice),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let db = Arc::new(db);

        let stripe = StripeClient::new(config.stripe.clone());
        if !stripe.is_configured() {
            tracing::warn!("STRIPE_SECRET is not set; gateway calls will fail");
        }
        let gateway: Arc<dyn PaymentGateway> = Arc::new(stripe);

        let billing = BillingService::with_store(gateway, db.clone(), &config.stripe.currency);
        let state = AppState::new(
            billing,
            InvoiceHeader::new(&config.invoice.vendor, &config.invoice.product),
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
