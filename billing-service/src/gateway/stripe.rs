//! Stripe payment gateway client.
//!
//! Talks to the Stripe REST API with form-encoded bodies and bearer
//! authentication.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::config::StripeConfig;
use crate::gateway::types::*;
use crate::gateway::{GatewayError, PaymentGateway};
use crate::models::{BillingCycleAnchor, Card, PaymentSource};
use crate::services::metrics::{record_gateway_request, record_gateway_request_duration};

/// Stripe client for interacting with the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

/// Ordered form parameters using Stripe's bracket notation for nesting.
#[derive(Debug, Default)]
struct Form(Vec<(String, String)>);

impl Form {
    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.0.push((key.into(), value.to_string()));
        self
    }

    fn push_opt<V: ToString>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    fn metadata(&mut self, metadata: &BTreeMap<String, String>) -> &mut Self {
        for (key, value) in metadata {
            self.push(format!("metadata[{}]", key), value);
        }
        self
    }

    fn list(&mut self, params: &ListParams) -> &mut Self {
        self.push("limit", params.limit)
            .push_opt("starting_after", params.starting_after.as_deref())
            .push_opt("ending_before", params.ending_before.as_deref())
    }

    fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

fn trial_end_param(trial_end: TrialEnd) -> String {
    match trial_end {
        TrialEnd::Now => "now".to_string(),
        TrialEnd::At(at) => at.timestamp().to_string(),
    }
}

fn anchor_param(anchor: BillingCycleAnchor) -> String {
    match anchor {
        BillingCycleAnchor::Now => "now".to_string(),
        BillingCycleAnchor::At(at) => at.timestamp().to_string(),
    }
}

fn subscription_update_form(update: &SubscriptionUpdate) -> Form {
    let mut form = Form::new();
    form.push_opt("plan", update.plan.as_deref())
        .push_opt("quantity", update.quantity)
        .push_opt("prorate", update.prorate)
        .push_opt("trial_end", update.trial_end.map(trial_end_param))
        .push_opt(
            "billing_cycle_anchor",
            update.billing_cycle_anchor.map(anchor_param),
        );
    form
}

impl StripeClient {
    /// Create a new Stripe client.
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Stripe is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(self.config.secret_key.expose_secret())
    }

    fn get(&self, path: &str, query: &Form) -> RequestBuilder {
        self.request(Method::GET, path).query(query.pairs())
    }

    fn post(&self, path: &str, form: &Form) -> RequestBuilder {
        self.request(Method::POST, path).form(form.pairs())
    }

    fn delete(&self, path: &str, form: &Form) -> RequestBuilder {
        self.request(Method::DELETE, path).form(form.pairs())
    }

    /// Send a request, record metrics, and decode the body or the error envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        if !self.is_configured() {
            record_gateway_request(operation, "not_configured");
            return Err(GatewayError::NotConfigured);
        }

        let start = Instant::now();
        let result = self.exchange(operation, request).await;
        record_gateway_request_duration(operation, start.elapsed().as_secs_f64());

        match &result {
            Ok(_) => record_gateway_request(operation, "success"),
            Err(e) => record_gateway_request(operation, e.kind()),
        }

        result
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let response = request.send().await.map_err(|e| {
            error!(operation, error = %e, "Stripe API request failed");
            GatewayError::Transport(e)
        })?;

        let status = response.status();
        let body = response.text().await?;

        debug!(operation, status = %status, "Stripe API response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!(operation, error = %e, "Failed to parse Stripe response");
                GatewayError::Decode(e)
            })
        } else {
            let err = GatewayError::from_response(status.as_u16(), &body);
            error!(operation, status = %status, error = %err, "Stripe API error");
            Err(err)
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, request))]
    async fn create_customer(&self, request: &CreateCustomer) -> Result<Customer, GatewayError> {
        let mut form = Form::new();
        form.push_opt("email", request.email.as_deref())
            .push_opt("description", request.description.as_deref())
            .push_opt("source", request.source.as_deref())
            .push_opt("coupon", request.coupon.as_deref())
            .metadata(&request.metadata);

        let customer: Customer = self
            .send("create_customer", self.post("/customers", &form))
            .await?;
        info!(customer_id = %customer.id, "Stripe customer created");
        Ok(customer)
    }

    #[instrument(skip(self))]
    async fn retrieve_customer(&self, customer_id: &str) -> Result<Customer, GatewayError> {
        self.send(
            "retrieve_customer",
            self.get(&format!("/customers/{}", customer_id), &Form::new()),
        )
        .await
    }

    #[instrument(skip(self, update))]
    async fn update_customer(
        &self,
        customer_id: &str,
        update: &UpdateCustomer,
    ) -> Result<Customer, GatewayError> {
        let mut form = Form::new();
        form.push_opt("default_source", update.default_source.as_deref())
            .push_opt("coupon", update.coupon.as_deref());

        self.send(
            "update_customer",
            self.post(&format!("/customers/{}", customer_id), &form),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn retrieve_token(&self, token_id: &str) -> Result<Token, GatewayError> {
        self.send(
            "retrieve_token",
            self.get(&format!("/tokens/{}", token_id), &Form::new()),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn create_source(
        &self,
        customer_id: &str,
        token_id: &str,
    ) -> Result<PaymentSource, GatewayError> {
        let mut form = Form::new();
        form.push("source", token_id);

        self.send(
            "create_source",
            self.post(&format!("/customers/{}/sources", customer_id), &form),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn retrieve_source(
        &self,
        customer_id: &str,
        source_id: &str,
    ) -> Result<PaymentSource, GatewayError> {
        self.send(
            "retrieve_source",
            self.get(
                &format!("/customers/{}/sources/{}", customer_id, source_id),
                &Form::new(),
            ),
        )
        .await
    }

    #[instrument(skip(self, params))]
    async fn list_cards(
        &self,
        customer_id: &str,
        params: &ListParams,
    ) -> Result<List<Card>, GatewayError> {
        let mut query = Form::new();
        query.push("object", "card").list(params);

        self.send(
            "list_cards",
            self.get(&format!("/customers/{}/sources", customer_id), &query),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_source(
        &self,
        customer_id: &str,
        source_id: &str,
    ) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .send(
                "delete_source",
                self.delete(
                    &format!("/customers/{}/sources/{}", customer_id, source_id),
                    &Form::new(),
                ),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(amount = request.amount, currency = %request.currency))]
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
        let mut form = Form::new();
        form.push("amount", request.amount)
            .push("currency", &request.currency)
            .push_opt("customer", request.customer.as_deref())
            .push_opt("source", request.source.as_deref())
            .push_opt("description", request.description.as_deref())
            .push_opt("receipt_email", request.receipt_email.as_deref())
            .metadata(&request.metadata);

        let charge: Charge = self.send("create_charge", self.post("/charges", &form)).await?;
        info!(charge_id = %charge.id, amount = charge.amount, "Stripe charge created");
        Ok(charge)
    }

    #[instrument(skip(self, request), fields(charge = %request.charge))]
    async fn create_refund(&self, request: &RefundRequest) -> Result<Refund, GatewayError> {
        let mut form = Form::new();
        form.push("charge", &request.charge)
            .push_opt("amount", request.amount)
            .push_opt("reason", request.reason.as_deref())
            .metadata(&request.metadata);

        self.send("create_refund", self.post("/refunds", &form)).await
    }

    #[instrument(skip(self, request), fields(customer = %request.customer))]
    async fn create_invoice_item(
        &self,
        request: &InvoiceItemRequest,
    ) -> Result<InvoiceItem, GatewayError> {
        let mut form = Form::new();
        form.push("customer", &request.customer)
            .push("amount", request.amount)
            .push("currency", &request.currency)
            .push("description", &request.description)
            .metadata(&request.metadata);

        self.send("create_invoice_item", self.post("/invoiceitems", &form))
            .await
    }

    #[instrument(skip(self))]
    async fn create_invoice(&self, customer_id: &str) -> Result<RemoteInvoice, GatewayError> {
        let mut form = Form::new();
        form.push("customer", customer_id);

        self.send("create_invoice", self.post("/invoices", &form)).await
    }

    #[instrument(skip(self))]
    async fn pay_invoice(&self, invoice_id: &str) -> Result<RemoteInvoice, GatewayError> {
        self.send(
            "pay_invoice",
            self.post(&format!("/invoices/{}/pay", invoice_id), &Form::new()),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn upcoming_invoice(&self, customer_id: &str) -> Result<RemoteInvoice, GatewayError> {
        let mut query = Form::new();
        query.push("customer", customer_id);

        self.send("upcoming_invoice", self.get("/invoices/upcoming", &query))
            .await
    }

    #[instrument(skip(self))]
    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<RemoteInvoice, GatewayError> {
        self.send(
            "retrieve_invoice",
            self.get(&format!("/invoices/{}", invoice_id), &Form::new()),
        )
        .await
    }

    #[instrument(skip(self, params))]
    async fn list_invoices(
        &self,
        customer_id: &str,
        params: &ListParams,
    ) -> Result<List<RemoteInvoice>, GatewayError> {
        let mut query = Form::new();
        query.push("customer", customer_id).list(params);

        self.send("list_invoices", self.get("/invoices", &query)).await
    }

    #[instrument(skip(self, request), fields(customer = %request.customer, plan = %request.plan))]
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, GatewayError> {
        let mut form = Form::new();
        form.push("customer", &request.customer)
            .push("plan", &request.plan)
            .push("quantity", request.quantity)
            .push_opt("trial_end", request.trial_end.map(trial_end_param))
            .push_opt("coupon", request.coupon.as_deref())
            .push_opt("tax_percent", request.tax_percent);

        let subscription: RemoteSubscription = self
            .send("create_subscription", self.post("/subscriptions", &form))
            .await?;
        info!(subscription_id = %subscription.id, "Stripe subscription created");
        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.send(
            "retrieve_subscription",
            self.get(&format!("/subscriptions/{}", subscription_id), &Form::new()),
        )
        .await
    }

    #[instrument(skip(self, update))]
    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.send(
            "update_subscription",
            self.post(
                &format!("/subscriptions/{}", subscription_id),
                &subscription_update_form(update),
            ),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<RemoteSubscription, GatewayError> {
        let mut form = Form::new();
        if at_period_end {
            form.push("at_period_end", true);
        }

        self.send(
            "cancel_subscription",
            self.delete(&format!("/subscriptions/{}", subscription_id), &form),
        )
        .await
    }
}
