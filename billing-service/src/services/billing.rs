//! Customer-level billing operations for any [`Billable`] owner.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    Charge, ChargeRequest, CreateCustomer, Customer, GatewayError, InvoiceItem,
    InvoiceItemRequest, ListParams, PaymentGateway, Refund, RefundRequest, UpdateCustomer,
};
use crate::models::{
    Billable, Card, Invoice, InvoiceDocument, InvoiceHeader, PaymentSource, Subscription,
    DEFAULT_SUBSCRIPTION,
};
use crate::services::builder::SubscriptionBuilder;
use crate::services::metrics::{record_billing_operation, record_error};
use crate::services::store::{BillableStore, SubscriptionStore};

/// Options for a one-off charge.
#[derive(Debug, Clone, Default)]
pub struct ChargeOptions {
    /// Defaults to the configured currency.
    pub currency: Option<String>,
    /// Charge this source instead of the owner's default one.
    pub source: Option<String>,
    pub customer: Option<String>,
    pub description: Option<String>,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RefundOptions {
    /// Partial refund amount; the whole charge when unset.
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceItemOptions {
    pub currency: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Options for creating the remote customer.
#[derive(Debug, Clone, Default)]
pub struct CustomerOptions {
    /// Defaults to the owner's email.
    pub email: Option<String>,
    pub description: Option<String>,
    pub coupon: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Result of invoicing an owner outside the regular billing cycle.
#[derive(Debug, Clone)]
pub enum InvoiceOutcome {
    /// The owner is not a remote customer yet.
    NothingToInvoice,
    Invoiced(Invoice),
    /// The gateway rejected the invoice, e.g. because nothing is pending.
    Declined,
}

impl InvoiceOutcome {
    /// Truthiness of the outcome: only `Declined` is a failure.
    pub fn succeeded(&self) -> bool {
        !matches!(self, InvoiceOutcome::Declined)
    }

    pub fn invoice(&self) -> Option<&Invoice> {
        match self {
            InvoiceOutcome::Invoiced(invoice) => Some(invoice),
            _ => None,
        }
    }
}

/// Billing operations over the payment gateway and the local stores.
pub struct BillingService<B: Billable> {
    gateway: Arc<dyn PaymentGateway>,
    billables: Arc<dyn BillableStore<B>>,
    subscriptions: Arc<dyn SubscriptionStore>,
    currency: String,
}

impl<B: Billable> Clone for BillingService<B> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            billables: self.billables.clone(),
            subscriptions: self.subscriptions.clone(),
            currency: self.currency.clone(),
        }
    }
}

impl<B: Billable> BillingService<B> {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        billables: Arc<dyn BillableStore<B>>,
        subscriptions: Arc<dyn SubscriptionStore>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            billables,
            subscriptions,
            currency: currency.into().to_lowercase(),
        }
    }

    /// Build a service whose owners and subscriptions live in the same store.
    pub fn with_store<S>(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<S>,
        currency: impl Into<String>,
    ) -> Self
    where
        S: BillableStore<B> + SubscriptionStore + 'static,
    {
        Self::new(gateway, store.clone(), store, currency)
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    pub fn billable_store(&self) -> &dyn BillableStore<B> {
        self.billables.as_ref()
    }

    pub fn subscription_store(&self) -> &dyn SubscriptionStore {
        self.subscriptions.as_ref()
    }

    /// Currency used when an operation does not name one.
    pub fn preferred_currency(&self) -> &str {
        &self.currency
    }

    /// Tax percentage applied to new subscriptions.
    pub fn tax_percentage(&self, _owner: &B) -> Decimal {
        Decimal::ZERO
    }

    /// Load an owner by id.
    pub async fn find_billable(&self, billable_id: Uuid) -> BillingResult<B> {
        self.billables
            .get_billable(billable_id)
            .await?
            .ok_or_else(|| BillingError::OwnerNotFound(billable_id.to_string()))
    }

    fn customer_id<'b>(&self, owner: &'b B) -> BillingResult<&'b str> {
        owner.stripe_id().ok_or_else(|| {
            BillingError::Precondition(format!(
                "{} is not a Stripe customer. See the create_as_customer method.",
                owner.billable_kind()
            ))
        })
    }

    // =========================================================================
    // Charges
    // =========================================================================

    /// Make a one-off charge for `amount` minor units.
    #[instrument(skip(self, owner, options), fields(owner_id = %owner.billable_id()))]
    pub async fn charge(
        &self,
        owner: &B,
        amount: i64,
        options: ChargeOptions,
    ) -> BillingResult<Charge> {
        // Without an explicit source the owner's own customer is charged.
        let customer = match &options.source {
            None => owner.stripe_id().map(str::to_string).or(options.customer),
            Some(_) => options.customer,
        };

        if options.source.is_none() && customer.is_none() {
            return Err(BillingError::InvalidArgument(
                "No payment source provided.".to_string(),
            ));
        }

        let request = ChargeRequest {
            amount,
            currency: options
                .currency
                .unwrap_or_else(|| self.currency.clone())
                .to_lowercase(),
            customer,
            source: options.source,
            description: options.description,
            receipt_email: options.receipt_email,
            metadata: options.metadata,
        };

        let result = self.gateway.create_charge(&request).await;
        self.track("charge", &result);
        Ok(result?)
    }

    /// Refund a charge, fully unless an amount is given.
    #[instrument(skip(self, options))]
    pub async fn refund(&self, charge_id: &str, options: RefundOptions) -> BillingResult<Refund> {
        let request = RefundRequest {
            charge: charge_id.to_string(),
            amount: options.amount,
            reason: options.reason,
            metadata: options.metadata,
        };

        let result = self.gateway.create_refund(&request).await;
        self.track("refund", &result);
        Ok(result?)
    }

    pub fn has_card_on_file(&self, owner: &B) -> bool {
        owner.has_card_on_file()
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Add an item to the owner's upcoming invoice.
    #[instrument(skip(self, owner, options), fields(owner_id = %owner.billable_id()))]
    pub async fn tab(
        &self,
        owner: &B,
        description: &str,
        amount: i64,
        options: InvoiceItemOptions,
    ) -> BillingResult<InvoiceItem> {
        let customer = owner.stripe_id().ok_or_else(|| {
            BillingError::InvalidArgument(format!(
                "{} is not a Stripe customer. See the create_as_customer method.",
                owner.billable_kind()
            ))
        })?;

        let request = InvoiceItemRequest {
            customer: customer.to_string(),
            amount,
            currency: options
                .currency
                .unwrap_or_else(|| self.currency.clone())
                .to_lowercase(),
            description: description.to_string(),
            metadata: options.metadata,
        };

        let result = self.gateway.create_invoice_item(&request).await;
        self.track("tab", &result);
        Ok(result?)
    }

    /// Add an item and invoice the owner immediately.
    pub async fn invoice_for(
        &self,
        owner: &B,
        description: &str,
        amount: i64,
        options: InvoiceItemOptions,
    ) -> BillingResult<InvoiceOutcome> {
        self.tab(owner, description, amount, options).await?;
        self.invoice(owner).await
    }

    /// Invoice the owner outside the regular billing cycle.
    #[instrument(skip(self, owner), fields(owner_id = %owner.billable_id()))]
    pub async fn invoice(&self, owner: &B) -> BillingResult<InvoiceOutcome> {
        let Some(customer) = owner.stripe_id() else {
            return Ok(InvoiceOutcome::NothingToInvoice);
        };

        let paid = match self.gateway.create_invoice(customer).await {
            Ok(created) => self.gateway.pay_invoice(&created.id).await,
            Err(e) => Err(e),
        };

        match paid {
            Ok(invoice) => {
                record_billing_operation("invoice", "success");
                info!(invoice_id = %invoice.id, total = invoice.total, "Owner invoiced");
                Ok(InvoiceOutcome::Invoiced(Invoice::new(invoice)?))
            }
            Err(e) if e.is_invalid_request() => {
                record_billing_operation("invoice", "declined");
                debug!(error = %e, "Invoice declined by gateway");
                Ok(InvoiceOutcome::Declined)
            }
            Err(e) => {
                record_billing_operation("invoice", "error");
                record_error(e.kind(), "invoice");
                Err(e.into())
            }
        }
    }

    /// The owner's upcoming invoice, if the gateway has one.
    #[instrument(skip(self, owner), fields(owner_id = %owner.billable_id()))]
    pub async fn upcoming_invoice(&self, owner: &B) -> BillingResult<Option<Invoice>> {
        let Some(customer) = owner.stripe_id() else {
            return Ok(None);
        };

        match self.gateway.upcoming_invoice(customer).await {
            Ok(invoice) => Ok(Some(Invoice::new(invoice)?)),
            Err(e) if e.is_invalid_request() => {
                debug!(error = %e, "No upcoming invoice");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an invoice by id; any gateway failure reads as "not found".
    #[instrument(skip(self, _owner))]
    pub async fn find_invoice(&self, _owner: &B, invoice_id: &str) -> Option<Invoice> {
        match self.gateway.retrieve_invoice(invoice_id).await {
            Ok(invoice) => Invoice::new(invoice).ok(),
            Err(e) => {
                debug!(error = %e, "Invoice lookup failed");
                None
            }
        }
    }

    /// Look up an invoice that must belong to `owner`.
    pub async fn find_invoice_or_fail(
        &self,
        owner: &B,
        invoice_id: &str,
    ) -> BillingResult<Invoice> {
        let invoice = self
            .find_invoice(owner, invoice_id)
            .await
            .ok_or(BillingError::InvoiceNotFound)?;

        if owner.stripe_id() != Some(invoice.customer()) {
            warn!(
                owner_id = %owner.billable_id(),
                invoice_id,
                "Invoice requested by an owner it does not belong to"
            );
            return Err(BillingError::InvoiceForbidden);
        }

        Ok(invoice)
    }

    /// Render a receipt for one of the owner's invoices.
    pub async fn download_invoice(
        &self,
        owner: &B,
        invoice_id: &str,
        header: &InvoiceHeader,
    ) -> BillingResult<InvoiceDocument> {
        let invoice = self.find_invoice_or_fail(owner, invoice_id).await?;
        Ok(InvoiceDocument::render(&invoice, header))
    }

    /// The owner's invoices, paid ones only unless `include_pending`.
    #[instrument(skip(self, owner, params), fields(owner_id = %owner.billable_id()))]
    pub async fn invoices(
        &self,
        owner: &B,
        include_pending: bool,
        params: ListParams,
    ) -> BillingResult<Vec<Invoice>> {
        let customer = self.customer_id(owner)?;
        let page = self.gateway.list_invoices(customer, &params).await?;

        let invoices = page
            .data
            .into_iter()
            .filter(|invoice| invoice.paid || include_pending)
            .map(Invoice::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(invoices)
    }

    pub async fn invoices_including_pending(
        &self,
        owner: &B,
        params: ListParams,
    ) -> BillingResult<Vec<Invoice>> {
        self.invoices(owner, true, params).await
    }

    // =========================================================================
    // Cards
    // =========================================================================

    #[instrument(skip(self, owner, params), fields(owner_id = %owner.billable_id()))]
    pub async fn cards(&self, owner: &B, params: ListParams) -> BillingResult<Vec<Card>> {
        let customer = self.customer_id(owner)?;
        Ok(self.gateway.list_cards(customer, &params).await?.data)
    }

    /// The customer's default payment source, card or bank account.
    pub async fn default_payment_source(
        &self,
        owner: &B,
    ) -> BillingResult<Option<PaymentSource>> {
        let customer = self.as_customer(owner).await?;
        Ok(customer.default_payment_source().cloned())
    }

    pub async fn default_card(&self, owner: &B) -> BillingResult<Option<Card>> {
        Ok(self
            .default_payment_source(owner)
            .await?
            .and_then(|source| source.as_card().cloned()))
    }

    /// Attach the tokenized card and make it the default source.
    #[instrument(skip(self, owner, token), fields(owner_id = %owner.billable_id()))]
    pub async fn update_card(&self, owner: &mut B, token: &str) -> BillingResult<()> {
        let customer = self.as_customer(owner).await?;
        let token = self.gateway.retrieve_token(token).await?;

        if token.source_id().is_some() && token.source_id() == customer.default_source.as_deref() {
            debug!("Card is already the default source");
            return Ok(());
        }

        let source = self.gateway.create_source(&customer.id, &token.id).await?;
        let source_id = source.id().map(str::to_string);

        let customer = self
            .gateway
            .update_customer(
                &customer.id,
                &UpdateCustomer {
                    default_source: source_id,
                    ..Default::default()
                },
            )
            .await?;

        if let Some(default_source) = customer.default_source.as_deref() {
            let source = self
                .gateway
                .retrieve_source(&customer.id, default_source)
                .await?;
            owner.fill_card_details(&source);
        }

        self.billables.save_billable(owner).await?;
        record_billing_operation("update_card", "success");
        info!(card_brand = ?owner.card_brand(), "Default card updated");
        Ok(())
    }

    /// Mirror the remote default source into the owner's card fields.
    pub async fn update_card_from_gateway(&self, owner: &mut B) -> BillingResult<()> {
        match self.default_payment_source(owner).await? {
            Some(source) => owner.fill_card_details(&source),
            None => owner.set_card_details(None, None),
        }

        self.billables.save_billable(owner).await?;
        Ok(())
    }

    /// Delete every card on the customer, then resync the card fields.
    #[instrument(skip(self, owner), fields(owner_id = %owner.billable_id()))]
    pub async fn delete_cards(&self, owner: &mut B) -> BillingResult<()> {
        let cards = self.cards(owner, ListParams::default()).await?;
        let customer = self.customer_id(owner)?.to_string();

        for card in &cards {
            self.gateway.delete_source(&customer, &card.id).await?;
        }
        info!(deleted = cards.len(), "Cards deleted");

        self.update_card_from_gateway(owner).await
    }

    // =========================================================================
    // Customers
    // =========================================================================

    #[instrument(skip(self, owner), fields(owner_id = %owner.billable_id()))]
    pub async fn apply_coupon(&self, owner: &B, coupon: &str) -> BillingResult<()> {
        let customer = self.customer_id(owner)?;
        self.gateway
            .update_customer(
                customer,
                &UpdateCustomer {
                    coupon: Some(coupon.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Create the remote customer, store its id, and attach `token` if given.
    #[instrument(skip(self, owner, token, options), fields(owner_id = %owner.billable_id()))]
    pub async fn create_as_customer(
        &self,
        owner: &mut B,
        token: Option<&str>,
        options: CustomerOptions,
    ) -> BillingResult<Customer> {
        let request = CreateCustomer {
            email: options.email.or_else(|| owner.email().map(str::to_string)),
            description: options.description,
            source: None,
            coupon: options.coupon,
            metadata: options.metadata,
        };

        let result = self.gateway.create_customer(&request).await;
        self.track("create_customer", &result);
        let customer = result?;

        owner.set_stripe_id(Some(customer.id.clone()));
        self.billables.save_billable(owner).await?;

        if let Some(token) = token {
            self.update_card(owner, token).await?;
        }

        Ok(customer)
    }

    /// Retrieve the owner's remote customer.
    pub async fn as_customer(&self, owner: &B) -> BillingResult<Customer> {
        let customer = self.customer_id(owner)?;
        Ok(self.gateway.retrieve_customer(customer).await?)
    }

    pub fn has_stripe_id(&self, owner: &B) -> bool {
        owner.has_stripe_id()
    }

    // =========================================================================
    // Subscription queries
    // =========================================================================

    /// Begin creating a new subscription.
    pub fn new_subscription(&self, name: &str, plan: &str) -> SubscriptionBuilder<'_, B> {
        SubscriptionBuilder::new(self, name, plan)
    }

    /// All of the owner's subscriptions, newest first.
    pub async fn subscriptions(&self, owner: &B) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .list_subscriptions(owner.billable_id())
            .await?)
    }

    /// The most recently created subscription with `name`.
    pub async fn subscription(
        &self,
        owner: &B,
        name: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .subscriptions(owner)
            .await?
            .into_iter()
            .find(|subscription| subscription.name == name))
    }

    /// On the owner-level trial, or trialing on the default subscription.
    pub async fn on_trial(&self, owner: &B) -> BillingResult<bool> {
        if self.on_generic_trial(owner) {
            return Ok(true);
        }
        self.on_trial_for(owner, DEFAULT_SUBSCRIPTION, None).await
    }

    /// Trialing on the named subscription, optionally on a specific plan.
    pub async fn on_trial_for(
        &self,
        owner: &B,
        name: &str,
        plan: Option<&str>,
    ) -> BillingResult<bool> {
        Ok(self.subscription(owner, name).await?.is_some_and(|subscription| {
            subscription.on_trial() && plan.map_or(true, |plan| subscription.stripe_plan == plan)
        }))
    }

    pub fn on_generic_trial(&self, owner: &B) -> bool {
        owner.on_generic_trial_at(Utc::now())
    }

    /// Holds a valid subscription with `name`, optionally on a specific plan.
    pub async fn subscribed(
        &self,
        owner: &B,
        name: &str,
        plan: Option<&str>,
    ) -> BillingResult<bool> {
        Ok(self.subscription(owner, name).await?.is_some_and(|subscription| {
            subscription.valid() && plan.map_or(true, |plan| subscription.stripe_plan == plan)
        }))
    }

    /// The named subscription is valid and on one of `plans`.
    pub async fn subscribed_to_plan(
        &self,
        owner: &B,
        plans: &[&str],
        name: &str,
    ) -> BillingResult<bool> {
        Ok(self.subscription(owner, name).await?.is_some_and(|subscription| {
            subscription.valid() && plans.contains(&subscription.stripe_plan.as_str())
        }))
    }

    /// Any valid subscription of the owner is on `plan`.
    pub async fn on_plan(&self, owner: &B, plan: &str) -> BillingResult<bool> {
        Ok(self
            .subscriptions(owner)
            .await?
            .iter()
            .any(|subscription| subscription.stripe_plan == plan && subscription.valid()))
    }

    fn track<T>(&self, operation: &str, result: &Result<T, GatewayError>) {
        match result {
            Ok(_) => record_billing_operation(operation, "success"),
            Err(e) => {
                record_billing_operation(operation, "error");
                record_error(e.kind(), operation);
            }
        }
    }
}
