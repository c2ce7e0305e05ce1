//! Test helper module for billing-service integration tests.
//!
//! Provides an in-process payment gateway double and fixtures backed by the
//! in-memory store, so most tests run without Postgres or network access.
//! Store tests against PostgreSQL use the `postgres` fixtures.

#![allow(dead_code)]

pub mod postgres;

use async_trait::async_trait;
use billing_service::gateway::*;
use billing_service::models::{BankAccount, Card, Owner, PaymentSource, Subscription};
use billing_service::services::{
    init_metrics, BillableStore, BillingService, InMemoryStore, SubscriptionService,
    SubscriptionStore,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Period end reported by the fake gateway for every subscription.
pub const PERIOD_END: i64 = 1_900_000_000;

/// Canned failure injected into the next call of one gateway operation.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    InvalidRequest,
    NotFound,
    CardDeclined,
    Server,
}

impl Failure {
    fn into_error(self) -> GatewayError {
        match self {
            Failure::InvalidRequest => GatewayError::InvalidRequest {
                status: 400,
                code: None,
                param: None,
                message: "injected invalid request".to_string(),
            },
            Failure::NotFound => GatewayError::NotFound {
                message: "injected missing resource".to_string(),
            },
            Failure::CardDeclined => GatewayError::Card {
                code: Some("card_declined".to_string()),
                decline_code: Some("generic_decline".to_string()),
                message: "Your card was declined.".to_string(),
            },
            Failure::Server => GatewayError::Api {
                status: 500,
                message: "injected server error".to_string(),
            },
        }
    }
}

#[derive(Default)]
pub struct FakeState {
    pub next_id: u32,
    pub customers: HashMap<String, Customer>,
    pub coupons: HashMap<String, String>,
    pub tokens: HashMap<String, Token>,
    pub subscriptions: HashMap<String, RemoteSubscription>,
    pub invoices: HashMap<String, RemoteInvoice>,
    pub pending_items: Vec<InvoiceItem>,
    pub charges: Vec<ChargeRequest>,
    pub refunds: Vec<RefundRequest>,
    pub created_customers: Vec<CreateCustomer>,
    pub created_subscriptions: Vec<CreateSubscriptionRequest>,
    pub subscription_updates: Vec<(String, SubscriptionUpdate)>,
    pub cancellations: Vec<(String, bool)>,
    pub deleted_sources: Vec<String>,
    pub calls: Vec<&'static str>,
    pub failures: HashMap<&'static str, Failure>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }
}

/// Payment gateway double that keeps remote resources in memory.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Fail the next call to `operation`.
    pub fn fail_next(&self, operation: &'static str, failure: Failure) {
        self.with_state(|state| state.failures.insert(operation, failure));
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with_state(|state| state.calls.clear());
    }

    pub fn was_called(&self, operation: &str) -> bool {
        self.calls().iter().any(|call| *call == operation)
    }

    pub fn add_customer(&self, email: &str) -> String {
        self.with_state(|state| {
            let id = state.next_id("cus");
            state.customers.insert(
                id.clone(),
                Customer {
                    id: id.clone(),
                    email: Some(email.to_string()),
                    default_source: None,
                    sources: List::default(),
                },
            );
            id
        })
    }

    pub fn customer(&self, id: &str) -> Option<Customer> {
        self.with_state(|state| state.customers.get(id).cloned())
    }

    /// Register a card token; returns the token id.
    pub fn add_card_token(&self, brand: &str, last4: &str) -> String {
        self.with_state(|state| {
            let token_id = state.next_id("tok");
            let card_id = state.next_id("card");
            state.tokens.insert(
                token_id.clone(),
                Token {
                    id: token_id.clone(),
                    kind: "card".to_string(),
                    card: Some(Card {
                        id: card_id,
                        brand: brand.to_string(),
                        last4: last4.to_string(),
                        exp_month: 12,
                        exp_year: 2034,
                        ..Default::default()
                    }),
                    bank_account: None,
                },
            );
            token_id
        })
    }

    pub fn add_bank_account_token(&self, last4: &str) -> String {
        self.with_state(|state| {
            let token_id = state.next_id("btok");
            let account_id = state.next_id("ba");
            state.tokens.insert(
                token_id.clone(),
                Token {
                    id: token_id.clone(),
                    kind: "bank_account".to_string(),
                    card: None,
                    bank_account: Some(BankAccount {
                        id: account_id,
                        last4: last4.to_string(),
                        bank_name: Some("STRIPE TEST BANK".to_string()),
                    }),
                },
            );
            token_id
        })
    }

    pub fn add_subscription(&self, customer: &str, plan: &str, quantity: i32) -> String {
        self.with_state(|state| {
            let id = state.next_id("sub");
            state.subscriptions.insert(
                id.clone(),
                RemoteSubscription {
                    id: id.clone(),
                    customer: customer.to_string(),
                    status: "active".to_string(),
                    plan: Some(PlanRef {
                        id: plan.to_string(),
                        nickname: None,
                    }),
                    quantity: Some(quantity),
                    current_period_end: PERIOD_END,
                    trial_end: None,
                    cancel_at_period_end: false,
                },
            );
            id
        })
    }

    pub fn remote_subscription(&self, id: &str) -> Option<RemoteSubscription> {
        self.with_state(|state| state.subscriptions.get(id).cloned())
    }

    pub fn add_invoice(&self, customer: &str, total: i64, paid: bool) -> String {
        self.with_state(|state| {
            let id = state.next_id("in");
            let created = 1_700_000_000 + i64::from(state.next_id);
            state.invoices.insert(
                id.clone(),
                invoice(&id, customer, total, paid, created, Vec::new()),
            );
            id
        })
    }

    pub fn last_subscription_update(&self) -> Option<(String, SubscriptionUpdate)> {
        self.with_state(|state| state.subscription_updates.last().cloned())
    }

    fn begin(&self, operation: &'static str) -> Result<(), GatewayError> {
        self.with_state(|state| {
            state.calls.push(operation);
            match state.failures.remove(operation) {
                Some(failure) => Err(failure.into_error()),
                None => Ok(()),
            }
        })
    }
}

fn not_found(kind: &str, id: &str) -> GatewayError {
    GatewayError::NotFound {
        message: format!("No such {}: {}", kind, id),
    }
}

fn invoice(
    id: &str,
    customer: &str,
    total: i64,
    paid: bool,
    created: i64,
    items: Vec<InvoiceItem>,
) -> RemoteInvoice {
    RemoteInvoice {
        id: id.to_string(),
        customer: customer.to_string(),
        currency: "usd".to_string(),
        subtotal: total,
        total,
        amount_due: if paid { 0 } else { total },
        starting_balance: 0,
        paid,
        number: None,
        created,
        lines: List {
            data: items
                .into_iter()
                .map(|item| InvoiceLine {
                    id: format!("il_{}", item.id),
                    amount: item.amount,
                    currency: item.currency,
                    description: item.description,
                    quantity: Some(1),
                    kind: "invoiceitem".to_string(),
                    period: None,
                    plan: None,
                })
                .collect(),
            has_more: false,
        },
    }
}

fn token_source(token: &Token) -> PaymentSource {
    match (&token.card, &token.bank_account) {
        (Some(card), _) => PaymentSource::Card(card.clone()),
        (None, Some(account)) => PaymentSource::BankAccount(account.clone()),
        (None, None) => PaymentSource::Other,
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(&self, request: &CreateCustomer) -> Result<Customer, GatewayError> {
        self.begin("create_customer")?;
        Ok(self.with_state(|state| {
            let id = state.next_id("cus");
            let customer = Customer {
                id: id.clone(),
                email: request.email.clone(),
                default_source: None,
                sources: List::default(),
            };
            state.created_customers.push(request.clone());
            state.customers.insert(id, customer.clone());
            customer
        }))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> Result<Customer, GatewayError> {
        self.begin("retrieve_customer")?;
        self.customer(customer_id)
            .ok_or_else(|| not_found("customer", customer_id))
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        update: &UpdateCustomer,
    ) -> Result<Customer, GatewayError> {
        self.begin("update_customer")?;
        self.with_state(|state| {
            if let Some(coupon) = &update.coupon {
                state
                    .coupons
                    .insert(customer_id.to_string(), coupon.clone());
            }
            let customer = state
                .customers
                .get_mut(customer_id)
                .ok_or_else(|| not_found("customer", customer_id))?;
            if let Some(default_source) = &update.default_source {
                customer.default_source = Some(default_source.clone());
            }
            Ok(customer.clone())
        })
    }

    async fn retrieve_token(&self, token_id: &str) -> Result<Token, GatewayError> {
        self.begin("retrieve_token")?;
        self.with_state(|state| state.tokens.get(token_id).cloned())
            .ok_or_else(|| not_found("token", token_id))
    }

    async fn create_source(
        &self,
        customer_id: &str,
        token_id: &str,
    ) -> Result<PaymentSource, GatewayError> {
        self.begin("create_source")?;
        self.with_state(|state| {
            let token = state
                .tokens
                .get(token_id)
                .cloned()
                .ok_or_else(|| not_found("token", token_id))?;
            let customer = state
                .customers
                .get_mut(customer_id)
                .ok_or_else(|| not_found("customer", customer_id))?;
            let source = token_source(&token);
            if customer.default_source.is_none() {
                customer.default_source = source.id().map(str::to_string);
            }
            customer.sources.data.push(source.clone());
            Ok(source)
        })
    }

    async fn retrieve_source(
        &self,
        customer_id: &str,
        source_id: &str,
    ) -> Result<PaymentSource, GatewayError> {
        self.begin("retrieve_source")?;
        self.customer(customer_id)
            .and_then(|customer| {
                customer
                    .sources
                    .data
                    .into_iter()
                    .find(|source| source.id() == Some(source_id))
            })
            .ok_or_else(|| not_found("source", source_id))
    }

    async fn list_cards(
        &self,
        customer_id: &str,
        params: &ListParams,
    ) -> Result<List<Card>, GatewayError> {
        self.begin("list_cards")?;
        let customer = self
            .customer(customer_id)
            .ok_or_else(|| not_found("customer", customer_id))?;
        let data: Vec<Card> = customer
            .sources
            .data
            .iter()
            .filter_map(|source| source.as_card().cloned())
            .take(params.limit as usize)
            .collect();
        Ok(List {
            data,
            has_more: false,
        })
    }

    async fn delete_source(&self, customer_id: &str, source_id: &str) -> Result<(), GatewayError> {
        self.begin("delete_source")?;
        self.with_state(|state| {
            let customer = state
                .customers
                .get_mut(customer_id)
                .ok_or_else(|| not_found("customer", customer_id))?;
            customer
                .sources
                .data
                .retain(|source| source.id() != Some(source_id));
            if customer.default_source.as_deref() == Some(source_id) {
                customer.default_source = customer
                    .sources
                    .data
                    .first()
                    .and_then(|source| source.id().map(str::to_string));
            }
            state.deleted_sources.push(source_id.to_string());
            Ok(())
        })
    }

    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
        self.begin("create_charge")?;
        Ok(self.with_state(|state| {
            state.charges.push(request.clone());
            Charge {
                id: state.next_id("ch"),
                amount: request.amount,
                currency: request.currency.clone(),
                customer: request.customer.clone(),
                description: request.description.clone(),
                paid: true,
                status: "succeeded".to_string(),
            }
        }))
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<Refund, GatewayError> {
        self.begin("create_refund")?;
        Ok(self.with_state(|state| {
            state.refunds.push(request.clone());
            Refund {
                id: state.next_id("re"),
                charge: request.charge.clone(),
                amount: request.amount.unwrap_or(0),
                status: "succeeded".to_string(),
            }
        }))
    }

    async fn create_invoice_item(
        &self,
        request: &InvoiceItemRequest,
    ) -> Result<InvoiceItem, GatewayError> {
        self.begin("create_invoice_item")?;
        Ok(self.with_state(|state| {
            let item = InvoiceItem {
                id: state.next_id("ii"),
                customer: request.customer.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
                description: Some(request.description.clone()),
            };
            state.pending_items.push(item.clone());
            item
        }))
    }

    async fn create_invoice(&self, customer_id: &str) -> Result<RemoteInvoice, GatewayError> {
        self.begin("create_invoice")?;
        self.with_state(|state| {
            let (items, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending_items)
                .into_iter()
                .partition(|item| item.customer == customer_id);
            state.pending_items = rest;

            if items.is_empty() {
                return Err(GatewayError::InvalidRequest {
                    status: 400,
                    code: Some("invoice_no_customer_line_items".to_string()),
                    param: None,
                    message: format!("Nothing to invoice for customer {}", customer_id),
                });
            }

            let id = state.next_id("in");
            let total = items.iter().map(|item| item.amount).sum();
            let created = 1_700_000_000 + i64::from(state.next_id);
            let created_invoice = invoice(&id, customer_id, total, false, created, items);
            state.invoices.insert(id, created_invoice.clone());
            Ok(created_invoice)
        })
    }

    async fn pay_invoice(&self, invoice_id: &str) -> Result<RemoteInvoice, GatewayError> {
        self.begin("pay_invoice")?;
        self.with_state(|state| {
            let invoice = state
                .invoices
                .get_mut(invoice_id)
                .ok_or_else(|| not_found("invoice", invoice_id))?;
            invoice.paid = true;
            invoice.amount_due = 0;
            Ok(invoice.clone())
        })
    }

    async fn upcoming_invoice(&self, customer_id: &str) -> Result<RemoteInvoice, GatewayError> {
        self.begin("upcoming_invoice")?;
        self.with_state(|state| {
            let items: Vec<InvoiceItem> = state
                .pending_items
                .iter()
                .filter(|item| item.customer == customer_id)
                .cloned()
                .collect();
            if items.is_empty() {
                return Err(GatewayError::InvalidRequest {
                    status: 400,
                    code: None,
                    param: None,
                    message: format!("No upcoming invoices for customer: {}", customer_id),
                });
            }
            let total = items.iter().map(|item| item.amount).sum();
            Ok(invoice("", customer_id, total, false, PERIOD_END, items))
        })
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<RemoteInvoice, GatewayError> {
        self.begin("retrieve_invoice")?;
        self.with_state(|state| state.invoices.get(invoice_id).cloned())
            .ok_or_else(|| not_found("invoice", invoice_id))
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        params: &ListParams,
    ) -> Result<List<RemoteInvoice>, GatewayError> {
        self.begin("list_invoices")?;
        let mut data: Vec<RemoteInvoice> = self.with_state(|state| {
            state
                .invoices
                .values()
                .filter(|invoice| invoice.customer == customer_id)
                .cloned()
                .collect()
        });
        data.sort_by(|a, b| b.created.cmp(&a.created));
        data.truncate(params.limit as usize);
        Ok(List {
            data,
            has_more: false,
        })
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.begin("create_subscription")?;
        self.with_state(|state| {
            if !state.customers.contains_key(&request.customer) {
                return Err(not_found("customer", &request.customer));
            }
            state.created_subscriptions.push(request.clone());
            let id = state.next_id("sub");
            let subscription = RemoteSubscription {
                id: id.clone(),
                customer: request.customer.clone(),
                status: "active".to_string(),
                plan: Some(PlanRef {
                    id: request.plan.clone(),
                    nickname: None,
                }),
                quantity: Some(request.quantity),
                current_period_end: PERIOD_END,
                trial_end: match request.trial_end {
                    Some(TrialEnd::At(at)) => Some(at.timestamp()),
                    _ => None,
                },
                cancel_at_period_end: false,
            };
            state.subscriptions.insert(id, subscription.clone());
            Ok(subscription)
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.begin("retrieve_subscription")?;
        self.remote_subscription(subscription_id)
            .ok_or_else(|| not_found("subscription", subscription_id))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.begin("update_subscription")?;
        self.with_state(|state| {
            state
                .subscription_updates
                .push((subscription_id.to_string(), update.clone()));
            let subscription = state
                .subscriptions
                .get_mut(subscription_id)
                .ok_or_else(|| not_found("subscription", subscription_id))?;
            if let Some(plan) = &update.plan {
                subscription.plan = Some(PlanRef {
                    id: plan.clone(),
                    nickname: None,
                });
                subscription.cancel_at_period_end = false;
            }
            if let Some(quantity) = update.quantity {
                subscription.quantity = Some(quantity);
            }
            Ok(subscription.clone())
        })
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.begin("cancel_subscription")?;
        self.with_state(|state| {
            state
                .cancellations
                .push((subscription_id.to_string(), at_period_end));
            let subscription = state
                .subscriptions
                .get_mut(subscription_id)
                .ok_or_else(|| not_found("subscription", subscription_id))?;
            if at_period_end {
                subscription.cancel_at_period_end = true;
            } else {
                subscription.status = "canceled".to_string();
            }
            Ok(subscription.clone())
        })
    }
}

/// Services wired to a fake gateway and an in-memory store.
pub struct TestContext {
    pub gateway: Arc<FakeGateway>,
    pub store: Arc<InMemoryStore<Owner>>,
    pub billing: BillingService<Owner>,
    pub subscriptions: SubscriptionService<Owner>,
}

impl TestContext {
    pub fn new() -> Self {
        init_metrics();

        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(InMemoryStore::<Owner>::new());
        let billing = BillingService::with_store(gateway.clone(), store.clone(), "usd");
        let subscriptions = SubscriptionService::new(billing.clone());

        Self {
            gateway,
            store,
            billing,
            subscriptions,
        }
    }

    /// A stored owner that is not a remote customer yet.
    pub async fn owner(&self) -> Owner {
        let owner = Owner::new("taylor@example.com");
        self.store.save_billable(&owner).await.unwrap();
        owner
    }

    /// A stored owner with a remote customer.
    pub async fn customer(&self) -> Owner {
        let mut owner = Owner::new("jordan@example.com");
        owner.stripe_id = Some(self.gateway.add_customer(&owner.email));
        self.store.save_billable(&owner).await.unwrap();
        owner
    }

    /// A subscription that exists both remotely and in the store.
    pub async fn subscription(
        &self,
        owner: &Owner,
        plan: &str,
        trial_ends_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Subscription {
        let customer = owner.stripe_id.as_deref().unwrap();
        let remote_id = self.gateway.add_subscription(customer, plan, 1);

        let mut subscription =
            Subscription::new(owner.owner_id, "default", remote_id, plan, 1, trial_ends_at);
        subscription.ends_at = ends_at;
        self.store.create_subscription(&subscription).await.unwrap();
        subscription
    }

    pub async fn stored(&self, subscription: &Subscription) -> Subscription {
        self.store
            .get_subscription(subscription.subscription_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn stored_owner(&self, owner: &Owner) -> Owner {
        self.store.get_billable(owner.owner_id).await.unwrap().unwrap()
    }
}
