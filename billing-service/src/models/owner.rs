//! Billable owners.
//!
//! Anything that can hold a remote customer (a user, a team, ...) implements
//! [`Billable`]. [`Owner`] is the record this service persists itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::PaymentSource;

/// Brand recorded for bank-account payment sources.
pub const BANK_ACCOUNT_BRAND: &str = "Bank Account";

/// Capability of an entity that owns a remote customer and subscriptions.
pub trait Billable: Clone + Send + Sync + 'static {
    /// Local identity, used as the subscription owner reference.
    fn billable_id(&self) -> Uuid;

    /// Human readable kind, used in error messages.
    fn billable_kind(&self) -> &'static str {
        "Owner"
    }

    fn email(&self) -> Option<&str>;

    /// Remote customer identifier.
    fn stripe_id(&self) -> Option<&str>;

    fn set_stripe_id(&mut self, stripe_id: Option<String>);

    fn card_brand(&self) -> Option<&str>;

    fn card_last_four(&self) -> Option<&str>;

    fn set_card_details(&mut self, brand: Option<String>, last_four: Option<String>);

    /// Owner-level ("generic") trial expiry, independent of any subscription.
    fn trial_ends_at(&self) -> Option<DateTime<Utc>>;

    fn has_stripe_id(&self) -> bool {
        self.stripe_id().is_some()
    }

    fn has_card_on_file(&self) -> bool {
        self.card_brand().is_some_and(|brand| !brand.is_empty())
    }

    fn on_generic_trial_at(&self, now: DateTime<Utc>) -> bool {
        self.trial_ends_at().is_some_and(|ends_at| now < ends_at)
    }

    /// Copy brand and last four from a payment source. Unknown source kinds
    /// leave the fields untouched.
    fn fill_card_details(&mut self, source: &PaymentSource) {
        match source {
            PaymentSource::Card(card) => {
                self.set_card_details(Some(card.brand.clone()), Some(card.last4.clone()))
            }
            PaymentSource::BankAccount(account) => self.set_card_details(
                Some(BANK_ACCOUNT_BRAND.to_string()),
                Some(account.last4.clone()),
            ),
            PaymentSource::Other => {}
        }
    }
}

/// Owner record persisted in the `billables` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Owner {
    pub owner_id: Uuid,
    pub email: String,
    pub stripe_id: Option<String>,
    pub card_brand: Option<String>,
    pub card_last_four: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Owner {
    pub fn new(email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            owner_id: Uuid::new_v4(),
            email: email.into(),
            stripe_id: None,
            card_brand: None,
            card_last_four: None,
            trial_ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_trial_ending(mut self, trial_ends_at: DateTime<Utc>) -> Self {
        self.trial_ends_at = Some(trial_ends_at);
        self
    }
}

impl Billable for Owner {
    fn billable_id(&self) -> Uuid {
        self.owner_id
    }

    fn email(&self) -> Option<&str> {
        Some(self.email.as_str()).filter(|email| !email.is_empty())
    }

    fn stripe_id(&self) -> Option<&str> {
        self.stripe_id.as_deref()
    }

    fn set_stripe_id(&mut self, stripe_id: Option<String>) {
        self.stripe_id = stripe_id;
    }

    fn card_brand(&self) -> Option<&str> {
        self.card_brand.as_deref()
    }

    fn card_last_four(&self) -> Option<&str> {
        self.card_last_four.as_deref()
    }

    fn set_card_details(&mut self, brand: Option<String>, last_four: Option<String>) {
        self.card_brand = brand;
        self.card_last_four = last_four;
    }

    fn trial_ends_at(&self) -> Option<DateTime<Utc>> {
        self.trial_ends_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BankAccount, Card};
    use chrono::Duration;

    #[test]
    fn card_on_file_requires_brand() {
        let mut owner = Owner::new("taylor@example.com");
        assert!(!owner.has_card_on_file());

        owner.set_card_details(Some(String::new()), None);
        assert!(!owner.has_card_on_file());

        owner.set_card_details(Some("Visa".into()), Some("4242".into()));
        assert!(owner.has_card_on_file());
    }

    #[test]
    fn fills_bank_account_details() {
        let mut owner = Owner::new("taylor@example.com");
        owner.fill_card_details(&PaymentSource::BankAccount(BankAccount {
            id: "ba_1".into(),
            last4: "6789".into(),
            bank_name: Some("STRIPE TEST BANK".into()),
        }));

        assert_eq!(owner.card_brand(), Some(BANK_ACCOUNT_BRAND));
        assert_eq!(owner.card_last_four(), Some("6789"));
    }

    #[test]
    fn fills_card_details() {
        let mut owner = Owner::new("taylor@example.com");
        owner.fill_card_details(&PaymentSource::Card(Card {
            id: "card_1".into(),
            brand: "MasterCard".into(),
            last4: "4444".into(),
            ..Default::default()
        }));

        assert_eq!(owner.card_brand(), Some("MasterCard"));
        assert_eq!(owner.card_last_four(), Some("4444"));
    }

    #[test]
    fn generic_trial_uses_owner_timestamp() {
        let now = Utc::now();
        let owner = Owner::new("taylor@example.com").with_trial_ending(now + Duration::days(1));
        assert!(owner.on_generic_trial_at(now));
        assert!(!owner.on_generic_trial_at(now + Duration::days(2)));
    }
}
