//! Payment sources attached to a remote customer.

use serde::{Deserialize, Serialize};

/// A card stored on the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub brand: String,
    pub last4: String,
    #[serde(default)]
    pub exp_month: u32,
    #[serde(default)]
    pub exp_year: i32,
    #[serde(default)]
    pub funding: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A bank account stored on the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: String,
    pub last4: String,
    #[serde(default)]
    pub bank_name: Option<String>,
}

/// Any source on a customer, discriminated by the gateway's `object` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum PaymentSource {
    Card(Card),
    BankAccount(BankAccount),
    #[serde(other)]
    Other,
}

impl PaymentSource {
    pub fn id(&self) -> Option<&str> {
        match self {
            PaymentSource::Card(card) => Some(&card.id),
            PaymentSource::BankAccount(account) => Some(&account.id),
            PaymentSource::Other => None,
        }
    }

    pub fn as_card(&self) -> Option<&Card> {
        match self {
            PaymentSource::Card(card) => Some(card),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_sources_by_object_tag() {
        let sources: Vec<PaymentSource> = serde_json::from_value(json!([
            {"object": "card", "id": "card_1", "brand": "Visa", "last4": "4242", "exp_month": 8, "exp_year": 2030},
            {"object": "bank_account", "id": "ba_1", "last4": "6789"},
            {"object": "source", "id": "src_1"}
        ]))
        .unwrap();

        assert_eq!(sources[0].as_card().map(|c| c.brand.as_str()), Some("Visa"));
        assert_eq!(sources[1].id(), Some("ba_1"));
        assert_eq!(sources[2], PaymentSource::Other);
    }
}
