//! Invoice read model and plain-text receipts.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::gateway::{timestamp_to_utc, GatewayError, InvoiceLine, RemoteInvoice};

/// Format an amount in minor units (cents) as `$12.34` style money.
pub fn format_amount(amount: i64, currency: &str) -> String {
    let value = Decimal::new(amount, 2);
    let symbol = match currency.to_ascii_lowercase().as_str() {
        "usd" | "aud" | "cad" | "nzd" => "$",
        "eur" => "€",
        "gbp" => "£",
        _ => "",
    };

    if symbol.is_empty() {
        format!("{:.2} {}", value, currency.to_ascii_uppercase())
    } else if value.is_sign_negative() {
        format!("-{}{:.2}", symbol, value.abs())
    } else {
        format!("{}{:.2}", symbol, value)
    }
}

fn receipt_row(label: &str, amount: &str) -> String {
    format!("{:<48} {:>12}", label, amount)
}

/// An invoice belonging to a billable owner.
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    inner: RemoteInvoice,
    #[serde(skip)]
    date: DateTime<Utc>,
}

impl Invoice {
    /// Wrap a remote invoice; fails if its creation timestamp is out of range.
    pub fn new(inner: RemoteInvoice) -> Result<Self, GatewayError> {
        let date = timestamp_to_utc(inner.created)?;
        Ok(Self { inner, date })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Remote customer the invoice was issued to.
    pub fn customer(&self) -> &str {
        &self.inner.customer
    }

    pub fn currency(&self) -> &str {
        &self.inner.currency
    }

    pub fn paid(&self) -> bool {
        self.inner.paid
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// Total in minor units.
    pub fn raw_total(&self) -> i64 {
        self.inner.total
    }

    pub fn total(&self) -> String {
        format_amount(self.inner.total, &self.inner.currency)
    }

    pub fn subtotal(&self) -> String {
        format_amount(self.inner.subtotal, &self.inner.currency)
    }

    /// Credit applied from the customer balance, if any.
    pub fn starting_balance(&self) -> Option<String> {
        (self.inner.starting_balance != 0)
            .then(|| format_amount(self.inner.starting_balance, &self.inner.currency))
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.inner.lines.data
    }

    /// Lines produced by subscriptions.
    pub fn subscriptions(&self) -> impl Iterator<Item = &InvoiceLine> {
        self.lines().iter().filter(|line| line.kind == "subscription")
    }

    /// One-off lines added with `tab`.
    pub fn invoice_items(&self) -> impl Iterator<Item = &InvoiceLine> {
        self.lines().iter().filter(|line| line.kind == "invoiceitem")
    }

    pub fn as_remote(&self) -> &RemoteInvoice {
        &self.inner
    }

    pub fn into_remote(self) -> RemoteInvoice {
        self.inner
    }
}

impl From<RemoteInvoice> for Invoice {
    fn from(inner: RemoteInvoice) -> Self {
        Self::new(inner)
    }
}

/// Vendor details printed on a downloaded receipt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvoiceHeader {
    pub vendor: String,
    pub product: String,
    pub street: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub url: Option<String>,
}

impl InvoiceHeader {
    pub fn new(vendor: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            product: product.into(),
            ..Default::default()
        }
    }
}

/// A rendered receipt ready to be sent as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
}

impl InvoiceDocument {
    pub const CONTENT_TYPE: &'static str = "text/plain; charset=utf-8";

    /// Render `invoice` as a plain-text receipt named `{product}_{month}_{year}.txt`.
    pub fn render(invoice: &Invoice, header: &InvoiceHeader) -> Self {
        let date = invoice.date();
        let filename = format!(
            "{}_{}_{}.txt",
            header.product.replace(' ', "_"),
            date.month(),
            date.year()
        );

        let mut lines = vec![header.vendor.clone()];
        lines.extend(
            [&header.street, &header.location, &header.phone, &header.url]
                .into_iter()
                .flatten()
                .cloned(),
        );
        lines.push(String::new());
        lines.push(format!("Product: {}", header.product));
        lines.push(format!("Invoice: {}", invoice.id()));
        lines.push(format!("Date: {}", date.format("%B %-d, %Y")));
        lines.push(String::new());

        for line in invoice.lines() {
            let description = line
                .description
                .clone()
                .or_else(|| line.plan.as_ref().map(|plan| plan.id.clone()))
                .unwrap_or_default();
            lines.push(receipt_row(
                &description,
                &format_amount(line.amount, &line.currency),
            ));
        }

        lines.push(String::new());
        lines.push(receipt_row("Subtotal", &invoice.subtotal()));
        if let Some(balance) = invoice.starting_balance() {
            lines.push(receipt_row("Balance applied", &balance));
        }
        lines.push(receipt_row("Total", &invoice.total()));

        let mut body = lines.join("\n");
        body.push('\n');

        Self {
            filename,
            content_type: Self::CONTENT_TYPE,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice() -> Invoice {
        let remote: RemoteInvoice = serde_json::from_value(json!({
            "id": "in_123",
            "customer": "cus_1",
            "currency": "usd",
            "subtotal": 2500,
            "total": 2000,
            "starting_balance": -500,
            "paid": true,
            "created": 1_709_251_200,
            "lines": {"data": [
                {"id": "il_1", "amount": 2000, "currency": "usd", "type": "subscription",
                 "plan": {"id": "monthly-20"}},
                {"id": "il_2", "amount": 500, "currency": "usd", "type": "invoiceitem",
                 "description": "Setup fee"}
            ]}
        }))
        .unwrap();
        Invoice::new(remote).unwrap()
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_amount(1234, "usd"), "$12.34");
        assert_eq!(format_amount(5, "gbp"), "£0.05");
        assert_eq!(format_amount(-500, "usd"), "-$5.00");
        assert_eq!(format_amount(100_000, "jpy"), "1000.00 JPY");
    }

    #[test]
    fn splits_lines_by_kind() {
        let invoice = invoice();
        assert_eq!(invoice.subscriptions().count(), 1);
        assert_eq!(invoice.invoice_items().count(), 1);
        assert_eq!(invoice.total(), "$20.00");
        assert_eq!(invoice.subtotal(), "$25.00");
    }

    #[test]
    fn renders_receipt() {
        let header = InvoiceHeader::new("Acme Inc", "Pro Plan");
        let document = InvoiceDocument::render(&invoice(), &header);

        assert_eq!(document.filename, "Pro_Plan_3_2024.txt");
        assert_eq!(document.content_type, InvoiceDocument::CONTENT_TYPE);
        assert!(document.body.starts_with("Acme Inc\n"));
        assert!(document.body.contains("Setup fee"));
        assert!(document.body.contains("monthly-20"));
        assert!(document.body.contains("Balance applied"));
        assert!(document.body.contains("$20.00"));
    }

    #[test]
    fn receipt_lists_header_details_then_rows() {
        let mut header = InvoiceHeader::new("Acme Inc", "Pro Plan");
        header.phone = Some("555-0100".to_string());
        let document = InvoiceDocument::render(&invoice(), &header);

        let lines: Vec<&str> = document.body.lines().collect();
        assert_eq!(&lines[..3], ["Acme Inc", "555-0100", ""]);
        assert_eq!(lines[3], "Product: Pro Plan");
        assert_eq!(lines[6], "");
        assert!(lines[7].starts_with("monthly-20"));
        assert!(lines[7].ends_with("$20.00"));
        assert_eq!(lines[7].len(), 61);
        assert!(lines.last().unwrap().starts_with("Total"));
        assert!(document.body.ends_with('\n'));
    }

    #[test]
    fn rejects_out_of_range_creation_date() {
        let remote: RemoteInvoice = serde_json::from_value(json!({
            "id": "in_bad",
            "customer": "cus_1",
            "currency": "usd",
            "subtotal": 100,
            "total": 100,
            "created": i64::MAX,
            "lines": {"data": []}
        }))
        .unwrap();

        assert!(matches!(
            Invoice::new(remote),
            Err(GatewayError::InvalidTimestamp(_))
        ));
    }
}
