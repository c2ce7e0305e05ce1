//! Invoice listing, lookup and download endpoints.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::gateway::{ListParams, DEFAULT_LIST_LIMIT};
use crate::models::Invoice;
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub customer: String,
    pub currency: String,
    pub total: String,
    pub raw_total: i64,
    pub subtotal: String,
    pub paid: bool,
    pub date: DateTime<Utc>,
    pub line_count: usize,
}

impl From<&Invoice> for InvoiceResponse {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id().to_string(),
            customer: invoice.customer().to_string(),
            currency: invoice.currency().to_string(),
            total: invoice.total(),
            raw_total: invoice.raw_total(),
            subtotal: invoice.subtotal(),
            paid: invoice.paid(),
            date: invoice.date(),
            line_count: invoice.lines().len(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    #[serde(default)]
    pub include_pending: bool,
    pub limit: Option<u32>,
    pub starting_after: Option<String>,
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    let owner = state.billing.find_billable(owner_id).await?;
    let params = ListParams {
        limit: query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 100),
        starting_after: query.starting_after,
        ending_before: None,
    };

    let invoices = state
        .billing
        .invoices(&owner, query.include_pending, params)
        .await?;

    Ok(Json(invoices.iter().map(InvoiceResponse::from).collect()))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path((owner_id, invoice_id)): Path<(Uuid, String)>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let owner = state.billing.find_billable(owner_id).await?;
    let invoice = state
        .billing
        .find_invoice_or_fail(&owner, &invoice_id)
        .await?;
    Ok(Json(InvoiceResponse::from(&invoice)))
}

pub async fn download_invoice(
    State(state): State<AppState>,
    Path((owner_id, invoice_id)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    let owner = state.billing.find_billable(owner_id).await?;
    let document = state
        .billing
        .download_invoice(&owner, &invoice_id, &state.invoice_header)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, document.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.filename),
            ),
        ],
        document.body,
    ))
}
