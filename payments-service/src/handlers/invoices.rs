//! Invoice handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        ConfirmManualPaymentRequest, ConfirmManualPaymentResponse, CreateInvoiceRequest,
        InvoiceResponse, SweepOverdueResponse, UpdateInvoiceRequest,
    },
    middleware::Caller,
    models::{CreateInvoice, LineItem, TransactionSource, UpdateInvoice},
    services::Store,
    AppState,
};

fn line_items_from(request: &[crate::dtos::LineItemRequest]) -> Result<Vec<LineItem>, AppError> {
    let items: Vec<LineItem> = request.iter().map(LineItem::from).collect();
    if items.iter().any(|item| item.unit_price < Decimal::ZERO) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Line item prices cannot be negative"
        )));
    }
    Ok(items)
}

/// Create an invoice for a billable event.
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    payload.validate()?;

    let input = CreateInvoice {
        origin: payload.origin,
        customer_name: payload.customer_name.clone(),
        customer_email: payload.customer_email.clone(),
        due_date: payload.due_date,
        provider_id: payload.provider_id,
        provider_email: payload.provider_email.clone(),
        appointment_id: payload.appointment_id,
        consultation_fee: payload.consultation_fee,
        transport_fee: payload.transport_fee,
        line_items: line_items_from(&payload.line_items)?,
    };

    let invoice = state.store.create_invoice(&input).await?;

    tracing::info!(
        invoice_id = %invoice.invoice_id,
        invoice_number = %invoice.invoice_number,
        total = %invoice.total,
        "Invoice created"
    );

    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(invoice))))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(InvoiceResponse::from(invoice)))
}

/// List invoices visible to the caller: patients see their own, providers
/// see those linked to them, admins see everything.
pub async fn list_invoices(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    let scope = caller.invoice_scope()?;
    let invoices = state.store.list_invoices(&scope).await?;

    Ok(Json(
        invoices.into_iter().map(InvoiceResponse::from).collect(),
    ))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceResponse>, AppError> {
    payload.validate()?;

    let patch = UpdateInvoice {
        status: payload.status,
        due_date: payload.due_date,
        line_items: match &payload.line_items {
            Some(items) => Some(line_items_from(items)?),
            None => None,
        },
    };

    let invoice = state.store.update_invoice(invoice_id, &patch).await?;

    tracing::info!(
        invoice_id = %invoice.invoice_id,
        status = %invoice.status,
        "Invoice updated"
    );

    Ok(Json(InvoiceResponse::from(invoice)))
}

/// Settle an invoice paid outside the gateway (cash at the desk, card on
/// file). Runs the same mark-paid/commission/credit path as the callback,
/// and like it is an idempotent no-op on an already-paid invoice.
pub async fn confirm_manual_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<ConfirmManualPaymentRequest>,
) -> Result<Json<ConfirmManualPaymentResponse>, AppError> {
    payload.validate()?;

    let source = match payload.method.as_str() {
        "cash" => TransactionSource::Cash,
        "card" => TransactionSource::Card,
        other => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown settlement method '{}' (expected cash or card)",
                other
            )));
        }
    };

    let invoice = state
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let settlement = state
        .reconciler
        .settle_invoice(&invoice, source, payload.reference.clone())
        .await?;

    Ok(Json(ConfirmManualPaymentResponse {
        already_paid: settlement.already_paid,
        provider_share: settlement.provider_share,
        invoice: InvoiceResponse::from(settlement.invoice),
    }))
}

/// Move pending invoices past their due date to overdue.
pub async fn sweep_overdue(
    State(state): State<AppState>,
) -> Result<Json<SweepOverdueResponse>, AppError> {
    let updated = state.store.mark_overdue(Utc::now().date_naive()).await?;

    if updated > 0 {
        tracing::info!(updated = updated, "Invoices marked overdue");
    }

    Ok(Json(SweepOverdueResponse { updated }))
}
