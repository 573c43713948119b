//! Payment initiation, gateway callback, and status handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        CallbackAck, GatewayRequestResponse, InitiatePaymentRequest, InitiatePaymentResponse,
        UnresolvedCallbackResponse,
    },
    models::{GatewayRequestStatus, InvoiceStatus, PendingGatewayRequest, TARGET_INVOICE},
    services::gateway::{normalize_phone, StkCallbackEnvelope, StkQueryResponse},
    services::metrics::PAYMENTS_INITIATED_TOTAL,
    services::{CallbackResolution, Store},
    AppState,
};

/// Initiate a push payment for an invoice.
///
/// Returns as soon as the gateway accepts the push; completion arrives via
/// the callback. Callers that need an answer sooner poll the request with
/// their own timeout.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), AppError> {
    payload.validate()?;

    let invoice = state
        .store
        .get_invoice(payload.invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    match invoice.parsed_status() {
        InvoiceStatus::Pending | InvoiceStatus::Overdue => {}
        InvoiceStatus::Paid => {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is already paid",
                invoice.invoice_number
            )));
        }
        InvoiceStatus::Cancelled => {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is cancelled",
                invoice.invoice_number
            )));
        }
    }

    let phone = normalize_phone(&payload.phone)?;

    tracing::info!(
        invoice_id = %invoice.invoice_id,
        invoice_number = %invoice.invoice_number,
        amount = %invoice.total,
        "Initiating push payment"
    );

    let ack = state
        .gateway
        .stk_push(
            &phone,
            invoice.total,
            &invoice.invoice_number,
            &format!("Payment for {}", invoice.invoice_number),
        )
        .await?;

    let now = Utc::now();
    state
        .store
        .insert_gateway_request(&PendingGatewayRequest {
            checkout_request_id: ack.checkout_request_id.clone(),
            merchant_request_id: ack.merchant_request_id.clone(),
            phone,
            amount: invoice.total,
            status: GatewayRequestStatus::Pending,
            result_code: None,
            result_description: None,
            receipt_number: None,
            account_reference: invoice.invoice_number.clone(),
            target_kind: TARGET_INVOICE.to_string(),
            target_id: invoice.invoice_id,
            created_utc: now,
            updated_utc: now,
        })
        .await?;

    PAYMENTS_INITIATED_TOTAL
        .with_label_values(&[invoice.origin.as_str()])
        .inc();

    Ok((
        StatusCode::ACCEPTED,
        Json(InitiatePaymentResponse {
            checkout_request_id: ack.checkout_request_id,
            merchant_request_id: ack.merchant_request_id,
            amount: invoice.total,
            customer_message: ack.customer_message,
        }),
    ))
}

/// Gateway callback webhook.
///
/// An unknown checkout id gets a non-success response so the gateway
/// retries once the initiation record lands. Anything else -- including
/// internal settlement failures that are not the gateway's fault -- is
/// acknowledged with the envelope the gateway expects, with the failure
/// kept in logs and the unresolved-callback queue.
pub async fn callback(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<CallbackAck>), AppError> {
    let payload: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
        tracing::warn!(error = %e, "Discarding malformed callback body");
        AppError::BadRequest(anyhow::anyhow!("Malformed callback payload"))
    })?;

    let envelope: StkCallbackEnvelope = serde_json::from_value(payload.clone()).map_err(|e| {
        tracing::warn!(error = %e, "Discarding callback with unexpected shape");
        AppError::BadRequest(anyhow::anyhow!("Unexpected callback shape"))
    })?;
    let callback = envelope.body.stk_callback;

    tracing::info!(
        checkout_request_id = %callback.checkout_request_id,
        result_code = callback.result_code,
        "Received gateway callback"
    );

    match state.reconciler.process(&callback, &payload).await {
        Ok(resolution) => {
            if let CallbackResolution::Settled {
                invoice_number,
                receipt_number,
                ..
            } = &resolution
            {
                tracing::info!(
                    invoice_number = %invoice_number,
                    receipt_number = ?receipt_number,
                    "Payment settled from callback"
                );
            }
            Ok((StatusCode::OK, Json(CallbackAck::accepted())))
        }
        // Unknown request id: error out so the gateway redelivers.
        Err(e @ AppError::CallbackUnresolvable(_)) => Err(e),
        Err(e) => {
            tracing::error!(
                checkout_request_id = %callback.checkout_request_id,
                error = %e,
                "Callback processing failed internally, acknowledging to stop retries"
            );
            Ok((StatusCode::OK, Json(CallbackAck::accepted())))
        }
    }
}

/// Local view of a gateway request.
pub async fn get_request(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<GatewayRequestResponse>, AppError> {
    let request = state
        .store
        .get_gateway_request(&checkout_request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Gateway request not found")))?;

    Ok(Json(GatewayRequestResponse::from(request)))
}

/// Synchronous status poll against the gateway, for callers that cannot
/// wait for the callback. Does not finalize local state; the callback
/// remains the completion path.
pub async fn query_request(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<StkQueryResponse>, AppError> {
    // Only poll requests we actually issued.
    state
        .store
        .get_gateway_request(&checkout_request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Gateway request not found")))?;

    let response = state.gateway.query_status(&checkout_request_id).await?;

    Ok(Json(response))
}

/// Gateway requests issued for one invoice.
pub async fn list_invoice_requests(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<GatewayRequestResponse>>, AppError> {
    let requests = state
        .store
        .gateway_requests_for_target(TARGET_INVOICE, invoice_id)
        .await?;

    Ok(Json(
        requests
            .into_iter()
            .map(GatewayRequestResponse::from)
            .collect(),
    ))
}

/// Callbacks that confirmed money but could not be matched to an invoice.
pub async fn list_unresolved(
    State(state): State<AppState>,
) -> Result<Json<Vec<UnresolvedCallbackResponse>>, AppError> {
    let unresolved = state.store.list_unresolved_callbacks().await?;

    Ok(Json(
        unresolved
            .into_iter()
            .map(UnresolvedCallbackResponse::from)
            .collect(),
    ))
}
