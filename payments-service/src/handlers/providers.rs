//! Provider registry and reconciliation handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateProviderRequest, ProviderResponse},
    models::CreateProvider,
    services::{AuditReport, Store},
    AppState,
};

pub async fn create_provider(
    State(state): State<AppState>,
    Json(payload): Json<CreateProviderRequest>,
) -> Result<(StatusCode, Json<ProviderResponse>), AppError> {
    payload.validate()?;

    let provider = state
        .store
        .create_provider(&CreateProvider {
            display_name: payload.display_name.clone(),
            email: payload.email.clone(),
            user_id: payload.user_id,
        })
        .await?;

    tracing::info!(
        provider_id = %provider.provider_id,
        user_id = %provider.user_id,
        "Provider registered"
    );

    Ok((StatusCode::CREATED, Json(ProviderResponse::from(provider))))
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<ProviderResponse>, AppError> {
    let provider = state
        .store
        .get_provider(provider_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Provider not found")))?;

    Ok(Json(ProviderResponse::from(provider)))
}

/// Recompute the provider's wallet balance from paid invoices and completed
/// withdrawals, correcting drift. On-demand repair tool, not a hot path.
pub async fn reconcile(
    State(state): State<AppState>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<AuditReport>, AppError> {
    let report = state.auditor.recompute(provider_id).await?;

    Ok(Json(report))
}
