//! Caller identity extractor.
//!
//! Identity and authentication live upstream; by the time a request reaches
//! this service the gateway/BFF has validated the user and forwards who they
//! are in headers. This extractor only reads them.

use crate::models::InvoiceScope;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    Patient,
    Provider,
    Admin,
}

impl CallerRole {
    fn from_header(value: &str) -> Option<Self> {
        match value {
            "patient" => Some(CallerRole::Patient),
            "provider" => Some(CallerRole::Provider),
            "admin" => Some(CallerRole::Admin),
            _ => None,
        }
    }
}

/// Caller context from upstream auth headers.
#[derive(Debug, Clone)]
pub struct Caller {
    pub role: CallerRole,
    pub email: Option<String>,
    pub provider_id: Option<Uuid>,
}

impl Caller {
    /// Invoice visibility for this caller.
    pub fn invoice_scope(&self) -> Result<InvoiceScope, AppError> {
        match self.role {
            CallerRole::Admin => Ok(InvoiceScope::Admin),
            CallerRole::Patient => {
                let email = self.email.clone().ok_or_else(|| {
                    AppError::Unauthorized(anyhow::anyhow!(
                        "Missing X-User-Email header for patient request"
                    ))
                })?;
                Ok(InvoiceScope::Patient { email })
            }
            CallerRole::Provider => {
                let provider_id = self.provider_id.ok_or_else(|| {
                    AppError::Unauthorized(anyhow::anyhow!(
                        "Missing X-Provider-ID header for provider request"
                    ))
                })?;
                Ok(InvoiceScope::Provider { provider_id })
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get("X-User-Role")
            .and_then(|v| v.to_str().ok())
            .and_then(CallerRole::from_header)
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing or invalid X-User-Role header (expected patient, provider or admin)"
                ))
            })?;

        let email = parts
            .headers
            .get("X-User-Email")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let provider_id = parts
            .headers
            .get("X-Provider-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok());

        Ok(Caller {
            role,
            email,
            provider_id,
        })
    }
}
