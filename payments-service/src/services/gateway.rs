//! Mobile-money gateway client (Daraja STK push).
//!
//! Implements the push-payment initiation and status-query calls, plus the
//! OAuth client-credentials token exchange. The completion result arrives
//! separately via the asynchronous callback (see the reconciler).

use crate::config::GatewayConfig;
use crate::models::{CallbackOutcome, GatewayRequestStatus};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Result code the gateway uses for a successful payment.
pub const RESULT_CODE_SUCCESS: i64 = 0;

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Gateway client. Cheap to clone; the token cache is shared.
#[derive(Clone)]
pub struct DarajaClient {
    client: Client,
    config: GatewayConfig,
    token: Arc<Mutex<Option<CachedToken>>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds, delivered as a string.
    expires_in: String,
}

/// STK push request body.
#[derive(Debug, Serialize)]
struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: &'static str,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "PhoneNumber")]
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    call_back_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

/// Acknowledgement returned by the push endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

/// Synchronous status poll result. `result_code` is absent while the push
/// is still outstanding on the handset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
}

/// Gateway error envelope for non-2xx responses.
#[derive(Debug, Deserialize)]
struct GatewayErrorResponse {
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Callback envelope
// ---------------------------------------------------------------------------

/// Webhook envelope delivered by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub item: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == RESULT_CODE_SUCCESS
    }

    fn metadata_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }

    /// Confirmed amount from the metadata list.
    pub fn amount(&self) -> Option<Decimal> {
        let value = self.metadata_value("Amount")?;
        match value {
            serde_json::Value::Number(n) => {
                Decimal::from_f64_retain(n.as_f64()?).map(|d| d.round_dp(2))
            }
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Provider receipt number from the metadata list.
    pub fn receipt_number(&self) -> Option<String> {
        match self.metadata_value("MpesaReceiptNumber")? {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Terminal outcome this callback carries.
    pub fn outcome(&self) -> CallbackOutcome {
        let status = if self.is_success() {
            GatewayRequestStatus::Success
        } else {
            GatewayRequestStatus::Failed
        };
        CallbackOutcome {
            status,
            result_code: self.result_code,
            result_description: self.result_desc.clone(),
            receipt_number: self.receipt_number(),
            amount: self.amount(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl DarajaClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Check if gateway credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.consumer_key.is_empty()
            && !self.config.consumer_secret.expose_secret().is_empty()
    }

    /// Fetch a bearer token, reusing the cached one until shortly before it
    /// expires. The cache lock is held across the exchange so concurrent
    /// callers wait for the single in-flight refresh instead of issuing
    /// their own.
    async fn access_token(&self, force_refresh: bool) -> Result<String, AppError> {
        let mut guard = self.token.lock().await;

        if !force_refresh {
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() + Duration::from_secs(30) {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.api_base_url
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.config.consumer_key,
                Some(self.config.consumer_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| {
                AppError::GatewayUnavailable(anyhow::anyhow!("Token request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::GatewayUnavailable(anyhow::anyhow!(
                "Token endpoint returned {}",
                status
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::GatewayUnavailable(anyhow::anyhow!("Malformed token response: {}", e))
        })?;

        let expires_in: u64 = token.expires_in.parse().unwrap_or(3599);
        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        };
        *guard = Some(cached);

        tracing::debug!(expires_in = expires_in, "Gateway access token refreshed");

        Ok(token.access_token)
    }

    fn password_and_timestamp(&self) -> (String, String) {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = encode_password(
            &self.config.shortcode,
            self.config.passkey.expose_secret(),
            &timestamp,
        );
        (password, timestamp)
    }

    /// Issue a push-payment request to the payer's phone.
    ///
    /// Returns the gateway's acknowledgement; the payment itself completes
    /// later via the callback. A caller that cannot wait should poll with
    /// `query_status` under its own timeout.
    pub async fn stk_push(
        &self,
        phone: &str,
        amount: Decimal,
        account_reference: &str,
        description: &str,
    ) -> Result<StkPushResponse, AppError> {
        if !self.is_configured() {
            return Err(AppError::GatewayUnavailable(anyhow::anyhow!(
                "Gateway credentials not configured"
            )));
        }

        let phone = normalize_phone(phone)?;
        let (password, timestamp) = self.password_and_timestamp();
        let request = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: whole_amount(amount)?,
            party_a: phone.clone(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone,
            call_back_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: description.to_string(),
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.api_base_url);

        let token = self.access_token(false).await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::GatewayUnavailable(anyhow::anyhow!("Push request failed: {}", e))
            })?;

        // A stale token gets one refresh-and-retry.
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let token = self.access_token(true).await?;
            self.client
                .post(&url)
                .bearer_auth(&token)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    AppError::GatewayUnavailable(anyhow::anyhow!("Push request failed: {}", e))
                })?
        } else {
            response
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::GatewayUnavailable(anyhow::anyhow!("Failed to read response: {}", e))
        })?;

        tracing::debug!(status = %status, body = %body, "Gateway stk_push response");

        if status.is_success() {
            let ack: StkPushResponse = serde_json::from_str(&body).map_err(|e| {
                AppError::GatewayUnavailable(anyhow::anyhow!("Malformed push response: {}", e))
            })?;
            if ack.response_code != "0" {
                return Err(AppError::GatewayRejected(anyhow::anyhow!(
                    "Gateway declined push: {} - {}",
                    ack.response_code,
                    ack.response_description
                )));
            }
            tracing::info!(
                checkout_request_id = %ack.checkout_request_id,
                merchant_request_id = %ack.merchant_request_id,
                "Push payment accepted by gateway"
            );
            Ok(ack)
        } else {
            let error: GatewayErrorResponse =
                serde_json::from_str(&body).unwrap_or(GatewayErrorResponse {
                    request_id: None,
                    error_code: None,
                    error_message: Some(body.clone()),
                });
            tracing::error!(
                status = %status,
                error_code = ?error.error_code,
                request_id = ?error.request_id,
                "Gateway rejected push request"
            );
            let message = error
                .error_message
                .unwrap_or_else(|| "Unknown gateway error".to_string());
            if status.is_client_error() {
                Err(AppError::GatewayRejected(anyhow::anyhow!(
                    "{}: {}",
                    error.error_code.unwrap_or_else(|| status.to_string()),
                    message
                )))
            } else {
                Err(AppError::GatewayUnavailable(anyhow::anyhow!(
                    "Gateway error {}: {}",
                    status,
                    message
                )))
            }
        }
    }

    /// Synchronous status poll for a previously issued push request.
    ///
    /// A fallback for interfaces that cannot wait for the callback; a
    /// timeout here says nothing about the payment, which may still arrive.
    pub async fn query_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StkQueryResponse, AppError> {
        if !self.is_configured() {
            return Err(AppError::GatewayUnavailable(anyhow::anyhow!(
                "Gateway credentials not configured"
            )));
        }

        let (password, timestamp) = self.password_and_timestamp();
        let request = StkQueryRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let url = format!("{}/mpesa/stkpushquery/v1/query", self.config.api_base_url);

        let token = self.access_token(false).await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::GatewayUnavailable(anyhow::anyhow!("Status query failed: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::GatewayUnavailable(anyhow::anyhow!("Failed to read response: {}", e))
        })?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                AppError::GatewayUnavailable(anyhow::anyhow!("Malformed query response: {}", e))
            })
        } else {
            Err(AppError::GatewayUnavailable(anyhow::anyhow!(
                "Status query returned {}: {}",
                status,
                body
            )))
        }
    }
}

/// `base64(shortcode + passkey + timestamp)`, the gateway's request password.
fn encode_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    general_purpose::STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// The gateway only accepts whole currency units.
fn whole_amount(amount: Decimal) -> Result<u64, AppError> {
    amount
        .round()
        .to_u64()
        .filter(|n| *n > 0)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Amount must be a positive number")))
}

/// Normalize a subscriber number to canonical international form
/// (`2547XXXXXXXX` / `2541XXXXXXXX`).
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '+')
        .collect();

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Phone number must contain only digits"
        )));
    }

    let canonical = if cleaned.len() == 12 && cleaned.starts_with("254") {
        cleaned
    } else if cleaned.len() == 10 && cleaned.starts_with('0') {
        format!("254{}", &cleaned[1..])
    } else if cleaned.len() == 9 && (cleaned.starts_with('7') || cleaned.starts_with('1')) {
        format!("254{}", cleaned)
    } else {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Phone number '{}' is not a recognized subscriber number",
            raw
        )));
    };

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_local_formats() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("+254 712 345 678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0110000000").unwrap(), "254110000000");
    }

    #[test]
    fn rejects_garbage_phones() {
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("hello").is_err());
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("255712345678").is_err());
    }

    #[test]
    fn password_is_base64_of_parts() {
        let password = encode_password("174379", "passkey", "20260101120000");
        let decoded = general_purpose::STANDARD.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20260101120000");
    }

    #[test]
    fn whole_amount_rounds_and_rejects_zero() {
        assert_eq!(whole_amount(Decimal::new(90000, 2)).unwrap(), 900);
        assert_eq!(whole_amount(Decimal::new(90049, 2)).unwrap(), 900);
        assert!(whole_amount(Decimal::ZERO).is_err());
        assert!(whole_amount(Decimal::from(-5)).is_err());
    }

    #[test]
    fn parses_success_callback_metadata() {
        let payload = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 900.0 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "TransactionDate", "Value": 20191219102115u64 },
                            { "Name": "PhoneNumber", "Value": 254708374149u64 }
                        ]
                    }
                }
            }
        });

        let envelope: StkCallbackEnvelope = serde_json::from_value(payload).unwrap();
        let callback = envelope.body.stk_callback;
        assert!(callback.is_success());
        assert_eq!(callback.amount(), Some(Decimal::from(900)));
        assert_eq!(callback.receipt_number().as_deref(), Some("NLJ7RT61SV"));

        let outcome = callback.outcome();
        assert_eq!(outcome.status, GatewayRequestStatus::Success);
        assert_eq!(outcome.result_code, 0);
    }

    #[test]
    fn parses_failure_callback_without_metadata() {
        let payload = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user."
                }
            }
        });

        let envelope: StkCallbackEnvelope = serde_json::from_value(payload).unwrap();
        let callback = envelope.body.stk_callback;
        assert!(!callback.is_success());
        assert_eq!(callback.amount(), None);
        assert_eq!(callback.receipt_number(), None);
        assert_eq!(callback.outcome().status, GatewayRequestStatus::Failed);
    }
}
