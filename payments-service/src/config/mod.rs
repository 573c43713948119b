use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Mobile-money gateway credentials and endpoints.
#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    pub consumer_key: String,
    pub consumer_secret: Secret<String>,
    /// Business shortcode (paybill/till number).
    pub shortcode: String,
    pub passkey: Secret<String>,
    pub api_base_url: String,
    /// Public URL the gateway delivers callbacks to.
    pub callback_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("PAYMENTS_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PAYMENTS_SERVICE_PORT")
            .unwrap_or_else(|_| "3004".to_string())
            .parse()?;

        let db_url = env::var("PAYMENTS_DATABASE_URL").expect("PAYMENTS_DATABASE_URL must be set");
        let max_connections = env::var("PAYMENTS_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("PAYMENTS_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let consumer_key = env::var("DARAJA_CONSUMER_KEY").unwrap_or_default();
        let consumer_secret = env::var("DARAJA_CONSUMER_SECRET").unwrap_or_default();
        let shortcode = env::var("DARAJA_SHORTCODE").unwrap_or_default();
        let passkey = env::var("DARAJA_PASSKEY").unwrap_or_default();
        let api_base_url = env::var("DARAJA_API_BASE_URL")
            .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string());
        let callback_url = env::var("DARAJA_CALLBACK_URL")
            .unwrap_or_else(|_| "http://localhost:3004/payments/callback".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            gateway: GatewayConfig {
                consumer_key,
                consumer_secret: Secret::new(consumer_secret),
                shortcode,
                passkey: Secret::new(passkey),
                api_base_url,
                callback_url,
            },
            service_name: "payments-service".to_string(),
            log_level: env::var("PAYMENTS_LOG_LEVEL")
                .unwrap_or_else(|_| "info,payments_service=debug".to_string()),
            otlp_endpoint: env::var("PAYMENTS_OTLP_ENDPOINT").ok(),
        })
    }
}
