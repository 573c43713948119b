pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{
    CallbackReconciler, DarajaClient, PgStore, ReconciliationAuditor, Store, WithdrawalProcessor,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub gateway: DarajaClient,
    pub reconciler: CallbackReconciler,
    pub withdrawals: WithdrawalProcessor,
    pub auditor: ReconciliationAuditor,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, gateway: DarajaClient) -> Self {
        Self {
            reconciler: CallbackReconciler::new(store.clone()),
            withdrawals: WithdrawalProcessor::new(store.clone()),
            auditor: ReconciliationAuditor::new(store.clone()),
            config,
            store,
            gateway,
        }
    }
}

/// Build the HTTP router for the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Invoices
        .route("/invoices", post(handlers::invoices::create_invoice))
        .route("/invoices", get(handlers::invoices::list_invoices))
        .route("/invoices/:id", get(handlers::invoices::get_invoice))
        .route("/invoices/:id", patch(handlers::invoices::update_invoice))
        .route(
            "/invoices/:id/confirm",
            post(handlers::invoices::confirm_manual_payment),
        )
        .route(
            "/invoices/:id/payments",
            get(handlers::payments::list_invoice_requests),
        )
        .route(
            "/invoices/sweep-overdue",
            post(handlers::invoices::sweep_overdue),
        )
        // Gateway payments
        .route("/payments/initiate", post(handlers::payments::initiate_payment))
        .route("/payments/callback", post(handlers::payments::callback))
        .route(
            "/payments/requests/:checkout_id",
            get(handlers::payments::get_request),
        )
        .route(
            "/payments/requests/:checkout_id/query",
            post(handlers::payments::query_request),
        )
        .route(
            "/payments/unresolved",
            get(handlers::payments::list_unresolved),
        )
        // Wallets
        .route(
            "/wallets/:user_id/balance",
            get(handlers::wallets::get_balance),
        )
        .route(
            "/wallets/:user_id/transactions",
            get(handlers::wallets::list_transactions),
        )
        .route(
            "/wallets/:user_id/withdraw",
            post(handlers::wallets::withdraw),
        )
        // Providers
        .route("/providers", post(handlers::providers::create_provider))
        .route("/providers/:id", get(handlers::providers::get_provider))
        .route(
            "/providers/:id/reconcile",
            post(handlers::providers::reconcile),
        )
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

pub struct Application {
    port: u16,
    router: Router,
}

impl Application {
    /// Build the application against Postgres, running migrations.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let store = PgStore::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        store.run_migrations().await?;

        let gateway = DarajaClient::new(config.gateway.clone());
        if gateway.is_configured() {
            tracing::info!("Gateway client initialized");
        } else {
            tracing::warn!(
                "Gateway credentials not configured - push payments will be unavailable"
            );
        }

        let port = config.server.port;
        let state = AppState::new(config, Arc::new(store), gateway);

        Ok(Self {
            port,
            router: router(state),
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
