//! Prometheus metrics for payments-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Push-payment initiations by invoice origin.
pub static PAYMENTS_INITIATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_initiated_total",
        "Total push-payment requests issued to the gateway",
        &["origin"]
    )
    .expect("Failed to register payments_initiated_total")
});

/// Settled payments by source (mobile_money, cash, card).
pub static PAYMENTS_SETTLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_settled_total",
        "Total payments settled and credited",
        &["source"]
    )
    .expect("Failed to register payments_settled_total")
});

/// Failed or unresolvable payment completions.
pub static PAYMENTS_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_failed_total",
        "Total payment completions that failed or could not be resolved",
        &["reason"] // gateway_declined, unresolved
    )
    .expect("Failed to register payments_failed_total")
});

/// Withdrawals by outcome.
pub static WITHDRAWALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_withdrawals_total",
        "Total withdrawal attempts by outcome",
        &["outcome"] // completed, insufficient_funds
    )
    .expect("Failed to register payments_withdrawals_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payments_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&PAYMENTS_INITIATED_TOTAL);
    Lazy::force(&PAYMENTS_SETTLED_TOTAL);
    Lazy::force(&PAYMENTS_FAILED_TOTAL);
    Lazy::force(&WITHDRAWALS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
