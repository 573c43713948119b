pub mod audit;
pub mod commission;
pub mod gateway;
pub mod metrics;
pub mod reconciler;
pub mod store;
pub mod withdrawals;

pub use audit::{AuditReport, ReconciliationAuditor};
pub use gateway::DarajaClient;
pub use metrics::{get_metrics, init_metrics};
pub use reconciler::{CallbackReconciler, CallbackResolution};
pub use store::{MemoryStore, PgStore, Store};
pub use withdrawals::WithdrawalProcessor;
