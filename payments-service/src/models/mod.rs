pub mod gateway;
pub mod invoice;
pub mod provider;
pub mod transaction;
pub mod wallet;

pub use gateway::*;
pub use invoice::*;
pub use provider::*;
pub use transaction::*;
pub use wallet::*;
