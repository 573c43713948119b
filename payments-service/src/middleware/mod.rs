pub mod caller;

pub use caller::{Caller, CallerRole};
