pub mod audit;
pub mod client;
pub mod config_date;
pub mod cost;
pub mod cost_kind;
pub mod snapshot;
pub mod transaction;
pub mod user;

pub use audit::{AuditAction, AuditEntry};
pub use client::Client;
pub use config_date::{ConfigDate, ConfigDateLookup};
pub use cost::Cost;
pub use cost_kind::CostKind;
pub use transaction::Transaction;
pub use user::User;
