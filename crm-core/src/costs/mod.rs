//! Cost records, their classification and cost reports.
//!
//! Every mutation of `all_costs` writes its audit entry on the same
//! transaction as the change.

pub mod filters;
pub mod handlers;
pub mod kinds;
pub mod store;

pub use filters::{CostFilter, CostScope};
pub use store::COST_AUDIT;
