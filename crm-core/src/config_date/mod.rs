//! The reference date: lookup, advance and the refresh it triggers.

pub mod handlers;
pub mod service;

pub use service::{AdvanceOutcome, ConfigDateService, DateUpdatePolicy};
