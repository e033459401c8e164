//! CRM reporting backend.
//!
//! Serves cost, sales and representative reports over a PostgreSQL
//! database, keeps the system-wide reference date, refreshes the snapshot
//! tables after the date moves and audits every change to cost records.

pub mod actor;
pub mod app;
pub mod audit;
pub mod config;
pub mod config_date;
pub mod costs;
pub mod db;
pub mod directory;
pub mod error;
pub mod models;
pub mod pagination;
pub mod paid;
pub mod refresh;
pub mod reports;

/// Installs the `tracing` subscriber shared by both binaries.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
