use std::future::Future;

use anyhow::Context;
use sqlx::PgPool;
use tracing::debug;

use super::procedures::AggregationProcedure;

/// The external aggregation engine.
///
/// Implementations run one procedure to completion. The coordinator owns
/// ordering and error policy.
pub trait AggregationEngine: Send + Sync + 'static {
    fn run(&self, procedure: AggregationProcedure) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Runs procedures inside PostgreSQL.
///
/// Each procedure gets its own transaction holding a transaction-scoped
/// advisory lock, so two processes never rebuild the same tables at once.
#[derive(Clone)]
pub struct PgAggregationEngine {
    pool: PgPool,
}

impl PgAggregationEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AggregationEngine for PgAggregationEngine {
    async fn run(&self, procedure: AggregationProcedure) -> anyhow::Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open refresh transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(procedure.lock_key())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to lock {}", procedure))?;

        debug!("Running {}", procedure);

        // sql_name comes from a closed enum, never from input
        let statement = format!("SELECT {}()", procedure.sql_name());
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("{} failed", procedure))?;

        tx.commit()
            .await
            .with_context(|| format!("failed to commit {}", procedure))?;
        Ok(())
    }
}
