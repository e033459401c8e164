pub mod coordinator;
pub mod engine;
pub mod procedures;
pub mod scheduler;

pub use coordinator::{Disposition, RefreshCoordinator, RefreshStatus, RefreshTicket};
pub use engine::{AggregationEngine, PgAggregationEngine};
pub use procedures::AggregationProcedure;
pub use scheduler::{RefreshScheduler, StopHandle};

/// Coordinator backed by the database procedures.
pub type PgRefreshCoordinator = RefreshCoordinator<PgAggregationEngine>;
