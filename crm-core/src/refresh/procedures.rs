use serde::Serialize;
use std::fmt;

/// Database procedures that rebuild the snapshot tables.
///
/// A refresh cycle runs them in [`AggregationProcedure::ORDERED`] order:
/// - Daily: `aggregated_data` rows for today and the current month
/// - Historical: `aggregated_data_hist`, one row per month
/// - YearlySums: the `aggregated_data_sums` singleton
/// - SalesByBranch: `aggregated_sales_data`
/// - Representatives: `representative_aggregated_data`
///
/// Later procedures may read what earlier ones wrote, so a failure stops the
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationProcedure {
    Daily,
    Historical,
    YearlySums,
    SalesByBranch,
    Representatives,
}

impl AggregationProcedure {
    pub const ORDERED: [AggregationProcedure; 5] = [
        AggregationProcedure::Daily,
        AggregationProcedure::Historical,
        AggregationProcedure::YearlySums,
        AggregationProcedure::SalesByBranch,
        AggregationProcedure::Representatives,
    ];

    /// Name of the stored procedure, invoked as `SELECT <name>()`.
    pub fn sql_name(self) -> &'static str {
        match self {
            AggregationProcedure::Daily => "populate_aggregated_data",
            AggregationProcedure::Historical => "populate_aggregated_data_hist",
            AggregationProcedure::YearlySums => "populate_aggregated_data_sums",
            AggregationProcedure::SalesByBranch => "refresh_aggregated_sales_data",
            AggregationProcedure::Representatives => "refresh_representative_aggregated_data",
        }
    }

    /// Key for `pg_advisory_xact_lock`, stable across processes.
    pub fn lock_key(self) -> i64 {
        const BASE: i64 = 0x4352_4d00;
        BASE + self as i64
    }
}

impl fmt::Display for AggregationProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}
