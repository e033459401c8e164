use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use crate::paid::{MonetaryRecord, OutstandingBalance};

/// Sales transaction mapping the `transactions` table.
///
/// Rows are loaded by an external import; this service only reads them.
/// The profit split columns are filled by database triggers.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Transaction {
    pub id: i32,
    pub document_number: String,
    pub created_at: DateTime<Utc>,
    pub branch_name: String,
    pub representative_name: Option<String>,
    pub customer_nip: Option<String>,
    pub net_value: Decimal,
    pub gross_value: Decimal,

    /// Outstanding balance; NULL or zero means paid
    pub to_pay: Option<Decimal>,
    pub profit: Decimal,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub rep_profit_factor: Option<Decimal>,
    pub rep_profit: Option<Decimal>,
    pub branch_profit: Option<Decimal>,
    pub hq_profit: Option<Decimal>,
    pub found: Option<Decimal>,
}

impl MonetaryRecord for Transaction {
    fn outstanding_balance(&self) -> OutstandingBalance<'_> {
        OutstandingBalance::from(self.to_pay)
    }
}
