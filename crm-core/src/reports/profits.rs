//! Profit sums computed directly from `transactions`.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::response::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::timings::{DataEnvelope, Stopwatch, Timed, TimingParams};
use crate::app::AppState;
use crate::error::AppResult;
use crate::models::snapshot::normalize_branch;
use crate::models::transaction::Transaction;
use crate::paid::{is_paid_filter, is_unpaid_filter, MonetaryRecord};
use crate::pagination::PageParams;

/// A reportable profit column: output name, source column and whether only
/// paid transactions count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfitColumn {
    pub name: &'static str,
    source: &'static str,
    paid_only: bool,
}

pub const PROFIT_COLUMNS: &[ProfitColumn] = &[
    ProfitColumn { name: "hq_profit", source: "hq_profit", paid_only: false },
    ProfitColumn { name: "branch_profit", source: "branch_profit", paid_only: false },
    ProfitColumn { name: "rep_profit", source: "rep_profit", paid_only: false },
    ProfitColumn { name: "found", source: "found", paid_only: false },
    ProfitColumn { name: "profit", source: "profit", paid_only: false },
    ProfitColumn { name: "hq_profit_paid", source: "hq_profit", paid_only: true },
    ProfitColumn { name: "branch_profit_paid", source: "branch_profit", paid_only: true },
    ProfitColumn { name: "rep_profit_paid", source: "rep_profit", paid_only: true },
    ProfitColumn { name: "found_paid", source: "found", paid_only: true },
    ProfitColumn { name: "profit_paid", source: "profit", paid_only: true },
];

impl ProfitColumn {
    fn select_expr(&self) -> String {
        if self.paid_only {
            format!(
                "COALESCE(SUM({}) FILTER (WHERE {}), 0) AS {}",
                self.source,
                is_paid_filter("to_pay"),
                self.name
            )
        } else {
            format!("COALESCE(SUM({}), 0) AS {}", self.source, self.name)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfitQuery {
    pub branch: Option<String>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    #[serde(default)]
    pub aggregate_company: bool,
    /// Comma-separated subset of [`PROFIT_COLUMNS`]
    pub columns: Option<String>,
}

impl ProfitQuery {
    /// Requested columns in table order. Unknown names are ignored; no
    /// usable name selects every column.
    pub fn selected_columns(&self) -> Vec<ProfitColumn> {
        let requested: Vec<&str> = self
            .columns
            .as_deref()
            .map(|raw| raw.split(',').map(str::trim).filter(|c| !c.is_empty()).collect())
            .unwrap_or_default();

        let selected: Vec<ProfitColumn> = PROFIT_COLUMNS
            .iter()
            .filter(|c| requested.contains(&c.name))
            .copied()
            .collect();
        if selected.is_empty() {
            PROFIT_COLUMNS.to_vec()
        } else {
            selected
        }
    }

    fn branch(&self) -> Option<String> {
        self.branch
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .map(normalize_branch)
    }

    /// A year without a month sums the whole year.
    fn yearly(&self) -> bool {
        self.year.is_some() && self.month.is_none()
    }

    fn grouped(&self) -> bool {
        !self.yearly() && !self.aggregate_company
    }

    fn has_filters(&self) -> bool {
        self.year.is_some() || self.month.is_some() || self.branch().is_some()
    }

    pub fn build_sql(&self, columns: &[ProfitColumn]) -> QueryBuilder<'static, Postgres> {
        let mut select: Vec<String> = Vec::with_capacity(columns.len() + 3);
        if self.grouped() {
            select.extend(["year".to_string(), "month".to_string(), "branch_name".to_string()]);
        }
        select.extend(columns.iter().map(ProfitColumn::select_expr));

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM transactions WHERE TRUE", select.join(", ")));
        if let Some(branch) = self.branch() {
            qb.push(" AND branch_name = ").push_bind(branch);
        }
        if let Some(year) = self.year {
            qb.push(" AND year = ").push_bind(year);
        }
        if let Some(month) = self.month {
            qb.push(" AND month = ").push_bind(month);
        }
        if self.grouped() {
            qb.push(" GROUP BY year, month, branch_name ORDER BY year DESC, month DESC, branch_name");
        }
        qb
    }

    /// The identifying part of an ungrouped row, or of the zero row.
    fn label(&self) -> (Option<i32>, Option<i32>, Option<String>) {
        let month = if self.yearly() { None } else { self.month };
        let branch = if self.aggregate_company {
            Some("ALL".to_string())
        } else {
            self.branch()
        };
        (self.year, month, branch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitRow {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub branch: Option<String>,
    #[serde(flatten)]
    pub values: BTreeMap<&'static str, Decimal>,
}

impl ProfitRow {
    fn decode(row: &PgRow, query: &ProfitQuery, columns: &[ProfitColumn]) -> Result<Self, sqlx::Error> {
        let (year, month, branch) = if query.grouped() {
            (
                row.try_get("year")?,
                row.try_get("month")?,
                row.try_get("branch_name")?,
            )
        } else {
            query.label()
        };

        let mut values = BTreeMap::new();
        for column in columns {
            let value: Option<Decimal> = row.try_get(column.name)?;
            values.insert(column.name, value.unwrap_or_default());
        }
        Ok(Self { year, month, branch, values })
    }

    fn zero(query: &ProfitQuery, columns: &[ProfitColumn]) -> Self {
        let (year, month, branch) = query.label();
        Self {
            year,
            month,
            branch,
            values: columns.iter().map(|c| (c.name, Decimal::ZERO)).collect(),
        }
    }
}

pub async fn aggregated_profits(pool: &PgPool, query: &ProfitQuery) -> AppResult<Vec<ProfitRow>> {
    let columns = query.selected_columns();
    let rows = query.build_sql(&columns).build().fetch_all(pool).await?;

    let mut data = rows
        .iter()
        .map(|row| ProfitRow::decode(row, query, &columns))
        .collect::<Result<Vec<_>, _>>()?;
    if data.is_empty() && query.has_filters() {
        data.push(ProfitRow::zero(query, &columns));
    }
    Ok(data)
}

/// `GET /api/aggregated_profits`
pub async fn get_aggregated_profits(
    State(state): State<AppState>,
    Query(query): Query<ProfitQuery>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<DataEnvelope<ProfitRow>>>> {
    let mut watch = Stopwatch::new(timing);
    let data = watch.time("query", aggregated_profits(&state.db, &query)).await?;
    Ok(Json(Timed::new(DataEnvelope { data }, watch)))
}

/// Filters of `GET /api/transactions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub branch: Option<String>,
    pub representative: Option<String>,
    pub is_paid: Option<bool>,
}

impl TransactionFilter {
    pub fn push_where(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(year) = self.year {
            qb.push(" AND year = ").push_bind(year);
        }
        if let Some(month) = self.month {
            qb.push(" AND month = ").push_bind(month);
        }
        if let Some(branch) = self.branch.as_deref().filter(|b| !b.trim().is_empty()) {
            qb.push(" AND branch_name = ").push_bind(normalize_branch(branch));
        }
        if let Some(rep) = self.representative.as_deref().filter(|r| !r.trim().is_empty()) {
            qb.push(" AND representative_name = ").push_bind(rep.trim().to_string());
        }
        match self.is_paid {
            Some(true) => {
                qb.push(" AND ").push(is_paid_filter("to_pay"));
            }
            Some(false) => {
                qb.push(" AND ").push(is_unpaid_filter("to_pay"));
            }
            None => {}
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub is_paid: bool,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub total: i64,
    pub transactions: Vec<TransactionResponse>,
    pub offset: i64,
    pub limit: i64,
}

pub async fn list_transactions(
    pool: &PgPool,
    filter: &TransactionFilter,
    page: PageParams,
) -> AppResult<(Vec<Transaction>, i64)> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM transactions");
    filter.push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new(
        "SELECT id, document_number, created_at, branch_name, representative_name, \
         customer_nip, net_value, gross_value, to_pay, profit, year, month, \
         rep_profit_factor, rep_profit, branch_profit, hq_profit, found FROM transactions",
    );
    filter.push_where(&mut select);
    select
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
    let rows = select.build_query_as::<Transaction>().fetch_all(pool).await?;

    Ok((rows, total))
}

/// `GET /api/transactions`
pub async fn get_transactions(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<TransactionFilter>,
) -> AppResult<Json<TransactionListResponse>> {
    let page = page.validate()?;
    let (rows, total) = list_transactions(&state.db, &filter, page).await?;

    Ok(Json(TransactionListResponse {
        total,
        transactions: rows
            .into_iter()
            .map(|t| TransactionResponse {
                is_paid: t.is_paid(),
                transaction: t,
            })
            .collect(),
        offset: page.offset,
        limit: page.limit,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(columns: &[ProfitColumn]) -> Vec<&'static str> {
        columns.iter().map(|c| c.name).collect()
    }

    #[test]
    fn test_column_selection() {
        let all = ProfitQuery::default().selected_columns();
        assert_eq!(all.len(), PROFIT_COLUMNS.len());

        let some = ProfitQuery {
            columns: Some("profit_paid, profit,bogus".into()),
            ..Default::default()
        };
        assert_eq!(names(&some.selected_columns()), vec!["profit", "profit_paid"]);

        let only_unknown = ProfitQuery {
            columns: Some("drop table".into()),
            ..Default::default()
        };
        assert_eq!(only_unknown.selected_columns().len(), PROFIT_COLUMNS.len());
    }

    #[test]
    fn test_paid_columns_use_filter_clause() {
        let paid = PROFIT_COLUMNS
            .iter()
            .find(|c| c.name == "profit_paid")
            .expect("column");
        let expr = paid.select_expr();
        assert!(expr.starts_with("COALESCE(SUM(profit) FILTER (WHERE (to_pay IS NULL"));
        assert!(expr.ends_with("AS profit_paid"));
    }

    #[test]
    fn test_grouping_modes() {
        let monthly = ProfitQuery {
            year: Some(2024),
            month: Some(12),
            ..Default::default()
        };
        let sql = monthly.build_sql(&monthly.selected_columns()).sql().to_string();
        assert!(sql.contains("GROUP BY year, month, branch_name"));

        let yearly = ProfitQuery {
            year: Some(2024),
            ..Default::default()
        };
        let sql = yearly.build_sql(&yearly.selected_columns()).sql().to_string();
        assert!(!sql.contains("GROUP BY"));
        assert!(sql.contains("AND year = $1"));

        let company = ProfitQuery {
            aggregate_company: true,
            year: Some(2024),
            month: Some(3),
            ..Default::default()
        };
        assert_eq!(company.label(), (Some(2024), Some(3), Some("ALL".to_string())));
    }

    #[test]
    fn test_zero_row_for_empty_filtered_result() {
        let query = ProfitQuery {
            branch: Some("lomza".into()),
            year: Some(2023),
            month: Some(1),
            columns: Some("profit".into()),
            ..Default::default()
        };
        let row = ProfitRow::zero(&query, &query.selected_columns());
        assert_eq!(row.branch.as_deref(), Some("Łomża"));
        assert_eq!(row.values["profit"], Decimal::ZERO);

        let json = serde_json::to_value(&row).expect("serialize");
        assert_eq!(json["profit"], 0.0);
        assert_eq!(json["month"], 1);
    }

    #[test]
    fn test_transaction_filter_sql() {
        let filter = TransactionFilter {
            year: Some(2024),
            branch: Some("RZGOW".into()),
            is_paid: Some(false),
            ..Default::default()
        };
        let mut qb = QueryBuilder::new("SELECT id FROM transactions");
        filter.push_where(&mut qb);
        let sql = qb.sql().to_string();
        assert!(sql.contains("AND year = $1 AND branch_name = $2"));
        assert!(sql.contains("AND (NOT (to_pay IS NULL"));
    }
}
