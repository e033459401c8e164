//! `aggregated_sales_data`: per branch and month sales, profit and margins.

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

/// Column of the sales snapshot and how it aggregates across branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SalesColumn {
    pub name: &'static str,
    source: &'static str,
    company: &'static str,
}

/// The company row recomputes percentages from the summed amounts.
pub const SALES_COLUMNS: &[SalesColumn] = &[
    SalesColumn { name: "sales_net", source: "asd_sales_net", company: "SUM(asd_sales_net)" },
    SalesColumn { name: "profit_net", source: "asd_profit_net", company: "SUM(asd_profit_net)" },
    SalesColumn { name: "sales_payd", source: "asd_sales_payd", company: "SUM(asd_sales_payd)" },
    SalesColumn { name: "profit_payd", source: "asd_profit_payd", company: "SUM(asd_profit_payd)" },
    SalesColumn {
        name: "sales_payd_percent",
        source: "asd_sales_payd_percent",
        company: "100.0 * SUM(asd_sales_payd) / NULLIF(SUM(asd_sales_net), 0)",
    },
    SalesColumn { name: "sales_ph", source: "asd_sales_ph", company: "SUM(asd_sales_ph)" },
    SalesColumn { name: "profit_ph", source: "asd_profit_ph", company: "SUM(asd_profit_ph)" },
    SalesColumn {
        name: "sales_ph_percent",
        source: "asd_sales_ph_percent",
        company: "100.0 * SUM(asd_sales_ph) / NULLIF(SUM(asd_sales_net), 0)",
    },
    SalesColumn {
        name: "marg_branch",
        source: "asd_marg_branch",
        company: "100.0 * (SUM(asd_profit_net) - SUM(asd_profit_ph)) \
                  / NULLIF(SUM(asd_sales_net) - SUM(asd_sales_ph), 0)",
    },
    SalesColumn {
        name: "marg_ph",
        source: "asd_marg_ph",
        company: "100.0 * SUM(asd_profit_ph) / NULLIF(SUM(asd_sales_ph), 0)",
    },
    SalesColumn {
        name: "marg_total",
        source: "asd_marg_total",
        company: "100.0 * SUM(asd_profit_net) / NULLIF(SUM(asd_sales_net), 0)",
    },
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SalesQuery {
    pub branch: Option<String>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    #[serde(default)]
    pub aggregate_company: bool,
    /// Comma-separated subset of [`SALES_COLUMNS`]
    pub columns: Option<String>,
}

impl SalesQuery {
    pub fn selected_columns(&self) -> Vec<SalesColumn> {
        let requested: Vec<&str> = self
            .columns
            .as_deref()
            .map(|raw| raw.split(',').map(str::trim).filter(|c| !c.is_empty()).collect())
            .unwrap_or_default();

        let selected: Vec<SalesColumn> = SALES_COLUMNS
            .iter()
            .filter(|c| requested.contains(&c.name))
            .copied()
            .collect();
        if selected.is_empty() {
            SALES_COLUMNS.to_vec()
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

    pub fn build_sql(&self, columns: &[SalesColumn]) -> QueryBuilder<'static, Postgres> {
        let select: Vec<String> = if self.aggregate_company {
            columns
                .iter()
                .map(|c| format!("({})::numeric AS {}", c.company, c.name))
                .collect()
        } else {
            ["asd_year", "asd_month", "asd_branch"]
                .iter()
                .map(|k| k.to_string())
                .chain(columns.iter().map(|c| format!("{} AS {}", c.source, c.name)))
                .collect()
        };

        let mut qb = QueryBuilder::new(format!(
            "SELECT {} FROM aggregated_sales_data WHERE TRUE",
            select.join(", ")
        ));
        if let Some(branch) = self.branch() {
            qb.push(" AND asd_branch = ").push_bind(branch);
        }
        if let Some(year) = self.year {
            qb.push(" AND asd_year = ").push_bind(year);
        }
        if let Some(month) = self.month {
            qb.push(" AND asd_month = ").push_bind(month);
        }
        if !self.aggregate_company {
            qb.push(" ORDER BY asd_year DESC, asd_month DESC, asd_branch");
        }
        qb
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesRow {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub branch: String,
    #[serde(flatten)]
    pub values: BTreeMap<&'static str, Decimal>,
}

impl SalesRow {
    fn decode(row: &PgRow, query: &SalesQuery, columns: &[SalesColumn]) -> Result<Self, sqlx::Error> {
        let (year, month, branch) = if query.aggregate_company {
            (query.year, query.month, "ALL".to_string())
        } else {
            (
                Some(row.try_get("asd_year")?),
                Some(row.try_get("asd_month")?),
                row.try_get("asd_branch")?,
            )
        };

        let mut values = BTreeMap::new();
        for column in columns {
            let value: Option<Decimal> = row.try_get(column.name)?;
            values.insert(column.name, value.unwrap_or_default());
        }
        Ok(Self { year, month, branch, values })
    }
}

pub async fn aggregated_sales(pool: &PgPool, query: &SalesQuery) -> AppResult<Vec<SalesRow>> {
    let columns = query.selected_columns();
    let rows = query.build_sql(&columns).build().fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| SalesRow::decode(row, query, &columns))
        .collect::<Result<Vec<_>, _>>()?)
}

/// `GET /api/aggregated_sales_data`
pub async fn get_aggregated_sales_data(
    State(state): State<AppState>,
    Query(query): Query<SalesQuery>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<DataEnvelope<SalesRow>>>> {
    let mut watch = Stopwatch::new(timing);
    let data = watch.time("query", aggregated_sales(&state.db, &query)).await?;
    Ok(Json(Timed::new(DataEnvelope { data }, watch)))
}
