//! Sales representative reports read from `representative_aggregated_data`.

use axum::extract::{Query, State};
use axum::response::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, QueryBuilder};
use tracing::info;

use super::timings::{DataEnvelope, Stopwatch, Timed, TimingParams};
use crate::app::AppState;
use crate::config_date::ConfigDateService;
use crate::error::{AppError, AppResult};
use crate::models::snapshot::{normalize_branch, RepresentativeAggregate};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepresentativesQuery {
    pub year: Option<i32>,
    pub branch: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RepresentativesResponse {
    pub representatives: Vec<String>,
    pub year: i32,
}

/// An explicit year, or the reference year. A missing reference date is
/// an error rather than a fallback to the system clock.
async fn year_or_reference(service: &ConfigDateService, year: Option<i32>) -> AppResult<i32> {
    match year {
        Some(year) => Ok(year),
        None => Ok(service.get_current().await?.year()),
    }
}

/// Representatives with positive sales and positive profit in `year`.
pub async fn active_representatives(pool: &PgPool, year: i32, branch: Option<&str>) -> AppResult<Vec<String>> {
    let mut qb = QueryBuilder::new(
        "SELECT DISTINCT representative_name FROM representative_aggregated_data \
         WHERE COALESCE(net_sales_total, 0) > 0 AND COALESCE(profit_total, 0) > 0 AND year = ",
    );
    qb.push_bind(year);
    if let Some(branch) = branch.filter(|b| !b.trim().is_empty()) {
        qb.push(" AND branch_name = ").push_bind(normalize_branch(branch));
    }
    qb.push(" ORDER BY representative_name");
    Ok(qb.build_query_scalar().fetch_all(pool).await?)
}

/// `GET /api/representatives`
pub async fn get_representatives(
    State(state): State<AppState>,
    Query(query): Query<RepresentativesQuery>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<RepresentativesResponse>>> {
    let mut watch = Stopwatch::new(timing);
    let year = year_or_reference(&state.config_dates, query.year).await?;
    let representatives = watch
        .time("query", active_representatives(&state.db, year, query.branch.as_deref()))
        .await?;
    info!("{} active representatives in {}", representatives.len(), year);
    Ok(Json(Timed::new(RepresentativesResponse { representatives, year }, watch)))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepresentativeDataQuery {
    pub representative: Option<String>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub branch_name: Option<String>,
}

/// One representative, branch and month, with API column names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepresentativeRow {
    pub representative_name: String,
    pub year: i32,
    pub month: i32,
    pub branch_name: String,
    pub sales_net: Decimal,
    pub profit_net: Decimal,
    pub sales_payd: Decimal,
    pub profit_payd: Decimal,
    pub sales_payd_percent: Decimal,
    pub marg_total: Decimal,
    pub paid_profit_margin_percentage: Decimal,
}

impl From<RepresentativeAggregate> for RepresentativeRow {
    fn from(row: RepresentativeAggregate) -> Self {
        Self {
            representative_name: row.representative_name,
            year: row.year,
            month: row.month,
            branch_name: row.branch_name,
            sales_net: row.net_sales_total.unwrap_or_default(),
            profit_net: row.profit_total.unwrap_or_default(),
            sales_payd: row.net_sales_paid.unwrap_or_default(),
            profit_payd: row.profit_paid.unwrap_or_default(),
            sales_payd_percent: row.sales_paid_percentage.unwrap_or_default(),
            marg_total: row.profit_margin_percentage.unwrap_or_default(),
            paid_profit_margin_percentage: row.paid_profit_margin_percentage.unwrap_or_default(),
        }
    }
}

fn push_row_filters(qb: &mut QueryBuilder<'static, sqlx::Postgres>, query: &RepresentativeDataQuery) {
    if let Some(rep) = query.representative.as_deref().filter(|r| !r.trim().is_empty()) {
        qb.push(" AND representative_name = ").push_bind(rep.trim().to_string());
    }
    if let Some(year) = query.year {
        qb.push(" AND year = ").push_bind(year);
    }
    if let Some(month) = query.month {
        qb.push(" AND month = ").push_bind(month);
    }
    if let Some(branch) = query.branch_name.as_deref().filter(|b| !b.trim().is_empty()) {
        qb.push(" AND branch_name = ").push_bind(normalize_branch(branch));
    }
}

pub async fn representative_data(pool: &PgPool, query: &RepresentativeDataQuery) -> AppResult<Vec<RepresentativeRow>> {
    let mut qb = QueryBuilder::new(
        "SELECT year, month, branch_name, representative_name, net_sales_total, net_sales_paid, \
         profit_total, profit_paid, sales_paid_percentage, profit_margin_percentage, \
         paid_profit_margin_percentage FROM representative_aggregated_data WHERE TRUE",
    );
    push_row_filters(&mut qb, query);
    qb.push(" ORDER BY year DESC, month DESC, branch_name, representative_name");

    let rows = qb.build_query_as::<RepresentativeAggregate>().fetch_all(pool).await?;
    Ok(rows.into_iter().map(RepresentativeRow::from).collect())
}

/// `GET /api/aggregated_representative_data`
pub async fn get_aggregated_representative_data(
    State(state): State<AppState>,
    Query(query): Query<RepresentativeDataQuery>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<DataEnvelope<RepresentativeRow>>>> {
    let mut watch = Stopwatch::new(timing);
    let data = watch.time("query", representative_data(&state.db, &query)).await?;
    Ok(Json(Timed::new(DataEnvelope { data }, watch)))
}

pub const DEFAULT_SHARE_LIMIT: i64 = 3000;
pub const MAX_SHARE_LIMIT: i64 = 10_000;

/// Column set of the representative-share report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldsSet {
    #[default]
    Full,
    /// Profit share only; sales figures come back as zero
    Minimal,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ShareParams {
    #[serde(default = "default_share_limit")]
    pub limit: i64,
    #[serde(default)]
    pub fields_set: FieldsSet,
}

fn default_share_limit() -> i64 {
    DEFAULT_SHARE_LIMIT
}

impl Default for ShareParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SHARE_LIMIT,
            fields_set: FieldsSet::Full,
        }
    }
}

impl ShareParams {
    pub fn validate(self) -> AppResult<Self> {
        if !(1..=MAX_SHARE_LIMIT).contains(&self.limit) {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_SHARE_LIMIT
            )));
        }
        Ok(self)
    }
}

/// Row of `representative_aggregated_data` with the representative's own
/// profit share. Sales columns are NULL in the minimal column set.
#[derive(Debug, Clone, FromRow)]
struct RepresentativeShare {
    year: i32,
    month: i32,
    branch_name: String,
    representative_name: String,
    net_sales_total: Option<Decimal>,
    net_sales_paid: Option<Decimal>,
    sales_paid_percentage: Option<Decimal>,
    profit_margin_percentage: Option<Decimal>,
    paid_profit_margin_percentage: Option<Decimal>,
    rep_profit_total: Option<Decimal>,
    rep_profit_payd: Option<Decimal>,
}

impl From<RepresentativeShare> for RepresentativeRow {
    fn from(row: RepresentativeShare) -> Self {
        Self {
            representative_name: row.representative_name,
            year: row.year,
            month: row.month,
            branch_name: row.branch_name,
            sales_net: row.net_sales_total.unwrap_or_default(),
            profit_net: row.rep_profit_total.unwrap_or_default(),
            sales_payd: row.net_sales_paid.unwrap_or_default(),
            profit_payd: row.rep_profit_payd.unwrap_or_default(),
            sales_payd_percent: row.sales_paid_percentage.unwrap_or_default(),
            marg_total: row.profit_margin_percentage.unwrap_or_default(),
            paid_profit_margin_percentage: row.paid_profit_margin_percentage.unwrap_or_default(),
        }
    }
}

fn share_select(fields_set: FieldsSet) -> &'static str {
    match fields_set {
        FieldsSet::Full => {
            "SELECT year, month, branch_name, representative_name, net_sales_total, \
             net_sales_paid, sales_paid_percentage, profit_margin_percentage, \
             paid_profit_margin_percentage, rep_profit_total, rep_profit_payd \
             FROM representative_aggregated_data WHERE TRUE"
        }
        FieldsSet::Minimal => {
            "SELECT year, month, branch_name, representative_name, \
             NULL::numeric AS net_sales_total, NULL::numeric AS net_sales_paid, \
             NULL::numeric AS sales_paid_percentage, NULL::numeric AS profit_margin_percentage, \
             NULL::numeric AS paid_profit_margin_percentage, rep_profit_total, rep_profit_payd \
             FROM representative_aggregated_data WHERE TRUE"
        }
    }
}

fn share_query(query: &RepresentativeDataQuery, params: ShareParams) -> QueryBuilder<'static, sqlx::Postgres> {
    let mut qb = QueryBuilder::new(share_select(params.fields_set));
    push_row_filters(&mut qb, query);
    qb.push(" ORDER BY year DESC, month DESC, branch_name, representative_name LIMIT ");
    qb.push_bind(params.limit);
    qb
}

/// Rows keyed like [`representative_data`], with profits replaced by the
/// representative's share (`rep_profit_total`, `rep_profit_payd`).
pub async fn representative_share_data(
    pool: &PgPool,
    query: &RepresentativeDataQuery,
    params: ShareParams,
) -> AppResult<Vec<RepresentativeRow>> {
    let rows = share_query(query, params)
        .build_query_as::<RepresentativeShare>()
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(RepresentativeRow::from).collect())
}

/// `GET /api/aggregated_representative_ind_data`
pub async fn get_aggregated_representative_ind_data(
    State(state): State<AppState>,
    Query(query): Query<RepresentativeDataQuery>,
    Query(params): Query<ShareParams>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<DataEnvelope<RepresentativeRow>>>> {
    let params = params.validate()?;
    let mut watch = Stopwatch::new(timing);
    let data = watch
        .time("query", representative_share_data(&state.db, &query, params))
        .await?;
    info!(
        "{} representative share rows ({:?}, limit {})",
        data.len(),
        params.fields_set,
        params.limit
    );
    Ok(Json(Timed::new(DataEnvelope { data }, watch)))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonthlyQuery {
    pub representative: Option<String>,
    pub year: Option<i32>,
}

/// One month of a single representative, summed over branches.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct RepresentativeMonth {
    pub representative_name: String,
    pub year: i32,
    pub month: i32,
    pub sales_net: Decimal,
    pub profit_net: Decimal,
    pub sales_payd: Decimal,
    pub profit_payd: Decimal,
    pub sales_payd_percent: Decimal,
    pub marg_total: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RepresentativeMonthsResponse {
    pub representative: String,
    pub year: i32,
    pub current_month: u32,
    pub current_month_data: Option<RepresentativeMonth>,
    pub historical_data: Vec<RepresentativeMonth>,
}

pub async fn representative_months(pool: &PgPool, representative: &str, year: i32) -> AppResult<Vec<RepresentativeMonth>> {
    Ok(sqlx::query_as::<_, RepresentativeMonth>(
        r#"
        SELECT representative_name, year, month,
               COALESCE(SUM(net_sales_total), 0) AS sales_net,
               COALESCE(SUM(profit_total), 0) AS profit_net,
               COALESCE(SUM(net_sales_paid), 0) AS sales_payd,
               COALESCE(SUM(profit_paid), 0) AS profit_payd,
               COALESCE(ROUND(SUM(net_sales_paid) / NULLIF(SUM(net_sales_total), 0) * 100, 2), 0)
                   AS sales_payd_percent,
               COALESCE(ROUND(SUM(profit_total) / NULLIF(SUM(net_sales_total), 0) * 100, 2), 0)
                   AS marg_total
        FROM representative_aggregated_data
        WHERE representative_name = $1 AND year = $2
        GROUP BY representative_name, year, month
        ORDER BY month
        "#,
    )
    .bind(representative)
    .bind(year)
    .fetch_all(pool)
    .await?)
}

/// Splits months into the reference month and the rest, keeping order.
fn split_at_month(
    rows: Vec<RepresentativeMonth>,
    current_month: u32,
) -> (Option<RepresentativeMonth>, Vec<RepresentativeMonth>) {
    let mut current = None;
    let mut historical = Vec::with_capacity(rows.len());
    for row in rows {
        if u32::try_from(row.month).ok() == Some(current_month) {
            current = Some(row);
        } else {
            historical.push(row);
        }
    }
    (current, historical)
}

/// `GET /api/representative_data`
///
/// One representative's months, with the reference month separated from
/// the others. The reference date is required even when `year` is given,
/// because it decides which month is current.
pub async fn get_representative_data(
    State(state): State<AppState>,
    Query(query): Query<MonthlyQuery>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<RepresentativeMonthsResponse>>> {
    let representative = query
        .representative
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::Validation("representative is required".into()))?
        .to_string();

    let mut watch = Stopwatch::new(timing);
    let reference = state.config_dates.get_current().await?;
    let year = query.year.unwrap_or_else(|| reference.year());

    let rows = watch
        .time("query", representative_months(&state.db, &representative, year))
        .await?;
    let (current_month_data, historical_data) = split_at_month(rows, reference.month());

    Ok(Json(Timed::new(
        RepresentativeMonthsResponse {
            representative,
            year,
            current_month: reference.month(),
            current_month_data,
            historical_data,
        },
        watch,
    )))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PerformanceQuery {
    pub year: Option<i32>,
    #[serde(default)]
    pub include_branches: bool,
}

/// Yearly totals of one representative, optionally split by branch.
/// Profits are the representative's share, margins use total profit.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct RepresentativePerformance {
    pub representative_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub total_sales: Decimal,
    pub total_profit: Decimal,
    pub paid_sales: Decimal,
    pub paid_profit: Decimal,
    pub margin_percentage: Decimal,
    pub paid_percentage: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PerformanceResponse {
    pub year: i32,
    pub representatives: Vec<RepresentativePerformance>,
}

fn performance_sql(include_branches: bool) -> String {
    let (branch_column, group_by) = if include_branches {
        ("branch_name", "representative_name, branch_name")
    } else {
        ("NULL::varchar", "representative_name")
    };
    format!(
        "SELECT representative_name, {} AS branch_name, \
         COALESCE(SUM(net_sales_total), 0) AS total_sales, \
         COALESCE(SUM(rep_profit_total), 0) AS total_profit, \
         COALESCE(SUM(net_sales_paid), 0) AS paid_sales, \
         COALESCE(SUM(rep_profit_payd), 0) AS paid_profit, \
         COALESCE(SUM(profit_total) / NULLIF(SUM(net_sales_total), 0) * 100, 0) AS margin_percentage, \
         COALESCE(SUM(net_sales_paid) / NULLIF(SUM(net_sales_total), 0) * 100, 0) AS paid_percentage \
         FROM representative_aggregated_data WHERE year = $1 \
         GROUP BY {} ORDER BY SUM(net_sales_total) DESC NULLS LAST",
        branch_column, group_by
    )
}

pub async fn performance(pool: &PgPool, year: i32, include_branches: bool) -> AppResult<Vec<RepresentativePerformance>> {
    Ok(
        sqlx::query_as::<_, RepresentativePerformance>(&performance_sql(include_branches))
            .bind(year)
            .fetch_all(pool)
            .await?,
    )
}

/// `GET /api/representative_performance`
pub async fn get_representative_performance(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<PerformanceResponse>>> {
    let mut watch = Stopwatch::new(timing);
    let year = year_or_reference(&state.config_dates, query.year).await?;
    let representatives = watch
        .time("query", performance(&state.db, year, query.include_branches))
        .await?;
    Ok(Json(Timed::new(PerformanceResponse { year, representatives }, watch)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_grouping() {
        let by_rep = performance_sql(false);
        assert!(by_rep.contains("NULL::varchar AS branch_name"));
        assert!(by_rep.contains("GROUP BY representative_name ORDER BY"));

        let by_branch = performance_sql(true);
        assert!(by_branch.contains("GROUP BY representative_name, branch_name"));
    }

    #[test]
    fn test_row_mapping_defaults_missing_values() {
        let row = RepresentativeRow::from(RepresentativeAggregate {
            year: 2024,
            month: 12,
            branch_name: "Pcim".into(),
            representative_name: "Ewa Nowak".into(),
            net_sales_total: Some(Decimal::new(150000, 2)),
            net_sales_paid: None,
            profit_total: Some(Decimal::new(30000, 2)),
            profit_paid: None,
            sales_paid_percentage: None,
            profit_margin_percentage: Some(Decimal::new(20, 0)),
            paid_profit_margin_percentage: None,
        });
        assert_eq!(row.sales_net, Decimal::new(150000, 2));
        assert_eq!(row.sales_payd, Decimal::ZERO);
        assert_eq!(row.marg_total, Decimal::new(20, 0));
    }

    #[test]
    fn test_performance_without_branches_omits_branch_name() {
        let perf = RepresentativePerformance {
            representative_name: "Jan Kowalski".into(),
            branch_name: None,
            total_sales: Decimal::ONE,
            total_profit: Decimal::ONE,
            paid_sales: Decimal::ONE,
            paid_profit: Decimal::ONE,
            margin_percentage: Decimal::ONE,
            paid_percentage: Decimal::ONE,
        };
        let json = serde_json::to_value(perf).expect("serialize");
        assert!(json.get("branch_name").is_none());
    }

    fn month(m: i32, sales_cents: i64) -> RepresentativeMonth {
        RepresentativeMonth {
            representative_name: "Jan Kowalski".into(),
            year: 2024,
            month: m,
            sales_net: Decimal::new(sales_cents, 2),
            profit_net: Decimal::ZERO,
            sales_payd: Decimal::ZERO,
            profit_payd: Decimal::ZERO,
            sales_payd_percent: Decimal::ZERO,
            marg_total: Decimal::ZERO,
        }
    }

    #[test]
    fn test_split_separates_reference_month() {
        let (current, historical) = split_at_month(vec![month(10, 100), month(11, 200), month(12, 300)], 11);
        assert_eq!(current.map(|m| m.sales_net), Some(Decimal::new(200, 2)));
        assert_eq!(historical.iter().map(|m| m.month).collect::<Vec<_>>(), vec![10, 12]);
    }

    #[test]
    fn test_split_without_reference_month_rows() {
        let (current, historical) = split_at_month(vec![month(1, 100)], 6);
        assert!(current.is_none());
        assert_eq!(historical.len(), 1);

        let (current, historical) = split_at_month(Vec::new(), 6);
        assert!(current.is_none());
        assert!(historical.is_empty());
    }

    #[test]
    fn test_share_params_defaults_and_bounds() {
        let params: ShareParams = serde_json::from_value(serde_json::json!({})).expect("defaults");
        assert_eq!(params.limit, DEFAULT_SHARE_LIMIT);
        assert_eq!(params.fields_set, FieldsSet::Full);

        let minimal: ShareParams =
            serde_json::from_value(serde_json::json!({"fields_set": "minimal", "limit": 10})).expect("minimal");
        assert_eq!(minimal.fields_set, FieldsSet::Minimal);
        assert!(minimal.validate().is_ok());

        let too_many = ShareParams {
            limit: MAX_SHARE_LIMIT + 1,
            ..ShareParams::default()
        };
        assert_eq!(too_many.validate().unwrap_err().code(), "validation_error");
        let none = ShareParams {
            limit: 0,
            ..ShareParams::default()
        };
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_share_query_reads_representative_profit_columns() {
        let query = RepresentativeDataQuery {
            representative: Some("Jan Kowalski".into()),
            year: Some(2024),
            ..RepresentativeDataQuery::default()
        };
        let full = share_query(&query, ShareParams::default()).sql().to_string();
        assert!(full.contains("rep_profit_total, rep_profit_payd"));
        assert!(full.contains(" AND representative_name = $1 AND year = $2"));
        assert!(full.ends_with("LIMIT $3"));
        assert!(!full.contains("profit_total, profit_paid"));

        let minimal = ShareParams {
            fields_set: FieldsSet::Minimal,
            ..ShareParams::default()
        };
        let sql = share_query(&query, minimal).sql().to_string();
        assert!(sql.contains("NULL::numeric AS net_sales_total"));
    }

    #[test]
    fn test_minimal_share_row_zeroes_sales() {
        let row = RepresentativeRow::from(RepresentativeShare {
            year: 2024,
            month: 12,
            branch_name: "Lublin".into(),
            representative_name: "Ewa Nowak".into(),
            net_sales_total: None,
            net_sales_paid: None,
            sales_paid_percentage: None,
            profit_margin_percentage: None,
            paid_profit_margin_percentage: None,
            rep_profit_total: Some(Decimal::new(45000, 2)),
            rep_profit_payd: Some(Decimal::new(30000, 2)),
        });
        assert_eq!(row.profit_net, Decimal::new(45000, 2));
        assert_eq!(row.profit_payd, Decimal::new(30000, 2));
        assert_eq!(row.sales_net, Decimal::ZERO);
        assert_eq!(row.marg_total, Decimal::ZERO);
    }
}
