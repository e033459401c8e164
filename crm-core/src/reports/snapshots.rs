//! Reads of the precomputed snapshot tables.
//!
//! These tables are rewritten by each refresh cycle; between procedure
//! commits a reader may see some tables already refreshed and others not.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Serialize;
use sqlx::PgPool;

use super::timings::{Stopwatch, Timed, TimingParams};
use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::models::snapshot::{HistoricalSnapshot, PeriodSnapshot, YearTotals};

/// `aggregation_type` keys of `aggregated_data`.
const TODAY: &str = "today";
const CURRENT_MONTH: &str = "current_month";

#[derive(Debug, Serialize)]
pub struct YearsResponse {
    pub years: Vec<i32>,
    #[serde(rename = "currentYear")]
    pub current_year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct FirstStats {
    pub daily: Option<PeriodSnapshot>,
    pub monthly: Option<PeriodSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct SumStats {
    pub year_totals: YearTotals,
}

#[derive(Debug, Serialize)]
pub struct SecondStats {
    pub historical: Vec<HistoricalSnapshot>,
}

pub async fn transaction_years(pool: &PgPool) -> AppResult<Vec<i32>> {
    Ok(sqlx::query_scalar(
        "SELECT DISTINCT year FROM transactions WHERE year IS NOT NULL ORDER BY year DESC",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn period_snapshot(pool: &PgPool, aggregation_type: &str) -> AppResult<Option<PeriodSnapshot>> {
    Ok(sqlx::query_as::<_, PeriodSnapshot>(
        "SELECT * FROM aggregated_data WHERE aggregation_type = $1",
    )
    .bind(aggregation_type)
    .fetch_optional(pool)
    .await?)
}

pub async fn year_totals(pool: &PgPool) -> AppResult<YearTotals> {
    sqlx::query_as::<_, YearTotals>("SELECT * FROM aggregated_data_sums WHERE id = 1")
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Aggregated sums data not found".into()))
}

pub async fn history(pool: &PgPool) -> AppResult<Vec<HistoricalSnapshot>> {
    Ok(sqlx::query_as::<_, HistoricalSnapshot>(
        "SELECT * FROM aggregated_data_hist ORDER BY aggregation_month DESC",
    )
    .fetch_all(pool)
    .await?)
}

/// `GET /api/years`
///
/// A missing reference date yields `currentYear: null`; the year list is
/// still served.
pub async fn get_years(State(state): State<AppState>) -> AppResult<Json<YearsResponse>> {
    let years = transaction_years(&state.db).await?;
    let current_year = state.config_dates.lookup().await?.found().map(|d| d.year());
    Ok(Json(YearsResponse { years, current_year }))
}

/// `GET /api/first_stats`
pub async fn get_first_stats(
    State(state): State<AppState>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<FirstStats>>> {
    let mut watch = Stopwatch::new(timing);
    let daily = watch.time("daily", period_snapshot(&state.db, TODAY)).await?;
    let monthly = watch
        .time("monthly", period_snapshot(&state.db, CURRENT_MONTH))
        .await?;
    Ok(Json(Timed::new(FirstStats { daily, monthly }, watch)))
}

/// `GET /api/sum_stats`
pub async fn get_sum_stats(
    State(state): State<AppState>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<SumStats>>> {
    let mut watch = Stopwatch::new(timing);
    let year_totals = watch.time("query", year_totals(&state.db)).await?;
    Ok(Json(Timed::new(SumStats { year_totals }, watch)))
}

/// `GET /api/second_stats`
pub async fn get_second_stats(
    State(state): State<AppState>,
    Query(timing): Query<TimingParams>,
) -> AppResult<Json<Timed<SecondStats>>> {
    let mut watch = Stopwatch::new(timing);
    let historical = watch.time("historical", history(&state.db)).await?;
    Ok(Json(Timed::new(SecondStats { historical }, watch)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_years_response_uses_camel_case_current_year() {
        let json = serde_json::to_value(YearsResponse {
            years: vec![2024, 2023],
            current_year: None,
        })
        .expect("serialize");
        assert_eq!(json, serde_json::json!({"years": [2024, 2023], "currentYear": null}));
    }

    #[test]
    fn test_first_stats_serializes_missing_periods_as_null() {
        let json = serde_json::to_value(FirstStats {
            daily: None,
            monthly: None,
        })
        .expect("serialize");
        assert!(json["daily"].is_null());
        assert!(json["monthly"].is_null());
    }
}
