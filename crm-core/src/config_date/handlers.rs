use axum::{body::Bytes, extract::State, response::Json};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::models::config_date::{AdvanceDateRequest, ConfigDate};
use crate::refresh::{Disposition, RefreshStatus};

/// Refresh acknowledgement attached to a date update.
#[derive(Debug, Serialize)]
pub struct RefreshAck {
    pub scheduled: bool,
    pub completed: bool,
    pub cycle_id: u64,
    pub disposition: Disposition,
    pub coalesced: bool,
}

#[derive(Debug, Serialize)]
pub struct DateUpdateResponse {
    pub success: bool,
    #[serde(flatten)]
    pub date: ConfigDate,
    pub execution_time_seconds: f64,
    pub refresh: RefreshAck,
    pub message: String,
}

/// `GET /api/date`
pub async fn get_date(State(state): State<AppState>) -> AppResult<Json<ConfigDate>> {
    let date = state.config_dates.get_current().await?;
    Ok(Json(date))
}

/// `PUT /api/config/update-date`
///
/// The body is optional. Without one the date moves to today's calendar
/// date, which is what the daily rollover job sends.
pub async fn update_date(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<DateUpdateResponse>> {
    let target = requested_date(&body)?.unwrap_or_else(|| Utc::now().date_naive());
    info!("Reference date update requested: {}", target);

    let outcome = state.config_dates.advance_to(target).await?;

    Ok(Json(DateUpdateResponse {
        success: true,
        date: outcome.date,
        execution_time_seconds: round4(outcome.elapsed.as_secs_f64()),
        refresh: RefreshAck {
            scheduled: true,
            completed: false,
            cycle_id: outcome.refresh.cycle_id,
            disposition: outcome.refresh.disposition,
            coalesced: outcome.refresh.coalesced(),
        },
        message: "Reference date updated; aggregates are being refreshed in the background."
            .to_string(),
    }))
}

/// `GET /api/config/refresh-status`
pub async fn refresh_status(State(state): State<AppState>) -> Json<RefreshStatus> {
    Json(state.config_dates.refresh().status())
}

fn requested_date(body: &[u8]) -> AppResult<Option<NaiveDate>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: AdvanceDateRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid date update body: {}", e)))?;
    Ok(request.date)
}

fn round4(seconds: f64) -> f64 {
    (seconds * 10_000.0).round() / 10_000.0
}
