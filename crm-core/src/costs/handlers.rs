use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;

use super::filters::{CostFilter, CostScope};
use super::store::{self, BranchPayout, CostSummary, RepresentativeCostReport, RepresentativePayout, COST_AUDIT};
use crate::actor::Actor;
use crate::app::AppState;
use crate::error::AppResult;
use crate::models::audit::AuditEntry;
use crate::models::cost::{CostInput, CostResponse};
use crate::pagination::PageParams;

#[derive(Debug, Serialize)]
pub struct CostListResponse {
    pub total: i64,
    pub costs: Vec<CostResponse>,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub cost_id: i32,
    pub audit_id: uuid::Uuid,
}

/// `GET /api/costs`
pub async fn list_costs(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<CostFilter>,
) -> AppResult<Json<CostListResponse>> {
    let page = page.validate()?;
    let (costs, total) = store::list(&state.db, &filter, page).await?;

    Ok(Json(CostListResponse {
        total,
        costs: costs.into_iter().map(CostResponse::from).collect(),
        offset: page.offset,
        limit: page.limit,
    }))
}

/// `GET /api/costs/:id`
pub async fn get_cost(State(state): State<AppState>, Path(cost_id): Path<i32>) -> AppResult<Json<CostResponse>> {
    let cost = store::get(&state.db, cost_id).await?;
    Ok(Json(cost.into()))
}

/// `POST /api/costs`
pub async fn create_cost(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<CostInput>,
) -> AppResult<(StatusCode, Json<CostResponse>)> {
    let today = state.config_dates.get_current().await?;
    let cost = store::create(&state.db, input, &actor, today).await?;
    Ok((StatusCode::CREATED, Json(cost.into())))
}

/// `PUT /api/costs/:id`
pub async fn update_cost(
    State(state): State<AppState>,
    Path(cost_id): Path<i32>,
    actor: Actor,
    Json(input): Json<CostInput>,
) -> AppResult<Json<CostResponse>> {
    let cost = store::update(&state.db, cost_id, input, &actor).await?;
    Ok(Json(cost.into()))
}

/// `DELETE /api/costs/:id`
pub async fn delete_cost(
    State(state): State<AppState>,
    Path(cost_id): Path<i32>,
    actor: Actor,
) -> AppResult<Json<DeleteResponse>> {
    let entry = store::delete(&state.db, cost_id, &actor).await?;
    Ok(Json(DeleteResponse {
        success: true,
        cost_id,
        audit_id: entry.id,
    }))
}

/// `GET /api/costs/:id/history`
///
/// Entries survive the cost itself, so a deleted cost still has a history.
pub async fn cost_history(
    State(state): State<AppState>,
    Path(cost_id): Path<i32>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    Ok(Json(COST_AUDIT.history(&state.db, cost_id.into()).await?))
}

/// `GET /api/costs/summary`
pub async fn summary(State(state): State<AppState>, Query(scope): Query<CostScope>) -> AppResult<Json<CostSummary>> {
    Ok(Json(store::summary(&state.db, &scope).await?))
}

/// `GET /api/costs/representatives-summary`
pub async fn representatives_summary(
    State(state): State<AppState>,
    Query(scope): Query<CostScope>,
) -> AppResult<Json<RepresentativeCostReport>> {
    Ok(Json(store::representatives_summary(&state.db, &scope).await?))
}

/// `GET /api/costs/branch_payouts`
pub async fn branch_payouts(
    State(state): State<AppState>,
    Query(scope): Query<CostScope>,
) -> AppResult<Json<Vec<BranchPayout>>> {
    Ok(Json(store::branch_payouts(&state.db, &scope).await?))
}

/// `GET /api/costs/representative_payouts`
pub async fn representative_payouts(
    State(state): State<AppState>,
    Query(scope): Query<CostScope>,
) -> AppResult<Json<Vec<RepresentativePayout>>> {
    Ok(Json(store::representative_payouts(&state.db, &scope).await?))
}

/// `GET /api/costs/authors`
pub async fn authors(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(store::authors(&state.db).await?))
}

/// `GET /api/costs/representatives`
pub async fn representatives(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(store::representatives(&state.db).await?))
}
