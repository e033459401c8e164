//! Cost kinds: the classification every cost must reference.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgPool;
use tracing::info;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::models::cost_kind::{CostKind, CostKindInput};

pub async fn list(pool: &PgPool) -> AppResult<Vec<CostKind>> {
    Ok(
        sqlx::query_as::<_, CostKind>("SELECT id, kind FROM cost_kinds ORDER BY kind")
            .fetch_all(pool)
            .await?,
    )
}

pub async fn get(pool: &PgPool, id: i32) -> AppResult<CostKind> {
    sqlx::query_as::<_, CostKind>("SELECT id, kind FROM cost_kinds WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found(id))
}

/// Adds a kind. A duplicate name is a `Conflict`, whether caught by the
/// pre-check or by the unique constraint.
pub async fn create(pool: &PgPool, input: &CostKindInput) -> AppResult<CostKind> {
    let kind = required(input)?;
    if exists(pool, kind).await? {
        return Err(duplicate(kind));
    }

    let created = sqlx::query_as::<_, CostKind>(
        "INSERT INTO cost_kinds (kind) VALUES ($1) RETURNING id, kind",
    )
    .bind(kind)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_unique_violation(e, format!("Cost kind '{}' already exists", kind)))?;

    info!("Cost kind '{}' created", created.kind);
    Ok(created)
}

/// Renames a kind. Costs reference kinds by name, so a kind that is still
/// in use cannot be renamed.
pub async fn rename(pool: &PgPool, id: i32, input: &CostKindInput) -> AppResult<CostKind> {
    let kind = required(input)?;
    let mut tx = pool.begin().await?;

    let current: String = sqlx::query_scalar("SELECT kind FROM cost_kinds WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(id))?;

    if current == kind {
        tx.commit().await?;
        return Ok(CostKind { id, kind: current });
    }
    if usage_count(&mut tx, &current).await? > 0 {
        return Err(in_use(&current));
    }

    let renamed = sqlx::query_as::<_, CostKind>(
        "UPDATE cost_kinds SET kind = $2 WHERE id = $1 RETURNING id, kind",
    )
    .bind(id)
    .bind(kind)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::from_unique_violation(e, format!("Cost kind '{}' already exists", kind)))?;
    tx.commit().await?;

    info!("Cost kind '{}' renamed to '{}'", current, renamed.kind);
    Ok(renamed)
}

/// Removes a kind that no cost references.
pub async fn delete(pool: &PgPool, id: i32) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    let current: String = sqlx::query_scalar("SELECT kind FROM cost_kinds WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(id))?;

    if usage_count(&mut tx, &current).await? > 0 {
        return Err(in_use(&current));
    }

    sqlx::query("DELETE FROM cost_kinds WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Cost kind '{}' deleted", current);
    Ok(())
}

async fn exists(pool: &PgPool, kind: &str) -> AppResult<bool> {
    Ok(
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM cost_kinds WHERE kind = $1)")
            .bind(kind)
            .fetch_one(pool)
            .await?,
    )
}

async fn usage_count(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, kind: &str) -> AppResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM all_costs WHERE cost_kind = $1")
            .bind(kind)
            .fetch_one(&mut **tx)
            .await?,
    )
}

fn required(input: &CostKindInput) -> AppResult<&str> {
    input
        .normalized()
        .ok_or_else(|| AppError::Validation("Cost kind must not be blank".into()))
}

fn duplicate(kind: &str) -> AppError {
    AppError::Conflict(format!("Cost kind '{}' already exists", kind))
}

fn in_use(kind: &str) -> AppError {
    AppError::ReferenceNotFound(format!(
        "Cost kind '{}' is still referenced by existing costs",
        kind
    ))
}

fn not_found(id: i32) -> AppError {
    AppError::NotFound(format!("Cost kind {} not found", id))
}

/// `GET /api/cost_kinds`
pub async fn list_kinds(State(state): State<AppState>) -> AppResult<Json<Vec<CostKind>>> {
    Ok(Json(list(&state.db).await?))
}

/// `POST /api/cost_kinds`
pub async fn create_kind(
    State(state): State<AppState>,
    Json(input): Json<CostKindInput>,
) -> AppResult<(StatusCode, Json<CostKind>)> {
    let kind = create(&state.db, &input).await?;
    Ok((StatusCode::CREATED, Json(kind)))
}

/// `GET /api/cost_kinds/:id`
pub async fn get_kind(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<Json<CostKind>> {
    Ok(Json(get(&state.db, id).await?))
}

/// `PUT /api/cost_kinds/:id`
pub async fn rename_kind(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(input): Json<CostKindInput>,
) -> AppResult<Json<CostKind>> {
    Ok(Json(rename(&state.db, id, &input).await?))
}

/// `DELETE /api/cost_kinds/:id`
pub async fn delete_kind(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<StatusCode> {
    delete(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
