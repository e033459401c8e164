use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::app::AppState;
use crate::costs::filters::escape_like;
use crate::error::{AppError, AppResult};
use crate::models::client::{Client, ClientInput, ClientMapPoint};
use crate::models::snapshot::normalize_branch;
use crate::pagination::{Page, PageParams};

const CLIENT_COLUMNS: &str = "id, nip, nazwa, kod_pocztowy, miejscowosc, ulica, nr_nieruchomosci, \
    longitude, latitude, status_free, branch, rep";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFilter {
    pub nip: Option<String>,
    /// Case-insensitive substring of the client name
    pub nazwa: Option<String>,
    pub branch: Option<String>,
    pub status_free: Option<bool>,
}

impl ClientFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(nip) = present(&self.nip) {
            qb.push(" AND nip = ").push_bind(nip.to_string());
        }
        if let Some(name) = present(&self.nazwa) {
            qb.push(" AND nazwa ILIKE ")
                .push_bind(format!("%{}%", escape_like(name)));
        }
        if let Some(branch) = present(&self.branch) {
            qb.push(" AND branch = ").push_bind(normalize_branch(branch));
        }
        if let Some(free) = self.status_free {
            qb.push(" AND status_free = ").push_bind(free);
        }
    }
}

/// Filters of `GET /api/clients/map`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapFilter {
    pub branch: Option<String>,
    pub status_free: Option<bool>,
    pub rep: Option<String>,
}

impl MapFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" WHERE latitude IS NOT NULL AND longitude IS NOT NULL");
        if let Some(branch) = present(&self.branch) {
            qb.push(" AND branch = ").push_bind(normalize_branch(branch));
        }
        if let Some(free) = self.status_free {
            qb.push(" AND status_free = ").push_bind(free);
        }
        if let Some(rep) = present(&self.rep) {
            qb.push(" AND rep = ").push_bind(rep.to_string());
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ClientInput {
    fn validate(&self) -> AppResult<()> {
        if self.nip.trim().is_empty() {
            return Err(AppError::Validation("nip must not be blank".into()));
        }
        if self.nazwa.trim().is_empty() {
            return Err(AppError::Validation("nazwa must not be blank".into()));
        }
        Ok(())
    }
}

fn duplicate_nip(nip: &str) -> String {
    format!("Client with NIP '{}' already exists", nip)
}

fn not_found(id: i32) -> AppError {
    AppError::NotFound(format!("Client {} not found", id))
}

pub async fn list(pool: &PgPool, filter: &ClientFilter, page: PageParams) -> AppResult<Page<Client>> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM clients");
    filter.push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new(format!("SELECT {} FROM clients", CLIENT_COLUMNS));
    filter.push_where(&mut select);
    select
        .push(" ORDER BY nazwa, id LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
    let clients = select.build_query_as::<Client>().fetch_all(pool).await?;

    Ok(Page::new(clients, total, page))
}

/// Geolocated clients only; rows without both coordinates never appear.
pub async fn map_points(pool: &PgPool, filter: &MapFilter) -> AppResult<Vec<ClientMapPoint>> {
    let mut select = QueryBuilder::new(format!("SELECT {} FROM clients", CLIENT_COLUMNS));
    filter.push_where(&mut select);
    select.push(" ORDER BY id");
    let clients = select.build_query_as::<Client>().fetch_all(pool).await?;
    Ok(clients.iter().filter_map(Client::map_point).collect())
}

pub async fn get(pool: &PgPool, id: i32) -> AppResult<Client> {
    sqlx::query_as::<_, Client>(&format!("SELECT {} FROM clients WHERE id = $1", CLIENT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found(id))
}

pub async fn create(pool: &PgPool, input: ClientInput) -> AppResult<Client> {
    input.validate()?;
    let nip = input.nip.trim().to_string();
    let client = sqlx::query_as::<_, Client>(&format!(
        r#"
        INSERT INTO clients (nip, nazwa, kod_pocztowy, miejscowosc, ulica, nr_nieruchomosci,
                             longitude, latitude, status_free, branch, rep)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        CLIENT_COLUMNS
    ))
    .bind(&nip)
    .bind(&input.nazwa)
    .bind(&input.kod_pocztowy)
    .bind(&input.miejscowosc)
    .bind(&input.ulica)
    .bind(&input.nr_nieruchomosci)
    .bind(input.longitude)
    .bind(input.latitude)
    .bind(input.status_free)
    .bind(&input.branch)
    .bind(&input.rep)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_unique_violation(e, duplicate_nip(&nip)))?;

    info!("Client {} ({}) created", client.id, nip);
    Ok(client)
}

pub async fn update(pool: &PgPool, id: i32, input: ClientInput) -> AppResult<Client> {
    input.validate()?;
    let nip = input.nip.trim().to_string();
    let client = sqlx::query_as::<_, Client>(&format!(
        r#"
        UPDATE clients
        SET nip = $2, nazwa = $3, kod_pocztowy = $4, miejscowosc = $5, ulica = $6,
            nr_nieruchomosci = $7, longitude = $8, latitude = $9, status_free = $10,
            branch = $11, rep = $12
        WHERE id = $1
        RETURNING {}
        "#,
        CLIENT_COLUMNS
    ))
    .bind(id)
    .bind(&nip)
    .bind(&input.nazwa)
    .bind(&input.kod_pocztowy)
    .bind(&input.miejscowosc)
    .bind(&input.ulica)
    .bind(&input.nr_nieruchomosci)
    .bind(input.longitude)
    .bind(input.latitude)
    .bind(input.status_free)
    .bind(&input.branch)
    .bind(&input.rep)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::from_unique_violation(e, duplicate_nip(&nip)))?
    .ok_or_else(|| not_found(id))?;

    info!("Client {} updated", id);
    Ok(client)
}

pub async fn delete(pool: &PgPool, id: i32) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM clients WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    info!("Client {} deleted", id);
    Ok(())
}

/// `GET /api/clients`
pub async fn list_clients(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<ClientFilter>,
) -> AppResult<Json<Page<Client>>> {
    let page = page.validate()?;
    Ok(Json(list(&state.db, &filter, page).await?))
}

/// `GET /api/clients/map`
pub async fn client_map(
    State(state): State<AppState>,
    Query(filter): Query<MapFilter>,
) -> AppResult<Json<Vec<ClientMapPoint>>> {
    Ok(Json(map_points(&state.db, &filter).await?))
}

/// `GET /api/clients/:id`
pub async fn get_client(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<Json<Client>> {
    Ok(Json(get(&state.db, id).await?))
}

/// `POST /api/clients`
pub async fn create_client(
    State(state): State<AppState>,
    Json(input): Json<ClientInput>,
) -> AppResult<(StatusCode, Json<Client>)> {
    let client = create(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// `PUT /api/clients/:id`
pub async fn update_client(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(input): Json<ClientInput>,
) -> AppResult<Json<Client>> {
    Ok(Json(update(&state.db, id, input).await?))
}

/// `DELETE /api/clients/:id`
pub async fn delete_client(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<StatusCode> {
    delete(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
