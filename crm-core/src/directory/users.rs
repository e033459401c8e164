use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use sqlx::{PgPool, QueryBuilder};
use tracing::info;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::models::user::{User, UserInput, UserResponse};
use crate::pagination::{Page, PageParams};

const USER_COLUMNS: &str =
    "id, cognito_user_name, name, full_name, position, branch, longitude, latitude, created_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub cognito_user_name: Option<String>,
    pub branch: Option<String>,
    pub position: Option<String>,
}

impl UserFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'static, sqlx::Postgres>) {
        qb.push(" WHERE TRUE");
        let equalities = [
            ("cognito_user_name", &self.cognito_user_name),
            ("branch", &self.branch),
            ("position", &self.position),
        ];
        for (column, value) in equalities {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                qb.push(format!(" AND {} = ", column)).push_bind(value.to_string());
            }
        }
    }
}

impl UserInput {
    fn validate(&self) -> AppResult<()> {
        let required = [
            ("cognito_user_name", &self.cognito_user_name),
            ("name", &self.name),
            ("full_name", &self.full_name),
        ];
        match required.iter().find(|(_, v)| v.trim().is_empty()) {
            Some((field, _)) => Err(AppError::Validation(format!("{} must not be blank", field))),
            None => Ok(()),
        }
    }
}

fn duplicate_login(login: &str) -> String {
    format!("User '{}' already exists", login)
}

fn not_found(login: &str) -> AppError {
    AppError::NotFound(format!("User '{}' not found", login))
}

pub async fn list(pool: &PgPool, filter: &UserFilter, page: PageParams) -> AppResult<Page<UserResponse>> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
    filter.push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
    filter.push_where(&mut select);
    select
        .push(" ORDER BY full_name, id LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
    let users = select.build_query_as::<User>().fetch_all(pool).await?;

    Ok(Page::new(users.into_iter().map(UserResponse::from).collect(), total, page))
}

pub async fn get(pool: &PgPool, login: &str) -> AppResult<User> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE cognito_user_name = $1",
        USER_COLUMNS
    ))
    .bind(login)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found(login))
}

pub async fn create(pool: &PgPool, input: UserInput) -> AppResult<User> {
    input.validate()?;
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (cognito_user_name, name, full_name, position, branch, longitude, latitude)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(input.cognito_user_name.trim())
    .bind(&input.name)
    .bind(&input.full_name)
    .bind(&input.position)
    .bind(&input.branch)
    .bind(input.longitude)
    .bind(input.latitude)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_unique_violation(e, duplicate_login(input.cognito_user_name.trim())))?;

    info!("User {} created", user.cognito_user_name);
    Ok(user)
}

/// Replaces a user's fields. The login itself may change, subject to the
/// same uniqueness as on creation.
pub async fn update(pool: &PgPool, login: &str, input: UserInput) -> AppResult<User> {
    input.validate()?;
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET cognito_user_name = $2, name = $3, full_name = $4, position = $5,
            branch = $6, longitude = $7, latitude = $8
        WHERE cognito_user_name = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(login)
    .bind(input.cognito_user_name.trim())
    .bind(&input.name)
    .bind(&input.full_name)
    .bind(&input.position)
    .bind(&input.branch)
    .bind(input.longitude)
    .bind(input.latitude)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::from_unique_violation(e, duplicate_login(input.cognito_user_name.trim())))?
    .ok_or_else(|| not_found(login))?;

    info!("User {} updated", login);
    Ok(user)
}

pub async fn delete(pool: &PgPool, login: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM users WHERE cognito_user_name = $1")
        .bind(login)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found(login));
    }
    info!("User {} deleted", login);
    Ok(())
}

/// `GET /api/users`
pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<UserFilter>,
) -> AppResult<Json<Page<UserResponse>>> {
    let page = page.validate()?;
    Ok(Json(list(&state.db, &filter, page).await?))
}

/// `GET /api/users/:cognito_user_name`
pub async fn get_user(State(state): State<AppState>, Path(login): Path<String>) -> AppResult<Json<UserResponse>> {
    Ok(Json(get(&state.db, &login).await?.into()))
}

/// `POST /api/users`
pub async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<UserInput>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = create(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// `PUT /api/users/:cognito_user_name`
pub async fn update_user(
    State(state): State<AppState>,
    Path(login): Path<String>,
    Json(input): Json<UserInput>,
) -> AppResult<Json<UserResponse>> {
    Ok(Json(update(&state.db, &login, input).await?.into()))
}

/// `DELETE /api/users/:cognito_user_name`
pub async fn delete_user(State(state): State<AppState>, Path(login): Path<String>) -> AppResult<StatusCode> {
    delete(&state.db, &login).await?;
    Ok(StatusCode::NO_CONTENT)
}
