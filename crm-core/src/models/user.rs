use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model representing a CRM user.
///
/// This struct maps to the `users` table. Users are addressed by their
/// identity-provider login (`cognito_user_name`), which is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique identifier for the user
    pub id: i32,

    /// Login name in the identity provider (unique)
    pub cognito_user_name: String,

    /// Short display name
    pub name: String,

    pub full_name: String,

    /// Job position, e.g. "representative" or "branch manager"
    pub position: Option<String>,

    /// Branch the user belongs to
    pub branch: Option<String>,

    pub longitude: Option<Decimal>,
    pub latitude: Option<Decimal>,

    /// Timestamp when the user was created
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

/// User creation and update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInput {
    pub cognito_user_name: String,
    pub name: String,
    pub full_name: String,
    pub position: Option<String>,
    pub branch: Option<String>,
    pub longitude: Option<Decimal>,
    pub latitude: Option<Decimal>,
}

/// User response (public representation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i32,
    pub cognito_user_name: String,
    pub name: String,
    pub full_name: String,
    pub position: Option<String>,
    pub branch: Option<String>,
    pub longitude: Option<Decimal>,
    pub latitude: Option<Decimal>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            cognito_user_name: user.cognito_user_name,
            name: user.name,
            full_name: user.full_name,
            position: user.position,
            branch: user.branch,
            longitude: user.longitude,
            latitude: user.latitude,
        }
    }
}
