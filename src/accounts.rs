/// Account record helpers shared by the route handlers
///
/// The sanitized projection of the users table. Password hash and stored
/// refresh token never leave the database layer through this type.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};

/// Sanitized account representation returned by the API
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub created_at: String,
}

/// Load the sanitized account for an ID
///
/// # Errors
/// Returns a not-found error if no account exists with that ID
pub async fn fetch_account(pool: &PgPool, user_id: Uuid) -> Result<AccountResponse, AppError> {
    let row = sqlx::query_as::<
        _,
        (
            Uuid,
            String,
            String,
            String,
            String,
            Option<String>,
            chrono::DateTime<Utc>,
        ),
    >(
        r#"
        SELECT id, username, email, full_name, avatar_url, cover_image_url, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::Database(DatabaseError::NotFound("user not found".to_string())))?;

    Ok(AccountResponse {
        id: row.0.to_string(),
        username: row.1,
        email: row.2,
        full_name: row.3,
        avatar_url: row.4,
        cover_image_url: row.5,
        created_at: row.6.to_rfc3339(),
    })
}

/// True if an account already holds the username or email
pub async fn identity_taken(pool: &PgPool, username: &str, email: &str) -> Result<bool, AppError> {
    let existing = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM users WHERE username = $1 OR email = $2",
    )
    .bind(username)
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(existing.is_some())
}
