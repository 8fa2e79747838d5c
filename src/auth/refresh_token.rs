/// Stored Refresh Token Management
///
/// Each account tracks exactly one outstanding refresh token: issuing a new
/// one silently invalidates the previous. Only the SHA-256 of the token is
/// persisted (never the plaintext), on the account row itself.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AuthError};

/// Hash a refresh token for storage and comparison
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persist the hash of an account's current refresh token
///
/// Overwrites whatever token was stored before; this is what makes rotation
/// invalidate the previous token.
///
/// # Errors
/// Returns error if the database operation fails
pub async fn store_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    token: &str,
) -> Result<(), AppError> {
    let token_hash = hash_token(token);

    sqlx::query(
        r#"
        UPDATE users
        SET refresh_token_hash = $1, updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(token_hash)
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Clear an account's stored refresh token
///
/// After this, no refresh token previously issued to the account can be
/// exchanged for a new pair.
///
/// # Errors
/// Returns error if the database operation fails
pub async fn clear_refresh_token(pool: &PgPool, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE users
        SET refresh_token_hash = NULL, updated_at = $1
        WHERE id = $2
        "#,
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user_id, "Stored refresh token cleared");
    Ok(())
}

/// Check a presented refresh token against the account's stored one
///
/// The presented token has already passed signature and expiry validation;
/// this is the replay/stale-token check. A mismatch means the token was
/// rotated away or the account logged out since it was issued.
///
/// # Errors
/// Returns an authentication error on unknown account, cleared token, or
/// hash mismatch
pub async fn verify_stored_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    token: &str,
) -> Result<(), AppError> {
    let stored = sqlx::query_scalar::<_, Option<String>>(
        "SELECT refresh_token_hash FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match stored {
        None => {
            tracing::warn!(user_id = %user_id, "Refresh attempt for unknown account");
            Err(AppError::Auth(AuthError::TokenInvalid))
        }
        Some(None) => {
            tracing::warn!(user_id = %user_id, "Refresh attempt after logout");
            Err(AppError::Auth(AuthError::RefreshTokenMismatch))
        }
        Some(Some(stored_hash)) => {
            if stored_hash != hash_token(token) {
                tracing::warn!(user_id = %user_id, "Stale or replayed refresh token presented");
                return Err(AppError::Auth(AuthError::RefreshTokenMismatch));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hashing_is_deterministic() {
        let token = "some.refresh.token";
        let hash1 = hash_token(token);
        let hash2 = hash_token(token);

        assert_eq!(hash1, hash2);
        assert_ne!(token, hash1);
        // SHA-256 hex
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_tokens_different_hashes() {
        assert_ne!(hash_token("token.one"), hash_token("token.two"));
    }
}
