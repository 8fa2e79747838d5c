/// JWT Claims structures
///
/// Payloads for the two token kinds (RFC 7519). Access tokens carry enough
/// identity to serve requests without a database round-trip; refresh tokens
/// carry only the subject.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};

/// Claims for short-lived access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (account ID as UUID string)
    pub sub: String,
    /// Account username (lowercased)
    pub username: String,
    /// Account email
    pub email: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        username: String,
        email: String,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            username,
            email,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
        }
    }

    /// Extract the account ID from the claims
    ///
    /// # Errors
    /// Returns error if the subject is not a valid UUID
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth(AuthError::TokenInvalid))
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}

/// Claims for longer-lived refresh tokens
///
/// Deliberately minimal: the subject is re-checked against the stored token
/// on every rotation, so no profile data rides in the token. The `jti` makes
/// every issued token distinct; without it, two tokens minted for the same
/// account within one second would be byte-identical and rotation would not
/// actually invalidate the old one.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

impl RefreshClaims {
    pub fn new(user_id: Uuid, expiry_seconds: i64, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
        }
    }

    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth(AuthError::TokenInvalid))
    }
}
