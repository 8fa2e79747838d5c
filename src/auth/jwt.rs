/// JWT Token Generation and Validation
///
/// Creates and validates the two token kinds. Access tokens are signed with
/// the access secret, refresh tokens with a separate refresh secret; both
/// carry the configured issuer and are validated against it.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, RefreshClaims};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Generate a new access token for an account
///
/// # Errors
/// Returns error if token signing fails
pub fn generate_access_token(
    user_id: &Uuid,
    username: &str,
    email: &str,
    config: &JwtSettings,
) -> Result<String, AppError> {
    let claims = Claims::new(
        *user_id,
        username.to_string(),
        email.to_string(),
        config.access_token_expiry,
        config.issuer.clone(),
    );

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.access_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Access token generation failed: {}", e)))
}

/// Validate and extract claims from an access token
///
/// # Errors
/// Returns error if the token is invalid, expired, or tampered with
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.access_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!("Access token validation error: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::Auth(AuthError::TokenExpired)
            }
            _ => AppError::Auth(AuthError::TokenInvalid),
        }
    })
}

/// Generate a new refresh token for an account
///
/// # Errors
/// Returns error if token signing fails
pub fn generate_refresh_token(user_id: &Uuid, config: &JwtSettings) -> Result<String, AppError> {
    let claims = RefreshClaims::new(*user_id, config.refresh_token_expiry, config.issuer.clone());

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.refresh_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Refresh token generation failed: {}", e)))
}

/// Validate a refresh token's signature, expiry, and issuer
///
/// This only proves the token was minted by us and is still within its
/// lifetime. Whether it is the *current* token for the account is checked
/// separately against the stored value.
///
/// # Errors
/// Returns error if the token is invalid, expired, or tampered with
pub fn decode_refresh_token(token: &str, config: &JwtSettings) -> Result<RefreshClaims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);

    decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(config.refresh_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!("Refresh token validation error: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::Auth(AuthError::TokenExpired)
            }
            _ => AppError::Auth(AuthError::TokenInvalid),
        }
    })
}
