/// Authentication Routes
///
/// Handles user registration, login, logout, token refresh, password change,
/// and current account information.

use std::path::{Path, PathBuf};

use actix_multipart::Multipart;
use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::accounts::{fetch_account, identity_taken, AccountResponse};
use crate::auth::{
    clear_refresh_token, decode_refresh_token, generate_access_token, generate_refresh_token,
    hash_password, store_refresh_token, validate_password_strength, verify_password,
    verify_stored_refresh_token, Claims,
};
use crate::configuration::{JwtSettings, MediaSettings};
use crate::error::{AppError, AuthError, DatabaseError, ErrorContext, ValidationError};
use crate::media_client::MediaClient;
use crate::response::ApiResponse;
use crate::uploads;
use crate::validators::{is_valid_email, is_valid_full_name, is_valid_username};

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Token refresh request (cookie takes precedence over the body)
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Password change request
#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Login response payload: sanitized account plus both tokens
#[derive(Serialize)]
pub struct LoginData {
    pub user: AccountResponse,
    pub access_token: String,
    pub refresh_token: String,
}

/// Refresh response payload
#[derive(Serialize)]
pub struct TokenPairData {
    pub access_token: String,
    pub refresh_token: String,
}

/// Registration form collected from a multipart payload
#[derive(Default)]
struct RegisterForm {
    full_name: Option<String>,
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    avatar: Option<PathBuf>,
    cover_image: Option<PathBuf>,
}

impl RegisterForm {
    /// Remove any staged files that were never handed to the media client.
    async fn discard_staged(&self) {
        if let Some(path) = &self.avatar {
            uploads::discard(path).await;
        }
        if let Some(path) = &self.cover_image {
            uploads::discard(path).await;
        }
    }
}

async fn collect_register_form(
    payload: Multipart,
    staging_dir: &Path,
) -> Result<RegisterForm, AppError> {
    let mut form = RegisterForm::default();

    // A parse failure halfway through must not leak what was staged already
    if let Err(e) = fill_register_form(payload, staging_dir, &mut form).await {
        form.discard_staged().await;
        return Err(e);
    }

    Ok(form)
}

async fn fill_register_form(
    mut payload: Multipart,
    staging_dir: &Path,
    form: &mut RegisterForm,
) -> Result<(), AppError> {
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| {
            AppError::Validation(ValidationError::InvalidFormat(format!(
                "multipart payload: {}",
                e
            )))
        })?;

        let field_name = field.name().to_string();
        match field_name.as_str() {
            "full_name" => form.full_name = Some(uploads::read_text_field(&mut field).await?),
            "username" => form.username = Some(uploads::read_text_field(&mut field).await?),
            "email" => form.email = Some(uploads::read_text_field(&mut field).await?),
            "password" => form.password = Some(uploads::read_text_field(&mut field).await?),
            "avatar" => form.avatar = Some(uploads::stage_field(&mut field, staging_dir).await?),
            "cover_image" => {
                form.cover_image = Some(uploads::stage_field(&mut field, staging_dir).await?)
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| {
                        AppError::Validation(ValidationError::InvalidFormat(format!(
                            "multipart payload: {}",
                            e
                        )))
                    })?;
                }
            }
        }
    }

    Ok(())
}

fn require_field(value: &Option<String>, name: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(AppError::Validation(ValidationError::EmptyField(
            name.to_string(),
        ))),
    }
}

/// POST /auth/register (multipart/form-data)
///
/// Register a new account with display name, username, email, password, a
/// required avatar file, and an optional cover image file.
///
/// # Validation
/// - All text fields must be present and non-empty
/// - Email, username, and display name must pass shape validation
/// - Password must be 8+ chars with digit, lowercase, and uppercase
/// - The avatar must be present and its upload must succeed
///
/// # Errors
/// - 400: Validation errors, missing avatar, avatar upload failure
/// - 409: Username or email already registered
/// - 500: Internal server error
///
/// Registration does not issue tokens; the client logs in afterwards.
pub async fn register(
    payload: Multipart,
    pool: web::Data<PgPool>,
    media_settings: web::Data<MediaSettings>,
    media_client: web::Data<MediaClient>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");
    let staging_dir = PathBuf::from(&media_settings.staging_dir);

    let form = collect_register_form(payload, &staging_dir).await?;

    let result = register_with_form(&form, pool.get_ref(), media_client.get_ref(), &context).await;
    if result.is_err() {
        // The media client removes files it attempted; anything left over is
        // discarded here so client errors never leak staged uploads.
        form.discard_staged().await;
    }
    result
}

async fn register_with_form(
    form: &RegisterForm,
    pool: &PgPool,
    media_client: &MediaClient,
    context: &ErrorContext,
) -> Result<HttpResponse, AppError> {
    // Validate inputs before touching the database or the media service
    let full_name = is_valid_full_name(&require_field(&form.full_name, "full_name")?)?;
    let username = is_valid_username(&require_field(&form.username, "username")?)?;
    let email = is_valid_email(&require_field(&form.email, "email")?)?;
    let password = require_field(&form.password, "password")?;
    validate_password_strength(&password)?;

    // Pre-insert duplicate check; the unique constraints close the race
    if identity_taken(pool, &username, &email).await? {
        return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
            "username or email already registered".to_string(),
        )));
    }

    // Avatar is required, and must be uploaded before any account row exists
    let avatar_path = form
        .avatar
        .as_ref()
        .ok_or_else(|| ValidationError::EmptyField("avatar file".to_string()))?;
    let avatar = media_client.upload(avatar_path).await?;

    // A failed cover upload degrades to "no cover image"
    let cover_image_url = match &form.cover_image {
        Some(path) => match media_client.upload(path).await {
            Ok(media) => Some(media.url),
            Err(e) => {
                tracing::warn!(error = %e, "Cover image upload failed, continuing without it");
                None
            }
        },
        None => None,
    };

    let password_hash = hash_password(&password)?;
    let user_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users
            (id, username, email, full_name, password_hash, avatar_url, cover_image_url,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(user_id)
    .bind(&username)
    .bind(&email)
    .bind(&full_name)
    .bind(&password_hash)
    .bind(&avatar.url)
    .bind(&cover_image_url)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    // Re-read minus sensitive fields; a failure here is a server error
    let created = fetch_account(pool, user_id)
        .await
        .map_err(|e| AppError::Internal(format!("account unreadable after creation: {}", e)))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(ApiResponse::new(
        201,
        created,
        "User registered successfully",
    )))
}

/// POST /auth/login
///
/// Authenticate with username or email plus password. Returns the sanitized
/// account and a token pair, both in the body and as HTTP-only cookies.
///
/// # Errors
/// - 400: Missing identifier or password
/// - 404: No account with that username/email
/// - 401: Wrong password (no tokens issued)
/// - 500: Internal server error
pub async fn login(
    form: web::Json<LoginRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let password = match &form.password {
        Some(p) if !p.is_empty() => p.clone(),
        _ => {
            return Err(AppError::Validation(ValidationError::EmptyField(
                "password".to_string(),
            )))
        }
    };

    // At least one identifier is required
    let username = form
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_lowercase);
    let email = form
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    if username.is_none() && email.is_none() {
        return Err(AppError::Validation(ValidationError::EmptyField(
            "username or email".to_string(),
        )));
    }

    let user = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT id, password_hash FROM users WHERE username = $1 OR email = $2",
    )
    .bind(username.unwrap_or_default())
    .bind(email.unwrap_or_default())
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::Database(DatabaseError::NotFound("user not found".to_string())))?;

    let (user_id, password_hash) = user;

    if !verify_password(&password, &password_hash)? {
        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }

    let (access_token, refresh_token) =
        issue_token_pair(pool.get_ref(), jwt_config.get_ref(), user_id).await?;

    let logged_in_user = fetch_account(pool.get_ref(), user_id).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        "User logged in successfully"
    );

    Ok(HttpResponse::Ok()
        .cookie(token_cookie(
            ACCESS_TOKEN_COOKIE,
            &access_token,
            jwt_config.access_token_expiry,
        ))
        .cookie(token_cookie(
            REFRESH_TOKEN_COOKIE,
            &refresh_token,
            jwt_config.refresh_token_expiry,
        ))
        .json(ApiResponse::new(
            200,
            LoginData {
                user: logged_in_user,
                access_token,
                refresh_token,
            },
            "User logged in successfully",
        )))
}

/// POST /auth/refresh
///
/// Exchange a refresh token for a new token pair. The token is read from the
/// `refreshToken` cookie or the request body. Implements token rotation: the
/// stored token is replaced, so the presented one cannot be used twice.
///
/// # Errors
/// - 400: No refresh token presented
/// - 401: Invalid, expired, stale, or replayed refresh token
/// - 500: Internal server error
pub async fn refresh(
    request: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let incoming_token = request
        .cookie(REFRESH_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .or_else(|| body.and_then(|b| b.refresh_token.clone()))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Validation(ValidationError::EmptyField("refresh token".to_string()))
        })?;

    // Signature + expiry first, then the stored-token match (replay guard)
    let claims = decode_refresh_token(&incoming_token, jwt_config.get_ref())?;
    let user_id = claims.user_id()?;
    verify_stored_refresh_token(pool.get_ref(), user_id, &incoming_token).await?;

    let (access_token, refresh_token) =
        issue_token_pair(pool.get_ref(), jwt_config.get_ref(), user_id).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        "Token refreshed successfully"
    );

    Ok(HttpResponse::Ok()
        .cookie(token_cookie(
            ACCESS_TOKEN_COOKIE,
            &access_token,
            jwt_config.access_token_expiry,
        ))
        .cookie(token_cookie(
            REFRESH_TOKEN_COOKIE,
            &refresh_token,
            jwt_config.refresh_token_expiry,
        ))
        .json(ApiResponse::new(
            200,
            TokenPairData {
                access_token,
                refresh_token,
            },
            "Access token refreshed",
        )))
}

/// POST /auth/logout
///
/// Clears the stored refresh token and expires both cookies. Any refresh
/// token issued before logout becomes unusable.
/// **Requires a valid access token.**
pub async fn logout(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;

    clear_refresh_token(pool.get_ref(), user_id).await?;

    tracing::info!(user_id = %user_id, "User logged out");

    Ok(HttpResponse::Ok()
        .cookie(removal_cookie(ACCESS_TOKEN_COOKIE))
        .cookie(removal_cookie(REFRESH_TOKEN_COOKIE))
        .json(ApiResponse::message_only(200, "User logged out successfully")))
}

/// POST /auth/change-password
///
/// Verifies the old password and overwrites the stored hash with the new one.
/// **Requires a valid access token.**
///
/// # Errors
/// - 401: Old password is wrong
/// - 400: New password fails the strength rules
pub async fn change_password(
    claims: web::ReqData<Claims>,
    form: web::Json<ChangePasswordRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;

    let stored_hash = sqlx::query_scalar::<_, String>(
        "SELECT password_hash FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::Database(DatabaseError::NotFound("user not found".to_string())))?;

    if !verify_password(&form.old_password, &stored_hash)? {
        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }

    let new_hash = hash_password(&form.new_password)?;

    sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
        .bind(&new_hash)
        .bind(Utc::now())
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    tracing::info!(user_id = %user_id, "Password changed");

    Ok(HttpResponse::Ok().json(ApiResponse::message_only(
        200,
        "Password changed successfully",
    )))
}

/// GET /auth/me
///
/// Returns the authenticated account's sanitized record.
/// **Requires a valid access token.**
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let user = fetch_account(pool.get_ref(), user_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(200, user, "Current user fetched")))
}

/// Issue an access/refresh token pair for an account and persist the new
/// refresh token, rotating out whichever token was stored before.
///
/// Every failure inside issuance is logged with its cause and collapsed into
/// one generic server error for the client.
pub(crate) async fn issue_token_pair(
    pool: &PgPool,
    jwt_config: &JwtSettings,
    user_id: Uuid,
) -> Result<(String, String), AppError> {
    match try_issue_token_pair(pool, jwt_config, user_id).await {
        Ok(pair) => Ok(pair),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Token issuance failed");
            Err(AppError::Internal(
                "something went wrong while generating tokens".to_string(),
            ))
        }
    }
}

async fn try_issue_token_pair(
    pool: &PgPool,
    jwt_config: &JwtSettings,
    user_id: Uuid,
) -> Result<(String, String), AppError> {
    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT username, email FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let (username, email) = row;

    let access_token = generate_access_token(&user_id, &username, &email, jwt_config)?;
    let refresh_token = generate_refresh_token(&user_id, jwt_config)?;

    store_refresh_token(pool, user_id, &refresh_token).await?;

    Ok((access_token, refresh_token))
}

fn token_cookie(name: &'static str, value: &str, max_age_seconds: i64) -> Cookie<'static> {
    Cookie::build(name, value.to_string())
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_seconds))
        .finish()
}

fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build(name, "")
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .finish();
    cookie.make_removal();
    cookie
}
