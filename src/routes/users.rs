/// Account Profile Routes
///
/// Field overwrites on the authenticated account: display name/email, avatar,
/// and cover image. All of these require a valid access token.

use std::path::{Path, PathBuf};

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use sqlx::PgPool;

use crate::accounts::fetch_account;
use crate::auth::Claims;
use crate::configuration::MediaSettings;
use crate::error::{AppError, ValidationError};
use crate::media_client::MediaClient;
use crate::response::ApiResponse;
use crate::uploads;
use crate::validators::{is_valid_email, is_valid_full_name};

/// Profile update request
#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: String,
    pub email: String,
}

/// PATCH /users/me
///
/// Overwrites display name and email. Both fields are required and validated
/// as at registration.
///
/// # Errors
/// - 400: Validation errors
/// - 409: Email already used by another account
pub async fn update_profile(
    claims: web::ReqData<Claims>,
    form: web::Json<UpdateProfileRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;

    let full_name = is_valid_full_name(&form.full_name)?;
    let email = is_valid_email(&form.email)?;

    sqlx::query("UPDATE users SET full_name = $1, email = $2, updated_at = $3 WHERE id = $4")
        .bind(&full_name)
        .bind(&email)
        .bind(Utc::now())
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    let updated = fetch_account(pool.get_ref(), user_id).await?;

    tracing::info!(user_id = %user_id, "Profile updated");

    Ok(HttpResponse::Ok().json(ApiResponse::new(200, updated, "Profile updated successfully")))
}

/// PATCH /users/me/avatar (multipart/form-data, field `avatar`)
///
/// Replaces the account's avatar. The file is staged, uploaded to the media
/// service, and the stored URL overwritten only on success.
///
/// # Errors
/// - 400: Missing file or upload failure
pub async fn update_avatar(
    claims: web::ReqData<Claims>,
    payload: Multipart,
    pool: web::Data<PgPool>,
    media_settings: web::Data<MediaSettings>,
    media_client: web::Data<MediaClient>,
) -> Result<HttpResponse, AppError> {
    replace_image(
        claims,
        payload,
        pool,
        media_settings,
        media_client,
        "avatar",
        "avatar_url",
    )
    .await
}

/// PATCH /users/me/cover-image (multipart/form-data, field `cover_image`)
///
/// Replaces the account's cover image, same flow as the avatar.
pub async fn update_cover_image(
    claims: web::ReqData<Claims>,
    payload: Multipart,
    pool: web::Data<PgPool>,
    media_settings: web::Data<MediaSettings>,
    media_client: web::Data<MediaClient>,
) -> Result<HttpResponse, AppError> {
    replace_image(
        claims,
        payload,
        pool,
        media_settings,
        media_client,
        "cover_image",
        "cover_image_url",
    )
    .await
}

async fn replace_image(
    claims: web::ReqData<Claims>,
    payload: Multipart,
    pool: web::Data<PgPool>,
    media_settings: web::Data<MediaSettings>,
    media_client: web::Data<MediaClient>,
    field_name: &'static str,
    column: &'static str,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let staging_dir = PathBuf::from(&media_settings.staging_dir);

    let staged = stage_single_file(payload, field_name, &staging_dir)
        .await?
        .ok_or_else(|| {
            ValidationError::EmptyField(format!("{} file", field_name))
        })?;

    let media = media_client.upload(&staged).await?;

    // Column names come from the two callers above, never from input
    let statement = format!(
        "UPDATE users SET {} = $1, updated_at = $2 WHERE id = $3",
        column
    );
    sqlx::query(&statement)
        .bind(&media.url)
        .bind(Utc::now())
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    let updated = fetch_account(pool.get_ref(), user_id).await?;

    tracing::info!(user_id = %user_id, field = field_name, "Account image updated");

    Ok(HttpResponse::Ok().json(ApiResponse::new(
        200,
        updated,
        "Image updated successfully",
    )))
}

/// Stage the first file field with the given name; other fields are drained
/// and ignored.
async fn stage_single_file(
    mut payload: Multipart,
    field_name: &str,
    staging_dir: &Path,
) -> Result<Option<PathBuf>, AppError> {
    let mut staged = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| {
            AppError::Validation(ValidationError::InvalidFormat(format!(
                "multipart payload: {}",
                e
            )))
        })?;

        let matches = field.name() == field_name;
        if matches && staged.is_none() {
            staged = Some(uploads::stage_field(&mut field, staging_dir).await?);
        } else {
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

    Ok(staged)
}
