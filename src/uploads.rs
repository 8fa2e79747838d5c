/// Multipart upload staging
///
/// Inbound `multipart/form-data` file fields are written to a staging
/// directory before being pushed to the media service; text fields are
/// collected into strings. Staged files are short-lived: the media client
/// removes them after the upload attempt, and handlers discard any that
/// never reach an upload.

use std::path::{Path, PathBuf};

use actix_multipart::Field;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, MediaError, ValidationError};

/// Write a multipart file field to the staging directory
///
/// The staged file gets a fresh UUID name with the client's extension (if
/// any); client-supplied file names never touch the filesystem directly.
///
/// # Errors
/// Returns error if the staging directory or file cannot be written
pub async fn stage_field(field: &mut Field, staging_dir: &Path) -> Result<PathBuf, AppError> {
    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| MediaError::Staging(e.to_string()))?;

    let extension = field
        .content_disposition()
        .get_filename()
        .and_then(|name| Path::new(name).extension().and_then(|ext| ext.to_str()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();

    let path = staging_dir.join(format!("{}{}", uuid::Uuid::new_v4(), extension));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| MediaError::Staging(e.to_string()))?;

    while let Some(chunk) = field.next().await {
        let data = chunk.map_err(|e| MediaError::Staging(e.to_string()))?;
        file.write_all(&data)
            .await
            .map_err(|e| MediaError::Staging(e.to_string()))?;
    }

    file.flush()
        .await
        .map_err(|e| MediaError::Staging(e.to_string()))?;

    Ok(path)
}

/// Collect a multipart text field into a UTF-8 string
///
/// # Errors
/// Returns error if the field cannot be read or is not valid UTF-8
pub async fn read_text_field(field: &mut Field) -> Result<String, AppError> {
    let field_name = field.name().to_string();
    let mut data = Vec::new();

    while let Some(chunk) = field.next().await {
        let bytes = chunk.map_err(|e| {
            AppError::Validation(ValidationError::InvalidFormat(format!(
                "multipart field {}: {}",
                field_name, e
            )))
        })?;
        data.extend_from_slice(&bytes);
    }

    String::from_utf8(data)
        .map_err(|_| AppError::Validation(ValidationError::InvalidFormat(field_name)))
}

/// Remove a staged file that will not be uploaded
///
/// Failures are logged and swallowed; a leftover staging file must not turn
/// a client error into a server error.
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        // Already-removed files are the common case after a failed upload
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove staged upload file"
            );
        }
    }
}
