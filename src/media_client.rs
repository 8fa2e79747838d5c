/// Media upload service client
///
/// Thin wrapper over the remote media storage API. Takes a locally staged
/// file, pushes it to the service, and returns the remote URL. The staged
/// file is deleted whether or not the upload succeeds.

use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, MediaError};

#[derive(Clone)]
pub struct MediaClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Remote representation of a stored media asset
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
}

impl MediaClient {
    pub fn new(base_url: String, api_key: String, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url,
            api_key,
        }
    }

    /// Upload a staged local file to the media service
    ///
    /// The staging file is removed in both the success and failure paths, so
    /// a failed upload never leaks disk space.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, the service rejects the
    /// upload, or the response cannot be parsed
    pub async fn upload(&self, local_path: &Path) -> Result<UploadedMedia, AppError> {
        let result = self.try_upload(local_path).await;

        if let Err(e) = tokio::fs::remove_file(local_path).await {
            tracing::warn!(
                path = %local_path.display(),
                error = %e,
                "Failed to remove staged upload file"
            );
        }

        match &result {
            Ok(media) => {
                tracing::info!(url = %media.url, "Media uploaded successfully");
            }
            Err(e) => {
                tracing::error!(path = %local_path.display(), error = %e, "Media upload failed");
            }
        }

        result
    }

    async fn try_upload(&self, local_path: &Path) -> Result<UploadedMedia, AppError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| MediaError::UploadFailed(format!("cannot read staged file: {}", e)))?;

        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/upload", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::UploadFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| MediaError::UploadFailed(e.to_string()))?;

        response
            .json::<UploadedMedia>()
            .await
            .map_err(|e| MediaError::UploadFailed(format!("malformed service response: {}", e)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn staged_file(dir: &tempfile::TempDir, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("avatar.png");
        std::fs::write(&path, contents).expect("Failed to write staged file");
        path
    }

    #[tokio::test]
    async fn test_upload_returns_remote_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://media.example.com/v1/abc123.png",
                "public_id": "abc123"
            })))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let staged = staged_file(&dir, b"png bytes");

        let client = MediaClient::new(
            mock_server.uri(),
            "test-key".to_string(),
            reqwest::Client::new(),
        );
        let media = client.upload(&staged).await.expect("Upload should succeed");

        assert_eq!(media.url, "https://media.example.com/v1/abc123.png");
        assert_eq!(media.public_id, "abc123");
        // Staged file is cleaned up on success
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_upload_failure_still_removes_staged_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let staged = staged_file(&dir, b"png bytes");

        let client = MediaClient::new(
            mock_server.uri(),
            "test-key".to_string(),
            reqwest::Client::new(),
        );
        let result = client.upload(&staged).await;

        assert!(result.is_err());
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_upload_of_missing_file_fails() {
        let client = MediaClient::new(
            "http://127.0.0.1:9".to_string(),
            "test-key".to_string(),
            reqwest::Client::new(),
        );
        let result = client.upload(Path::new("/nonexistent/file.png")).await;

        assert!(result.is_err());
    }
}
