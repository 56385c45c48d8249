//! AnalysisClient - uploads captured media to the analysis endpoint.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::camera::looks_like_jpeg;

/// Environment variable overriding the upload URL.
pub const ENDPOINT_ENV: &str = "GLITTERS_ENDPOINT";

/// Default analysis endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://www.instapetvet.com/appupload.php";

/// Multipart field, file name and content type for photo uploads.
pub const IMAGE_FIELD: &str = "image";
pub const IMAGE_FILE_NAME: &str = "instapetvet_image.jpg";
pub const IMAGE_MIME: &str = "image/jpeg";

/// Multipart field, file name and content type for audio uploads.
pub const AUDIO_FIELD: &str = "audio";
pub const AUDIO_FILE_NAME: &str = "instapetvet_audiofile.m4a";
pub const AUDIO_MIME: &str = "audio/mp4";

/// Default timeout for HTTP requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Analysis result shown back to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub title: String,
    pub text: String,
}

/// Errors that can occur while uploading media for analysis
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Upload failed: {message}")]
    UploadFailed {
        /// HTTP status, if the server answered at all
        status: Option<u16>,
        message: String,
    },

    #[error("Could not decode analysis response: {0}")]
    DecodeFailed(String),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AnalysisError {
    /// Whether the user should see this as a connection problem.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            AnalysisError::UploadFailed { .. } | AnalysisError::DecodeFailed(_)
        )
    }
}

/// Check an image payload before upload.
pub fn validate_image(data: &[u8]) -> Result<(), AnalysisError> {
    if data.is_empty() {
        return Err(AnalysisError::InvalidPayload("image is empty".to_string()));
    }
    if !looks_like_jpeg(data) {
        return Err(AnalysisError::InvalidPayload(
            "image is not JPEG encoded".to_string(),
        ));
    }
    Ok(())
}

/// Client for the analysis endpoint.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    endpoint: String,
    http_client: reqwest::Client,
}

impl AnalysisClient {
    /// Create a client for `GLITTERS_ENDPOINT`, or the default endpoint.
    pub fn new() -> Result<Self, AnalysisError> {
        let endpoint = std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::with_endpoint(endpoint)
    }

    /// Create a client for a specific endpoint.
    ///
    /// Useful for testing against a mock server.
    pub fn with_endpoint(endpoint: String) -> Result<Self, AnalysisError> {
        Self::with_options(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_options(endpoint: String, timeout: Duration) -> Result<Self, AnalysisError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()?;

        Ok(Self {
            endpoint,
            http_client,
        })
    }

    /// Get the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload a JPEG photo.
    pub async fn upload_image(&self, data: Vec<u8>) -> Result<AnalysisResponse, AnalysisError> {
        validate_image(&data)?;
        self.upload_part(IMAGE_FIELD, IMAGE_FILE_NAME, IMAGE_MIME, data)
            .await
    }

    /// Upload a recorded audio clip.
    pub async fn upload_audio(&self, data: Vec<u8>) -> Result<AnalysisResponse, AnalysisError> {
        if data.is_empty() {
            return Err(AnalysisError::InvalidPayload(
                "audio recording is empty".to_string(),
            ));
        }
        self.upload_part(AUDIO_FIELD, AUDIO_FILE_NAME, AUDIO_MIME, data)
            .await
    }

    /// Read an audio file and upload it.
    pub async fn upload_audio_file(&self, path: &Path) -> Result<AnalysisResponse, AnalysisError> {
        let data = tokio::fs::read(path).await?;
        self.upload_audio(data).await
    }

    async fn upload_part(
        &self,
        field: &'static str,
        file_name: &'static str,
        mime: &'static str,
        data: Vec<u8>,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let size = data.len();
        let part = Part::bytes(data).file_name(file_name).mime_str(mime)?;
        let form = Form::new().part(field, part);

        log::info!("Uploading {} ({} bytes) to {}", file_name, size, self.endpoint);

        let response = self
            .http_client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                log::warn!("Error while uploading {}: {}", file_name, e);
                AnalysisError::UploadFailed {
                    status: None,
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::warn!("Upload rejected with status {}: {}", status, error_text);
            return Err(AnalysisError::UploadFailed {
                status: Some(status.as_u16()),
                message: format!("server returned {}: {}", status, error_text),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::UploadFailed {
                status: Some(status.as_u16()),
                message: e.to_string(),
            })?;

        let parsed: AnalysisResponse = serde_json::from_slice(&body).map_err(|e| {
            log::warn!("An error occurred while decoding analysis JSON: {}", e);
            AnalysisError::DecodeFailed(e.to_string())
        })?;

        log::debug!("Analysis result: {}", parsed.title);
        Ok(parsed)
    }
}
