//! Image hosting collaborator
//!
//! The identification tool takes a URL, not bytes, so image turns upload
//! the file first.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("no image upload endpoint configured")]
    NotConfigured,
    #[error("upload request failed: {0}")]
    Transport(String),
    #[error("upload rejected with HTTP {0}")]
    Status(u16),
    #[error("upload response had no url: {0}")]
    MalformedResponse(String),
}

/// Stores an image and returns a dereferenceable URL
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, UploadError>;
}

/// Posts the image as multipart field `image` to a configured endpoint
pub struct HttpImageHost {
    client: Client,
    endpoint: Option<String>,
}

impl HttpImageHost {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
    data: Option<UploadData>,
}

#[derive(Deserialize)]
struct UploadData {
    url: Option<String>,
}

impl UploadResponse {
    fn into_url(self) -> Option<String> {
        self.url
            .or_else(|| self.data.and_then(|d| d.url))
            .filter(|url| !url.trim().is_empty())
    }
}

#[async_trait]
impl ImageHost for HttpImageHost {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, UploadError> {
        let endpoint = self.endpoint.as_deref().ok_or(UploadError::NotConfigured)?;

        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let form = Form::new().part("image", part);

        let response = self
            .client
            .post(endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        serde_json::from_str::<UploadResponse>(&body)
            .ok()
            .and_then(UploadResponse::into_url)
            .ok_or(UploadError::MalformedResponse(body))
    }
}
