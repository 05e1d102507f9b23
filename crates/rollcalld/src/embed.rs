//! Client for the external FaceNet embedding service.
//!
//! The service accepts one JPEG frame and returns a 512-dimensional
//! embedding, or a descriptive rejection ("no face detected"). This
//! module never does detection or alignment itself.

use std::time::Duration;

use rollcall_core::Embedding;
use serde::Deserialize;
use thiserror::Error;

const FACENET_MODEL_VERSION: &str = "facenet-512";

#[derive(Debug, Error)]
pub enum EmbedError {
    /// Service unreachable or protocol failure. Retry policy belongs to
    /// the caller.
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
    /// The service processed the frame and declined it (e.g. no face).
    #[error("{0}")]
    Rejected(String),
}

/// Black-box `image -> embedding` boundary.
pub trait FaceEmbedder: Send + Sync {
    async fn embed(&self, image_jpeg: &[u8]) -> Result<Embedding, EmbedError>;
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    success: bool,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the FaceNet sidecar (`POST /api/recognize`, multipart
/// frame upload).
pub struct FacenetClient {
    http: reqwest::Client,
    base_url: String,
}

impl FacenetClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, EmbedError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl FaceEmbedder for FacenetClient {
    async fn embed(&self, image_jpeg: &[u8]) -> Result<Embedding, EmbedError> {
        let part = reqwest::multipart::Part::bytes(image_jpeg.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .http
            .post(format!("{}/api/recognize", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

        let body: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

        if !body.success {
            return Err(EmbedError::Rejected(
                body.message.unwrap_or_else(|| "face not detected".to_string()),
            ));
        }

        match body.embedding {
            Some(values) if !values.is_empty() => {
                tracing::debug!(dims = values.len(), "embedding extracted");
                Ok(Embedding {
                    values,
                    model_version: Some(FACENET_MODEL_VERSION.to_string()),
                })
            }
            _ => Err(EmbedError::Rejected(
                "no embedding returned by the service".to_string(),
            )),
        }
    }
}
