//! Unified error types for devgate.

use serde::Serialize;
use thiserror::Error;

/// Main error type for all proxy operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// Missing or wrong gateway API key.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Request body failed shape validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Upstream returned non-2xx or the connection failed.
    #[error("Backend error (HTTP {status}): {preview}")]
    Backend { status: u16, preview: String },

    /// The stream translator hit unrecoverable state mid-stream.
    #[error("Translation error: {0}")]
    Translation(String),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network request failed (HTTP client).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File system I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Result type alias for proxy operations.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Cap an upstream error body for inclusion in error messages and logs.
    pub fn backend(status: u16, body: &str) -> Self {
        const PREVIEW_LIMIT: usize = 500;
        let preview = if body.len() > PREVIEW_LIMIT {
            let mut end = PREVIEW_LIMIT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body[..end].to_string()
        } else {
            body.to_string()
        };
        AppError::Backend { status, preview }
    }
}
