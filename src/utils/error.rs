use thiserror::Error;

use crate::models::RecognitionMethod;

#[derive(Debug, Error)]
pub enum TravelError {
    #[error("Unsupported document type: {0}")]
    UnsupportedMimeType(String),

    #[error("Document too large: {size} bytes (limit {limit})")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("Image decoding error: {0}")]
    ImageDecode(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("{method} backend error: {message}")]
    Backend {
        method: RecognitionMethod,
        message: String,
    },

    #[error("{method} backend unavailable: {reason}")]
    BackendUnavailable {
        method: RecognitionMethod,
        reason: String,
    },

    #[error("All {attempted} recognition backends failed for region {region}")]
    AllBackendsFailed { region: usize, attempted: usize },

    #[error("Reconciliation already running for user {0}")]
    ReconciliationInProgress(String),

    #[error("Invalid travel entry: {0}")]
    InvalidEntry(String),

    #[error("Travel entry not found: {0}")]
    EntryNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<image::ImageError> for TravelError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Decoding(_) | image::ImageError::Unsupported(_) => {
                TravelError::ImageDecode(err.to_string())
            }
            other => TravelError::ImageProcessing(other.to_string()),
        }
    }
}

impl TravelError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TravelError::ReconciliationInProgress(_)
                | TravelError::AllBackendsFailed { .. }
                | TravelError::Backend { .. }
                | TravelError::BackendUnavailable { .. }
        )
    }

    /// Input errors are the caller's fault and never succeed on retry.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TravelError::UnsupportedMimeType(_)
                | TravelError::DocumentTooLarge { .. }
                | TravelError::ImageDecode(_)
        )
    }
}
