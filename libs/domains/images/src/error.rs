//! Error types for the image pipeline.
//!
//! Every variant's `Display` carries a stable marker code
//! (`IMAGE_DOWNLOAD_ERROR`, `GEMINI_API_ERROR`, `CLOUDINARY_ERROR`) that
//! the worker's classifier keys on.

use bus_worker::WorkerError;
use thiserror::Error;

/// Errors from the transform backend.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The backend refused the request for quota reasons.
    #[error("GEMINI_API_ERROR: RATE_LIMIT_EXCEEDED: {0}")]
    RateLimited(String),

    /// Non-success HTTP response from the backend.
    #[error("GEMINI_API_ERROR: status {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure talking to the backend.
    #[error("GEMINI_API_ERROR: request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend returned an image part that could not be decoded.
    #[error("GEMINI_API_ERROR: invalid image payload: {0}")]
    InvalidPayload(String),
}

impl TransformError {
    /// Whether the in-pipeline retry loop may try this call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Api { status, .. } => *status == 429 || (500..=504).contains(status),
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidPayload(_) => false,
        }
    }
}

/// Errors from the store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Non-success HTTP response from the backend.
    #[error("CLOUDINARY_ERROR: status {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure talking to the backend.
    #[error("CLOUDINARY_ERROR: request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend's response body was not the expected shape.
    #[error("CLOUDINARY_ERROR: unexpected response: {0}")]
    Response(String),
}

/// Errors from any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source image could not be fetched.
    #[error("IMAGE_DOWNLOAD_ERROR: failed to fetch {url}: {details}")]
    Download { url: String, details: String },

    /// The transform stage failed after its inner retries.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// The store stage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PipelineError> for WorkerError {
    fn from(e: PipelineError) -> Self {
        WorkerError::Processing(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_worker::ErrorCode;

    #[test]
    fn test_download_error_marker_and_classification() {
        let err: WorkerError = PipelineError::Download {
            url: "https://x/i1.jpg".to_string(),
            details: "404 Not Found".to_string(),
        }
        .into();

        assert!(err.to_string().starts_with("IMAGE_DOWNLOAD_ERROR"));
        let fault = err.classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::ImageDownloadError);
    }

    #[test]
    fn test_download_network_error_is_retryable() {
        let err: WorkerError = PipelineError::Download {
            url: "https://x/i1.jpg".to_string(),
            details: "connection refused".to_string(),
        }
        .into();

        let fault = err.classify();
        assert!(fault.retryable);
        assert_eq!(fault.code, ErrorCode::ImageDownloadError);
    }

    #[test]
    fn test_rate_limited_transform_classification() {
        let err: WorkerError =
            PipelineError::Transform(TransformError::RateLimited("quota".to_string())).into();

        let fault = err.classify();
        assert!(fault.retryable);
        assert_eq!(fault.code, ErrorCode::RateLimitError);
    }

    #[test]
    fn test_terminal_transform_classification() {
        let err: WorkerError = PipelineError::Transform(TransformError::Api {
            status: 400,
            message: "bad request".to_string(),
        })
        .into();

        let fault = err.classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::GeminiApiError);
    }

    #[test]
    fn test_store_error_classification() {
        let err: WorkerError = PipelineError::Store(StoreError::Response(
            "missing secure_url".to_string(),
        ))
        .into();

        let fault = err.classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::CloudinaryError);
    }

    #[test]
    fn test_transform_retryability() {
        assert!(TransformError::RateLimited("quota".to_string()).is_retryable());
        assert!(TransformError::Api {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(!TransformError::Api {
            status: 400,
            message: "bad request".to_string()
        }
        .is_retryable());
        assert!(!TransformError::InvalidPayload("not base64".to_string()).is_retryable());
    }
}
