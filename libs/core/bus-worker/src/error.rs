//! Error types and fault classification for worker operations.
//!
//! This module provides:
//! - `WorkerError` - The main error type for worker operations
//! - `ErrorCode` - The closed set of stable error codes carried in failure events
//! - `Fault` - The classification result driving the retry/DLQ decision

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while consuming or processing a job.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// AMQP connection or channel error.
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The message payload could not be decoded into a job.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The processing deadline elapsed before the pipeline finished.
    #[error("Processing timed out after {elapsed_ms} ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    /// Job processing error from the processor. The message carries the
    /// backend's stable marker codes used for classification.
    #[error("{0}")]
    Processing(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error codes attached to failure events and DLQ'd messages.
///
/// The taxonomy is closed: a new backend fault gets a code here, it is
/// never inferred downstream of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProcessingTimeout,
    GeminiApiError,
    CloudinaryError,
    ImageDownloadError,
    TimeoutError,
    RateLimitError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessingTimeout => "PROCESSING_TIMEOUT",
            Self::GeminiApiError => "GEMINI_API_ERROR",
            Self::CloudinaryError => "CLOUDINARY_ERROR",
            Self::ImageDownloadError => "IMAGE_DOWNLOAD_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::RateLimitError => "RATE_LIMIT_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a raised error: whether a retry may succeed, and the
/// stable code reported in outcome events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub retryable: bool,
    pub code: ErrorCode,
}

impl WorkerError {
    /// Classify this error for the retry/DLQ decision.
    ///
    /// Rules, first match wins:
    /// 1. Deadline expiry is terminal (`PROCESSING_TIMEOUT`) - a stuck
    ///    backend must not livelock the worker through the retry loop.
    /// 2. Network-level failures are retryable.
    /// 3. Rate limiting is retryable (`RATE_LIMIT_ERROR`).
    /// 4. Backend-reported transient timeouts are retryable.
    /// 5. Everything else is terminal, with the code mapped by marker.
    pub fn classify(&self) -> Fault {
        match self {
            Self::DeadlineExceeded { .. } => Fault {
                retryable: false,
                code: ErrorCode::ProcessingTimeout,
            },
            Self::MalformedMessage(_) | Self::Serialization(_) => Fault {
                retryable: false,
                code: ErrorCode::UnknownError,
            },
            _ => {
                let text = self.to_string().to_lowercase();

                if is_network_error(&text) {
                    Fault {
                        retryable: true,
                        code: code_for_markers(&text),
                    }
                } else if is_rate_limited(&text) {
                    Fault {
                        retryable: true,
                        code: ErrorCode::RateLimitError,
                    }
                } else if is_backend_timeout(&text) {
                    Fault {
                        retryable: true,
                        code: code_for_markers(&text),
                    }
                } else {
                    Fault {
                        retryable: false,
                        code: code_for_markers(&text),
                    }
                }
            }
        }
    }
}

/// Connection-level failures that a later delivery attempt may not hit.
fn is_network_error(text: &str) -> bool {
    text.contains("econnrefused")
        || text.contains("etimedout")
        || text.contains("connection refused")
        || text.contains("connection reset")
        || text.contains("connect error")
        || text.contains("broken pipe")
        || text.contains("timed out")
}

/// Rate-limit responses from any backend.
fn is_rate_limited(text: &str) -> bool {
    text.contains("rate_limit_exceeded")
        || text.contains("resource_exhausted")
        || text.contains("429")
        || text.contains("rate limit")
        || text.contains("too many requests")
}

/// Transient timeouts reported by the transform or store backends.
fn is_backend_timeout(text: &str) -> bool {
    text.contains("gemini_timeout") || text.contains("cloudinary_timeout")
}

/// Map an error message to a stable code by its markers.
///
/// Backend-specific markers win over the generic timeout marker so that
/// "gemini timed out" is attributed to the transform backend.
fn code_for_markers(text: &str) -> ErrorCode {
    if text.contains("gemini") {
        ErrorCode::GeminiApiError
    } else if text.contains("cloudinary") {
        ErrorCode::CloudinaryError
    } else if text.contains("download") || text.contains("fetch") {
        ErrorCode::ImageDownloadError
    } else if text.contains("timeout") || text.contains("timed out") {
        ErrorCode::TimeoutError
    } else {
        ErrorCode::UnknownError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::Processing("GEMINI_API_ERROR: bad response".to_string());
        assert_eq!(err.to_string(), "GEMINI_API_ERROR: bad response");

        let err = WorkerError::DeadlineExceeded { elapsed_ms: 60_000 };
        assert_eq!(err.to_string(), "Processing timed out after 60000 ms");
    }

    #[test]
    fn test_deadline_is_terminal() {
        let err = WorkerError::DeadlineExceeded { elapsed_ms: 60_000 };
        let fault = err.classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::ProcessingTimeout);
    }

    #[test]
    fn test_network_errors_are_retryable() {
        for message in [
            "IMAGE_DOWNLOAD_ERROR: failed to fetch https://x/i.jpg: ECONNREFUSED",
            "GEMINI_API_ERROR: request failed: connection refused",
            "CLOUDINARY_ERROR: request failed: operation timed out (ETIMEDOUT)",
        ] {
            let fault = WorkerError::Processing(message.to_string()).classify();
            assert!(fault.retryable, "expected retryable: {message}");
        }
    }

    #[test]
    fn test_rate_limits_are_retryable() {
        for message in [
            "GEMINI_API_ERROR: RATE_LIMIT_EXCEEDED",
            "GEMINI_API_ERROR: RESOURCE_EXHAUSTED quota hit",
            "GEMINI_API_ERROR: status 429: slow down",
            "CLOUDINARY_ERROR: rate limit reached",
        ] {
            let fault = WorkerError::Processing(message.to_string()).classify();
            assert!(fault.retryable, "expected retryable: {message}");
            assert_eq!(fault.code, ErrorCode::RateLimitError, "{message}");
        }
    }

    #[test]
    fn test_backend_timeouts_are_retryable() {
        let fault = WorkerError::Processing("GEMINI_TIMEOUT while generating".to_string()).classify();
        assert!(fault.retryable);
        assert_eq!(fault.code, ErrorCode::GeminiApiError);

        let fault = WorkerError::Processing("CLOUDINARY_TIMEOUT on upload".to_string()).classify();
        assert!(fault.retryable);
        assert_eq!(fault.code, ErrorCode::CloudinaryError);
    }

    #[test]
    fn test_unknown_errors_are_terminal() {
        let fault = WorkerError::Processing("something odd happened".to_string()).classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::UnknownError);
    }

    #[test]
    fn test_terminal_code_mapping_by_marker() {
        let fault = WorkerError::Processing("GEMINI_API_ERROR: invalid response".to_string()).classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::GeminiApiError);

        let fault = WorkerError::Processing("CLOUDINARY_ERROR: bad signature".to_string()).classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::CloudinaryError);

        let fault =
            WorkerError::Processing("IMAGE_DOWNLOAD_ERROR: 404 not found".to_string()).classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::ImageDownloadError);
    }

    #[test]
    fn test_malformed_message_is_terminal_unknown() {
        let fault = WorkerError::MalformedMessage("expected value at line 1".to_string()).classify();
        assert!(!fault.retryable);
        assert_eq!(fault.code, ErrorCode::UnknownError);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let err = WorkerError::Processing("GEMINI_API_ERROR: status 429: slow down".to_string());
        assert_eq!(err.classify(), err.classify());
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(ErrorCode::ProcessingTimeout.as_str(), "PROCESSING_TIMEOUT");
        assert_eq!(ErrorCode::GeminiApiError.as_str(), "GEMINI_API_ERROR");
        assert_eq!(ErrorCode::CloudinaryError.as_str(), "CLOUDINARY_ERROR");
        assert_eq!(ErrorCode::ImageDownloadError.as_str(), "IMAGE_DOWNLOAD_ERROR");
        assert_eq!(ErrorCode::TimeoutError.as_str(), "TIMEOUT_ERROR");
        assert_eq!(ErrorCode::RateLimitError.as_str(), "RATE_LIMIT_ERROR");
        assert_eq!(ErrorCode::UnknownError.as_str(), "UNKNOWN_ERROR");

        // Serde uses the same names as as_str
        let json = serde_json::to_string(&ErrorCode::RateLimitError).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_ERROR\"");
    }
}
