//! # OCR Error Types Module
//!
//! Failure modes of text recognition, split into permanent ones (bad input,
//! rejected request) and transient ones that are worth another attempt.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum OcrError {
    /// The bytes are not an image we accept
    #[error("unsupported image format")]
    UnsupportedFormat,
    /// The image is larger than allowed for its format
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    /// No credentials or engine for the configured back end
    #[error("OCR back end is not configured: {0}")]
    NotConfigured(String),
    /// Network failure or a 5xx from the OCR service
    #[error("OCR request failed: {0}")]
    Request(String),
    /// The OCR service rejected the request
    #[error("OCR service error: {0}")]
    Service(String),
    /// Local engine failure
    #[error("text extraction failed: {0}")]
    Extraction(String),
    #[error("OCR attempt timed out after {0:?}")]
    Timeout(Duration),
    /// Too many recent failures, requests fail fast for a while
    #[error("OCR is temporarily unavailable")]
    CircuitOpen,
}

impl OcrError {
    /// Whether retrying the same image may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, OcrError::Request(_) | OcrError::Timeout(_))
    }

    /// Whether the failure says something about the back end's health
    pub fn counts_against_service(&self) -> bool {
        !matches!(
            self,
            OcrError::UnsupportedFormat | OcrError::TooLarge { .. } | OcrError::CircuitOpen
        )
    }
}

impl From<reqwest::Error> for OcrError {
    fn from(err: reqwest::Error) -> Self {
        OcrError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OcrError::Request("connection reset".into()).is_transient());
        assert!(OcrError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!OcrError::Service("Bad image data".into()).is_transient());
        assert!(!OcrError::UnsupportedFormat.is_transient());
        assert!(!OcrError::CircuitOpen.is_transient());
    }

    #[test]
    fn test_input_errors_do_not_trip_the_breaker() {
        assert!(!OcrError::UnsupportedFormat.counts_against_service());
        assert!(!OcrError::TooLarge { size: 2, limit: 1 }.counts_against_service());
        assert!(OcrError::Service("quota".into()).counts_against_service());
    }

    #[test]
    fn test_display() {
        let err = OcrError::TooLarge {
            size: 30_000_000,
            limit: 20_000_000,
        };
        assert_eq!(err.to_string(), "image is 30000000 bytes, limit is 20000000");
    }
}
