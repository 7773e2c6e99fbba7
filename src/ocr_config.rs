//! # OCR Configuration Module
//!
//! Size limits, retry and circuit breaker settings for text recognition.
//!
//! Images arrive from Telegram, which caps bot downloads at 20 MB. Per-format
//! limits sit below that so oversized scans are refused before they are
//! base64-encoded and sent to the OCR service.

use std::time::Duration;

use image::ImageFormat;
use rand::Rng;

pub const MIN_FORMAT_BYTES: usize = 8;
pub const MAX_FILE_SIZE: u64 = 20 * 1024 * 1024; // Telegram bots cannot download more

/// Retry, timeout and circuit breaker settings
///
/// # Defaults
///
/// - 2 retries after the first attempt, 500 ms base delay doubling up to 5 s
/// - 30 s per attempt
/// - breaker opens after 5 consecutive failures and stays open for 60 s
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Bound on a single recognition attempt
    pub operation_timeout_secs: u64,
    /// Consecutive failures before the breaker opens
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 5000,
            operation_timeout_secs: 30,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 60,
        }
    }
}

impl RecoveryConfig {
    /// Exponential backoff for retry `attempt` (1-based), capped, with up to
    /// 10% random jitter on top
    ///
    /// # Arguments
    ///
    /// * `attempt` - Retry number, `1` for the first retry
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use halal_assistant::ocr_config::RecoveryConfig;
    ///
    /// let recovery = RecoveryConfig::default();
    /// let delay = recovery.calculate_retry_delay(2);
    /// assert!(delay >= Duration::from_millis(1000));
    /// assert!(delay <= Duration::from_millis(1100));
    /// ```
    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .base_retry_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_retry_delay_ms);
        let jitter = if base >= 10 {
            rand::thread_rng().gen_range(0..=base / 10)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// Bound on one recognition attempt
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn circuit_breaker_reset(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_reset_secs)
    }
}

/// Per-format size limits, in bytes
///
/// Uncompressed formats get lower limits: a 5 MB BMP is already far larger
/// than any label photo needs.
#[derive(Debug, Clone)]
pub struct FormatSizeLimits {
    pub png_max: u64,
    pub jpeg_max: u64,
    pub bmp_max: u64,
    pub tiff_max: u64,
    pub webp_max: u64,
    pub gif_max: u64,
}

impl Default for FormatSizeLimits {
    fn default() -> Self {
        Self {
            png_max: 15 * 1024 * 1024,
            jpeg_max: 10 * 1024 * 1024,
            bmp_max: 5 * 1024 * 1024,
            tiff_max: 20 * 1024 * 1024,
            webp_max: 10 * 1024 * 1024,
            gif_max: 5 * 1024 * 1024,
        }
    }
}

impl FormatSizeLimits {
    /// Limit for `format`, `None` when the format is not accepted at all
    ///
    /// # Examples
    ///
    /// ```rust
    /// use image::ImageFormat;
    /// use halal_assistant::ocr_config::FormatSizeLimits;
    ///
    /// let limits = FormatSizeLimits::default();
    /// assert_eq!(limits.limit_for(ImageFormat::Jpeg), Some(10 * 1024 * 1024));
    /// assert_eq!(limits.limit_for(ImageFormat::Ico), None);
    /// ```
    pub fn limit_for(&self, format: ImageFormat) -> Option<u64> {
        match format {
            ImageFormat::Png => Some(self.png_max),
            ImageFormat::Jpeg => Some(self.jpeg_max),
            ImageFormat::Bmp => Some(self.bmp_max),
            ImageFormat::Tiff => Some(self.tiff_max),
            ImageFormat::WebP => Some(self.webp_max),
            ImageFormat::Gif => Some(self.gif_max),
            _ => None,
        }
    }
}

/// Everything `TextRecognizer` needs besides the back end itself
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Fewer bytes than this cannot carry a recognizable image header
    pub min_format_bytes: usize,
    /// Upper bound regardless of format
    pub max_file_size: u64,
    pub format_limits: FormatSizeLimits,
    pub recovery: RecoveryConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_format_bytes: MIN_FORMAT_BYTES,
            max_file_size: MAX_FILE_SIZE,
            format_limits: FormatSizeLimits::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let recovery = RecoveryConfig {
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 1000,
            ..RecoveryConfig::default()
        };

        let first = recovery.calculate_retry_delay(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));

        let third = recovery.calculate_retry_delay(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(440));

        let late = recovery.calculate_retry_delay(30);
        assert!(late >= Duration::from_millis(1000) && late <= Duration::from_millis(1100));
    }

    #[test]
    fn test_zero_delay_for_tests() {
        let recovery = RecoveryConfig {
            base_retry_delay_ms: 0,
            ..RecoveryConfig::default()
        };
        assert_eq!(recovery.calculate_retry_delay(2), Duration::ZERO);
    }

    #[test]
    fn test_format_limits() {
        let limits = FormatSizeLimits::default();
        assert_eq!(limits.limit_for(ImageFormat::Jpeg), Some(10 * 1024 * 1024));
        assert!(limits.limit_for(ImageFormat::WebP).is_some());
        assert_eq!(limits.limit_for(ImageFormat::Ico), None);
    }
}
