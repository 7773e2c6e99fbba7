//! # Circuit Breaker Module
//!
//! Stops calling the OCR back end for a while after it fails repeatedly, so
//! a broken or throttled service costs users one fast error instead of a
//! full retry cycle each.
//!
//! - **Closed**: requests pass through
//! - **Open**: the failure threshold was reached, requests fail fast
//! - after the reset window the breaker closes again and the next request
//!   is let through

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker shared by every OCR request.
///
/// # Configuration
///
/// `TextRecognizer` builds it from `RecoveryConfig`:
/// - `circuit_breaker_threshold`: consecutive failures before opening (default: 5)
/// - `circuit_breaker_reset_secs`: how long it stays open (default: 60s)
///
/// # Thread Safety
///
/// Counters and the open timestamp sit behind one mutex, so a check and an
/// update never observe each other half done. The breaker is shared through
/// `Arc<AppState>` by all handler tasks.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Consecutive failures that open the breaker; `0` is treated as `1`
    /// * `reset_after` - How long the breaker stays open
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use halal_assistant::circuit_breaker::CircuitBreaker;
    ///
    /// let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
    /// assert!(!breaker.is_open());
    /// ```
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            threshold: threshold.max(1),
            reset_after,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // A panic while holding the lock leaves plain counters behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether requests should currently be refused.
    ///
    /// # Behavior
    ///
    /// - `true` from the failure that reached the threshold until `reset_after` has elapsed
    /// - the first call after the window closes the breaker and clears the count
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();
        match state.opened_at {
            Some(opened) if opened.elapsed() < self.reset_after => true,
            Some(_) => {
                *state = BreakerState::default();
                false
            }
            None => false,
        }
    }

    /// Count a failure of the service.
    ///
    /// Only failures the service is responsible for should be recorded;
    /// see `OcrError::counts_against_service`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use halal_assistant::circuit_breaker::CircuitBreaker;
    ///
    /// let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
    /// breaker.record_failure();
    /// assert!(!breaker.is_open());
    /// breaker.record_failure();
    /// assert!(breaker.is_open());
    /// ```
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold && state.opened_at.is_none() {
            warn!(failures = state.consecutive_failures, "OCR circuit breaker opened");
            state.opened_at = Some(Instant::now());
        }
    }

    /// A successful call closes the breaker and clears the count
    pub fn record_success(&self) {
        *self.lock() = BreakerState::default();
    }

    /// Consecutive failures since the last success or reset
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_resets() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn test_closes_after_reset_window() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }
}
