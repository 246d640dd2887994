//! Retry logic with linear backoff for transient transfer failures.
//!
//! When a transfer fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - may succeed on a later attempt
//! - [`FailureType::Permanent`] - will not succeed regardless of retries
//!
//! The [`RetryPolicy`] then decides whether to retry, waiting
//! `base_delay × attempt` before the next try.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::download::{RetryDecision, RetryPolicy, classify_error};
//! use harvester_core::http::FetchError;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1));
//! let error = FetchError::http_status("https://example.com/file.pdf", 503);
//!
//! let decision = policy.should_retry(classify_error(&error), 1);
//! assert_eq!(
//!     decision,
//!     RetryDecision::Retry { delay: Duration::from_secs(1), attempt: 2 }
//! );
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_SECS};
use crate::http::FetchError;

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeout, connection refused, 5xx, 429.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 403 Forbidden, invalid URL.
    Permanent,
}

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt this will be (1-indexed, so the first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry configuration: attempt budget and linear backoff base.
///
/// # Delay Calculation
///
/// ```text
/// delay = base_delay * attempt
/// ```
///
/// With defaults (3 attempts, 1s base) the waits are 1s then 2s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay multiplied by the failed attempt number.
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs_f64(DEFAULT_RETRY_BASE_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Creates a policy with a custom attempt budget and the default base delay.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay before the attempt following failed attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Classifies a fetch error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | 400, 401, 403, 404, 410, 451 | Permanent |
/// | 429, 500, 502, 503, 504 | Transient |
/// | any other status | Transient |
/// | Timeout / Network | Transient |
/// | Io | Transient |
/// | InvalidUrl / Build | Permanent |
#[instrument(level = "debug")]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Timeout { .. } | FetchError::Network { .. } | FetchError::Io { .. } => {
            FailureType::Transient
        }
        FetchError::InvalidUrl { .. } | FetchError::Build { .. } => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code.
///
/// Explicit arms are kept for the documented codes even where they share a
/// result with the fallback.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        400 => FailureType::Permanent, // Bad Request
        401 => FailureType::Permanent, // Unauthorized
        403 => FailureType::Permanent, // Forbidden
        404 => FailureType::Permanent, // Not Found
        410 => FailureType::Permanent, // Gone
        451 => FailureType::Permanent, // Unavailable For Legal Reasons

        429 => FailureType::Transient, // Too Many Requests
        500 => FailureType::Transient, // Internal Server Error
        502 => FailureType::Transient, // Bad Gateway
        503 => FailureType::Transient, // Service Unavailable
        504 => FailureType::Transient, // Gateway Timeout

        _ => FailureType::Transient,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn test_delay_is_linear_in_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
    }

    #[test]
    fn test_should_retry_transient_until_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 2
            }
        );
        assert_eq!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry {
                delay: Duration::from_secs(2),
                attempt: 3
            }
        );
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::DoNotRetry { reason } if reason.contains("exhausted")
        ));
    }

    #[test]
    fn test_should_not_retry_permanent() {
        let policy = RetryPolicy::with_max_attempts(10);
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { reason } if reason.contains("permanent")
        ));
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = RetryPolicy::with_max_attempts(1);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_classify_permanent_statuses() {
        for status in [400, 401, 403, 404, 410, 451] {
            let error = FetchError::http_status("https://example.com", status);
            assert_eq!(classify_error(&error), FailureType::Permanent, "{status}");
        }
    }

    #[test]
    fn test_classify_transient_statuses() {
        for status in [408, 418, 429, 500, 502, 503, 504, 599] {
            let error = FetchError::http_status("https://example.com", status);
            assert_eq!(classify_error(&error), FailureType::Transient, "{status}");
        }
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&FetchError::timeout("https://example.com")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&FetchError::io(
                "/tmp/x",
                std::io::Error::other("disk full")
            )),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&FetchError::invalid_url("not a url")),
            FailureType::Permanent
        );
    }
}
