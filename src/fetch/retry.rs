//! Failure classification, retry budgets and exponential backoff.
//!
//! # Classification
//!
//! | Failure | Type | Rationale |
//! |---------|------|-----------|
//! | Timeout | Retryable | Network may recover |
//! | 429 | Retryable | Rate limited |
//! | 500-599 | Retryable | Server trouble, usually temporary |
//! | 403 from `AkamaiGHost` | Retryable | CDN bot mitigation disguised as a 403 |
//! | Any other status | Fatal | Retrying would not change the answer |
//! | Network / client build | Fatal | Not a throttling signal |
//!
//! Backoff starts at 10 seconds and doubles after every retry, capped at
//! 300 seconds. There is no jitter: requests are strictly sequential, so
//! there is no herd to spread out.

use std::fmt;
use std::time::Duration;

use tracing::instrument;

use super::FetchError;

/// `Server` header value of the CDN front end that answers throttled
/// requests with 403.
pub const CDN_BOT_MITIGATION_SERVER: &str = "AkamaiGHost";

/// Default first backoff delay.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(10);

/// Default backoff cap.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Whether a failed request is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure; retry after backing off.
    Retryable,
    /// Permanent failure; propagate immediately.
    Fatal,
}

/// How many times a failed request may be repeated after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RetryBudget {
    /// Retry until the request succeeds or fails fatally.
    #[default]
    Unlimited,
    /// Retry at most this many times (`0` means a single attempt).
    Limited(u32),
}

impl RetryBudget {
    /// Whether another retry is allowed.
    #[must_use]
    pub fn has_remaining(self) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(remaining) => remaining > 0,
        }
    }

    /// The budget after spending one retry. Unlimited budgets never shrink.
    #[must_use]
    pub fn consume(self) -> Self {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Limited(remaining) => Self::Limited(remaining.saturating_sub(1)),
        }
    }
}

impl fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Limited(n) => write!(f, "{n}"),
        }
    }
}

/// Exponential backoff schedule: `min(initial * 2^retry, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_BACKOFF_INITIAL,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl BackoffPolicy {
    /// Creates a schedule with custom bounds. `max` is raised to `initial`
    /// when smaller.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// A schedule that never waits, for tests and local mirrors.
    #[must_use]
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    #[must_use]
    pub fn initial(&self) -> Duration {
        self.initial
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Classifies a fetch error for retry decisions.
#[instrument(level = "trace")]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::Timeout { .. } => FailureType::Retryable,
        FetchError::HttpStatus { status, server, .. } => {
            classify_http_status(*status, server.as_deref())
        }
        FetchError::Network { .. } | FetchError::Io { .. } | FetchError::ClientBuild { .. } => {
            FailureType::Fatal
        }
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16, server: Option<&str>) -> FailureType {
    match (status, server) {
        (500..=599, _) => FailureType::Retryable,
        (429, _) => FailureType::Retryable,
        (403, Some(CDN_BOT_MITIGATION_SERVER)) => FailureType::Retryable,
        _ => FailureType::Fatal,
    }
}
