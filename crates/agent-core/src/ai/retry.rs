//! Retry policy for LLM transport errors
//!
//! Rate limits and transient connection failures are retried up to three
//! times with exponential backoff (1s, 2s, 4s).

use std::time::Duration;

/// Maximum retries after the initial attempt.
pub const MAX_RETRIES: usize = 3;

/// HTTP status codes worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Delay before retry `attempt` (0-based): 1s, 2s, 4s.
pub fn backoff_delay(attempt: usize) -> Duration {
    Duration::from_secs(1u64 << attempt.min(MAX_RETRIES - 1))
}
