//! Retry policy handed to a [`RemoteSource`](super::RemoteSource) when a stream is opened.

use std::time::Duration;

use super::TransferError;
use super::stream::StreamControl;

/// Shift cap so `base * 2^k` cannot overflow for large attempt counters.
const MAX_SHIFT: u32 = 20;

/// Exponential back-off for transient transfer errors.
///
/// The delay before retry attempt `k` (0-indexed) is `base_delay * 2^k`.
/// Once `k` reaches `max_attempts` the error is surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Policy that surfaces the first error.
    pub fn never() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(MAX_SHIFT))
    }

    /// Sleep for the back-off of `attempt`, returning early with
    /// [`TransferError::Cancelled`] if the stream is destroyed meanwhile.
    pub async fn backoff(&self, attempt: u32, control: &StreamControl) -> Result<(), TransferError> {
        let delay = self.delay(attempt);
        tokio::select! {
            biased;
            _ = control.cancelled() => Err(TransferError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
