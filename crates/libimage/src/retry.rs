use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::copy::CopyError;

pub const DEFAULT_MAX_RETRY: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Attempts made after the first failure.
    pub max_retry: u32,
    /// Fixed delay between attempts. Without one the delay doubles each
    /// attempt starting at one second.
    pub delay: Option<Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            delay: None,
        }
    }
}

impl RetryOptions {
    fn delay_for(&self, attempt: u32) -> Duration {
        match self.delay {
            Some(delay) => delay,
            None => Duration::from_secs(2u64.saturating_pow(attempt)),
        }
    }
}

/// Runs `operation` and retries it while it fails with a retryable error,
/// up to `options.max_retry` more times. Cancellation stops the wait
/// between attempts. The last error is returned when giving up.
pub fn retry_if_necessary<F>(
    cancel: &CancellationToken,
    options: &RetryOptions,
    mut operation: F,
) -> Result<(), CopyError>
where
    F: FnMut() -> Result<(), CopyError>,
{
    let mut result = operation();
    let mut attempt = 0;
    while let Err(err) = &result {
        if !err.is_retryable() || attempt >= options.max_retry {
            break;
        }

        let delay = options.delay_for(attempt);
        tracing::warn!(
            "failed, retrying in {:?} ... ({}/{}). Error: {}",
            delay,
            attempt + 1,
            options.max_retry,
            err
        );
        if cancel.wait_timeout(delay) {
            tracing::debug!("retry cancelled");
            break;
        }

        result = operation();
        attempt += 1;
    }

    result
}
