//! Uniform retry with exponential backoff
//!
//! Every source and destination call goes through [`with_retry`]; the
//! error's own classification decides whether another attempt is made.

use crate::error::{BackendError, RetryError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use trackmig_core::RetryPolicy;

/// Run `call` until it succeeds, fails permanently, or attempts run out
///
/// # Errors
/// - `RetryError::Permanent` on the first non-transient error
/// - `RetryError::Exhausted` once `policy.max_attempts` transient failures occurred
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(RetryError::Permanent(err)),
            Err(err) if attempt >= max_attempts => {
                warn!(operation, attempts = attempt, error = %err, "giving up");
                return Err(RetryError::Exhausted { attempts: attempt, last: err });
            }
            Err(err) => {
                let delay = policy.backoff(attempt) + jitter(policy.max_jitter_ms);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
