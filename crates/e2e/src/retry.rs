//! Bounded polling for assertions that need time to become true

use std::future::Future;
use std::time::Instant;

use tokio::time::sleep;
use tracing::debug;

use crate::config::{RetryPolicy, SETTLE_DELAY};
use crate::error::{E2eError, E2eResult};

/// Run `op` until it succeeds or `policy.timeout` elapses.
///
/// `op` is always attempted at least once. On timeout the last error is
/// reported inside `E2eError::Timeout`.
pub async fn auto_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<T>>,
{
    let start = Instant::now();
    let mut attempts = 0usize;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!("{} passed after {} attempts", what, attempts);
                }
                return Ok(value);
            }
            Err(e) => {
                if start.elapsed() + policy.interval > policy.timeout {
                    return Err(E2eError::Timeout {
                        what: what.to_string(),
                        last: e.to_string(),
                    });
                }
                debug!("{} attempt {} failed: {}", what, attempts, e);
            }
        }
        sleep(policy.interval).await;
    }
}

/// Fixed pause letting a reload settle before the next file operation
pub async fn settle() {
    sleep(SETTLE_DELAY).await;
}
