//! Bounded retry with linear backoff around remote calls.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry configuration: `attempts` total tries, waiting `base_delay * (i + 1)`
/// after failed attempt `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      base_delay: Duration::from_millis(1000),
    }
  }
}

impl RetryPolicy {
  pub fn new(attempts: u32, base_delay: Duration) -> Self {
    Self {
      attempts,
      base_delay,
    }
  }

  /// Delay before the retry that follows failed attempt `attempt` (0-indexed).
  pub fn delay_after(&self, attempt: u32) -> Duration {
    self.base_delay * (attempt + 1)
  }

  /// Run `op` until it succeeds or the attempt budget is spent.
  ///
  /// The last error is returned unmodified.
  pub async fn retry<T, E, F, Fut>(&self, op: F) -> Result<T, E>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    self.retry_if(op, |_| true).await
  }

  /// Like [`retry`](Self::retry), but gives up immediately on errors for which
  /// `should_retry` returns false.
  pub async fn retry_if<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
  {
    // A zero budget still runs the operation once.
    let attempts = self.attempts.max(1);
    let mut attempt = 0;

    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) => {
          if attempt + 1 >= attempts || !should_retry(&err) {
            return Err(err);
          }
          let delay = self.delay_after(attempt);
          debug!(attempt, ?delay, "remote call failed, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
      }
    }
  }
}
