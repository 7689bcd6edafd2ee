//! Bounded exponential backoff for provider calls.

use std::future::Future;

use tracing::warn;

use crate::provider::ProviderError;

use super::types::{ExecuteError, RetryConfig};

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only [`ProviderError::Transient`] is retried.
pub async fn with_backoff<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T, ExecuteError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, ProviderError>>,
{
  let max_attempts = config.max_attempts.max(1);
  let mut attempt = 0;
  loop {
    attempt += 1;
    match op().await {
      Ok(value) => return Ok(value),
      Err(err) if err.is_transient() && attempt < max_attempts => {
        let delay = config.delay_for(attempt);
        warn!(resource = what, attempt, ?delay, error = %err, "transient failure, retrying");
        tokio::time::sleep(delay).await;
      }
      Err(err) if err.is_transient() => {
        return Err(ExecuteError::RetriesExhausted {
          attempts: attempt,
          last: err,
        });
      }
      Err(err) => return Err(ExecuteError::Provider(err)),
    }
  }
}
