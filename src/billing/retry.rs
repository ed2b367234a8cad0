use std::time::Duration;

use crate::error::{GatewayError, Result};

/// 最大重试次数（共 4 次尝试）
pub const MAX_RETRIES: u32 = 3;
/// 初始退避时间
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// 指数退避：200ms, 400ms, 800ms
pub fn backoff_delay(attempt: u32) -> Duration {
    INITIAL_BACKOFF * 2u32.pow(attempt)
}

/// How one attempt failed, deciding whether another is worth making.
pub(crate) enum AttemptError {
    /// Transport failure, decode failure, upstream 5xx.
    Retryable(GatewayError),
    /// Upstream 4xx or business-level rejection; retrying cannot change
    /// the outcome.
    Terminal(GatewayError),
}

/// Run `attempt_fn` up to `MAX_RETRIES + 1` times with exponential backoff.
/// The sleep suspends only the calling task; concurrent calls never block
/// on each other.
pub(crate) async fn retry_with_backoff<T, F, Fut>(op_name: &str, mut attempt_fn: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Terminal(e)) => return Err(e),
            Err(AttemptError::Retryable(e)) => {
                if attempt >= MAX_RETRIES {
                    return Err(e);
                }
                let backoff = backoff_delay(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying after {:?}: {}",
                    op_name,
                    attempt + 1,
                    MAX_RETRIES + 1,
                    backoff,
                    e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
