use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy)]
enum Backoff {
    /// Equal jitter exponential: base/2 + rand(0, base/2), base doubling per attempt.
    Exponential { initial_ms: u64 },
    Fixed(Duration),
}

/// Bounded retry schedule. `max_attempts` counts the first try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            backoff: Backoff::Exponential {
                initial_ms: INITIAL_BACKOFF_MS,
            },
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    #[cfg(test)]
    pub(crate) fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { initial_ms } => {
                let base = initial_ms.saturating_mul(2u64.saturating_pow(attempt));
                let half = base / 2;
                Duration::from_millis(half + fastrand::u64(..half.max(1)))
            }
            Backoff::Fixed(d) => d,
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retriable error, or the
/// attempt ceiling is reached. The last error is returned on exhaustion.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_retriable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.max_attempts();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retriable(&e) && attempt + 1 < attempts => {
                let delay = policy.delay(attempt);
                debug!(
                    label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
