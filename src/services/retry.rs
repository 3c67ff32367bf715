use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded exponential backoff with +/-25% jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Delay to sleep after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        if base == 0 {
            return Duration::ZERO;
        }
        let cap = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX).max(1);
        let exp = attempt.saturating_sub(1).min(20);
        let scaled = base.saturating_mul(1u64 << exp).min(cap);

        let spread = (scaled / 4).max(1);
        let lower = scaled.saturating_sub(spread).max(1);
        let upper = scaled.saturating_add(spread).min(cap);
        if lower >= upper {
            return Duration::from_millis(lower);
        }
        Duration::from_millis(rand::rng().random_range(lower..=upper))
    }
}

/// The last error and how many attempts were spent reaching it.
#[derive(Debug, Clone)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < policy.max_attempts && is_retryable(&error) => {
                let delay = policy.delay_after(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(Exhausted {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}
