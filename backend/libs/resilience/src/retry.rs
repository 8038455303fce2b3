/// Retry policy with exponential backoff, jitter and a total time budget
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Errors that can tell a transient failure from a permanent one
///
/// Only transient failures are retried. Anything else aborts the loop on the first attempt.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Total wall-clock budget across all attempts and sleeps
    pub max_elapsed: Duration,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_elapsed: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff to sleep before retry number `attempt` (1-based), or `None` when the budget is spent
    ///
    /// `elapsed` is the time already consumed by earlier attempts and sleeps. A delay that would
    /// push the loop past `max_elapsed` is refused rather than truncated.
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }

        let exponent = (attempt - 1) as i32;
        let base = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_millis() as f64);
        let delay = Duration::from_millis(capped as u64);

        if elapsed + delay > self.max_elapsed {
            return None;
        }
        Some(delay)
    }

    /// Apply jitter to a scheduled delay without overrunning `max_elapsed`
    fn with_jitter(&self, delay: Duration, elapsed: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3); // ±30%
        let jittered = Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64);
        jittered.min(self.max_elapsed.saturating_sub(elapsed))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Operation failed permanently: {0}")]
    Permanent(E),
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent(_) => 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Execute a future with retry logic
///
/// Transient failures are retried on the schedule from [`RetryConfig::next_delay`]; the first
/// permanent failure is returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => {
                debug!(error = %e, "Permanent failure, not retrying");
                return Err(RetryError::Permanent(e));
            }
            Err(e) => {
                attempt += 1;

                let elapsed = started.elapsed();
                let Some(delay) = config.next_delay(attempt, elapsed) else {
                    warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                };

                let delay = config.with_jitter(delay, elapsed);
                warn!(attempt, error = %e, "Transient failure, retrying in {:?}", delay);

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_schedule_is_exponential_and_capped() {
        let config = no_jitter();

        assert_eq!(config.next_delay(1, Duration::ZERO), Some(Duration::from_millis(200)));
        assert_eq!(config.next_delay(2, Duration::ZERO), Some(Duration::from_millis(300)));
        assert_eq!(config.next_delay(3, Duration::ZERO), Some(Duration::from_millis(450)));
        assert_eq!(config.next_delay(8, Duration::ZERO), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_schedule_respects_elapsed_budget() {
        let config = no_jitter();

        assert_eq!(config.next_delay(1, Duration::from_millis(2_900)), None);
        assert_eq!(
            config.next_delay(1, Duration::from_millis(2_800)),
            Some(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_schedule_respects_max_retries() {
        let config = RetryConfig {
            max_retries: 2,
            ..no_jitter()
        };

        assert!(config.next_delay(2, Duration::ZERO).is_some());
        assert_eq!(config.next_delay(3, Duration::ZERO), None);
        assert_eq!(config.next_delay(0, Duration::ZERO), None);
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&no_jitter(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TestError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&no_jitter(), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&no_jitter(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(TestError::Permanent) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent(TestError::Permanent))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_total_time() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let start = Instant::now();

        let result = with_retry(&no_jitter(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(TestError::Transient) }
        })
        .await;

        // 200 + 300 + 450 + 675 + 1000 = 2625ms; the next 1000ms sleep would overrun 3s
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 6, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert!(start.elapsed() <= Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_never_overruns_budget() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(900),
            max_backoff: Duration::from_millis(900),
            max_elapsed: Duration::from_secs(1),
            ..Default::default()
        };
        let elapsed = Duration::from_millis(100);
        let delay = config.next_delay(1, elapsed).unwrap();

        for _ in 0..200 {
            assert!(elapsed + config.with_jitter(delay, elapsed) <= config.max_elapsed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_retries_stay_within_budget() {
        let start = Instant::now();

        let result = with_retry(&RetryConfig::default(), || async {
            Err::<i32, _>(TestError::Transient)
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { .. })));
        assert!(start.elapsed() <= Duration::from_secs(3));
    }
}
