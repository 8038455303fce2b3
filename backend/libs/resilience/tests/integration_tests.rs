/// Integration tests for resilience library
use resilience::{with_retry, RetryConfig, RetryError, Retryable};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct HttpStatus(u16);

impl std::fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status {}", self.0)
    }
}

impl Retryable for HttpStatus {
    fn is_transient(&self) -> bool {
        self.0 >= 500 || self.0 == 429
    }
}

// ==================== Retry Tests ====================

#[tokio::test(start_paused = true)]
async fn test_server_errors_retried_until_success() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let config = RetryConfig {
        jitter: false,
        ..Default::default()
    };

    let result = with_retry(&config, move || {
        let count = counter_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            match count {
                0 => Err(HttpStatus(503)),
                1 => Err(HttpStatus(429)),
                _ => Ok("ok"),
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_aborts_immediately() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let result = with_retry(&RetryConfig::default(), move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(HttpStatus(404)) }
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.attempts(), 1);
    assert_eq!(err.into_inner().0, 404);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_jittered_loop_stays_within_budget() {
    let config = RetryConfig {
        max_elapsed: Duration::from_secs(3),
        ..Default::default()
    };
    let start = tokio::time::Instant::now();

    let result = with_retry(&config, || async { Err::<(), _>(HttpStatus(500)) }).await;

    assert!(matches!(result, Err(RetryError::Exhausted { .. })));
    // Jitter can stretch each sleep by up to 30% past the scheduled delay
    assert!(start.elapsed() <= Duration::from_millis(3_900));
}
