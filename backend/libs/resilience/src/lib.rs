/// Resilience patterns for calls to external authorities
///
/// This library provides:
/// - **Retry**: Exponential backoff with jitter, bounded by both an attempt count and a total
///   time budget, driven by a pure schedule ([`RetryConfig::next_delay`])
/// - **Classification**: errors opt in to retries through the [`Retryable`] trait
///
/// # Example: HTTP call with retry
///
/// ```rust,no_run
/// use resilience::{with_retry, RetryConfig, Retryable};
///
/// #[derive(Debug)]
/// struct Unavailable;
///
/// impl std::fmt::Display for Unavailable {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("unavailable")
///     }
/// }
///
/// impl Retryable for Unavailable {
///     fn is_transient(&self) -> bool {
///         true
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::default();
///     let result = with_retry(&config, || async { Ok::<_, Unavailable>(()) }).await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod retry;

pub use retry::{with_retry, RetryConfig, RetryError, Retryable};
