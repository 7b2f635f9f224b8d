use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::{options::RetryOptions, ApiError, Result};

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

/// Attempt budget and backoff base for [`run_with_retry`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the failed `attempt` (1-based): `base_delay * 2^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

impl From<RetryOptions> for RetryPolicy {
    fn from(options: RetryOptions) -> Self {
        Self {
            max_attempts: options.max_attempts,
            base_delay: Duration::from_millis(options.base_delay_ms),
        }
    }
}

/// Transient failures: timeouts, connection errors, HTTP 429 and 5xx.
pub fn is_transient(err: &ApiError) -> bool {
    match err {
        ApiError::Timeout { .. } | ApiError::Network(_) => true,
        ApiError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
        _ => false,
    }
}

/// Predicate retrying every [`is_transient`] error.
pub fn default_retry_predicate() -> RetryPredicate {
    Arc::new(is_transient)
}

/// Wraps a closure as a [`RetryPredicate`].
pub fn retry_when<F>(predicate: F) -> RetryPredicate
where
    F: Fn(&ApiError) -> bool + Send + Sync + 'static,
{
    Arc::new(predicate)
}

/// Predicate retrying errors whose message contains any of `patterns`,
/// ignoring case.
///
/// Useful for providers that report transient conditions as codes inside
/// an otherwise terminal response body.
pub fn message_retry_predicate<I, S>(patterns: I) -> RetryPredicate
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let patterns: Vec<String> = patterns
        .into_iter()
        .map(|pattern| pattern.as_ref().to_lowercase())
        .collect();
    Arc::new(move |err: &ApiError| {
        let message = err.to_string().to_lowercase();
        patterns.iter().any(|pattern| message.contains(pattern))
    })
}

/// Runs `operation` until it succeeds, the predicate rejects its error, or
/// `policy.max_attempts` (minimum 1) attempts have been made.
///
/// The closure receives the 1-based attempt number. The error of the last
/// attempt is returned unchanged.
pub async fn run_with_retry<T, F, Fut, P>(
    policy: RetryPolicy,
    predicate: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&ApiError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    #[cfg(feature = "tracing")]
                    tracing::info!(attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= max_attempts || !predicate(&err) {
                    return Err(err);
                }

                let delay = policy.delay_after(attempt);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt,
                    delay_ms = crate::util::millis(delay),
                    error = %err,
                    "retrying request"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{
        default_retry_predicate, is_transient, message_retry_predicate, run_with_retry,
        RetryPolicy,
    };
    use crate::ApiError;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = policy(5);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_uses_every_attempt_with_backoff() {
        let start = Instant::now();
        let mut seen = Vec::new();

        let err = run_with_retry(policy(3), is_transient, |attempt| {
            seen.push((attempt, start.elapsed()));
            async move {
                Err::<(), _>(ApiError::Http {
                    status: 503,
                    body: format!("attempt {attempt}"),
                })
            }
        })
        .await
        .expect_err("operation never succeeds");

        assert_eq!(
            seen,
            vec![
                (1, Duration::ZERO),
                (2, Duration::from_millis(100)),
                (3, Duration::from_millis(300)),
            ]
        );
        match err {
            ApiError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "attempt 3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = run_with_retry(policy(3), is_transient, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ApiError::Http {
                    status: 404,
                    body: "unknown site".to_owned(),
                })
            }
        })
        .await
        .expect_err("404 is terminal");

        assert_eq!(err.status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt() {
        let value = run_with_retry(policy(3), is_transient, |attempt| async move {
            if attempt < 2 {
                Err(ApiError::Timeout { timeout_ms: 10 })
            } else {
                Ok(attempt)
            }
        })
        .await
        .expect("second attempt succeeds");

        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = run_with_retry(policy(0), |_: &ApiError| true, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ApiError::Timeout { timeout_ms: 1 }) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_predicate_classifies_error_kinds() {
        let predicate = default_retry_predicate();
        assert!(predicate(&ApiError::Timeout { timeout_ms: 5 }));
        assert!(predicate(&ApiError::Http {
            status: 429,
            body: String::new()
        }));
        assert!(predicate(&ApiError::Http {
            status: 502,
            body: String::new()
        }));
        assert!(!predicate(&ApiError::Http {
            status: 401,
            body: String::new()
        }));
        assert!(!predicate(&ApiError::Parse("eof".to_owned())));
        assert!(!predicate(&ApiError::CircuitOpen {
            key: "k".to_owned()
        }));
    }

    #[test]
    fn message_predicate_matches_substrings_case_insensitively() {
        let predicate = message_retry_predicate(["TIMEOUT", "E900"]);
        assert!(predicate(&ApiError::Timeout { timeout_ms: 5 }));
        assert!(predicate(&ApiError::Http {
            status: 400,
            body: r#"{"result_code":"E900"}"#.to_owned()
        }));
        assert!(!predicate(&ApiError::Http {
            status: 400,
            body: "bad request".to_owned()
        }));
    }
}
