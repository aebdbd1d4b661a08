//! Retry with exponential backoff and provider retry hints.
//!
//! [`with_retry`] wraps any fallible async operation. Between attempts it
//! sleeps for `min(max_delay, initial_delay * multiplier^attempt)` with ±25%
//! jitter, unless the error carries a provider "retry after N" hint, which
//! always wins over the computed backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use zeptorelay::delivery::retry::{with_retry, RetryPolicy};
//!
//! let policy = RetryPolicy::default().with_max_retries(5);
//! let outcome = with_retry(&policy, || platform.send_message(chat, &text)).await;
//! if !outcome.success() {
//!     tracing::warn!(attempts = outcome.attempts, "send gave up");
//! }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{PlatformError, RelayError};

/// "retry after 5", `"retry_after": 5`, "Retry-After: 5", "retry after 1.5s"
static RETRY_AFTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)retry[ _-]?after"?\s*[:=]?\s*(\d+(?:\.\d+)?)"#)
        .unwrap_or_else(|e| panic!("invalid retry-after pattern: {e}"))
});

/// Extract a provider retry hint (in seconds) from an error message.
pub fn parse_retry_after(msg: &str) -> Option<Duration> {
    let caps = RETRY_AFTER_RE.captures(msg)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// What the retry loop needs to know about an error.
pub trait RetryHint {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// Provider-supplied wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryHint for PlatformError {
    fn is_retryable(&self) -> bool {
        PlatformError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        PlatformError::retry_after(self).or_else(|| match self {
            PlatformError::RateLimited { message, .. } => parse_retry_after(message),
            _ => None,
        })
    }
}

impl RetryHint for RelayError {
    fn is_retryable(&self) -> bool {
        self.platform().is_some_and(PlatformError::is_retryable)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RelayError::Throttled {
                retry_after: Some(d),
                ..
            } => Some(*d),
            _ => self.platform().and_then(RetryHint::retry_after),
        }
    }
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Backoff before retry number `attempt` (0-indexed), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        compute_delay(
            attempt,
            self.initial_delay,
            self.max_delay,
            self.multiplier,
            1.0,
        )
    }

    /// Backoff before retry number `attempt`, with jitter when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = if self.jitter { jitter_factor() } else { 1.0 };
        compute_delay(
            attempt,
            self.initial_delay,
            self.max_delay,
            self.multiplier,
            factor,
        )
    }
}

/// `min(max_delay, initial * multiplier^attempt)` scaled by `jitter_factor`,
/// never exceeding `max_delay`.
pub fn compute_delay(
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter_factor: f64,
) -> Duration {
    let max_nanos = max.as_nanos() as f64;
    let exp = initial.as_nanos() as f64 * multiplier.max(1.0).powi(attempt.min(32) as i32);
    let jittered = (exp.min(max_nanos) * jitter_factor).clamp(0.0, max_nanos);
    Duration::from_nanos(jittered.round() as u64)
}

/// Jitter factor in `[0.75, 1.25)`.
///
/// Derived from the sub-second nanos of the wall clock to avoid pulling in an
/// RNG; enough to decorrelate concurrent retries.
fn jitter_factor() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    jitter_from_nanos(nanos)
}

/// Map sub-second nanos onto `[0.75, 1.25)`. Uses the microsecond digits too,
/// so clocks that only tick in microseconds still spread.
fn jitter_from_nanos(nanos: u32) -> f64 {
    0.75 + f64::from(nanos % 1_000_000) / 2_000_000.0
}

/// Result of a retried operation plus bookkeeping.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Total attempts made, including the first
    pub attempts: u32,
    /// Time spent sleeping between attempts
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Retry `op` using the error's own [`RetryHint`] classification.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> RetryOutcome<T, E>
where
    E: RetryHint + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(policy, |e: &E| e.is_retryable(), op).await
}

/// Retry `op` using a caller-supplied retryability predicate.
pub async fn with_retry_if<T, E, P, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: F,
) -> RetryOutcome<T, E>
where
    E: RetryHint + Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0u32;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts += 1;
        let err = match op().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "Operation succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    total_delay,
                };
            }
            Err(err) => err,
        };

        let retry_index = attempts - 1;
        if retry_index >= policy.max_retries || !is_retryable(&err) {
            return RetryOutcome {
                result: Err(err),
                attempts,
                total_delay,
            };
        }

        let hint = err.retry_after();
        let delay = hint.unwrap_or_else(|| policy.delay_for(retry_index));
        warn!(
            attempt = attempts,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            provider_hint = hint.is_some(),
            error = %err,
            "Retrying after transient error"
        );
        tokio::time::sleep(delay).await;
        total_delay += delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false)
    }

    #[test]
    fn test_parse_retry_after_patterns() {
        assert_eq!(
            parse_retry_after("Too Many Requests: retry after 5"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parse_retry_after(r#"{"ok":false,"parameters":{"retry_after":12}}"#),
            Some(Duration::from_secs(12))
        );
        assert_eq!(
            parse_retry_after("Retry-After: 3"),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            parse_retry_after("please retry after 1.5s"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after("internal server error"), None);
    }

    #[test]
    fn test_compute_delay_exponential_and_capped() {
        let initial = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        assert_eq!(compute_delay(0, initial, max, 2.0, 1.0), Duration::from_millis(1000));
        assert_eq!(compute_delay(1, initial, max, 2.0, 1.0), Duration::from_millis(2000));
        assert_eq!(compute_delay(3, initial, max, 2.0, 1.0), Duration::from_millis(8000));
        assert_eq!(compute_delay(10, initial, max, 2.0, 1.0), max);
        assert_eq!(compute_delay(10, initial, max, 2.0, 1.25), max);
    }

    #[test]
    fn test_jitter_within_quarter() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let base = policy.base_delay(attempt).as_secs_f64();
            let d = policy.delay_for(attempt).as_secs_f64();
            assert!(d >= base * 0.75 - 1e-6, "{d} < 0.75 * {base}");
            assert!(d <= base * 1.25 + 1e-6, "{d} > 1.25 * {base}");
        }
    }

    #[test]
    fn test_jitter_spreads_on_microsecond_clock() {
        let factors: Vec<f64> = [0u32, 250_000, 500_000, 999_000]
            .into_iter()
            .map(jitter_from_nanos)
            .collect();
        assert_eq!(factors[0], 0.75);
        assert!((factors[1] - 0.875).abs() < 1e-9);
        assert!((factors[2] - 1.0).abs() < 1e-9);
        assert!(factors[3] < 1.25 && factors[3] > 1.24);
        assert!(factors.iter().all(|f| (0.75..1.25).contains(f)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_makes_four_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let outcome: RetryOutcome<(), PlatformError> =
            with_retry(&fast_policy().with_max_retries(3), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::Server("502 Bad Gateway".into()))
                }
            })
            .await;

        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 10 + 20 + 40 ms
        assert_eq!(outcome.total_delay, Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_hint_overrides_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let start = tokio::time::Instant::now();
        let outcome = with_retry(&fast_policy(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PlatformError::rate_limited(
                        None,
                        "Too Many Requests: retry after 5",
                    ))
                } else {
                    Ok("sent")
                }
            }
        })
        .await;

        assert_eq!(outcome.result, Ok("sent"));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.total_delay, Duration::from_secs(5));
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let outcome: RetryOutcome<(), PlatformError> = with_retry(&fast_policy(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::MessageNotFound("message to edit not found".into()))
            }
        })
        .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_delay, Duration::ZERO);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let outcome: RetryOutcome<(), PlatformError> = with_retry_if(
            &fast_policy().with_max_retries(2),
            |e: &PlatformError| matches!(e, PlatformError::Unknown(_)),
            || async { Err(PlatformError::Unknown("flaky".into())) },
        )
        .await;
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_relay_error_hint() {
        let err: RelayError =
            PlatformError::rate_limited(Some(Duration::from_secs(9)), "slow down").into();
        assert!(RetryHint::is_retryable(&err));
        assert_eq!(RetryHint::retry_after(&err), Some(Duration::from_secs(9)));

        let err: RelayError = PlatformError::Forbidden("blocked".into()).into();
        assert!(!RetryHint::is_retryable(&err));
        assert!(!RetryHint::is_retryable(&RelayError::QueueClosed));
    }
}
