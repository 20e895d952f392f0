//! Backoff for failed deliveries, plus a small retrying HTTP helper.
//!
//! # Queue retry policy
//!
//! - Delay before retry `n` (1-based): `initial * 2^(n-1)`, capped at `max`
//! - Down-jitter: the delay is multiplied by a random factor in
//!   `[1 - jitter_factor, 1.0]`
//! - `max_attempts`: `None` retries forever; otherwise a failed entry stops
//!   being selected once it has been tried that many times
//!
//! A server `Retry-After` hint, when present and sane, replaces the computed
//! delay.

use std::time::Duration;

use promptq_config::RetryConfig;
use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Down-jitter factor (0.25 = up to 25% reduction).
    pub jitter_factor: f64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms)),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            max_attempts: (config.max_attempts > 0).then_some(config.max_attempts),
        }
    }

    /// No waiting between attempts. Useful for hosts that pace retries
    /// themselves, and for tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = (max_attempts > 0).then_some(max_attempts);
        self
    }

    /// Delay to wait after `attempts` failed tries (1 = first failure).
    #[must_use]
    pub fn delay_after(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        let step = attempts.saturating_sub(1).min(30);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(step as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = 1.0 - rand::random::<f64>() * self.jitter_factor;
        Duration::from_secs_f64(capped * jitter)
    }

    /// True once an entry has used up its attempts.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Parse `Retry-After-Ms` or `Retry-After` headers.
///
/// Returns `Some` only for values in `(0, 60s)`.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(val) = headers.get("retry-after-ms")
        && let Ok(s) = val.to_str()
        && let Ok(ms) = s.parse::<f64>()
    {
        let duration = Duration::from_secs_f64(ms.max(0.0) / 1000.0);
        if duration > Duration::ZERO && duration < Duration::from_secs(60) {
            return Some(duration);
        }
    }

    if let Some(val) = headers.get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.parse::<u64>()
    {
        let duration = Duration::from_secs(secs);
        if duration > Duration::ZERO && duration < Duration::from_secs(60) {
            return Some(duration);
        }
    }

    None
}

/// Whether a failed HTTP status is worth retrying.
///
/// Respects an `x-should-retry` header override if present.
#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    if let Some(val) = headers.get("x-should-retry")
        && let Ok(s) = val.to_str()
    {
        if s.eq_ignore_ascii_case("true") {
            return true;
        }
        if s.eq_ignore_ascii_case("false") {
            return false;
        }
    }

    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

/// Outcome of [`send_with_retry`].
#[derive(Debug)]
pub enum RetryOutcome {
    Success(Response),
    /// Non-2xx response after exhausting retries (or a non-retryable status).
    HttpError(Response),
    /// Transport failure on the last attempt.
    ConnectionError {
        attempts: u32,
        source: reqwest::Error,
    },
}

/// Send a request, retrying transport errors and retryable statuses up to
/// `max_retries` times with the policy's backoff.
///
/// Every attempt carries the same `Idempotency-Key`.
pub async fn send_with_retry<F>(
    build_request: F,
    policy: &RetryPolicy,
    max_retries: u32,
) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let idempotency_key = format!("promptq-{}", Uuid::new_v4());
    let mut attempt = 0;

    loop {
        let request = build_request().header("Idempotency-Key", &idempotency_key);
        let last_attempt = attempt >= max_retries;

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                return RetryOutcome::Success(response);
            }
            Ok(response) => {
                let status = response.status();
                if last_attempt || !should_retry(status, response.headers()) {
                    return RetryOutcome::HttpError(response);
                }
                let delay = policy.delay_after(attempt + 1, parse_retry_after(response.headers()));
                tracing::debug!(
                    status = %status,
                    retry_count = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after error status"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if last_attempt || !is_retryable_error(&e) {
                    return RetryOutcome::ConnectionError {
                        attempts: attempt + 1,
                        source: e,
                    };
                }
                let delay = policy.delay_after(attempt + 1, None);
                tracing::debug!(
                    error = %e,
                    retry_count = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after connection error"
                );
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use promptq_config::RetryConfig;
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{RetryPolicy, parse_retry_after, should_retry};

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn defaults_match_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.jitter_factor - 0.25).abs() < f64::EPSILON);
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = no_jitter();
        assert_eq!(policy.delay_after(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2, None), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3, None), Duration::from_secs(2));
        assert_eq!(policy.delay_after(20, None), Duration::from_secs(30));
        assert_eq!(policy.delay_after(u32::MAX, None), Duration::from_secs(30));
    }

    #[test]
    fn jitter_only_shortens() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_after(1, None);
            assert!(d <= Duration::from_millis(500));
            assert!(d >= Duration::from_millis(375));
        }
    }

    #[test]
    fn retry_after_hint_wins() {
        let policy = no_jitter();
        assert_eq!(
            policy.delay_after(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn max_attempts_zero_means_unlimited() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert!(!policy.is_exhausted(1_000_000));

        let capped = policy.with_max_attempts(3);
        assert!(!capped.is_exhausted(2));
        assert!(capped.is_exhausted(3));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate();
        assert_eq!(policy.delay_after(5, None), Duration::ZERO);
    }

    #[test]
    fn parse_retry_after_ms_and_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after-ms", HeaderValue::from_static("1500"));
        assert_eq!(
            parse_retry_after(&headers),
            Some(Duration::from_millis(1500))
        );

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(5)));

        headers.insert("retry-after", HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retryable_statuses() {
        let headers = HeaderMap::new();
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS, &headers));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE, &headers));
        assert!(should_retry(StatusCode::REQUEST_TIMEOUT, &headers));
        assert!(!should_retry(StatusCode::BAD_REQUEST, &headers));
        assert!(!should_retry(StatusCode::UNAUTHORIZED, &headers));
    }

    #[test]
    fn should_retry_header_override() {
        let mut headers = HeaderMap::new();
        headers.insert("x-should-retry", HeaderValue::from_static("true"));
        assert!(should_retry(StatusCode::BAD_REQUEST, &headers));

        headers.insert("x-should-retry", HeaderValue::from_static("false"));
        assert!(!should_retry(StatusCode::SERVICE_UNAVAILABLE, &headers));
    }
}
