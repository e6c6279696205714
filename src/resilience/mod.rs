//! Rate-limit tracking and the bounded backoff policy.
//!
//! Every physical response feeds a [`RateLimitTracker`]; [`classify`] decides
//! whether a response is a success, a rate-limit signal worth one wait and retry,
//! an authorization failure worth one refresh, or a plain failure.

use crate::errors::RateLimitInfo;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

/// Extracts rate limit headers from a response.
///
/// Each header is parsed on its own; absent or malformed values stay `None`.
pub fn extract_rate_limit(headers: &HeaderMap) -> RateLimitInfo {
    fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    let reset_at = header::<i64>(headers, "x-ratelimit-reset")
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    RateLimitInfo {
        limit: header(headers, "x-ratelimit-limit"),
        remaining: header(headers, "x-ratelimit-remaining"),
        reset_at,
        retry_after: header(headers, "retry-after"),
        resource: headers
            .get("x-ratelimit-resource")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}

/// Computes `max(retry_after, reset_at - now, 0)`.
pub fn backoff_delay(info: &RateLimitInfo, now: DateTime<Utc>) -> Duration {
    let retry_after = Duration::from_secs(info.retry_after.unwrap_or(0));
    let until_reset = info
        .reset_at
        .and_then(|reset| (reset - now).to_std().ok())
        .unwrap_or(Duration::ZERO);
    retry_after.max(until_reset)
}

/// Outcome of a single physical response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx.
    Success,
    /// Rate limited; wait this long before the single retry.
    RateLimited(Duration),
    /// 401; the credential should be refreshed once.
    Unauthorized,
    /// Any other non-success status.
    Failed,
}

/// Classifies a response status together with its rate limit headers.
pub fn classify(status: StatusCode, info: &RateLimitInfo, now: DateTime<Utc>) -> ResponseClass {
    if status.is_success() {
        return ResponseClass::Success;
    }
    if status == StatusCode::UNAUTHORIZED {
        return ResponseClass::Unauthorized;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ResponseClass::RateLimited(backoff_delay(info, now));
    }
    if status != StatusCode::FORBIDDEN {
        return ResponseClass::Failed;
    }

    // A 403 is a limit only with an exhausted budget or a positive Retry-After.
    let exhausted = info.remaining == Some(0);
    let told_to_wait = info.retry_after.is_some_and(|secs| secs > 0);

    if exhausted || told_to_wait {
        ResponseClass::RateLimited(backoff_delay(info, now))
    } else {
        ResponseClass::Failed
    }
}

/// Latest known rate limit budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Maximum requests allowed.
    pub limit: Option<u32>,
    /// Remaining requests in the window; `None` when unknown.
    pub remaining: Option<u32>,
    /// Window reset time.
    pub reset_at: Option<DateTime<Utc>>,
    /// Resource category.
    pub resource: Option<String>,
}

/// Rate limit tracker owned by one client instance.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    state: RwLock<RateLimitState>,
}

impl RateLimitTracker {
    /// Creates a tracker with an unknown budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a response's rate limit info into the tracked state.
    ///
    /// Responses without a `remaining` value leave the state untouched. Within
    /// one reset window `remaining` only decreases.
    pub async fn update(&self, info: &RateLimitInfo) {
        let Some(remaining) = info.remaining else {
            return;
        };

        let mut state = self.state.write().await;
        let same_window = state.reset_at.is_some() && state.reset_at == info.reset_at;
        state.remaining = match (same_window, state.remaining) {
            (true, Some(current)) => Some(current.min(remaining)),
            _ => Some(remaining),
        };
        state.reset_at = info.reset_at;
        if info.limit.is_some() {
            state.limit = info.limit;
        }
        if info.resource.is_some() {
            state.resource = info.resource.clone();
        }

        tracing::trace!(
            remaining = state.remaining,
            reset_at = ?state.reset_at,
            "Rate limit updated"
        );
    }

    /// Returns a copy of the tracked state.
    pub async fn snapshot(&self) -> RateLimitState {
        self.state.read().await.clone()
    }

    /// Time to wait before the next call, if the budget is exhausted.
    pub async fn wait_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        let state = self.state.read().await;
        if state.remaining != Some(0) {
            return None;
        }
        state
            .reset_at
            .filter(|reset| *reset > now)
            .and_then(|reset| (reset - now).to_std().ok())
    }

    /// Waits until the window resets if the budget is exhausted.
    pub async fn wait_if_needed(&self) -> Option<Duration> {
        let wait = self.wait_time(Utc::now()).await?;
        tracing::warn!(
            wait_secs = wait.as_secs(),
            "Rate limit budget exhausted, waiting for reset"
        );
        sleep(wait).await;
        Some(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use test_case::test_case;

    fn info(remaining: Option<u32>, reset_in: Option<i64>, retry_after: Option<u64>) -> RateLimitInfo {
        let now = fixed_now();
        RateLimitInfo {
            limit: Some(5000),
            remaining,
            reset_at: reset_in.map(|s| now + ChronoDuration::seconds(s)),
            retry_after,
            resource: None,
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_extract_rate_limit() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("5000"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000002"));
        headers.insert("x-ratelimit-resource", HeaderValue::from_static("core"));

        let info = extract_rate_limit(&headers);
        assert_eq!(info.limit, Some(5000));
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.reset_at, DateTime::from_timestamp(1_700_000_002, 0));
        assert_eq!(info.retry_after, None);
        assert_eq!(info.resource.as_deref(), Some("core"));
    }

    #[test]
    fn test_malformed_headers_are_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("lots"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("soon"));

        let info = extract_rate_limit(&headers);
        assert_eq!(info.remaining, None);
        assert_eq!(info.reset_at, None);
        assert_eq!(
            classify(StatusCode::FORBIDDEN, &info, fixed_now()),
            ResponseClass::Failed
        );
    }

    #[test_case(Some(2), None, 2 ; "reset in the future")]
    #[test_case(Some(-5), None, 0 ; "reset in the past")]
    #[test_case(Some(2), Some(7), 7 ; "retry after dominates")]
    #[test_case(Some(9), Some(3), 9 ; "reset dominates")]
    #[test_case(None, None, 0 ; "no timing information")]
    fn test_backoff_delay(reset_in: Option<i64>, retry_after: Option<u64>, expected_secs: u64) {
        let info = info(Some(0), reset_in, retry_after);
        assert_eq!(
            backoff_delay(&info, fixed_now()),
            Duration::from_secs(expected_secs)
        );
    }

    #[test_case(200, Some(0), None, ResponseClass::Success ; "success even when exhausted")]
    #[test_case(401, Some(10), None, ResponseClass::Unauthorized ; "unauthorized")]
    #[test_case(403, Some(0), None, ResponseClass::RateLimited(Duration::from_secs(2)) ; "primary limit")]
    #[test_case(403, Some(10), None, ResponseClass::Failed ; "plain forbidden")]
    #[test_case(403, Some(10), Some(1), ResponseClass::RateLimited(Duration::from_secs(2)) ; "secondary limit")]
    #[test_case(429, None, None, ResponseClass::RateLimited(Duration::from_secs(2)) ; "too many requests")]
    #[test_case(403, Some(10), Some(0), ResponseClass::Failed ; "forbidden with zero retry after")]
    #[test_case(429, Some(10), Some(0), ResponseClass::RateLimited(Duration::from_secs(2)) ; "too many requests with zero retry after")]
    #[test_case(503, Some(10), Some(30), ResponseClass::Failed ; "unavailable with retry after")]
    #[test_case(404, Some(10), None, ResponseClass::Failed ; "not found")]
    fn test_classify(status: u16, remaining: Option<u32>, retry_after: Option<u64>, expected: ResponseClass) {
        let info = info(remaining, Some(2), retry_after);
        let status = StatusCode::from_u16(status).unwrap();
        assert_eq!(classify(status, &info, fixed_now()), expected);
    }

    #[test]
    fn test_rate_limited_without_timing_does_not_block() {
        let info = RateLimitInfo {
            limit: None,
            remaining: None,
            reset_at: None,
            retry_after: None,
            resource: None,
        };
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, &info, fixed_now()),
            ResponseClass::RateLimited(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn test_remaining_monotonic_within_window() {
        let tracker = RateLimitTracker::new();

        tracker.update(&info(Some(10), Some(60), None)).await;
        tracker.update(&info(Some(12), Some(60), None)).await;
        assert_eq!(tracker.snapshot().await.remaining, Some(10));

        tracker.update(&info(Some(4999), Some(3600), None)).await;
        assert_eq!(tracker.snapshot().await.remaining, Some(4999));
    }

    #[tokio::test]
    async fn test_missing_remaining_keeps_state() {
        let tracker = RateLimitTracker::new();
        tracker.update(&info(Some(7), Some(60), None)).await;
        tracker.update(&info(None, None, None)).await;

        let state = tracker.snapshot().await;
        assert_eq!(state.remaining, Some(7));
        assert_eq!(state.limit, Some(5000));
    }

    #[tokio::test]
    async fn test_wait_time() {
        let tracker = RateLimitTracker::new();
        assert_eq!(tracker.wait_time(fixed_now()).await, None);

        tracker.update(&info(Some(0), Some(3), None)).await;
        assert_eq!(
            tracker.wait_time(fixed_now()).await,
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            tracker
                .wait_time(fixed_now() + ChronoDuration::seconds(4))
                .await,
            None
        );
    }
}
