//! Observability: request metrics, tracing hooks and subscriber setup.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::{layer as fmt_layer, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Per-client counters of physical requests and recoveries.
#[derive(Debug, Default)]
pub struct Metrics {
    sent: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rate_limit_waits: AtomicU64,
    token_refreshes: AtomicU64,
    latency_micros: AtomicU64,
}

impl Metrics {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a rate-limit wait, preemptive or after a rejected response.
    pub fn record_rate_limited(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a successful credential refresh.
    pub fn record_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, ok: bool, elapsed: Duration) {
        let outcome = if ok { &self.succeeded } else { &self.failed };
        outcome.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let finished = succeeded + failed;
        let latency = self.latency_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: self.sent.load(Ordering::Relaxed),
            requests_success: succeeded,
            requests_failed: failed,
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
            average_latency_us: if finished == 0 { 0 } else { latency / finished },
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Physical requests sent, retries included.
    pub requests_total: u64,
    /// Requests answered with 2xx.
    pub requests_success: u64,
    /// Requests that failed or needed recovery.
    pub requests_failed: u64,
    /// Rate-limit waits.
    pub rate_limit_waits: u64,
    /// Credential refreshes.
    pub token_refreshes: u64,
    /// Mean latency of finished requests, in microseconds.
    pub average_latency_us: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests ({} ok, {} failed), {} rate-limit waits, {} token refreshes, avg {} ms",
            self.requests_total,
            self.requests_success,
            self.requests_failed,
            self.rate_limit_waits,
            self.token_refreshes,
            self.average_latency_us / 1000
        )
    }
}

/// Times one physical request. Counted as sent on creation.
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    /// Starts timing.
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.sent.fetch_add(1, Ordering::Relaxed);
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Records a 2xx answer.
    pub fn success(self) {
        self.metrics.finish(true, self.start.elapsed());
    }

    /// Records any other outcome.
    pub fn failure(self) {
        self.metrics.finish(false, self.start.elapsed());
    }

    /// Time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Log events of the request executor.
pub struct TracingHooks;

impl TracingHooks {
    /// Before a physical request.
    pub fn on_request_start(method: &str, url: &str) {
        debug!(method, url, "Sending request");
    }

    /// After a response arrives, whatever its status.
    pub fn on_request_complete(method: &str, url: &str, status: u16, duration: Duration) {
        debug!(
            method,
            url,
            status,
            elapsed_ms = duration.as_millis() as u64,
            "Response received"
        );
    }

    /// Connection, timeout or body failure.
    pub fn on_request_error(method: &str, url: &str, error: &str) {
        warn!(method, url, error, "Transport failure");
    }

    /// Before sleeping for the rate-limit window.
    pub fn on_rate_limited(method: &str, url: &str, wait: Duration) {
        warn!(
            method,
            url,
            wait_ms = wait.as_millis() as u64,
            "Rate limit reached, retrying once after the window resets"
        );
    }

    /// After the credential was refreshed following a 401.
    pub fn on_auth_token_refresh() {
        info!("Access token refreshed, retrying once");
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
    /// Single-line output.
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Logger configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Include module targets.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: false,
        }
    }
}

impl LogConfig {
    /// Sets the default level directive.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Installs the global subscriber. Call once at startup.
    ///
    /// `RUST_LOG` overrides the configured level.
    pub fn init(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(self.layer(std::io::stdout))
            .try_init()?;

        Ok(())
    }

    /// Formatting layer for the configured format, writing to `writer`.
    pub fn layer<S, W>(&self, writer: W) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        match self.format {
            LogFormat::Pretty => fmt_layer()
                .pretty()
                .with_target(self.include_target)
                .with_writer(writer)
                .boxed(),
            LogFormat::Json => fmt_layer().json().with_writer(writer).boxed(),
            LogFormat::Compact => fmt_layer()
                .compact()
                .with_target(self.include_target)
                .with_writer(writer)
                .boxed(),
        }
    }
}

/// Sensitive headers that should be redacted in logs.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-github-token",
    "x-access-token",
    "cookie",
    "set-cookie",
];

/// Redacts sensitive values in headers.
pub fn redact_header(name: &str, value: &str) -> String {
    if SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str()) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_timer_counts_outcomes() {
        let metrics = Arc::new(Metrics::new());

        RequestTimer::new(metrics.clone()).failure();
        metrics.record_rate_limited();
        RequestTimer::new(metrics.clone()).success();
        metrics.record_refresh();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_success, 1);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.rate_limit_waits, 1);
        assert_eq!(snapshot.token_refreshes, 1);
    }

    #[test]
    fn test_unfinished_request_has_no_latency() {
        let metrics = Arc::new(Metrics::new());
        let _timer = RequestTimer::new(metrics.clone());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 1);
        assert_eq!(snapshot.average_latency_us, 0);
        assert!(snapshot.to_string().starts_with("1 requests (0 ok, 0 failed)"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn render(format: LogFormat) -> String {
        let captured = Captured::default();
        let config = LogConfig::default().with_format(format);
        let subscriber = tracing_subscriber::registry().with(config.layer(captured.clone()));
        tracing::subscriber::with_default(subscriber, || info!(issues = 3, "Import finished"));

        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_pretty_format_spans_lines() {
        let pretty = render(LogFormat::Pretty);
        let compact = render(LogFormat::Compact);

        assert!(pretty.contains("Import finished"));
        assert!(pretty.lines().filter(|l| !l.trim().is_empty()).count() > 1);
        assert_eq!(compact.lines().count(), 1);
        assert!(compact.contains("Import finished"));
    }

    #[test]
    fn test_json_format() {
        let json = render(LogFormat::Json);
        let event: serde_json::Value = serde_json::from_str(json.trim()).unwrap();
        assert_eq!(event["fields"]["message"], "Import finished");
        assert_eq!(event["fields"]["issues"], 3);
    }

    #[test]
    fn test_redact_header() {
        assert_eq!(redact_header("Authorization", "Bearer token"), "[REDACTED]");
        assert_eq!(redact_header("Content-Type", "application/json"), "application/json");
    }
}
