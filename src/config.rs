//! Configuration for the stream processor and the pull requestor.

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = concat!("flagsync/", env!("CARGO_PKG_VERSION"));

/// Endpoints, credentials and timing for one SDK client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Key sent in the `Authorization` header.
    pub sdk_key: String,
    /// Base URI of the streaming service; the stream lives at `/all`.
    pub stream_uri: String,
    /// Base URI of the polling service used for indirect events.
    pub base_uri: String,
    /// Appended after `/all` when opening the stream.
    pub stream_path_suffix: String,
    /// Bounds connection establishment only. An open stream may stay
    /// silent indefinitely.
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    pub user_agent: String,
    /// Transport supplied by the host application (proxy, TLS, ...).
    pub http_client: Option<reqwest::Client>,
}

impl Config {
    pub fn new(
        sdk_key: impl Into<String>,
        stream_uri: impl Into<String>,
        base_uri: impl Into<String>,
    ) -> Self {
        Self {
            sdk_key: sdk_key.into(),
            stream_uri: stream_uri.into(),
            base_uri: base_uri.into(),
            stream_path_suffix: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryConfig::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_client: None,
        }
    }

    pub fn with_stream_path_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.stream_path_suffix = suffix.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Full URL of the event stream.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/all{}",
            self.stream_uri.trim_end_matches('/'),
            self.stream_path_suffix
        )
    }

    pub(crate) fn poll_url(&self, path: &str) -> String {
        format!("{}{}", self.base_uri.trim_end_matches('/'), path)
    }

    pub(crate) fn http_client(&self) -> reqwest::Client {
        self.http_client.clone().unwrap_or_default()
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first reconnect.
    #[serde(rename = "initial_delay_ms", deserialize_with = "millis::deserialize")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(rename = "max_delay_ms", deserialize_with = "millis::deserialize")]
    pub max_delay: Duration,
    /// Fraction of each delay that is randomized away, in `[0, 1]`.
    #[serde(deserialize_with = "ratio::deserialize")]
    pub jitter_ratio: f64,
}

impl RetryConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio::sanitize(ratio);
        self
    }

    /// Un-jittered delay before reconnect number `attempt` (0-indexed):
    /// `initial * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.5,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod ratio {
    use serde::{Deserialize, Deserializer};

    /// Clamps to `[0, 1]`; NaN and infinities turn jitter off.
    pub fn sanitize(ratio: f64) -> f64 {
        if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        f64::deserialize(d).map(sanitize)
    }
}
