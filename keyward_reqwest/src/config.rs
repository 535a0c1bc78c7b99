//! Configuration of the request pipeline

use std::time::Duration;

use keyward_clock::DurationSecs;
use keyward_tokens::RetryConfig;
use serde::{Deserialize, Serialize};

/// Default timeout applied to each request, including renewal requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default path of the renewal endpoint
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Configuration of an [`ApiClient`][crate::ApiClient]
///
/// Every field has a default, so a configuration can be deserialized from a
/// partial document. Durations are expressed in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// The URL that request paths are resolved against
    pub base_url: String,

    /// Timeout applied to each request
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// Retry behavior for transient failures
    pub retry: RetrySettings,

    /// How long before access expiry a request should renew first
    pub expiry_threshold_minutes: u64,

    /// How often the background scheduler checks for expiring credentials
    #[serde(with = "duration_ms")]
    pub proactive_interval: Duration,

    /// Path of the renewal endpoint
    pub refresh_path: String,

    /// Paths that never carry credentials and are never renewed for
    pub public_paths: Vec<String>,

    /// Paths that may still be called while withdrawal mode is active
    pub withdrawal_allow_list: Vec<String>,

    /// How the refresh credential is presented to the renewal endpoint
    pub refresh_transport: RefreshTransport,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_owned(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetrySettings::default(),
            expiry_threshold_minutes: 10,
            proactive_interval: keyward_tokens::DEFAULT_PROACTIVE_INTERVAL,
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            public_paths: vec![
                "/auth/login".to_owned(),
                "/auth/register".to_owned(),
                DEFAULT_REFRESH_PATH.to_owned(),
            ],
            withdrawal_allow_list: Vec::new(),
            refresh_transport: RefreshTransport::default(),
        }
    }
}

impl PipelineConfig {
    /// Constructs a default configuration for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// The expiry threshold as a duration
    pub fn expiry_threshold(&self) -> DurationSecs {
        DurationSecs::from_minutes(self.expiry_threshold_minutes)
    }
}

/// Retry settings for transient failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per request, including the first
    pub max_attempts: u32,

    /// Base of the exponential backoff; the first retry waits twice this
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts(),
            base_delay: defaults.base_delay(),
        }
    }
}

impl From<RetrySettings> for RetryConfig {
    fn from(settings: RetrySettings) -> Self {
        RetryConfig::new(settings.max_attempts, settings.base_delay)
    }
}

/// The manner in which the refresh credential is sent to the renewal endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshTransport {
    /// Send the refresh credential in a request header
    Header {
        /// Header name
        name: String,
    },
    /// Send the refresh credential as a cookie
    Cookie {
        /// Cookie name
        name: String,
    },
}

impl Default for RefreshTransport {
    fn default() -> Self {
        Self::Header {
            name: "X-Refresh-Token".to_owned(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.expiry_threshold(), DurationSecs(600));
    }

    #[test]
    fn durations_are_milliseconds() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "base_url": "https://api.example.com/v1",
                "timeout": 5000,
                "retry": { "base_delay": 250 },
                "proactive_interval": 60000
            }"#,
        )
        .unwrap();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.proactive_interval, Duration::from_secs(60));
    }

    #[test]
    fn cookie_transport_is_tagged() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "refresh_transport": { "kind": "cookie", "name": "rt" } }"#,
        )
        .unwrap();

        assert_eq!(
            config.refresh_transport,
            RefreshTransport::Cookie {
                name: "rt".to_owned()
            }
        );
    }
}
