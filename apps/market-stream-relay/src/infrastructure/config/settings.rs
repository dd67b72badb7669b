//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! [`RelayConfig::from_lookup`] accepts any key lookup so tests can build a
//! configuration without touching the process environment.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::stream::StreamKind;
use crate::infrastructure::upstream::auth::Credentials;

/// Provider endpoint settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// REST base URL. Informational only.
    pub base_url: Option<String>,
    /// Streaming base URL.
    pub ws_url: String,
    /// News feed stream URL.
    pub news_stream_url: String,
    /// Market data stream URL.
    pub quotes_stream_url: String,
}

impl ProviderSettings {
    /// Build settings with the default stream paths under `ws_url`.
    #[must_use]
    pub fn with_default_paths(ws_url: impl Into<String>) -> Self {
        let ws_url = ws_url.into();
        let root = ws_url.trim_end_matches('/');
        Self {
            base_url: None,
            news_stream_url: format!("{root}/news"),
            quotes_stream_url: format!("{root}/quotes"),
            ws_url,
        }
    }

    /// Stream URL for a kind.
    #[must_use]
    pub fn stream_url(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::NewsFeed => &self.news_stream_url,
            StreamKind::MarketData => &self.quotes_stream_url,
        }
    }
}

/// Upstream WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Interval between application-level `ping` frames.
    pub ping_interval: Duration,
    /// Messages older than this are dropped.
    pub staleness_threshold: Duration,
    /// Bound on the first handshake (`None` = wait indefinitely).
    pub handshake_timeout: Option<Duration>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            staleness_threshold: Duration::from_secs(10),
            handshake_timeout: None,
            reconnect_delay_initial: Duration::from_secs(2),
            reconnect_delay_max: Duration::from_secs(10),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Relay server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Close the client when the upstream transport closes.
    pub mirror_upstream_close: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mirror_upstream_close: true,
        }
    }
}

impl RelaySettings {
    /// `host:port` listen address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Provider API credentials.
    pub credentials: Credentials,
    /// Provider endpoints.
    pub provider: ProviderSettings,
    /// Relay server settings.
    pub relay: RelaySettings,
    /// Upstream connection settings.
    pub websocket: WebSocketSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty, or if a
    /// set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let api_key = env.required("MARKET_DATA_API_KEY")?;
        let credentials = Credentials::new(api_key)
            .map_err(|_| ConfigError::EmptyValue("MARKET_DATA_API_KEY".to_string()))?;

        let ws_url = env.required("MARKET_DATA_WS_URL")?;
        let defaults = ProviderSettings::with_default_paths(ws_url);
        let provider = ProviderSettings {
            base_url: env.optional("MARKET_DATA_BASE_URL"),
            news_stream_url: env
                .optional("MARKET_DATA_NEWS_STREAM_URL")
                .unwrap_or(defaults.news_stream_url),
            quotes_stream_url: env
                .optional("MARKET_DATA_QUOTES_STREAM_URL")
                .unwrap_or(defaults.quotes_stream_url),
            ws_url: defaults.ws_url,
        };

        let relay_defaults = RelaySettings::default();
        let relay = RelaySettings {
            host: env.optional("RELAY_HOST").unwrap_or(relay_defaults.host),
            port: env.parse_or("RELAY_PORT", relay_defaults.port)?,
            mirror_upstream_close: env
                .bool_or("RELAY_MIRROR_UPSTREAM_CLOSE", relay_defaults.mirror_upstream_close)?,
        };

        let ws_defaults = WebSocketSettings::default();
        let handshake_secs: u64 = env.parse_or("RELAY_HANDSHAKE_TIMEOUT_SECS", 0)?;
        let websocket = WebSocketSettings {
            ping_interval: env
                .duration_secs_or("RELAY_PING_INTERVAL_SECS", ws_defaults.ping_interval)?,
            staleness_threshold: env.duration_secs_or(
                "RELAY_STALENESS_THRESHOLD_SECS",
                ws_defaults.staleness_threshold,
            )?,
            handshake_timeout: (handshake_secs > 0).then(|| Duration::from_secs(handshake_secs)),
            reconnect_delay_initial: env.duration_millis_or(
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.duration_millis_or(
                "RELAY_RECONNECT_DELAY_MAX_MS",
                ws_defaults.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: env.parse_or(
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                ws_defaults.reconnect_delay_multiplier,
            )?,
            max_reconnect_attempts: env
                .parse_or("RELAY_MAX_RECONNECT_ATTEMPTS", ws_defaults.max_reconnect_attempts)?,
        };

        websocket.validate()?;

        Ok(Self {
            credentials,
            provider,
            relay,
            websocket,
        })
    }
}

impl WebSocketSettings {
    /// Reject timings that would spin the dial loop or break the backoff.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.ping_interval.is_zero() {
            return invalid("RELAY_PING_INTERVAL_SECS", "must be greater than zero");
        }
        if self.reconnect_delay_initial.is_zero() {
            return invalid("RELAY_RECONNECT_DELAY_INITIAL_MS", "must be greater than zero");
        }
        if self.reconnect_delay_max < self.reconnect_delay_initial {
            return invalid(
                "RELAY_RECONNECT_DELAY_MAX_MS",
                "must not be below RELAY_RECONNECT_DELAY_INITIAL_MS",
            );
        }
        if !self.reconnect_delay_multiplier.is_finite() || self.reconnect_delay_multiplier < 1.0 {
            return invalid(
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                "must be a finite number of at least 1",
            );
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.lookup)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value.to_string())
    }

    /// Set and non-blank value.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.optional(key).map_or(Ok(default), |value| {
            value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("{value:?}: {e}"),
            })
        })
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.optional(key) else {
            return Ok(default);
        };
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("{value:?} is not a boolean"),
            }),
        }
    }

    fn duration_secs_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse_or(key, default.as_secs()).map(Duration::from_secs)
    }

    fn duration_millis_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse_or(key, default_ms).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("MARKET_DATA_API_KEY", "key123"),
        ("MARKET_DATA_WS_URL", "wss://stream.example.com/"),
    ];

    #[test]
    fn defaults_with_required_keys_only() {
        let config = RelayConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.credentials.api_key(), "key123");
        assert_eq!(config.provider.news_stream_url, "wss://stream.example.com/news");
        assert_eq!(
            config.provider.quotes_stream_url,
            "wss://stream.example.com/quotes"
        );
        assert!(config.provider.base_url.is_none());
        assert_eq!(config.relay, RelaySettings::default());
        assert_eq!(config.relay.bind_addr(), "0.0.0.0:8080");

        let ws = &config.websocket;
        assert_eq!(ws.reconnect_delay_initial, Duration::from_secs(2));
        assert_eq!(ws.reconnect_delay_max, Duration::from_secs(10));
        assert_eq!(ws.ping_interval, Duration::from_secs(15));
        assert_eq!(ws.staleness_threshold, Duration::from_secs(10));
        assert_eq!(ws.max_reconnect_attempts, 0);
        assert!(ws.handshake_timeout.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("MARKET_DATA_NEWS_STREAM_URL", "wss://news.example.com/v1"),
            ("MARKET_DATA_BASE_URL", "https://api.example.com"),
            ("RELAY_PORT", "9001"),
            ("RELAY_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("RELAY_MAX_RECONNECT_ATTEMPTS", "5"),
            ("RELAY_HANDSHAKE_TIMEOUT_SECS", "3"),
            ("RELAY_MIRROR_UPSTREAM_CLOSE", "false"),
        ]);
        let config = RelayConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.provider.stream_url(StreamKind::NewsFeed), "wss://news.example.com/v1");
        assert_eq!(
            config.provider.stream_url(StreamKind::MarketData),
            "wss://stream.example.com/quotes"
        );
        assert_eq!(config.provider.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.relay.port, 9001);
        assert!(!config.relay.mirror_upstream_close);
        assert_eq!(config.websocket.reconnect_delay_initial, Duration::from_millis(250));
        assert_eq!(config.websocket.max_reconnect_attempts, 5);
        assert_eq!(config.websocket.handshake_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn missing_api_key() {
        let err = RelayConfig::from_lookup(lookup(&[("MARKET_DATA_WS_URL", "wss://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "MARKET_DATA_API_KEY"));
    }

    #[test]
    fn empty_api_key() {
        let err = RelayConfig::from_lookup(lookup(&[
            ("MARKET_DATA_API_KEY", "  "),
            ("MARKET_DATA_WS_URL", "wss://x"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "MARKET_DATA_API_KEY"));
    }

    #[test]
    fn unparseable_number_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_PORT", "eighty"));
        let err = RelayConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "RELAY_PORT"));
    }

    #[test]
    fn unparseable_bool_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_MIRROR_UPSTREAM_CLOSE", "maybe"));
        assert!(RelayConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn zero_ping_interval_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELAY_PING_INTERVAL_SECS", "0"));
        assert!(RelayConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test_case(&[("RELAY_RECONNECT_DELAY_INITIAL_MS", "0")], "RELAY_RECONNECT_DELAY_INITIAL_MS" ; "zero initial delay")]
    #[test_case(&[("RELAY_RECONNECT_DELAY_INITIAL_MS", "0"), ("RELAY_RECONNECT_DELAY_MAX_MS", "0")], "RELAY_RECONNECT_DELAY_INITIAL_MS" ; "zero initial and ceiling")]
    #[test_case(&[("RELAY_RECONNECT_DELAY_INITIAL_MS", "5000"), ("RELAY_RECONNECT_DELAY_MAX_MS", "1000")], "RELAY_RECONNECT_DELAY_MAX_MS" ; "ceiling below initial")]
    #[test_case(&[("RELAY_RECONNECT_DELAY_MULTIPLIER", "0.5")], "RELAY_RECONNECT_DELAY_MULTIPLIER" ; "shrinking multiplier")]
    #[test_case(&[("RELAY_RECONNECT_DELAY_MULTIPLIER", "NaN")], "RELAY_RECONNECT_DELAY_MULTIPLIER" ; "nan multiplier")]
    fn broken_backoff_is_rejected(extra: &[(&str, &str)], expected_key: &str) {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(extra);
        let err = RelayConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(
            matches!(&err, ConfigError::InvalidValue { key, .. } if key == expected_key),
            "{err}"
        );
    }

    #[test]
    fn equal_initial_and_ceiling_is_accepted() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("RELAY_RECONNECT_DELAY_INITIAL_MS", "1000"),
            ("RELAY_RECONNECT_DELAY_MAX_MS", "1000"),
            ("RELAY_RECONNECT_DELAY_MULTIPLIER", "1"),
        ]);
        assert!(RelayConfig::from_lookup(lookup(&pairs)).is_ok());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = RelayConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("key123"));
    }
}
