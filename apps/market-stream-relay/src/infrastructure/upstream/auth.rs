//! Upstream Authentication and Handshake
//!
//! Both stream kinds use an authenticate-then-subscribe handshake over the
//! socket. The handshake is fire-and-forget: frames are written and the link
//! is considered open without waiting for a provider acknowledgment.
//!
//! # Handshake Frames
//!
//! ## News Feed
//! 1. `{"api_key":"..."}`
//! 2. `{"type":"filter_symbols","symbols":[...]}` (only with symbols)
//! 3. `{"type":"filter_keywords","keywords":[...]}` (only with keywords)
//!
//! ## Market Data
//! 1. `{"type":"auth","api_key":"..."}`
//! 2. `{"api_key":"...","subscriptions":[{"code":...,"type":...}, ...]}`

use serde::Serialize;
use thiserror::Error;

use crate::domain::subscription::{InstrumentSubscription, SubscriptionDescriptor};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while preparing authentication.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The API key was empty.
    #[error("API key cannot be empty")]
    EmptyApiKey,

    /// A handshake frame could not be serialized.
    #[error("failed to serialize handshake frame: {0}")]
    Serialization(String),
}

// =============================================================================
// Credentials
// =============================================================================

/// Provider API credentials.
///
/// The `Debug` and `Display` implementations redact the key for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::EmptyApiKey` if the key is empty or blank.
    pub fn new(api_key: impl Into<String>) -> Result<Self, AuthError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AuthError::EmptyApiKey);
        }
        Ok(Self { api_key })
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials(api_key=[REDACTED])")
    }
}

// =============================================================================
// Wire Frames
// =============================================================================

#[derive(Serialize)]
struct NewsAuthFrame<'a> {
    api_key: &'a str,
}

#[derive(Serialize)]
struct FilterSymbolsFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    symbols: &'a [String],
}

#[derive(Serialize)]
struct FilterKeywordsFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    keywords: &'a [String],
}

#[derive(Serialize)]
struct MarketAuthFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    api_key: &'a str,
}

#[derive(Serialize)]
struct MarketSubscribeFrame<'a> {
    api_key: &'a str,
    subscriptions: &'a [InstrumentSubscription],
}

// =============================================================================
// Handshake
// =============================================================================

/// The ordered text frames written on every (re)connect.
///
/// Serialized once from the descriptor, so every replay is byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    frames: Vec<String>,
}

impl Handshake {
    /// Build the handshake for a descriptor.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Serialization` if a frame cannot be encoded.
    pub fn for_descriptor(
        descriptor: &SubscriptionDescriptor,
        credentials: &Credentials,
    ) -> Result<Self, AuthError> {
        let api_key = credentials.api_key();
        let mut frames = Vec::with_capacity(3);

        match descriptor {
            SubscriptionDescriptor::News(filter) => {
                frames.push(encode(&NewsAuthFrame { api_key })?);
                if !filter.symbols.is_empty() {
                    frames.push(encode(&FilterSymbolsFrame {
                        frame_type: "filter_symbols",
                        symbols: &filter.symbols,
                    })?);
                }
                if !filter.keywords.is_empty() {
                    frames.push(encode(&FilterKeywordsFrame {
                        frame_type: "filter_keywords",
                        keywords: &filter.keywords,
                    })?);
                }
            }
            SubscriptionDescriptor::MarketData(subscriptions) => {
                frames.push(encode(&MarketAuthFrame {
                    frame_type: "auth",
                    api_key,
                })?);
                frames.push(encode(&MarketSubscribeFrame {
                    api_key,
                    subscriptions,
                })?);
            }
        }

        Ok(Self { frames })
    }

    /// Frames in send order.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }
}

fn encode<T: Serialize>(frame: &T) -> Result<String, AuthError> {
    serde_json::to_string(frame).map_err(|e| AuthError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::NewsFilter;

    fn creds() -> Credentials {
        Credentials::new("test-key").unwrap()
    }

    #[test]
    fn credentials_reject_empty_key() {
        assert!(matches!(Credentials::new(""), Err(AuthError::EmptyApiKey)));
        assert!(matches!(Credentials::new("   "), Err(AuthError::EmptyApiKey)));
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let creds = Credentials::new("super_secret").unwrap();
        let debug = format!("{creds:?}");
        let display = creds.to_string();
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super_secret"));
        assert!(!display.contains("super_secret"));
    }

    #[test]
    fn news_handshake_auth_only() {
        let handshake =
            Handshake::for_descriptor(&SubscriptionDescriptor::News(NewsFilter::default()), &creds())
                .unwrap();
        assert_eq!(handshake.frames(), [r#"{"api_key":"test-key"}"#]);
    }

    #[test]
    fn news_handshake_with_filters() {
        let descriptor = SubscriptionDescriptor::News(NewsFilter {
            symbols: vec!["AAPL".to_string()],
            keywords: vec!["earnings".to_string(), "merger".to_string()],
        });
        let handshake = Handshake::for_descriptor(&descriptor, &creds()).unwrap();

        assert_eq!(
            handshake.frames(),
            [
                r#"{"api_key":"test-key"}"#,
                r#"{"type":"filter_symbols","symbols":["AAPL"]}"#,
                r#"{"type":"filter_keywords","keywords":["earnings","merger"]}"#,
            ]
        );
    }

    #[test]
    fn market_data_handshake() {
        let descriptor = SubscriptionDescriptor::MarketData(vec![
            InstrumentSubscription::quote("AAPL.US"),
            InstrumentSubscription::series("MSFT.US", "minute", 1),
        ]);
        let handshake = Handshake::for_descriptor(&descriptor, &creds()).unwrap();

        assert_eq!(
            handshake.frames(),
            [
                r#"{"type":"auth","api_key":"test-key"}"#,
                r#"{"api_key":"test-key","subscriptions":[{"code":"AAPL.US","type":"quote"},{"code":"MSFT.US","type":"series","bar_type":"minute","bar_interval":1}]}"#,
            ]
        );
    }

    #[test]
    fn handshake_is_deterministic() {
        let descriptor = SubscriptionDescriptor::MarketData(vec![
            InstrumentSubscription::quote("AAPL.US"),
            InstrumentSubscription::quote("TSLA.US"),
        ]);
        let first = Handshake::for_descriptor(&descriptor, &creds()).unwrap();
        let second = Handshake::for_descriptor(&descriptor, &creds()).unwrap();
        assert_eq!(first, second);
    }
}
