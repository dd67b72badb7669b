//! Subscription Descriptors
//!
//! Value objects describing what a client wants to receive from a stream
//! kind, and the lenient query-string parsing that produces them.
//!
//! # Design
//!
//! A descriptor is built once per relay session and never mutated. The
//! upstream client serializes it into handshake frames on the first connect
//! and replays those exact frames after every reconnect.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::stream::StreamKind;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building or validating a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// A parameter the stream kind requires was not supplied.
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// A parameter was supplied but could not be decoded.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Decode failure.
        reason: String,
    },

    /// An instrument subscription has an empty code.
    #[error("instrument code cannot be empty")]
    EmptyInstrumentCode,

    /// An instrument subscription has a zero bar interval.
    #[error("bar_interval must be positive for {0}")]
    InvalidBarInterval(String),
}

// =============================================================================
// Instrument Subscriptions (market data)
// =============================================================================

/// Data type requested for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// Bar series (OHLCV).
    Series,
    /// Live quotes.
    Quote,
}

/// One market data subscription tuple.
///
/// Serializes to the provider's wire shape; absent optionals are omitted so
/// the subscribe frame only carries what the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSubscription {
    /// Instrument code, e.g. `AAPL.US`.
    pub code: String,
    /// Series or quote.
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    /// Bar granularity (e.g. `minute`, `day`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_type: Option<String>,
    /// Number of granularity units per bar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_interval: Option<u32>,
    /// Dividend-adjusted bars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dadj: Option<bool>,
    /// Number of historical bars to replay on subscribe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_bars: Option<u32>,
}

impl InstrumentSubscription {
    /// Quote subscription for a code.
    #[must_use]
    pub fn quote(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            kind: InstrumentKind::Quote,
            bar_type: None,
            bar_interval: None,
            dadj: None,
            recent_bars: None,
        }
    }

    /// Bar series subscription for a code.
    #[must_use]
    pub fn series(code: impl Into<String>, bar_type: impl Into<String>, bar_interval: u32) -> Self {
        Self {
            code: code.into(),
            kind: InstrumentKind::Series,
            bar_type: Some(bar_type.into()),
            bar_interval: Some(bar_interval),
            dadj: None,
            recent_bars: None,
        }
    }

    fn validate(&self) -> Result<(), SubscriptionError> {
        if self.code.trim().is_empty() {
            return Err(SubscriptionError::EmptyInstrumentCode);
        }
        if self.bar_interval == Some(0) {
            return Err(SubscriptionError::InvalidBarInterval(self.code.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// News Filter
// =============================================================================

/// Symbol and keyword filters for the news feed. Both lists are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewsFilter {
    /// Ticker symbols to filter on.
    pub symbols: Vec<String>,
    /// Free-text keywords to filter on.
    pub keywords: Vec<String>,
}

// =============================================================================
// Subscription Descriptor
// =============================================================================

/// Caller-supplied parameters identifying what data to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionDescriptor {
    /// News feed filters.
    News(NewsFilter),
    /// Market data subscriptions, in the order the caller gave them.
    MarketData(Vec<InstrumentSubscription>),
}

impl SubscriptionDescriptor {
    /// Build the descriptor for a stream kind from parsed parameters.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` when market data is requested without
    /// `subscriptions`, or any validation error of the result.
    pub fn for_kind(kind: StreamKind, params: StreamParams) -> Result<Self, SubscriptionError> {
        let descriptor = match kind {
            StreamKind::NewsFeed => Self::News(NewsFilter {
                symbols: params.symbols,
                keywords: params.keywords,
            }),
            StreamKind::MarketData => Self::MarketData(
                params
                    .subscriptions
                    .ok_or(SubscriptionError::MissingParameter("subscriptions"))?,
            ),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the descriptor can be turned into a handshake.
    ///
    /// # Errors
    ///
    /// Market data needs at least one subscription, each with a non-empty
    /// code and a positive bar interval when one is given.
    pub fn validate(&self) -> Result<(), SubscriptionError> {
        match self {
            Self::News(_) => Ok(()),
            Self::MarketData(subscriptions) => {
                if subscriptions.is_empty() {
                    return Err(SubscriptionError::MissingParameter("subscriptions"));
                }
                subscriptions
                    .iter()
                    .try_for_each(InstrumentSubscription::validate)
            }
        }
    }

    /// The stream kind this descriptor subscribes to.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::News(_) => StreamKind::NewsFeed,
            Self::MarketData(_) => StreamKind::MarketData,
        }
    }
}

// =============================================================================
// Query Parameters
// =============================================================================

/// Typed view over a relay connection's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamParams {
    /// `symbols` list.
    pub symbols: Vec<String>,
    /// `keywords` list.
    pub keywords: Vec<String>,
    /// `subscriptions` list, if given.
    pub subscriptions: Option<Vec<InstrumentSubscription>>,
}

impl StreamParams {
    /// Parse query parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `subscriptions` is present but is not a
    /// JSON object or array of objects. List parameters never fail.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, SubscriptionError> {
        let symbols = query.get("symbols").map(|v| decode_list(v)).unwrap_or_default();
        let keywords = query
            .get("keywords")
            .map(|v| decode_list(v))
            .unwrap_or_default();
        let subscriptions = query
            .get("subscriptions")
            .map(|v| decode_subscriptions(v))
            .transpose()?;

        Ok(Self {
            symbols,
            keywords,
            subscriptions,
        })
    }
}

/// Decode a JSON-array-encoded list parameter.
///
/// A value that is not a JSON string array becomes a single-element list
/// holding the raw text. Empty entries are dropped.
#[must_use]
pub fn decode_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let values = serde_json::from_str::<Vec<String>>(raw)
        .or_else(|_| serde_json::from_str::<String>(raw).map(|s| vec![s]))
        .unwrap_or_else(|_| vec![raw.to_string()]);

    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<InstrumentSubscription>),
    One(InstrumentSubscription),
}

fn decode_subscriptions(raw: &str) -> Result<Vec<InstrumentSubscription>, SubscriptionError> {
    match serde_json::from_str::<OneOrMany>(raw) {
        Ok(OneOrMany::Many(list)) => Ok(list),
        Ok(OneOrMany::One(single)) => Ok(vec![single]),
        Err(e) => Err(SubscriptionError::InvalidParameter {
            name: "subscriptions",
            reason: e.to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
