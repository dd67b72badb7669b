//! Stream Kind Registry
//!
//! The fixed set of upstream stream kinds a client can request. The relay
//! path segment is the tool name, e.g. `/connect_news_feed`.

use std::fmt;
use std::time::Duration;

/// A supported upstream subscription type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Live news articles, optionally filtered by symbols and keywords.
    NewsFeed,
    /// Live quotes and bars for a list of instruments.
    MarketData,
}

impl StreamKind {
    /// Every registered stream kind.
    pub const ALL: [Self; 2] = [Self::NewsFeed, Self::MarketData];

    /// Resolve a relay path segment to a stream kind.
    #[must_use]
    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tool_name() == name)
    }

    /// The tool name clients use as the relay path.
    #[must_use]
    pub const fn tool_name(self) -> &'static str {
        match self {
            Self::NewsFeed => "connect_news_feed",
            Self::MarketData => "connect_market_data",
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewsFeed => "news",
            Self::MarketData => "market_data",
        }
    }

    /// How often the upstream silence gap is checked.
    #[must_use]
    pub const fn default_gap_check_interval(self) -> Duration {
        match self {
            Self::NewsFeed => Duration::from_secs(5),
            Self::MarketData => Duration::from_secs(2),
        }
    }

    /// Silence longer than this logs a gap warning.
    ///
    /// News arrives far less often than quotes, so its threshold is wider.
    #[must_use]
    pub const fn default_gap_threshold(self) -> Duration {
        match self {
            Self::NewsFeed => Duration::from_secs(30),
            Self::MarketData => Duration::from_secs(15),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
