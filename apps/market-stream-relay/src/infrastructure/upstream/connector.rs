//! Production connector: one [`UpstreamClient`] per stream kind sharing the
//! provider credentials.

use async_trait::async_trait;

use super::auth::Credentials;
use super::client::{ConnectionHandle, UpstreamClient, UpstreamClientConfig, UpstreamError};
use crate::application::ports::UpstreamConnector;
use crate::domain::stream::StreamKind;
use crate::domain::subscription::SubscriptionDescriptor;
use crate::infrastructure::config::RelayConfig;

/// Opens provider links for relay sessions.
#[derive(Debug, Clone)]
pub struct StreamConnector {
    credentials: Credentials,
    news: UpstreamClient,
    market_data: UpstreamClient,
}

impl StreamConnector {
    /// Create a connector from per-kind client configurations.
    #[must_use]
    pub const fn new(
        credentials: Credentials,
        news: UpstreamClientConfig,
        market_data: UpstreamClientConfig,
    ) -> Self {
        Self {
            credentials,
            news: UpstreamClient::new(news),
            market_data: UpstreamClient::new(market_data),
        }
    }

    /// Create a connector from the relay configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        let client_config = |kind| {
            UpstreamClientConfig::from_websocket_settings(
                kind,
                config.provider.stream_url(kind),
                &config.websocket,
            )
        };
        Self::new(
            config.credentials.clone(),
            client_config(StreamKind::NewsFeed),
            client_config(StreamKind::MarketData),
        )
    }

    /// Client serving a stream kind.
    #[must_use]
    pub const fn client(&self, kind: StreamKind) -> &UpstreamClient {
        match kind {
            StreamKind::NewsFeed => &self.news,
            StreamKind::MarketData => &self.market_data,
        }
    }
}

#[async_trait]
impl UpstreamConnector for StreamConnector {
    async fn connect(
        &self,
        descriptor: SubscriptionDescriptor,
    ) -> Result<ConnectionHandle, UpstreamError> {
        self.client(descriptor.kind())
            .connect(descriptor, &self.credentials)
            .await
    }
}
