//! Port Interfaces
//!
//! The contract the relay uses to open upstream links. The relay depends on
//! this trait only; `StreamConnector` is the production adapter.

use async_trait::async_trait;

use crate::domain::subscription::SubscriptionDescriptor;
use crate::infrastructure::upstream::{ConnectionHandle, UpstreamError};

/// Opens one upstream link per relay session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a link for `descriptor`.
    ///
    /// Resolves once the handshake has been written upstream.
    async fn connect(
        &self,
        descriptor: SubscriptionDescriptor,
    ) -> Result<ConnectionHandle, UpstreamError>;
}
