//! Relay Session
//!
//! Pairs one client channel with one upstream connection handle.
//! `AwaitingUpstream -> Piping -> Closed`, plus `AwaitingUpstream -> Closed`
//! when the session is rejected. No state is re-entered after `Closed`.

use std::time::Instant;

use uuid::Uuid;

/// State of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Client accepted, upstream handshake pending.
    AwaitingUpstream,
    /// Frames flowing in both directions.
    Piping,
    /// Torn down.
    Closed,
}

/// Invalid session transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Piping can only start while awaiting the upstream.
    #[error("cannot start piping from state {0:?}")]
    InvalidTransition(SessionState),
}

/// One client connection and its lifecycle.
#[derive(Debug)]
pub struct RelaySession {
    id: Uuid,
    tool: String,
    state: SessionState,
    opened_at: Instant,
}

impl RelaySession {
    /// Start a session for the requested tool path.
    #[must_use]
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool: tool.into(),
            state: SessionState::AwaitingUpstream,
            opened_at: Instant::now(),
        }
    }

    /// Session identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Requested tool name.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has ended.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Time since the client connected.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }

    /// The upstream handle resolved.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the session is awaiting upstream.
    pub const fn begin_piping(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::AwaitingUpstream => {
                self.state = SessionState::Piping;
                Ok(())
            }
            other => Err(SessionError::InvalidTransition(other)),
        }
    }

    /// Close the session. Returns `true` if this call closed it.
    pub const fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = SessionState::Closed;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_awaits_upstream() {
        let session = RelaySession::new("connect_news_feed");
        assert_eq!(session.state(), SessionState::AwaitingUpstream);
        assert_eq!(session.tool(), "connect_news_feed");
        assert!(!session.is_closed());
    }

    #[test]
    fn piping_then_closed() {
        let mut session = RelaySession::new("connect_news_feed");
        session.begin_piping().unwrap();
        assert_eq!(session.state(), SessionState::Piping);

        assert!(session.close());
        assert!(session.is_closed());
    }

    #[test]
    fn rejection_closes_directly() {
        let mut session = RelaySession::new("not_a_real_tool");
        assert!(session.close());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn closed_cannot_be_reentered() {
        let mut session = RelaySession::new("connect_news_feed");
        session.close();

        assert_eq!(
            session.begin_piping(),
            Err(SessionError::InvalidTransition(SessionState::Closed))
        );
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn piping_cannot_restart() {
        let mut session = RelaySession::new("connect_news_feed");
        session.begin_piping().unwrap();
        assert!(session.begin_piping().is_err());
    }

    #[test]
    fn ids_are_unique() {
        let a = RelaySession::new("connect_news_feed");
        let b = RelaySession::new("connect_news_feed");
        assert_ne!(a.id(), b.id());
    }
}
