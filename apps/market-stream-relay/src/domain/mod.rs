//! Domain Layer - Core relay types and state machines.
//!
//! This layer contains the stream registry, subscription descriptors and
//! the lifecycle state machines for upstream links and relay sessions.
//! Nothing here performs I/O.

/// Stream kind registry (news feed, market data).
pub mod stream;

/// Subscription descriptors and query parameter parsing.
pub mod subscription;

/// Upstream connection lifecycle state machine.
pub mod connection;

/// Relay session state machine.
pub mod session;
