//! Application Layer - Port definitions.
//!
//! Contracts between the relay server and the upstream adapters.

/// Port interfaces for upstream connections.
pub mod ports;
