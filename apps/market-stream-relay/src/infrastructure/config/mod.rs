//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{ConfigError, ProviderSettings, RelayConfig, RelaySettings, WebSocketSettings};
