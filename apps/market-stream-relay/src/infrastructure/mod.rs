//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Provider WebSocket client.
pub mod upstream;

/// Client-facing relay server.
pub mod relay;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
