/// Audit logging for operational events.
pub mod audit;
/// Configuration management for the kernel.
pub mod config;
/// HTTP server and control plane.
pub mod server;
/// Telemetry setup for logging, tracing, and metrics.
pub mod telemetry;
