//! Relay Kernel - session fan-out and cluster RPC for realtime servers.
//!
//! This crate provides the per-connection [`session::Session`] registry with
//! dynamic [`session::Group`] membership, the WebSocket gateway that feeds
//! it, and the [`transport::Transporter`] that builds gate, node and
//! service RPC clients and servers resolved through service discovery.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Cluster node kinds.
pub mod cluster;
/// Component lifecycle hooks.
pub mod component;
/// Payload encryption.
pub mod crypto;
/// Message codecs.
pub mod encoding;
/// Infrastructure components (audit, config, server, telemetry).
pub mod infrastructure;
/// User to gateway location.
pub mod locate;
/// Connection abstraction sessions are built on.
pub mod network;
/// Service registration and discovery.
pub mod registry;
/// Sessions, groups and the session hub.
pub mod session;
/// Cluster RPC transport.
pub mod transport;
/// WebSocket gateway.
pub mod ws;
