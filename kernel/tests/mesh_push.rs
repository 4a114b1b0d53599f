//! Integration tests: mesh_push.
mod common;

use common::session;
use config::Config;
use relay_kernel::cluster::mesh::{Mesh, MeshError, MeshOptions, MeshOverrides};
use relay_kernel::cluster::GATE;
use relay_kernel::component::Component;
use relay_kernel::crypto::CipherRegistry;
use relay_kernel::encoding::CodecRegistry;
use relay_kernel::infrastructure::config::{ConfigError, Settings};
use relay_kernel::locate::{Locator, MemoryLocator};
use relay_kernel::registry::{Discovery, MemoryRegistry, Registry, ServiceInstance};
use async_trait::async_trait;
use bytes::Bytes;
use relay_kernel::session::{BroadcastReport, Kind, SessionHub};
use relay_kernel::transport::{GateProvider, TransportError, TransportOptions, Transporter};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::Status;

fn settings(overrides: &[(&str, &str)]) -> Settings {
    let mut builder = Config::builder();
    for (key, value) in overrides {
        builder = builder.set_override(*key, *value).unwrap();
    }
    Settings::from_builder(builder).unwrap()
}

fn resolve(settings: &Settings, overrides: MeshOverrides) -> Result<MeshOptions, ConfigError> {
    MeshOptions::resolve(&settings.mesh, overrides, &CodecRegistry::new(), &CipherRegistry::new())
}

#[test]
fn timeout_precedence_default_config_explicit() {
    let none = settings(&[]);
    assert_eq!(resolve(&none, MeshOverrides::new()).unwrap().timeout, Duration::from_secs(3));

    let configured = settings(&[("mesh.timeout", "5")]);
    assert_eq!(resolve(&configured, MeshOverrides::new()).unwrap().timeout, Duration::from_secs(5));

    let explicit = MeshOverrides::new().with_timeout(Duration::from_secs(10));
    assert_eq!(resolve(&configured, explicit).unwrap().timeout, Duration::from_secs(10));
}

#[test]
fn empty_config_values_fall_back_to_defaults() {
    let blank = settings(&[("mesh.name", ""), ("mesh.codec", "")]);
    let options = resolve(&blank, MeshOverrides::new()).unwrap();
    assert_eq!(options.name, "mesh");
    assert_eq!(options.codec.name(), "proto");
}

#[test]
fn unknown_configured_codec_is_rejected() {
    let bad = settings(&[("mesh.codec", "yaml")]);
    assert!(matches!(
        resolve(&bad, MeshOverrides::new()),
        Err(ConfigError::UnknownCodec(name)) if name == "yaml"
    ));
}

#[tokio::test]
async fn push_reaches_the_user_through_its_gate() {
    let registry = Arc::new(MemoryRegistry::new());
    let locator = Arc::new(MemoryLocator::new());
    let transporter = Arc::new(Transporter::new(TransportOptions::default()));

    let hub = Arc::new(SessionHub::new());
    let (user, conn) = session(42);
    hub.insert(user).unwrap();
    hub.bind(42, 7).unwrap();

    let gate = transporter.new_gate_server(hub).unwrap();
    let gate_addr = gate.start().await.unwrap();
    registry
        .register(&ServiceInstance {
            id: "gate-1".to_string(),
            name: GATE.to_string(),
            kind: GATE.to_string(),
            alias: String::new(),
            address: gate_addr.to_string(),
        })
        .await
        .unwrap();
    locator.bind_gate(7, "gate-1").await.unwrap();

    let config = settings(&[
        ("mesh.name", "lobby"),
        ("mesh.codec", "json"),
        ("mesh.encryptor", "chacha20"),
        ("mesh.decryptor", "chacha20"),
        ("mesh.cipher_key", "correct horse battery staple"),
    ]);
    let options = resolve(
        &config,
        MeshOverrides::new()
            .with_registry(registry.clone())
            .with_locator(locator.clone())
            .with_transporter(transporter.clone()),
    )
    .unwrap();
    let mesh = Mesh::new(options);
    mesh.init().await.unwrap();
    mesh.start().await.unwrap();
    assert_eq!(registry.services("lobby").await.unwrap().len(), 1);

    mesh.push(7, 3, b"level up").await.unwrap();

    let frames = conn.frames();
    assert_eq!(frames.len(), 1);
    assert!(!frames[0].windows(8).any(|w| w == b"level up"));
    let message = mesh.decode(&frames[0]).unwrap();
    assert_eq!(message.route, 3);
    assert_eq!(message.buffer, b"level up");

    locator.unbind_gate(7, "gate-1").await.unwrap();
    assert!(matches!(mesh.push(7, 3, b"gone").await, Err(MeshError::NotLocated(7))));

    mesh.destroy().await.unwrap();
    assert!(registry.services("lobby").await.unwrap().is_empty());
    gate.stop().await.unwrap();
}

/// Gate whose push never completes within any test timeout.
struct StalledGate(Arc<SessionHub>);

#[async_trait]
impl GateProvider for StalledGate {
    async fn bind(&self, cid: i64, uid: i64) -> Result<(), Status> {
        GateProvider::bind(self.0.as_ref(), cid, uid).await
    }

    async fn unbind(&self, uid: i64) -> Result<(), Status> {
        GateProvider::unbind(self.0.as_ref(), uid).await
    }

    async fn get_ip(&self, kind: Kind, target: i64) -> Result<IpAddr, Status> {
        GateProvider::get_ip(self.0.as_ref(), kind, target).await
    }

    async fn push(&self, _kind: Kind, _target: i64, _message: Bytes) -> Result<(), Status> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn multicast(&self, kind: Kind, targets: Vec<i64>, message: Bytes) -> Result<BroadcastReport, Status> {
        GateProvider::multicast(self.0.as_ref(), kind, targets, message).await
    }

    async fn broadcast(&self, kind: Kind, message: Bytes) -> Result<BroadcastReport, Status> {
        GateProvider::broadcast(self.0.as_ref(), kind, message).await
    }

    async fn stat(&self, kind: Kind) -> Result<usize, Status> {
        GateProvider::stat(self.0.as_ref(), kind).await
    }

    async fn disconnect(&self, kind: Kind, target: i64, force: bool) -> Result<(), Status> {
        GateProvider::disconnect(self.0.as_ref(), kind, target, force).await
    }
}

#[tokio::test]
async fn push_is_bounded_by_the_mesh_timeout() {
    let registry = Arc::new(MemoryRegistry::new());
    let locator = Arc::new(MemoryLocator::new());
    // Client default is 3s; the mesh asks for far less.
    let transporter = Arc::new(Transporter::new(TransportOptions::default()));

    let gate = transporter
        .new_gate_server(Arc::new(StalledGate(Arc::new(SessionHub::new()))))
        .unwrap();
    let gate_addr = gate.start().await.unwrap();
    registry
        .register(&ServiceInstance {
            id: "gate-slow".to_string(),
            name: GATE.to_string(),
            kind: GATE.to_string(),
            alias: String::new(),
            address: gate_addr.to_string(),
        })
        .await
        .unwrap();
    locator.bind_gate(9, "gate-slow").await.unwrap();

    let mesh_timeout = Duration::from_millis(150);
    let options = resolve(
        &settings(&[("mesh.timeout", "5")]),
        MeshOverrides::new()
            .with_timeout(mesh_timeout)
            .with_registry(registry)
            .with_locator(locator)
            .with_transporter(transporter),
    )
    .unwrap();
    let mesh = Mesh::new(options);

    let started = Instant::now();
    let result = mesh.push(9, 1, b"late").await;
    assert!(matches!(
        result,
        Err(MeshError::Transport(TransportError::Timeout(limit))) if limit == mesh_timeout
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
}
