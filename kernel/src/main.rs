//! Relay gateway and mesh node binary.

use relay_kernel::cluster::mesh::{Mesh, MeshOptions, MeshOverrides};
use relay_kernel::cluster::GATE;
use relay_kernel::component::Component;
use relay_kernel::crypto::CipherRegistry;
use relay_kernel::encoding::CodecRegistry;
use relay_kernel::infrastructure::{audit, config::Settings, server, telemetry::TelemetryBuilder};
use relay_kernel::locate::MemoryLocator;
use relay_kernel::registry::{MemoryRegistry, Registry, ServiceInstance};
use relay_kernel::session::SessionHub;
use relay_kernel::transport::{Endpoint, Transporter};
use relay_kernel::ws::{Gateway, InboundHandler, LoggingHandler, NodeForwarder};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::new()?;

    TelemetryBuilder::from_settings(&config.telemetry, env!("CARGO_PKG_VERSION")).init()?;

    let metrics = match server::install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {e}");
            None
        }
    };

    info!("Relay Kernel Starting...");
    audit::log_audit(&audit::AuditEvent::SystemStartup {
        component: "Kernel".into(),
    });

    let registry = Arc::new(MemoryRegistry::new());
    let locator = Arc::new(MemoryLocator::new());
    let transporter = Arc::new(
        Transporter::new(config.transport.to_options(&config.gateway.id)?).with_discovery(registry.clone().as_discovery()),
    );

    // Gate role
    let hub = Arc::new(SessionHub::new());
    let gate_server = transporter.new_gate_server(hub.clone())?;
    let gate_addr = gate_server.start().await?;
    let gate_instance = ServiceInstance {
        id: config.gateway.id.clone(),
        name: GATE.to_string(),
        kind: GATE.to_string(),
        alias: config.gateway.id.clone(),
        address: gate_addr.to_string(),
    };
    registry.register(&gate_instance).await?;
    info!(id = %gate_instance.id, addr = %gate_addr, "Gate RPC server listening");

    let handler: Arc<dyn InboundHandler> = match config.gateway.node.as_deref() {
        Some(target) => {
            let target: Endpoint = target.parse()?;
            info!(%target, "Forwarding client traffic to node");
            Arc::new(NodeForwarder::new(config.gateway.id.clone(), target, transporter.clone()))
        }
        None => Arc::new(LoggingHandler),
    };

    // Mesh role
    let mesh_options = MeshOptions::resolve(
        &config.mesh,
        MeshOverrides::new()
            .with_registry(registry.clone())
            .with_locator(locator)
            .with_transporter(transporter.clone()),
        &CodecRegistry::new(),
        &CipherRegistry::new(),
    )?;
    let mesh = Mesh::new(mesh_options);
    mesh.init().await?;
    mesh.start().await?;

    let gateway = Arc::new(
        Gateway::new(hub, handler, config.server.addr()?).with_queue_capacity(config.gateway.queue_capacity),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_config = config.clone();
    let control_plane = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = server::run_server(&server_config, gateway, metrics, shutdown).await {
            error!("Control Plane failed: {:?}", e);
        }
    });

    info!("Relay Kernel Initialized. Waiting for shutdown signal...");

    shutdown_signal().await;

    info!("Shutdown signal received, cleaning up...");
    audit::log_audit(&audit::AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });

    let _ = shutdown_tx.send(());
    if let Err(e) = control_plane.await {
        error!("Control Plane task failed: {:?}", e);
    }
    if let Err(e) = mesh.destroy().await {
        error!("Mesh shutdown failed: {:?}", e);
    }
    if let Err(e) = registry.deregister(&gate_instance).await {
        warn!("Gate deregistration failed: {e}");
    }
    gate_server.stop().await?;

    info!("Relay Kernel Shutdown Complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
