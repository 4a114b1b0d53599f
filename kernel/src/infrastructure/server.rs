use crate::infrastructure::config::Settings;
use crate::ws::{Gateway, ws_router};
use axum::{Json, Router, extract::State, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::session::Kind;

async fn health_check() -> &'static str {
    "OK"
}

async fn readiness(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    let hub = gateway.hub();
    Json(json!({
        "status": "ready",
        "connections": hub.stat(Kind::Conn),
        "users": hub.stat(Kind::User),
    }))
}

/// Installs the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

/// Control-plane routes: health, readiness, metrics and the `/ws` gateway.
pub fn control_router(gateway: Arc<Gateway>, metrics: Option<PrometheusHandle>) -> Router {
    let mut control_plane = Router::new()
        .route("/health/live", get(health_check))
        .route("/health/ready", get(readiness))
        .with_state(gateway.clone());

    if let Some(handle) = metrics {
        control_plane = control_plane.route("/metrics", get(move || std::future::ready(handle.render())));
    }

    control_plane.merge(ws_router(gateway))
}

/// Serves `app` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Runs the control plane HTTP server with WebSocket support.
///
/// # Errors
///
/// Returns an error if the server fails to start or encounters an error while running.
pub async fn run_server<F>(
    config: &Settings,
    gateway: Arc<Gateway>,
    metrics: Option<PrometheusHandle>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.server.addr()?;

    tracing::info!("Control Plane listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    serve(listener, control_router(gateway, metrics), shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHub;
    use crate::ws::LoggingHandler;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn health_and_readiness_respond() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gateway = Arc::new(Gateway::new(Arc::new(SessionHub::new()), Arc::new(LoggingHandler), addr));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, control_router(gateway, None), async {
            let _ = rx.await;
        }));

        let live = get(addr, "/health/live").await;
        assert!(live.starts_with("HTTP/1.1 200"));
        assert!(live.ends_with("OK"));

        let ready = get(addr, "/health/ready").await;
        assert!(ready.contains("\"connections\":0"));

        let _ = tx.send(());
        server.await.unwrap().unwrap();
    }
}
