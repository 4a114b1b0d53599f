//! WebSocket connection lifecycle management.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::handler::Gateway;
use super::types::{WsError, next_conn_id};
use crate::network::{Conn, MessageKind, NetworkError};
use crate::session::Session;

const PING_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) enum Outbound {
    Frame {
        msg: Message,
        ack: Option<oneshot::Sender<Result<(), NetworkError>>>,
    },
    Close,
}

/// [`Conn`] implementation over a WebSocket.
///
/// Frames go through a bounded queue drained by a dedicated writer task;
/// `send` waits for the writer's acknowledgement, `push` only enqueues.
pub struct WsConn {
    id: i64,
    uid: Mutex<Option<i64>>,
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
    abort: Arc<Notify>,
    closing: Notify,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

pub(crate) struct WriterHalf {
    pub(crate) rx: mpsc::Receiver<Outbound>,
    pub(crate) abort: Arc<Notify>,
}

impl WsConn {
    pub(crate) fn new(
        id: i64,
        capacity: usize,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> (Self, WriterHalf) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let abort = Arc::new(Notify::new());
        let conn = Self {
            id,
            uid: Mutex::new(None),
            tx,
            closed: AtomicBool::new(false),
            abort: Arc::clone(&abort),
            closing: Notify::new(),
            local_addr,
            remote_addr,
        };
        (conn, WriterHalf { rx, abort })
    }

    /// User id forwarded by the session on bind.
    pub fn bound_uid(&self) -> Option<i64> {
        *self.uid.lock()
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ping(&self) -> Result<(), NetworkError> {
        self.enqueue(Outbound::Frame {
            msg: Message::Ping(Bytes::new()),
            ack: None,
        })
    }

    fn enqueue(&self, outbound: Outbound) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed(self.id));
        }
        self.tx.try_send(outbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetworkError::QueueFull(self.id),
            mpsc::error::TrySendError::Closed(_) => NetworkError::ConnectionClosed(self.id),
        })
    }

    async fn wait_closing(&self) {
        self.closing.notified().await;
    }
}

fn to_message(msg: Bytes, kind: MessageKind) -> Result<Message, NetworkError> {
    match kind {
        MessageKind::Binary => Ok(Message::Binary(msg)),
        MessageKind::Text => String::from_utf8(msg.to_vec())
            .map(|text| Message::Text(text.into()))
            .map_err(|_| NetworkError::InvalidText),
    }
}

#[async_trait]
impl Conn for WsConn {
    fn id(&self) -> i64 {
        self.id
    }

    fn bind(&self, uid: i64) {
        *self.uid.lock() = Some(uid);
    }

    fn unbind(&self) {
        *self.uid.lock() = None;
    }

    async fn send(&self, msg: Bytes, kind: MessageKind) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed(self.id));
        }
        let msg = to_message(msg, kind)?;
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Outbound::Frame { msg, ack: Some(ack) })
            .await
            .map_err(|_| NetworkError::ConnectionClosed(self.id))?;
        done.await
            .map_err(|_| NetworkError::ConnectionClosed(self.id))?
    }

    fn push(&self, msg: Bytes, kind: MessageKind) -> Result<(), NetworkError> {
        let msg = to_message(msg, kind)?;
        self.enqueue(Outbound::Frame { msg, ack: None })
    }

    fn close(&self, force: bool) -> Result<(), NetworkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(NetworkError::ConnectionClosed(self.id));
        }
        if force || self.tx.try_send(Outbound::Close).is_err() {
            self.abort.notify_one();
        }
        self.closing.notify_one();
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.remote_addr)
    }
}

impl fmt::Debug for WsConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConn")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Drains the outbound queue into the socket until closed or aborted.
pub(crate) async fn write_loop<S>(mut sink: S, writer: WriterHalf)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let WriterHalf { mut rx, abort } = writer;
    loop {
        tokio::select! {
            biased;
            () = abort.notified() => {
                debug!("writer aborted");
                break;
            }
            next = rx.recv() => match next {
                Some(Outbound::Frame { msg, ack }) => {
                    let result = sink
                        .send(msg)
                        .await
                        .map_err(|e| NetworkError::Write(e.to_string()));
                    let failed = result.is_err();
                    if let Some(ack) = ack {
                        let _ = ack.send(result);
                    }
                    if failed {
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!(error = %e, "close frame not delivered");
                    }
                    break;
                }
            }
        }
    }
    rx.close();
}

/// Runs one accepted WebSocket until either side closes it.
///
/// The socket becomes a [`Session`] registered with the gateway's hub for
/// its whole lifetime; on exit the session quits its groups and is reset.
///
/// # Errors
///
/// Returns an error if the session cannot be registered or the socket fails.
pub async fn run(socket: WebSocket, gateway: Arc<Gateway>, remote_addr: SocketAddr) -> Result<(), WsError> {
    let cid = next_conn_id();
    let (sink, mut stream) = socket.split();
    let (conn, writer) = WsConn::new(cid, gateway.queue_capacity(), gateway.local_addr(), remote_addr);
    let conn = Arc::new(conn);
    let writer = tokio::spawn(write_loop(sink, writer));

    let session = Arc::new(Session::new());
    session.init(conn.clone());
    gateway.hub().insert(session.clone())?;
    info!(cid, %remote_addr, "WebSocket connection established");
    gateway.handler().on_connect(&session).await;

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.tick().await;

    let result = loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    debug!(cid, len = data.len(), "Received binary");
                    gateway.handler().on_message(&session, data).await;
                }
                Some(Ok(Message::Text(text))) => {
                    debug!(cid, len = text.len(), "Received text");
                    let data = Bytes::copy_from_slice(text.as_str().as_bytes());
                    gateway.handler().on_message(&session, data).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    debug!(cid, "Heartbeat frame received");
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(cid, "Client initiated close");
                    break Ok(());
                }
                Some(Err(e)) => {
                    error!(cid, error = %e, "WebSocket error");
                    break Err(WsError::AxumWs(e));
                }
            },

            () = conn.wait_closing() => {
                debug!(cid, "Closed by server");
                break Ok(());
            }

            _ = ping_interval.tick() => {
                if let Err(e) = conn.ping() {
                    warn!(cid, error = %e, "Ping failed");
                    break Ok(());
                }
            }
        }
    };

    let uid = session.uid();
    gateway.hub().remove(cid);
    gateway.handler().on_disconnect(cid, uid).await;

    if !conn.is_closed() {
        let _ = conn.close(false);
    }
    drop(conn);
    if let Err(e) = writer.await {
        warn!(cid, error = %e, "writer task failed");
    }
    info!(cid, "Connection closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn send_waits_for_writer_ack() {
        let (conn, writer) = WsConn::new(1, 8, addr(), addr());
        let mut frames: Vec<Message> = Vec::new();
        let writer_task = async {
            write_loop(&mut frames, writer).await;
        };
        let sender = async {
            conn.send(Bytes::from_static(b"hello"), MessageKind::Binary)
                .await
                .unwrap();
            conn.push(Bytes::from_static(b"text"), MessageKind::Text).unwrap();
            conn.close(false).unwrap();
        };
        tokio::join!(writer_task, sender);

        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Message::Binary(b) if b.as_ref() == b"hello"));
        assert!(matches!(&frames[1], Message::Text(t) if t.as_str() == "text"));
        assert!(matches!(frames[2], Message::Close(None)));
    }

    #[test]
    fn push_rejects_invalid_text() {
        let (conn, _writer) = WsConn::new(1, 8, addr(), addr());
        let result = conn.push(Bytes::from_static(&[0xff, 0xfe]), MessageKind::Text);
        assert_eq!(result, Err(NetworkError::InvalidText));
    }

    #[test]
    fn push_reports_full_queue() {
        let (conn, _writer) = WsConn::new(7, 1, addr(), addr());
        conn.push(Bytes::from_static(b"a"), MessageKind::Binary).unwrap();
        let result = conn.push(Bytes::from_static(b"b"), MessageKind::Binary);
        assert_eq!(result, Err(NetworkError::QueueFull(7)));
    }

    #[test]
    fn second_close_is_an_error() {
        let (conn, _writer) = WsConn::new(3, 8, addr(), addr());
        conn.close(false).unwrap();
        assert_eq!(conn.close(false), Err(NetworkError::ConnectionClosed(3)));
        assert_eq!(
            conn.push(Bytes::new(), MessageKind::Binary),
            Err(NetworkError::ConnectionClosed(3))
        );
    }

    #[tokio::test]
    async fn forced_close_drops_queued_frames() {
        let (conn, writer) = WsConn::new(4, 8, addr(), addr());
        conn.push(Bytes::from_static(b"queued"), MessageKind::Binary).unwrap();
        conn.close(true).unwrap();

        let mut frames: Vec<Message> = Vec::new();
        write_loop(&mut frames, writer).await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn send_after_writer_exit_fails() {
        let (conn, writer) = WsConn::new(5, 8, addr(), addr());
        drop(writer);
        let result = conn.send(Bytes::from_static(b"x"), MessageKind::Binary).await;
        assert_eq!(result, Err(NetworkError::ConnectionClosed(5)));
    }

    #[test]
    fn bind_is_recorded() {
        let (conn, _writer) = WsConn::new(6, 8, addr(), addr());
        conn.bind(11);
        assert_eq!(conn.bound_uid(), Some(11));
        conn.unbind();
        assert_eq!(conn.bound_uid(), None);
    }
}
