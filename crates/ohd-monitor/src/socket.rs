//! Realtime event channel: a Socket.IO client over WebSocket.
//!
//! The client is an owned value with an explicit lifecycle
//! (`new` → `on` → `connect` → `disconnect`). Each instance holds at most one
//! live connection task; the task reconnects with backoff and events sent
//! while it is down are lost.

use futures_util::{SinkExt, StreamExt};
use ohd_core::socketio::{decode_frame, websocket_url, EnginePacket, PacketError, SocketPacket};
use ohd_core::{CONNECT_EVENT, DISCONNECT_EVENT};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub const DEFAULT_SOCKET_PATH: &str = "/socket.io";
const OUTBOUND_CAPACITY: usize = 64;
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    InvalidEndpoint(#[from] PacketError),
}

type Handler = Box<dyn Fn(&Value) + Send + Sync + 'static>;

#[derive(Default)]
struct HandlerRegistry {
    handlers: HashMap<String, Vec<Handler>>,
}

impl HandlerRegistry {
    fn dispatch(&self, name: &str, payload: &Value) {
        match self.handlers.get(name) {
            Some(handlers) => {
                for handler in handlers {
                    handler(payload);
                }
            }
            None => debug!(event = "socket_unhandled_event", name = %name),
        }
    }
}

type SharedRegistry = Arc<Mutex<HandlerRegistry>>;

fn dispatch(registry: &SharedRegistry, name: &str, payload: &Value) {
    let registry = registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    registry.dispatch(name, payload);
}

#[derive(Debug)]
enum Outbound {
    Emit { name: String, payload: Value },
    Shutdown,
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

pub struct SocketClient {
    socket_path: String,
    handlers: SharedRegistry,
    connected: Arc<AtomicBool>,
    outbound: Option<mpsc::Sender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl SocketClient {
    pub fn new(socket_path: &str) -> Self {
        Self {
            socket_path: socket_path.to_string(),
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
            connected: Arc::new(AtomicBool::new(false)),
            outbound: None,
            task: None,
        }
    }

    /// Register a handler for a named event (`connect`, `disconnect`,
    /// `action_update`, ...). Handlers run on the connection task and must not
    /// call back into `on`.
    pub fn on<F>(&self, event_name: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry
            .handlers
            .entry(event_name.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    /// Start the connection task. A no-op while a task is already running.
    pub fn connect(&mut self, endpoint: &str) -> Result<(), SocketError> {
        if let Some(task) = &self.task {
            if !task.is_finished() {
                debug!(event = "socket_connect_skipped", reason = "already_connected");
                return Ok(());
            }
        }
        let url = websocket_url(endpoint, &self.socket_path)?;
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handlers = self.handlers.clone();
        let connected = self.connected.clone();
        info!(event = "socket_connect", url = %url);
        self.task = Some(tokio::spawn(async move {
            connection_loop(url.to_string(), handlers, connected, rx).await;
        }));
        self.outbound = Some(tx);
        Ok(())
    }

    /// Send a client event. Dropped silently when no connection is live.
    pub fn emit(&self, event_name: &str, payload: Value) {
        if !self.is_connected() {
            return;
        }
        if let Some(tx) = &self.outbound {
            if let Err(err) = tx.try_send(Outbound::Emit {
                name: event_name.to_string(),
                payload,
            }) {
                debug!(event = "socket_emit_dropped", name = %event_name, error = %err);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Ask the connection task to say goodbye and stop, without waiting for
    /// it. Used from `Drop`; prefer `close` where the caller can await.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.outbound.take() {
            if let Err(err) = tx.try_send(Outbound::Shutdown) {
                debug!(event = "socket_shutdown_not_queued", error = %err);
            }
        }
        if self.task.take().is_some() {
            info!(event = "socket_disconnect");
        }
    }

    /// Send the disconnect packet and wait (bounded) for the connection task
    /// to finish, so the close frame is written before the runtime goes away.
    pub async fn close(&mut self) {
        let outbound = self.outbound.take();
        let Some(task) = self.task.take() else {
            return;
        };
        let shutdown = async move {
            if let Some(tx) = outbound {
                if tx.send(Outbound::Shutdown).await.is_err() {
                    debug!(event = "socket_shutdown_not_queued", error = "task_gone");
                }
            }
            if let Err(err) = task.await {
                warn!(event = "socket_task_failed", error = %err);
            }
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await {
            Ok(()) => info!(event = "socket_close_complete"),
            Err(_) => warn!(
                event = "socket_close_timeout",
                after_ms = CLOSE_TIMEOUT.as_millis() as u64
            ),
        }
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn connection_loop(
    url: String,
    handlers: SharedRegistry,
    connected: Arc<AtomicBool>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                warn!(event = "socket_connect_error", error = %err);
                if wait_or_shutdown(&mut rx, backoff).await {
                    return;
                }
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);

        let end = run_session(ws, &handlers, &connected, &mut rx).await;
        if connected.swap(false, Ordering::SeqCst) {
            dispatch(&handlers, DISCONNECT_EVENT, &Value::Null);
        }
        if matches!(end, SessionEnd::Shutdown) {
            return;
        }
        if wait_or_shutdown(&mut rx, backoff).await {
            return;
        }
        backoff = next_backoff(backoff);
    }
}

async fn run_session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    handlers: &SharedRegistry,
    connected: &AtomicBool,
    rx: &mut mpsc::Receiver<Outbound>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    // Until the open packet tells us otherwise, assume the protocol defaults.
    let mut heartbeat = Duration::from_millis(25_000 + 20_000);
    let mut deadline = Instant::now() + heartbeat;

    loop {
        tokio::select! {
            frame = stream.next() => {
                deadline = Instant::now() + heartbeat;
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(event = "socket_closed");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(event = "socket_read_error", error = %err);
                        return SessionEnd::Dropped;
                    }
                };
                let packet = match decode_frame(&text) {
                    Ok(packet) => packet,
                    Err(err) => {
                        debug!(event = "socket_decode_error", error = %err);
                        continue;
                    }
                };
                match packet {
                    EnginePacket::Open(open) => {
                        heartbeat = Duration::from_millis(open.ping_interval + open.ping_timeout);
                        deadline = Instant::now() + heartbeat;
                        debug!(event = "socket_open", sid = %open.sid);
                        let connect = EnginePacket::Message(SocketPacket::connect()).encode();
                        if sink.send(Message::Text(connect)).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                    }
                    EnginePacket::Ping(data) => {
                        let pong = EnginePacket::Pong(data).encode();
                        if sink.send(Message::Text(pong)).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                    }
                    EnginePacket::Close => return SessionEnd::Dropped,
                    EnginePacket::Message(SocketPacket::Connect { .. }) => {
                        connected.store(true, Ordering::SeqCst);
                        info!(event = "socket_connected");
                        dispatch(handlers, CONNECT_EVENT, &Value::Null);
                    }
                    EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
                        info!(event = "socket_server_disconnect");
                        return SessionEnd::Dropped;
                    }
                    EnginePacket::Message(SocketPacket::ConnectError { data, .. }) => {
                        warn!(event = "socket_connect_refused", data = ?data);
                        return SessionEnd::Dropped;
                    }
                    EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                        let payload = args.into_iter().next().unwrap_or(Value::Null);
                        dispatch(handlers, &name, &payload);
                    }
                    EnginePacket::Message(SocketPacket::Ack { .. })
                    | EnginePacket::Pong(_)
                    | EnginePacket::Upgrade
                    | EnginePacket::Noop => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Emit { name, payload }) => {
                        if !connected.load(Ordering::SeqCst) {
                            continue;
                        }
                        let frame = EnginePacket::Message(SocketPacket::event(&name, payload)).encode();
                        if sink.send(Message::Text(frame)).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                    }
                    Some(Outbound::Shutdown) | None => {
                        let goodbye = EnginePacket::Message(SocketPacket::disconnect()).encode();
                        let _ = sink.send(Message::Text(goodbye)).await;
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(event = "socket_heartbeat_timeout", after_ms = heartbeat.as_millis() as u64);
                return SessionEnd::Dropped;
            }
        }
    }
}

/// Sleep out the backoff; returns true when the client asked to shut down.
async fn wait_or_shutdown(rx: &mut mpsc::Receiver<Outbound>, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            outbound = rx.recv() => match outbound {
                Some(Outbound::Emit { name, .. }) => {
                    debug!(event = "socket_emit_dropped", name = %name);
                }
                Some(Outbound::Shutdown) | None => return true,
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > MAX_BACKOFF {
        MAX_BACKOFF
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(4)), Duration::from_secs(8));
        assert_eq!(next_backoff(Duration::from_secs(8)), MAX_BACKOFF);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let client = SocketClient::new(DEFAULT_SOCKET_PATH);
        let calls = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let calls = calls.clone();
            client.on("action_update", move |payload| {
                calls.lock().unwrap().push(format!("{tag}:{payload}"));
            });
        }
        dispatch(&client.handlers, "action_update", &serde_json::json!(1));
        dispatch(&client.handlers, "unrelated", &serde_json::json!(2));
        assert_eq!(*calls.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn connect_rejects_invalid_endpoint() {
        let mut client = SocketClient::new(DEFAULT_SOCKET_PATH);
        assert!(matches!(
            client.connect("ftp://nowhere"),
            Err(SocketError::InvalidEndpoint(_))
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn connect_accepts_secure_endpoint() {
        let mut client = SocketClient::new(DEFAULT_SOCKET_PATH);
        assert!(client.connect("https://127.0.0.1:1").is_ok());
        assert!(!client.is_connected());
        client.close().await;
    }

    #[tokio::test]
    async fn emit_and_disconnect_without_connection_are_noops() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut client = SocketClient::new(DEFAULT_SOCKET_PATH);
        let counter = hits.clone();
        client.on(DISCONNECT_EVENT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        client.emit("hello", Value::Null);
        client.disconnect();
        client.disconnect();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
