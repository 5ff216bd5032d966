//! WebSocket transport (axum).
//!
//! `/ws/terminal` opens an isolated session bound to the connection.
//! `/ws/tabs` attaches the shared surface; a newer connection replaces the
//! older one.

use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::close_code;
use axum::extract::ws::CloseFrame;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::Query;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Notify;
use tracing::debug;
use tracing::info;
use tracing::warn;

use ptyhub_ipc::parse_session_frame;
use ptyhub_ipc::parse_shared_frame;
use ptyhub_ipc::Envelope;
use ptyhub_ipc::ProtocolError;

use crate::error::DaemonError;
use crate::manager::CreateRequest;
use crate::server::ManagerEvent;
use crate::surface::ChannelError;
use crate::surface::ChannelRef;
use crate::surface::UiChannel;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(15);
const WS_MAX_PARSE_ERRORS: u8 = 3;
const MAX_CLOSE_REASON: usize = 120;
/// Frames queued for a connection before it is closed as too slow.
const WS_OUTGOING_CAPACITY: usize = 1024;

enum SurfaceCommand {
    Frame(String),
    Close,
}

/// `UiChannel` over one WebSocket connection. Frames are queued for the
/// connection task, so posting never blocks the event loop. A full queue
/// marks the channel closed and wakes `overflow` so the connection task
/// drops the client.
pub struct WsChannel {
    tx: mpsc::Sender<SurfaceCommand>,
    closed: AtomicBool,
    overflow: Arc<Notify>,
}

impl WsChannel {
    fn new(tx: mpsc::Sender<SurfaceCommand>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
            overflow: Arc::new(Notify::new()),
        }
    }

    fn overflow(&self) -> Arc<Notify> {
        Arc::clone(&self.overflow)
    }

    fn mark_overflowed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            warn!(
                capacity = WS_OUTGOING_CAPACITY,
                "Surface not draining output, closing"
            );
        }
        self.overflow.notify_one();
    }
}

impl UiChannel for WsChannel {
    fn post(&self, envelope: Envelope) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let payload = match envelope.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Dropping unencodable message");
                return Ok(());
            }
        };
        match self.tx.try_send(SurfaceCommand::Frame(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.mark_overflowed();
                Err(ChannelError::Closed)
            }
            Err(TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(ChannelError::Closed)
            }
        }
    }

    fn dispose(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(TrySendError::Full(_)) = self.tx.try_send(SurfaceCommand::Close) {
                self.overflow.notify_one();
            }
        }
    }
}

#[derive(Clone)]
struct WsState {
    events: mpsc::UnboundedSender<ManagerEvent>,
    notices: broadcast::Sender<Envelope>,
    shutdown_rx: watch::Receiver<bool>,
    next_connection: Arc<AtomicU64>,
}

/// Resolve and bind `listen`, refusing non-loopback addresses unless allowed.
pub fn bind_listener(
    listen: &str,
    allow_remote: bool,
) -> Result<(std::net::TcpListener, SocketAddr), DaemonError> {
    let mut addrs = listen
        .to_socket_addrs()
        .map_err(|e| DaemonError::InvalidListen(e.to_string()))?;
    let addr = addrs
        .next()
        .ok_or_else(|| DaemonError::InvalidListen("no resolved address".to_string()))?;

    if !allow_remote && !addr.ip().is_loopback() {
        return Err(DaemonError::InvalidListen(
            "refusing to bind non-loopback address without PTYHUB_ALLOW_REMOTE=1".to_string(),
        ));
    }

    let bind_err = |e: std::io::Error| DaemonError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    };
    let listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
    listener.set_nonblocking(true).map_err(bind_err)?;
    let local_addr = listener.local_addr().map_err(bind_err)?;
    Ok((listener, local_addr))
}

pub fn format_ws_url(addr: &SocketAddr) -> String {
    let host = match addr.ip() {
        std::net::IpAddr::V4(ip) => ip.to_string(),
        std::net::IpAddr::V6(ip) => format!("[{ip}]"),
    };
    format!("ws://{}:{}", host, addr.port())
}

/// Serve until `shutdown` turns true.
pub async fn serve(
    listener: std::net::TcpListener,
    events: mpsc::UnboundedSender<ManagerEvent>,
    notices: broadcast::Sender<Envelope>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), DaemonError> {
    let listener = TcpListener::from_std(listener).map_err(|e| DaemonError::Serve(e.to_string()))?;
    if let Ok(addr) = listener.local_addr() {
        info!(url = %format_ws_url(&addr), "WebSocket server listening");
    }

    let state = WsState {
        events,
        notices,
        shutdown_rx: shutdown.clone(),
        next_connection: Arc::new(AtomicU64::new(1)),
    };

    let mut shutdown_server = shutdown;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_server.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| DaemonError::Serve(e.to_string()))
}

fn build_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/ws/terminal", get(terminal_handler))
        .route("/ws/tabs", get(tabs_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
struct TerminalQuery {
    cols: Option<u16>,
    rows: Option<u16>,
    cwd: Option<String>,
    title: Option<String>,
}

async fn terminal_handler(
    State(state): State<WsState>,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_isolated(socket, state, query))
        .into_response()
}

async fn tabs_handler(State(state): State<WsState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_shared(socket, state))
        .into_response()
}

async fn handle_isolated(mut socket: WebSocket, state: WsState, query: TerminalQuery) {
    let (tx, rx) = mpsc::channel(WS_OUTGOING_CAPACITY);
    let surface = Arc::new(WsChannel::new(tx));
    let overflow = surface.overflow();
    let channel: ChannelRef = surface;
    let request = CreateRequest {
        title: query.title,
        cols: query.cols,
        rows: query.rows,
        cwd: query.cwd.map(PathBuf::from),
        active: false,
    };

    let (reply, opened) = oneshot::channel();
    let open = ManagerEvent::OpenIsolated {
        channel,
        request,
        reply,
    };
    if state.events.send(open).is_err() {
        close(&mut socket, close_code::AWAY, "daemon stopping").await;
        return;
    }

    let id = match opened.await {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => {
            close(&mut socket, close_code::ERROR, &e.to_string()).await;
            return;
        }
        Err(_) => {
            close(&mut socket, close_code::AWAY, "daemon stopping").await;
            return;
        }
    };
    debug!(session_id = %id, "Isolated connection open");

    let events = state.events.clone();
    let frame_id = id.clone();
    run_connection(socket, rx, overflow, &state, |text| {
        let message = parse_session_frame(text)?;
        let _ = events.send(ManagerEvent::SessionFrame {
            id: frame_id.clone(),
            message,
        });
        Ok(())
    })
    .await;

    let _ = state.events.send(ManagerEvent::CloseIsolated { id });
}

async fn handle_shared(socket: WebSocket, state: WsState) {
    let connection_id = state.next_connection.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = mpsc::channel(WS_OUTGOING_CAPACITY);
    let surface = Arc::new(WsChannel::new(tx));
    let overflow = surface.overflow();
    let channel: ChannelRef = surface;
    if state
        .events
        .send(ManagerEvent::AttachShared {
            connection_id,
            channel,
        })
        .is_err()
    {
        return;
    }
    debug!(connection_id, "Shared surface connected");

    let events = state.events.clone();
    run_connection(socket, rx, overflow, &state, |text| {
        let inbound = parse_shared_frame(text)?;
        let _ = events.send(ManagerEvent::SharedFrame {
            connection_id,
            inbound,
        });
        Ok(())
    })
    .await;

    let _ = state
        .events
        .send(ManagerEvent::DetachShared { connection_id });
}

/// Pump one connection: outgoing frames and notices to the socket, inbound
/// text frames to `on_text`.
async fn run_connection<F>(
    mut socket: WebSocket,
    mut outgoing: mpsc::Receiver<SurfaceCommand>,
    overflow: Arc<Notify>,
    state: &WsState,
    mut on_text: F,
) where
    F: FnMut(&str) -> Result<(), ProtocolError>,
{
    let mut shutdown_rx = state.shutdown_rx.clone();
    let mut notices = state.notices.subscribe();
    let mut notices_open = true;
    let mut parse_errors = 0u8;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    warn!("WS shutdown channel closed");
                }
                close(&mut socket, close_code::AWAY, "daemon stopping").await;
                break;
            }
            _ = overflow.notified() => {
                close(&mut socket, close_code::POLICY, "output backlog exceeded").await;
                break;
            }
            command = outgoing.recv() => match command {
                Some(SurfaceCommand::Frame(payload)) => {
                    if send_text(&mut socket, payload).await.is_err() {
                        break;
                    }
                }
                Some(SurfaceCommand::Close) | None => {
                    close(&mut socket, close_code::NORMAL, "session closed").await;
                    break;
                }
            },
            notice = notices.recv(), if notices_open => match notice {
                Ok(envelope) => {
                    let Ok(payload) = envelope.to_json() else {
                        continue;
                    };
                    if send_text(&mut socket, payload).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Notice receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => notices_open = false,
            },
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Text(text) => match on_text(&text) {
                        Ok(()) => parse_errors = 0,
                        Err(e) => {
                            parse_errors = parse_errors.saturating_add(1);
                            warn!(error = %e, parse_errors, "Malformed frame");
                            if parse_errors >= WS_MAX_PARSE_ERRORS {
                                close(&mut socket, close_code::POLICY, "too many parse errors").await;
                                break;
                            }
                        }
                    },
                    Message::Binary(_) => {
                        close(&mut socket, close_code::PROTOCOL, "binary frames are not supported").await;
                        break;
                    }
                    Message::Close(_) => break,
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                }
            }
        }
    }
}

async fn send_text(socket: &mut WebSocket, payload: String) -> Result<(), ()> {
    match tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(payload))).await {
        Ok(result) => result.map_err(|_| ()),
        Err(_) => Err(()),
    }
}

async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Close reasons must fit a control frame.
fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptyhub_ipc::OutboundMessage;

    #[test]
    fn test_bind_listener_rejects_non_loopback_without_allow_remote() {
        let err = bind_listener("0.0.0.0:0", false).unwrap_err();
        assert!(err.to_string().contains("PTYHUB_ALLOW_REMOTE=1"), "{err}");
    }

    #[test]
    fn test_bind_listener_loopback_ephemeral_port() {
        let (_listener, addr) = bind_listener("127.0.0.1:0", false).unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert!(format_ws_url(&addr).starts_with("ws://127.0.0.1:"));
    }

    #[test]
    fn test_ws_channel_queues_json_and_closes_once() {
        let (tx, mut rx) = mpsc::channel(4);
        let channel = WsChannel::new(tx);

        channel
            .post(Envelope::direct(OutboundMessage::Exit { code: 0 }))
            .unwrap();
        match rx.try_recv().unwrap() {
            SurfaceCommand::Frame(payload) => assert_eq!(payload, r#"{"type":"exit","code":0}"#),
            SurfaceCommand::Close => panic!("unexpected close"),
        }

        channel.dispose();
        channel.dispose();
        assert!(matches!(rx.try_recv().unwrap(), SurfaceCommand::Close));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            channel.post(Envelope::direct(OutboundMessage::FocusRequest)),
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test]
    async fn test_ws_channel_overflow_closes_instead_of_growing() {
        let (tx, mut rx) = mpsc::channel(2);
        let channel = WsChannel::new(tx);
        let overflow = channel.overflow();

        for code in 0..2 {
            channel
                .post(Envelope::direct(OutboundMessage::Exit { code }))
                .unwrap();
        }
        assert_eq!(
            channel.post(Envelope::direct(OutboundMessage::Exit { code: 2 })),
            Err(ChannelError::Closed)
        );
        assert_eq!(
            channel.post(Envelope::direct(OutboundMessage::FocusRequest)),
            Err(ChannelError::Closed)
        );

        let woke = tokio::time::timeout(Duration::from_secs(1), overflow.notified()).await;
        assert!(woke.is_ok(), "overflow should wake the connection task");

        let mut queued = 0;
        while let Ok(command) = rx.try_recv() {
            assert!(matches!(command, SurfaceCommand::Frame(_)));
            queued += 1;
        }
        assert_eq!(queued, 2);
    }

    #[test]
    fn test_truncate_reason_respects_char_boundaries() {
        let long = "é".repeat(100);
        let truncated = truncate_reason(&long);
        assert!(truncated.len() <= MAX_CLOSE_REASON);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
