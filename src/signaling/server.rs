use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{ConnectInfo, Path, State};
use axum::response::Response;
use axum::routing::get;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::actor::RoomServiceHandle;
use super::messages::{AuthInfo, RelayRequest};
use super::service::Joined;
use super::types::{OutboundMessage, PeerId, RoomId, SignalingError};
use crate::config::SignalingConfig;
use crate::identity;

/// How long the writer gets to flush after the session ends
const WRITER_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct AppState {
    handle: RoomServiceHandle,
    config: SignalingConfig,
}

/// HTTP listener serving both `GET /auth` and the WebSocket upgrade on
/// `/rooms/{room}/users/{uid}`
pub struct SignalingServer {
    listener: TcpListener,
    handle: RoomServiceHandle,
    config: SignalingConfig,
}

impl SignalingServer {
    /// Bind the listener and start the room service actor
    pub async fn bind(addr: &str, config: SignalingConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let handle = RoomServiceHandle::spawn(config.command_queue_capacity);

        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle,
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> RoomServiceHandle {
        self.handle.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        let app = router(self.handle, self.config);
        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}

/// Path segments arrive percent-decoded; anything else under `/rooms` is a 404
fn router(handle: RoomServiceHandle, config: SignalingConfig) -> Router {
    Router::new()
        .route("/rooms/{room}/users/{uid}", get(upgrade))
        .with_state(AppState { handle, config })
        .merge(identity::router())
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path((room, uid)): Path<(String, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let room = RoomId::from(room);
    let peer_id = PeerId::from(uid);
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_connection(socket, addr, room, peer_id, state).await {
            warn!("Connection from {} ended: {}", addr, e);
        }
    })
}

/// Decode a data frame; control frames yield None
fn decode<T: DeserializeOwned>(msg: &Message) -> Option<Result<T, serde_json::Error>> {
    match msg {
        Message::Text(text) => Some(serde_json::from_str(text.as_str())),
        Message::Binary(data) => Some(serde_json::from_slice(data)),
        _ => None,
    }
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

async fn read_join_payload(ws: &mut WebSocket) -> Result<AuthInfo, SignalingError> {
    while let Some(msg) = ws.recv().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!("WebSocket error before join: {}", e);
                return Err(SignalingError::ChannelTerminated);
            }
        };
        if let Message::Close(_) = msg {
            return Err(SignalingError::ChannelTerminated);
        }
        if let Some(result) = decode::<AuthInfo>(&msg) {
            return result.map_err(SignalingError::MalformedJoinPayload);
        }
    }
    Err(SignalingError::ChannelTerminated)
}

async fn reject(ws: &mut WebSocket, code: u16, reason: &'static str) {
    if let Err(e) = ws.send(close_frame(code, reason)).await {
        debug!("Close failed: {}", e);
    }
}

/// Writes the roster, then queued events and control frames.
///
/// Ends when the registry drops the peer's sender (eviction), after a
/// control Close, or on a socket error.
async fn write_events(
    mut ws_tx: SplitSink<WebSocket, Message>,
    roster: Vec<OutboundMessage>,
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut ctrl_rx: mpsc::UnboundedReceiver<Message>,
) {
    for msg in roster {
        if ws_tx.send(Message::Text(msg.into_inner())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if ws_tx.send(Message::Text(msg.into_inner())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = ws_tx.send(close_frame(close_code::POLICY, "removed from room")).await;
                    break;
                }
            },
            ctrl = ctrl_rx.recv() => match ctrl {
                Some(msg) => {
                    let closing = matches!(msg, Message::Close(_));
                    if ws_tx.send(msg).await.is_err() || closing {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

enum SessionEnd {
    Closed,
    Unresponsive,
    Malformed(serde_json::Error),
    /// Writer stopped: evicted from the registry or the socket failed
    WriterGone,
}

async fn handle_connection(
    mut socket: WebSocket,
    addr: SocketAddr,
    room: RoomId,
    peer_id: PeerId,
    state: AppState,
) -> Result<(), SignalingError> {
    let AppState { handle, config } = state;
    info!("WebSocket connection from {} for {} in {}", addr, peer_id, room);

    let joined = tokio::time::timeout(config.join_timeout, read_join_payload(&mut socket)).await;
    let auth = match joined {
        Ok(Ok(auth)) => auth,
        Ok(Err(e)) => {
            if matches!(e, SignalingError::MalformedJoinPayload(_)) {
                reject(&mut socket, close_code::INVALID, "invalid join payload").await;
            }
            return Err(e);
        }
        Err(_) => {
            reject(&mut socket, close_code::POLICY, "join timeout").await;
            return Err(SignalingError::JoinTimeout(config.join_timeout));
        }
    };

    let (tx, rx) = mpsc::channel::<OutboundMessage>(config.outbound_queue_capacity);
    let Joined { session, roster } = match handle.join(room, peer_id.clone(), tx, auth).await {
        Ok(joined) => joined,
        Err(e) => {
            match e {
                SignalingError::DuplicateIdentifier(_) => {
                    reject(&mut socket, close_code::POLICY, "identifier already in use").await
                }
                _ => reject(&mut socket, close_code::ERROR, "registry unavailable").await,
            }
            return Err(e);
        }
    };

    let (ws_tx, mut ws_rx) = socket.split();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<Message>();
    let mut send_task = tokio::spawn(write_events(ws_tx, roster, rx, ctrl_rx));

    let mut ping_interval = tokio::time::interval(config.ping_interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let end = loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", peer_id);
                    break SessionEnd::Unresponsive;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break SessionEnd::WriterGone;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + config.pong_timeout);
                debug!("Ping sent to {}", peer_id);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", peer_id);
                break SessionEnd::Unresponsive;
            }

            _ = &mut send_task => {
                break SessionEnd::WriterGone;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer_id, e);
                        break SessionEnd::Closed;
                    }
                    None => break SessionEnd::Closed,
                };

                match msg {
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", peer_id);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", peer_id);
                        break SessionEnd::Closed;
                    }
                    other => match decode::<RelayRequest>(&other) {
                        Some(Ok(req)) => handle.relay(&peer_id, req.uid, req.message).await,
                        Some(Err(e)) => break SessionEnd::Malformed(e),
                        None => {}
                    },
                }
            }
        }
    };

    let writer_gone = matches!(end, SessionEnd::WriterGone);
    match end {
        SessionEnd::Closed => {}
        SessionEnd::Unresponsive => {
            let _ = ctrl_tx.send(close_frame(close_code::POLICY, "pong timeout"));
        }
        SessionEnd::Malformed(e) => {
            let reason = SignalingError::MalformedRelayPayload(e);
            warn!("Ending session for {}: {}", peer_id, reason);
            let _ = ctrl_tx.send(close_frame(close_code::INVALID, "invalid relay payload"));
        }
        SessionEnd::WriterGone => info!("Writer for {} stopped", peer_id),
    }
    drop(ctrl_tx);

    handle.leave(&peer_id, session).await;

    if !writer_gone && tokio::time::timeout(WRITER_GRACE, &mut send_task).await.is_err() {
        send_task.abort();
    }
    info!("WebSocket disconnected: {} ({})", peer_id, addr);

    Ok(())
}
