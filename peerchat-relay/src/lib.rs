use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use peerchat_core::{
    ControlMessage, Hello, MAX_FRAME_BYTES, MAX_RELAY_MEMBERS_PER_ROOM, PeerInfo, PeerJoined,
    PeerLeft, PeerList, RelayEnvelope, RoomId, SignalEnvelope, UserId, WireMessage, decode_frame,
    encode_frame,
};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{debug, error, info, warn};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const RATE_LIMIT_BURST: f64 = 48.0;
const RATE_LIMIT_PER_SECOND: f64 = 24.0;

#[derive(Debug, Clone)]
struct Connection {
    peer: PeerInfo,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct Room {
    members: HashMap<UserId, Connection>,
}

#[derive(Debug, Default)]
struct RelayState {
    rooms: HashMap<RoomId, Room>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<RelayState>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RelayState::default())),
        }
    }

    /// Number of members currently registered in `room_id`.
    pub async fn member_count(&self, room_id: &str) -> usize {
        let relay = self.inner.read().await;
        relay
            .rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn consume(&mut self, amount: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "relay listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            if let Err(err) = handle_socket(state, socket).await {
                warn!("socket session ended with error: {}", err);
            }
        })
}

async fn handle_socket(
    state: AppState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Split sockets only flush queued pongs when the write half sends, so the
    // write half pings on its own to keep proxies from idling the link out.
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let first_message = ws_receiver
        .next()
        .await
        .ok_or_else(|| "client disconnected before hello".to_owned())
        .and_then(|result| result.map_err(|err| err.to_string()))?;

    let hello = match parse_hello_message(&first_message) {
        Ok(hello) => hello,
        Err(err) => {
            drop(outbound_tx);
            send_task.abort();
            return Err(err);
        }
    };

    let room_id = hello.room_id.clone();
    let user_id = hello.peer.user_id.clone();

    let registered = register_client(
        &state,
        &room_id,
        Connection {
            peer: hello.peer.clone(),
            tx: outbound_tx.clone(),
        },
    )
    .await;

    if let Err(err) = registered {
        send_control(
            &outbound_tx,
            ControlMessage::Error {
                message: err.clone(),
            },
        );
        drop(outbound_tx);
        let _ = send_task.await;
        return Err(err);
    }

    info!(user_id = %user_id, room_id = %room_id, "member joined");

    let mut rate_limiter = TokenBucket::new(RATE_LIMIT_BURST, RATE_LIMIT_PER_SECOND);

    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket receive error: {}", err);
                break;
            }
        };

        let data = match message {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => continue,
        };

        if data.len() > MAX_FRAME_BYTES {
            warn!("dropping oversized message from {}", user_id);
            continue;
        }

        let wire = match decode_frame(&data) {
            Ok(wire) => wire,
            Err(err) => {
                warn!("failed to decode frame from {}: {}", user_id, err);
                continue;
            }
        };

        match wire {
            WireMessage::Relayed(envelope) => {
                if envelope.sender_id != user_id {
                    warn!("sender id mismatch from {}", user_id);
                    continue;
                }
                if !envelope.payload.is_relayable() {
                    warn!(
                        kind = envelope.payload.kind(),
                        "refusing to relay payload from {}", user_id
                    );
                    continue;
                }
                if !rate_limiter.consume(1.0) {
                    warn!("rate limit exceeded for {}", user_id);
                    continue;
                }

                forward_relayed(&state, &room_id, &user_id, envelope).await;
            }
            WireMessage::Control(ControlMessage::Signal(signal)) => {
                if signal.from != user_id {
                    warn!("signal sender mismatch from {}", user_id);
                    continue;
                }
                if !rate_limiter.consume(1.0) {
                    warn!("rate limit exceeded for {}", user_id);
                    continue;
                }

                forward_signal(&state, &room_id, signal).await;
            }
            WireMessage::Control(ControlMessage::Heartbeat) => {}
            WireMessage::Control(_) => {
                warn!("unexpected control message after hello from {}", user_id);
            }
            WireMessage::Direct(_) => {
                warn!("direct payload sent to relay by {}", user_id);
            }
        }
    }

    unregister_client(&state, &room_id, &user_id).await;
    send_task.abort();
    info!(user_id = %user_id, room_id = %room_id, "member left");
    Ok(())
}

fn parse_hello_message(message: &Message) -> Result<Hello, String> {
    let data = match message {
        Message::Binary(data) => data,
        _ => return Err("first message must be binary hello frame".to_owned()),
    };

    let frame = decode_frame(data).map_err(|err| format!("invalid hello frame: {}", err))?;
    match frame {
        WireMessage::Control(ControlMessage::Hello(hello)) => {
            if hello.room_id.trim().is_empty() {
                return Err("room_id cannot be empty".to_owned());
            }
            if hello.peer.user_id.trim().is_empty() {
                return Err("user_id cannot be empty".to_owned());
            }
            if hello.peer.nickname.trim().is_empty() {
                return Err("nickname cannot be empty".to_owned());
            }
            Ok(hello)
        }
        _ => Err("first control message must be Hello".to_owned()),
    }
}

async fn register_client(
    state: &AppState,
    room_id: &RoomId,
    connection: Connection,
) -> Result<(), String> {
    let mut relay = state.inner.write().await;
    let room = relay.rooms.entry(room_id.clone()).or_default();
    if room.members.contains_key(&connection.peer.user_id) {
        return Err(format!(
            "user {} is already present in room",
            connection.peer.user_id
        ));
    }
    if room.members.len() >= MAX_RELAY_MEMBERS_PER_ROOM {
        return Err(format!(
            "room {} is full (max {})",
            room_id, MAX_RELAY_MEMBERS_PER_ROOM
        ));
    }
    room.members
        .insert(connection.peer.user_id.clone(), connection.clone());

    let peers = room
        .members
        .values()
        .map(|conn| conn.peer.clone())
        .collect::<Vec<_>>();
    let others = room
        .members
        .values()
        .filter(|conn| conn.peer.user_id != connection.peer.user_id)
        .map(|conn| conn.tx.clone())
        .collect::<Vec<_>>();
    drop(relay);

    let peer_list = ControlMessage::PeerList(PeerList {
        room_id: room_id.clone(),
        peers,
    });

    // The newcomer's PeerList doubles as its join acknowledgement.
    send_control(&connection.tx, peer_list.clone());
    broadcast_control(others.clone(), peer_list);
    broadcast_control(
        others,
        ControlMessage::PeerJoined(PeerJoined {
            room_id: room_id.clone(),
            peer: connection.peer,
        }),
    );

    Ok(())
}

async fn unregister_client(state: &AppState, room_id: &RoomId, user_id: &UserId) {
    let mut relay = state.inner.write().await;
    let mut recipients = Vec::new();
    let mut peers = Vec::new();
    let mut departed = None;
    if let Some(room) = relay.rooms.get_mut(room_id) {
        departed = room.members.remove(user_id).map(|conn| conn.peer);
        recipients = room.members.values().map(|conn| conn.tx.clone()).collect();
        peers = room
            .members
            .values()
            .map(|conn| conn.peer.clone())
            .collect();
        if room.members.is_empty() {
            relay.rooms.remove(room_id);
        }
    }
    drop(relay);

    let Some(departed) = departed else {
        return;
    };
    if recipients.is_empty() {
        return;
    }

    broadcast_control(
        recipients.clone(),
        ControlMessage::PeerLeft(PeerLeft {
            room_id: room_id.clone(),
            peer: departed,
        }),
    );
    broadcast_control(
        recipients,
        ControlMessage::PeerList(PeerList {
            room_id: room_id.clone(),
            peers,
        }),
    );
}

async fn forward_relayed(
    state: &AppState,
    room_id: &RoomId,
    sender_id: &UserId,
    envelope: RelayEnvelope,
) {
    let recipients = {
        let relay = state.inner.read().await;
        relay
            .rooms
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter(|(user_id, _)| *user_id != sender_id)
                    .map(|(_, conn)| conn.tx.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    };

    match encode_frame(&WireMessage::Relayed(envelope)) {
        Ok(frame) => {
            for tx in recipients {
                let _ = tx.send(Message::Binary(frame.clone().into()));
            }
        }
        Err(err) => error!("failed to re-encode relayed payload: {}", err),
    }
}

async fn forward_signal(state: &AppState, room_id: &RoomId, signal: SignalEnvelope) {
    let target = {
        let relay = state.inner.read().await;
        relay
            .rooms
            .get(room_id)
            .and_then(|room| room.members.get(&signal.to))
            .map(|conn| conn.tx.clone())
    };

    match target {
        Some(tx) => {
            debug!(from = %signal.from, to = %signal.to, "forwarding signal");
            send_control(&tx, ControlMessage::Signal(signal));
        }
        None => warn!(to = %signal.to, "signal target not in room"),
    }
}

fn send_control(tx: &mpsc::UnboundedSender<Message>, control: ControlMessage) {
    broadcast_control(vec![tx.clone()], control);
}

fn broadcast_control(recipients: Vec<mpsc::UnboundedSender<Message>>, control: ControlMessage) {
    let frame = match encode_frame(&WireMessage::Control(control)) {
        Ok(frame) => frame,
        Err(err) => {
            error!("failed to serialize control message: {}", err);
            return;
        }
    };

    for tx in recipients {
        let _ = tx.send(Message::Binary(frame.clone().into()));
    }
}
