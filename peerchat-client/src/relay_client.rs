//! WebSocket client for `peerchat-relay`: room membership, relayed chat and
//! signal exchange.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{SinkExt, StreamExt, future::BoxFuture};
use peerchat_core::{
    ControlMessage, Hello, PeerInfo, PeerPayload, RelayEnvelope, RoomId, SignalEnvelope, UserId,
    WireMessage, decode_frame, encode_frame, now_unix_ms,
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    error::SignalingError,
    event::{EventSink, SignalingEvent},
    transport::SignalingService,
};

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
const BACKOFF_BASE_MS: u64 = 200;
const JOIN_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

struct Membership {
    room_id: RoomId,
    user_id: UserId,
    nickname: String,
    outgoing: mpsc::UnboundedSender<WireMessage>,
    members: Arc<Mutex<Vec<PeerInfo>>>,
    receive_task: JoinHandle<()>,
}

/// [`SignalingService`] backed by a relay WebSocket connection. One
/// connection per joined room.
pub struct RelaySignaling {
    relay_url: String,
    membership: Mutex<Option<Membership>>,
}

impl RelaySignaling {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            membership: Mutex::new(None),
        }
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    fn validate_url(&self) -> Result<(), SignalingError> {
        let url = Url::parse(&self.relay_url)
            .map_err(|err| SignalingError::InvalidUrl(format!("{}: {err}", self.relay_url)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(SignalingError::InvalidUrl(format!(
                "unsupported scheme {other}"
            ))),
        }
    }

    fn with_membership<T>(
        &self,
        f: impl FnOnce(&Membership) -> Result<T, SignalingError>,
    ) -> Result<T, SignalingError> {
        let guard = self.membership.lock().map_err(|_| SignalingError::Closed)?;
        let membership = guard.as_ref().ok_or(SignalingError::NotJoined)?;
        f(membership)
    }

    fn queue(&self, message: WireMessage) -> Result<(), SignalingError> {
        self.with_membership(|membership| {
            membership
                .outgoing
                .send(message)
                .map_err(|_| SignalingError::Closed)
        })
    }

    fn take_membership(&self) -> Option<Membership> {
        self.membership.lock().ok().and_then(|mut guard| guard.take())
    }

    async fn connect(&self) -> Result<WsStream, SignalingError> {
        let mut attempt: u32 = 1;
        loop {
            info!(
                attempt,
                max_attempts = MAX_CONNECT_ATTEMPTS,
                relay_url = %self.relay_url,
                "connecting to relay"
            );

            let failure = match timeout(CONNECT_TIMEOUT, connect_async(&self.relay_url)).await {
                Ok(Ok((stream, _))) => return Ok(stream),
                Ok(Err(err)) => format!("connect failed: {err}"),
                Err(_) => format!("connect timed out after {CONNECT_TIMEOUT:?}"),
            };
            error!(attempt, relay_url = %self.relay_url, "{failure}");
            if attempt >= MAX_CONNECT_ATTEMPTS {
                return Err(SignalingError::Connect(failure));
            }

            let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            attempt += 1;
        }
    }

    async fn join(
        &self,
        room_id: RoomId,
        user_id: UserId,
        nickname: String,
        events: EventSink,
    ) -> Result<(), SignalingError> {
        if let Some(previous) = self.take_membership() {
            previous.receive_task.abort();
        }

        let ws_stream = self.connect().await?;
        let (write_half, mut read_half) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<WireMessage>();
        tokio::spawn(network_send_task(write_half, outgoing_rx));

        let hello = ControlMessage::Hello(Hello {
            room_id: room_id.clone(),
            peer: PeerInfo {
                user_id: user_id.clone(),
                nickname: nickname.clone(),
            },
        });
        outgoing_tx
            .send(WireMessage::Control(hello))
            .map_err(|_| SignalingError::Closed)?;

        let members = timeout(JOIN_ACK_TIMEOUT, await_join_ack(&mut read_half, &room_id))
            .await
            .map_err(|_| SignalingError::Timeout)??;
        info!(room_id = %room_id, members = members.len(), "joined relay room");

        let members = Arc::new(Mutex::new(members));
        let receive_task = tokio::spawn(network_receive_task(
            read_half,
            user_id.clone(),
            Arc::clone(&members),
            events,
        ));

        let membership = Membership {
            room_id,
            user_id,
            nickname,
            outgoing: outgoing_tx,
            members,
            receive_task,
        };
        match self.membership.lock() {
            Ok(mut guard) => {
                *guard = Some(membership);
                Ok(())
            }
            Err(_) => {
                membership.receive_task.abort();
                Err(SignalingError::Closed)
            }
        }
    }
}

impl SignalingService for RelaySignaling {
    fn initialize(&self) -> BoxFuture<'_, Result<(), SignalingError>> {
        Box::pin(async move { self.validate_url() })
    }

    fn join_room(
        &self,
        room_id: String,
        user_id: UserId,
        nickname: String,
        events: EventSink,
    ) -> BoxFuture<'_, Result<(), SignalingError>> {
        Box::pin(self.join(room_id, user_id, nickname, events))
    }

    fn leave_room(&self) -> BoxFuture<'_, Result<(), SignalingError>> {
        Box::pin(async move {
            match self.take_membership() {
                Some(membership) => {
                    debug!(room_id = %membership.room_id, "leaving relay room");
                    membership.receive_task.abort();
                    // Dropping the sender ends the send task, which closes the socket.
                    drop(membership.outgoing);
                    Ok(())
                }
                None => Err(SignalingError::NotJoined),
            }
        })
    }

    fn room_users(&self) -> BoxFuture<'_, Result<Vec<PeerInfo>, SignalingError>> {
        Box::pin(async move {
            self.with_membership(|membership| {
                membership
                    .members
                    .lock()
                    .map(|members| members.clone())
                    .map_err(|_| SignalingError::Closed)
            })
        })
    }

    fn send_message(&self, payload: &PeerPayload) -> Result<(), SignalingError> {
        let sender_id = self.with_membership(|membership| Ok(membership.user_id.clone()))?;
        self.queue(WireMessage::Relayed(RelayEnvelope {
            sender_id,
            payload: payload.clone(),
        }))
    }

    fn send_typing_indicator(&self, is_typing: bool) -> Result<(), SignalingError> {
        let payload = self.with_membership(|membership| {
            Ok(PeerPayload::Typing {
                user_id: membership.user_id.clone(),
                nickname: membership.nickname.clone(),
                is_typing,
                timestamp_unix_ms: now_unix_ms(),
            })
        })?;
        self.send_message(&payload)
    }

    fn send_signal(&self, to_peer: &str, signal: serde_json::Value) -> Result<(), SignalingError> {
        let from = self.with_membership(|membership| Ok(membership.user_id.clone()))?;
        self.queue(WireMessage::Control(ControlMessage::Signal(SignalEnvelope {
            from,
            to: to_peer.to_string(),
            signal,
        })))
    }
}

impl Drop for RelaySignaling {
    fn drop(&mut self) {
        if let Some(membership) = self.take_membership() {
            membership.receive_task.abort();
        }
    }
}

async fn await_join_ack(
    read_half: &mut WsRead,
    room_id: &str,
) -> Result<Vec<PeerInfo>, SignalingError> {
    while let Some(next) = read_half.next().await {
        let message = next.map_err(|err| SignalingError::Connect(err.to_string()))?;
        let data = match message {
            Message::Binary(data) => data,
            Message::Close(_) => return Err(SignalingError::Closed),
            _ => continue,
        };
        match decode_frame(&data)? {
            WireMessage::Control(ControlMessage::PeerList(list)) if list.room_id == room_id => {
                return Ok(list.peers);
            }
            WireMessage::Control(ControlMessage::Error { message }) => {
                return Err(SignalingError::Rejected(message));
            }
            other => debug!(?other, "ignoring frame before join acknowledgement"),
        }
    }
    Err(SignalingError::Closed)
}

async fn network_send_task(
    mut ws_write: WsWrite,
    mut outgoing_rx: mpsc::UnboundedReceiver<WireMessage>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        let message = tokio::select! {
            message = outgoing_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = heartbeat.tick() => WireMessage::Control(ControlMessage::Heartbeat),
        };
        match encode_frame(&message) {
            Ok(frame) => {
                if ws_write.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!("failed to encode outgoing frame: {err}"),
        }
    }
    let _ = ws_write.close().await;
}

async fn network_receive_task(
    mut ws_read: WsRead,
    local_id: UserId,
    members: Arc<Mutex<Vec<PeerInfo>>>,
    events: EventSink,
) {
    while let Some(next) = ws_read.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!("relay read failed: {err}");
                break;
            }
        };
        let data = match message {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame = match decode_frame(&data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("decode frame failed: {err}");
                continue;
            }
        };

        let delivered = match frame {
            WireMessage::Relayed(envelope) => {
                if envelope.sender_id == local_id {
                    continue;
                }
                events.signaling(SignalingEvent::Message {
                    payload: envelope.payload,
                    sender_id: envelope.sender_id,
                })
            }
            WireMessage::Control(ControlMessage::PeerList(list)) => {
                if let Ok(mut cached) = members.lock() {
                    *cached = list.peers;
                }
                continue;
            }
            WireMessage::Control(ControlMessage::PeerJoined(joined)) => {
                if joined.peer.user_id == local_id {
                    continue;
                }
                events.signaling(SignalingEvent::PeerJoined {
                    peer_id: joined.peer.user_id,
                    nickname: joined.peer.nickname,
                    existing: false,
                })
            }
            WireMessage::Control(ControlMessage::PeerLeft(left)) => {
                if let Ok(mut cached) = members.lock() {
                    cached.retain(|member| member.user_id != left.peer.user_id);
                }
                events.signaling(SignalingEvent::PeerLeft {
                    peer_id: left.peer.user_id,
                    nickname: Some(left.peer.nickname),
                })
            }
            WireMessage::Control(ControlMessage::Signal(envelope)) => {
                if envelope.to != local_id {
                    continue;
                }
                events.signaling(SignalingEvent::Signal {
                    from: envelope.from,
                    signal: envelope.signal,
                })
            }
            WireMessage::Control(ControlMessage::Error { message }) => {
                warn!("relay reported an error: {message}");
                continue;
            }
            WireMessage::Control(_) => continue,
            WireMessage::Direct(payload) => {
                warn!(kind = payload.kind(), "unexpected direct frame from relay");
                continue;
            }
        };
        if !delivered {
            return;
        }
    }

    info!("relay connection closed");
    let departed = members
        .lock()
        .map(|mut cached| std::mem::take(&mut *cached))
        .unwrap_or_default();
    for member in departed.into_iter().filter(|member| member.user_id != local_id) {
        events.signaling(SignalingEvent::PeerLeft {
            peer_id: member.user_id,
            nickname: Some(member.nickname),
        });
    }
}
