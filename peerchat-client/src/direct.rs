//! Direct peer links over plain TCP.
//!
//! The initiator advertises its listener address through signaling; the other
//! side dials it and introduces itself with a `Hello` frame. Links carry
//! `Direct` frames plus periodic heartbeats and are dropped when idle.

use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use peerchat_core::{
    ControlMessage, Hello, PeerInfo, PeerPayload, RoomId, UserId, WireMessage, decode_frame,
    encode_frame, frame_body_len,
};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    event::{EventSink, TransportEvent},
    transport::{PeerTransport, SignalingService, TransportFactory},
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle tolerance while the local user has a file picker open.
pub const FILE_SELECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectConfig {
    pub bind: SocketAddr,
    /// Address announced to peers when it differs from the bound one.
    pub advertise_ip: Option<IpAddr>,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub file_selection_idle_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertise_ip: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            idle_timeout: IDLE_TIMEOUT,
            file_selection_idle_timeout: FILE_SELECTION_IDLE_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Connection-setup messages exchanged through signaling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectSignal {
    Offer { addr: SocketAddr },
}

#[derive(Debug, Clone, Default)]
pub struct TcpTransportFactory {
    config: DirectConfig,
}

impl TcpTransportFactory {
    pub fn new(config: DirectConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(
        &self,
        room_id: &str,
        local: &PeerInfo,
        signaling: Arc<dyn SignalingService>,
        events: EventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = TcpTransport::bind(self.config, room_id, local, signaling, events)?;
        Ok(Arc::new(transport))
    }
}

struct Link {
    id: u64,
    outgoing: mpsc::UnboundedSender<WireMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct Shared {
    config: DirectConfig,
    room_id: RoomId,
    local: PeerInfo,
    advertised: SocketAddr,
    signaling: Arc<dyn SignalingService>,
    events: EventSink,
    links: Mutex<HashMap<UserId, Link>>,
    /// Peers this side sent an offer to; only they may dial in.
    offered: Mutex<HashSet<UserId>>,
    next_link_id: AtomicU64,
    file_selection_active: AtomicBool,
    closed: AtomicBool,
}

pub struct TcpTransport {
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl TcpTransport {
    pub fn bind(
        config: DirectConfig,
        room_id: &str,
        local: &PeerInfo,
        signaling: Arc<dyn SignalingService>,
        events: EventSink,
    ) -> Result<Self, TransportError> {
        let listener = std::net::TcpListener::bind(config.bind)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;
        let advertised =
            SocketAddr::new(config.advertise_ip.unwrap_or(local_addr.ip()), local_addr.port());
        info!(local = %local_addr, %advertised, "direct transport listening");

        let shared = Arc::new(Shared {
            config,
            room_id: room_id.to_string(),
            local: local.clone(),
            advertised,
            signaling,
            events,
            links: Mutex::new(HashMap::new()),
            offered: Mutex::new(HashSet::new()),
            next_link_id: AtomicU64::new(1),
            file_selection_active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        Ok(Self {
            shared,
            accept_task,
        })
    }

    pub fn advertised_addr(&self) -> SocketAddr {
        self.shared.advertised
    }
}

impl PeerTransport for TcpTransport {
    fn send(&self, payload: &PeerPayload) -> Result<(), TransportError> {
        let links = self
            .shared
            .links
            .lock()
            .map_err(|_| TransportError::Closed)?;
        if links.is_empty() {
            return Err(TransportError::NotConnected);
        }
        let message = WireMessage::Direct(payload.clone());
        let delivered = links
            .values()
            .filter(|link| link.outgoing.send(message.clone()).is_ok())
            .count();
        if delivered == 0 {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn create_connection(
        &self,
        peer_id: &str,
        initiator: bool,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        let peer_id = peer_id.to_string();
        Box::pin(async move {
            if self.shared.closed.load(Ordering::Relaxed) {
                return Err(TransportError::Closed);
            }
            if !initiator {
                return Ok(());
            }
            let offer = DirectSignal::Offer {
                addr: self.shared.advertised,
            };
            let signal = serde_json::to_value(&offer)
                .map_err(|err| TransportError::BadSignal(err.to_string()))?;
            debug!(peer = %peer_id, "sending direct offer");
            if let Ok(mut offered) = self.shared.offered.lock() {
                offered.insert(peer_id.clone());
            }
            self.shared.signaling.send_signal(&peer_id, signal)?;
            Ok(())
        })
    }

    fn handle_incoming_signal(&self, from_peer: &str, signal: serde_json::Value) {
        if self.shared.closed.load(Ordering::Relaxed) {
            return;
        }
        match serde_json::from_value::<DirectSignal>(signal) {
            Ok(DirectSignal::Offer { addr }) => {
                debug!(peer = %from_peer, %addr, "dialing offered address");
                tokio::spawn(dial(Arc::clone(&self.shared), from_peer.to_string(), addr));
            }
            Err(err) => warn!(peer = %from_peer, "ignoring malformed signal: {err}"),
        }
    }

    fn handle_peer_disconnected(&self, peer_id: &str) {
        if let Ok(mut offered) = self.shared.offered.lock() {
            offered.remove(peer_id);
        }
        let removed = self
            .shared
            .links
            .lock()
            .ok()
            .and_then(|mut links| links.remove(peer_id));
        if let Some(link) = removed {
            debug!(peer = %peer_id, "dropping direct link");
            link.abort();
        }
    }

    fn connected_peer_ids(&self) -> Vec<UserId> {
        self.shared
            .links
            .lock()
            .map(|links| links.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn set_file_selection_active(&self, active: bool) {
        self.shared
            .file_selection_active
            .store(active, Ordering::Relaxed);
    }

    fn disconnect(&self) {
        if self.shared.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        self.accept_task.abort();
        let links: Vec<Link> = self
            .shared
            .links
            .lock()
            .map(|mut links| links.drain().map(|(_, link)| link).collect())
            .unwrap_or_default();
        for link in links {
            link.abort();
        }
        info!("direct transport closed");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(%remote, "incoming direct connection");
                tokio::spawn(accept_handshake(Arc::clone(&shared), stream));
            }
            Err(err) => {
                warn!("accept failed: {err}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn accept_handshake(shared: Arc<Shared>, mut stream: TcpStream) {
    let frame = match timeout(shared.config.handshake_timeout, read_frame(&mut stream)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(err)) => {
            warn!("direct handshake failed: {err}");
            return;
        }
        Err(_) => {
            warn!("direct handshake timed out");
            return;
        }
    };
    match frame {
        WireMessage::Control(ControlMessage::Hello(hello)) if hello.room_id == shared.room_id => {
            let expected = shared
                .offered
                .lock()
                .is_ok_and(|mut offered| offered.remove(&hello.peer.user_id));
            if !expected {
                warn!(peer = %hello.peer.user_id, "direct hello from a peer without an offer");
                return;
            }
            debug!(peer = %hello.peer.user_id, nickname = %hello.peer.nickname, "direct hello");
            register_link(&shared, hello.peer.user_id, stream);
        }
        WireMessage::Control(ControlMessage::Hello(hello)) => {
            warn!(room_id = %hello.room_id, "direct hello for another room");
        }
        _ => warn!("first direct frame was not a hello"),
    }
}

async fn dial(shared: Arc<Shared>, peer_id: UserId, addr: SocketAddr) {
    let mut stream = match timeout(shared.config.handshake_timeout, TcpStream::connect(addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            warn!(peer = %peer_id, %addr, "dial failed: {err}");
            return;
        }
        Err(_) => {
            warn!(peer = %peer_id, %addr, "dial timed out");
            return;
        }
    };

    let hello = WireMessage::Control(ControlMessage::Hello(Hello {
        room_id: shared.room_id.clone(),
        peer: shared.local.clone(),
    }));
    if let Err(err) = write_frame(&mut stream, &hello).await {
        warn!(peer = %peer_id, "sending direct hello failed: {err}");
        return;
    }
    if shared.closed.load(Ordering::Relaxed) {
        return;
    }
    register_link(&shared, peer_id, stream);
}

fn register_link(shared: &Arc<Shared>, peer_id: UserId, stream: TcpStream) {
    if shared.closed.load(Ordering::Relaxed) {
        return;
    }
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let id = shared.next_link_id.fetch_add(1, Ordering::Relaxed);

    let writer = tokio::spawn(link_writer(
        write_half,
        outgoing_rx,
        shared.config.heartbeat_interval,
    ));
    let reader = tokio::spawn(link_reader(
        read_half,
        Arc::clone(shared),
        peer_id.clone(),
        id,
    ));

    let link = Link {
        id,
        outgoing: outgoing_tx,
        reader,
        writer,
    };
    let previous = match shared.links.lock() {
        Ok(mut links) => links.insert(peer_id.clone(), link),
        Err(_) => {
            link.abort();
            return;
        }
    };
    if let Some(previous) = previous {
        previous.abort();
    }
    info!(peer = %peer_id, "direct link registered");
    shared
        .events
        .transport(TransportEvent::PeerConnected(peer_id));
}

async fn link_writer<W>(
    mut writer: W,
    mut outgoing_rx: mpsc::UnboundedReceiver<WireMessage>,
    heartbeat_interval: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    loop {
        let message = tokio::select! {
            message = outgoing_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = heartbeat.tick() => WireMessage::Control(ControlMessage::Heartbeat),
        };
        if let Err(err) = write_frame(&mut writer, &message).await {
            debug!("direct write failed: {err}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn link_reader<R>(mut reader: R, shared: Arc<Shared>, peer_id: UserId, link_id: u64)
where
    R: AsyncRead + Unpin,
{
    loop {
        let limit = if shared.file_selection_active.load(Ordering::Relaxed) {
            shared.config.file_selection_idle_timeout
        } else {
            shared.config.idle_timeout
        };
        let frame = match timeout(limit, read_frame(&mut reader)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                debug!(peer = %peer_id, "direct read ended: {err}");
                break;
            }
            Err(_) => {
                warn!(peer = %peer_id, idle = ?limit, "direct link idle, dropping");
                break;
            }
        };
        match frame {
            WireMessage::Direct(payload) => {
                let delivered = shared.events.transport(TransportEvent::Message {
                    payload,
                    peer_id: peer_id.clone(),
                });
                if !delivered {
                    return;
                }
            }
            WireMessage::Control(ControlMessage::Heartbeat) => {}
            other => debug!(peer = %peer_id, ?other, "ignoring unexpected direct frame"),
        }
    }

    let removed = shared
        .links
        .lock()
        .ok()
        .and_then(|mut links| {
            let current = links.get(&peer_id).is_some_and(|link| link.id == link_id);
            if current { links.remove(&peer_id) } else { None }
        });
    if let Some(link) = removed {
        link.writer.abort();
        info!(peer = %peer_id, "direct link closed");
        shared
            .events
            .transport(TransportEvent::PeerDisconnected(peer_id));
    }
}

async fn read_frame<R>(reader: &mut R) -> Result<WireMessage, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let body_len = frame_body_len(header)?;
    let mut frame = vec![0u8; 4 + body_len];
    frame[..4].copy_from_slice(&header);
    reader.read_exact(&mut frame[4..]).await?;
    Ok(decode_frame(&frame)?)
}

async fn write_frame<W>(writer: &mut W, message: &WireMessage) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_signal_shape() {
        let offer = DirectSignal::Offer {
            addr: SocketAddr::from(([127, 0, 0, 1], 4100)),
        };
        let value = serde_json::to_value(&offer).expect("serialize offer");
        assert_eq!(
            value,
            serde_json::json!({"kind": "offer", "addr": "127.0.0.1:4100"})
        );
        let parsed: DirectSignal = serde_json::from_value(value).expect("parse offer");
        assert_eq!(parsed, offer);
    }

    #[tokio::test]
    async fn frames_survive_a_byte_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let message = WireMessage::Control(ControlMessage::Heartbeat);
        write_frame(&mut client, &message)
            .await
            .expect("write frame");
        let read = read_frame(&mut server).await.expect("read frame");
        assert_eq!(read, message);
    }
}
