#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::BoxFuture;
use peerchat_client::{
    EventSink, Orchestrator, PeerTransport, SessionConfig, SignalingError, SignalingService,
    TransportError, TransportEvent, TransportFactory, UiEvent, prefs::MemoryStore,
};
use peerchat_core::{ChatMessage, PeerInfo, PeerPayload, UserId};
use tokio::{sync::mpsc, time::Instant};

/// Sorts before any generated user id.
pub const LOW_PEER: &str = "aaa-peer";
/// Sorts after any generated user id.
pub const HIGH_PEER: &str = "zed-peer";
pub const HIGH_PEER_2: &str = "zed-peer-2";

#[derive(Debug, Clone)]
pub struct JoinCall {
    pub room_id: String,
    pub user_id: UserId,
    pub nickname: String,
}

#[derive(Default)]
pub struct FakeSignalingState {
    pub members: Vec<PeerInfo>,
    pub joined: Option<JoinCall>,
    pub sink: Option<EventSink>,
    pub join_calls: Vec<JoinCall>,
    pub leave_calls: usize,
    pub relayed: Vec<PeerPayload>,
    pub typing: Vec<bool>,
    pub signals: Vec<(UserId, serde_json::Value)>,
    pub fail_initialize: bool,
    pub fail_join: bool,
    pub fail_send: bool,
}

#[derive(Default)]
pub struct FakeSignaling {
    pub state: Mutex<FakeSignalingState>,
}

impl FakeSignaling {
    pub fn with_members(members: &[(&str, &str)]) -> Arc<Self> {
        let signaling = Self::default();
        signaling.set_members(members);
        Arc::new(signaling)
    }

    pub fn set_members(&self, members: &[(&str, &str)]) {
        self.state.lock().expect("signaling state").members = members
            .iter()
            .map(|(user_id, nickname)| PeerInfo {
                user_id: (*user_id).to_owned(),
                nickname: (*nickname).to_owned(),
            })
            .collect();
    }

    pub fn sink(&self) -> EventSink {
        self.state
            .lock()
            .expect("signaling state")
            .sink
            .clone()
            .expect("joined")
    }

    pub fn set_fail_join(&self, fail: bool) {
        self.state.lock().expect("signaling state").fail_join = fail;
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().expect("signaling state").fail_send = fail;
    }

    pub fn typing(&self) -> Vec<bool> {
        self.state.lock().expect("signaling state").typing.clone()
    }

    pub fn relayed(&self) -> Vec<PeerPayload> {
        self.state.lock().expect("signaling state").relayed.clone()
    }

    pub fn join_calls(&self) -> Vec<JoinCall> {
        self.state.lock().expect("signaling state").join_calls.clone()
    }

    pub fn leave_calls(&self) -> usize {
        self.state.lock().expect("signaling state").leave_calls
    }
}

impl SignalingService for FakeSignaling {
    fn initialize(&self) -> BoxFuture<'_, Result<(), SignalingError>> {
        Box::pin(async move {
            if self.state.lock().expect("signaling state").fail_initialize {
                return Err(SignalingError::Connect("relay offline".to_owned()));
            }
            Ok(())
        })
    }

    fn join_room(
        &self,
        room_id: String,
        user_id: UserId,
        nickname: String,
        events: EventSink,
    ) -> BoxFuture<'_, Result<(), SignalingError>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("signaling state");
            let call = JoinCall {
                room_id,
                user_id,
                nickname,
            };
            state.join_calls.push(call.clone());
            if state.fail_join {
                return Err(SignalingError::Rejected("room unavailable".to_owned()));
            }
            state.joined = Some(call);
            state.sink = Some(events);
            Ok(())
        })
    }

    fn leave_room(&self) -> BoxFuture<'_, Result<(), SignalingError>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("signaling state");
            state.leave_calls += 1;
            state.joined = None;
            Ok(())
        })
    }

    fn room_users(&self) -> BoxFuture<'_, Result<Vec<PeerInfo>, SignalingError>> {
        Box::pin(async move {
            let state = self.state.lock().expect("signaling state");
            let joined = state.joined.as_ref().ok_or(SignalingError::NotJoined)?;
            let mut users = vec![PeerInfo {
                user_id: joined.user_id.clone(),
                nickname: joined.nickname.clone(),
            }];
            users.extend(state.members.iter().cloned());
            Ok(users)
        })
    }

    fn send_message(&self, payload: &PeerPayload) -> Result<(), SignalingError> {
        let mut state = self.state.lock().expect("signaling state");
        if state.fail_send {
            return Err(SignalingError::Closed);
        }
        state.relayed.push(payload.clone());
        Ok(())
    }

    fn send_typing_indicator(&self, is_typing: bool) -> Result<(), SignalingError> {
        self.state
            .lock()
            .expect("signaling state")
            .typing
            .push(is_typing);
        Ok(())
    }

    fn send_signal(&self, to_peer: &str, signal: serde_json::Value) -> Result<(), SignalingError> {
        self.state
            .lock()
            .expect("signaling state")
            .signals
            .push((to_peer.to_owned(), signal));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Link comes up as soon as it is requested.
    Immediate,
    /// Requests succeed but no link ever forms.
    Never,
    /// Every request errors.
    Fail,
}

pub struct FakeTransport {
    pub events: EventSink,
    behavior: ConnectBehavior,
    connected: Mutex<BTreeSet<UserId>>,
    attempts: Mutex<Vec<(UserId, bool, Instant)>>,
    sent: Mutex<Vec<PeerPayload>>,
    dropped: Mutex<Vec<UserId>>,
    file_selection: AtomicBool,
    disconnected: AtomicBool,
}

impl FakeTransport {
    pub fn connect_now(&self, peer_id: &str) {
        self.connected
            .lock()
            .expect("links")
            .insert(peer_id.to_owned());
        self.events
            .transport(TransportEvent::PeerConnected(peer_id.to_owned()));
    }

    pub fn deliver(&self, peer_id: &str, payload: PeerPayload) {
        self.events.transport(TransportEvent::Message {
            payload,
            peer_id: peer_id.to_owned(),
        });
    }

    pub fn attempts(&self) -> Vec<(UserId, bool, Instant)> {
        self.attempts.lock().expect("attempts").clone()
    }

    pub fn sent(&self) -> Vec<PeerPayload> {
        self.sent.lock().expect("sent").clone()
    }

    pub fn dropped(&self) -> Vec<UserId> {
        self.dropped.lock().expect("dropped").clone()
    }

    pub fn file_selection_active(&self) -> bool {
        self.file_selection.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl PeerTransport for FakeTransport {
    fn send(&self, payload: &PeerPayload) -> Result<(), TransportError> {
        if self.connected.lock().expect("links").is_empty() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().expect("sent").push(payload.clone());
        Ok(())
    }

    fn create_connection(
        &self,
        peer_id: &str,
        initiator: bool,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        let peer_id = peer_id.to_owned();
        Box::pin(async move {
            self.attempts
                .lock()
                .expect("attempts")
                .push((peer_id.clone(), initiator, Instant::now()));
            match self.behavior {
                ConnectBehavior::Immediate => {
                    self.connect_now(&peer_id);
                    Ok(())
                }
                ConnectBehavior::Never => Ok(()),
                ConnectBehavior::Fail => Err(TransportError::PeerUnavailable(peer_id)),
            }
        })
    }

    fn handle_incoming_signal(&self, _from_peer: &str, _signal: serde_json::Value) {}

    fn handle_peer_disconnected(&self, peer_id: &str) {
        self.connected.lock().expect("links").remove(peer_id);
        self.dropped.lock().expect("dropped").push(peer_id.to_owned());
    }

    fn connected_peer_ids(&self) -> Vec<UserId> {
        self.connected.lock().expect("links").iter().cloned().collect()
    }

    fn set_file_selection_active(&self, active: bool) {
        self.file_selection.store(active, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.connected.lock().expect("links").clear();
    }
}

pub struct FakeFactory {
    behavior: ConnectBehavior,
    preconnected: Vec<UserId>,
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeFactory {
    pub fn new(behavior: ConnectBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            preconnected: Vec::new(),
            created: Mutex::new(Vec::new()),
        })
    }

    /// Transports start with links to `peers` already up.
    pub fn preconnected(behavior: ConnectBehavior, peers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            preconnected: peers.iter().map(|peer| (*peer).to_owned()).collect(),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn latest(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .expect("created")
            .last()
            .cloned()
            .expect("a transport was created")
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().expect("created").len()
    }

    pub fn first(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .expect("created")
            .first()
            .cloned()
            .expect("a transport was created")
    }
}

impl TransportFactory for FakeFactory {
    fn create(
        &self,
        _room_id: &str,
        _local: &PeerInfo,
        _signaling: Arc<dyn SignalingService>,
        events: EventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = Arc::new(FakeTransport {
            events,
            behavior: self.behavior,
            connected: Mutex::new(self.preconnected.iter().cloned().collect()),
            attempts: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
            file_selection: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        });
        self.created
            .lock()
            .expect("created")
            .push(Arc::clone(&transport));
        Ok(transport)
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub ui: mpsc::UnboundedReceiver<UiEvent>,
    pub signaling: Arc<FakeSignaling>,
    pub factory: Arc<FakeFactory>,
    pub prefs: Arc<MemoryStore>,
}

impl Harness {
    pub fn new(
        config: SessionConfig,
        signaling: Arc<FakeSignaling>,
        factory: Arc<FakeFactory>,
    ) -> Self {
        Self::with_prefs(config, signaling, factory, Arc::new(MemoryStore::default()))
    }

    pub fn with_prefs(
        config: SessionConfig,
        signaling: Arc<FakeSignaling>,
        factory: Arc<FakeFactory>,
        prefs: Arc<MemoryStore>,
    ) -> Self {
        let (orchestrator, ui) = Orchestrator::new(
            config,
            Arc::clone(&signaling) as Arc<dyn SignalingService>,
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            Arc::clone(&prefs) as _,
        );
        Self {
            orchestrator,
            ui,
            signaling,
            factory,
            prefs,
        }
    }

    pub fn ui_events(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            events.push(event);
        }
        events
    }

    /// Lets spawned tasks run for `duration` of (paused) time, then handles
    /// everything they queued.
    pub async fn settle(&mut self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
        self.orchestrator.drain_events();
    }
}

pub fn chat(id: Option<&str>, sender_id: &str, text: &str, timestamp_unix_ms: u64) -> ChatMessage {
    ChatMessage {
        id: id.map(str::to_owned),
        text: text.to_owned(),
        sender_id: sender_id.to_owned(),
        nickname: "Bob".to_owned(),
        timestamp_unix_ms,
    }
}

pub fn incoming_chats(events: &[UiEvent]) -> Vec<ChatMessage> {
    events
        .iter()
        .filter_map(|event| match event {
            UiEvent::Chat {
                message,
                outgoing: false,
                ..
            } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

pub fn system_lines(events: &[UiEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            UiEvent::System(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn alerts(events: &[UiEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            UiEvent::Alert(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}
