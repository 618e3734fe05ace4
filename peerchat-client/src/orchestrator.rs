//! Session orchestrator: owns the session record and roster, reacts to
//! collaborator events and user commands, and publishes [`UiEvent`]s.
//!
//! All state lives in one task. Collaborators and spawned helpers report
//! back through [`EventSink`]s; events stamped with an older generation than
//! the current membership are discarded.

use std::{path::PathBuf, sync::Arc};

use peerchat_core::{
    ChatMessage, DEFAULT_NICKNAME, PeerInfo, PeerPayload, derive_id, normalize_nickname,
    normalize_room_code, now_unix_ms, room_id_from_code, should_initiate, validate_chat_text,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    config::SessionConfig,
    connect::{ConnectOutcome, ConnectTasks},
    dedup::DeliveryFilter,
    delivery::{Channel, deliver},
    error::{SessionError, TransportError},
    event::{EventSink, SessionEvent, SignalingEvent, TransportEvent, UiEvent},
    files::{self, Completion, FileSendEvent, IncomingFiles, TransferDirection},
    prefs::{NICKNAME_KEY, PreferenceStore},
    state::{Roster, RosterChange, Session, StatusView},
    timer::CancellableTimer,
    transport::{PeerTransport, SignalingService, TransportFactory},
};

pub const SEND_FAILED_ALERT: &str = "Failed to send message. Please check your connection.";
pub const RECONNECTED_NOTICE: &str = "Reconnected successfully";
pub const RECONNECT_FAILED_NOTICE: &str = "Reconnection failed. Please try again.";
pub const FILES_NEED_DIRECT_ALERT: &str = "Files can only be sent over a direct connection.";

/// User intents accepted by [`Orchestrator::run`].
#[derive(Debug, Clone)]
pub enum Command {
    Join {
        room_code: String,
        nickname: Option<String>,
    },
    SendText(String),
    InputActivity,
    FileSelectionStarted,
    FileSelectionFinished,
    SendFiles(Vec<PathBuf>),
    Reconnect,
    Leave,
    Quit,
}

pub struct Orchestrator {
    config: SessionConfig,
    signaling: Arc<dyn SignalingService>,
    factory: Arc<dyn TransportFactory>,
    prefs: Arc<dyn PreferenceStore>,

    session: Session,
    roster: Roster,
    transport: Option<Arc<dyn PeerTransport>>,
    signaling_ready: bool,
    generation: u64,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,

    typing: CancellableTimer,
    connects: ConnectTasks,
    file_sends: Vec<JoinHandle<()>>,
    pending_save: Option<JoinHandle<()>>,
    incoming: IncomingFiles,
    dedup: DeliveryFilter,

    status: StatusView,
    peer_count: (usize, usize),
    message_counter: u64,
}

impl Orchestrator {
    pub fn new(
        config: SessionConfig,
        signaling: Arc<dyn SignalingService>,
        factory: Arc<dyn TransportFactory>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let mut session = Session::new();
        session.saved_nickname = prefs.get(NICKNAME_KEY).filter(|nick| !nick.trim().is_empty());

        let dedup = DeliveryFilter::new(config.dedup_window);
        let orchestrator = Self {
            config,
            signaling,
            factory,
            prefs,
            session,
            roster: Roster::default(),
            transport: None,
            signaling_ready: false,
            generation: 0,
            events_tx,
            events_rx,
            ui_tx,
            typing: CancellableTimer::default(),
            connects: ConnectTasks::default(),
            file_sends: Vec::new(),
            pending_save: None,
            incoming: IncomingFiles::default(),
            dedup,
            status: StatusView::default(),
            peer_count: (0, 0),
            message_counter: 0,
        };
        (orchestrator, ui_rx)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn status(&self) -> StatusView {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connecting_to(&self, peer_id: &str) -> bool {
        self.connects.is_running(peer_id)
    }

    /// Sink stamped with the current generation.
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(self.generation, self.events_tx.clone())
    }

    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if self.signaling_ready {
            return Ok(());
        }
        match self.signaling.initialize().await {
            Ok(()) => {
                self.signaling_ready = true;
                Ok(())
            }
            Err(err) => {
                error!("signaling initialization failed: {err}");
                self.alert(format!("Could not reach the signaling service: {err}"));
                self.publish_status();
                Err(err.into())
            }
        }
    }

    pub async fn join(
        &mut self,
        room_code: &str,
        nickname: Option<&str>,
    ) -> Result<(), SessionError> {
        let room_code = match normalize_room_code(room_code) {
            Ok(room_code) => room_code,
            Err(err) => {
                self.alert(err.to_string());
                return Err(err.into());
            }
        };
        let nickname = nickname
            .map(normalize_nickname)
            .or_else(|| self.session.saved_nickname.clone())
            .unwrap_or_else(|| DEFAULT_NICKNAME.to_string());

        if self.session.is_joined() {
            self.leave().await;
        }
        self.initialize().await?;

        self.session.enter(room_code, nickname);
        self.establish_membership().await
    }

    /// Creates the transport, joins signaling and seeds the roster. On failure
    /// the session is left unjoined with its saved room intact.
    async fn establish_membership(&mut self) -> Result<(), SessionError> {
        let Some(room_code) = self.session.room_code.clone() else {
            return Err(SessionError::NotJoined);
        };
        self.generation += 1;
        let sink = self.event_sink();
        let room_id = room_id_from_code(&room_code);
        let user_id = self.session.user_id.clone();
        let nickname = self.session.nickname.clone();

        let local = PeerInfo {
            user_id: user_id.clone(),
            nickname: nickname.clone(),
        };
        let transport = match self.factory.create(
            &room_id,
            &local,
            Arc::clone(&self.signaling),
            sink.clone(),
        ) {
            Ok(transport) => transport,
            Err(err) => {
                error!("creating transport failed: {err}");
                self.session.clear_room();
                self.publish_status();
                return Err(err.into());
            }
        };
        self.transport = Some(Arc::clone(&transport));

        if let Err(err) = self
            .signaling
            .join_room(room_id, user_id.clone(), nickname.clone(), sink)
            .await
        {
            error!(room = %room_code, "joining room failed: {err}");
            transport.disconnect();
            self.transport = None;
            self.session.clear_room();
            self.alert(format!("Could not join room {room_code}: {err}"));
            self.publish_status();
            return Err(err.into());
        }

        self.persist_nickname(&nickname);
        info!(room = %room_code, user = %user_id, "joined room");
        self.emit(UiEvent::Joined {
            room_code,
            user_id: user_id.clone(),
            nickname,
        });

        // Every member is in the roster before the first election.
        match self.signaling.room_users().await {
            Ok(members) => {
                for member in &members {
                    self.admit_peer(&member.user_id, &member.nickname, true);
                }
                for member in &members {
                    self.elect(&member.user_id);
                }
            }
            Err(err) => warn!("querying room members failed: {err}"),
        }
        self.publish_status();
        Ok(())
    }

    /// Writes the nickname on the blocking pool; file stores may retry with
    /// backoff.
    fn persist_nickname(&mut self, nickname: &str) {
        let prefs = Arc::clone(&self.prefs);
        let nickname = nickname.to_string();
        let previous = self.pending_save.take();
        self.pending_save = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let saved =
                tokio::task::spawn_blocking(move || prefs.set(NICKNAME_KEY, &nickname)).await;
            match saved {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("saving nickname failed: {err}"),
                Err(err) => warn!("nickname save task failed: {err}"),
            }
        }));
    }

    /// Waits for an in-flight preference write.
    pub async fn flush_preferences(&mut self) {
        if let Some(handle) = self.pending_save.take() {
            let _ = handle.await;
        }
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if let Err(err) = validate_chat_text(text) {
            self.alert(err.to_string());
            return Err(err.into());
        }
        if !self.session.is_joined() {
            self.alert("Join a room before sending messages.".to_string());
            return Err(SessionError::NotJoined);
        }

        self.typing.cancel();
        self.send_typing(false);

        self.message_counter += 1;
        let timestamp_unix_ms = now_unix_ms();
        let message = ChatMessage {
            id: Some(derive_id(&[
                self.session.user_id.as_str(),
                timestamp_unix_ms.to_string().as_str(),
                self.message_counter.to_string().as_str(),
            ])),
            text: text.to_string(),
            sender_id: self.session.user_id.clone(),
            nickname: self.session.nickname.clone(),
            timestamp_unix_ms,
        };
        self.dedup.admit(message.delivery_key());

        let payload = PeerPayload::Chat(message.clone());
        match deliver(&payload, self.transport.as_deref(), self.signaling.as_ref()) {
            Ok(channel) => {
                debug!(%channel, "chat sent");
                self.emit(UiEvent::Chat {
                    message,
                    outgoing: true,
                    channel,
                });
                Ok(())
            }
            Err(err) => {
                warn!("sending chat failed: {err}");
                self.alert(SEND_FAILED_ALERT.to_string());
                Err(err)
            }
        }
    }

    pub fn input_activity(&mut self) {
        if !self.session.is_joined() {
            return;
        }
        self.send_typing(true);
        let sink = self.event_sink();
        self.typing.restart(self.config.typing_timeout, sink);
    }

    fn send_typing(&self, is_typing: bool) {
        if !self.session.is_joined() {
            return;
        }
        if let Some(transport) = self.transport.as_ref().filter(|t| t.is_connected()) {
            let payload = PeerPayload::Typing {
                user_id: self.session.user_id.clone(),
                nickname: self.session.nickname.clone(),
                is_typing,
                timestamp_unix_ms: now_unix_ms(),
            };
            match transport.send(&payload) {
                Ok(()) => return,
                Err(err) => debug!("direct typing notice failed: {err}"),
            }
        }
        if let Err(err) = self.signaling.send_typing_indicator(is_typing) {
            debug!("relayed typing notice failed: {err}");
        }
    }

    pub fn file_selection_started(&self) {
        if let Some(transport) = &self.transport {
            transport.set_file_selection_active(true);
        }
    }

    pub fn file_selection_finished(&self) {
        if let Some(transport) = &self.transport {
            transport.set_file_selection_active(false);
        }
    }

    /// Starts sending `paths` in the background. Progress arrives as events.
    pub fn send_files(&mut self, paths: Vec<PathBuf>) -> Result<(), SessionError> {
        if paths.is_empty() {
            return Ok(());
        }
        let Some(transport) = self
            .transport
            .clone()
            .filter(|transport| transport.is_connected())
        else {
            self.alert(FILES_NEED_DIRECT_ALERT.to_string());
            return Err(TransportError::NotConnected.into());
        };

        let sender = PeerInfo {
            user_id: self.session.user_id.clone(),
            nickname: self.session.nickname.clone(),
        };
        let sink = self.event_sink();
        self.file_sends.retain(|handle| !handle.is_finished());
        self.file_sends.push(tokio::spawn(files::send_files(
            transport,
            paths,
            sender,
            self.config.chunk_bytes,
            sink,
        )));
        Ok(())
    }

    /// Abandons the current identity and membership, then rejoins the saved
    /// room under a fresh user id.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        let Some(room_code) = self.session.saved_room_code.clone() else {
            info!("reconnect requested without a saved room");
            return Err(SessionError::NoSavedRoom);
        };
        let nickname = self
            .session
            .saved_nickname
            .clone()
            .unwrap_or_else(|| DEFAULT_NICKNAME.to_string());

        self.emit(UiEvent::Reconnecting);
        self.teardown().await;

        let abandoned = self.session.rotate_identity();
        info!(old = %abandoned, new = %self.session.user_id, "reconnecting with a new identity");
        self.session.enter(room_code, nickname);

        let result = match self.initialize().await {
            Ok(()) => self.establish_membership().await,
            Err(err) => {
                self.session.clear_room();
                Err(err)
            }
        };
        match &result {
            Ok(()) => self.system(RECONNECTED_NOTICE.to_string()),
            Err(err) => {
                warn!("reconnect failed: {err}");
                self.system(RECONNECT_FAILED_NOTICE.to_string());
            }
        }
        self.emit(UiEvent::ReconnectReady);
        self.publish_status();
        result
    }

    pub async fn leave(&mut self) {
        if !self.session.is_joined() && self.transport.is_none() {
            return;
        }
        self.teardown().await;
        info!("left room");
        self.emit(UiEvent::Left);
        self.publish_status();
    }

    /// Drops the transport and signaling membership along with every piece of
    /// per-membership state. Saved room and nickname survive.
    async fn teardown(&mut self) {
        self.generation += 1;
        self.connects.abort_all();
        self.typing.cancel();
        for handle in self.file_sends.drain(..) {
            handle.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.disconnect();
        }
        if self.session.is_joined() {
            if let Err(err) = self.signaling.leave_room().await {
                warn!("leaving signaling room failed: {err}");
            }
        }
        self.roster.clear();
        self.incoming.clear();
        self.session.clear_room();
        self.publish_status();
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transport { generation, event } => {
                if self.is_stale(generation) {
                    debug!(generation, "dropping stale transport event");
                    return;
                }
                self.on_transport_event(event);
            }
            SessionEvent::Signaling { generation, event } => {
                if self.is_stale(generation) {
                    debug!(generation, "dropping stale signaling event");
                    return;
                }
                self.on_signaling_event(event);
            }
            SessionEvent::TypingTimeout { seq } => {
                if self.typing.fire(seq) {
                    self.send_typing(false);
                }
            }
            SessionEvent::ConnectFinished {
                generation,
                peer_id,
                outcome,
            } => {
                if self.is_stale(generation) {
                    return;
                }
                self.on_connect_finished(&peer_id, outcome);
            }
            SessionEvent::FileSend { generation, event } => {
                if self.is_stale(generation) {
                    return;
                }
                self.on_file_send_event(event);
            }
        }
    }

    /// Handles every event that is already queued.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits for the next queued event and handles it.
    pub async fn step(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
    }

    pub async fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Join {
                room_code,
                nickname,
            } => {
                let _ = self.join(&room_code, nickname.as_deref()).await;
            }
            Command::SendText(text) => {
                let _ = self.send_text(&text).await;
            }
            Command::InputActivity => self.input_activity(),
            Command::FileSelectionStarted => self.file_selection_started(),
            Command::FileSelectionFinished => self.file_selection_finished(),
            Command::SendFiles(paths) => {
                let _ = self.send_files(paths);
            }
            Command::Reconnect => {
                if let Err(SessionError::NoSavedRoom) = self.reconnect().await {
                    self.alert("There is no room to reconnect to.".to_string());
                }
            }
            Command::Leave => self.leave().await,
            Command::Quit => {
                self.leave().await;
                self.flush_preferences().await;
                return false;
            }
        }
        true
    }

    /// Serves commands and collaborator events until `Quit` or until the
    /// command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.leave().await;
                        self.flush_preferences().await;
                        break;
                    };
                    if !self.execute(command).await {
                        break;
                    }
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { payload, peer_id } => {
                self.route_payload(payload, &peer_id, Channel::Direct);
            }
            TransportEvent::PeerConnected(peer_id) => {
                info!(peer = %peer_id, "direct link up");
                let nickname = self.display_name(&peer_id);
                self.system(format!("Direct connection established with {nickname}"));
                self.publish_status();
            }
            TransportEvent::PeerDisconnected(peer_id) => {
                info!(peer = %peer_id, "direct link down");
                self.publish_status();
            }
        }
    }

    fn on_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message { payload, sender_id } => {
                if !payload.is_relayable() {
                    warn!(
                        kind = payload.kind(),
                        sender = %sender_id,
                        "dropping non-relayable payload from relay"
                    );
                    return;
                }
                self.route_payload(payload, &sender_id, Channel::Relay);
            }
            SignalingEvent::PeerJoined {
                peer_id,
                nickname,
                existing,
            } => self.handle_peer_joined(&peer_id, &nickname, existing),
            SignalingEvent::PeerLeft { peer_id, nickname } => {
                self.handle_peer_left(&peer_id, nickname)
            }
            SignalingEvent::Signal { from, signal } => match &self.transport {
                Some(transport) => transport.handle_incoming_signal(&from, signal),
                None => debug!(from = %from, "signal without transport dropped"),
            },
        }
    }

    fn handle_peer_joined(&mut self, peer_id: &str, nickname: &str, existing: bool) {
        self.admit_peer(peer_id, nickname, existing);
        self.elect(peer_id);
    }

    /// Records a member in the roster and announces live arrivals.
    fn admit_peer(&mut self, peer_id: &str, nickname: &str, existing: bool) {
        if peer_id == self.session.user_id {
            return;
        }
        let change = self.roster.upsert(peer_id, nickname);
        if change == RosterChange::Rejoined {
            debug!(peer = %peer_id, "known peer joined again, dropping stale link");
            if let Some(transport) = &self.transport {
                transport.handle_peer_disconnected(peer_id);
            }
        }
        if !existing {
            match change {
                RosterChange::Added => self.system(format!("{nickname} joined the room")),
                RosterChange::Rejoined => self.system(format!("{nickname} reconnected")),
            }
        }
        self.publish_status();
    }

    /// Starts a connect sequence when the room is within the direct-link limit
    /// and the election picks this side.
    fn elect(&mut self, peer_id: &str) {
        if peer_id == self.session.user_id || !self.roster.contains(peer_id) {
            return;
        }
        let membership = self.roster.len() + 1;
        if membership > self.config.max_peers {
            warn!(
                peer = %peer_id,
                membership,
                max = self.config.max_peers,
                "room over direct-link limit, not connecting"
            );
            return;
        }
        if !should_initiate(&self.session.user_id, peer_id) {
            debug!(peer = %peer_id, "waiting for peer to initiate");
            return;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let sink = self.event_sink();
        self.connects
            .spawn(transport, peer_id.to_string(), self.config.retry_policy(), sink);
    }

    fn handle_peer_left(&mut self, peer_id: &str, nickname: Option<String>) {
        let known = self.roster.remove(peer_id);
        if let Some(transport) = &self.transport {
            transport.handle_peer_disconnected(peer_id);
        }
        match known {
            Some(known) => {
                let nickname = nickname.unwrap_or(known);
                self.system(format!("{nickname} left the room"));
            }
            None => debug!(peer = %peer_id, "unknown peer left"),
        }
        self.publish_status();
    }

    fn on_connect_finished(&mut self, peer_id: &str, outcome: ConnectOutcome) {
        self.connects.finished(peer_id);
        match outcome {
            ConnectOutcome::Connected { attempts } => {
                debug!(peer = %peer_id, attempts, "connect sequence finished");
            }
            ConnectOutcome::AlreadyConnected => {
                debug!(peer = %peer_id, "peer already connected");
            }
            ConnectOutcome::Exhausted { attempts } => {
                warn!(peer = %peer_id, attempts, "giving up on direct link");
                if self.roster.contains(peer_id) {
                    let nickname = self.display_name(peer_id);
                    self.system(format!(
                        "Could not establish a direct connection with {nickname}; messages will use the relay."
                    ));
                }
            }
        }
        self.publish_status();
    }

    fn route_payload(&mut self, payload: PeerPayload, from: &str, channel: Channel) {
        match payload {
            PeerPayload::Chat(message) => {
                if !self.dedup.admit(message.delivery_key()) {
                    debug!(from = %from, %channel, "duplicate chat dropped");
                    return;
                }
                self.emit(UiEvent::Chat {
                    message,
                    outgoing: false,
                    channel,
                });
            }
            PeerPayload::Typing {
                user_id,
                nickname,
                is_typing,
                ..
            } => {
                if user_id == self.session.user_id {
                    return;
                }
                self.emit(UiEvent::Typing {
                    user_id,
                    nickname,
                    is_typing,
                });
            }
            PeerPayload::FileMetadata(meta) => {
                if let Some(transfer) = self.incoming.on_metadata(&meta) {
                    self.emit(UiEvent::FileStarted { transfer });
                }
            }
            PeerPayload::FileChunk {
                file_id,
                chunk_index,
                data,
            } => {
                if let Some(progress) = self.incoming.on_chunk(&file_id, chunk_index, &data) {
                    self.emit(UiEvent::FileProgress {
                        file_id,
                        progress,
                        direction: TransferDirection::Receiving,
                    });
                }
            }
            PeerPayload::FileComplete { file_id } => match self.incoming.on_complete(&file_id) {
                Some(Completion::Received { transfer, bytes }) => {
                    info!(file_id = %transfer.id, size = transfer.size, "file received");
                    self.emit(UiEvent::FileReceived { transfer, bytes });
                }
                Some(Completion::Incomplete { transfer, missing }) => {
                    warn!(file_id = %transfer.id, missing, "file completed with missing data");
                    self.emit(UiEvent::FileFailed {
                        name: transfer.name,
                        cause: format!("transfer incomplete ({missing} chunk(s) missing)"),
                    });
                }
                None => {}
            },
            PeerPayload::Call { kind, body } => {
                self.emit(UiEvent::CallSignal {
                    peer_id: from.to_string(),
                    kind,
                    body,
                });
            }
        }
    }

    fn on_file_send_event(&mut self, event: FileSendEvent) {
        match event {
            FileSendEvent::Started(transfer) => self.emit(UiEvent::FileStarted { transfer }),
            FileSendEvent::Progress { file_id, progress } => self.emit(UiEvent::FileProgress {
                file_id,
                progress,
                direction: TransferDirection::Sending,
            }),
            FileSendEvent::Finished { file_id } => debug!(file_id = %file_id, "file send finished"),
            FileSendEvent::Failed { name, cause } => self.emit(UiEvent::FileFailed { name, cause }),
        }
    }

    fn display_name(&self, peer_id: &str) -> String {
        self.roster
            .nickname(peer_id)
            .map(str::to_string)
            .unwrap_or_else(|| peer_id.to_string())
    }

    fn connected_links(&self) -> usize {
        self.transport
            .as_ref()
            .map_or(0, |transport| transport.connected_peer_count())
    }

    /// Recomputes the status view and peer counts, emitting only what changed.
    fn publish_status(&mut self) {
        let connected = self.connected_links();
        let view = StatusView::compute(&self.session, &self.roster, connected);
        self.session.state = view.state;
        if view != self.status {
            self.status = view;
            self.emit(UiEvent::Status(view));
        }

        let counts = (self.roster.len(), connected);
        if counts != self.peer_count {
            self.peer_count = counts;
            self.emit(UiEvent::PeerCount {
                known: counts.0,
                connected: counts.1,
            });
        }
    }

    fn system(&self, text: String) {
        self.emit(UiEvent::System(text));
    }

    fn alert(&self, text: String) {
        self.emit(UiEvent::Alert(text));
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }
}
