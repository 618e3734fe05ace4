//! Events flowing into the orchestrator from its collaborators, and out of it
//! towards the UI.

use bytes::Bytes;
use peerchat_core::{ChatMessage, FileId, PeerPayload, UserId};
use tokio::sync::mpsc;

use crate::{
    connect::ConnectOutcome,
    delivery::Channel,
    files::{FileSendEvent, FileTransfer, TransferDirection},
    state::StatusView,
};

/// Notifications raised by a [`crate::PeerTransport`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message { payload: PeerPayload, peer_id: UserId },
    PeerConnected(UserId),
    PeerDisconnected(UserId),
}

/// Notifications raised by a [`crate::SignalingService`].
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Message {
        payload: PeerPayload,
        sender_id: UserId,
    },
    PeerJoined {
        peer_id: UserId,
        nickname: String,
        /// Member was already present when the local user joined.
        existing: bool,
    },
    PeerLeft {
        peer_id: UserId,
        nickname: Option<String>,
    },
    Signal {
        from: UserId,
        signal: serde_json::Value,
    },
}

#[derive(Debug)]
pub enum SessionEvent {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Signaling {
        generation: u64,
        event: SignalingEvent,
    },
    TypingTimeout {
        seq: u64,
    },
    ConnectFinished {
        generation: u64,
        peer_id: UserId,
        outcome: ConnectOutcome,
    },
    FileSend {
        generation: u64,
        event: FileSendEvent,
    },
}

/// Handle collaborators use to report back. Every sink is stamped with the
/// generation of the transport instance or room membership it belongs to.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    /// Sink wired to a fresh queue, for driving collaborators on their own.
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the orchestrator is gone.
    pub fn transport(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn signaling(&self, event: SignalingEvent) -> bool {
        self.tx
            .send(SessionEvent::Signaling {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub(crate) fn session(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Status(StatusView),
    PeerCount {
        known: usize,
        connected: usize,
    },
    Joined {
        room_code: String,
        user_id: UserId,
        nickname: String,
    },
    Left,
    /// Informational line for the chat log.
    System(String),
    /// Something the user must acknowledge.
    Alert(String),
    Chat {
        message: ChatMessage,
        outgoing: bool,
        channel: Channel,
    },
    Typing {
        user_id: UserId,
        nickname: String,
        is_typing: bool,
    },
    CallSignal {
        peer_id: UserId,
        kind: String,
        body: serde_json::Value,
    },
    FileStarted {
        transfer: FileTransfer,
    },
    FileProgress {
        file_id: FileId,
        progress: f64,
        direction: TransferDirection,
    },
    FileReceived {
        transfer: FileTransfer,
        bytes: Bytes,
    },
    FileFailed {
        name: String,
        cause: String,
    },
    Reconnecting,
    ReconnectReady,
}
