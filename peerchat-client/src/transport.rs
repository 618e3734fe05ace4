//! Collaborator seams of the session orchestrator.

use std::sync::Arc;

use futures::future::BoxFuture;
use peerchat_core::{PeerInfo, PeerPayload, UserId};

use crate::{
    error::{SignalingError, TransportError},
    event::EventSink,
};

/// Direct peer-to-peer links for one room membership.
pub trait PeerTransport: Send + Sync {
    fn is_connected(&self) -> bool {
        self.connected_peer_count() > 0
    }

    /// Sends to every connected peer.
    fn send(&self, payload: &PeerPayload) -> Result<(), TransportError>;

    fn create_connection(
        &self,
        peer_id: &str,
        initiator: bool,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    fn handle_incoming_signal(&self, from_peer: &str, signal: serde_json::Value);

    /// Drops any link to `peer_id`, stale or not.
    fn handle_peer_disconnected(&self, peer_id: &str);

    fn connected_peer_ids(&self) -> Vec<UserId>;

    fn connected_peer_count(&self) -> usize {
        self.connected_peer_ids().len()
    }

    /// Extends link timeout tolerance while a local file picker is open.
    fn set_file_selection_active(&self, active: bool);

    fn disconnect(&self);
}

/// Builds one transport per room membership.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        room_id: &str,
        local: &PeerInfo,
        signaling: Arc<dyn SignalingService>,
        events: EventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

/// Room membership, relay channel and signal exchange.
pub trait SignalingService: Send + Sync {
    fn initialize(&self) -> BoxFuture<'_, Result<(), SignalingError>>;

    fn join_room(
        &self,
        room_id: String,
        user_id: UserId,
        nickname: String,
        events: EventSink,
    ) -> BoxFuture<'_, Result<(), SignalingError>>;

    fn leave_room(&self) -> BoxFuture<'_, Result<(), SignalingError>>;

    /// Current members, local user included.
    fn room_users(&self) -> BoxFuture<'_, Result<Vec<PeerInfo>, SignalingError>>;

    /// Relays a chat or typing payload to every other member.
    fn send_message(&self, payload: &PeerPayload) -> Result<(), SignalingError>;

    fn send_typing_indicator(&self, is_typing: bool) -> Result<(), SignalingError>;

    fn send_signal(&self, to_peer: &str, signal: serde_json::Value) -> Result<(), SignalingError>;
}
