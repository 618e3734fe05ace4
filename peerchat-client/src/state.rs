//! Owned session record and peer roster, mutated only through the functions
//! below.

use std::collections::BTreeMap;

use peerchat_core::{
    ConnectionState, UserId, derive_connection_state, generate_user_id,
    generate_user_id_excluding,
};

#[derive(Debug, Clone)]
pub struct Session {
    pub room_code: Option<String>,
    pub user_id: UserId,
    pub nickname: String,
    pub state: ConnectionState,
    pub saved_room_code: Option<String>,
    pub saved_nickname: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            room_code: None,
            user_id: generate_user_id(),
            nickname: String::new(),
            state: ConnectionState::Disconnected,
            saved_room_code: None,
            saved_nickname: None,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.room_code.is_some()
    }

    pub fn enter(&mut self, room_code: String, nickname: String) {
        self.saved_room_code = Some(room_code.clone());
        self.saved_nickname = Some(nickname.clone());
        self.room_code = Some(room_code);
        self.nickname = nickname;
    }

    pub fn clear_room(&mut self) {
        self.room_code = None;
    }

    /// Abandons the current user id for a fresh one. Returns the old id.
    pub fn rotate_identity(&mut self) -> UserId {
        let fresh = generate_user_id_excluding(&self.user_id);
        std::mem::replace(&mut self.user_id, fresh)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    Added,
    Rejoined,
}

/// Known peers, keyed by id. Id and nickname live in one entry so they are
/// always added and removed together.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    peers: BTreeMap<UserId, String>,
}

impl Roster {
    pub fn upsert(&mut self, peer_id: &str, nickname: &str) -> RosterChange {
        match self.peers.insert(peer_id.to_owned(), nickname.to_owned()) {
            Some(_) => RosterChange::Rejoined,
            None => RosterChange::Added,
        }
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<String> {
        self.peers.remove(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn nickname(&self, peer_id: &str) -> Option<&str> {
        self.peers.get(peer_id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = &UserId> {
        self.peers.keys()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

/// Everything the status area shows. Published only when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusView {
    pub state: ConnectionState,
    pub reconnect_available: bool,
    pub call_controls_enabled: bool,
}

impl StatusView {
    pub fn compute(session: &Session, roster: &Roster, connected_links: usize) -> Self {
        let state = derive_connection_state(roster.len(), connected_links);
        Self {
            state,
            reconnect_available: state == ConnectionState::Disconnected
                && session.saved_room_code.is_some()
                && roster.is_empty(),
            call_controls_enabled: state == ConnectionState::Connected && !roster.is_empty(),
        }
    }
}

impl Default for StatusView {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_available: false,
            call_controls_enabled: false,
        }
    }
}
