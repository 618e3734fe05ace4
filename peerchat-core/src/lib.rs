use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::{Buf, BufMut, BytesMut};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MIN_ROOM_CODE_LEN: usize = 4;
pub const MAX_ROOM_CODE_LEN: usize = 128;
pub const MAX_NICKNAME_CHARS: usize = 64;
pub const DEFAULT_NICKNAME: &str = "Anonymous";
/// Room membership (self included) above which no direct links are elected.
pub const MAX_PEERS_PER_ROOM: usize = 8;
pub const MAX_RELAY_MEMBERS_PER_ROOM: usize = 16;
pub const TYPING_TIMEOUT_MS: u64 = 1_000;
pub const MAX_CHAT_TEXT_BYTES: usize = 64 * 1024;
pub const MAX_FRAME_BYTES: usize = 300 * 1024;
pub const FILE_CHUNK_BYTES: usize = 16 * 1024;
/// Largest chunk whose base64 form still fits in one frame.
pub const MAX_FILE_CHUNK_BYTES: usize = 128 * 1024;
pub const MAX_FILE_BYTES: u64 = 64 * 1024 * 1024;
const USER_ID_PREFIX: &str = "user-";
const USER_ID_SUFFIX_LEN: usize = 9;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub type UserId = String;
pub type RoomId = String;
pub type FileId = String;
pub type MessageId = String;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    pub user_id: UserId,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub text: String,
    pub sender_id: UserId,
    pub nickname: String,
    pub timestamp_unix_ms: u64,
}

/// Identity of one logical chat message, whichever channel carried it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryKey {
    Id(MessageId),
    SenderTimestamp {
        sender_id: UserId,
        timestamp_unix_ms: u64,
    },
}

impl ChatMessage {
    pub fn delivery_key(&self) -> DeliveryKey {
        match &self.id {
            Some(id) if !id.is_empty() => DeliveryKey::Id(id.clone()),
            _ => DeliveryKey::SenderTimestamp {
                sender_id: self.sender_id.clone(),
                timestamp_unix_ms: self.timestamp_unix_ms,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: u32,
    pub sender_nickname: String,
    pub timestamp_unix_ms: u64,
}

fn default_chunk_bytes() -> u32 {
    FILE_CHUNK_BYTES as u32
}

impl FileMetadata {
    pub fn expected_chunks(size: u64, chunk_bytes: usize) -> u64 {
        let chunk_bytes = chunk_bytes.max(1) as u64;
        size.div_ceil(chunk_bytes)
    }
}

/// Application payloads exchanged between peers, directly or through the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerPayload {
    Chat(ChatMessage),
    Typing {
        user_id: UserId,
        nickname: String,
        is_typing: bool,
        timestamp_unix_ms: u64,
    },
    FileMetadata(FileMetadata),
    FileChunk {
        file_id: FileId,
        chunk_index: u32,
        data: String,
    },
    FileComplete {
        file_id: FileId,
    },
    Call {
        kind: String,
        body: serde_json::Value,
    },
}

impl PeerPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerPayload::Chat(_) => "chat",
            PeerPayload::Typing { .. } => "typing",
            PeerPayload::FileMetadata(_) => "file-metadata",
            PeerPayload::FileChunk { .. } => "file-chunk",
            PeerPayload::FileComplete { .. } => "file-complete",
            PeerPayload::Call { .. } => "call",
        }
    }

    /// Only chat and typing hints may travel through the relay.
    pub fn is_relayable(&self) -> bool {
        matches!(self, PeerPayload::Chat(_) | PeerPayload::Typing { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayEnvelope {
    pub sender_id: UserId,
    pub payload: PeerPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub room_id: RoomId,
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerList {
    pub room_id: RoomId,
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerJoined {
    pub room_id: RoomId,
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerLeft {
    pub room_id: RoomId,
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalEnvelope {
    pub from: UserId,
    pub to: UserId,
    pub signal: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ControlMessage {
    Hello(Hello),
    PeerList(PeerList),
    PeerJoined(PeerJoined),
    PeerLeft(PeerLeft),
    Signal(SignalEnvelope),
    Heartbeat,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Control(ControlMessage),
    Relayed(RelayEnvelope),
    Direct(PeerPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Control = 0,
    Relayed = 1,
    Direct = 2,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("room code must be at least {min} characters")]
    RoomCodeTooShort { min: usize },
    #[error("room code must be at most {max} characters")]
    RoomCodeTooLong { max: usize },
    #[error("message text exceeds {max} bytes")]
    ChatTooLarge { max: usize },
    #[error("invalid frame length")]
    InvalidFrameLength,
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(u8),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Trims and upper-cases user input into a room code.
pub fn normalize_room_code(input: &str) -> Result<String, CoreError> {
    let code = input.trim().to_uppercase();
    let len = code.chars().count();
    if len < MIN_ROOM_CODE_LEN {
        return Err(CoreError::RoomCodeTooShort {
            min: MIN_ROOM_CODE_LEN,
        });
    }
    if len > MAX_ROOM_CODE_LEN {
        return Err(CoreError::RoomCodeTooLong {
            max: MAX_ROOM_CODE_LEN,
        });
    }
    Ok(code)
}

/// Room id as seen by the relay. The code itself never leaves the client.
pub fn room_id_from_code(room_code: &str) -> RoomId {
    let digest = Sha256::digest(room_code.as_bytes());
    hex::encode(digest)
}

pub fn normalize_nickname(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return DEFAULT_NICKNAME.to_owned();
    }
    trimmed.chars().take(MAX_NICKNAME_CHARS).collect()
}

pub fn validate_chat_text(text: &str) -> Result<(), CoreError> {
    if text.len() > MAX_CHAT_TEXT_BYTES {
        return Err(CoreError::ChatTooLarge {
            max: MAX_CHAT_TEXT_BYTES,
        });
    }
    Ok(())
}

pub fn generate_user_id() -> UserId {
    let mut rng = rand::rng();
    let suffix: String = (0..USER_ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{USER_ID_PREFIX}{suffix}")
}

/// Fresh id guaranteed to differ from `previous`.
pub fn generate_user_id_excluding(previous: &str) -> UserId {
    loop {
        let candidate = generate_user_id();
        if candidate != previous {
            return candidate;
        }
    }
}

/// Exactly one side of a pair initiates: the lexicographically smaller id.
pub fn should_initiate(local_id: &str, remote_id: &str) -> bool {
    local_id < remote_id
}

pub fn derive_connection_state(roster_len: usize, connected_links: usize) -> ConnectionState {
    if connected_links > 0 {
        ConnectionState::Connected
    } else if roster_len > 0 {
        ConnectionState::Connecting
    } else {
        ConnectionState::Disconnected
    }
}

pub fn now_unix_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_millis() as u64
}

/// Short stable id: first 16 bytes of SHA-256 over the colon-joined parts.
pub fn derive_id(parts: &[&str]) -> String {
    let digest = Sha256::digest(parts.join(":").as_bytes());
    hex::encode(&digest[..16])
}

pub fn encode_frame(message: &WireMessage) -> Result<Vec<u8>, CoreError> {
    let (message_type, payload) = match message {
        WireMessage::Control(control) => (MessageType::Control as u8, to_json(control)?),
        WireMessage::Relayed(envelope) => (MessageType::Relayed as u8, to_json(envelope)?),
        WireMessage::Direct(payload) => (MessageType::Direct as u8, to_json(payload)?),
    };

    let frame_len = 1usize
        .checked_add(payload.len())
        .ok_or(CoreError::InvalidFrameLength)?;
    if frame_len + 4 > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            len: frame_len + 4,
            max: MAX_FRAME_BYTES,
        });
    }
    let frame_len_u32 = u32::try_from(frame_len).map_err(|_| CoreError::InvalidFrameLength)?;

    let mut out = BytesMut::with_capacity(4 + frame_len);
    out.put_u32_le(frame_len_u32);
    out.put_u8(message_type);
    out.extend_from_slice(&payload);
    Ok(out.to_vec())
}

pub fn decode_frame(frame: &[u8]) -> Result<WireMessage, CoreError> {
    if frame.len() < 5 {
        return Err(CoreError::InvalidFrameLength);
    }
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            len: frame.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut cursor = frame;
    let expected_len = cursor.get_u32_le() as usize;
    if expected_len + 4 != frame.len() {
        return Err(CoreError::InvalidFrameLength);
    }

    let message_type = cursor.get_u8();
    let payload = cursor;

    match message_type {
        x if x == MessageType::Control as u8 => Ok(WireMessage::Control(from_json(payload)?)),
        x if x == MessageType::Relayed as u8 => Ok(WireMessage::Relayed(from_json(payload)?)),
        x if x == MessageType::Direct as u8 => Ok(WireMessage::Direct(from_json(payload)?)),
        other => Err(CoreError::UnsupportedMessageType(other)),
    }
}

/// Body length announced by a frame header, for stream readers.
pub fn frame_body_len(header: [u8; 4]) -> Result<usize, CoreError> {
    let len = u32::from_le_bytes(header) as usize;
    if len == 0 {
        return Err(CoreError::InvalidFrameLength);
    }
    if len + 4 > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            len: len + 4,
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(len)
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|err| CoreError::Serialization(err.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|err| CoreError::Serialization(err.to_string()))
}
