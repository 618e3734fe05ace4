use std::io;

use peerchat_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no direct link is up")]
    NotConnected,
    #[error("peer {0} is not reachable over a direct link")]
    PeerUnavailable(String),
    #[error("malformed signal: {0}")]
    BadSignal(String),
    #[error("transport closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] CoreError),
    #[error("signaling unavailable: {0}")]
    Signaling(#[from] SignalingError),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("could not reach relay: {0}")]
    Connect(String),
    #[error("relay refused the join: {0}")]
    Rejected(String),
    #[error("not joined to a room")]
    NotJoined,
    #[error("relay connection closed")]
    Closed,
    #[error("timed out waiting for the relay")]
    Timeout,
    #[error(transparent)]
    Protocol(#[from] CoreError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] CoreError),
    #[error("not joined to a room")]
    NotJoined,
    #[error("no saved room to reconnect to")]
    NoSavedRoom,
    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum FileSendError {
    #[error("file is empty")]
    Empty,
    #[error("file too large ({size} bytes); limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("invalid file name")]
    InvalidName,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("metadata read failed: {0}")]
    Metadata(io::Error),
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("parse failed: {0}")]
    Parse(serde_json::Error),
    #[error("serialize failed: {0}")]
    Serialize(serde_json::Error),
    #[error("tmp write failed: {0}")]
    WriteTmp(io::Error),
    #[error("rename failed: {0}")]
    Rename(io::Error),
}
