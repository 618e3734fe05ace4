use std::time::Duration;

use peerchat_core::{FILE_CHUNK_BYTES, MAX_PEERS_PER_ROOM, TYPING_TIMEOUT_MS};

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_OBSERVATION_WINDOW: Duration = Duration::from_secs(3);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_DEDUP_WINDOW: usize = 1024;

/// Policy inputs for one session. Defaults mirror the shared constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Room membership (self included) above which no direct link is elected.
    pub max_peers: usize,
    pub typing_timeout: Duration,
    pub connect_attempts: u32,
    /// How long to wait after a connection attempt before checking the link.
    pub observation_window: Duration,
    pub retry_backoff: Duration,
    /// Number of recent delivery keys remembered for deduplication.
    pub dedup_window: usize,
    pub chunk_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_peers: MAX_PEERS_PER_ROOM,
            typing_timeout: Duration::from_millis(TYPING_TIMEOUT_MS),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            observation_window: DEFAULT_OBSERVATION_WINDOW,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            chunk_bytes: FILE_CHUNK_BYTES,
        }
    }
}

impl SessionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts.max(1),
            observation_window: self.observation_window,
            backoff: self.retry_backoff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub observation_window: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        SessionConfig::default().retry_policy()
    }
}
