use std::fmt;

use peerchat_core::PeerPayload;
use tracing::warn;

use crate::{
    error::{SessionError, TransportError},
    transport::{PeerTransport, SignalingService},
};

/// Paths a chat payload can take, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Direct,
    Relay,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Direct => write!(f, "direct"),
            Channel::Relay => write!(f, "relay"),
        }
    }
}

/// Sends over a direct link when one is up, otherwise through the relay.
/// A failed direct send falls through to the relay.
pub fn deliver(
    payload: &PeerPayload,
    transport: Option<&dyn PeerTransport>,
    signaling: &dyn SignalingService,
) -> Result<Channel, SessionError> {
    if let Some(transport) = transport.filter(|transport| transport.is_connected()) {
        match transport.send(payload) {
            Ok(()) => return Ok(Channel::Direct),
            Err(err) => warn!(kind = payload.kind(), "direct send failed, using relay: {err}"),
        }
    }

    if !payload.is_relayable() {
        return Err(TransportError::NotConnected.into());
    }
    signaling.send_message(payload)?;
    Ok(Channel::Relay)
}
