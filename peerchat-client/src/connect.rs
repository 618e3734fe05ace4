use std::{collections::HashMap, sync::Arc};

use peerchat_core::UserId;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    config::RetryPolicy,
    event::{EventSink, SessionEvent},
    transport::PeerTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Link confirmed after `attempts` tries.
    Connected { attempts: u32 },
    /// Someone else brought the link up before the first try.
    AlreadyConnected,
    Exhausted { attempts: u32 },
}

/// Initiator-side connection loop for one peer. Never fails: errors count as
/// failed tries and are logged.
pub async fn establish_with_retry(
    transport: &dyn PeerTransport,
    peer_id: &str,
    policy: RetryPolicy,
) -> ConnectOutcome {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if link_up(transport, peer_id) {
            return if attempt == 1 {
                ConnectOutcome::AlreadyConnected
            } else {
                ConnectOutcome::Connected {
                    attempts: attempt - 1,
                }
            };
        }

        debug!(peer = %peer_id, attempt, "connecting to peer");
        match transport.create_connection(peer_id, true).await {
            Ok(()) => {
                tokio::time::sleep(policy.observation_window).await;
                if link_up(transport, peer_id) {
                    info!(peer = %peer_id, attempt, "direct link established");
                    return ConnectOutcome::Connected { attempts: attempt };
                }
                warn!(peer = %peer_id, attempt, "link not up after observation window");
            }
            Err(err) => warn!(peer = %peer_id, attempt, "connection attempt failed: {err}"),
        }

        if attempt < attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    ConnectOutcome::Exhausted { attempts }
}

fn link_up(transport: &dyn PeerTransport, peer_id: &str) -> bool {
    transport
        .connected_peer_ids()
        .iter()
        .any(|connected| connected == peer_id)
}

/// At most one running connect sequence per peer.
#[derive(Debug, Default)]
pub struct ConnectTasks {
    tasks: HashMap<UserId, JoinHandle<()>>,
}

impl ConnectTasks {
    /// Spawns a sequence for `peer_id`, aborting any earlier one for the same
    /// peer. The outcome is posted as [`SessionEvent::ConnectFinished`].
    pub fn spawn(
        &mut self,
        transport: Arc<dyn PeerTransport>,
        peer_id: UserId,
        policy: RetryPolicy,
        sink: EventSink,
    ) {
        self.tasks.retain(|_, handle| !handle.is_finished());

        let task_peer = peer_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = establish_with_retry(transport.as_ref(), &task_peer, policy).await;
            sink.session(SessionEvent::ConnectFinished {
                generation: sink.generation(),
                peer_id: task_peer,
                outcome,
            });
        });

        if let Some(previous) = self.tasks.insert(peer_id, handle) {
            previous.abort();
        }
    }

    pub fn finished(&mut self, peer_id: &str) {
        if self
            .tasks
            .get(peer_id)
            .is_some_and(|handle| handle.is_finished())
        {
            self.tasks.remove(peer_id);
        }
    }

    pub fn is_running(&self, peer_id: &str) -> bool {
        self.tasks
            .get(peer_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn abort_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl Drop for ConnectTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}
