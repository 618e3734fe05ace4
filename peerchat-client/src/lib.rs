pub mod config;
pub mod connect;
pub mod dedup;
pub mod delivery;
pub mod direct;
pub mod error;
pub mod event;
pub mod files;
pub mod orchestrator;
pub mod prefs;
pub mod relay_client;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::{RetryPolicy, SessionConfig};
pub use delivery::Channel;
pub use error::{FileSendError, PreferenceError, SessionError, SignalingError, TransportError};
pub use event::{EventSink, SessionEvent, SignalingEvent, TransportEvent, UiEvent};
pub use orchestrator::{Command, Orchestrator};
pub use state::{Roster, Session, StatusView};
pub use transport::{PeerTransport, SignalingService, TransportFactory};
