use crate::config::LogConfig;
use crate::peer::types::{Candidate, ConnectionState, PeerEvent, SessionId};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const EVENT_CAPACITY: usize = 64;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `config.level`.
/// Returns false when logging is disabled or a subscriber already exists.
pub fn init(config: &LogConfig) -> bool {
    if !config.enabled {
        return false;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

pub fn dump_candidate(session: &SessionId, candidate: &Candidate) {
    debug!(
        session = %session,
        kind = ?candidate.kind(),
        candidate = %candidate.candidate,
        sdp_mid = ?candidate.sdp_mid,
        sdp_mline_index = ?candidate.sdp_mline_index,
        "local candidate"
    );
}

/// Publishes [`PeerEvent`]s. Sending with no subscriber is not an error.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: broadcast::Sender<PeerEvent>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl Emitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_state(&self, session: &SessionId, state: ConnectionState) {
        self.emit(PeerEvent::StateChanged {
            session: session.clone(),
            state,
        });
    }

    pub fn emit_connected(&self, session: &SessionId) {
        info!(session = %session, "data channel open");
        self.emit(PeerEvent::Connected {
            session: session.clone(),
        });
    }

    pub fn emit_disconnected(&self, session: &SessionId) {
        info!(session = %session, "data channel closed");
        self.emit(PeerEvent::Disconnected {
            session: session.clone(),
        });
    }

    pub fn emit_send_dropped(&self, session: Option<&SessionId>) {
        self.emit(PeerEvent::SendDropped {
            session: session.cloned(),
        });
    }

    pub fn emit_failed(&self, session: &SessionId, reason: &str) {
        warn!(session = %session, reason, "session failed");
        self.emit(PeerEvent::Failed {
            session: session.clone(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_installs_nothing() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(!init(&config));
    }

    #[test]
    fn events_reach_every_subscriber() {
        let emitter = Emitter::default();
        emitter.emit_connected(&SessionId::new());

        let mut first = emitter.subscribe();
        let mut second = emitter.subscribe();
        let session = SessionId::new();
        emitter.emit_failed(&session, "ice failed");

        let expected = PeerEvent::Failed {
            session,
            reason: "ice failed".into(),
        };
        assert_eq!(first.try_recv().unwrap(), expected);
        assert_eq!(second.try_recv().unwrap(), expected);
        assert!(first.try_recv().is_err());
    }
}
