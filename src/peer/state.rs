use crate::error::SessionError;
use crate::peer::types::{ConnectionState, SessionId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Id of the session a facade currently drives. Events carrying any other id
/// belong to a replaced session and are dropped.
#[derive(Debug, Clone, Default)]
pub struct ActiveSession(Arc<Mutex<Option<SessionId>>>);

impl ActiveSession {
    pub fn set(&self, id: SessionId) {
        *self.0.lock() = Some(id);
    }

    pub fn is(&self, id: &SessionId) -> bool {
        self.0.lock().as_ref() == Some(id)
    }

    pub fn current(&self) -> Option<SessionId> {
        self.0.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Transition {
    pub moved: bool,
    /// A channel open signal was held back and may now be applied.
    pub release_open: bool,
}

/// Current [`ConnectionState`] of one session plus the held channel-open flag.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: ConnectionState,
    open_pending: bool,
}

impl Default for StateCell {
    fn default() -> Self {
        Self {
            state: ConnectionState::New,
            open_pending: false,
        }
    }
}

impl StateCell {
    pub fn get(&self) -> ConnectionState {
        self.state
    }

    /// Moves forward only. Terminal states are absorbing and reachable from
    /// every other state.
    pub fn advance(&mut self, next: ConnectionState) -> Transition {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return Transition::default();
        }
        self.state = next;

        let exchanged = next.rank() >= ConnectionState::DescriptionExchanged.rank();
        let release_open = self.open_pending && exchanged && !next.is_terminal();
        if exchanged {
            self.open_pending = false;
        }
        Transition {
            moved: true,
            release_open,
        }
    }

    /// Records an open signal from the engine. Returns whether the channel may
    /// be marked open now; otherwise the signal is held until descriptions
    /// are exchanged.
    pub fn channel_opened(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.state.rank() >= ConnectionState::DescriptionExchanged.rank() {
            return true;
        }
        self.open_pending = true;
        false
    }

    #[cfg(test)]
    pub fn is_open_pending(&self) -> bool {
        self.open_pending
    }

    pub fn require(
        &self,
        op: &'static str,
        allowed: &[ConnectionState],
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                op,
                state: self.state,
            })
        }
    }
}
