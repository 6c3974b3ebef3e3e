//! One negotiation between two peers.
//!
//! A [`Connection`] owns exactly one engine connection and at most one data
//! channel. Caller operations (`create_local_offer`, `accept_remote_offer`,
//! `accept_remote_answer`, `send`) run on the caller's task; engine callbacks
//! arrive as [`EngineEvent`]s and are applied in order by a per-session task.
//!
//! ```text
//! New -> DescriptionCreated -> AwaitingRemote (host) -> DescriptionExchanged -> ChannelOpen
//!   \______________________________ any step _____________________________/-> Closed | Failed
//! ```

use crate::config::{DescriptionFormat, PeerConfig};
use crate::error::{CodecError, EngineError, SessionError};
use crate::logger::{dump_candidate, Emitter};
use crate::peer::codec;
use crate::peer::data_channel::{ChannelAdapter, HandlerSlot};
use crate::peer::engine::{EngineConnection, EngineEvent, TransportEngine};
use crate::peer::ice::{CandidateSummary, GatheringError, GatheringProgress, GatheringTracker};
use crate::peer::state::{ActiveSession, StateCell};
use crate::peer::types::{
    ConnectionState, GatheringEvent, Readiness, Role, SdpKind, SessionDescription, SessionId,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pieces a facade shares with every session it opens.
#[derive(Clone, Default)]
pub struct SessionContext {
    pub handlers: HandlerSlot,
    pub active: ActiveSession,
    pub emitter: Emitter,
}

/// Final local description text, frozen at gathering completion.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LocalDescription {
    Pending,
    Ready(String),
    /// Session ended before gathering completed.
    Abandoned,
}

pub struct Connection {
    id: SessionId,
    role: Role,
    format: DescriptionFormat,
    channel_label: String,
    engine: Arc<dyn EngineConnection>,
    state: Mutex<StateCell>,
    tracker: Mutex<GatheringTracker>,
    channel: ChannelAdapter,
    local: watch::Sender<LocalDescription>,
    negotiation: AsyncMutex<()>,
    context: SessionContext,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Creates the engine connection, starts the event task and makes this
    /// session the active one in `context`.
    pub async fn open(
        role: Role,
        engine: &dyn TransportEngine,
        config: &PeerConfig,
        context: SessionContext,
    ) -> Result<Arc<Connection>, SessionError> {
        let (events, queue) = mpsc::unbounded_channel();
        let engine = engine.connect(&config.ice_servers, events).await?;
        let (local, _) = watch::channel(LocalDescription::Pending);

        let conn = Arc::new(Connection {
            id: SessionId::new(),
            role,
            format: config.format,
            channel_label: config.channel_label.clone(),
            engine,
            state: Mutex::new(StateCell::default()),
            tracker: Mutex::new(GatheringTracker::new()),
            channel: ChannelAdapter::new(),
            local,
            negotiation: AsyncMutex::new(()),
            context,
            pump: Mutex::new(None),
        });
        conn.context.active.set(conn.id.clone());

        let pump = tokio::spawn(run_events(Arc::downgrade(&conn), queue));
        *conn.pump.lock() = Some(pump);

        info!(session = %conn.id, role = ?role, format = ?conn.format, "session opened");
        Ok(conn)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().get()
    }

    pub fn readiness(&self) -> Readiness {
        self.channel.readiness()
    }

    pub fn candidates(&self) -> CandidateSummary {
        self.tracker.lock().summary()
    }

    /// Serialized local description, empty until gathering has completed.
    pub fn local_description(&self) -> String {
        match &*self.local.borrow() {
            LocalDescription::Ready(text) => text.clone(),
            _ => String::new(),
        }
    }

    /// Resolves once gathering completes. Fails if the session ends first.
    pub async fn wait_local_description(&self) -> Result<String, SessionError> {
        let mut rx = self.local.subscribe();
        let outcome = match rx.wait_for(|desc| *desc != LocalDescription::Pending).await {
            Ok(desc) => (*desc).clone(),
            Err(_) => LocalDescription::Abandoned,
        };
        match outcome {
            LocalDescription::Ready(text) => Ok(text),
            _ => Err(SessionError::InvalidState {
                op: "wait for the local description",
                state: self.state(),
            }),
        }
    }

    pub async fn create_local_offer(&self) -> Result<(), SessionError> {
        let _negotiating = self.negotiation.lock().await;
        self.require("create an offer", Role::Host, &[ConnectionState::New])?;

        if !self.channel.has_channel() {
            let handle = self.engine.create_data_channel(&self.channel_label).await?;
            self.channel.attach(handle);
        }
        let offer = match self.engine.create_offer().await {
            Ok(offer) => offer,
            Err(err) => return Err(self.reject(err).await),
        };
        self.apply_local(offer).await
    }

    pub async fn accept_remote_offer(&self, text: &str) -> Result<(), SessionError> {
        self.require("accept an offer", Role::Joiner, &[ConnectionState::New])?;
        let offer = codec::decode_expecting(text, SdpKind::Offer).inspect_err(|err| {
            warn!(session = %self.id, error = %err, "remote offer rejected by decoder");
        })?;
        self.accept_offer(offer).await
    }

    /// Applies an already decoded remote offer and creates the answer.
    pub async fn accept_offer(&self, offer: SessionDescription) -> Result<(), SessionError> {
        let _negotiating = self.negotiation.lock().await;
        self.require("accept an offer", Role::Joiner, &[ConnectionState::New])?;
        if offer.kind != SdpKind::Offer {
            return Err(CodecError::UnexpectedKind {
                expected: SdpKind::Offer,
                found: offer.kind,
            }
            .into());
        }

        if let Err(err) = self.engine.set_remote_description(offer).await {
            return Err(self.reject(err).await);
        }
        let answer = match self.engine.create_answer().await {
            Ok(answer) => answer,
            Err(err) => return Err(self.reject(err).await),
        };
        self.apply_local(answer).await
    }

    pub async fn accept_remote_answer(&self, text: &str) -> Result<(), SessionError> {
        let _negotiating = self.negotiation.lock().await;
        self.require(
            "accept an answer",
            Role::Host,
            &[ConnectionState::DescriptionCreated, ConnectionState::AwaitingRemote],
        )?;

        let answer = codec::decode_expecting(text, SdpKind::Answer).inspect_err(|err| {
            warn!(session = %self.id, error = %err, "remote answer rejected by decoder");
        })?;
        if let Err(err) = self.engine.set_remote_description(answer).await {
            return Err(self.reject(err).await);
        }
        self.advance(ConnectionState::DescriptionExchanged);
        Ok(())
    }

    pub async fn send(&self, text: String) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(SessionError::InvalidState {
                op: "send a message",
                state,
            });
        }
        self.channel.send(text).await
    }

    /// Explicit teardown. Idempotent.
    pub async fn close(&self) {
        let was_open = self.channel.is_open();
        let moved = self.advance(ConnectionState::Closed);
        self.abandon_local();
        self.channel.close().await;
        if let Err(err) = self.engine.close().await {
            debug!(session = %self.id, error = %err, "engine close failed");
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if moved && was_open {
            self.context.emitter.emit_disconnected(&self.id);
        }
    }

    fn require(
        &self,
        op: &'static str,
        role: Role,
        allowed: &[ConnectionState],
    ) -> Result<(), SessionError> {
        let cell = self.state.lock();
        if self.role != role {
            return Err(SessionError::InvalidState {
                op,
                state: cell.get(),
            });
        }
        cell.require(op, allowed)
    }

    /// Applies a freshly created local description; gathering starts here.
    async fn apply_local(&self, desc: SessionDescription) -> Result<(), SessionError> {
        self.advance(ConnectionState::DescriptionCreated);
        if let Err(err) = self.tracker.lock().begin() {
            warn!(session = %self.id, error = %err, "gathering tracker already running");
        }
        if let Err(err) = self.engine.set_local_description(desc).await {
            return Err(self.reject(err).await);
        }
        debug!(session = %self.id, "local description applied, gathering");
        Ok(())
    }

    async fn reject(&self, err: EngineError) -> SessionError {
        let reason = err.to_string();
        self.fail(&reason).await;
        SessionError::NegotiationRejected(reason)
    }

    async fn fail(&self, reason: &str) {
        if !self.advance(ConnectionState::Failed) {
            return;
        }
        self.context.emitter.emit_failed(&self.id, reason);
        self.abandon_local();
        self.channel.mark_closed();
        if let Err(err) = self.engine.close().await {
            debug!(session = %self.id, error = %err, "engine close failed");
        }
    }

    fn advance(&self, next: ConnectionState) -> bool {
        let step = {
            let mut cell = self.state.lock();
            let from = cell.get();
            let step = cell.advance(next);
            // published under the lock so subscribers see transitions in order
            if step.moved {
                info!(session = %self.id, role = ?self.role, %from, to = %next, "state changed");
                self.context.emitter.emit_state(&self.id, next);
            }
            step
        };
        if !step.moved {
            return false;
        }
        if step.release_open {
            self.open_channel();
        }
        true
    }

    fn open_channel(&self) {
        if self.channel.mark_open() {
            self.advance(ConnectionState::ChannelOpen);
            self.context.emitter.emit_connected(&self.id);
        }
    }

    fn abandon_local(&self) {
        self.local.send_if_modified(|desc| {
            if *desc == LocalDescription::Pending {
                *desc = LocalDescription::Abandoned;
                true
            } else {
                false
            }
        });
    }

    async fn handle_event(&self, event: EngineEvent) {
        let state = self.state();
        if state.is_terminal() {
            debug!(session = %self.id, %state, ?event, "event after teardown ignored");
            return;
        }
        if !self.context.active.is(&self.id) {
            debug!(session = %self.id, ?event, "event for replaced session ignored");
            return;
        }

        match event {
            EngineEvent::Gathering(event) => self.on_gathering(event).await,
            EngineEvent::ChannelOffered(handle) => {
                if self.role == Role::Joiner {
                    self.channel.attach(handle);
                } else {
                    warn!(session = %self.id, label = %handle.label(), "host ignores inbound channel");
                }
            }
            EngineEvent::ChannelOpen => {
                let ready = self.state.lock().channel_opened();
                if ready {
                    self.open_channel();
                } else {
                    debug!(session = %self.id, "channel open held until descriptions are exchanged");
                }
            }
            EngineEvent::ChannelMessage(data) => {
                self.channel.deliver(&data, &self.context.handlers);
            }
            EngineEvent::ChannelClosed => {
                let was_open = self.channel.is_open();
                self.channel.mark_closed();
                self.abandon_local();
                if self.advance(ConnectionState::Closed) && was_open {
                    self.context.emitter.emit_disconnected(&self.id);
                }
                if let Err(err) = self.engine.close().await {
                    debug!(session = %self.id, error = %err, "engine close failed");
                }
            }
            EngineEvent::ConnectionFailed(reason) => self.fail(&reason).await,
        }
    }

    async fn on_gathering(&self, event: GatheringEvent) {
        if let GatheringEvent::Candidate(candidate) = &event {
            dump_candidate(&self.id, candidate);
        }
        let progress = self.tracker.lock().observe(event);
        match progress {
            Ok(GatheringProgress::Pending) => {}
            Ok(GatheringProgress::Complete(summary)) => self.finalize_local(summary).await,
            Err(GatheringError::NotStarted) => {
                let err = SessionError::InvalidState {
                    op: "complete gathering",
                    state: self.state(),
                };
                warn!(session = %self.id, error = %err, "gathering event ignored");
            }
            Err(err) => warn!(session = %self.id, error = %err, "gathering event ignored"),
        }
    }

    async fn finalize_local(&self, summary: CandidateSummary) {
        let Some(desc) = self.engine.local_description().await else {
            self.fail("engine has no local description after gathering").await;
            return;
        };
        let text = match codec::encode(&desc, self.format) {
            Ok(text) => text,
            Err(err) => {
                self.fail(&err.to_string()).await;
                return;
            }
        };
        let next = match self.role {
            Role::Host => ConnectionState::AwaitingRemote,
            Role::Joiner => ConnectionState::DescriptionExchanged,
        };
        self.advance(next);
        self.local.send_if_modified(|current| {
            if *current == LocalDescription::Pending {
                *current = LocalDescription::Ready(text);
                true
            } else {
                false
            }
        });
        info!(
            session = %self.id,
            kind = %desc.kind,
            candidates = summary.total(),
            host = summary.host,
            srflx = summary.srflx,
            relay = summary.relay,
            "local description final"
        );
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn run_events(conn: Weak<Connection>, mut queue: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = queue.recv().await {
        let Some(conn) = conn.upgrade() else {
            break;
        };
        conn.handle_event(event).await;
    }
}
