//! `Peer`: the role-aware entry point an application talks to.
//!
//! A facade drives at most one live session. Starting a host or joining
//! opens a fresh [`Connection`]; what happens to a session that is still live
//! at that moment is decided by [`RestartPolicy`].

use crate::config::{PeerConfig, RestartPolicy};
use crate::error::SessionError;
use crate::logger;
use crate::peer::codec;
use crate::peer::connection::{Connection, SessionContext};
use crate::peer::engine::TransportEngine;
use crate::peer::rtc::RtcEngine;
use crate::peer::types::{ConnectionState, PeerEvent, Readiness, Role, SdpKind, SessionId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Outcome of [`Peer::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The channel was not open; the message was dropped.
    NotOpen,
}

pub struct Peer {
    config: PeerConfig,
    engine: Arc<dyn TransportEngine>,
    current: Mutex<Option<Arc<Connection>>>,
    context: SessionContext,
}

impl Peer {
    /// Facade over the `webrtc` engine. Installs the log subscriber described
    /// by `config.log` if none is set yet.
    pub fn new(config: PeerConfig) -> Result<Self, SessionError> {
        logger::init(&config.log);
        Self::with_engine(config, Arc::new(RtcEngine::new()))
    }

    pub fn with_engine(
        config: PeerConfig,
        engine: Arc<dyn TransportEngine>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            engine,
            current: Mutex::new(None),
            context: SessionContext::default(),
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    // ---------- host ----------

    /// Opens a host session, creates the offer and waits for gathering to
    /// finish. Returns the serialized offer to hand to the joiner.
    pub async fn start_host(&self) -> Result<String, SessionError> {
        let conn = self.session_for(Role::Host).await?;
        conn.create_local_offer().await?;
        conn.wait_local_description().await
    }

    /// Like [`start_host`](Self::start_host) without waiting; poll
    /// [`local_offer`](Self::local_offer) afterwards.
    pub async fn create_local_offer(&self) -> Result<(), SessionError> {
        self.session_for(Role::Host).await?.create_local_offer().await
    }

    /// Final offer text, empty until gathering completes.
    pub fn local_offer(&self) -> String {
        self.local_description(Role::Host)
    }

    pub async fn accept_remote_answer(&self, answer: &str) -> Result<(), SessionError> {
        self.session("accept an answer")?
            .accept_remote_answer(answer)
            .await
    }

    pub async fn set_answer(&self, answer: &str) -> Result<(), SessionError> {
        self.accept_remote_answer(answer).await
    }

    // ---------- joiner ----------

    /// Opens a joiner session for `offer` and waits for the final answer.
    pub async fn join_host(&self, offer: &str) -> Result<String, SessionError> {
        let conn = self.join(offer).await?;
        conn.wait_local_description().await
    }

    pub async fn accept_remote_offer(&self, offer: &str) -> Result<(), SessionError> {
        self.join(offer).await.map(|_| ())
    }

    /// Decodes before touching sessions: unreadable text leaves the current
    /// session, live or not, exactly as it was.
    async fn join(&self, offer: &str) -> Result<Arc<Connection>, SessionError> {
        let offer = codec::decode_expecting(offer, SdpKind::Offer).inspect_err(|err| {
            warn!(
                session = ?self.session_id(),
                error = %err,
                "remote offer rejected by decoder"
            );
        })?;
        let conn = self.session_for(Role::Joiner).await?;
        conn.accept_offer(offer).await?;
        Ok(conn)
    }

    /// Final answer text, empty until gathering completes.
    pub fn local_answer(&self) -> String {
        self.local_description(Role::Joiner)
    }

    // ---------- messaging ----------

    /// Sends `text` over the data channel. Before the channel is open the
    /// message is dropped, logged and reported as [`Delivery::NotOpen`].
    pub async fn send_message(&self, text: impl Into<String>) -> Result<Delivery, SessionError> {
        let Some(conn) = self.current() else {
            warn!(error = %SessionError::ChannelNotOpen, "message dropped, no session");
            self.context.emitter.emit_send_dropped(None);
            return Ok(Delivery::NotOpen);
        };
        match conn.send(text.into()).await {
            Ok(()) => Ok(Delivery::Sent),
            Err(SessionError::ChannelNotOpen) => {
                warn!(
                    session = %conn.id(),
                    state = %conn.state(),
                    error = %SessionError::ChannelNotOpen,
                    "message dropped"
                );
                self.context.emitter.emit_send_dropped(Some(conn.id()));
                Ok(Delivery::NotOpen)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn send_data(&self, text: impl Into<String>) -> Result<Delivery, SessionError> {
        self.send_message(text).await
    }

    /// Registers the inbound message handler, replacing any previous one.
    /// The handler survives session restarts.
    pub fn on_message_received<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        if self.context.handlers.replace(Arc::new(handler)) {
            info!("message handler replaced");
        }
    }

    pub fn on_data_received<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_message_received(handler);
    }

    // ---------- status ----------

    /// State of the current session; `New` when none was started.
    pub fn state(&self) -> ConnectionState {
        self.current()
            .map_or(ConnectionState::New, |conn| conn.state())
    }

    pub fn role(&self) -> Option<Role> {
        self.current().map(|conn| conn.role())
    }

    pub fn channel_readiness(&self) -> Readiness {
        self.current()
            .map_or(Readiness::default(), |conn| conn.readiness())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.current().map(|conn| conn.id().clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.context.emitter.subscribe()
    }

    /// Tears down the current session. The facade stays usable.
    pub async fn close(&self) {
        if let Some(conn) = self.current() {
            conn.close().await;
        }
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.current.lock().clone()
    }

    fn session(&self, op: &'static str) -> Result<Arc<Connection>, SessionError> {
        self.current().ok_or(SessionError::InvalidState {
            op,
            state: ConnectionState::New,
        })
    }

    fn local_description(&self, role: Role) -> String {
        match self.current() {
            Some(conn) if conn.role() == role => conn.local_description(),
            _ => String::new(),
        }
    }

    /// Session to run a role's first step on. An untouched session of the
    /// same role is reused; anything else is replaced or refused.
    async fn session_for(&self, role: Role) -> Result<Arc<Connection>, SessionError> {
        if let Some(conn) = self.current() {
            let state = conn.state();
            if conn.role() == role && state == ConnectionState::New {
                return Ok(conn);
            }
            if self.config.restart == RestartPolicy::Reject && !state.is_terminal() {
                return Err(SessionError::InvalidState {
                    op: "start a new session",
                    state,
                });
            }
        }

        let conn = Connection::open(
            role,
            self.engine.as_ref(),
            &self.config,
            self.context.clone(),
        )
        .await?;
        let previous = self.current.lock().replace(conn.clone());
        if let Some(previous) = previous {
            if !previous.state().is_terminal() {
                info!(
                    replaced = %previous.id(),
                    session = %conn.id(),
                    state = %previous.state(),
                    "live session replaced"
                );
            }
            previous.close().await;
        }
        Ok(conn)
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        if let Some(conn) = self.current.get_mut().take() {
            let id = conn.id().clone();
            // best effort; the engine connection is released with the last Arc
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { conn.close().await });
            }
            info!(session = %id, "peer dropped");
        }
    }
}
