//! Boundary to the real-time transport engine that does the actual ICE, DTLS
//! and SCTP work. Engine callbacks are turned into [`EngineEvent`]s on a
//! per-session queue; the connection state machine drains that queue in order.

use crate::config::ServerConfig;
use crate::error::EngineError;
use crate::peer::types::{GatheringEvent, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

pub enum EngineEvent {
    Gathering(GatheringEvent),
    /// The remote side opened a channel towards us.
    ChannelOffered(Arc<dyn EngineChannel>),
    ChannelOpen,
    ChannelMessage(Bytes),
    ChannelClosed,
    ConnectionFailed(String),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::Gathering(event) => f.debug_tuple("Gathering").field(event).finish(),
            EngineEvent::ChannelOffered(channel) => f
                .debug_tuple("ChannelOffered")
                .field(&channel.label())
                .finish(),
            EngineEvent::ChannelOpen => f.write_str("ChannelOpen"),
            EngineEvent::ChannelMessage(data) => {
                f.debug_tuple("ChannelMessage").field(&data.len()).finish()
            }
            EngineEvent::ChannelClosed => f.write_str("ChannelClosed"),
            EngineEvent::ConnectionFailed(reason) => {
                f.debug_tuple("ConnectionFailed").field(reason).finish()
            }
        }
    }
}

#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Creates one connection object. Every callback it fires lands in `events`.
    async fn connect(
        &self,
        ice_servers: &[ServerConfig],
        events: EventSink,
    ) -> Result<Arc<dyn EngineConnection>, EngineError>;
}

#[async_trait]
pub trait EngineConnection: Send + Sync {
    /// Opens a local channel; its open/message/close callbacks go to the connection's sink.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn EngineChannel>, EngineError>;
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    /// Applies a local description, which starts candidate gathering.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    /// Current local description including the candidates gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait EngineChannel: Send + Sync {
    fn label(&self) -> String;
    async fn send_text(&self, text: String) -> Result<(), EngineError>;
    async fn close(&self) -> Result<(), EngineError>;
}
