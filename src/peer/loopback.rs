//! In-process [`TransportEngine`]: connections created by the same
//! [`LoopbackEngine`] find each other through the endpoint id embedded in
//! their descriptions, and their channels hand messages straight to the
//! other side's event queue. Used by the tests and for offline demos.

use crate::config::ServerConfig;
use crate::error::EngineError;
use crate::peer::engine::{EngineChannel, EngineConnection, EngineEvent, EventSink, TransportEngine};
use crate::peer::types::{Candidate, GatheringEvent, SdpKind, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

const ENDPOINT_ATTR: &str = "a=loopback-endpoint:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatheringMode {
    /// One host candidate and completion as soon as a local description is applied.
    #[default]
    Immediate,
    /// Nothing is emitted until the test drives it through [`LoopbackConnection`].
    Manual,
}

#[derive(Default)]
struct Network {
    next_id: AtomicU64,
    gathering: GatheringMode,
    reject_remote: AtomicBool,
    endpoints: Mutex<HashMap<u64, Weak<LoopbackConnection>>>,
    created: Mutex<Vec<Arc<LoopbackConnection>>>,
}

#[derive(Clone, Default)]
pub struct LoopbackEngine {
    network: Arc<Network>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manual() -> Self {
        Self {
            network: Arc::new(Network {
                gathering: GatheringMode::Manual,
                ..Default::default()
            }),
        }
    }

    /// Makes every later `set_remote_description` fail, as an incompatible peer would.
    pub fn reject_remote_descriptions(&self, reject: bool) {
        self.network.reject_remote.store(reject, Ordering::SeqCst);
    }

    /// Connections in creation order.
    pub fn connections(&self) -> Vec<Arc<LoopbackConnection>> {
        self.network.created.lock().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<LoopbackConnection>> {
        self.network.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportEngine for LoopbackEngine {
    async fn connect(
        &self,
        _ice_servers: &[ServerConfig],
        events: EventSink,
    ) -> Result<Arc<dyn EngineConnection>, EngineError> {
        let id = self.network.next_id.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(LoopbackConnection {
            id,
            network: Arc::downgrade(&self.network),
            gathering: self.network.gathering,
            events,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            channel: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.network
            .endpoints
            .lock()
            .insert(id, Arc::downgrade(&conn));
        self.network.created.lock().push(conn.clone());
        Ok(conn)
    }
}

pub struct LoopbackConnection {
    id: u64,
    network: Weak<Network>,
    gathering: GatheringMode,
    events: EventSink,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    channel: Mutex<Option<Arc<LoopbackChannel>>>,
    closed: AtomicBool,
}

impl LoopbackConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pushes an arbitrary event into this connection's queue.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_candidate(&self) {
        self.emit(EngineEvent::Gathering(GatheringEvent::Candidate(
            self.host_candidate(),
        )));
    }

    pub fn complete_gathering(&self) {
        self.emit(EngineEvent::Gathering(GatheringEvent::Complete));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn host_candidate(&self) -> Candidate {
        Candidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                self.id,
                40000 + self.id
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    fn describe(&self, kind: SdpKind) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no=- {id} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n{ENDPOINT_ATTR}{id}\r\n",
            id = self.id
        );
        if let Some(channel) = self.channel.lock().as_ref() {
            sdp.push_str(&format!("a=loopback-channel:{}\r\n", channel.label));
        }
        SessionDescription { kind, sdp }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, remote: &SessionDescription) -> Result<Arc<LoopbackConnection>, EngineError> {
        let id = remote
            .sdp
            .lines()
            .find_map(|line| line.strip_prefix(ENDPOINT_ATTR))
            .and_then(|id| id.trim().parse::<u64>().ok())
            .ok_or_else(|| EngineError::Rejected("description names no loopback endpoint".into()))?;
        self.network
            .upgrade()
            .and_then(|network| network.endpoints.lock().get(&id).and_then(Weak::upgrade))
            .ok_or_else(|| EngineError::Rejected(format!("loopback endpoint {id} is gone")))
    }

    /// Wires the host's pending channel to a fresh channel on the joiner side.
    fn link(&self, joiner: &LoopbackConnection) {
        let Some(host_end) = self.channel.lock().clone() else {
            debug!(endpoint = self.id, "no local channel to link");
            return;
        };
        let joiner_end = Arc::new(LoopbackChannel::new(&host_end.label, joiner.events.clone()));
        joiner_end.connect(self.events.clone());
        host_end.connect(joiner.events.clone());
        *joiner.channel.lock() = Some(joiner_end.clone());

        joiner.emit(EngineEvent::ChannelOffered(joiner_end));
        joiner.emit(EngineEvent::ChannelOpen);
        self.emit(EngineEvent::ChannelOpen);
    }
}

#[async_trait]
impl EngineConnection for LoopbackConnection {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn EngineChannel>, EngineError> {
        self.ensure_open()?;
        let channel = Arc::new(LoopbackChannel::new(label, self.events.clone()));
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.ensure_open()?;
        Ok(self.describe(SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.ensure_open()?;
        match self.remote.lock().as_ref() {
            Some(remote) if remote.kind == SdpKind::Offer => Ok(self.describe(SdpKind::Answer)),
            _ => Err(EngineError::Rejected("answer requires a remote offer".into())),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.ensure_open()?;
        *self.local.lock() = Some(desc);
        if self.gathering == GatheringMode::Immediate {
            self.emit_candidate();
            self.complete_gathering();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.ensure_open()?;
        let rejecting = self
            .network
            .upgrade()
            .is_some_and(|network| network.reject_remote.load(Ordering::SeqCst));
        if rejecting {
            return Err(EngineError::Rejected("incompatible remote description".into()));
        }
        let has_offer = matches!(
            self.local.lock().as_ref(),
            Some(local) if local.kind == SdpKind::Offer
        );
        if desc.kind == SdpKind::Answer && !has_offer {
            return Err(EngineError::Rejected("answer without a local offer".into()));
        }

        let peer = self.lookup(&desc)?;
        let is_answer = desc.kind == SdpKind::Answer;
        *self.remote.lock() = Some(desc);
        if is_answer {
            self.link(&peer);
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.shutdown();
        }
        if let Some(network) = self.network.upgrade() {
            network.endpoints.lock().remove(&self.id);
        }
        Ok(())
    }
}

pub struct LoopbackChannel {
    label: String,
    own: EventSink,
    peer: Mutex<Option<EventSink>>,
    open: AtomicBool,
}

impl LoopbackChannel {
    fn new(label: &str, own: EventSink) -> Self {
        Self {
            label: label.to_string(),
            own,
            peer: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    fn connect(&self, peer: EventSink) {
        *self.peer.lock() = Some(peer);
        self.open.store(true, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.own.send(EngineEvent::ChannelClosed);
        if let Some(peer) = self.peer.lock().take() {
            let _ = peer.send(EngineEvent::ChannelClosed);
        }
    }
}

#[async_trait]
impl EngineChannel for LoopbackChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let peer = self.peer.lock().clone().ok_or(EngineError::Closed)?;
        peer.send(EngineEvent::ChannelMessage(Bytes::from(text)))
            .map_err(|_| EngineError::Closed)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.shutdown();
        Ok(())
    }
}
