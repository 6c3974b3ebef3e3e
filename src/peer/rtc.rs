use crate::config::ServerConfig;
use crate::error::EngineError;
use crate::peer::engine::{EngineChannel, EngineConnection, EngineEvent, EventSink, TransportEngine};
use crate::peer::types::{Candidate, GatheringEvent, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::{
    api::{APIBuilder, API},
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// [`TransportEngine`] backed by the `webrtc` crate.
pub struct RtcEngine {
    api: API,
}

impl RtcEngine {
    pub fn new() -> Self {
        Self {
            api: APIBuilder::new().build(),
        }
    }
}

impl Default for RtcEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![config.normalized_url()],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|err| EngineError::Rejected(err.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(EngineError::Rejected(format!(
                "unsupported description type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl TransportEngine for RtcEngine {
    async fn connect(
        &self,
        ice_servers: &[ServerConfig],
        events: EventSink,
    ) -> Result<Arc<dyn EngineConnection>, EngineError> {
        let pc = Arc::new(self.api.new_peer_connection(rtc_config(ice_servers)).await?);
        info!(ice_servers = ice_servers.len(), "peer connection created");

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let event = match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => Some(GatheringEvent::Candidate(Candidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    })),
                    Err(err) => {
                        warn!(error = %err, "dropping candidate that cannot be serialized");
                        None
                    }
                },
                // a null candidate is how the engine reports the end of gathering
                None => Some(GatheringEvent::Complete),
            };
            if let Some(event) = event {
                let _ = sink.send(EngineEvent::Gathering(event));
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!(?state, "ice gathering state changed");
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!(state = ?st, "peer connection state changed");
            if st == RTCPeerConnectionState::Failed {
                let _ = sink.send(EngineEvent::ConnectionFailed(
                    "peer connection failed".to_string(),
                ));
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            debug!(label = dc.label(), "remote data channel offered");
            let channel: Arc<dyn EngineChannel> = Arc::new(RtcChannel { dc: dc.clone() });
            let _ = sink.send(EngineEvent::ChannelOffered(channel));
            attach_dc(&dc, sink.clone());
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcConnection { pc, events }))
    }
}

/// Forwards a data channel's callbacks into the session queue.
fn attach_dc(dc: &Arc<RTCDataChannel>, sink: EventSink) {
    let on_open = sink.clone();
    dc.on_open(Box::new(move || {
        let _ = on_open.send(EngineEvent::ChannelOpen);
        Box::pin(async {})
    }));

    let on_message = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let _ = on_message.send(EngineEvent::ChannelMessage(msg.data));
        Box::pin(async {})
    }));

    dc.on_close(Box::new(move || {
        let _ = sink.send(EngineEvent::ChannelClosed);
        Box::pin(async {})
    }));
}

struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
    events: EventSink,
}

#[async_trait]
impl EngineConnection for RtcConnection {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn EngineChannel>, EngineError> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await?;
        attach_dc(&dc, self.events.clone());
        Ok(Arc::new(RtcChannel { dc }))
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        match from_rtc(desc) {
            Ok(desc) => Some(desc),
            Err(err) => {
                warn!(error = %err, "local description cannot be exported");
                None
            }
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await?;
        Ok(())
    }
}

struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl EngineChannel for RtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.dc.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.dc.close().await?;
        Ok(())
    }
}
