use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Creates the offer and the data channel.
    Host,
    /// Consumes the offer and answers it.
    Joiner,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// One half of the handshake. Serializes to the same `{type, sdp}` shape a
/// browser produces for `RTCSessionDescription`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    DescriptionCreated,
    AwaitingRemote,
    DescriptionExchanged,
    ChannelOpen,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Position in the negotiation order; both terminal states share the top rank.
    pub(crate) fn rank(self) -> u8 {
        match self {
            ConnectionState::New => 0,
            ConnectionState::DescriptionCreated => 1,
            ConnectionState::AwaitingRemote => 2,
            ConnectionState::DescriptionExchanged => 3,
            ConnectionState::ChannelOpen => 4,
            ConnectionState::Closed | ConnectionState::Failed => 5,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::DescriptionCreated => "description-created",
            ConnectionState::AwaitingRemote => "awaiting-remote",
            ConnectionState::DescriptionExchanged => "description-exchanged",
            ConnectionState::ChannelOpen => "channel-open",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Readiness of the data channel, tracked apart from [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Readiness {
    #[default]
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

/// Locally discovered connectivity option
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl Candidate {
    pub fn kind(&self) -> CandidateKind {
        let typ = self
            .candidate
            .split_whitespace()
            .skip_while(|token| *token != "typ")
            .nth(1);
        match typ {
            Some("host") => CandidateKind::Host,
            Some("srflx") => CandidateKind::ServerReflexive,
            Some("prflx") => CandidateKind::PeerReflexive,
            Some("relay") => CandidateKind::Relay,
            _ => CandidateKind::Unknown,
        }
    }
}

/// Gathering progress as reported by the engine. Completion has its own
/// variant instead of riding on an empty candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatheringEvent {
    Candidate(Candidate),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status notifications published on the side channel returned by `Peer::subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    StateChanged {
        session: SessionId,
        state: ConnectionState,
    },
    Connected {
        session: SessionId,
    },
    Disconnected {
        session: SessionId,
    },
    /// A send was attempted before the channel was open.
    SendDropped {
        session: Option<SessionId>,
    },
    Failed {
        session: SessionId,
        reason: String,
    },
}
