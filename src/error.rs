use crate::peer::types::{ConnectionState, SdpKind};
use thiserror::Error;

/// Failure to turn caller-supplied text into a session description.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("description text is empty")]
    Empty,
    #[error("description is neither json nor the compact form")]
    UnrecognizedFormat,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid compressed payload: {0}")]
    Compression(#[from] std::io::Error),
    #[error("decompressed description exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("invalid description json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("description does not carry an sdp body")]
    MalformedSdp,
    #[error("expected an {expected} description, got an {found}")]
    UnexpectedKind { expected: SdpKind, found: SdpKind },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport engine: {0}")]
    Rtc(#[from] webrtc::Error),
    #[error("description rejected: {0}")]
    Rejected(String),
    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ice server {id}: url must not be empty")]
    EmptyUrl { id: String },
    #[error("ice server {id}: turn servers require username and credential")]
    MissingCredentials { id: String },
    #[error("data channel label must not be empty")]
    EmptyChannelLabel,
    #[error("unknown description format {0:?}, expected json or compact")]
    UnknownFormat(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {op} while the session is {state}")]
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },
    #[error("malformed session description: {0}")]
    Decode(#[from] CodecError),
    #[error("data channel is not open")]
    ChannelNotOpen,
    #[error("negotiation rejected: {0}")]
    NegotiationRejected(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, SessionError::Decode(_))
    }
}
