//! Manual-signaling peer-to-peer data channel between two endpoints on a LAN.
//!
//! One side calls [`Peer::start_host`] and hands the returned offer text to
//! the other side out of band (paste, QR code). The other side answers with
//! [`Peer::join_host`], the host feeds that answer to
//! [`Peer::accept_remote_answer`], and both ends can then exchange text
//! messages.

pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod utils;

pub use config::{
    DescriptionFormat, IceServerKind, LogConfig, PeerConfig, RestartPolicy, ServerConfig,
};
pub use error::{CodecError, ConfigError, EngineError, SessionError};
pub use peer::codec::{decode, encode};
pub use peer::loopback::LoopbackEngine;
pub use peer::rtc::RtcEngine;
pub use peer::types::{
    ConnectionState, PeerEvent, Readiness, Role, SdpKind, SessionDescription, SessionId,
};
pub use session::{Delivery, Peer};
