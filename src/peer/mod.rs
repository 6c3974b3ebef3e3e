pub mod codec;
pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
pub mod loopback;
pub mod rtc;
pub mod state;
pub mod types;

pub use connection::{Connection, SessionContext};
pub use data_channel::{ChannelAdapter, HandlerSlot, MessageHandler};
pub use engine::{EngineChannel, EngineConnection, EngineEvent, EventSink, TransportEngine};
pub use ice::{CandidateSummary, GatheringTracker};
pub use loopback::LoopbackEngine;
pub use rtc::RtcEngine;
pub use state::ActiveSession;
pub use types::{
    Candidate, CandidateKind, ConnectionState, GatheringEvent, PeerEvent, Readiness, Role,
    SdpKind, SessionDescription, SessionId,
};
