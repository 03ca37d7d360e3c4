mod fallback_policy;
mod message_channel;
mod payload_tap;
mod relay_attempt;
mod relay_error;
mod relay_orchestrator;

use std::time::Duration;

use crate::address::NetLocation;

pub use fallback_policy::{FallbackPolicy, RelayOutcome, build_candidates};
pub use message_channel::{
    InboundMessages, InboundSender, ResponseSink, inbound_channel, response_channel,
};
pub use relay_error::RelayError;
pub use relay_orchestrator::{RelayOrchestrator, RelayState};

/// Payload bytes kept for replay to fallback destinations unless configured otherwise.
pub const DEFAULT_MAX_REPLAY_BYTES: usize = 1024 * 1024;

/// Per-server relay settings, shared by every connection.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub user_id: [u8; 16],
    pub fallbacks: Vec<NetLocation>,
    pub header_timeout: Duration,
    pub connect_timeout: Duration,
    /// Once the caller has sent more than this without any response, fallback is disabled.
    pub max_replay_bytes: usize,
}
