//! Configuration file types.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::option_util::NoneOrSome;

pub const DEFAULT_HEADER_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub fn default_true() -> bool {
    true
}

fn default_header_timeout_secs() -> u64 {
    DEFAULT_HEADER_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// One relay server entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Socket address to listen on.
    pub address: SocketAddr,
    /// Accepted client identity, as a UUID.
    pub user_id: String,
    /// Destinations tried in order when the requested one gives no response, as
    /// `host[:port]` (port 443 when omitted).
    #[serde(
        alias = "fallbacks",
        default,
        skip_serializing_if = "NoneOrSome::is_unspecified"
    )]
    pub fallback: NoneOrSome<String>,
    /// Only upgrade requests for this path are accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<TcpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutConfig>,
    /// Payload bytes kept for replay to fallbacks. A caller that sends more before any
    /// response loses fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replay_bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    #[serde(default = "default_true")]
    pub no_delay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig { no_delay: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// How long a caller may take to send the complete request header.
    #[serde(default = "default_header_timeout_secs")]
    pub header_secs: u64,
    /// Limit for each destination connect.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            header_secs: DEFAULT_HEADER_TIMEOUT_SECS,
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}
