use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use log::warn;

use super::types::{Config, TcpConfig, TimeoutConfig};
use crate::address::NetLocation;
use crate::relay::{DEFAULT_MAX_REPLAY_BYTES, RelayConfig};
use crate::uuid_util::parse_uuid;

const DEFAULT_FALLBACK_PORT: u16 = 443;

/// A validated server entry, ready to be started.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub path: Option<String>,
    pub no_delay: bool,
    pub relay: RelayConfig,
}

pub fn create_server_configs(all_configs: Vec<Config>) -> std::io::Result<Vec<ServerConfig>> {
    let mut bind_addresses = HashSet::new();
    let mut server_configs = Vec::with_capacity(all_configs.len());

    for config in all_configs {
        if !bind_addresses.insert(config.address) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("duplicate server address: {}", config.address),
            ));
        }
        server_configs.push(validate_server_config(config)?);
    }

    Ok(server_configs)
}

fn validate_server_config(config: Config) -> std::io::Result<ServerConfig> {
    let Config {
        address,
        user_id,
        fallback,
        path,
        tcp_settings,
        timeouts,
        max_replay_bytes,
    } = config;

    let user_id = parse_uuid(&user_id).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid user_id for server {address}: {e}"),
        )
    })?;

    let mut fallbacks = vec![];
    for fallback in fallback.into_vec() {
        let fallback = fallback.trim();
        if fallback.is_empty() {
            continue;
        }
        let location = NetLocation::from_str(fallback, Some(DEFAULT_FALLBACK_PORT)).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid fallback {fallback} for server {address}: {e}"),
            )
        })?;
        if location.address().is_empty() {
            warn!("Ignoring fallback without a hostname for server {address}: {fallback}");
            continue;
        }
        fallbacks.push(location);
    }

    if let Some(ref path) = path
        && !path.starts_with('/')
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("websocket path must start with '/': {path}"),
        ));
    }

    let TcpConfig { no_delay } = tcp_settings.unwrap_or_default();

    let TimeoutConfig {
        header_secs,
        connect_secs,
    } = timeouts.unwrap_or_default();
    if header_secs == 0 || connect_secs == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("timeouts must be positive for server {address}"),
        ));
    }

    Ok(ServerConfig {
        bind_address: address,
        path,
        no_delay,
        relay: RelayConfig {
            user_id,
            fallbacks,
            header_timeout: Duration::from_secs(header_secs),
            connect_timeout: Duration::from_secs(connect_secs),
            max_replay_bytes: max_replay_bytes.unwrap_or(DEFAULT_MAX_REPLAY_BYTES),
        },
    })
}
