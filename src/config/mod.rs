//! Configuration loading.
//!
//! - [`types`]: YAML configuration types
//! - [`validate`]: validation into [`ServerConfig`]
//!
//! Configuration comes from YAML files given on the command line, or from the `UUID`,
//! `PROXY` and `BIND_ADDRESS` environment variables when no file is given.

mod types;
mod validate;

use std::net::SocketAddr;

pub use types::*;
pub use validate::{ServerConfig, create_server_configs};

use crate::option_util::NoneOrSome;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Loads configuration files from the provided paths.
///
/// Reads each file, parses it as YAML, and returns the combined list of configs.
pub async fn load_configs(args: &[String]) -> std::io::Result<Vec<Config>> {
    let mut all_configs = vec![];
    for config_filename in args {
        let config_bytes = match tokio::fs::read(config_filename).await {
            Ok(b) => b,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not read config file {config_filename}: {e}"),
                ));
            }
        };

        let config_str = match String::from_utf8(config_bytes) {
            Ok(s) => s,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not parse config file {config_filename} as UTF8: {e}"),
                ));
            }
        };

        let mut configs = match serde_yaml::from_str::<Vec<Config>>(&config_str) {
            Ok(c) => c,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not parse config file {config_filename} as config YAML: {e}"),
                ));
            }
        };
        all_configs.append(&mut configs)
    }

    Ok(all_configs)
}

/// Builds a single server config from `UUID`, `PROXY` and `BIND_ADDRESS`.
pub fn config_from_env() -> std::io::Result<Config> {
    config_from_vars(
        std::env::var("UUID").ok(),
        std::env::var("PROXY").ok(),
        std::env::var("BIND_ADDRESS").ok(),
    )
}

fn config_from_vars(
    user_id: Option<String>,
    proxy: Option<String>,
    bind_address: Option<String>,
) -> std::io::Result<Config> {
    let user_id = user_id.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "UUID environment variable is not set",
        )
    })?;

    let bind_address = bind_address
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_BIND_ADDRESS);
    let address: SocketAddr = bind_address.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid BIND_ADDRESS {bind_address}: {e}"),
        )
    })?;

    let fallback = match proxy {
        Some(proxy) => NoneOrSome::from(
            proxy
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
        ),
        None => NoneOrSome::Unspecified,
    };

    Ok(Config {
        address,
        user_id: user_id.trim().to_string(),
        fallback,
        path: None,
        tcp_settings: None,
        timeouts: None,
        max_replay_bytes: None,
    })
}
