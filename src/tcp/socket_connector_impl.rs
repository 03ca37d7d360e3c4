//! TcpSocketConnector - direct TCP implementation of SocketConnector.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};

use crate::address::NetLocation;
use crate::async_stream::AsyncStream;
use crate::socket_util::{new_tcp_socket, set_tcp_keepalive};

use super::socket_connector::SocketConnector;

#[derive(Debug)]
pub struct TcpSocketConnector {
    no_delay: bool,
}

impl TcpSocketConnector {
    pub fn new(no_delay: bool) -> Self {
        Self { no_delay }
    }
}

async fn resolve_location(location: &NetLocation) -> std::io::Result<Vec<SocketAddr>> {
    if let Some(socket_addr) = location.to_socket_addr_nonblocking() {
        return Ok(vec![socket_addr]);
    }

    let (address, port) = location.components();
    if address.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty destination hostname",
        ));
    }

    let resolved = tokio::net::lookup_host((address.to_string(), port))
        .await?
        .filter(|addr| !addr.ip().is_unspecified())
        .collect::<Vec<_>>();
    debug!("resolved {location} -> {resolved:?}");

    if resolved.is_empty() {
        return Err(std::io::Error::other(format!(
            "could not resolve location: {location}"
        )));
    }
    Ok(resolved)
}

#[async_trait]
impl SocketConnector for TcpSocketConnector {
    async fn connect(&self, location: &NetLocation) -> std::io::Result<Box<dyn AsyncStream>> {
        let mut last_error = None;

        for target_addr in resolve_location(location).await? {
            let tcp_socket = new_tcp_socket(target_addr.is_ipv6())?;
            let stream = match tcp_socket.connect(target_addr).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("connect to {target_addr} ({location}) failed: {e}");
                    last_error = Some(e);
                    continue;
                }
            };

            if let Err(e) = set_tcp_keepalive(
                &stream,
                Duration::from_secs(120),
                Duration::from_secs(30),
            ) {
                error!("Failed to set TCP keepalive: {e}");
            }

            if self.no_delay
                && let Err(e) = stream.set_nodelay(true)
            {
                error!("Failed to set TCP no-delay: {e}");
            }

            return Ok(Box::new(stream));
        }

        Err(last_error.unwrap_or_else(|| {
            std::io::Error::other(format!("no addresses to connect to for {location}"))
        }))
    }
}
