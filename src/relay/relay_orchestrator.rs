//! Drives one tunneled connection: header stage, then the fallback loop.

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use tokio::time::timeout;

use crate::tcp::SocketConnector;
use crate::vless::{RequestHeader, decode_request_header, vless_header::MAX_HEADER_LEN};

use super::RelayConfig;
use super::fallback_policy::{FallbackPolicy, RelayOutcome, build_candidates};
use super::message_channel::{InboundMessages, ResponseSink};
use super::payload_tap::PayloadSequence;
use super::relay_error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    AwaitingHeader,
    Relaying,
    Closed,
    Failed,
}

pub struct RelayOrchestrator<'a> {
    peer: &'a str,
    config: &'a RelayConfig,
    connector: &'a dyn SocketConnector,
    state: RelayState,
}

impl<'a> RelayOrchestrator<'a> {
    pub fn new(peer: &'a str, config: &'a RelayConfig, connector: &'a dyn SocketConnector) -> Self {
        Self {
            peer,
            config,
            connector,
            state: RelayState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Relays one connection to completion.
    ///
    /// Returns an error only when the header stage fails; in that case no destination
    /// connection has been opened. Dropping `response_sink` on return lets the transport
    /// close the caller's connection.
    pub async fn run(
        &mut self,
        mut inbound: InboundMessages,
        response_sink: ResponseSink,
    ) -> std::io::Result<RelayOutcome> {
        let header_result = match timeout(
            self.config.header_timeout,
            read_request_header(&mut inbound, &self.config.user_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RelayError::MalformedHeader(
                "timed out waiting for request header".to_string(),
            )),
        };

        let (header, first_chunk) = match header_result {
            Ok(v) => v,
            Err(e) => {
                self.state = RelayState::Failed;
                return Err(e.into());
            }
        };

        debug!(
            "{}: request for {} (version {}, {} payload bytes with header)",
            self.peer,
            header.location,
            header.version,
            first_chunk.len()
        );
        self.state = RelayState::Relaying;

        let candidates = build_candidates(header.location, &self.config.fallbacks);
        let mut payload = PayloadSequence::new(first_chunk, inbound)
            .with_replay_limit(self.config.max_replay_bytes);
        let policy = FallbackPolicy {
            connector: self.connector,
            connect_timeout: self.config.connect_timeout,
            peer: self.peer,
        };
        let outcome = policy
            .resolve(&candidates, &mut payload, &response_sink, header.version)
            .await;

        if let RelayOutcome::Exhausted { attempts } = outcome {
            warn!("{}: no destination responded after {attempts} attempt(s)", self.peer);
        }

        self.state = RelayState::Closed;
        Ok(outcome)
    }
}

/// Accumulates inbound messages until they hold a complete header. Returns the header and
/// whatever followed it.
async fn read_request_header(
    inbound: &mut InboundMessages,
    user_id: &[u8; 16],
) -> Result<(RequestHeader, Bytes), RelayError> {
    let mut buf = BytesMut::new();
    loop {
        let message = match inbound.next_message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(RelayError::MalformedHeader(format!(
                    "caller closed after {} header bytes",
                    buf.len()
                )));
            }
            Err(e) => return Err(RelayError::TransportClosed(e)),
        };
        buf.extend_from_slice(&message);

        match decode_request_header(&buf, user_id) {
            Ok(header) => {
                let mut data = buf.freeze();
                let first_chunk = data.split_off(header.header_len);
                return Ok((header, first_chunk));
            }
            Err(e) if e.is_incomplete() => {
                if buf.len() >= MAX_HEADER_LEN {
                    return Err(RelayError::MalformedHeader(format!(
                        "no complete header within {MAX_HEADER_LEN} bytes"
                    )));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
