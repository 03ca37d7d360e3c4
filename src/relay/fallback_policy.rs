//! Ordered retry over the primary destination and the configured fallbacks.

use std::time::Duration;

use log::{debug, info, warn};

use crate::address::NetLocation;
use crate::tcp::SocketConnector;

use super::message_channel::ResponseSink;
use super::payload_tap::PayloadSequence;
use super::relay_attempt::{AttemptOutcome, RelayAttempt};

#[derive(Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// A destination answered; the connection was relayed until it ended.
    Tunneled { location: NetLocation },
    /// Every candidate was tried and none sent a byte back.
    Exhausted { attempts: usize },
    /// The caller went away first.
    CallerClosed,
}

/// Builds the ordered candidate list: the destination named by the header first, then each
/// fallback with a non-empty hostname that isn't already present.
pub fn build_candidates(primary: NetLocation, fallbacks: &[NetLocation]) -> Vec<NetLocation> {
    let mut candidates = vec![primary];
    for fallback in fallbacks {
        if fallback.address().is_empty() || candidates.contains(fallback) {
            continue;
        }
        candidates.push(fallback.clone());
    }
    candidates
}

pub struct FallbackPolicy<'a> {
    pub connector: &'a dyn SocketConnector,
    pub connect_timeout: Duration,
    /// Client address, for logs.
    pub peer: &'a str,
}

impl FallbackPolicy<'_> {
    /// Runs one attempt per candidate, in order, until one produces a response.
    ///
    /// Attempts never overlap. Each attempt sees the whole payload from its start, so the
    /// loop stops early once the payload has outgrown the replay limit.
    pub async fn resolve(
        &self,
        candidates: &[NetLocation],
        payload: &mut PayloadSequence,
        response_sink: &ResponseSink,
        version: u8,
    ) -> RelayOutcome {
        let mut attempts = 0;

        for (index, location) in candidates.iter().enumerate() {
            if response_sink.is_closed() {
                debug!("{}: caller closed before connecting to {location}", self.peer);
                return RelayOutcome::CallerClosed;
            }

            if index == 0 {
                info!("{}: outbound connection to {location}", self.peer);
            } else {
                info!(
                    "{}: fallback connection to {location} ({} bytes replayed)",
                    self.peer,
                    payload.retained_len()
                );
            }

            attempts += 1;
            let attempt = RelayAttempt {
                location,
                connector: self.connector,
                connect_timeout: self.connect_timeout,
                version,
            };

            match attempt.run(payload, response_sink).await {
                AttemptOutcome::Responded { error } => {
                    if let Some(e) = error {
                        debug!("{}: tunnel to {location} ended with error: {e}", self.peer);
                    }
                    return RelayOutcome::Tunneled {
                        location: location.clone(),
                    };
                }
                AttemptOutcome::CallerClosed(e) => {
                    debug!("{}: {e}", self.peer);
                    return RelayOutcome::CallerClosed;
                }
                AttemptOutcome::NoResponse(e) => {
                    warn!("{}: no response: {e}", self.peer);
                    if !payload.is_retaining() && index + 1 < candidates.len() {
                        warn!(
                            "{}: payload exceeded the replay limit, skipping {} fallback(s)",
                            self.peer,
                            candidates.len() - index - 1
                        );
                        break;
                    }
                }
            }
        }

        RelayOutcome::Exhausted { attempts }
    }
}
