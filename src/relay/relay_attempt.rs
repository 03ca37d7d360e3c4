//! A single relay attempt against one destination.
//!
//! The attempt connects once, then runs two directions concurrently:
//! - uplink: payload tap -> destination, half-closing the destination when the caller
//!   finishes sending;
//! - downlink: destination -> response framer -> caller.
//!
//! The attempt ends when the destination closes or fails, or when the caller goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::address::NetLocation;
use crate::tcp::SocketConnector;
use crate::vless::VlessResponseFramer;

use super::message_channel::ResponseSink;
use super::payload_tap::PayloadSequence;
use super::relay_error::RelayError;

const DOWNLINK_BUF_SIZE: usize = 16384;

#[derive(Debug)]
pub enum AttemptOutcome {
    /// At least one destination byte reached the caller. A later failure is kept for logs
    /// only.
    Responded { error: Option<RelayError> },
    /// Nothing came back from the destination.
    NoResponse(RelayError),
    /// The caller's side closed or failed during the attempt.
    CallerClosed(RelayError),
}

enum FlowError {
    Caller(std::io::Error),
    Destination(std::io::Error),
}

pub struct RelayAttempt<'a> {
    pub location: &'a NetLocation,
    pub connector: &'a dyn SocketConnector,
    pub connect_timeout: Duration,
    pub version: u8,
}

impl RelayAttempt<'_> {
    pub async fn run(
        &self,
        payload: &mut PayloadSequence,
        response_sink: &ResponseSink,
    ) -> AttemptOutcome {
        let location = self.location;

        let stream = match timeout(self.connect_timeout, self.connector.connect(location)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return AttemptOutcome::NoResponse(RelayError::destination_unreachable(location, e));
            }
            Err(elapsed) => {
                return AttemptOutcome::NoResponse(RelayError::destination_unreachable(
                    location,
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out: {elapsed}"),
                    ),
                ));
            }
        };

        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let produced_response = AtomicBool::new(false);
        let mut tap = payload.tap(&produced_response);
        let mut framer = VlessResponseFramer::new(self.version);

        let uplink = async {
            loop {
                match tap.next_chunk().await {
                    Ok(Some(chunk)) => {
                        write_half
                            .write_all(&chunk)
                            .await
                            .map_err(FlowError::Destination)?;
                    }
                    Ok(None) => {
                        debug!("caller finished sending, half-closing {location}");
                        write_half
                            .shutdown()
                            .await
                            .map_err(FlowError::Destination)?;
                        return Ok(());
                    }
                    Err(e) => {
                        let _ = write_half.shutdown().await;
                        return Err(FlowError::Caller(e));
                    }
                }
            }
        };

        let downlink = async {
            let mut buf = vec![0u8; DOWNLINK_BUF_SIZE];
            loop {
                let n = read_half
                    .read(&mut buf)
                    .await
                    .map_err(FlowError::Destination)?;
                if n == 0 {
                    return Ok(());
                }
                produced_response.store(true, Ordering::Release);
                let chunk = framer.frame(Bytes::copy_from_slice(&buf[..n]));
                response_sink
                    .send(chunk)
                    .await
                    .map_err(FlowError::Caller)?;
            }
        };

        tokio::pin!(uplink);
        tokio::pin!(downlink);

        let mut uplink_done = false;
        let result: Result<(), FlowError> = loop {
            tokio::select! {
                res = &mut uplink, if !uplink_done => match res {
                    Ok(()) => uplink_done = true,
                    Err(e) => break Err(e),
                },
                res = &mut downlink => break res,
                _ = response_sink.closed() => {
                    break Err(FlowError::Caller(std::io::Error::new(
                        std::io::ErrorKind::ConnectionAborted,
                        "caller stopped reading responses",
                    )));
                }
            }
        };

        let responded = produced_response.load(Ordering::Acquire);
        match result {
            Ok(()) if responded => AttemptOutcome::Responded { error: None },
            Ok(()) => AttemptOutcome::NoResponse(RelayError::destination_unreachable(
                location,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "closed without sending a response",
                ),
            )),
            Err(FlowError::Destination(e)) if responded => AttemptOutcome::Responded {
                error: Some(RelayError::destination_unreachable(location, e)),
            },
            Err(FlowError::Destination(e)) => {
                AttemptOutcome::NoResponse(RelayError::destination_unreachable(location, e))
            }
            Err(FlowError::Caller(e)) => AttemptOutcome::CallerClosed(RelayError::TransportClosed(e)),
        }
    }
}
