//! The replayable payload that follows the request header.
//!
//! Each relay attempt reads the payload through its own [`PayloadTap`]. Chunks pulled from
//! the live inbound queue are retained, so a later attempt replays exactly the bytes an
//! earlier one consumed before continuing with live messages. Once an attempt has produced
//! a response there will be no further attempt, and retention stops.
//!
//! Retention also stops when the retained bytes would exceed the replay limit. From then on
//! the payload can no longer be replayed, so no later attempt may be started.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use log::debug;

use super::DEFAULT_MAX_REPLAY_BYTES;
use super::message_channel::InboundMessages;

#[derive(Debug)]
pub struct PayloadSequence {
    inbound: InboundMessages,
    retained: Vec<Bytes>,
    retained_bytes: usize,
    max_retained_bytes: usize,
    retaining: bool,
}

impl PayloadSequence {
    /// `first_chunk` holds whatever followed the header in the message that completed it.
    pub fn new(first_chunk: Bytes, inbound: InboundMessages) -> Self {
        let retained_bytes = first_chunk.len();
        let retained = if first_chunk.is_empty() {
            vec![]
        } else {
            vec![first_chunk]
        };
        Self {
            inbound,
            retained,
            retained_bytes,
            max_retained_bytes: DEFAULT_MAX_REPLAY_BYTES,
            retaining: true,
        }
    }

    /// Sets how many payload bytes are kept for replay before retention stops.
    pub fn with_replay_limit(mut self, max_retained_bytes: usize) -> Self {
        self.max_retained_bytes = max_retained_bytes;
        self
    }

    /// Opens a tap that starts from the beginning of the payload.
    ///
    /// `produced_response` is set by the attempt once the destination has sent a byte.
    pub fn tap<'a>(&'a mut self, produced_response: &'a AtomicBool) -> PayloadTap<'a> {
        PayloadTap {
            sequence: self,
            produced_response,
            cursor: 0,
        }
    }

    pub fn retained_len(&self) -> usize {
        self.retained_bytes
    }

    /// False once the payload can no longer be replayed from its start.
    pub fn is_retaining(&self) -> bool {
        self.retaining
    }

    /// Drops the first `consumed` chunks, which will never be replayed.
    fn stop_retaining(&mut self, consumed: usize) {
        self.retained.drain(..consumed);
        self.retained_bytes = self.retained.iter().map(Bytes::len).sum();
        self.retaining = false;
    }
}

pub struct PayloadTap<'a> {
    sequence: &'a mut PayloadSequence,
    produced_response: &'a AtomicBool,
    cursor: usize,
}

impl PayloadTap<'_> {
    /// Returns the next payload chunk for this attempt, or `None` when the caller has
    /// finished sending.
    ///
    /// Cancel safe: a chunk taken from the live queue is recorded before it is returned.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        if self.sequence.retaining && self.produced_response.load(Ordering::Acquire) {
            self.sequence.stop_retaining(self.cursor);
            self.cursor = 0;
        }

        if self.cursor < self.sequence.retained.len() {
            let chunk = self.sequence.retained[self.cursor].clone();
            self.cursor += 1;
            return Ok(Some(chunk));
        }

        let chunk = self.sequence.inbound.next_message().await?;
        if let Some(ref chunk) = chunk
            && self.sequence.retaining
        {
            let sequence = &mut *self.sequence;
            if sequence.retained_bytes + chunk.len() > sequence.max_retained_bytes {
                debug!(
                    "payload exceeds replay limit of {} bytes, no longer retaining",
                    sequence.max_retained_bytes
                );
                sequence.stop_retaining(self.cursor);
                self.cursor = 0;
            } else {
                sequence.retained.push(chunk.clone());
                sequence.retained_bytes += chunk.len();
                self.cursor += 1;
            }
        }
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::message_channel::inbound_channel;

    async fn drain(tap: &mut PayloadTap<'_>) -> Vec<u8> {
        let mut out = vec![];
        while let Some(chunk) = tap.next_chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_second_tap_replays_everything() {
        let (tx, inbound) = inbound_channel(None);
        let mut sequence = PayloadSequence::new(Bytes::from_static(b"head-"), inbound);
        tx.send(Ok(Bytes::from_static(b"one-"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"two"))).await.unwrap();
        drop(tx);

        let produced_response = AtomicBool::new(false);
        let first = drain(&mut sequence.tap(&produced_response)).await;
        let second = drain(&mut sequence.tap(&produced_response)).await;
        assert_eq!(first, b"head-one-two");
        assert_eq!(second, first);
        assert_eq!(sequence.retained_len(), first.len());
    }

    #[tokio::test]
    async fn test_partially_consumed_tap_replays_then_continues_live() {
        let (tx, inbound) = inbound_channel(None);
        let mut sequence = PayloadSequence::new(Bytes::new(), inbound);
        tx.send(Ok(Bytes::from_static(b"a"))).await.unwrap();

        let produced_response = AtomicBool::new(false);
        {
            let mut tap = sequence.tap(&produced_response);
            assert_eq!(tap.next_chunk().await.unwrap().unwrap(), "a");
        }

        tx.send(Ok(Bytes::from_static(b"b"))).await.unwrap();
        drop(tx);

        let mut tap = sequence.tap(&produced_response);
        assert_eq!(drain(&mut tap).await, b"ab");
    }

    #[tokio::test]
    async fn test_retention_stops_after_response() {
        let (tx, inbound) = inbound_channel(None);
        let mut sequence = PayloadSequence::new(Bytes::from_static(b"first"), inbound);
        tx.send(Ok(Bytes::from_static(b"second"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"third"))).await.unwrap();
        drop(tx);

        let produced_response = AtomicBool::new(false);
        let mut tap = sequence.tap(&produced_response);
        assert_eq!(tap.next_chunk().await.unwrap().unwrap(), "first");
        produced_response.store(true, Ordering::Release);
        assert_eq!(tap.next_chunk().await.unwrap().unwrap(), "second");
        assert_eq!(tap.next_chunk().await.unwrap().unwrap(), "third");
        assert!(tap.next_chunk().await.unwrap().is_none());
        drop(tap);

        assert!(!sequence.is_retaining());
        assert_eq!(sequence.retained_len(), 0);
    }

    #[tokio::test]
    async fn test_unconsumed_retained_chunks_survive_release() {
        let (tx, inbound) = inbound_channel(None);
        let mut sequence = PayloadSequence::new(Bytes::from_static(b"x"), inbound);
        tx.send(Ok(Bytes::from_static(b"y"))).await.unwrap();
        drop(tx);

        let produced_response = AtomicBool::new(false);
        drain(&mut sequence.tap(&produced_response)).await;

        // A new attempt gets a response before reading anything; it must still see the
        // whole payload.
        produced_response.store(true, Ordering::Release);
        assert_eq!(drain(&mut sequence.tap(&produced_response)).await, b"xy");
    }

    #[tokio::test]
    async fn test_replay_limit_stops_retention() {
        let (tx, inbound) = inbound_channel(None);
        let mut sequence =
            PayloadSequence::new(Bytes::from_static(b"abc"), inbound).with_replay_limit(8);
        tx.send(Ok(Bytes::from_static(b"defg"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"hi"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"j"))).await.unwrap();
        drop(tx);

        let produced_response = AtomicBool::new(false);
        let mut tap = sequence.tap(&produced_response);
        assert_eq!(drain(&mut tap).await, b"abcdefghij");
        drop(tap);

        assert!(!sequence.is_retaining());
        assert_eq!(sequence.retained_len(), 0);
    }

    #[tokio::test]
    async fn test_payload_within_replay_limit_is_retained() {
        let (tx, inbound) = inbound_channel(None);
        let mut sequence =
            PayloadSequence::new(Bytes::from_static(b"abc"), inbound).with_replay_limit(7);
        tx.send(Ok(Bytes::from_static(b"defg"))).await.unwrap();
        drop(tx);

        let produced_response = AtomicBool::new(false);
        drain(&mut sequence.tap(&produced_response)).await;
        assert!(sequence.is_retaining());
        assert_eq!(sequence.retained_len(), 7);
    }
}
