//! Bounded channels between the caller's transport and the relay.
//!
//! The transport pushes every inbound message into an [`InboundMessages`] queue and drains
//! a [`ResponseSink`] for outbound messages. Both are bounded, so a slow destination stalls
//! the transport reader and a slow caller stalls destination reads.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Number of messages (not bytes) buffered per direction.
pub const MESSAGE_CHANNEL_BUFFER: usize = 16;

/// Transport side of the inbound queue. Sending an `Err` reports that the caller's
/// connection failed rather than ended cleanly.
pub type InboundSender = mpsc::Sender<std::io::Result<Bytes>>;

/// The logical inbound byte sequence: early data first, then live messages.
#[derive(Debug)]
pub struct InboundMessages {
    early_data: Option<Bytes>,
    rx: mpsc::Receiver<std::io::Result<Bytes>>,
    ended: bool,
}

impl InboundMessages {
    pub fn new(early_data: Option<Bytes>, rx: mpsc::Receiver<std::io::Result<Bytes>>) -> Self {
        Self {
            early_data,
            rx,
            ended: false,
        }
    }

    /// Returns the next non-empty message, or `None` once the caller has finished sending.
    ///
    /// Cancel safe: dropping the returned future never loses a message.
    pub async fn next_message(&mut self) -> std::io::Result<Option<Bytes>> {
        if let Some(early_data) = self.early_data.take() {
            return Ok(Some(early_data));
        }
        if self.ended {
            return Ok(None);
        }
        loop {
            match self.rx.recv().await {
                Some(Ok(message)) => {
                    if message.is_empty() {
                        continue;
                    }
                    return Ok(Some(message));
                }
                Some(Err(e)) => {
                    self.ended = true;
                    return Err(e);
                }
                None => {
                    self.ended = true;
                    return Ok(None);
                }
            }
        }
    }
}

/// Creates the inbound queue, with `early_data` placed ahead of anything the transport
/// sends.
pub fn inbound_channel(early_data: Option<Bytes>) -> (InboundSender, InboundMessages) {
    let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_BUFFER);
    (tx, InboundMessages::new(early_data, rx))
}

/// Relay side of the outbound queue.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<Bytes>,
}

impl ResponseSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Queues a message for the caller, waiting for capacity.
    pub async fn send(&self, data: Bytes) -> std::io::Result<()> {
        self.tx.send(data).await.map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "caller connection closed",
            )
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the transport has stopped draining the sink.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

pub fn response_channel() -> (ResponseSink, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_BUFFER);
    (ResponseSink::new(tx), rx)
}
