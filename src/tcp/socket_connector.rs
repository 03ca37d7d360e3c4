//! SocketConnector trait - opens outbound connections to relay destinations.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::address::NetLocation;
use crate::async_stream::AsyncStream;

/// Outbound connection factory.
///
/// The returned stream must support half-close: `shutdown()` closes the write direction
/// while reads continue until the destination closes.
#[async_trait]
pub trait SocketConnector: Send + Sync + Debug {
    async fn connect(&self, location: &NetLocation) -> std::io::Result<Box<dyn AsyncStream>>;
}
