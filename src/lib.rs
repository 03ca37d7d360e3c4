//! wsrelay - a VLESS over WebSocket to TCP relay.
//!
//! Each accepted connection is upgraded to a WebSocket. The first bytes the caller sends
//! (possibly carried as 0-RTT early data in `Sec-WebSocket-Protocol`) hold a VLESS request
//! header naming the destination. The relay then connects to that destination, prefixes the
//! first response chunk with the VLESS response envelope, and copies bytes both ways.
//!
//! When the destination closes without sending anything back, the relay moves on to the
//! configured fallback destinations in order, replaying every byte the caller sent so far.

pub mod address;
pub mod async_stream;
pub mod config;
pub mod early_data;
pub mod option_util;
pub mod relay;
pub mod socket_util;
pub mod tcp;
pub mod uuid_util;
pub mod vless;
pub mod websocket;
