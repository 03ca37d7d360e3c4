mod websocket_handler;
mod websocket_stream;

pub use websocket_handler::{WebsocketUpgrade, accept_websocket};
pub use websocket_stream::{
    OpCode, WebsocketMessage, WebsocketReader, WebsocketWriter, encode_frame, pump_inbound,
    pump_responses,
};
