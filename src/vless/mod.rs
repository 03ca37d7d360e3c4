// VLESS protocol: request header decoding and response framing.

pub mod vless_header;
pub mod vless_response;

pub use vless_header::{DecodeError, RequestHeader, decode_request_header};
pub use vless_response::VlessResponseFramer;
