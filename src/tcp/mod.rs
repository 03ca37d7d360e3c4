mod socket_connector;
mod socket_connector_impl;
mod tcp_server;

pub use socket_connector::SocketConnector;
pub use socket_connector_impl::TcpSocketConnector;
pub use tcp_server::{process_stream, start_tcp_server};
