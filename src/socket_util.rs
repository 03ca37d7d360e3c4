use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

#[inline]
pub fn new_tcp_socket(is_ipv6: bool) -> std::io::Result<TcpSocket> {
    if is_ipv6 {
        TcpSocket::new_v6()
    } else {
        TcpSocket::new_v4()
    }
}

pub fn new_tcp_listener(bind_address: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let tcp_socket = new_tcp_socket(bind_address.is_ipv6())?;
    tcp_socket.set_reuseaddr(true)?;
    tcp_socket.bind(bind_address)?;
    tcp_socket.listen(backlog)
}

pub fn set_tcp_keepalive(
    stream: &TcpStream,
    idle_time: Duration,
    send_interval: Duration,
) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(idle_time)
        .with_interval(send_interval);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
