use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::socket_connector::SocketConnector;
use super::socket_connector_impl::TcpSocketConnector;

use crate::async_stream::AsyncStream;
use crate::config::ServerConfig;
use crate::relay::{RelayOrchestrator, RelayOutcome, inbound_channel, response_channel};
use crate::socket_util::{new_tcp_listener, set_tcp_keepalive};
use crate::websocket::{
    WebsocketReader, WebsocketUpgrade, WebsocketWriter, accept_websocket, pump_inbound,
    pump_responses,
};

const PONG_BUFFER: usize = 4;

/// Binds the server's listener and spawns its accept loop.
pub async fn start_tcp_server(config: ServerConfig) -> std::io::Result<JoinHandle<()>> {
    let listener = new_tcp_listener(config.bind_address, 4096)?;

    println!(
        "Starting VLESS websocket server at {} ({} fallback(s))",
        config.bind_address,
        config.relay.fallbacks.len()
    );

    let connector: Arc<dyn SocketConnector> = Arc::new(TcpSocketConnector::new(config.no_delay));
    Ok(tokio::spawn(run_tcp_server(
        listener,
        Arc::new(config),
        connector,
    )))
}

async fn run_tcp_server(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    connector: Arc<dyn SocketConnector>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!("Accept failed: {e}");
                continue;
            }
        };

        if let Err(e) = set_tcp_keepalive(
            &stream,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ) {
            error!("Failed to set TCP keepalive: {e}");
        }

        if config.no_delay
            && let Err(e) = stream.set_nodelay(true)
        {
            error!("Failed to set TCP nodelay: {e}");
        }

        let cloned_config = config.clone();
        let cloned_connector = connector.clone();
        tokio::spawn(async move {
            if let Err(e) = process_stream(stream, addr, cloned_config, cloned_connector).await {
                error!("{}:{} finished with error: {}", addr.ip(), addr.port(), e);
            } else {
                debug!("{}:{} finished successfully", addr.ip(), addr.port());
            }
        });
    }
}

/// Serves one accepted connection: WebSocket upgrade, then the relay.
pub async fn process_stream<AS>(
    mut stream: AS,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    connector: Arc<dyn SocketConnector>,
) -> std::io::Result<()>
where
    AS: AsyncStream + 'static,
{
    let upgrade_future = timeout(
        config.relay.header_timeout,
        accept_websocket(&mut stream, config.path.as_deref(), peer_addr),
    );
    let WebsocketUpgrade {
        client_address,
        early_data,
        unparsed_data,
    } = match upgrade_future.await {
        Ok(Ok(upgrade)) => upgrade,
        Ok(Err(e)) => {
            return Err(std::io::Error::new(
                e.kind(),
                format!("websocket upgrade failed: {e}"),
            ));
        }
        Err(elapsed) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("websocket upgrade timed out: {elapsed}"),
            ));
        }
    };

    let (read_half, write_half) = tokio::io::split(stream);
    let (inbound_tx, inbound) = inbound_channel(early_data);
    let (response_sink, response_rx) = response_channel();
    let (pong_tx, pong_rx) = mpsc::channel(PONG_BUFFER);

    let reader_task = tokio::spawn(pump_inbound(
        WebsocketReader::new(read_half, &unparsed_data),
        inbound_tx,
        pong_tx,
    ));

    let mut orchestrator =
        RelayOrchestrator::new(&client_address, &config.relay, connector.as_ref());
    let (relay_result, write_result) = futures::join!(
        orchestrator.run(inbound, response_sink),
        pump_responses(WebsocketWriter::new(write_half), response_rx, pong_rx)
    );

    // The caller may never send a close frame once we have closed.
    reader_task.abort();

    if let Err(e) = write_result {
        debug!("{client_address}: websocket write ended: {e}");
    }

    match relay_result? {
        RelayOutcome::Tunneled { location } => {
            debug!("{client_address}: tunnel to {location} closed");
        }
        RelayOutcome::Exhausted { attempts } => {
            debug!("{client_address}: closed after {attempts} failed attempt(s)");
        }
        RelayOutcome::CallerClosed => {
            debug!("{client_address}: caller closed the connection");
        }
    }

    Ok(())
}
