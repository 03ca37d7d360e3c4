use std::collections::HashMap;
use std::net::SocketAddr;

use aws_lc_rs::digest::{SHA1_FOR_LEGACY_USE_ONLY, digest};
use base64::engine::{Engine as _, general_purpose::STANDARD};
use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::early_data::decode_early_data;

const MAX_HEADER_LINES: usize = 40;
const MAX_LINE_LEN: usize = 4096;
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Result of a successful WebSocket upgrade.
#[derive(Debug)]
pub struct WebsocketUpgrade {
    /// Address used in logs: the forwarded client IP when a proxy supplied one.
    pub client_address: String,
    pub early_data: Option<Bytes>,
    /// Bytes read past the end of the HTTP request; the start of the first frame.
    pub unparsed_data: Bytes,
}

/// Reads the HTTP upgrade request and answers it.
///
/// Requests that are not WebSocket upgrades get a `426`, a path mismatch gets a `404`, and
/// both end with an error after the response is written.
pub async fn accept_websocket<S>(
    stream: &mut S,
    matching_path: Option<&str>,
    peer_addr: SocketAddr,
) -> std::io::Result<WebsocketUpgrade>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ParsedHttpData {
        first_line,
        mut headers,
        unparsed_data,
    } = ParsedHttpData::parse(stream).await?;

    let mut tokens = first_line.split(' ');
    let (method, request_target) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/1.") => {
            (method, target)
        }
        _ => {
            write_rejection(stream, "400 Bad Request").await;
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid http request: {first_line}"),
            ));
        }
    };

    let is_upgrade = headers
        .get("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if method != "GET" || !is_upgrade {
        write_rejection(stream, "426 Upgrade Required").await;
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("not a websocket upgrade: {first_line}"),
        ));
    }

    let request_path = request_target
        .split_once('?')
        .map_or(request_target, |(path, _)| path);
    if let Some(path) = matching_path
        && path != request_path
    {
        write_rejection(stream, "404 Not Found").await;
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("unknown websocket path: {request_path}"),
        ));
    }

    let Some(websocket_key) = headers.remove("sec-websocket-key") else {
        write_rejection(stream, "400 Bad Request").await;
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "missing websocket key header",
        ));
    };

    let protocol = headers.remove("sec-websocket-protocol");
    let early_data = match decode_early_data(protocol.as_deref()) {
        Ok(data) => data,
        Err(e) => {
            write_rejection(stream, "400 Bad Request").await;
            return Err(e);
        }
    };

    let client_address = client_address(&headers, peer_addr);

    let protocol_response_header = match protocol {
        Some(v) => format!("Sec-WebSocket-Protocol: {v}\r\n"),
        None => "".to_string(),
    };
    let http_response = format!(
        concat!(
            "HTTP/1.1 101 Switching Protocols\r\n",
            "Upgrade: websocket\r\n",
            "Connection: Upgrade\r\n",
            "Sec-WebSocket-Accept: {}\r\n",
            "{}",
            "\r\n"
        ),
        create_websocket_key_response(&websocket_key),
        protocol_response_header,
    );
    stream.write_all(http_response.as_bytes()).await?;
    stream.flush().await?;

    debug!(
        "{client_address}: websocket upgraded ({} early data bytes)",
        early_data.as_ref().map_or(0, Bytes::len)
    );

    Ok(WebsocketUpgrade {
        client_address,
        early_data,
        unparsed_data,
    })
}

async fn write_rejection<S: AsyncWrite + Unpin>(stream: &mut S, status: &str) {
    let response = format!("HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn client_address(headers: &HashMap<String, String>, peer_addr: SocketAddr) -> String {
    if let Some(ip) = headers
        .get("cf-connecting-ip")
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }
    // The left-most entry is the original client.
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }
    peer_addr.to_string()
}

fn create_websocket_key_response(key: &str) -> String {
    let mut input = String::with_capacity(key.len() + WEBSOCKET_GUID.len());
    input.push_str(key);
    input.push_str(WEBSOCKET_GUID);
    let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, input.as_bytes());
    STANDARD.encode(hash.as_ref())
}

struct ParsedHttpData {
    first_line: String,
    headers: HashMap<String, String>,
    unparsed_data: Bytes,
}

impl ParsedHttpData {
    async fn parse<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Self> {
        let mut buf = BytesMut::with_capacity(MAX_LINE_LEN);
        let mut first_line: Option<String> = None;
        let mut headers: HashMap<String, String> = HashMap::new();

        let mut line_count = 0;
        loop {
            let line = read_line(stream, &mut buf).await?;
            if line.is_empty() {
                break;
            }

            if first_line.is_none() {
                first_line = Some(line);
            } else {
                let (header_key, header_value) = line.split_once(':').ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid http request line: {line}"),
                    )
                })?;
                headers.insert(
                    header_key.trim().to_lowercase(),
                    header_value.trim().to_string(),
                );
            }

            line_count += 1;
            if line_count >= MAX_HEADER_LINES {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "http request is too long",
                ));
            }
        }

        let first_line = first_line.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "empty http request")
        })?;

        Ok(Self {
            first_line,
            headers,
            unparsed_data: buf.freeze(),
        })
    }
}

async fn read_line<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> std::io::Result<String> {
    loop {
        if let Some(newline_pos) = buf.iter().position(|b| *b == b'\n') {
            let line = buf.split_to(newline_pos + 1);
            let line = line.strip_suffix(b"\r\n").unwrap_or(&line[..newline_pos]);
            return String::from_utf8(line.to_vec()).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "http request line is not valid utf-8",
                )
            });
        }

        if buf.len() >= MAX_LINE_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "http request line is too long",
            ));
        }

        buf.reserve(MAX_LINE_LEN);
        if stream.read_buf(buf).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during http request",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.10:51000".parse().unwrap()
    }

    async fn run_upgrade(
        request: &str,
        trailing: &[u8],
        matching_path: Option<&str>,
    ) -> (std::io::Result<WebsocketUpgrade>, String) {
        let (mut client, mut server) = tokio::io::duplex(16384);
        client.write_all(request.as_bytes()).await.unwrap();
        client.write_all(trailing).await.unwrap();

        let result = accept_websocket(&mut server, matching_path, peer()).await;
        drop(server);

        let mut response = vec![];
        client.read_to_end(&mut response).await.unwrap();
        (result, String::from_utf8(response).unwrap())
    }

    #[test]
    fn test_websocket_key_response() {
        assert_eq!(
            create_websocket_key_response("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn test_upgrade_with_early_data() {
        let request = concat!(
            "GET /ws?ed=2048 HTTP/1.1\r\n",
            "Host: relay.example\r\n",
            "Upgrade: websocket\r\n",
            "Connection: Upgrade\r\n",
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
            "Sec-WebSocket-Protocol: aGVsbG8\r\n",
            "CF-Connecting-IP: 203.0.113.7\r\n",
            "\r\n"
        );
        let (result, response) = run_upgrade(request, b"\x82\x00", Some("/ws")).await;
        let upgrade = result.unwrap();

        assert_eq!(upgrade.client_address, "203.0.113.7");
        assert_eq!(upgrade.early_data, Some(Bytes::from_static(b"hello")));
        assert_eq!(&upgrade.unparsed_data[..], b"\x82\x00");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.contains("Sec-WebSocket-Protocol: aGVsbG8\r\n"));
    }

    #[tokio::test]
    async fn test_client_address_fallbacks() {
        let request = concat!(
            "GET / HTTP/1.1\r\n",
            "Upgrade: WebSocket\r\n",
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
            "X-Forwarded-For: 198.51.100.1, 10.0.0.1\r\n",
            "\r\n"
        );
        let (result, _) = run_upgrade(request, b"", None).await;
        let upgrade = result.unwrap();
        assert_eq!(upgrade.client_address, "198.51.100.1");
        assert_eq!(upgrade.early_data, None);

        let request = concat!(
            "GET / HTTP/1.1\r\n",
            "Upgrade: websocket\r\n",
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
            "\r\n"
        );
        let (result, response) = run_upgrade(request, b"", None).await;
        assert_eq!(result.unwrap().client_address, "192.0.2.10:51000");
        assert!(!response.contains("Sec-WebSocket-Protocol"));
    }

    #[tokio::test]
    async fn test_plain_http_request_gets_426() {
        let request = "GET / HTTP/1.1\r\nHost: relay.example\r\n\r\n";
        let (result, response) = run_upgrade(request, b"", None).await;
        assert!(result.is_err());
        assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
    }

    #[tokio::test]
    async fn test_post_upgrade_gets_426() {
        let request = "POST / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        let (result, response) = run_upgrade(request, b"", None).await;
        assert!(result.is_err());
        assert!(response.starts_with("HTTP/1.1 426"));
    }

    #[tokio::test]
    async fn test_path_mismatch_gets_404() {
        let request = concat!(
            "GET /other HTTP/1.1\r\n",
            "Upgrade: websocket\r\n",
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
            "\r\n"
        );
        let (result, response) = run_upgrade(request, b"", Some("/ws")).await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::NotFound);
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn test_invalid_early_data_gets_400() {
        let request = concat!(
            "GET / HTTP/1.1\r\n",
            "Upgrade: websocket\r\n",
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
            "Sec-WebSocket-Protocol: !!!\r\n",
            "\r\n"
        );
        let (result, response) = run_upgrade(request, b"", None).await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::InvalidData);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn test_too_many_header_lines() {
        let mut request = String::from("GET / HTTP/1.1\r\n");
        for i in 0..MAX_HEADER_LINES {
            request.push_str(&format!("X-Header-{i}: v\r\n"));
        }
        request.push_str("\r\n");
        let (result, _) = run_upgrade(&request, b"", None).await;
        assert!(result.is_err());
    }
}
