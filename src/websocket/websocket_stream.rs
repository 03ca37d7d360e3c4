//! WebSocket framing on top of an upgraded connection, and the pump tasks that move
//! messages between the connection and the relay channels.

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::relay::InboundSender;

/// Largest accepted payload, for a single frame and for a reassembled message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const READ_BUF_SIZE: usize = 16384;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Unknown(u8),
}

impl OpCode {
    pub fn from(code: u8) -> Self {
        match code {
            0 => OpCode::Continue,
            1 => OpCode::Text,
            2 => OpCode::Binary,
            8 => OpCode::Close,
            9 => OpCode::Ping,
            10 => OpCode::Pong,
            _ => OpCode::Unknown(code),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            OpCode::Continue => 0,
            OpCode::Text => 1,
            OpCode::Binary => 2,
            OpCode::Close => 8,
            OpCode::Ping => 9,
            OpCode::Pong => 10,
            OpCode::Unknown(code) => code,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebsocketMessage {
    /// A complete text or binary message.
    Data(Bytes),
    Ping(Bytes),
}

struct Frame {
    fin: bool,
    opcode: OpCode,
    payload: Bytes,
}

/// Encodes one final frame. Clients must pass a mask; servers send unmasked frames.
pub fn encode_frame(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> BytesMut {
    let mut frame = BytesMut::with_capacity(payload.len() + 14);
    frame.put_u8(0x80 | opcode.code());

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if payload.len() < 126 {
        frame.put_u8(mask_bit | payload.len() as u8);
    } else if payload.len() <= 65535 {
        frame.put_u8(mask_bit | 0x7e);
        frame.put_u16(payload.len() as u16);
    } else {
        frame.put_u8(mask_bit | 0x7f);
        frame.put_u64(payload.len() as u64);
    }

    match mask {
        Some(mask) => {
            frame.put_slice(&mask);
            frame.extend(payload.iter().zip(mask.iter().cycle()).map(|(b, m)| b ^ m));
        }
        None => frame.put_slice(payload),
    }
    frame
}

pub struct WebsocketReader<R> {
    stream: R,
    buf: BytesMut,
    fragments: BytesMut,
    in_fragmented_message: bool,
}

impl<R: AsyncRead + Unpin> WebsocketReader<R> {
    /// `unparsed_data` holds bytes that were read past the end of the HTTP request.
    pub fn new(stream: R, unparsed_data: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(READ_BUF_SIZE.max(unparsed_data.len()));
        buf.extend_from_slice(unparsed_data);
        Self {
            stream,
            buf,
            fragments: BytesMut::new(),
            in_fragmented_message: false,
        }
    }

    async fn fill(&mut self, needed: usize) -> std::io::Result<()> {
        while self.buf.len() < needed {
            self.buf.reserve((needed - self.buf.len()).max(READ_BUF_SIZE));
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "websocket closed without a close frame",
                ));
            }
        }
        Ok(())
    }

    async fn read_frame(&mut self) -> std::io::Result<Frame> {
        self.fill(2).await?;
        let first = self.buf[0];
        let second = self.buf[1];

        let fin = first & 0x80 != 0;
        let opcode = OpCode::from(first & 0x0f);
        let masked = second & 0x80 != 0;

        let (length, length_end) = match second & 0x7f {
            126 => {
                self.fill(4).await?;
                (u16::from_be_bytes([self.buf[2], self.buf[3]]) as u64, 4)
            }
            127 => {
                self.fill(10).await?;
                let mut length = 0u64;
                for b in &self.buf[2..10] {
                    length = (length << 8) | (*b as u64);
                }
                (length, 10)
            }
            length => (length as u64, 2),
        };

        if length > MAX_MESSAGE_SIZE as u64 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame length is too large ({length})"),
            ));
        }

        let payload_start = if masked { length_end + 4 } else { length_end };
        let frame_len = payload_start + length as usize;
        self.fill(frame_len).await?;

        let mut frame = self.buf.split_to(frame_len);
        let mut payload = frame.split_off(payload_start);
        if masked {
            let mask = &frame[length_end..payload_start];
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        })
    }

    /// Reads the next data message or ping. Returns `None` once a close frame arrives.
    pub async fn read_message(&mut self) -> std::io::Result<Option<WebsocketMessage>> {
        loop {
            let Frame {
                fin,
                opcode,
                payload,
            } = self.read_frame().await?;

            match opcode {
                OpCode::Text | OpCode::Binary => {
                    if self.in_fragmented_message {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "data frame inside a fragmented message",
                        ));
                    }
                    if fin {
                        return Ok(Some(WebsocketMessage::Data(payload)));
                    }
                    self.in_fragmented_message = true;
                    self.fragments.extend_from_slice(&payload);
                }
                OpCode::Continue => {
                    if !self.in_fragmented_message {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "unexpected continuation frame",
                        ));
                    }
                    if self.fragments.len() + payload.len() > MAX_MESSAGE_SIZE {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "fragmented message is too large",
                        ));
                    }
                    self.fragments.extend_from_slice(&payload);
                    if fin {
                        self.in_fragmented_message = false;
                        return Ok(Some(WebsocketMessage::Data(self.fragments.split().freeze())));
                    }
                }
                OpCode::Ping => return Ok(Some(WebsocketMessage::Ping(payload))),
                OpCode::Pong => {}
                OpCode::Close => return Ok(None),
                OpCode::Unknown(code) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("unknown websocket opcode {code}"),
                    ));
                }
            }
        }
    }
}

pub struct WebsocketWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> WebsocketWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> std::io::Result<()> {
        let frame = encode_frame(opcode, payload, None);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await
    }

    /// Sends a close frame and shuts down the write side.
    pub async fn close(&mut self) -> std::io::Result<()> {
        self.write_frame(OpCode::Close, &[]).await?;
        self.stream.shutdown().await
    }
}

/// Forwards caller messages into the relay's inbound queue until the caller closes.
///
/// A close frame ends the queue cleanly; anything else that ends the connection is reported
/// as an error. Pings are handed to the response pump.
pub async fn pump_inbound<R: AsyncRead + Unpin>(
    mut reader: WebsocketReader<R>,
    inbound_tx: InboundSender,
    pong_tx: mpsc::Sender<Bytes>,
) {
    loop {
        match reader.read_message().await {
            Ok(Some(WebsocketMessage::Data(data))) => {
                if inbound_tx.send(Ok(data)).await.is_err() {
                    // Relay finished.
                    break;
                }
            }
            Ok(Some(WebsocketMessage::Ping(payload))) => {
                let _ = pong_tx.send(payload).await;
            }
            Ok(None) => {
                debug!("websocket close frame received");
                break;
            }
            Err(e) => {
                let _ = inbound_tx.send(Err(e)).await;
                break;
            }
        }
    }
}

/// Writes relay responses to the caller as binary frames until the relay drops its sink,
/// then closes the WebSocket.
pub async fn pump_responses<W: AsyncWrite + Unpin>(
    mut writer: WebsocketWriter<W>,
    mut response_rx: mpsc::Receiver<Bytes>,
    mut pong_rx: mpsc::Receiver<Bytes>,
) -> std::io::Result<()> {
    let mut pongs_open = true;
    loop {
        tokio::select! {
            response = response_rx.recv() => match response {
                Some(data) => writer.write_frame(OpCode::Binary, &data).await?,
                None => break,
            },
            pong = pong_rx.recv(), if pongs_open => match pong {
                Some(payload) => writer.write_frame(OpCode::Pong, &payload).await?,
                None => pongs_open = false,
            },
        }
    }
    writer.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

    fn masked(opcode: OpCode, fin: bool, payload: &[u8]) -> BytesMut {
        let mut frame = encode_frame(opcode, payload, Some(MASK));
        if !fin {
            frame[0] &= 0x7f;
        }
        frame
    }

    #[tokio::test]
    async fn test_read_masked_binary_message() {
        let data = masked(OpCode::Binary, true, b"hello");
        let mut reader = WebsocketReader::new(&data[..], &[]);
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(WebsocketMessage::Data(Bytes::from_static(b"hello")))
        );
    }

    #[tokio::test]
    async fn test_read_uses_unparsed_data_first() {
        let mut data = masked(OpCode::Binary, true, b"first");
        let split = data.split_off(3);
        let mut reader = WebsocketReader::new(&split[..], &data);
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(WebsocketMessage::Data(Bytes::from_static(b"first")))
        );
    }

    #[tokio::test]
    async fn test_read_extended_lengths() {
        let medium = vec![7u8; 300];
        let large = vec![9u8; 70000];
        let mut data = masked(OpCode::Binary, true, &medium);
        data.extend_from_slice(&encode_frame(OpCode::Binary, &large, None));

        let mut reader = WebsocketReader::new(&data[..], &[]);
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(WebsocketMessage::Data(Bytes::from(medium)))
        );
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(WebsocketMessage::Data(Bytes::from(large)))
        );
    }

    #[tokio::test]
    async fn test_continuation_frames_are_reassembled() {
        let mut data = masked(OpCode::Binary, false, b"abc");
        data.extend_from_slice(&masked(OpCode::Ping, true, b"p"));
        data.extend_from_slice(&masked(OpCode::Continue, false, b"def"));
        data.extend_from_slice(&masked(OpCode::Continue, true, b"g"));

        let mut reader = WebsocketReader::new(&data[..], &[]);
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(WebsocketMessage::Ping(Bytes::from_static(b"p")))
        );
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(WebsocketMessage::Data(Bytes::from_static(b"abcdefg")))
        );
    }

    #[tokio::test]
    async fn test_close_frame_ends_messages() {
        let mut data = masked(OpCode::Pong, true, b"");
        data.extend_from_slice(&masked(OpCode::Close, true, &[0x03, 0xe8]));
        let mut reader = WebsocketReader::new(&data[..], &[]);
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_without_close_is_an_error() {
        let data = masked(OpCode::Binary, true, b"truncated");
        let mut reader = WebsocketReader::new(&data[..data.len() - 2], &[]);
        let e = reader.read_message().await.unwrap_err();
        assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let mut data = vec![0x82, 0x7f];
        data.extend_from_slice(&((MAX_MESSAGE_SIZE as u64) + 1).to_be_bytes());
        let mut reader = WebsocketReader::new(&data[..], &[]);
        let e = reader.read_message().await.unwrap_err();
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_writer_sends_unmasked_frames_and_close() {
        let mut out = vec![];
        {
            let mut writer = WebsocketWriter::new(&mut out);
            writer.write_frame(OpCode::Binary, b"\x00\x00hi").await.unwrap();
            writer.close().await.unwrap();
        }
        assert_eq!(out, b"\x82\x04\x00\x00hi\x88\x00");
    }

    #[tokio::test]
    async fn test_pumps_move_messages_and_answer_pings() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let (inbound_tx, mut inbound_rx) = mpsc::channel(4);
        let (pong_tx, pong_rx) = mpsc::channel(4);
        let (response_tx, response_rx) = mpsc::channel(4);

        let inbound = tokio::spawn(pump_inbound(
            WebsocketReader::new(server_read, &[]),
            inbound_tx,
            pong_tx,
        ));
        let responses = tokio::spawn(pump_responses(
            WebsocketWriter::new(server_write),
            response_rx,
            pong_rx,
        ));

        client_write
            .write_all(&masked(OpCode::Ping, true, b"hb"))
            .await
            .unwrap();
        client_write
            .write_all(&masked(OpCode::Binary, true, b"up"))
            .await
            .unwrap();
        assert_eq!(
            inbound_rx.recv().await.unwrap().unwrap(),
            Bytes::from_static(b"up")
        );
        let mut pong = [0u8; 4];
        client_read.read_exact(&mut pong).await.unwrap();
        assert_eq!(&pong, b"\x8a\x02hb");

        response_tx.send(Bytes::from_static(b"down")).await.unwrap();
        drop(response_tx);

        client_write
            .write_all(&masked(OpCode::Close, true, &[]))
            .await
            .unwrap();
        inbound.await.unwrap();
        assert!(inbound_rx.recv().await.is_none());

        responses.await.unwrap().unwrap();
        let mut received = vec![];
        client_read.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"\x82\x04down\x88\x00");
    }
}
