//! Test harness: a scripted WebSocket client on the far end of an
//! in-memory duplex pipe, and a helper that starts a server connection on
//! the near end.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::task::JoinHandle;
use wsession::protocol::{Frame, FrameHeader, OpCode};
use wsession::{Config, Connection, ConnectionHandle, EventStream, Negotiated, events};

const PIPE_CAPACITY: usize = 1 << 20;
const CLIENT_MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// A running server connection and the client talking to it.
pub struct Session {
    pub peer: Peer,
    pub handle: ConnectionHandle,
    pub events: EventStream,
    pub task: JoinHandle<()>,
}

/// Start a server connection with default configuration.
pub fn start() -> Session {
    start_with(Negotiated::new(), Config::default())
}

pub fn start_with(negotiated: Negotiated, config: Config) -> Session {
    let (server, client) = duplex(PIPE_CAPACITY);
    let (handler, events) = events();
    let conn = Connection::accept(server, negotiated, config, handler);
    let handle = conn.handle();
    let task = tokio::spawn(conn.run());
    Session {
        peer: Peer::new(client),
        handle,
        events,
        task,
    }
}

/// A frame as seen by the client.
#[derive(Debug, Clone)]
pub struct Received {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Received {
    /// Close code and reason of a close frame.
    pub fn close_body(&self) -> Option<(u16, String)> {
        assert_eq!(self.header.opcode, OpCode::Close);
        if self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8(self.payload[2..].to_vec()).unwrap();
        Some((code, reason))
    }
}

/// Client side of the pipe.
pub struct Peer {
    stream: DuplexStream,
    buf: BytesMut,
}

impl Peer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Encode `frame` as a masked client frame.
    pub fn encode(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, Some(CLIENT_MASK));
        buf.freeze()
    }

    pub async fn send(&mut self, frame: Frame) {
        let bytes = Self::encode(&frame);
        self.send_raw(&bytes).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send(Frame::new(true, OpCode::Text, text.as_bytes().to_vec()))
            .await;
    }

    pub async fn send_close(&mut self, code: u16, reason: &str) {
        self.send(Frame::close(Some(code), reason)).await;
    }

    /// Next server frame, or `None` once the server closed its side.
    pub async fn recv(&mut self) -> Option<Received> {
        loop {
            if let Some(header) = FrameHeader::parse(&self.buf).unwrap() {
                let end = header.header_len + header.payload_len as usize;
                if self.buf.len() >= end {
                    let frame = self.buf.split_to(end).freeze();
                    assert!(header.mask.is_none(), "server frames must not be masked");
                    return Some(Received {
                        payload: frame.slice(header.header_len..),
                        header,
                    });
                }
            }
            if self.stream.read_buf(&mut self.buf).await.unwrap() == 0 {
                assert!(self.buf.is_empty(), "truncated frame before EOF");
                return None;
            }
        }
    }

    /// Next server frame, which must exist.
    pub async fn expect(&mut self) -> Received {
        self.recv().await.expect("server closed before sending a frame")
    }

    /// Wait until the server half-closes, failing on any further frame.
    pub async fn expect_eof(&mut self) {
        if let Some(frame) = self.recv().await {
            panic!("expected EOF, got {:?}", frame.header.opcode);
        }
    }

    /// Drop the client end of the pipe.
    pub fn disconnect(self) {
        drop(self.stream);
    }
}
