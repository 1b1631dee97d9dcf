//! The upgraded byte stream underneath a connection.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf, split};
use tokio::net::TcpStream;

/// A bidirectional byte stream produced by the HTTP upgrade.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Disable write coalescing where the stream supports it.
    fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }
}

impl Transport for tokio::io::DuplexStream {}

#[cfg(unix)]
impl Transport for tokio::net::UnixStream {}

/// Read side of a [`SocketAdapter`].
#[derive(Debug)]
pub struct SocketReader<T> {
    half: ReadHalf<T>,
    buf: Vec<u8>,
    paused: bool,
    eof: bool,
}

impl<T: Transport> SocketReader<T> {
    /// Whether the socket should be polled for data.
    #[must_use]
    pub const fn is_reading(&self) -> bool {
        !self.paused && !self.eof
    }

    /// Read once into the internal buffer. `Ok(&[])` signals EOF.
    ///
    /// Cancel safe.
    pub async fn read(&mut self) -> io::Result<&[u8]> {
        let n = self.half.read(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(&self.buf[..n])
    }
}

/// Outcome of one [`SocketWriter::flush_some`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    Bytes(usize),
    ShutDown,
}

/// Write side of a [`SocketAdapter`].
#[derive(Debug)]
pub struct SocketWriter<T> {
    half: WriteHalf<T>,
    ending: bool,
    closed: bool,
}

impl<T: Transport> SocketWriter<T> {
    /// Whether [`SocketWriter::flush_some`] has anything to do for `pending`
    /// queued bytes.
    #[must_use]
    pub fn wants_write(&self, pending: usize) -> bool {
        !self.closed && (pending > 0 || self.ending)
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write some of `buf`, or perform the requested half-close once `buf`
    /// is empty.
    ///
    /// Cancel safe.
    pub async fn flush_some(&mut self, buf: &[u8]) -> io::Result<Written> {
        if buf.is_empty() {
            self.half.shutdown().await?;
            self.closed = true;
            return Ok(Written::ShutDown);
        }
        match self.half.write(buf).await? {
            0 => Err(io::ErrorKind::WriteZero.into()),
            n => Ok(Written::Bytes(n)),
        }
    }
}

/// Split read/write halves plus the flow-control flags of one socket.
///
/// Dropping the adapter (or calling [`SocketAdapter::release`]) detaches
/// every reader and writer; nothing can observe the socket afterwards.
#[derive(Debug)]
pub struct SocketAdapter<T> {
    reader: SocketReader<T>,
    writer: SocketWriter<T>,
}

impl<T: Transport> SocketAdapter<T> {
    pub fn new(transport: T, read_buffer_size: usize) -> Self {
        let (read, write) = split(transport);
        Self {
            reader: SocketReader {
                half: read,
                buf: vec![0; read_buffer_size.max(1)],
                paused: false,
                eof: false,
            },
            writer: SocketWriter {
                half: write,
                ending: false,
                closed: false,
            },
        }
    }

    /// Borrow both halves at once.
    pub fn parts(&mut self) -> (&mut SocketReader<T>, &mut SocketWriter<T>) {
        (&mut self.reader, &mut self.writer)
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.reader.paused = paused;
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.reader.paused
    }

    /// Request a half-close once queued bytes are written.
    pub fn end(&mut self) {
        self.writer.ending = true;
    }

    /// Detach the adapter.
    ///
    /// A graceful release returns the write half so the caller can finish
    /// the half-close; a forced one drops both halves immediately.
    pub fn release(self, graceful: bool) -> Option<WriteHalf<T>> {
        (graceful && !self.writer.closed).then_some(self.writer.half)
    }
}
