//! Outbound frame serialization and write-completion bookkeeping.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::connection::options::FrameOptions;
use crate::error::{Error, Result};
use crate::extensions::ExtensionSet;
use crate::message::Message;
use crate::protocol::{Frame, MAX_CONTROL_FRAME_PAYLOAD, MaskKeys, OpCode};

/// Resolves once the bytes of one outbound frame reach the socket, or with
/// the error that prevented it.
///
/// Dropping a `Completion` does not cancel the write.
#[derive(Debug)]
#[must_use = "a Completion reports whether the frame was written"]
pub struct Completion {
    inner: CompletionInner,
}

#[derive(Debug)]
enum CompletionInner {
    Ready(Option<Result<()>>),
    Waiting(oneshot::Receiver<Result<()>>),
}

impl Completion {
    /// A completion that has already resolved.
    pub fn ready(result: Result<()>) -> Self {
        Self {
            inner: CompletionInner::Ready(Some(result)),
        }
    }

    /// A completion paired with the notifier that resolves it.
    pub fn channel() -> (WriteNotifier, Self) {
        let (tx, rx) = oneshot::channel();
        (
            WriteNotifier(tx),
            Self {
                inner: CompletionInner::Waiting(rx),
            },
        )
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            CompletionInner::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(Error::ConnectionClosed)))
            }
            CompletionInner::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // notifier dropped without reporting: the connection is gone
                Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ConnectionClosed)),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Sending side of a [`Completion`].
#[derive(Debug)]
pub struct WriteNotifier(oneshot::Sender<Result<()>>);

impl WriteNotifier {
    pub fn notify(self, result: Result<()>) {
        // the caller may have dropped its Completion
        let _ = self.0.send(result);
    }
}

#[derive(Debug)]
enum Pending {
    Caller(WriteNotifier),
    CloseFrame,
}

/// Serializes frames into one outbound buffer.
///
/// Each queued frame is identified by the stream offset of its last byte.
/// [`FrameSender::advance`] resolves every frame whose bytes have all been
/// written.
#[derive(Debug, Default)]
pub struct FrameSender {
    outbound: BytesMut,
    written: u64,
    queued: u64,
    pending: VecDeque<(u64, Pending)>,
    keys: MaskKeys,
    continuing: bool,
}

impl FrameSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a data frame.
    ///
    /// A frame sent with `fin = false` makes the next data frame a
    /// continuation. Only complete, unfragmented messages are compressed.
    ///
    /// # Errors
    ///
    /// Propagates compression failures; nothing is queued in that case.
    pub fn send(
        &mut self,
        message: Message,
        opts: FrameOptions,
        extensions: &mut ExtensionSet,
        notify: Option<WriteNotifier>,
    ) -> Result<()> {
        let opcode = match (self.continuing, opts.binary) {
            (true, _) => OpCode::Continuation,
            (false, true) => OpCode::Binary,
            (false, false) => OpCode::Text,
        };
        let mut frame = Frame::new(opts.fin, opcode, message.into_bytes());
        if opts.compress && opts.fin && !self.continuing {
            if let Err(err) = extensions.encode(&mut frame) {
                if let Some(notify) = notify {
                    notify.notify(Err(err.clone()));
                }
                return Err(err);
            }
        }
        self.continuing = !opts.fin;
        self.enqueue(&frame, opts.mask, notify.map(Pending::Caller));
        Ok(())
    }

    /// Queue a ping frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ControlFrameTooLarge`] above 125 bytes.
    pub fn ping(&mut self, data: Bytes, mask: bool, notify: Option<WriteNotifier>) -> Result<()> {
        check_control_payload(&data)?;
        self.enqueue(&Frame::ping(data), mask, notify.map(Pending::Caller));
        Ok(())
    }

    /// Queue a pong frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ControlFrameTooLarge`] above 125 bytes.
    pub fn pong(&mut self, data: Bytes, mask: bool, notify: Option<WriteNotifier>) -> Result<()> {
        check_control_payload(&data)?;
        self.enqueue(&Frame::pong(data), mask, notify.map(Pending::Caller));
        Ok(())
    }

    /// Queue a close frame. `code = None` sends an empty body.
    ///
    /// [`FrameSender::advance`] reports when it has been written.
    pub fn close(&mut self, code: Option<u16>, reason: &str, mask: bool) {
        self.enqueue(&Frame::close(code, reason), mask, Some(Pending::CloseFrame));
    }

    /// Bytes queued but not yet written.
    #[must_use]
    pub fn buffered_amount(&self) -> usize {
        self.outbound.len()
    }

    /// Returns `true` when nothing is waiting to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// The bytes to write next.
    #[must_use]
    pub fn chunk(&self) -> &[u8] {
        &self.outbound
    }

    /// Record that `n` bytes from [`FrameSender::chunk`] were written.
    ///
    /// Resolves completions of fully written frames and returns `true` if
    /// a close frame was among them.
    pub fn advance(&mut self, n: usize) -> bool {
        let n = n.min(self.outbound.len());
        self.outbound.advance(n);
        self.written += n as u64;

        let mut close_written = false;
        while let Some((end, _)) = self.pending.front() {
            if *end > self.written {
                break;
            }
            if let Some((_, pending)) = self.pending.pop_front() {
                match pending {
                    Pending::Caller(notifier) => notifier.notify(Ok(())),
                    Pending::CloseFrame => close_written = true,
                }
            }
        }
        close_written
    }

    /// Drop unwritten bytes and fail every outstanding completion.
    pub fn abandon(&mut self, err: &Error) {
        if !self.pending.is_empty() || !self.outbound.is_empty() {
            tracing::trace!(
                unwritten = self.outbound.len(),
                pending = self.pending.len(),
                "discarding outbound frames"
            );
        }
        self.outbound = BytesMut::new();
        for (_, pending) in self.pending.drain(..) {
            if let Pending::Caller(notifier) = pending {
                notifier.notify(Err(err.clone()));
            }
        }
    }

    /// Take the unwritten bytes and the notifiers of frames not yet fully
    /// written, leaving the sender empty.
    pub fn drain(&mut self) -> (Bytes, Vec<WriteNotifier>) {
        let unsent = std::mem::take(&mut self.outbound).freeze();
        let notifiers = self
            .pending
            .drain(..)
            .filter_map(|(_, pending)| match pending {
                Pending::Caller(notifier) => Some(notifier),
                Pending::CloseFrame => None,
            })
            .collect();
        self.written = self.queued;
        (unsent, notifiers)
    }

    fn enqueue(&mut self, frame: &Frame, mask: bool, pending: Option<Pending>) {
        let key = mask.then(|| self.keys.next_key());
        let before = self.outbound.len();
        frame.encode(&mut self.outbound, key);
        self.queued += (self.outbound.len() - before) as u64;
        tracing::trace!(
            opcode = ?frame.opcode,
            len = frame.payload.len(),
            masked = mask,
            "frame queued"
        );
        if let Some(pending) = pending {
            self.pending.push_back((self.queued, pending));
        }
    }
}

fn check_control_payload(data: &[u8]) -> Result<()> {
    if data.len() > MAX_CONTROL_FRAME_PAYLOAD {
        return Err(Error::ControlFrameTooLarge(data.len()));
    }
    Ok(())
}
