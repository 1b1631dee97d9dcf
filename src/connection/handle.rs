//! Cross-task control of a running connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::connection::ConnectionState;
use crate::connection::options::{ControlOptions, SendOptions};
use crate::connection::sender::{Completion, WriteNotifier};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};
use crate::protocol::MAX_CLOSE_REASON;

/// Requests queued for the connection task, applied in order.
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        message: Message,
        options: SendOptions,
        notifier: WriteNotifier,
    },
    Ping {
        data: Bytes,
        options: ControlOptions,
        notifier: WriteNotifier,
    },
    Pong {
        data: Bytes,
        options: ControlOptions,
        notifier: WriteNotifier,
    },
    Close {
        code: CloseCode,
        reason: String,
    },
    Terminate,
    Pause,
    Resume,
}

/// Cloneable remote control for a connection driven by
/// [`Connection::run`](crate::Connection::run).
///
/// State checks here are advisory: the connection task re-checks every
/// command when it applies it, and that outcome is the one reported through
/// the returned [`Completion`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<AtomicU8>,
}

impl ConnectionHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, state: Arc<AtomicU8>) -> Self {
        Self { commands, state }
    }

    /// Last state published by the connection task.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queue a data message.
    pub fn send(&self, message: impl Into<Message>, options: SendOptions) -> Completion {
        self.request(|notifier| Command::Send {
            message: message.into(),
            options,
            notifier,
        })
    }

    pub fn ping(&self, data: impl Into<Bytes>, options: ControlOptions) -> Completion {
        self.request(|notifier| Command::Ping {
            data: data.into(),
            options,
            notifier,
        })
    }

    pub fn pong(&self, data: impl Into<Bytes>, options: ControlOptions) -> Completion {
        self.request(|notifier| Command::Pong {
            data: data.into(),
            options,
            notifier,
        })
    }

    /// Start the closing handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCloseCode`] or [`Error::CloseReasonTooLong`]
    /// for arguments that cannot be put in a close frame, and
    /// [`Error::ConnectionClosed`] if the connection task is gone.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        validate_close(code, reason)?;
        self.enqueue(Command::Close {
            code,
            reason: reason.to_owned(),
        })
    }

    /// Abort the connection without a closing handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection task is gone.
    pub fn terminate(&self) -> Result<()> {
        self.enqueue(Command::Terminate)
    }

    /// Stop reading from the socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] unless the connection is open.
    pub fn pause(&self) -> Result<()> {
        self.require_open()?;
        self.enqueue(Command::Pause)
    }

    /// Resume reading from the socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] unless the connection is open.
    pub fn resume(&self) -> Result<()> {
        self.require_open()?;
        self.enqueue(Command::Resume)
    }

    fn request(&self, build: impl FnOnce(WriteNotifier) -> Command) -> Completion {
        if let Err(err) = self.require_open() {
            return Completion::ready(Err(err));
        }
        let (notifier, completion) = Completion::channel();
        match self.enqueue(build(notifier)) {
            Ok(()) => completion,
            Err(err) => Completion::ready(Err(err)),
        }
    }

    fn require_open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            state => Err(Error::NotOpen(state)),
        }
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// Check that `code` and `reason` fit in a close frame.
pub(crate) fn validate_close(code: CloseCode, reason: &str) -> Result<()> {
    if !code.is_valid() {
        return Err(Error::InvalidCloseCode(code.as_u16()));
    }
    if reason.len() > MAX_CLOSE_REASON {
        return Err(Error::CloseReasonTooLong(reason.len()));
    }
    Ok(())
}
