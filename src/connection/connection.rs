//! The per-session state machine and the task that drives it.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::connection::handle::{Command, ConnectionHandle, validate_close};
use crate::connection::handler::{Detached, Handler};
use crate::connection::negotiated::Negotiated;
use crate::connection::options::{ControlOptions, SendOptions};
use crate::connection::receiver::{FrameReceiver, ReceiverEvent};
use crate::connection::sender::{Completion, FrameSender, WriteNotifier};
use crate::connection::socket::{SocketAdapter, Transport, Written};
use crate::connection::timer::CloseTimer;
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::extensions::ExtensionSet;
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::MAX_CONTROL_FRAME_PAYLOAD;

/// One WebSocket session over an upgraded transport.
///
/// The connection is created in [`ConnectionState::Connecting`] and becomes
/// open once [`Connection::open`] wires the frame receiver, frame sender and
/// socket adapter. From then on [`Connection::run`] drives it: socket reads,
/// socket writes, the close timer and [`ConnectionHandle`] commands all feed
/// the same state machine, which ends in exactly one teardown.
///
/// The methods on this type are the synchronous half of the state machine.
/// They queue frames and change state; bytes move only inside `run`.
pub struct Connection<T> {
    role: Role,
    config: Config,
    state: ConnectionState,
    shared_state: Arc<AtomicU8>,

    protocol_version: u8,
    protocol: Option<String>,
    extensions: ExtensionSet,
    head: Bytes,
    bytes_received: u64,

    /// First known close code and reason; never replaced.
    close_frame: Option<CloseFrame>,
    /// The peer's close frame has arrived.
    peer_closed: bool,
    /// Our close frame has been written.
    close_written: bool,
    timer: CloseTimer,

    transport: Option<T>,
    socket: Option<SocketAdapter<T>>,
    receiver: Option<FrameReceiver>,
    sender: Option<FrameSender>,
    lingering: Option<Lingering<T>>,

    handler: Box<dyn Handler>,
    commands: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
}

/// Write half kept after a graceful teardown, with whatever the sender had
/// not written yet.
struct Lingering<T> {
    writer: WriteHalf<T>,
    unsent: Bytes,
    notifiers: Vec<WriteNotifier>,
}

/// What woke the driver loop.
enum Step {
    Timer,
    Command(Command),
    Wrote(io::Result<Written>),
    Received(usize),
    Eof,
    ReadFailed(io::Error),
}

impl<T: Transport> Connection<T> {
    /// Wrap an upgraded transport. The connection stays in `Connecting`
    /// until [`Connection::open`] (or [`Connection::run`]) is called.
    pub fn new(
        transport: T,
        role: Role,
        negotiated: Negotiated,
        config: Config,
        handler: impl Handler + 'static,
    ) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        Self {
            role,
            config,
            state: ConnectionState::Connecting,
            shared_state: Arc::new(AtomicU8::new(ConnectionState::Connecting.as_u8())),
            protocol_version: negotiated.protocol_version,
            protocol: negotiated.protocol,
            extensions: negotiated.extensions,
            head: negotiated.head,
            bytes_received: 0,
            close_frame: None,
            peer_closed: false,
            close_written: false,
            timer: CloseTimer::new(),
            transport: Some(transport),
            socket: None,
            receiver: None,
            sender: None,
            lingering: None,
            handler: Box::new(handler),
            commands,
            command_tx,
        }
    }

    /// Server-side shorthand for [`Connection::new`] followed by
    /// [`Connection::open`].
    pub fn accept(
        transport: T,
        negotiated: Negotiated,
        config: Config,
        handler: impl Handler + 'static,
    ) -> Self {
        let mut conn = Self::new(transport, Role::Server, negotiated, config, handler);
        conn.open();
        conn
    }

    /// Wire the receiver, sender and socket adapter and move to `Open`.
    ///
    /// Emits `open`, then feeds any leftover upgrade bytes to the receiver.
    /// Does nothing unless the connection is still `Connecting`.
    pub fn open(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let Some(transport) = self.transport.take() else {
            return;
        };

        if self.config.nodelay {
            if let Err(err) = transport.set_nodelay(true) {
                warn!(error = %err, "failed to disable Nagle's algorithm");
            }
        }

        let rsv1_allowed = self.extensions.rsv_bits().rsv1;
        self.receiver = Some(FrameReceiver::new(self.role, &self.config, rsv1_allowed));
        self.sender = Some(FrameSender::new());
        self.socket = Some(SocketAdapter::new(transport, self.config.read_buffer_size));
        self.set_state(ConnectionState::Open);
        debug!(
            role = %self.role,
            protocol = self.protocol.as_deref().unwrap_or(""),
            extensions = self.extensions.len(),
            "connection open"
        );
        self.handler.on_open();

        let head = std::mem::take(&mut self.head);
        if !head.is_empty() {
            if let Some(receiver) = self.receiver.as_mut() {
                receiver.add(&head);
            }
            self.on_received(head.len());
        }
    }

    /// A handle for controlling this connection from other tasks.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.command_tx.clone(), Arc::clone(&self.shared_state))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Bytes queued for the socket but not yet written.
    pub fn buffered_amount(&self) -> usize {
        self.sender.as_ref().map_or(0, FrameSender::buffered_amount)
    }

    /// Subprotocol selected during the upgrade.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    /// Raw bytes consumed from the socket, upgrade leftovers included.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn max_payload_size(&self) -> usize {
        self.config.limits.max_payload_size
    }

    pub fn is_paused(&self) -> bool {
        self.socket.as_ref().is_some_and(SocketAdapter::is_paused)
    }

    /// Queue a data message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] outside `Open`. A failing compression
    /// extension is reported here and also closes the connection with 1002.
    pub fn send(
        &mut self,
        message: impl Into<Message>,
        options: SendOptions,
    ) -> Result<Completion> {
        let (notifier, completion) = Completion::channel();
        self.send_with(message.into(), options, notifier)?;
        Ok(completion)
    }

    /// Queue a ping.
    ///
    /// With `suppress_if_closed`, calling this outside `Open` does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] outside `Open` (unless suppressed) and
    /// [`Error::ControlFrameTooLarge`] for payloads above 125 bytes.
    pub fn ping(
        &mut self,
        data: impl Into<Bytes>,
        options: ControlOptions,
        suppress_if_closed: bool,
    ) -> Result<Completion> {
        self.control(true, data.into(), options, suppress_if_closed)
    }

    /// Queue a pong. Same rules as [`Connection::ping`].
    ///
    /// # Errors
    ///
    /// See [`Connection::ping`].
    pub fn pong(
        &mut self,
        data: impl Into<Bytes>,
        options: ControlOptions,
        suppress_if_closed: bool,
    ) -> Result<Completion> {
        self.control(false, data.into(), options, suppress_if_closed)
    }

    /// Start the closing handshake.
    ///
    /// - `Closed`: nothing happens.
    /// - `Connecting`: the connection is torn down without a frame.
    /// - `Closing`: a server that already has the peer's close frame drops
    ///   the socket; otherwise nothing happens.
    /// - `Open`: a close frame is queued and the close timer armed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCloseCode`] or [`Error::CloseReasonTooLong`]
    /// for arguments that cannot be put in a close frame.
    pub fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        validate_close(code, reason)?;
        self.close_with(Some(code), reason);
        Ok(())
    }

    /// Drop the connection without completing the closing handshake.
    ///
    /// Queued frames are still flushed before the socket is half-closed;
    /// the close timer bounds how long that may take.
    pub fn terminate(&mut self) {
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Connecting => self.finalize(true),
            ConnectionState::Open | ConnectionState::Closing => {
                debug!(role = %self.role, "terminating connection");
                self.set_state(ConnectionState::Closing);
                if let Some(socket) = self.socket.as_mut() {
                    socket.end();
                }
                self.timer.arm(self.config.close_timeout);
            }
        }
    }

    /// Stop reading from the socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] outside `Open`.
    pub fn pause(&mut self) -> Result<()> {
        self.set_paused(true)
    }

    /// Resume reading from the socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] outside `Open`.
    pub fn resume(&mut self) -> Result<()> {
        self.set_paused(false)
    }

    /// Drive the connection until it is closed.
    ///
    /// Opens the connection first if needed. After teardown, a cleanly
    /// closed socket is given up to the close timeout to finish its
    /// half-close.
    pub async fn run(mut self) {
        self.open();
        while self.state != ConnectionState::Closed {
            let step = self.next_step().await;
            self.apply_step(step);
        }
        self.linger().await;
    }

    async fn next_step(&mut self) -> Step {
        let Self {
            socket,
            sender,
            receiver,
            timer,
            commands,
            ..
        } = self;

        let Some(socket) = socket.as_mut() else {
            return tokio::select! {
                biased;
                () = timer.expired() => Step::Timer,
                Some(command) = commands.recv() => Step::Command(command),
            };
        };

        let (reader, writer) = socket.parts();
        let outbound = sender.as_ref().map_or(&[][..], FrameSender::chunk);
        let writing = writer.wants_write(outbound.len());
        let reading = reader.is_reading();

        tokio::select! {
            biased;
            () = timer.expired() => Step::Timer,
            result = writer.flush_some(outbound), if writing => Step::Wrote(result),
            Some(command) = commands.recv() => Step::Command(command),
            result = reader.read(), if reading => match result {
                Ok([]) => Step::Eof,
                Ok(data) => {
                    if let Some(receiver) = receiver.as_mut() {
                        receiver.add(data);
                    }
                    Step::Received(data.len())
                }
                Err(err) => Step::ReadFailed(err),
            },
        }
    }

    fn apply_step(&mut self, step: Step) {
        match step {
            Step::Timer => self.on_timer(),
            Step::Command(command) => self.apply(command),
            Step::Wrote(Ok(Written::Bytes(n))) => self.on_written(n),
            Step::Wrote(Ok(Written::ShutDown)) => trace!("write half shut down"),
            Step::Wrote(Err(err)) => self.on_write_error(&err),
            Step::Received(n) => self.on_received(n),
            Step::Eof => self.on_read_eof(),
            Step::ReadFailed(err) => self.on_read_error(&err),
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Send {
                message,
                options,
                notifier,
            } => {
                // outcome already reported through the notifier
                let _ = self.send_with(message, options, notifier);
            }
            Command::Ping {
                data,
                options,
                notifier,
            } => self.control_with(true, data, options, notifier),
            Command::Pong {
                data,
                options,
                notifier,
            } => self.control_with(false, data, options, notifier),
            Command::Close { code, reason } => self.close_with(Some(code), &reason),
            Command::Terminate => self.terminate(),
            Command::Pause => {
                let _ = self.pause();
            }
            Command::Resume => {
                let _ = self.resume();
            }
        }
    }

    /// Write out frames queued before a graceful teardown, then half-close.
    /// Both steps share one close timeout.
    async fn linger(&mut self) {
        let Some(Lingering {
            mut writer,
            unsent,
            notifiers,
        }) = self.lingering.take()
        else {
            return;
        };
        let flush = async {
            writer.write_all(&unsent).await?;
            writer.shutdown().await
        };
        let result = match tokio::time::timeout(self.config.close_timeout, flush).await {
            Ok(Ok(())) => {
                trace!(flushed = unsent.len(), "socket shut down");
                Ok(())
            }
            Ok(Err(err)) => {
                trace!(error = %err, unsent = unsent.len(), "socket shutdown failed");
                Err(Error::Write(err.to_string()))
            }
            Err(_) => {
                trace!(unsent = unsent.len(), "socket shutdown timed out");
                Err(Error::Write("close timeout elapsed".into()))
            }
        };
        for notifier in notifiers {
            notifier.notify(result.clone());
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug_assert!(self.state.can_advance_to(next), "{} -> {next}", self.state);
        trace!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.shared_state.store(next.as_u8(), Ordering::Release);
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(Error::NotOpen(self.state));
        }
        if let Some(socket) = self.socket.as_mut() {
            socket.set_paused(paused);
        }
        Ok(())
    }

    fn send_with(
        &mut self,
        message: Message,
        options: SendOptions,
        notifier: WriteNotifier,
    ) -> Result<()> {
        if self.state != ConnectionState::Open {
            let err = Error::NotOpen(self.state);
            notifier.notify(Err(err.clone()));
            return Err(err);
        }
        let Some(sender) = self.sender.as_mut() else {
            return Err(Error::NotOpen(self.state));
        };

        let opts = options.resolve(&message, self.role, self.extensions.has_compression());
        if let Err(err) = sender.send(message, opts, &mut self.extensions, Some(notifier)) {
            self.on_sender_error(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn control(
        &mut self,
        ping: bool,
        data: Bytes,
        options: ControlOptions,
        suppress_if_closed: bool,
    ) -> Result<Completion> {
        if self.state != ConnectionState::Open {
            return if suppress_if_closed {
                Ok(Completion::ready(Ok(())))
            } else {
                Err(Error::NotOpen(self.state))
            };
        }
        let (notifier, completion) = Completion::channel();
        self.queue_control(ping, data, options, Some(notifier))?;
        Ok(completion)
    }

    fn control_with(
        &mut self,
        ping: bool,
        data: Bytes,
        options: ControlOptions,
        notifier: WriteNotifier,
    ) {
        if self.state != ConnectionState::Open {
            notifier.notify(Err(Error::NotOpen(self.state)));
            return;
        }
        // outcome already reported through the notifier
        let _ = self.queue_control(ping, data, options, Some(notifier));
    }

    fn queue_control(
        &mut self,
        ping: bool,
        data: Bytes,
        options: ControlOptions,
        notifier: Option<WriteNotifier>,
    ) -> Result<()> {
        if data.len() > MAX_CONTROL_FRAME_PAYLOAD {
            let err = Error::ControlFrameTooLarge(data.len());
            if let Some(notifier) = notifier {
                notifier.notify(Err(err.clone()));
            }
            return Err(err);
        }
        let mask = options.resolve(self.role);
        let Some(sender) = self.sender.as_mut() else {
            return Err(Error::NotOpen(self.state));
        };
        if ping {
            sender.ping(data, mask, notifier)
        } else {
            sender.pong(data, mask, notifier)
        }
    }

    /// `code = None` sends a close frame without a body.
    fn close_with(&mut self, code: Option<CloseCode>, reason: &str) {
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Connecting => self.finalize(true),
            ConnectionState::Closing => {
                if self.peer_closed && self.role.is_server() {
                    self.terminate();
                }
            }
            ConnectionState::Open => {
                self.set_state(ConnectionState::Closing);
                if self.close_frame.is_none() {
                    let code = code.unwrap_or(CloseCode::NoStatusReceived);
                    self.close_frame = Some(CloseFrame::new(code, reason));
                }
                debug!(
                    role = %self.role,
                    code = code.map_or(0, |c| c.as_u16()),
                    reason,
                    "sending close frame"
                );
                if let Some(sender) = self.sender.as_mut() {
                    sender.close(code.map(|c| c.as_u16()), reason, self.role.must_mask());
                }
                self.timer.arm(self.config.close_timeout);
            }
        }
    }

    fn on_close_written(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        trace!(peer_closed = self.peer_closed, "close frame written");
        self.close_written = true;
        if self.peer_closed && self.role.is_server() {
            self.terminate();
        } else {
            self.timer.arm(self.config.close_timeout);
        }
    }

    fn on_written(&mut self, n: usize) {
        let close_written = self.sender.as_mut().is_some_and(|sender| sender.advance(n));
        if close_written {
            self.on_close_written();
        }
    }

    fn on_received(&mut self, n: usize) {
        self.bytes_received += n as u64;
        self.dispatch();
    }

    /// Deliver every complete event the receiver holds.
    fn dispatch(&mut self) {
        while self.state != ConnectionState::Closed {
            let Some(receiver) = self.receiver.as_mut() else {
                return;
            };
            let Some(event) = receiver.next_event(&mut self.extensions) else {
                return;
            };

            match event {
                ReceiverEvent::Message(message) => self.handler.on_message(message),
                ReceiverEvent::Ping(data) => {
                    // suppressed outside Open, so this cannot fail on state
                    if let Err(err) = self.pong(data.clone(), ControlOptions::default(), true) {
                        trace!(error = %err, "auto pong not sent");
                    }
                    self.handler.on_ping(data);
                }
                ReceiverEvent::Pong(data) => self.handler.on_pong(data),
                ReceiverEvent::Close(frame) => self.on_peer_close(frame),
                ReceiverEvent::Error(err) => self.on_receiver_error(err),
            }
        }
    }

    fn on_peer_close(&mut self, frame: Option<CloseFrame>) {
        let frame = frame.unwrap_or_else(|| CloseFrame::new(CloseCode::NoStatusReceived, ""));
        debug!(
            role = %self.role,
            code = frame.code.as_u16(),
            reason = %frame.reason,
            "close frame received"
        );
        self.peer_closed = true;
        if self.close_frame.is_none() {
            self.close_frame = Some(frame.clone());
        }

        let echo = (frame.code != CloseCode::NoStatusReceived).then_some(frame.code);
        self.close_with(echo, &frame.reason);
    }

    fn on_receiver_error(&mut self, err: Error) {
        let code = err.close_code();
        debug!(error = %err, code = code.as_u16(), "closing on invalid inbound data");
        self.close_with(Some(code), "");
        self.handler.on_error(err);
    }

    fn on_sender_error(&mut self, err: Error) {
        debug!(error = %err, "outbound frame failed");
        self.close_with(Some(CloseCode::ProtocolError), "");
        self.handler.on_error(err);
    }

    fn on_write_error(&mut self, err: &io::Error) {
        warn!(error = %err, "socket write failed");
        if let Some(sender) = self.sender.as_mut() {
            sender.abandon(&Error::Write(err.to_string()));
        }
        self.handler.on_error(Error::Transport(err.to_string()));
        self.finalize(true);
    }

    fn on_read_error(&mut self, err: &io::Error) {
        warn!(error = %err, "socket read failed");
        self.handler.on_error(Error::Transport(err.to_string()));
        self.finalize(true);
    }

    fn on_read_eof(&mut self) {
        debug!(state = %self.state, "peer closed the socket");
        self.finalize(false);
    }

    /// Reports 1006 only when the closing handshake is incomplete. Once both
    /// close frames were exchanged the known close code is kept, and only the
    /// socket teardown was left to wait for.
    fn on_timer(&mut self) {
        let handshake_done = self.peer_closed && self.close_written;
        debug!(state = %self.state, handshake_done, "close timeout elapsed");
        self.finalize(!handshake_done);
    }

    /// The single teardown path. Runs at most once.
    fn finalize(&mut self, abnormal: bool) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);
        self.timer.cancel();

        let frame = match (&self.close_frame, abnormal) {
            (Some(frame), false) => frame.clone(),
            _ => CloseFrame::new(CloseCode::Abnormal, ""),
        };
        debug!(
            role = %self.role,
            code = frame.code.as_u16(),
            reason = %frame.reason,
            abnormal,
            bytes_received = self.bytes_received,
            "connection closed"
        );
        self.handler.on_close(frame);

        self.transport = None;
        let writer = self.socket.take().and_then(|socket| socket.release(!abnormal));
        let mut sender = self.sender.take().unwrap_or_default();
        match writer {
            Some(writer) => {
                let (unsent, notifiers) = sender.drain();
                self.lingering = Some(Lingering {
                    writer,
                    unsent,
                    notifiers,
                });
            }
            None => sender.abandon(&Error::ConnectionClosed),
        }
        if let Some(mut receiver) = self.receiver.take() {
            receiver.cleanup();
        }
        self.extensions.cleanup();
        self.handler = Box::new(Detached);
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("protocol", &self.protocol)
            .field("extensions", &self.extensions)
            .field("bytes_received", &self.bytes_received)
            .field("close_frame", &self.close_frame)
            .finish_non_exhaustive()
    }
}
