//! Session event delivery.
//!
//! A connection reports what happens to it through one [`Handler`]. Every
//! method has a no-op default, so implementors override only what they need.
//! For consumers that prefer pulling events, [`events`] pairs a channel
//! handler with an [`EventStream`].

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::message::{CloseFrame, Message};

/// Callback table for one connection.
///
/// Callbacks run on the connection's task, between state transitions. They
/// must not block; use a [`ConnectionHandle`](crate::ConnectionHandle) to act
/// on the connection from inside a callback.
pub trait Handler: Send {
    fn on_open(&mut self) {}

    fn on_message(&mut self, _message: Message) {}

    /// A ping arrived. The pong reply has already been queued.
    fn on_ping(&mut self, _data: Bytes) {}

    fn on_pong(&mut self, _data: Bytes) {}

    /// Terminal event, delivered exactly once.
    fn on_close(&mut self, _frame: CloseFrame) {}

    fn on_error(&mut self, _error: Error) {}
}

/// A session event, as delivered through [`events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    Close(CloseFrame),
    Error(Error),
}

impl Handler for mpsc::UnboundedSender<Event> {
    fn on_open(&mut self) {
        let _ = self.send(Event::Open);
    }

    fn on_message(&mut self, message: Message) {
        let _ = self.send(Event::Message(message));
    }

    fn on_ping(&mut self, data: Bytes) {
        let _ = self.send(Event::Ping(data));
    }

    fn on_pong(&mut self, data: Bytes) {
        let _ = self.send(Event::Pong(data));
    }

    fn on_close(&mut self, frame: CloseFrame) {
        let _ = self.send(Event::Close(frame));
    }

    fn on_error(&mut self, error: Error) {
        let _ = self.send(Event::Error(error));
    }
}

/// Installed once a connection has been torn down.
///
/// Absorbs whatever late event still reaches the connection.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Detached;

impl Handler for Detached {
    fn on_error(&mut self, error: Error) {
        tracing::trace!(%error, "error after teardown ignored");
    }
}

/// Pull-based view of a connection's events.
///
/// Ends after [`Event::Close`] once the connection has dropped its sender.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A channel-backed [`Handler`] and the stream that receives its events.
#[must_use]
pub fn events() -> (mpsc::UnboundedSender<Event>, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, EventStream { rx })
}
