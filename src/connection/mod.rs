//! WebSocket session lifecycle.
//!
//! A [`Connection`] owns one upgraded transport and moves through four
//! states:
//!
//! 1. **Connecting** - created, not yet wired to the socket
//! 2. **Open** - messages flow both ways
//! 3. **Closing** - a close frame was sent or received
//! 4. **Closed** - torn down; the handler has seen its single close event
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsession::{CloseCode, Config, Connection, Event, Negotiated, SendOptions, events};
//!
//! # async fn serve(stream: tokio::net::TcpStream) -> wsession::Result<()> {
//! let (handler, mut events) = events();
//! let conn = Connection::accept(stream, Negotiated::new(), Config::default(), handler);
//! let handle = conn.handle();
//! tokio::spawn(conn.run());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         Event::Message(message) => {
//!             handle.send(message, SendOptions::default()).await?;
//!         }
//!         Event::Close(frame) => println!("closed: {}", frame.code.as_u16()),
//!         _ => {}
//!     }
//! }
//! # handle.close(CloseCode::Normal, "").ok();
//! # Ok(())
//! # }
//! ```

mod handle;
mod handler;
mod negotiated;
mod options;
mod receiver;
mod role;
mod sender;
mod socket;
mod state;
mod timer;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::Connection;
pub use handle::ConnectionHandle;
pub use handler::{Event, EventStream, Handler, events};
pub use negotiated::{Negotiated, PROTOCOL_VERSION};
pub use options::{ControlOptions, FrameOptions, SendOptions};
pub use receiver::{FrameReceiver, ReceiverEvent};
pub use role::Role;
pub use sender::{Completion, FrameSender, WriteNotifier};
pub use socket::{SocketAdapter, SocketReader, SocketWriter, Transport, Written};
pub use state::ConnectionState;
pub use timer::CloseTimer;
