//! # wsession - server-side WebSocket session lifecycle
//!
//! `wsession` takes over a transport once the HTTP upgrade has finished and
//! runs the RFC 6455 session on top of it: framing, masking, fragmentation,
//! UTF-8 validation, ping/pong, the closing handshake and teardown.
//!
//! ## Features
//!
//! - **Single teardown path** reporting exactly one close code and reason
//! - **Bounded closing handshake** through a configurable close timeout
//! - **Extension framework** with permessage-deflate compression
//! - **Resource limits** on message size and fragment count
//! - **Callback or stream** event delivery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsession::{Config, Connection, Handler, Message, Negotiated};
//!
//! struct Log;
//!
//! impl Handler for Log {
//!     fn on_message(&mut self, message: Message) {
//!         println!("{} bytes", message.len());
//!     }
//! }
//!
//! # async fn serve(stream: tokio::net::TcpStream) {
//! let conn = Connection::accept(stream, Negotiated::new(), Config::default(), Log);
//! conn.run().await;
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;

pub use config::{Config, Limits};
pub use connection::{
    Completion, Connection, ConnectionHandle, ConnectionState, ControlOptions, Event,
    EventStream, Handler, Negotiated, Role, SendOptions, Transport, events,
};
pub use error::{Error, Result};
#[cfg(feature = "compression")]
pub use extensions::deflate::{DeflateConfig, PerMessageDeflate};
pub use extensions::{Extension, ExtensionSet};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::OpCode;
