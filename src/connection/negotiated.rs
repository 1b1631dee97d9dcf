//! What the HTTP upgrade agreed on before the connection was created.

use bytes::Bytes;

use crate::extensions::ExtensionSet;

/// The only protocol version this crate speaks (RFC 6455).
pub const PROTOCOL_VERSION: u8 = 13;

/// Result of the upgrade handshake, handed to
/// [`Connection::new`](crate::Connection::new).
#[derive(Debug)]
pub struct Negotiated {
    /// `Sec-WebSocket-Version` the client asked for.
    pub protocol_version: u8,
    /// Selected subprotocol, if any.
    pub protocol: Option<String>,
    /// Accepted extensions.
    pub extensions: ExtensionSet,
    /// Bytes read past the end of the upgrade request. These are the first
    /// bytes of the WebSocket stream.
    pub head: Bytes,
}

impl Default for Negotiated {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            protocol: None,
            extensions: ExtensionSet::new(),
            head: Bytes::new(),
        }
    }
}

impl Negotiated {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    #[must_use]
    pub const fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: ExtensionSet) -> Self {
        self.extensions = extensions;
        self
    }

    #[must_use]
    pub fn with_head(mut self, head: impl Into<Bytes>) -> Self {
        self.head = head.into();
        self
    }
}
