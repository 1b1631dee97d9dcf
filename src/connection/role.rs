//! Which end of the connection this process is.

/// Connection role.
///
/// Decides outbound masking defaults and who owns the TCP teardown once the
/// closing handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Masks outbound frames; waits for the server to drop the socket.
    Client,
    /// Sends unmasked frames; drops the socket after the close exchange.
    #[default]
    Server,
}

impl Role {
    /// Default masking for outbound frames.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Servers expect masked frames from clients.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }

    #[inline]
    #[must_use]
    pub const fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::Server => write!(f, "Server"),
        }
    }
}
