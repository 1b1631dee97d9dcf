//! Per-call options for outbound data and control frames.

use crate::connection::Role;
use crate::message::Message;

/// Options for [`Connection::send`](crate::Connection::send).
///
/// Unset fields take their defaults when the send is resolved against the
/// connection: `fin` is true, `mask` follows the role and `compress` is on
/// whenever a compression extension was negotiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub fin: Option<bool>,
    pub mask: Option<bool>,
    pub compress: Option<bool>,
}

impl SendOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this frame as the last (or not the last) of its message.
    #[must_use]
    pub const fn fin(mut self, fin: bool) -> Self {
        self.fin = Some(fin);
        self
    }

    #[must_use]
    pub const fn mask(mut self, mask: bool) -> Self {
        self.mask = Some(mask);
        self
    }

    #[must_use]
    pub const fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    /// Apply defaults for this connection.
    #[must_use]
    pub fn resolve(self, message: &Message, role: Role, has_compression: bool) -> FrameOptions {
        FrameOptions {
            fin: self.fin.unwrap_or(true),
            binary: message.is_binary(),
            mask: self.mask.unwrap_or(role.must_mask()),
            compress: has_compression && self.compress.unwrap_or(true),
        }
    }
}

/// Options for ping and pong frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlOptions {
    pub mask: Option<bool>,
}

impl ControlOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn mask(mut self, mask: bool) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Masking for this control frame: explicit, or the role's default.
    #[must_use]
    pub fn resolve(self, role: Role) -> bool {
        self.mask.unwrap_or(role.must_mask())
    }
}

/// Fully resolved options for one outbound data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub fin: bool,
    pub binary: bool,
    pub mask: bool,
    pub compress: bool,
}
