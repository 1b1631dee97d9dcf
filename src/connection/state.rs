//! WebSocket connection lifecycle states.

/// WebSocket connection state.
///
/// States only move forward: `Connecting -> Open -> Closing -> Closed`, with
/// any state allowed to jump straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Upgrade accepted, socket not yet attached.
    #[default]
    Connecting = 0,
    /// Connection is open and ready for data transfer.
    Open = 1,
    /// Close handshake in progress.
    Closing = 2,
    /// Terminal state. Teardown has run.
    Closed = 3,
}

impl ConnectionState {
    /// Returns `true` for every state but `Closed`.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Only `Open` accepts data and control frames from the application.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Returns `true` for `Open` or `Closing`.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    #[must_use]
    #[inline]
    pub const fn can_advance_to(&self, next: ConnectionState) -> bool {
        (*self as u8) < (next as u8)
    }

    #[must_use]
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a value produced by [`ConnectionState::as_u8`].
    ///
    /// Out-of-range values decode as `Closed`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ConnectionState; 4] = [
        ConnectionState::Connecting,
        ConnectionState::Open,
        ConnectionState::Closing,
        ConnectionState::Closed,
    ];

    #[test]
    fn test_initial_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
    }

    #[test]
    fn test_forward_only_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_advance_to(Open));
        assert!(Connecting.can_advance_to(Closed));
        assert!(Open.can_advance_to(Closing));
        assert!(Closing.can_advance_to(Closed));

        assert!(!Open.can_advance_to(Connecting));
        assert!(!Closing.can_advance_to(Open));
        assert!(!Closed.can_advance_to(Closed));
        assert!(!Open.can_advance_to(Open));
    }

    #[test]
    fn test_can_send_in_each_state() {
        assert!(!ConnectionState::Connecting.can_send());
        assert!(ConnectionState::Open.can_send());
        assert!(!ConnectionState::Closing.can_send());
        assert!(!ConnectionState::Closed.can_send());
    }

    #[test]
    fn test_can_receive_in_each_state() {
        assert!(!ConnectionState::Connecting.can_receive());
        assert!(ConnectionState::Open.can_receive());
        assert!(ConnectionState::Closing.can_receive());
        assert!(!ConnectionState::Closed.can_receive());
    }

    #[test]
    fn test_u8_roundtrip() {
        for state in ALL {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Closed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Open.to_string(), "Open");
        assert_eq!(ConnectionState::Closing.to_string(), "Closing");
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
    }
}
