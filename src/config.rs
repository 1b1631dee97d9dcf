//! Configuration and limits for WebSocket connections.

use std::time::Duration;

/// Time allowed for the closing handshake (or a half-closed socket) to finish
/// before the connection is forcibly finalized.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Resource limits applied to inbound data.
///
/// These limits prevent resource exhaustion attacks and ensure
/// bounded memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single message in bytes.
    ///
    /// Applies to each frame and to the reassembled (and decompressed)
    /// message. Exceeding it closes the connection with 1009.
    ///
    /// Default: 100 MB (100 * 1024 * 1024)
    pub max_payload_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_size: 100 * 1024 * 1024,
            max_fragment_count: 128,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_payload_size: usize, max_fragment_count: usize) -> Self {
        Self {
            max_payload_size,
            max_fragment_count,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max payload: 256 KB
    /// - Max fragments: 16
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_payload_size: 256 * 1024,
            max_fragment_count: 16,
        }
    }

    /// Create limits for unrestricted use.
    ///
    /// Warning: Use only in trusted environments.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            max_payload_size: usize::MAX,
            max_fragment_count: usize::MAX,
        }
    }

    /// Validate that a payload size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`](crate::Error::PayloadTooLarge) if `size`
    /// exceeds the configured maximum.
    pub const fn check_payload_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_payload_size {
            Err(crate::Error::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`](crate::Error::TooManyFragments) if `count`
    /// exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), crate::Error> {
        if count > self.max_fragment_count {
            Err(crate::Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Bound on the closing handshake and on socket half-close.
    ///
    /// Default: 30 seconds
    pub close_timeout: Duration,

    /// Read buffer size (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,

    /// Disable Nagle's algorithm on the transport when it supports it.
    ///
    /// Default: true
    pub nodelay: bool,

    /// Accept unmasked frames from clients (server only).
    ///
    /// RFC 6455 requires clients to mask all frames. Setting this to `true`
    /// breaks that rule but may be useful for testing.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            read_buffer_size: 8192,
            nodelay: true,
            accept_unmasked_frames: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum inbound payload size.
    #[must_use]
    pub const fn with_max_payload_size(mut self, size: usize) -> Self {
        self.limits.max_payload_size = size;
        self
    }

    /// Set the closing handshake timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Enable or disable `TCP_NODELAY` on the transport.
    #[must_use]
    pub const fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Accept unmasked frames from clients.
    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_payload_size, 100 * 1024 * 1024);
        assert_eq!(limits.max_fragment_count, 128);
    }

    #[test]
    fn test_limits_embedded() {
        let limits = Limits::embedded();
        assert_eq!(limits.max_payload_size, 256 * 1024);
        assert_eq!(limits.max_fragment_count, 16);
    }

    #[test]
    fn test_limits_check_payload_size() {
        let limits = Limits::new(1024, 4);
        assert!(limits.check_payload_size(1024).is_ok());
        assert_eq!(
            limits.check_payload_size(1025),
            Err(crate::Error::PayloadTooLarge {
                size: 1025,
                max: 1024
            })
        );
    }

    #[test]
    fn test_limits_check_fragment_count() {
        let limits = Limits::default();
        assert!(limits.check_fragment_count(50).is_ok());
        assert!(limits.check_fragment_count(200).is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.close_timeout, Duration::from_secs(30));
        assert_eq!(config.read_buffer_size, 8192);
        assert!(config.nodelay);
        assert!(!config.accept_unmasked_frames);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_limits(Limits::embedded())
            .with_max_payload_size(4096)
            .with_close_timeout(Duration::from_secs(5))
            .with_read_buffer_size(1024)
            .with_nodelay(false);

        assert_eq!(config.limits.max_payload_size, 4096);
        assert_eq!(config.limits.max_fragment_count, 16);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.read_buffer_size, 1024);
        assert!(!config.nodelay);
    }
}
