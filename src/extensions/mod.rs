//! Negotiated WebSocket extensions (RFC 6455 Section 9).
//!
//! Negotiation happens during the HTTP upgrade, before a connection exists.
//! What reaches the connection is an [`ExtensionSet`]: the accepted extension
//! instances keyed by name, each able to transform outbound and inbound
//! messages and to release its resources exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use wsession::extensions::{ExtensionSet, deflate::{DeflateConfig, PerMessageDeflate}};
//!
//! let mut extensions = ExtensionSet::new();
//! extensions.insert(Box::new(PerMessageDeflate::new(Role::Server, DeflateConfig::default())))?;
//! ```

#[cfg(feature = "compression")]
pub mod deflate;

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Registered name of the per-message compression extension (RFC 7692).
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// RSV bit usage declaration for extensions.
///
/// Extensions must declare which RSV bits they use to prevent conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvBits {
    /// Extension uses RSV1 bit (e.g., permessage-deflate).
    pub rsv1: bool,
    /// Extension uses RSV2 bit.
    pub rsv2: bool,
    /// Extension uses RSV3 bit.
    pub rsv3: bool,
}

impl RsvBits {
    /// No RSV bits used.
    pub const NONE: Self = Self {
        rsv1: false,
        rsv2: false,
        rsv3: false,
    };

    /// RSV1 only (used by permessage-deflate).
    pub const RSV1: Self = Self {
        rsv1: true,
        rsv2: false,
        rsv3: false,
    };

    /// Check if any bits conflict with another declaration.
    #[must_use]
    pub const fn conflicts_with(&self, other: &RsvBits) -> bool {
        (self.rsv1 && other.rsv1) || (self.rsv2 && other.rsv2) || (self.rsv3 && other.rsv3)
    }

    const fn union(self, other: RsvBits) -> Self {
        Self {
            rsv1: self.rsv1 || other.rsv1,
            rsv2: self.rsv2 || other.rsv2,
            rsv3: self.rsv3 || other.rsv3,
        }
    }
}

/// A negotiated extension instance.
///
/// Instances are connection-scoped: the owning connection calls
/// [`Extension::cleanup`] once while tearing down.
pub trait Extension: Send {
    /// Extension name as used in the `Sec-WebSocket-Extensions` header.
    fn name(&self) -> &str;

    /// Which RSV bits this extension uses.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Transform a complete outbound message frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the transformation fails.
    fn encode(&mut self, frame: &mut Frame) -> Result<()>;

    /// Transform a complete inbound message. `max_size` bounds the output.
    ///
    /// Implementations clear the RSV bits they handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the payload cannot be decoded, or
    /// [`Error::PayloadTooLarge`] if the output exceeds `max_size`.
    fn decode(&mut self, frame: &mut Frame, max_size: usize) -> Result<()>;

    /// Release codec state. Default does nothing.
    fn cleanup(&mut self) {}
}

/// The extensions negotiated for one connection, in negotiation order.
#[derive(Default)]
pub struct ExtensionSet {
    extensions: Vec<Box<dyn Extension>>,
    used_rsv_bits: RsvBits,
    cleaned_up: bool,
}

impl ExtensionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a negotiated extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for a duplicate name or when the
    /// extension's RSV bits are already claimed.
    pub fn insert(&mut self, extension: Box<dyn Extension>) -> Result<()> {
        if self.contains(extension.name()) {
            return Err(Error::InvalidExtension(format!(
                "Extension '{}' negotiated twice",
                extension.name()
            )));
        }

        let rsv = extension.rsv_bits();
        if self.used_rsv_bits.conflicts_with(&rsv) {
            return Err(Error::InvalidExtension(format!(
                "Extension '{}' RSV bits conflict with existing extensions",
                extension.name()
            )));
        }

        self.used_rsv_bits = self.used_rsv_bits.union(rsv);
        self.extensions.push(extension);
        Ok(())
    }

    /// Look up an extension by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Extension> {
        self.extensions
            .iter()
            .find(|ext| ext.name() == name)
            .map(|ext| &**ext)
    }

    /// Returns `true` if an extension with this name was negotiated.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of the negotiated extensions, in negotiation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|ext| ext.name())
    }

    /// Number of negotiated extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Returns `true` if nothing was negotiated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Returns `true` if per-message compression was negotiated.
    #[must_use]
    pub fn has_compression(&self) -> bool {
        self.contains(PERMESSAGE_DEFLATE)
    }

    /// RSV bits claimed by the negotiated extensions.
    #[must_use]
    pub const fn rsv_bits(&self) -> RsvBits {
        self.used_rsv_bits
    }

    /// Run every extension over an outbound message, in negotiation order.
    ///
    /// # Errors
    ///
    /// Propagates the first extension failure.
    pub fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        if self.cleaned_up {
            return Err(Error::ConnectionClosed);
        }
        for ext in &mut self.extensions {
            ext.encode(frame)?;
        }
        Ok(())
    }

    /// Run every extension over an inbound message, in reverse order.
    ///
    /// # Errors
    ///
    /// Propagates the first extension failure.
    pub fn decode(&mut self, frame: &mut Frame, max_size: usize) -> Result<()> {
        if self.cleaned_up {
            return Err(Error::ConnectionClosed);
        }
        for ext in self.extensions.iter_mut().rev() {
            ext.decode(frame, max_size)?;
        }
        Ok(())
    }

    /// Release every extension's resources. Later calls do nothing.
    pub fn cleanup(&mut self) {
        if std::mem::replace(&mut self.cleaned_up, true) {
            return;
        }
        for ext in &mut self.extensions {
            ext.cleanup();
        }
    }

    /// Returns `true` once [`ExtensionSet::cleanup`] has run.
    #[must_use]
    pub const fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }
}

impl fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSet")
            .field("extensions", &self.names().collect::<Vec<_>>())
            .field("used_rsv_bits", &self.used_rsv_bits)
            .field("cleaned_up", &self.cleaned_up)
            .finish()
    }
}
