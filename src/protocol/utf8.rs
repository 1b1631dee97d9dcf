//! Incremental UTF-8 validation for fragmented text messages.

use crate::error::{Error, Result};

/// Validates UTF-8 across fragment boundaries.
///
/// A multi-byte sequence split between two fragments is carried over to the
/// next call instead of being reported as invalid.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    carry: [u8; 4],
    carry_len: usize,
}

impl Utf8Validator {
    /// Create a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next fragment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` on an invalid sequence, or on an
    /// incomplete sequence when `is_final` is set.
    pub fn validate(&mut self, data: &[u8], is_final: bool) -> Result<()> {
        let joined;
        let input = if self.carry_len > 0 {
            let mut buf = Vec::with_capacity(self.carry_len + data.len());
            buf.extend_from_slice(&self.carry[..self.carry_len]);
            buf.extend_from_slice(data);
            joined = buf;
            &joined[..]
        } else {
            data
        };
        self.carry_len = 0;

        match std::str::from_utf8(input) {
            Ok(_) => Ok(()),
            Err(e) if !is_final && e.error_len().is_none() => {
                let tail = &input[e.valid_up_to()..];
                self.carry[..tail.len()].copy_from_slice(tail);
                self.carry_len = tail.len();
                Ok(())
            }
            Err(_) => Err(Error::InvalidUtf8),
        }
    }

    /// Discard any carried-over bytes.
    pub fn reset(&mut self) {
        self.carry_len = 0;
    }
}
