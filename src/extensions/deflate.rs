//! Permessage-deflate WebSocket compression extension (RFC 7692).

use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::{Extension, PERMESSAGE_DEFLATE, RsvBits};
use crate::protocol::Frame;

const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Messages smaller than this are sent uncompressed.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Parameters agreed during the upgrade handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateConfig {
    /// The server resets its compression context after every message.
    pub server_no_context_takeover: bool,
    /// The client resets its compression context after every message.
    pub client_no_context_takeover: bool,
    /// zlib compression level, 0-9.
    pub compression_level: u32,
    /// Minimum payload size worth compressing.
    pub threshold: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            compression_level: 6,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl DeflateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    #[must_use]
    pub const fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    #[must_use]
    pub const fn threshold(mut self, bytes: usize) -> Self {
        self.threshold = bytes;
        self
    }

    /// Set the compression level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for levels above 9.
    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {level}"
            )));
        }
        self.compression_level = level;
        Ok(self)
    }
}

/// Connection-scoped permessage-deflate codec.
///
/// Both directions keep their own raw deflate stream. [`Extension::cleanup`]
/// drops them; any later use fails.
pub struct PerMessageDeflate {
    config: DeflateConfig,
    role: Role,
    compressor: Option<Compress>,
    decompressor: Option<Decompress>,
}

impl PerMessageDeflate {
    /// Create the codec for one side of a connection.
    #[must_use]
    pub fn new(role: Role, config: DeflateConfig) -> Self {
        let level = Compression::new(config.compression_level);
        Self {
            compressor: Some(Compress::new(level, false)),
            decompressor: Some(Decompress::new(false)),
            config,
            role,
        }
    }

    /// The negotiated parameters.
    #[must_use]
    pub const fn config(&self) -> &DeflateConfig {
        &self.config
    }

    fn reset_outbound(&self) -> bool {
        match self.role {
            Role::Server => self.config.server_no_context_takeover,
            Role::Client => self.config.client_no_context_takeover,
        }
    }

    fn reset_inbound(&self) -> bool {
        match self.role {
            Role::Server => self.config.client_no_context_takeover,
            Role::Client => self.config.server_no_context_takeover,
        }
    }

    fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let reset = self.reset_outbound();
        let compressor = self
            .compressor
            .as_mut()
            .ok_or_else(|| Error::Extension("Compressor released".into()))?;

        let start = compressor.total_in();
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            let consumed = (compressor.total_in() - start) as usize;
            let before = (compressor.total_in(), compressor.total_out());
            compressor
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("Compression failed: {e}")))?;

            let consumed = (compressor.total_in() - start) as usize;
            let progressed = before != (compressor.total_in(), compressor.total_out());
            if out.len() < out.capacity() && (consumed == data.len() || !progressed) {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }
        if reset {
            compressor.reset();
        }
        Ok(out)
    }

    fn decompress(&mut self, data: &[u8], max_size: usize) -> Result<Vec<u8>> {
        let reset = self.reset_inbound();
        let decompressor = self
            .decompressor
            .as_mut()
            .ok_or_else(|| Error::Extension("Decompressor released".into()))?;

        let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let start = decompressor.total_in();
        let mut out = Vec::with_capacity(data.len().saturating_mul(2).clamp(64, 64 * 1024));
        loop {
            if out.len() == out.capacity() {
                let room = max_size.saturating_sub(out.len()).saturating_add(1);
                out.reserve(out.capacity().min(room).max(1));
            }
            let consumed = (decompressor.total_in() - start) as usize;
            let before = (decompressor.total_in(), decompressor.total_out());
            decompressor
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("Decompression failed: {e}")))?;

            if out.len() > max_size {
                return Err(Error::PayloadTooLarge {
                    size: out.len(),
                    max: max_size,
                });
            }

            let consumed = (decompressor.total_in() - start) as usize;
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            if before == (decompressor.total_in(), decompressor.total_out())
                && out.len() < out.capacity()
            {
                return Err(Error::Extension("Truncated deflate stream".into()));
            }
        }

        if reset {
            decompressor.reset(false);
        }
        Ok(out)
    }
}

impl Extension for PerMessageDeflate {
    fn name(&self) -> &str {
        PERMESSAGE_DEFLATE
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        if !frame.opcode.is_data() || frame.payload.len() < self.config.threshold {
            return Ok(());
        }
        let compressed = self.compress(&frame.payload)?;
        frame.payload = Bytes::from(compressed);
        frame.rsv1 = true;
        Ok(())
    }

    fn decode(&mut self, frame: &mut Frame, max_size: usize) -> Result<()> {
        if !frame.rsv1 {
            return Ok(());
        }
        if frame.opcode.is_control() {
            return Err(Error::ReservedBitsSet);
        }
        let decompressed = self.decompress(&frame.payload, max_size)?;
        frame.payload = Bytes::from(decompressed);
        frame.rsv1 = false;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.compressor = None;
        self.decompressor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn codec() -> PerMessageDeflate {
        PerMessageDeflate::new(Role::Server, DeflateConfig::new().threshold(0))
    }

    #[test]
    fn test_compression_roundtrip() {
        let mut ext = codec();
        let original = b"Hello, WebSocket compression! Hello, WebSocket compression!".to_vec();
        let mut frame = Frame::new(true, OpCode::Text, original.clone());

        ext.encode(&mut frame).unwrap();
        assert!(frame.rsv1);
        assert_ne!(&frame.payload[..], &original[..]);
        assert!(!frame.payload.ends_with(&DEFLATE_TRAILER));

        ext.decode(&mut frame, 1024).unwrap();
        assert!(!frame.rsv1);
        assert_eq!(&frame.payload[..], &original[..]);
    }

    #[test]
    fn test_context_takeover_across_messages() {
        let mut sender = codec();
        let mut receiver = PerMessageDeflate::new(Role::Client, DeflateConfig::new().threshold(0));

        for _ in 0..3 {
            let mut frame = Frame::new(true, OpCode::Binary, vec![42u8; 4096]);
            sender.encode(&mut frame).unwrap();
            receiver.decode(&mut frame, 8192).unwrap();
            assert_eq!(&frame.payload[..], &[42u8; 4096][..]);
        }
    }

    #[test]
    fn test_no_context_takeover_resets() {
        let config = DeflateConfig::new()
            .threshold(0)
            .server_no_context_takeover(true);
        let mut ext = PerMessageDeflate::new(Role::Server, config);

        let mut first = Frame::new(true, OpCode::Text, &b"repeat repeat repeat"[..]);
        let mut second = first.clone();
        ext.encode(&mut first).unwrap();
        ext.encode(&mut second).unwrap();
        assert_eq!(first.payload, second.payload);
    }

    #[test]
    fn test_threshold_skips_small_messages() {
        let mut ext = PerMessageDeflate::new(Role::Server, DeflateConfig::default());
        let mut frame = Frame::new(true, OpCode::Text, &b"tiny"[..]);
        ext.encode(&mut frame).unwrap();
        assert!(!frame.rsv1);
        assert_eq!(&frame.payload[..], b"tiny");
    }

    #[test]
    fn test_control_frame_bypass() {
        let mut ext = codec();
        let mut ping = Frame::ping(&b"ping"[..]);
        ext.encode(&mut ping).unwrap();
        assert!(!ping.rsv1);
        assert_eq!(&ping.payload[..], b"ping");

        let mut flagged = Frame::ping(&b"ping"[..]);
        flagged.rsv1 = true;
        assert_eq!(ext.decode(&mut flagged, 1024), Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_decompression_bound() {
        let mut ext = codec();
        let mut frame = Frame::new(true, OpCode::Binary, vec![0u8; 10_000]);
        ext.encode(&mut frame).unwrap();

        let mut receiver = PerMessageDeflate::new(Role::Client, DeflateConfig::default());
        assert!(matches!(
            receiver.decode(&mut frame, 1000),
            Err(Error::PayloadTooLarge { max: 1000, .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let mut ext = codec();
        let mut frame = Frame::new(true, OpCode::Binary, vec![0xFFu8; 16]);
        frame.rsv1 = true;
        assert!(matches!(
            ext.decode(&mut frame, 1024),
            Err(Error::Extension(_))
        ));
    }

    #[test]
    fn test_cleanup_releases_codecs() {
        let mut ext = codec();
        ext.cleanup();

        let mut frame = Frame::new(true, OpCode::Text, &b"after cleanup"[..]);
        assert!(matches!(ext.encode(&mut frame), Err(Error::Extension(_))));
    }

    #[test]
    fn test_config_validation() {
        assert!(DeflateConfig::new().compression_level(9).is_ok());
        assert!(DeflateConfig::new().compression_level(10).is_err());
        assert_eq!(DeflateConfig::default().threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_name_and_rsv_bits() {
        let ext = codec();
        assert_eq!(ext.name(), "permessage-deflate");
        assert_eq!(ext.rsv_bits(), RsvBits::RSV1);
    }
}
