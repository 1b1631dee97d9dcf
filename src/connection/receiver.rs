//! Inbound frame parsing and message reassembly.
//!
//! [`FrameReceiver`] buffers raw socket bytes and turns them into
//! [`ReceiverEvent`]s. It enforces the RFC 6455 framing rules for the local
//! role and stops producing events after the first close frame or error.

use bytes::{Buf, Bytes, BytesMut};

use crate::config::{Config, Limits};
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::ExtensionSet;
use crate::message::{CloseFrame, Message};
use crate::protocol::{
    Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, OpCode, Utf8Validator, apply_mask,
    decode_close_payload,
};

/// A logical event decoded from the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    /// Peer close frame; `None` when it carried no body.
    Close(Option<CloseFrame>),
    Error(Error),
}

#[derive(Debug)]
struct PartialMessage {
    text: bool,
    compressed: bool,
    payload: BytesMut,
    fragments: usize,
}

/// Incremental frame parser for one connection.
#[derive(Debug)]
pub struct FrameReceiver {
    role: Role,
    limits: Limits,
    accept_unmasked: bool,
    rsv1_allowed: bool,
    buffer: BytesMut,
    partial: Option<PartialMessage>,
    utf8: Utf8Validator,
    finished: bool,
}

impl FrameReceiver {
    /// `rsv1_allowed` is set when a compression extension was negotiated.
    #[must_use]
    pub fn new(role: Role, config: &Config, rsv1_allowed: bool) -> Self {
        Self {
            role,
            limits: config.limits.clone(),
            accept_unmasked: config.accept_unmasked_frames,
            rsv1_allowed,
            buffer: BytesMut::with_capacity(config.read_buffer_size),
            partial: None,
            utf8: Utf8Validator::new(),
            finished: false,
        }
    }

    /// Append raw bytes read from the socket.
    ///
    /// Bytes arriving after a close frame or an error are dropped.
    pub fn add(&mut self, data: &[u8]) {
        if !self.finished {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Returns `true` once a close frame or an error ended the stream.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes held that do not yet form a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next event from the buffered bytes, if a complete one is
    /// available.
    pub fn next_event(&mut self, extensions: &mut ExtensionSet) -> Option<ReceiverEvent> {
        while !self.finished {
            let step = self
                .read_frame()
                .and_then(|frame| match frame {
                    Some(frame) => self.process(frame, extensions).map(Some),
                    None => Ok(None),
                });

            match step {
                Ok(None) => return None,
                Ok(Some(None)) => continue,
                Ok(Some(Some(event))) => {
                    if matches!(event, ReceiverEvent::Close(_)) {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(err) => {
                    tracing::trace!(error = %err, "inbound frame rejected");
                    self.finished = true;
                    return Some(ReceiverEvent::Error(err));
                }
            }
        }
        None
    }

    /// Release buffered data and stop decoding.
    pub fn cleanup(&mut self) {
        self.finished = true;
        self.buffer = BytesMut::new();
        self.partial = None;
        self.utf8.reset();
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(header) = FrameHeader::parse(&self.buffer)? else {
            return Ok(None);
        };
        self.validate(&header)?;

        // validate() bounds payload_len by max_payload_size
        let len = header.payload_len as usize;
        if self.buffer.len() < header.header_len + len {
            return Ok(None);
        }

        self.buffer.advance(header.header_len);
        let mut payload = self.buffer.split_to(len);
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        trace_frame(&header);
        Ok(Some(Frame {
            fin: header.fin,
            rsv1: header.rsv1,
            opcode: header.opcode,
            payload: payload.freeze(),
        }))
    }

    fn validate(&self, header: &FrameHeader) -> Result<()> {
        match (self.role.expects_masked(), header.mask.is_some()) {
            (true, false) if !self.accept_unmasked => return Err(Error::UnmaskedClientFrame),
            (false, true) => return Err(Error::MaskedServerFrame),
            _ => {}
        }

        if header.rsv2 || header.rsv3 || (header.rsv1 && !self.rsv1_allowed) {
            return Err(Error::ReservedBitsSet);
        }

        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.rsv1 {
                return Err(Error::ReservedBitsSet);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::ControlFrameTooLarge(header.payload_len as usize));
            }
            return Ok(());
        }

        if header.opcode == OpCode::Continuation && header.rsv1 {
            return Err(Error::ReservedBitsSet);
        }

        let buffered = self.partial.as_ref().map_or(0, |p| p.payload.len() as u64);
        let total = buffered.saturating_add(header.payload_len);
        if total > self.limits.max_payload_size as u64 {
            return Err(Error::PayloadTooLarge {
                size: usize::try_from(total).unwrap_or(usize::MAX),
                max: self.limits.max_payload_size,
            });
        }
        Ok(())
    }

    fn process(
        &mut self,
        frame: Frame,
        extensions: &mut ExtensionSet,
    ) -> Result<Option<ReceiverEvent>> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(ReceiverEvent::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(ReceiverEvent::Pong(frame.payload))),
            OpCode::Close => {
                let close = decode_close_payload(&frame.payload)?;
                Ok(Some(ReceiverEvent::Close(close)))
            }
            OpCode::Text | OpCode::Binary => {
                if self.partial.is_some() {
                    return Err(Error::ProtocolViolation(
                        "New data frame while a fragmented message is in progress".into(),
                    ));
                }
                let text = frame.opcode == OpCode::Text;
                if frame.fin {
                    return self
                        .complete(text, frame.rsv1, frame.payload, extensions)
                        .map(|msg| Some(ReceiverEvent::Message(msg)));
                }

                if text && !frame.rsv1 {
                    self.utf8.validate(&frame.payload, false)?;
                }
                self.partial = Some(PartialMessage {
                    text,
                    compressed: frame.rsv1,
                    payload: BytesMut::from(&frame.payload[..]),
                    fragments: 1,
                });
                Ok(None)
            }
            OpCode::Continuation => {
                let Some(partial) = self.partial.as_mut() else {
                    return Err(Error::ProtocolViolation(
                        "Continuation frame without a message to continue".into(),
                    ));
                };

                partial.fragments += 1;
                self.limits.check_fragment_count(partial.fragments)?;
                if partial.text && !partial.compressed {
                    self.utf8.validate(&frame.payload, frame.fin)?;
                }
                partial.payload.extend_from_slice(&frame.payload);

                if !frame.fin {
                    return Ok(None);
                }
                let Some(done) = self.partial.take() else {
                    return Ok(None);
                };
                self.utf8.reset();
                self.complete(done.text, done.compressed, done.payload.freeze(), extensions)
                    .map(|msg| Some(ReceiverEvent::Message(msg)))
            }
        }
    }

    fn complete(
        &mut self,
        text: bool,
        compressed: bool,
        payload: Bytes,
        extensions: &mut ExtensionSet,
    ) -> Result<Message> {
        let opcode = if text { OpCode::Text } else { OpCode::Binary };
        let mut frame = Frame {
            fin: true,
            rsv1: compressed,
            opcode,
            payload,
        };
        if compressed {
            extensions.decode(&mut frame, self.limits.max_payload_size)?;
        }

        if text {
            let text = String::from_utf8(frame.payload.to_vec()).map_err(|_| Error::InvalidUtf8)?;
            Ok(Message::Text(text))
        } else {
            Ok(Message::Binary(frame.payload))
        }
    }
}

fn trace_frame(header: &FrameHeader) {
    tracing::trace!(
        opcode = ?header.opcode,
        fin = header.fin,
        len = header.payload_len,
        "frame received"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CloseCode;
    use proptest::prelude::*;

    const KEY: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn client_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        Frame::new(fin, opcode, payload.to_vec()).encode(&mut buf, Some(KEY));
        buf.to_vec()
    }

    fn receiver() -> FrameReceiver {
        FrameReceiver::new(Role::Server, &Config::default(), false)
    }

    fn drain(rx: &mut FrameReceiver) -> Vec<ReceiverEvent> {
        let mut extensions = ExtensionSet::new();
        std::iter::from_fn(|| rx.next_event(&mut extensions)).collect()
    }

    #[test]
    fn test_single_text_message() {
        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Text, b"hello"));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Message(Message::text("hello"))]
        );
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut rx = receiver();
        let bytes = client_frame(true, OpCode::Binary, &[1, 2, 3, 4, 5]);
        rx.add(&bytes[..4]);
        assert!(drain(&mut rx).is_empty());
        rx.add(&bytes[4..]);
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Message(Message::binary(vec![1, 2, 3, 4, 5]))]
        );
    }

    #[test]
    fn test_fragmented_message_with_interleaved_ping() {
        let mut rx = receiver();
        rx.add(&client_frame(false, OpCode::Text, b"Hel"));
        rx.add(&client_frame(true, OpCode::Ping, b"p"));
        rx.add(&client_frame(true, OpCode::Continuation, b"lo"));
        assert_eq!(
            drain(&mut rx),
            vec![
                ReceiverEvent::Ping(Bytes::from_static(b"p")),
                ReceiverEvent::Message(Message::text("Hello")),
            ]
        );
    }

    #[test]
    fn test_close_frame_ends_stream() {
        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Close, &[0x0F, 0xA1, b'b', b'y', b'e']));
        rx.add(&client_frame(true, OpCode::Text, b"ignored"));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Close(Some(CloseFrame::new(
                CloseCode::Other(4001),
                "bye"
            )))]
        );
        assert!(rx.is_finished());
    }

    #[test]
    fn test_empty_close_frame() {
        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Close, &[]));
        assert_eq!(drain(&mut rx), vec![ReceiverEvent::Close(None)]);
    }

    #[test]
    fn test_unmasked_client_frame_rejected() {
        let mut rx = receiver();
        let mut buf = BytesMut::new();
        Frame::new(true, OpCode::Text, &b"hi"[..]).encode(&mut buf, None);
        rx.add(&buf);
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::UnmaskedClientFrame)]
        );
    }

    #[test]
    fn test_unmasked_accepted_when_configured() {
        let config = Config::default().with_accept_unmasked_frames(true);
        let mut rx = FrameReceiver::new(Role::Server, &config, false);
        let mut buf = BytesMut::new();
        Frame::new(true, OpCode::Text, &b"hi"[..]).encode(&mut buf, None);
        rx.add(&buf);
        assert_eq!(drain(&mut rx), vec![ReceiverEvent::Message(Message::text("hi"))]);
    }

    #[test]
    fn test_client_role_rejects_masked_frames() {
        let mut rx = FrameReceiver::new(Role::Client, &Config::default(), false);
        rx.add(&client_frame(true, OpCode::Text, b"hi"));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::MaskedServerFrame)]
        );
    }

    #[test]
    fn test_rsv1_without_compression_rejected() {
        let mut rx = receiver();
        let mut bytes = client_frame(true, OpCode::Text, b"hi");
        bytes[0] |= 0x40;
        rx.add(&bytes);
        assert_eq!(drain(&mut rx), vec![ReceiverEvent::Error(Error::ReservedBitsSet)]);
    }

    #[test]
    fn test_control_frame_rules() {
        let mut rx = receiver();
        rx.add(&client_frame(false, OpCode::Ping, b"x"));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::FragmentedControlFrame)]
        );

        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Ping, &[0u8; 126]));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::ControlFrameTooLarge(126))]
        );
    }

    #[test]
    fn test_continuation_ordering() {
        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Continuation, b"x"));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ReceiverEvent::Error(Error::ProtocolViolation(_))]
        ));

        let mut rx = receiver();
        rx.add(&client_frame(false, OpCode::Text, b"a"));
        rx.add(&client_frame(true, OpCode::Text, b"b"));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ReceiverEvent::Error(Error::ProtocolViolation(_))]
        ));
    }

    #[test]
    fn test_payload_limit() {
        let config = Config::default().with_max_payload_size(8);
        let mut rx = FrameReceiver::new(Role::Server, &config, false);
        rx.add(&client_frame(false, OpCode::Binary, &[0u8; 5]));
        rx.add(&client_frame(true, OpCode::Continuation, &[0u8; 5]));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::PayloadTooLarge { size: 10, max: 8 })]
        );
    }

    #[test]
    fn test_oversize_rejected_from_header_alone() {
        let config = Config::default().with_max_payload_size(8);
        let mut rx = FrameReceiver::new(Role::Server, &config, false);
        let bytes = client_frame(true, OpCode::Binary, &[0u8; 100]);
        rx.add(&bytes[..8]);
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::PayloadTooLarge { size: 100, max: 8 })]
        );
    }

    #[test]
    fn test_fragment_limit() {
        let config = Config::default().with_limits(Limits::new(1024, 2));
        let mut rx = FrameReceiver::new(Role::Server, &config, false);
        rx.add(&client_frame(false, OpCode::Binary, b"a"));
        rx.add(&client_frame(false, OpCode::Continuation, b"b"));
        rx.add(&client_frame(true, OpCode::Continuation, b"c"));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::TooManyFragments { count: 3, max: 2 })]
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Text, &[0xC3, 0x28]));
        assert_eq!(drain(&mut rx), vec![ReceiverEvent::Error(Error::InvalidUtf8)]);
    }

    #[test]
    fn test_invalid_close_code() {
        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Close, &[0x03, 0xED]));
        assert_eq!(
            drain(&mut rx),
            vec![ReceiverEvent::Error(Error::InvalidCloseCode(1005))]
        );
    }

    #[test]
    fn test_cleanup_drops_buffered_bytes() {
        let mut rx = receiver();
        rx.add(&client_frame(true, OpCode::Text, b"hello")[..3]);
        assert_eq!(rx.buffered(), 3);
        rx.cleanup();
        assert_eq!(rx.buffered(), 0);
        rx.add(b"more");
        assert_eq!(rx.buffered(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_compressed_message_is_inflated() {
        use crate::extensions::deflate::{DeflateConfig, PerMessageDeflate};

        let mut client = PerMessageDeflate::new(Role::Client, DeflateConfig::new().threshold(0));
        let mut frame = Frame::new(true, OpCode::Text, "squeeze me ".repeat(20));
        crate::extensions::Extension::encode(&mut client, &mut frame).unwrap();
        assert!(frame.rsv1);
        let mut bytes = BytesMut::new();
        frame.encode(&mut bytes, Some(KEY));

        let mut extensions = ExtensionSet::new();
        extensions
            .insert(Box::new(PerMessageDeflate::new(
                Role::Server,
                DeflateConfig::default(),
            )))
            .unwrap();
        let mut rx = FrameReceiver::new(Role::Server, &Config::default(), true);
        rx.add(&bytes);
        assert_eq!(
            rx.next_event(&mut extensions),
            Some(ReceiverEvent::Message(Message::text("squeeze me ".repeat(20))))
        );
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_events(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..6),
            split in 1usize..64,
        ) {
            let mut wire = Vec::new();
            for payload in &payloads {
                wire.extend(client_frame(true, OpCode::Binary, payload));
            }

            let mut whole = receiver();
            whole.add(&wire);
            let expected = drain(&mut whole);

            let mut chunked = receiver();
            let mut events = Vec::new();
            for chunk in wire.chunks(split) {
                chunked.add(chunk);
                events.extend(drain(&mut chunked));
            }

            prop_assert_eq!(events, expected);
        }
    }
}
