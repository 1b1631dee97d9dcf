//! WebSocket protocol core (RFC 6455): frames, opcodes, masking and UTF-8.

pub mod frame;
pub mod mask;
pub mod opcode;
pub mod utf8;

pub use frame::{
    Frame, FrameHeader, MAX_CLOSE_REASON, MAX_CONTROL_FRAME_PAYLOAD, decode_close_payload,
};
pub use mask::{MaskKeys, apply_mask};
pub use opcode::OpCode;
pub use utf8::Utf8Validator;
