//! Codec errors shared by every packet type in this crate

use thiserror::Error;

/// Errors raised while serialising a packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Tag {tag_type:#06x} value too long: {len} bytes")]
    ValueTooLong { tag_type: u16, len: usize },

    #[error("Payload too long: {0} bytes")]
    PayloadTooLong(usize),

    #[error("Discovery packet (code {0:#04x}) cannot carry a payload")]
    PayloadOnDiscovery(u8),

    #[error("Session packet cannot carry tags")]
    TagsOnSession,
}

/// Errors raised while parsing a packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Packet too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("Truncated tag at offset {offset}")]
    TruncatedTag { offset: usize },

    #[error("Declared length {declared} exceeds available {available} bytes")]
    LengthMismatch { declared: usize, available: usize },

    #[error("Unknown PPPoE code: {0:#04x}")]
    UnknownCode(u8),

    #[error("Unsupported PPPoE version/type: {0:#04x}")]
    BadVersionType(u8),
}

pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.len() < needed {
        return Err(DecodeError::TooShort {
            needed,
            actual: buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn length_u16(len: usize) -> Result<u16, EncodeError> {
    u16::try_from(len).map_err(|_| EncodeError::PayloadTooLong(len))
}
