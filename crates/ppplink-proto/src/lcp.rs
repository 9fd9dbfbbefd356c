//! LCP packet layout (RFC 1661 section 5)
//!
//! Only the outer packet format lives here; option negotiation belongs to the
//! control protocol implementations that register with the multiplexer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{ensure_len, length_u16, DecodeError, EncodeError};

/// LCP packet codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LcpCode {
    ConfigureRequest = 1,
    ConfigureAck = 2,
    ConfigureNak = 3,
    ConfigureReject = 4,
    TerminateRequest = 5,
    TerminateAck = 6,
    CodeReject = 7,
    ProtocolReject = 8,
    EchoRequest = 9,
    EchoReply = 10,
    DiscardRequest = 11,
}

impl TryFrom<u8> for LcpCode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(LcpCode::ConfigureRequest),
            2 => Ok(LcpCode::ConfigureAck),
            3 => Ok(LcpCode::ConfigureNak),
            4 => Ok(LcpCode::ConfigureReject),
            5 => Ok(LcpCode::TerminateRequest),
            6 => Ok(LcpCode::TerminateAck),
            7 => Ok(LcpCode::CodeReject),
            8 => Ok(LcpCode::ProtocolReject),
            9 => Ok(LcpCode::EchoRequest),
            10 => Ok(LcpCode::EchoReply),
            11 => Ok(LcpCode::DiscardRequest),
            _ => Err(DecodeError::UnknownCode(value)),
        }
    }
}

/// LCP packet: code (1) + identifier (1) + length (2) + data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcpPacket {
    pub code: LcpCode,
    pub identifier: u8,
    pub data: Bytes,
}

impl LcpPacket {
    pub const HEADER_SIZE: usize = 4;

    pub fn new(code: LcpCode, identifier: u8, data: impl Into<Bytes>) -> Self {
        Self {
            code,
            identifier,
            data: data.into(),
        }
    }

    /// Protocol-Reject carrying the rejected protocol number and the offending frame
    pub fn protocol_reject(identifier: u8, rejected: u16, frame: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(2 + frame.len());
        data.put_u16(rejected);
        data.extend_from_slice(frame);
        Self::new(LcpCode::ProtocolReject, identifier, data.freeze())
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let length = length_u16(Self::HEADER_SIZE + self.data.len())?;
        let mut buf = BytesMut::with_capacity(length as usize);
        buf.put_u8(self.code as u8);
        buf.put_u8(self.identifier);
        buf.put_u16(length);
        buf.put(self.data.clone());
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        ensure_len(&buf, Self::HEADER_SIZE)?;
        let code = LcpCode::try_from(buf.get_u8())?;
        let identifier = buf.get_u8();
        let length = buf.get_u16() as usize;
        let data_len = length.saturating_sub(Self::HEADER_SIZE);
        if buf.remaining() < data_len {
            return Err(DecodeError::LengthMismatch {
                declared: length,
                available: buf.remaining() + Self::HEADER_SIZE,
            });
        }
        Ok(Self {
            code,
            identifier,
            data: buf.split_to(data_len),
        })
    }
}
