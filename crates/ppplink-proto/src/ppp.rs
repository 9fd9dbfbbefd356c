//! PPP frames: 2-byte protocol number followed by the payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{ensure_len, DecodeError};

/// PPP protocol number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolNumber(pub u16);

impl ProtocolNumber {
    pub const IPV4: ProtocolNumber = ProtocolNumber(0x0021);
    pub const IPV6: ProtocolNumber = ProtocolNumber(0x0057);
    pub const IPCP: ProtocolNumber = ProtocolNumber(0x8021);
    pub const IPV6CP: ProtocolNumber = ProtocolNumber(0x8057);
    pub const LCP: ProtocolNumber = ProtocolNumber(0xc021);
    pub const PAP: ProtocolNumber = ProtocolNumber(0xc023);
    pub const CHAP: ProtocolNumber = ProtocolNumber(0xc223);

    /// Protocols this stack understands; anything else gets a Protocol-Reject
    pub fn is_well_known(&self) -> bool {
        matches!(
            *self,
            ProtocolNumber::LCP
                | ProtocolNumber::PAP
                | ProtocolNumber::CHAP
                | ProtocolNumber::IPCP
                | ProtocolNumber::IPV6CP
                | ProtocolNumber::IPV4
                | ProtocolNumber::IPV6
        )
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl From<u16> for ProtocolNumber {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for ProtocolNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolNumber::IPV4 => write!(f, "IPv4"),
            ProtocolNumber::IPV6 => write!(f, "IPv6"),
            ProtocolNumber::IPCP => write!(f, "IPCP"),
            ProtocolNumber::IPV6CP => write!(f, "IPv6CP"),
            ProtocolNumber::LCP => write!(f, "LCP"),
            ProtocolNumber::PAP => write!(f, "PAP"),
            ProtocolNumber::CHAP => write!(f, "CHAP"),
            ProtocolNumber(other) => write!(f, "{:#06x}", other),
        }
    }
}

/// A PPP frame. There is no length field and no trailer; the frame boundary
/// comes from the underlying transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PppFrame {
    pub protocol: ProtocolNumber,
    pub payload: Bytes,
}

impl PppFrame {
    /// Protocol number size
    pub const HEADER_SIZE: usize = 2;

    pub fn new(protocol: ProtocolNumber, payload: impl Into<Bytes>) -> Self {
        Self {
            protocol,
            payload: payload.into(),
        }
    }

    /// Serialize to wire format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());
        buf.put_u16(self.protocol.0);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Parse from wire format. The payload shares the input buffer.
    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        ensure_len(&buf, Self::HEADER_SIZE)?;
        let protocol = ProtocolNumber(buf.get_u16());
        Ok(Self {
            protocol,
            payload: buf,
        })
    }

    /// Protocol number of a raw frame without parsing the rest
    pub fn peek_protocol(buf: &[u8]) -> Option<ProtocolNumber> {
        match buf {
            [hi, lo, ..] => Some(ProtocolNumber(u16::from_be_bytes([*hi, *lo]))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_decode() {
        let frame = PppFrame::new(ProtocolNumber::IPCP, Bytes::from_static(b"\x01\x02\x00\x04"));

        let encoded = frame.encode();
        assert_eq!(&encoded[..2], &[0x80, 0x21]);

        let decoded = PppFrame::decode(encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_two_byte_frame_has_empty_payload() {
        let decoded = PppFrame::decode(Bytes::from_static(&[0x00, 0x21])).unwrap();
        assert_eq!(decoded.protocol, ProtocolNumber::IPV4);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            PppFrame::decode(Bytes::from_static(&[0xc0])).unwrap_err(),
            DecodeError::TooShort {
                needed: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_well_known_protocols() {
        assert!(ProtocolNumber::LCP.is_well_known());
        assert!(ProtocolNumber::IPV6.is_well_known());
        assert!(!ProtocolNumber(0x00ff).is_well_known());
        assert!(!ProtocolNumber(0x8281).is_well_known());
    }

    #[test]
    fn test_peek_protocol() {
        assert_eq!(
            PppFrame::peek_protocol(&[0xc0, 0x21, 0x01]),
            Some(ProtocolNumber::LCP)
        );
        assert_eq!(PppFrame::peek_protocol(&[0xc0]), None);
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(ProtocolNumber::IPV6CP.to_string(), "IPv6CP");
        assert_eq!(ProtocolNumber(0x00ff).to_string(), "0x00ff");
    }
}
