//! PPPoE discovery and session packets (RFC 2516)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{ensure_len, length_u16, DecodeError, EncodeError};

/// PPPoE packet codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// Session data, carries a PPP frame
    Session = 0x00,
    /// Active Discovery Offer
    Pado = 0x07,
    /// Active Discovery Initiation
    Padi = 0x09,
    /// Active Discovery Request
    Padr = 0x19,
    /// Active Discovery Session-confirmation
    Pads = 0x65,
    /// Active Discovery Terminate
    Padt = 0xa7,
}

impl TryFrom<u8> for Code {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Code::Session),
            0x07 => Ok(Code::Pado),
            0x09 => Ok(Code::Padi),
            0x19 => Ok(Code::Padr),
            0x65 => Ok(Code::Pads),
            0xa7 => Ok(Code::Padt),
            _ => Err(DecodeError::UnknownCode(value)),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Session => write!(f, "Session"),
            Code::Pado => write!(f, "PADO"),
            Code::Padi => write!(f, "PADI"),
            Code::Padr => write!(f, "PADR"),
            Code::Pads => write!(f, "PADS"),
            Code::Padt => write!(f, "PADT"),
        }
    }
}

/// PPPoE tag type. Unknown values are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagType(pub u16);

impl TagType {
    pub const END_OF_LIST: TagType = TagType(0x0000);
    pub const SERVICE_NAME: TagType = TagType(0x0101);
    pub const AC_NAME: TagType = TagType(0x0102);
    pub const HOST_UNIQ: TagType = TagType(0x0103);
    pub const AC_COOKIE: TagType = TagType(0x0104);
    pub const VENDOR_SPECIFIC: TagType = TagType(0x0105);
    pub const RELAY_SESSION_ID: TagType = TagType(0x0110);
    pub const SERVICE_NAME_ERROR: TagType = TagType(0x0201);
    pub const AC_SYSTEM_ERROR: TagType = TagType(0x0202);
    pub const GENERIC_ERROR: TagType = TagType(0x0203);

    /// Whether the AC uses this tag to report a failure
    pub fn is_error(&self) -> bool {
        matches!(
            *self,
            TagType::SERVICE_NAME_ERROR | TagType::AC_SYSTEM_ERROR | TagType::GENERIC_ERROR
        )
    }

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            TagType::END_OF_LIST => "End-Of-List",
            TagType::SERVICE_NAME => "Service-Name",
            TagType::AC_NAME => "AC-Name",
            TagType::HOST_UNIQ => "Host-Uniq",
            TagType::AC_COOKIE => "AC-Cookie",
            TagType::VENDOR_SPECIFIC => "Vendor-Specific",
            TagType::RELAY_SESSION_ID => "Relay-Session-Id",
            TagType::SERVICE_NAME_ERROR => "Service-Name-Error",
            TagType::AC_SYSTEM_ERROR => "AC-System-Error",
            TagType::GENERIC_ERROR => "Generic-Error",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "Unknown({:#06x})", self.0),
        }
    }
}

/// A single TLV element of a discovery packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_type: TagType,
    pub value: Bytes,
}

impl Tag {
    /// Tag header size: type (2) + length (2)
    pub const HEADER_SIZE: usize = 4;

    pub fn new(tag_type: TagType, value: impl Into<Bytes>) -> Self {
        Self {
            tag_type,
            value: value.into(),
        }
    }

    pub fn service_name(name: &str) -> Self {
        Self::new(TagType::SERVICE_NAME, Bytes::copy_from_slice(name.as_bytes()))
    }

    pub fn ac_name(name: &str) -> Self {
        Self::new(TagType::AC_NAME, Bytes::copy_from_slice(name.as_bytes()))
    }

    pub fn host_uniq(value: impl Into<Bytes>) -> Self {
        Self::new(TagType::HOST_UNIQ, value)
    }

    pub fn ac_cookie(value: impl Into<Bytes>) -> Self {
        Self::new(TagType::AC_COOKIE, value)
    }

    pub fn relay_session_id(value: impl Into<Bytes>) -> Self {
        Self::new(TagType::RELAY_SESSION_ID, value)
    }

    /// Value as UTF-8, for the string-valued tags (Service-Name, AC-Name, errors)
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Encoded size of this tag
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.value.len()
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let len = u16::try_from(self.value.len()).map_err(|_| EncodeError::ValueTooLong {
            tag_type: self.tag_type.0,
            len: self.value.len(),
        })?;
        buf.put_u16(self.tag_type.0);
        buf.put_u16(len);
        buf.put(self.value.clone());
        Ok(())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag_type {
            TagType::SERVICE_NAME
            | TagType::AC_NAME
            | TagType::SERVICE_NAME_ERROR
            | TagType::AC_SYSTEM_ERROR
            | TagType::GENERIC_ERROR => match self.as_str() {
                Some(s) => write!(f, "{}: {:?}", self.tag_type, s),
                None => write!(f, "{}: {:02x?}", self.tag_type, &self.value[..]),
            },
            _ => write!(f, "{}: {:02x?}", self.tag_type, &self.value[..]),
        }
    }
}

/// PPPoE packet: discovery packets carry tags, session packets carry a PPP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub code: Code,
    pub session_id: u16,
    pub tags: Vec<Tag>,
    pub payload: Bytes,
}

impl DiscoveryPacket {
    /// Header size: ver/type (1) + code (1) + session_id (2) + length (2) = 6 bytes
    pub const HEADER_SIZE: usize = 6;

    /// VER = 1, TYPE = 1
    pub const VERSION_TYPE: u8 = 0x11;

    pub fn new(code: Code, session_id: u16) -> Self {
        Self {
            code,
            session_id,
            tags: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Session-stage packet wrapping a PPP frame
    pub fn session(session_id: u16, payload: Bytes) -> Self {
        Self {
            code: Code::Session,
            session_id,
            tags: Vec::new(),
            payload,
        }
    }

    pub fn padt(session_id: u16) -> Self {
        Self::new(Code::Padt, session_id)
    }

    /// All tags of the given type, in packet order
    pub fn tags_of(&self, tag_type: TagType) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(move |t| t.tag_type == tag_type)
    }

    /// First tag of the given type
    pub fn tag(&self, tag_type: TagType) -> Option<&Tag> {
        self.tags_of(tag_type).next()
    }

    /// Text of the first error tag, if the AC attached one
    pub fn error_message(&self) -> Option<String> {
        self.tags.iter().find(|t| t.tag_type.is_error()).map(|t| {
            let text = t.as_str().unwrap_or_default();
            if text.is_empty() {
                t.tag_type.to_string()
            } else {
                format!("{}: {}", t.tag_type, text)
            }
        })
    }

    /// Serialize to wire format. Session packets carry only a payload and
    /// discovery packets only tags.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        if self.code == Code::Session {
            if !self.tags.is_empty() {
                return Err(EncodeError::TagsOnSession);
            }
        } else if !self.payload.is_empty() {
            return Err(EncodeError::PayloadOnDiscovery(self.code as u8));
        }
        let body_len: usize = self.tags.iter().map(Tag::encoded_len).sum::<usize>() + self.payload.len();
        let length = length_u16(body_len)?;

        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + body_len);
        buf.put_u8(Self::VERSION_TYPE);
        buf.put_u8(self.code as u8);
        buf.put_u16(self.session_id);
        buf.put_u16(length);
        for tag in &self.tags {
            tag.encode_into(&mut buf)?;
        }
        buf.put(self.payload.clone());

        Ok(buf.freeze())
    }

    /// Parse from wire format. Bytes past the declared length (Ethernet
    /// padding) are ignored.
    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        ensure_len(&buf, Self::HEADER_SIZE)?;

        let version_type = buf.get_u8();
        if version_type != Self::VERSION_TYPE {
            return Err(DecodeError::BadVersionType(version_type));
        }
        let code = Code::try_from(buf.get_u8())?;
        let session_id = buf.get_u16();
        let length = buf.get_u16() as usize;

        if buf.remaining() < length {
            return Err(DecodeError::LengthMismatch {
                declared: length,
                available: buf.remaining(),
            });
        }
        let mut body = buf.split_to(length);

        if code == Code::Session {
            return Ok(Self::session(session_id, body));
        }

        let mut tags = Vec::new();
        let mut offset = Self::HEADER_SIZE;
        while body.has_remaining() {
            if body.remaining() < Tag::HEADER_SIZE {
                return Err(DecodeError::TruncatedTag { offset });
            }
            let tag_type = TagType(body.get_u16());
            let len = body.get_u16() as usize;
            if body.remaining() < len {
                return Err(DecodeError::TruncatedTag { offset });
            }
            tags.push(Tag::new(tag_type, body.split_to(len)));
            offset += Tag::HEADER_SIZE + len;
        }

        Ok(Self {
            code,
            session_id,
            tags,
            payload: Bytes::new(),
        })
    }
}

impl fmt::Display for DiscoveryPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} session_id={:#06x}", self.code, self.session_id)?;
        for tag in &self.tags {
            write!(f, "\n  {}", tag)?;
        }
        if !self.payload.is_empty() {
            write!(f, "\n  payload: {} bytes", self.payload.len())?;
        }
        Ok(())
    }
}
