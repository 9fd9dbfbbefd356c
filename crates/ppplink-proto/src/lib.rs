//! PPPoE / PPP wire definitions
//!
//! This crate defines the packet codecs shared by the discovery engine and the
//! PPP multiplexer: PPPoE discovery/session packets with their TLV tags, PPP
//! frames keyed by protocol number, the LCP packet layout used for
//! Protocol-Reject, and the endpoint types that address a PPPoE peer.

pub mod codec;
pub mod endpoint;
pub mod lcp;
pub mod ppp;
pub mod pppoe;

pub use codec::{DecodeError, EncodeError};
pub use endpoint::{Endpoint, MacAddr};
pub use lcp::{LcpCode, LcpPacket};
pub use ppp::{PppFrame, ProtocolNumber};
pub use pppoe::{Code, DiscoveryPacket, Tag, TagType};

/// Ethertype carried by PPPoE discovery frames (PADI/PADO/PADR/PADS/PADT)
pub const ETHERTYPE_PPPOE_DISCOVERY: u16 = 0x8863;

/// Ethertype carried by PPPoE session frames
pub const ETHERTYPE_PPPOE_SESSION: u16 = 0x8864;

/// Largest PPP frame the multiplexer reads from a PPPoE session
pub const MAX_PPP_FRAME_SIZE: usize = 1500;
