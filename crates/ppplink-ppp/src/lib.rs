//! PPP protocol multiplexer
//!
//! Runs any number of upper-layer protocols (LCP, IPCP, IPv4, ...) over a
//! single [`PacketConn`](ppplink_transport::PacketConn). Each protocol gets
//! its own bounded receive channel; all of them share one send channel.

pub mod config;
pub mod mux;
pub mod registry;

pub use config::{PppConfig, PppConfigBuilder};
pub use mux::Ppp;
pub use registry::{Delivery, Registry};

pub use ppplink_proto::{PppFrame, ProtocolNumber};
