//! PPPoE discovery (RFC 2516)
//!
//! [`Pppoe`] dials an access concentrator over any [`EtherConn`] and then
//! serves as a [`PacketConn`](ppplink_transport::PacketConn) for the PPP
//! layer.

pub mod client;
pub mod config;
pub mod state;

pub use client::{DialError, Pppoe};
pub use config::{PppoeConfig, PppoeConfigBuilder};
pub use state::{AtomicSessionState, SessionState};

pub use ppplink_transport::EtherConn;
