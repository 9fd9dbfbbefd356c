//! Transport abstractions for the PPPoE/PPP stack
//!
//! Two seams live here:
//! - [`EtherConn`]: the raw Ethernet link the PPPoE discovery engine runs on.
//! - [`PacketConn`]: a datagram-style connection. The PPPoE engine exposes one
//!   once its session is open, and the PPP multiplexer consumes any
//!   implementation of it.
//!
//! Both traits take `&self` so a single connection can be read and written
//! from different tasks at once.

use async_trait::async_trait;
use bytes::Bytes;
use ppplink_proto::{EncodeError, MacAddr};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

pub mod deadline;
pub mod memory;

#[cfg(test)]
mod tests;

pub use deadline::Deadline;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Timeout")]
    Timeout,

    #[error("Connection is not open")]
    NotOpen,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

impl TransportError {
    /// Deadline expiry; recoverable, unlike every other variant
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A frame received from the Ethernet link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtherFrame {
    pub src: MacAddr,
    pub ethertype: u16,
    pub payload: Bytes,
}

/// Raw Ethernet link: send by destination MAC + ethertype, receive with the
/// sender's MAC. Deadline expiry must surface as [`TransportError::Timeout`].
#[async_trait]
pub trait EtherConn: Send + Sync {
    /// Send `payload` to `dst` tagged with `ethertype`
    async fn send_to(&self, payload: &[u8], ethertype: u16, dst: MacAddr)
        -> TransportResult<usize>;

    /// Receive the next frame addressed to this link
    async fn recv_from(&self) -> TransportResult<EtherFrame>;

    /// Hardware address of this link
    fn local_addr(&self) -> MacAddr;

    fn set_read_deadline(&self, deadline: Option<Instant>) -> TransportResult<()>;

    fn set_write_deadline(&self, deadline: Option<Instant>) -> TransportResult<()>;
}

#[async_trait]
impl<T: EtherConn + ?Sized> EtherConn for Arc<T> {
    async fn send_to(
        &self,
        payload: &[u8],
        ethertype: u16,
        dst: MacAddr,
    ) -> TransportResult<usize> {
        (**self).send_to(payload, ethertype, dst).await
    }

    async fn recv_from(&self) -> TransportResult<EtherFrame> {
        (**self).recv_from().await
    }

    fn local_addr(&self) -> MacAddr {
        (**self).local_addr()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        (**self).set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        (**self).set_write_deadline(deadline)
    }
}

/// Datagram connection used by upper-layer packet senders and receivers
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Address type reported for received packets
    type Addr: Clone + fmt::Debug + Send + Sync + 'static;

    /// Send one packet. `addr` is a hint; connected transports may ignore it.
    async fn write_to(&self, buf: &[u8], addr: Option<&Self::Addr>) -> TransportResult<usize>;

    /// Receive one packet into `buf`, returning its length and sender
    async fn read_from(&self, buf: &mut [u8]) -> TransportResult<(usize, Self::Addr)>;

    async fn close(&self) -> TransportResult<()>;

    fn set_read_deadline(&self, deadline: Option<Instant>) -> TransportResult<()>;

    fn set_write_deadline(&self, deadline: Option<Instant>) -> TransportResult<()>;

    /// Set both deadlines. A rejected write deadline is ignored.
    fn set_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        self.set_read_deadline(deadline)?;
        let _ = self.set_write_deadline(deadline);
        Ok(())
    }
}
