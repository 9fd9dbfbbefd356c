//! PPPoE client with PPP protocol multiplexing
//!
//! ```text
//!   LCP / IPCP / IPv4 ...   (register with Ppp, exchange PppFrames)
//!          Ppp              (ppplink-ppp)
//!         Pppoe             (ppplink-pppoe, a PacketConn once open)
//!       EtherConn           (raw Ethernet, supplied by the application)
//! ```
//!
//! [`Session::establish`] dials the access concentrator and starts the
//! multiplexer on top of the open session.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use ppplink_ppp::{Ppp, PppConfig, PppConfigBuilder};
pub use ppplink_pppoe::{DialError, Pppoe, PppoeConfig, PppoeConfigBuilder, SessionState};
pub use ppplink_proto::{
    Code, DecodeError, DiscoveryPacket, EncodeError, Endpoint, LcpCode, LcpPacket, MacAddr,
    PppFrame, ProtocolNumber, Tag, TagType,
};
pub use ppplink_transport::{
    EtherConn, EtherFrame, PacketConn, TransportError, TransportResult,
};

pub mod proto {
    pub use ppplink_proto::*;
}

pub mod transport {
    pub use ppplink_transport::*;
}

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Dial failed: {0}")]
    Dial(#[from] DialError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration for both layers of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pppoe: PppoeConfig,
    pub ppp: PppConfig,
}

/// An open PPPoE session with a running PPP multiplexer
pub struct Session<C: EtherConn + 'static> {
    pppoe: Arc<Pppoe<C>>,
    ppp: Ppp<Pppoe<C>>,
}

impl<C: EtherConn + 'static> Session<C> {
    /// Dial over `conn`, then start the multiplexer. Cancelling `cancel`
    /// aborts the dial or, later, stops the multiplexer.
    pub async fn establish(
        conn: C,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        let pppoe = Arc::new(Pppoe::new(conn, config.pppoe));
        pppoe.dial(&cancel).await?;

        let ppp = Ppp::with_config(pppoe.clone(), cancel, config.ppp);
        info!(
            "Session {} established",
            pppoe.remote_addr().unwrap_or_else(|| pppoe.local_addr())
        );
        Ok(Self { pppoe, ppp })
    }

    pub fn ppp(&self) -> &Ppp<Pppoe<C>> {
        &self.ppp
    }

    pub fn pppoe(&self) -> &Pppoe<C> {
        &self.pppoe
    }

    pub fn session_id(&self) -> u16 {
        self.pppoe.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.pppoe.state()
    }

    /// Stop the multiplexer and send PADT
    pub async fn close(self) -> Result<(), SessionError> {
        self.ppp.shutdown();
        // The send loop leaves its last write deadline behind
        self.pppoe.set_write_deadline(None)?;
        self.pppoe.close().await?;
        info!("Session {} closed", self.pppoe.local_addr());
        Ok(())
    }
}
