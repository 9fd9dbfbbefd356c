//! PPPoE discovery engine
//!
//! [`Pppoe`] runs the PADI/PADO/PADR/PADS handshake over an [`EtherConn`]
//! and, once the session is open, acts as a [`PacketConn`] that carries PPP
//! frames inside session-stage packets.

use async_trait::async_trait;
use bytes::Bytes;
use ppplink_proto::{
    Code, DiscoveryPacket, EncodeError, Endpoint, MacAddr, Tag, TagType,
    ETHERTYPE_PPPOE_DISCOVERY, ETHERTYPE_PPPOE_SESSION,
};
use ppplink_transport::{EtherConn, PacketConn, TransportError, TransportResult};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PppoeConfig;
use crate::state::{AtomicSessionState, SessionState};

/// Dial errors
#[derive(Debug, Error)]
pub enum DialError {
    #[error("Access concentrator rejected the session: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Rejected { reason: Option<String> },

    #[error("No {expected} received after {attempts} attempt(s)")]
    Timeout { expected: Code, attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Cannot dial in state {0}")]
    InvalidState(SessionState),

    #[error("Dial cancelled")]
    Cancelled,
}

/// PPPoE client session over an Ethernet link
pub struct Pppoe<C> {
    conn: C,
    config: PppoeConfig,
    state: AtomicSessionState,
    session_id: AtomicU16,
    ac: OnceLock<MacAddr>,
}

impl<C: EtherConn> Pppoe<C> {
    pub fn new(conn: C, config: PppoeConfig) -> Self {
        Self {
            conn,
            config,
            state: AtomicSessionState::new(),
            session_id: AtomicU16::new(0),
            ac: OnceLock::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// Session id assigned by the AC, 0 until the session is open
    pub fn session_id(&self) -> u16 {
        self.session_id.load(Ordering::Acquire)
    }

    /// Address of the AC that answered our PADI
    pub fn ac_addr(&self) -> Option<MacAddr> {
        self.ac.get().copied()
    }

    /// Our end of the session
    pub fn local_addr(&self) -> Endpoint {
        Endpoint::new(self.conn.local_addr(), self.session_id())
    }

    /// The AC's end of the session, once discovered
    pub fn remote_addr(&self) -> Option<Endpoint> {
        self.ac_addr()
            .map(|mac| Endpoint::new(mac, self.session_id()))
    }

    pub fn config(&self) -> &PppoeConfig {
        &self.config
    }

    /// Run discovery. Only valid once, from [`SessionState::Initial`].
    ///
    /// Dialing drives the read deadline of the underlying connection and
    /// leaves it cleared on return, replacing any deadline set beforehand.
    pub async fn dial(&self, cancel: &CancellationToken) -> Result<(), DialError> {
        self.state
            .transition(SessionState::Initial, SessionState::Dialing)
            .map_err(DialError::InvalidState)?;

        match self.discover(cancel).await {
            Ok(session_id) => {
                self.session_id.store(session_id, Ordering::Release);
                self.state
                    .transition(SessionState::Dialing, SessionState::Open)
                    .map_err(DialError::InvalidState)?;
                info!(
                    session_id,
                    "PPPoE session open with {}",
                    self.ac_addr().unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                let _ = self
                    .state
                    .transition(SessionState::Dialing, SessionState::Closed);
                warn!("PPPoE dial failed: {}", e);
                Err(e)
            }
        }
    }

    async fn discover(&self, cancel: &CancellationToken) -> Result<u16, DialError> {
        let padi = self.build_padi();
        let (pado, ac) = self
            .exchange(&padi, Code::Pado, MacAddr::BROADCAST, None, cancel)
            .await?;
        let _ = self.ac.set(ac);

        let padr = self.build_padr(&pado);
        let (pads, _) = self
            .exchange(&padr, Code::Pads, ac, Some(ac), cancel)
            .await?;

        if pads.session_id == 0 {
            return Err(DialError::Rejected {
                reason: pads.error_message(),
            });
        }
        Ok(pads.session_id)
    }

    fn build_padi(&self) -> DiscoveryPacket {
        DiscoveryPacket::new(Code::Padi, 0).with_tags(self.request_tags().collect())
    }

    /// PADR echoes the AC-Cookie and Relay-Session-Id tags of the PADO
    fn build_padr(&self, pado: &DiscoveryPacket) -> DiscoveryPacket {
        let tags = self
            .request_tags()
            .chain(pado.tags_of(TagType::AC_COOKIE).cloned())
            .chain(pado.tags_of(TagType::RELAY_SESSION_ID).cloned())
            .collect();
        DiscoveryPacket::new(Code::Padr, 0).with_tags(tags)
    }

    fn request_tags(&self) -> impl Iterator<Item = Tag> + '_ {
        std::iter::once(Tag::service_name(&self.config.service_name))
            .chain(self.config.extra_tags().cloned())
    }

    /// Send `request` up to `retry` times, waiting `timeout` each time for a
    /// packet with code `expect` (from `from`, if given)
    async fn exchange(
        &self,
        request: &DiscoveryPacket,
        expect: Code,
        dst: MacAddr,
        from: Option<MacAddr>,
        cancel: &CancellationToken,
    ) -> Result<(DiscoveryPacket, MacAddr), DialError> {
        let bytes = request.encode()?;

        for attempt in 1..=self.config.retry {
            if cancel.is_cancelled() {
                return Err(DialError::Cancelled);
            }
            self.conn
                .send_to(&bytes, ETHERTYPE_PPPOE_DISCOVERY, dst)
                .await?;
            info!(attempt, "Sent {} to {}", request.code, dst);
            debug!("{}", request);

            self.conn
                .set_read_deadline(Some(Instant::now() + self.config.timeout))?;
            let received = tokio::select! {
                _ = cancel.cancelled() => Err(DialError::Cancelled),
                result = self.await_response(expect, from) => result,
            };

            match received {
                Ok(Some((packet, src))) => {
                    self.conn.set_read_deadline(None)?;
                    info!("Got {} from {}", packet.code, src);
                    debug!("{}", packet);
                    return Ok((packet, src));
                }
                Ok(None) => debug!(attempt, "No {} before timeout", expect),
                Err(e) => {
                    let _ = self.conn.set_read_deadline(None);
                    return Err(e);
                }
            }
        }

        self.conn.set_read_deadline(None)?;
        Err(DialError::Timeout {
            expected: expect,
            attempts: self.config.retry,
        })
    }

    /// Read until a matching packet arrives. `Ok(None)` means the read
    /// deadline passed.
    async fn await_response(
        &self,
        expect: Code,
        from: Option<MacAddr>,
    ) -> Result<Option<(DiscoveryPacket, MacAddr)>, DialError> {
        loop {
            let frame = match self.conn.recv_from().await {
                Ok(frame) => frame,
                Err(e) if e.is_timeout() => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if frame.ethertype != ETHERTYPE_PPPOE_DISCOVERY {
                continue;
            }
            if from.is_some_and(|ac| ac != frame.src) {
                debug!("Ignoring discovery packet from {}", frame.src);
                continue;
            }

            let packet = match DiscoveryPacket::decode(frame.payload) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Discarding malformed packet from {}: {}", frame.src, e);
                    continue;
                }
            };
            if packet.code != expect {
                debug!("Expected {}, got {}; discarding", expect, packet.code);
                continue;
            }
            return Ok(Some((packet, frame.src)));
        }
    }

    /// Session id and AC address, if the session is open
    fn open_session(&self) -> TransportResult<(u16, MacAddr)> {
        if self.state.load() != SessionState::Open {
            return Err(TransportError::NotOpen);
        }
        let ac = self.ac_addr().ok_or(TransportError::NotOpen)?;
        Ok((self.session_id(), ac))
    }
}

#[async_trait]
impl<C: EtherConn> PacketConn for Pppoe<C> {
    type Addr = Endpoint;

    /// Wrap `buf` in a session packet for the AC. The address is ignored.
    async fn write_to(&self, buf: &[u8], _addr: Option<&Endpoint>) -> TransportResult<usize> {
        let (session_id, ac) = self.open_session()?;
        let packet = DiscoveryPacket::session(session_id, Bytes::copy_from_slice(buf));
        self.conn
            .send_to(&packet.encode()?, ETHERTYPE_PPPOE_SESSION, ac)
            .await?;
        Ok(buf.len())
    }

    async fn read_from(&self, buf: &mut [u8]) -> TransportResult<(usize, Endpoint)> {
        let (session_id, ac) = self.open_session()?;

        loop {
            let frame = self.conn.recv_from().await?;
            let raw = &frame.payload;
            if raw.len() < DiscoveryPacket::HEADER_SIZE || frame.src != ac {
                continue;
            }
            let code = raw[1];
            if u16::from_be_bytes([raw[2], raw[3]]) != session_id {
                continue;
            }

            if frame.ethertype == ETHERTYPE_PPPOE_DISCOVERY && code == Code::Padt as u8 {
                if self
                    .state
                    .transition(SessionState::Open, SessionState::Closed)
                    .is_ok()
                {
                    warn!(
                        session_id,
                        "Session terminated by access concentrator"
                    );
                }
                return Err(TransportError::ConnectionClosed);
            }
            if frame.ethertype != ETHERTYPE_PPPOE_SESSION || code != Code::Session as u8 {
                continue;
            }

            let packet = match DiscoveryPacket::decode(frame.payload) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Discarding malformed session packet: {}", e);
                    continue;
                }
            };
            let n = packet.payload.len().min(buf.len());
            buf[..n].copy_from_slice(&packet.payload[..n]);
            return Ok((n, Endpoint::new(ac, session_id)));
        }
    }

    /// Send PADT if the session is open. A no-op otherwise.
    async fn close(&self) -> TransportResult<()> {
        let Ok((session_id, ac)) = self.open_session() else {
            return Ok(());
        };
        if self
            .state
            .transition(SessionState::Open, SessionState::Closed)
            .is_err()
        {
            return Ok(());
        }

        let padt = DiscoveryPacket::padt(session_id);
        self.conn
            .send_to(&padt.encode()?, ETHERTYPE_PPPOE_DISCOVERY, ac)
            .await?;
        info!(
            session_id,
            "Sent PADT to {}", ac
        );
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        self.conn.set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        self.conn.set_write_deadline(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppplink_transport::memory::Segment;

    fn engine(config: PppoeConfig) -> Pppoe<ppplink_transport::memory::MemoryEtherConn> {
        let segment = Segment::new();
        Pppoe::new(segment.attach(MacAddr::new(2, 0, 0, 0, 0, 2)), config)
    }

    #[test]
    fn test_padi_has_single_service_name() {
        let config = PppoeConfig {
            service_name: "isp".to_string(),
            tags: vec![Tag::service_name("other"), Tag::host_uniq(&b"hu"[..])],
            ..Default::default()
        };
        let padi = engine(config).build_padi();

        assert_eq!(padi.code, Code::Padi);
        assert_eq!(padi.session_id, 0);
        assert_eq!(padi.tags_of(TagType::SERVICE_NAME).count(), 1);
        assert_eq!(padi.tags[0], Tag::service_name("isp"));
        assert_eq!(padi.tags[1].tag_type, TagType::HOST_UNIQ);
    }

    #[test]
    fn test_padr_echoes_cookie_and_relay_in_order() {
        let pado = DiscoveryPacket::new(Code::Pado, 0).with_tags(vec![
            Tag::ac_name("ac"),
            Tag::ac_cookie(&b"c1"[..]),
            Tag::relay_session_id(&b"r"[..]),
            Tag::ac_cookie(&b"c2"[..]),
        ]);
        let padr = engine(PppoeConfig::default()).build_padr(&pado);

        assert_eq!(padr.code, Code::Padr);
        assert_eq!(
            padr.tags,
            vec![
                Tag::service_name(""),
                Tag::ac_cookie(&b"c1"[..]),
                Tag::ac_cookie(&b"c2"[..]),
                Tag::relay_session_id(&b"r"[..]),
            ]
        );
    }

    #[test]
    fn test_rejected_display() {
        let err = DialError::Rejected { reason: None };
        assert_eq!(
            err.to_string(),
            "Access concentrator rejected the session: no reason given"
        );
        let err = DialError::Timeout {
            expected: Code::Pado,
            attempts: 3,
        };
        assert_eq!(err.to_string(), "No PADO received after 3 attempt(s)");
    }

    #[tokio::test]
    async fn test_not_open_before_dial() {
        let pppoe = engine(PppoeConfig::default());
        assert!(matches!(
            pppoe.write_to(b"x", None).await,
            Err(TransportError::NotOpen)
        ));
        let mut buf = [0u8; 16];
        assert!(matches!(
            pppoe.read_from(&mut buf).await,
            Err(TransportError::NotOpen)
        ));
        pppoe.close().await.unwrap();
        assert_eq!(pppoe.state(), SessionState::Initial);
    }
}
