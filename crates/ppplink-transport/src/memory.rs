//! In-process transports
//!
//! [`Segment`] simulates a broadcast Ethernet segment that any number of
//! [`MemoryEtherConn`]s attach to. [`packet_pipe`] returns two connected
//! [`MemoryPacketConn`]s. Both honour read and write deadlines the same way
//! a socket would, which makes them suitable for exercising timeout and retry logic
//! under tokio's paused clock.

use async_trait::async_trait;
use bytes::Bytes;
use ppplink_proto::MacAddr;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use crate::{
    Deadline, EtherConn, EtherFrame, PacketConn, TransportError, TransportResult,
};

#[derive(Debug)]
struct Port {
    station: u64,
    tx: mpsc::UnboundedSender<EtherFrame>,
}

type PortMap = HashMap<MacAddr, Port>;

/// A simulated Ethernet segment
#[derive(Debug, Clone, Default)]
pub struct Segment {
    ports: Arc<Mutex<PortMap>>,
    next_station: Arc<AtomicU64>,
}

impl Segment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new station. Attaching an address twice replaces the older
    /// station, which then stops receiving frames.
    pub fn attach(&self, mac: MacAddr) -> MemoryEtherConn {
        let (tx, rx) = mpsc::unbounded_channel();
        let station = self.next_station.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(mac, Port { station, tx });
        MemoryEtherConn {
            mac,
            station,
            ports: self.ports.clone(),
            rx: tokio::sync::Mutex::new(rx),
            read_deadline: Deadline::new(),
            write_deadline: Deadline::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of attached stations
    pub fn stations(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortMap> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A station on a [`Segment`]
#[derive(Debug)]
pub struct MemoryEtherConn {
    mac: MacAddr,
    station: u64,
    ports: Arc<Mutex<PortMap>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EtherFrame>>,
    read_deadline: Deadline,
    write_deadline: Deadline,
    closed: AtomicBool,
}

impl MemoryEtherConn {
    /// Detach from the segment. Pending and future operations fail with
    /// [`TransportError::ConnectionClosed`].
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.detach();
    }

    fn detach(&self) {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        if ports
            .get(&self.mac)
            .is_some_and(|port| port.station == self.station)
        {
            ports.remove(&self.mac);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn forward(&self, frame: EtherFrame, dst: MacAddr) -> TransportResult<()> {
        let ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        if dst.is_broadcast() {
            for (mac, port) in ports.iter().filter(|(mac, _)| **mac != self.mac) {
                if port.tx.send(frame.clone()).is_err() {
                    trace!("station {} is gone, frame dropped", mac);
                }
            }
        } else if let Some(port) = ports.get(&dst) {
            let _ = port.tx.send(frame);
        } else {
            trace!("no station {} on segment, frame dropped", dst);
        }
        Ok(())
    }
}

impl Drop for MemoryEtherConn {
    fn drop(&mut self) {
        self.detach();
    }
}

#[async_trait]
impl EtherConn for MemoryEtherConn {
    async fn send_to(
        &self,
        payload: &[u8],
        ethertype: u16,
        dst: MacAddr,
    ) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let frame = EtherFrame {
            src: self.mac,
            ethertype,
            payload: Bytes::copy_from_slice(payload),
        };

        self.write_deadline
            .run(async { self.forward(frame, dst) })
            .await?;
        Ok(payload.len())
    }

    async fn recv_from(&self) -> TransportResult<EtherFrame> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        self.read_deadline
            .run(async {
                let mut rx = self.rx.lock().await;
                rx.recv().await.ok_or(TransportError::ConnectionClosed)
            })
            .await
    }

    fn local_addr(&self) -> MacAddr {
        self.mac
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        self.read_deadline.set(deadline);
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        self.write_deadline.set(deadline);
        Ok(())
    }
}

/// Two connected datagram endpoints, each with `capacity` packets of buffering
pub fn packet_pipe(capacity: usize) -> (MemoryPacketConn, MemoryPacketConn) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (MemoryPacketConn::new(a_tx, b_rx), MemoryPacketConn::new(b_tx, a_rx))
}

/// One end of a [`packet_pipe`]
#[derive(Debug)]
pub struct MemoryPacketConn {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    read_deadline: Deadline,
    write_deadline: Deadline,
}

impl MemoryPacketConn {
    fn new(tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            read_deadline: Deadline::new(),
            write_deadline: Deadline::new(),
        }
    }

    fn sender(&self) -> TransportResult<mpsc::Sender<Bytes>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl PacketConn for MemoryPacketConn {
    type Addr = ();

    async fn write_to(&self, buf: &[u8], _addr: Option<&()>) -> TransportResult<usize> {
        let tx = self.sender()?;
        let packet = Bytes::copy_from_slice(buf);
        self.write_deadline
            .run(async {
                tx.send(packet)
                    .await
                    .map_err(|_| TransportError::ConnectionClosed)
            })
            .await?;
        Ok(buf.len())
    }

    async fn read_from(&self, buf: &mut [u8]) -> TransportResult<(usize, ())> {
        let packet = self
            .read_deadline
            .run(async {
                let mut rx = self.rx.lock().await;
                rx.recv().await.ok_or(TransportError::ConnectionClosed)
            })
            .await?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok((n, ()))
    }

    async fn close(&self) -> TransportResult<()> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        self.read_deadline.set(deadline);
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> TransportResult<()> {
        self.write_deadline.set(deadline);
        Ok(())
    }
}
