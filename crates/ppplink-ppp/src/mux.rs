//! PPP protocol multiplexer
//!
//! One send loop drains the shared outbound channel into the transport. One
//! receive loop reads frames from the transport and hands each to a dispatch
//! task, which delivers the payload to the registered protocol and answers
//! unknown protocols with an LCP Protocol-Reject.
//!
//! The receive loop never waits on a receiver. Each protocol queues at most
//! `max_pending` frames and drops the rest, so a stalled consumer only loses
//! its own traffic. Dispatches for frames nobody queued are bounded by
//! `max_in_flight`.

use bytes::Bytes;
use ppplink_proto::{LcpPacket, PppFrame, ProtocolNumber};
use ppplink_transport::PacketConn;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::PppConfig;
use crate::registry::{Delivery, Registry, Ticket};

/// Multiplexes PPP protocols over one packet connection
pub struct Ppp<C: PacketConn> {
    conn: Arc<C>,
    registry: Arc<Registry>,
    send_tx: mpsc::Sender<PppFrame>,
    config: PppConfig,
    cancel: CancellationToken,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
}

impl<C: PacketConn + 'static> Ppp<C> {
    /// Start the send and receive loops over `conn`. The loops stop when
    /// `cancel` fires, on [`Ppp::shutdown`], or when the multiplexer is
    /// dropped.
    pub fn new(conn: Arc<C>, cancel: CancellationToken) -> Self {
        Self::with_config(conn, cancel, PppConfig::default())
    }

    pub fn with_config(conn: Arc<C>, cancel: CancellationToken, config: PppConfig) -> Self {
        let cancel = cancel.child_token();
        let registry = Arc::new(Registry::new(config.max_pending));
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_depth.max(1));

        let send_task = tokio::spawn(send_loop(
            conn.clone(),
            send_rx,
            cancel.clone(),
            config.write_timeout,
        ));
        let recv_task = tokio::spawn(
            Receiver {
                conn: conn.clone(),
                registry: registry.clone(),
                send_tx: send_tx.clone(),
                in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
                next_reject_id: Arc::new(AtomicU8::new(0)),
                config: config.clone(),
            }
            .run(cancel.clone()),
        );

        Self {
            conn,
            registry,
            send_tx,
            config,
            cancel,
            send_task,
            recv_task,
        }
    }

    /// Register a protocol. Returns the shared send channel and a receive
    /// channel carrying payloads of frames for `protocol`. Registering a
    /// protocol again ends the previous receive channel. Dropping the receive
    /// channel unregisters the protocol once its next frame arrives.
    pub fn register(
        &self,
        protocol: impl Into<ProtocolNumber>,
    ) -> (mpsc::Sender<PppFrame>, mpsc::Receiver<Bytes>) {
        let protocol = protocol.into();
        let (tx, rx) = mpsc::channel(self.config.recv_queue_depth.max(1));
        if self.registry.insert(protocol, tx) {
            warn!(%protocol, "Protocol registered twice, previous receiver closed");
        } else {
            debug!(%protocol, "Protocol registered");
        }
        (self.send_tx.clone(), rx)
    }

    /// Close and remove the receive channel for `protocol`
    pub fn unregister(&self, protocol: impl Into<ProtocolNumber>) -> bool {
        let protocol = protocol.into();
        let removed = self.registry.remove(protocol);
        if removed {
            debug!(%protocol, "Protocol unregistered");
        }
        removed
    }

    pub fn is_registered(&self, protocol: impl Into<ProtocolNumber>) -> bool {
        self.registry.contains(protocol.into())
    }

    /// The shared send channel
    pub fn sender(&self) -> mpsc::Sender<PppFrame> {
        self.send_tx.clone()
    }

    pub fn conn(&self) -> &Arc<C> {
        &self.conn
    }

    /// Stop both loops. Dispatches already running finish on their own.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_sending(&self) -> bool {
        !self.send_task.is_finished()
    }

    pub fn is_receiving(&self) -> bool {
        !self.recv_task.is_finished()
    }
}

impl<C: PacketConn> Drop for Ppp<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send_loop<C: PacketConn>(
    conn: Arc<C>,
    mut frames: mpsc::Receiver<PppFrame>,
    cancel: CancellationToken,
    write_timeout: std::time::Duration,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = conn.set_write_deadline(Some(Instant::now() + write_timeout)) {
            trace!("Transport rejected write deadline: {}", e);
        }
        if let Err(e) = conn.write_to(&frame.encode(), None).await {
            warn!(protocol = %frame.protocol, "Failed to send PPP frame: {}", e);
        }
    }
    info!("PPP send loop stopped");
}

struct Receiver<C> {
    conn: Arc<C>,
    registry: Arc<Registry>,
    send_tx: mpsc::Sender<PppFrame>,
    in_flight: Arc<Semaphore>,
    next_reject_id: Arc<AtomicU8>,
    config: PppConfig,
}

impl<C: PacketConn> Receiver<C> {
    async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; self.config.max_frame_size.max(PppFrame::HEADER_SIZE)];

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self
                .conn
                .set_read_deadline(Some(Instant::now() + self.config.read_poll_interval))
            {
                trace!("Transport rejected read deadline: {}", e);
            }

            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.conn.read_from(&mut buf) => read,
            };
            let n = match read {
                Ok((n, _)) => n,
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    error!("PPP receive loop stopped: {}", e);
                    return;
                }
            };
            if n < PppFrame::HEADER_SIZE {
                debug!(len = n, "Dropping short PPP frame");
                continue;
            }

            let raw = Bytes::copy_from_slice(&buf[..n]);
            let frame = match PppFrame::decode(raw.clone()) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Dropping PPP frame: {}", e);
                    continue;
                }
            };

            // Queue position is taken here so dispatches cannot reorder frames
            let queued = self.registry.enqueue(frame.protocol, frame.payload);
            let permit = match queued {
                Ok(_) => None,
                Err(delivery) if frame.protocol.is_well_known() => {
                    log_delivery(frame.protocol, delivery);
                    continue;
                }
                Err(_) => tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = self.in_flight.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
            };
            tokio::spawn(
                Dispatch {
                    registry: self.registry.clone(),
                    send_tx: self.send_tx.clone(),
                    next_reject_id: self.next_reject_id.clone(),
                    _permit: permit,
                }
                .run(frame.protocol, queued, raw),
            );
        }
        info!("PPP receive loop stopped");
    }
}

/// Handling of a single received frame
struct Dispatch {
    registry: Arc<Registry>,
    send_tx: mpsc::Sender<PppFrame>,
    next_reject_id: Arc<AtomicU8>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Dispatch {
    async fn run(self, protocol: ProtocolNumber, queued: Result<Ticket, Delivery>, raw: Bytes) {
        let delivery = match queued {
            Ok(ticket) => self.registry.commit(ticket).await,
            Err(delivery) => delivery,
        };
        log_delivery(protocol, delivery);

        // Sent even when a receiver took the frame
        if !protocol.is_well_known() {
            self.send_protocol_reject(protocol, &raw).await;
        }
    }

    async fn send_protocol_reject(&self, protocol: ProtocolNumber, raw: &[u8]) {
        let id = self
            .next_reject_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        let reject = match LcpPacket::protocol_reject(id, protocol.0, raw).encode() {
            Ok(reject) => reject,
            Err(e) => {
                warn!(%protocol, "Failed to build Protocol-Reject: {}", e);
                return;
            }
        };
        if self
            .send_tx
            .send(PppFrame::new(ProtocolNumber::LCP, reject))
            .await
            .is_err()
        {
            debug!(%protocol, "Send loop gone, Protocol-Reject dropped");
            return;
        }
        debug!(%protocol, id, "Sent LCP Protocol-Reject");
    }
}

fn log_delivery(protocol: ProtocolNumber, delivery: Delivery) {
    match delivery {
        Delivery::Delivered => trace!(%protocol, "Delivered PPP frame"),
        Delivery::NoReceiver => trace!(%protocol, "No receiver for PPP frame"),
        Delivery::Saturated => debug!(%protocol, "Receiver is behind, PPP frame dropped"),
        Delivery::Retired | Delivery::Closed => {
            debug!(%protocol, "Receiver went away, PPP frame dropped")
        }
    }
}
