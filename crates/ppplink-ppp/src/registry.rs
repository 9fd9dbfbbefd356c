//! Protocol registry
//!
//! Maps protocol numbers to receive channels. Every entry carries a
//! generation so that a dispatch which looked up an entry before it was
//! removed or replaced can never commit a frame into it afterwards.
//!
//! Delivery is split in two. [`Registry::enqueue`] runs synchronously in the
//! receive loop and appends the payload to the entry's pending queue, which
//! fixes the order frames reach the receiver. [`Registry::commit`] runs in a
//! dispatch task, waits for channel capacity and forwards the oldest pending
//! payload. Dispatches may finish in any order without reordering frames.
//!
//! Each entry queues at most `pending_limit` payloads, so a receiver that
//! stops reading costs a bounded number of dispatches. An entry whose
//! receiver was dropped is removed the next time a frame arrives for it.

use bytes::Bytes;
use ppplink_proto::ProtocolNumber;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Slot {
    generation: u64,
    tx: mpsc::Sender<Bytes>,
    pending: Mutex<VecDeque<Bytes>>,
    retired: CancellationToken,
}

impl Slot {
    fn retire(&self) {
        self.retired.cancel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Outcome of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Nothing registered for the protocol
    NoReceiver,
    /// The entry's pending queue is full
    Saturated,
    /// The entry was removed or replaced while the dispatch waited
    Retired,
    /// The registrant dropped its receiver
    Closed,
}

/// A payload queued by [`Registry::enqueue`], to be handed to
/// [`Registry::commit`]
#[derive(Debug)]
pub struct Ticket {
    protocol: ProtocolNumber,
    slot: Arc<Slot>,
}

#[derive(Debug)]
pub struct Registry {
    slots: RwLock<HashMap<ProtocolNumber, Arc<Slot>>>,
    next_generation: AtomicU64,
    pending_limit: usize,
}

impl Registry {
    /// Registry queueing at most `pending_limit` payloads per protocol
    pub fn new(pending_limit: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            pending_limit: pending_limit.max(1),
        }
    }

    /// Install `tx` for `protocol`. Returns true if an older entry was
    /// replaced; its sender is dropped so its receiver ends.
    pub fn insert(&self, protocol: ProtocolNumber, tx: mpsc::Sender<Bytes>) -> bool {
        let slot = Arc::new(Slot {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            tx,
            pending: Mutex::new(VecDeque::new()),
            retired: CancellationToken::new(),
        });
        match self.write().insert(protocol, slot) {
            Some(old) => {
                old.retire();
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `protocol`. No delivery commits to it once this
    /// returns.
    pub fn remove(&self, protocol: ProtocolNumber) -> bool {
        match self.write().remove(&protocol) {
            Some(old) => {
                old.retire();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, protocol: ProtocolNumber) -> bool {
        self.read().contains_key(&protocol)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `payload` for the receiver of `protocol`. Never blocks; when the
    /// payload cannot be queued the error says why and it is dropped.
    pub fn enqueue(&self, protocol: ProtocolNumber, payload: Bytes) -> Result<Ticket, Delivery> {
        let slots = self.read();
        let slot = slots.get(&protocol).ok_or(Delivery::NoReceiver)?;
        if slot.tx.is_closed() {
            let slot = slot.clone();
            drop(slots);
            self.evict(protocol, &slot);
            return Err(Delivery::Closed);
        }

        let mut pending = slot.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() >= self.pending_limit {
            return Err(Delivery::Saturated);
        }
        pending.push_back(payload);
        drop(pending);

        Ok(Ticket {
            protocol,
            slot: slot.clone(),
        })
    }

    /// Wait for capacity in the receiver's channel, then forward the oldest
    /// queued payload
    pub async fn commit(&self, ticket: Ticket) -> Delivery {
        let Ticket { protocol, slot } = ticket;

        let permit = tokio::select! {
            biased;
            _ = slot.retired.cancelled() => return Delivery::Retired,
            permit = slot.tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.evict(protocol, &slot);
                    return Delivery::Closed;
                }
            },
        };

        let slots = self.read();
        match slots.get(&protocol) {
            Some(current) if current.generation == slot.generation => {
                let next = slot
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                match next {
                    Some(payload) => {
                        permit.send(payload);
                        Delivery::Delivered
                    }
                    None => Delivery::Retired,
                }
            }
            _ => Delivery::Retired,
        }
    }

    /// [`enqueue`](Self::enqueue) followed by [`commit`](Self::commit)
    pub async fn deliver(&self, protocol: ProtocolNumber, payload: Bytes) -> Delivery {
        match self.enqueue(protocol, payload) {
            Ok(ticket) => self.commit(ticket).await,
            Err(delivery) => delivery,
        }
    }

    /// Drop `slot` and, if it is still the current entry, remove it
    fn evict(&self, protocol: ProtocolNumber, slot: &Slot) {
        let mut slots = self.write();
        if slots
            .get(&protocol)
            .is_some_and(|current| current.generation == slot.generation)
        {
            slots.remove(&protocol);
        }
        slot.retire();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ProtocolNumber, Arc<Slot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ProtocolNumber, Arc<Slot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PROTO: ProtocolNumber = ProtocolNumber(0x0021);

    #[tokio::test]
    async fn test_deliver_to_registered() {
        let registry = Registry::new(8);
        let (tx, mut rx) = mpsc::channel(4);
        assert!(!registry.insert(PROTO, tx));

        assert_eq!(
            registry.deliver(PROTO, Bytes::from_static(b"a")).await,
            Delivery::Delivered
        );
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(
            registry
                .deliver(ProtocolNumber(0x0057), Bytes::new())
                .await,
            Delivery::NoReceiver
        );
    }

    #[tokio::test]
    async fn test_commit_order_follows_enqueue_order() {
        let registry = Registry::new(8);
        let (tx, mut rx) = mpsc::channel(4);
        registry.insert(PROTO, tx);

        let first = registry.enqueue(PROTO, Bytes::from_static(b"1")).unwrap();
        let second = registry.enqueue(PROTO, Bytes::from_static(b"2")).unwrap();
        assert_eq!(registry.commit(second).await, Delivery::Delivered);
        assert_eq!(registry.commit(first).await, Delivery::Delivered);

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_remove_ends_receiver() {
        let registry = Registry::new(8);
        let (tx, mut rx) = mpsc::channel(4);
        registry.insert(PROTO, tx);

        assert!(registry.remove(PROTO));
        assert!(!registry.remove(PROTO));
        assert!(rx.recv().await.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_replace_ends_old_receiver() {
        let registry = Registry::new(8);
        let (old_tx, mut old_rx) = mpsc::channel(4);
        let (new_tx, mut new_rx) = mpsc::channel(4);
        registry.insert(PROTO, old_tx);
        let stale = registry.enqueue(PROTO, Bytes::from_static(b"old")).unwrap();
        assert!(registry.insert(PROTO, new_tx));

        assert_eq!(registry.commit(stale).await, Delivery::Retired);
        assert!(old_rx.recv().await.is_none());

        registry.deliver(PROTO, Bytes::from_static(b"new")).await;
        assert_eq!(new_rx.recv().await.unwrap(), Bytes::from_static(b"new"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_delivery_retired_by_remove() {
        let registry = Arc::new(Registry::new(8));
        let (tx, mut rx) = mpsc::channel(1);
        registry.insert(PROTO, tx);
        registry.deliver(PROTO, Bytes::from_static(b"1")).await;

        let blocked = tokio::spawn({
            let registry = registry.clone();
            async move { registry.deliver(PROTO, Bytes::from_static(b"2")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        registry.remove(PROTO);
        assert_eq!(blocked.await.unwrap(), Delivery::Retired);

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert!(rx.recv().await.is_none());
    }

    fn slot(registry: &Registry) -> Arc<Slot> {
        registry.read().get(&PROTO).cloned().unwrap()
    }

    fn pending_len(slot: &Slot) -> usize {
        slot.pending.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_evicted() {
        let registry = Registry::new(8);
        let (tx, rx) = mpsc::channel(1);
        registry.insert(PROTO, tx);
        let slot = slot(&registry);
        drop(rx);

        assert_eq!(
            registry.deliver(PROTO, Bytes::new()).await,
            Delivery::Closed
        );
        for _ in 0..10_000 {
            assert_eq!(
                registry.deliver(PROTO, Bytes::from_static(b"x")).await,
                Delivery::NoReceiver
            );
        }
        assert!(!registry.contains(PROTO));
        assert_eq!(pending_len(&slot), 0);
    }

    #[tokio::test]
    async fn test_receiver_dropped_while_queued() {
        let registry = Registry::new(8);
        let (tx, rx) = mpsc::channel(1);
        registry.insert(PROTO, tx);
        let slot = slot(&registry);

        let first = registry.enqueue(PROTO, Bytes::from_static(b"1")).unwrap();
        let second = registry.enqueue(PROTO, Bytes::from_static(b"2")).unwrap();
        drop(rx);

        assert_eq!(registry.commit(first).await, Delivery::Closed);
        assert_eq!(registry.commit(second).await, Delivery::Retired);
        assert_eq!(pending_len(&slot), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_saturates_at_pending_limit() {
        let registry = Registry::new(2);
        let (tx, mut rx) = mpsc::channel(1);
        registry.insert(PROTO, tx);

        let first = registry.enqueue(PROTO, Bytes::from_static(b"1")).unwrap();
        let second = registry.enqueue(PROTO, Bytes::from_static(b"2")).unwrap();
        assert_eq!(
            registry.enqueue(PROTO, Bytes::from_static(b"3")).unwrap_err(),
            Delivery::Saturated
        );

        assert_eq!(registry.commit(first).await, Delivery::Delivered);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(registry.commit(second).await, Delivery::Delivered);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"2"));
        assert!(registry.enqueue(PROTO, Bytes::from_static(b"4")).is_ok());
    }
}
