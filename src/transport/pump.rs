//! Reply correlation and the unsolicited inbound queue.
//!
//! Replies (reply bit set) are matched against [`PendingWaits`]; everything
//! else lands in the [`InboundQueue`], which is consumed either by a blocking
//! poll or by a single drain worker feeding the registered handler.

use crate::core::packet::Packet;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

/// Reply slots keyed by the sequence the reply will carry
#[derive(Debug, Default)]
pub struct PendingWaits {
    next_id: AtomicU64,
    waits: Mutex<HashMap<u16, (u64, oneshot::Sender<Packet>)>>,
}

impl PendingWaits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `reply_seq`, evicting any stale one.
    ///
    /// The returned id identifies this registration for [`PendingWaits::cancel`].
    pub fn register(&self, reply_seq: u16) -> (u64, oneshot::Receiver<Packet>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut waits = self.waits.lock().unwrap_or_else(|e| e.into_inner());
        if waits.insert(reply_seq, (id, tx)).is_some() {
            debug!(seq = reply_seq, "Evicted stale wait");
        }
        (id, rx)
    }

    /// Hand a reply to its waiter. Returns the packet if nobody claimed it.
    pub fn resolve(&self, packet: Packet) -> Option<Packet> {
        let entry = self
            .waits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&packet.seq);
        match entry {
            Some((_, tx)) => tx.send(packet).err(),
            None => Some(packet),
        }
    }

    /// Remove the wait for `reply_seq` only if it is still registration `id`
    pub fn cancel(&self, reply_seq: u16, id: u64) {
        let mut waits = self.waits.lock().unwrap_or_else(|e| e.into_inner());
        if waits.get(&reply_seq).is_some_and(|(current, _)| *current == id) {
            waits.remove(&reply_seq);
        }
    }

    pub fn len(&self) -> usize {
        self.waits.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO of unsolicited packets with a wake signal and a drain flag
#[derive(Debug, Default)]
pub struct InboundQueue {
    items: Mutex<VecDeque<Packet>>,
    notify: Notify,
    draining: AtomicBool,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, packet: Packet) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(packet);
    }

    pub fn pop(&self) -> Option<Packet> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake every blocked poller
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Claim the drain role. False if a drain is already running.
    pub fn try_begin_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_drain(&self) {
        self.draining.store(false, Ordering::Release);
    }

    /// Pop one packet, waiting for a wake if the queue is empty.
    ///
    /// `timeout == 0` waits until a packet arrives or `is_closed` turns true.
    pub async fn pop_wait(&self, timeout: Duration, is_closed: impl Fn() -> bool) -> Option<Packet> {
        let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(packet) = self.pop() {
                return Some(packet);
            }
            if is_closed() {
                return None;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }
}
