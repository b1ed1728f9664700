//! Bounded outbound packet queue.
//!
//! A fixed-capacity FIFO ring shared by any number of producer threads and
//! the single writer thread. Producers block while the ring is full and the
//! writer blocks while it is empty; nothing is ever dropped or overwritten.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐                          ┌─ space_available ◄─┐
//! Caller 2 ─┼─► enqueue ─► [ ring ] ─► dequeue ─► Writer    │
//! Caller N ─┘      └─ data_available ─►┘          └─────────┘
//! ```
//!
//! All state lives behind one mutex. Both waits re-check their predicate
//! under that mutex, so a notify can never slip between the check and the
//! wait.
//!
//! # Shutdown
//!
//! [`OutboundQueue::close`] wakes every waiter. Producers then fail with
//! `QueueClosed`; the consumer keeps draining whatever is still queued and
//! gets `QueueClosed` once the ring is empty.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{PeachyError, Result};
use crate::protocol::{check_len, Packet};

struct Ring {
    slots: Box<[Packet]>,
    /// Index of the oldest unread packet.
    read_index: usize,
    /// Populated, unread slots.
    count: usize,
    closed: bool,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Packet::EMPTY; capacity].into_boxed_slice(),
            read_index: 0,
            count: 0,
            closed: false,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    fn push(&mut self, payload: &[u8]) {
        let write_index = (self.read_index + self.count) % self.capacity();
        self.slots[write_index].overwrite(payload);
        self.count += 1;
        self.check_invariants();
    }

    fn pop_into(&mut self, buf: &mut [u8]) -> usize {
        let copied = self.slots[self.read_index].copy_to(buf);
        self.read_index = (self.read_index + 1) % self.capacity();
        self.count -= 1;
        self.check_invariants();
        copied
    }

    fn check_invariants(&self) {
        assert!(
            self.count <= self.capacity(),
            "queue count {} exceeds capacity {}",
            self.count,
            self.capacity()
        );
        assert!(self.read_index < self.capacity(), "read index out of range");
    }
}

/// Fixed-capacity, blocking, multi-producer single-consumer packet queue.
pub struct OutboundQueue {
    ring: Mutex<Ring>,
    space_available: Condvar,
    data_available: Condvar,
}

impl OutboundQueue {
    /// Create a queue with `capacity` packet slots.
    ///
    /// Returns `InvalidCapacity` for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PeachyError::InvalidCapacity(capacity));
        }

        Ok(Self {
            ring: Mutex::new(Ring::new(capacity)),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
        })
    }

    /// Enqueue one packet, waiting as long as it takes for a free slot.
    ///
    /// Full is not an error: the caller is parked until the writer frees a
    /// slot. Fails only for oversized payloads or a closed queue.
    pub fn enqueue(&self, payload: &[u8]) -> Result<()> {
        check_len(payload.len())?;

        let mut ring = self.ring.lock();
        while ring.is_full() && !ring.closed {
            self.space_available.wait(&mut ring);
        }

        self.push_locked(ring, payload)
    }

    /// Enqueue one packet, giving up with `Timeout` after `timeout`.
    ///
    /// A timeout too large to express as a deadline waits like [`enqueue`](Self::enqueue).
    pub fn enqueue_timeout(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        check_len(payload.len())?;

        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.enqueue(payload);
        };
        let mut ring = self.ring.lock();
        while ring.is_full() && !ring.closed {
            if self
                .space_available
                .wait_until(&mut ring, deadline)
                .timed_out()
                && ring.is_full()
                && !ring.closed
            {
                return Err(PeachyError::Timeout);
            }
        }

        self.push_locked(ring, payload)
    }

    fn push_locked(&self, mut ring: MutexGuard<'_, Ring>, payload: &[u8]) -> Result<()> {
        if ring.closed {
            return Err(PeachyError::QueueClosed);
        }

        ring.push(payload);
        drop(ring);
        self.data_available.notify_one();
        Ok(())
    }

    /// Dequeue the oldest packet into `buf`, waiting while the queue is empty.
    ///
    /// Copies `min(packet.len(), buf.len())` bytes and returns that count.
    /// A packet longer than `buf` is truncated without any signal to the
    /// caller. Returns `QueueClosed` once the queue is closed and drained.
    pub fn dequeue(&self, buf: &mut [u8]) -> Result<usize> {
        let mut ring = self.ring.lock();
        while ring.count == 0 && !ring.closed {
            self.data_available.wait(&mut ring);
        }

        self.pop_locked(ring, buf)
    }

    /// Dequeue with an upper bound on the wait, failing with `Timeout`.
    pub fn dequeue_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.dequeue(buf);
        };
        let mut ring = self.ring.lock();
        while ring.count == 0 && !ring.closed {
            if self
                .data_available
                .wait_until(&mut ring, deadline)
                .timed_out()
                && ring.count == 0
                && !ring.closed
            {
                return Err(PeachyError::Timeout);
            }
        }

        self.pop_locked(ring, buf)
    }

    fn pop_locked(&self, mut ring: MutexGuard<'_, Ring>, buf: &mut [u8]) -> Result<usize> {
        if ring.count == 0 {
            return Err(PeachyError::QueueClosed);
        }

        let copied = ring.pop_into(buf);
        drop(ring);
        self.space_available.notify_one();
        Ok(copied)
    }

    /// Close the queue and wake every waiting producer and consumer.
    ///
    /// Packets already queued stay available to `dequeue`.
    pub fn close(&self) {
        let mut ring = self.ring.lock();
        if ring.closed {
            return;
        }
        ring.closed = true;
        drop(ring);

        self.space_available.notify_all();
        self.data_available.notify_all();
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Number of queued, unread packets.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    /// Snapshot of `(read_index, count)` for invariant checks in tests.
    #[cfg(test)]
    fn indices(&self) -> (usize, usize) {
        let ring = self.ring.lock();
        (ring.read_index, ring.count)
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("OutboundQueue")
            .field("capacity", &ring.capacity())
            .field("read_index", &ring.read_index)
            .field("count", &ring.count)
            .field("closed", &ring.closed)
            .finish()
    }
}
