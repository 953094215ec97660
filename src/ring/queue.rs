//! # Typed Slot Queue
//!
//! A fixed-length circular buffer of `u32` slots over a shared region,
//! using the same control block as the byte ring. One slot is reserved
//! so full is distinguishable from empty.
//!
//! ## Protocol
//!
//! Writers store-then-CAS: the value is written into `slot[tail]` first,
//! then the tail is advanced with a CAS. A writer that loses the CAS
//! simply re-stores into the new tail slot on retry; the superseded
//! store is never observable because readers only load slots below the
//! published tail. Readers load the slot, then CAS the head; losers
//! retry.
//!
//! Blocking variants park on the opposite cursor's condition variable
//! and are the only APIs that fail on exhaustion: `push` with "queue
//! full" and `shift` with "queue empty" once their timeout elapses.

use eyre::{bail, ensure, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RING_META_BYTES;
use crate::ring::condvar::ConditionVariable;
use crate::ring::region::SharedRegion;

const HEAD_WORD: usize = 0;
const TAIL_WORD: usize = 4;

#[derive(Debug, Clone)]
pub struct Queue {
    region: Arc<SharedRegion>,
    base: usize,
    slots_at: usize,
    slots: usize,
}

impl Queue {
    /// Adopts `region[offset..]`: the 12-byte control block followed by
    /// as many u32 slots as fit.
    pub fn new(region: &Arc<SharedRegion>, offset: usize) -> Result<Queue> {
        ensure!(offset % 4 == 0, "queue control block must be 4-byte aligned");
        let avail = region
            .len()
            .checked_sub(offset + RING_META_BYTES)
            .unwrap_or(0);
        let slots = avail / 4;
        ensure!(
            slots >= 2,
            "region too small for a queue: {} slots, need at least 2",
            slots
        );
        Ok(Queue {
            region: region.clone(),
            base: offset,
            slots_at: offset + RING_META_BYTES,
            slots,
        })
    }

    fn head(&self) -> &AtomicU32 {
        self.region.atomic_u32(self.base + HEAD_WORD)
    }

    fn tail(&self) -> &AtomicU32 {
        self.region.atomic_u32(self.base + TAIL_WORD)
    }

    fn slot(&self, idx: usize) -> &AtomicU32 {
        self.region.atomic_u32(self.slots_at + idx * 4)
    }

    fn head_condvar(&self) -> ConditionVariable {
        ConditionVariable::new(self.region.clone(), self.base + HEAD_WORD)
    }

    fn tail_condvar(&self) -> ConditionVariable {
        ConditionVariable::new(self.region.clone(), self.base + TAIL_WORD)
    }

    /// Values the queue can hold (one slot stays reserved).
    pub fn capacity(&self) -> usize {
        self.slots - 1
    }

    pub fn len(&self) -> usize {
        let head = self.head().load(Ordering::Acquire) as usize;
        let tail = self.tail().load(Ordering::Acquire) as usize;
        (tail + self.slots - head) % self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single push attempt; false when the queue is full.
    pub fn try_push(&self, value: u32) -> bool {
        loop {
            let tail = self.tail().load(Ordering::Acquire) as usize;
            let head = self.head().load(Ordering::Acquire) as usize;
            let next = (tail + 1) % self.slots;
            if next == head {
                return false;
            }
            // Store before publishing; a failed CAS re-stores on retry.
            self.slot(tail).store(value, Ordering::Release);
            if self
                .tail()
                .compare_exchange(tail as u32, next as u32, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.tail_condvar().notify_all();
                return true;
            }
        }
    }

    /// Single pop attempt; None when the queue is empty.
    pub fn try_shift(&self) -> Option<u32> {
        loop {
            let head = self.head().load(Ordering::Acquire) as usize;
            let tail = self.tail().load(Ordering::Acquire) as usize;
            if head == tail {
                return None;
            }
            let value = self.slot(head).load(Ordering::Acquire);
            let next = (head + 1) % self.slots;
            if self
                .head()
                .compare_exchange(head as u32, next as u32, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.head_condvar().notify_all();
                return Some(value);
            }
        }
    }

    /// Observes the value `idx` positions past the read cursor without
    /// advancing it.
    pub fn peek(&self, idx: usize) -> Option<u32> {
        let head = self.head().load(Ordering::Acquire) as usize;
        let tail = self.tail().load(Ordering::Acquire) as usize;
        let size = (tail + self.slots - head) % self.slots;
        if idx >= size {
            return None;
        }
        Some(self.slot((head + idx) % self.slots).load(Ordering::Acquire))
    }

    /// Blocking push. Fails with "queue full" once `timeout_ms` elapses
    /// (0 means one attempt).
    pub fn push(&self, value: u32, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.try_push(value) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                bail!("queue full after {} ms", timeout_ms);
            }
            let head = self.head().load(Ordering::SeqCst);
            self.head_condvar()
                .wait(head, Some(deadline.duration_since(now)));
        }
    }

    /// Blocking pop. Fails with "queue empty" once `timeout_ms` elapses.
    pub fn shift(&self, timeout_ms: u64) -> Result<u32> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(value) = self.try_shift() {
                return Ok(value);
            }
            let now = Instant::now();
            if now >= deadline {
                bail!("queue empty after {} ms", timeout_ms);
            }
            let tail = self.tail().load(Ordering::SeqCst);
            self.tail_condvar()
                .wait(tail, Some(deadline.duration_since(now)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(slots: usize) -> Queue {
        let region = SharedRegion::alloc(RING_META_BYTES + slots * 4);
        Queue::new(&region, 0).unwrap()
    }

    #[test]
    fn rejects_regions_without_two_slots() {
        let region = SharedRegion::alloc(RING_META_BYTES + 4);
        assert!(Queue::new(&region, 0).is_err());
    }

    #[test]
    fn fifo_order_and_capacity() {
        let q = queue(4);
        assert_eq!(q.capacity(), 3);
        assert!(q.try_push(1));
        assert!(q.try_push(2));
        assert!(q.try_push(3));
        assert!(!q.try_push(4));
        assert_eq!(q.len(), 3);

        assert_eq!(q.try_shift(), Some(1));
        assert_eq!(q.try_shift(), Some(2));
        assert!(q.try_push(4));
        assert_eq!(q.try_shift(), Some(3));
        assert_eq!(q.try_shift(), Some(4));
        assert_eq!(q.try_shift(), None);
    }

    #[test]
    fn peek_observes_without_advancing() {
        let q = queue(8);
        q.try_push(10);
        q.try_push(20);
        assert_eq!(q.peek(0), Some(10));
        assert_eq!(q.peek(1), Some(20));
        assert_eq!(q.peek(2), None);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn blocking_apis_report_exhaustion() {
        let q = queue(2);
        assert!(q.try_push(1));
        let err = q.push(2, 20).unwrap_err().to_string();
        assert!(err.contains("queue full"));
        assert_eq!(q.try_shift(), Some(1));
        let err = q.shift(20).unwrap_err().to_string();
        assert!(err.contains("queue empty"));
    }

    #[test]
    fn spsc_threads_preserve_value_order() {
        use std::thread;

        // Producer cycles 1..=254; consumer must see the exact sequence.
        let q = queue(1024);
        let producer_q = q.clone();
        const TOTAL: u32 = 20_000;

        let producer = thread::spawn(move || {
            for i in 0..TOTAL {
                let value = (i % 254) + 1;
                producer_q.push(value, 10_000).unwrap();
            }
        });

        let mut popped = Vec::with_capacity(TOTAL as usize);
        while popped.len() < TOTAL as usize {
            popped.push(q.shift(10_000).unwrap());
        }
        producer.join().unwrap();

        for (i, value) in popped.iter().enumerate() {
            assert_eq!(*value, (i as u32 % 254) + 1, "position {}", i);
        }
        assert_eq!(q.try_shift(), None);
    }
}
