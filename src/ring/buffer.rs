//! # Byte Ring Buffer
//!
//! A circular byte queue over a shared region, wait-free on the fast
//! path and coordinated entirely through three atomic words:
//!
//! ```text
//! +--------+--------+-------------+------------------------------+
//! | head   | tail   | writer flag | data cells (N bytes)          |
//! | u32 LE | u32 LE | u32 LE      | one byte reserved: full!=empty|
//! +--------+--------+-------------+------------------------------+
//! ```
//!
//! ## Protocol
//!
//! Writers serialize through the flag: `fetch_add(1)` returning non-zero
//! means another writer is mid-flight and the attempt returns 0 bytes
//! (the winner's final store of 0 clears any loser increments). The
//! payload is copied before the tail is store-released, so a reader that
//! acquires the new tail always sees complete bytes.
//!
//! Readers are optimistic: copy out, then publish with a CAS on head.
//! A losing reader returns 0 and retries; its copied bytes are discarded.
//!
//! ## Blocking
//!
//! Timeouts are milliseconds; 0 means a single attempt. A timeout is
//! never an error: blocking calls return 0 bytes transferred. Writers
//! park on the head word (space frees when a reader advances head) and
//! readers park on the tail word; each side notifies the other after a
//! successful transfer.

use eyre::{ensure, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{RING_META_BYTES, RING_MIN_DATA_BYTES};
use crate::ring::condvar::ConditionVariable;
use crate::ring::region::SharedRegion;

const HEAD_WORD: usize = 0;
const TAIL_WORD: usize = 4;
const FLAG_WORD: usize = 8;

#[derive(Debug, Clone)]
pub struct RingBuffer {
    region: Arc<SharedRegion>,
    base: usize,
    data: usize,
    len: usize,
}

impl RingBuffer {
    /// Adopts `region[offset..]` as a ring: a 12-byte control block
    /// followed by the data cells.
    pub fn new(region: &Arc<SharedRegion>, offset: usize) -> Result<RingBuffer> {
        let span = region.len().saturating_sub(offset);
        RingBuffer::new_bounded(region, offset, span)
    }

    /// Adopts exactly `span` bytes of `region` starting at `offset`,
    /// leaving the rest of the region to other occupants.
    pub fn new_bounded(
        region: &Arc<SharedRegion>,
        offset: usize,
        span: usize,
    ) -> Result<RingBuffer> {
        ensure!(offset % 4 == 0, "ring control block must be 4-byte aligned");
        ensure!(
            offset + span <= region.len(),
            "ring span {}..{} exceeds region of {} bytes",
            offset,
            offset + span,
            region.len()
        );
        ensure!(
            span >= RING_META_BYTES + RING_MIN_DATA_BYTES,
            "region too small for a ring: {} bytes past offset {}, need at least {}",
            span,
            offset,
            RING_META_BYTES + RING_MIN_DATA_BYTES
        );
        let len = span - RING_META_BYTES;
        ensure!(
            len % 2 == 0,
            "ring data region must have even length, got {}",
            len
        );
        Ok(RingBuffer {
            region: region.clone(),
            base: offset,
            data: offset + RING_META_BYTES,
            len,
        })
    }

    fn head(&self) -> &AtomicU32 {
        self.region.atomic_u32(self.base + HEAD_WORD)
    }

    fn tail(&self) -> &AtomicU32 {
        self.region.atomic_u32(self.base + TAIL_WORD)
    }

    fn flag(&self) -> &AtomicU32 {
        self.region.atomic_u32(self.base + FLAG_WORD)
    }

    /// Condition variable on the head word; signaled after reads.
    pub fn head_condvar(&self) -> ConditionVariable {
        ConditionVariable::new(self.region.clone(), self.base + HEAD_WORD)
    }

    /// Condition variable on the tail word; signaled after writes.
    pub fn tail_condvar(&self) -> ConditionVariable {
        ConditionVariable::new(self.region.clone(), self.base + TAIL_WORD)
    }

    /// Length of the data area; at most `data_len() - 1` bytes buffer.
    pub fn data_len(&self) -> usize {
        self.len
    }

    fn snapshot(&self) -> (usize, usize) {
        (
            self.head().load(Ordering::Acquire) as usize,
            self.tail().load(Ordering::Acquire) as usize,
        )
    }

    fn size_of(&self, head: usize, tail: usize) -> usize {
        if head == tail {
            0
        } else if tail < head {
            self.len - head + tail
        } else {
            tail - head
        }
    }

    /// Bytes currently buffered.
    pub fn size(&self) -> usize {
        let (head, tail) = self.snapshot();
        self.size_of(head, tail)
    }

    /// Bytes that can be written right now.
    pub fn capacity(&self) -> usize {
        self.len - self.size() - 1
    }

    pub fn is_empty(&self) -> bool {
        let (head, tail) = self.snapshot();
        head == tail
    }

    /// Single write attempt. Returns the bytes written: all of `data`,
    /// or 0 when the payload is empty, does not fit, or another writer
    /// held the flag.
    pub fn try_write(&self, data: &[u8]) -> usize {
        let len = data.len();
        let (head, tail) = self.snapshot();
        let capacity = self.len - self.size_of(head, tail) - 1;
        if len == 0 || len > capacity {
            return 0;
        }
        if self.flag().fetch_add(1, Ordering::AcqRel) != 0 {
            // Another writer is mid-flight; its release store of 0 also
            // clears this increment.
            return 0;
        }

        let first = len.min(self.len - tail);
        self.region.write_bytes(self.data + tail, &data[..first]);
        if first < len {
            self.region.write_bytes(self.data, &data[first..]);
        }

        let next = (tail + len) % self.len;
        self.tail().store(next as u32, Ordering::Release);
        self.flag().store(0, Ordering::Release);
        self.tail_condvar().notify_all();
        len
    }

    /// Single read attempt filling all of `dst`. Returns 0 when `dst` is
    /// empty, fewer bytes are buffered, or another reader won the head
    /// CAS.
    pub fn try_read(&self, dst: &mut [u8]) -> usize {
        let len = dst.len();
        let (head, tail) = self.snapshot();
        if len == 0 || self.size_of(head, tail) < len {
            return 0;
        }

        let first = len.min(self.len - head);
        self.region.read_bytes(self.data + head, &mut dst[..first]);
        if first < len {
            self.region.read_bytes(self.data, &mut dst[first..]);
        }

        let next = (head + len) % self.len;
        if self
            .head()
            .compare_exchange(head as u32, next as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.head_condvar().notify_all();
            len
        } else {
            0
        }
    }

    /// Copies `dst.len()` bytes starting `offset` bytes past the read
    /// cursor without advancing it. Returns 0 when not enough is
    /// buffered.
    pub fn peek(&self, dst: &mut [u8], offset: usize) -> usize {
        let len = dst.len();
        let (head, tail) = self.snapshot();
        if len == 0 || self.size_of(head, tail) < offset + len {
            return 0;
        }
        let start = (head + offset) % self.len;
        let first = len.min(self.len - start);
        self.region.read_bytes(self.data + start, &mut dst[..first]);
        if first < len {
            self.region.read_bytes(self.data, &mut dst[first..]);
        }
        len
    }

    /// `peek` at the read cursor.
    pub fn scan(&self, dst: &mut [u8]) -> usize {
        self.peek(dst, 0)
    }

    /// Blocking write. Returns the bytes written, or 0 once the timeout
    /// elapses (0 ms means one attempt).
    pub fn write(&self, data: &[u8], timeout_ms: u64) -> usize {
        // Oversized payloads can never fit; fail fast instead of parking.
        if data.is_empty() || data.len() > self.len - 1 {
            return 0;
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let written = self.try_write(data);
            if written > 0 {
                return written;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            if data.len() <= self.capacity() {
                // Space exists; we lost a flag or cursor race. Retry
                // immediately rather than parking.
                std::thread::yield_now();
                continue;
            }
            let head = self.head().load(Ordering::SeqCst);
            self.head_condvar()
                .wait(head, Some(deadline.duration_since(now)));
        }
    }

    /// Blocking read filling all of `dst`. Returns the bytes read, or 0
    /// once the timeout elapses.
    pub fn read(&self, dst: &mut [u8], timeout_ms: u64) -> usize {
        if dst.is_empty() || dst.len() > self.len - 1 {
            return 0;
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let read = self.try_read(dst);
            if read > 0 {
                return read;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            if dst.len() <= self.size() {
                // Data exists; we lost the head CAS to another reader.
                std::thread::yield_now();
                continue;
            }
            let tail = self.tail().load(Ordering::SeqCst);
            self.tail_condvar()
                .wait(tail, Some(deadline.duration_since(now)));
        }
    }

    /// Blocks until at least `wanted` bytes are visible or the timeout
    /// elapses. Returns whether the bytes are visible.
    pub fn sleep_until_readable(&self, wanted: usize, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.size() >= wanted {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let tail = self.tail().load(Ordering::SeqCst);
            self.tail_condvar()
                .wait(tail, Some(deadline.duration_since(now)));
        }
    }
}
