//! # Log Cursor
//!
//! A resumable iterator over the frames of a record log. Stepping either
//! yields a decoded record with its frame bounds, or reports that the
//! log has no complete frame past the current position.
//!
//! ## Suspension
//!
//! End of data is not an error and not the end of iteration: an append
//! log grows. A step that runs out of bytes returns
//! [`CursorStep::Pending`] carrying a wait handle hooked to the file's
//! watchers; the consumer waits and steps again. Suspension only ever
//! happens at frame boundaries. Wakeups may be spurious, so the step
//! re-reads and re-checks from the same position.
//!
//! ## Cancellation
//!
//! An [`AbortSignal`] stops the cursor at the next boundary. Aborting
//! signals any parked wait handle, so a blocked consumer observes the
//! abort promptly. Dropping the cursor unregisters its file watch.

use eyre::{bail, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use zerocopy::FromBytes;

use crate::config::FRAME_HEADER_BYTES;
use crate::log::stream::{FrameHeader, LogRegistry};
use crate::records::{lookup_by_id, Record, Schema};
use crate::storage::NativeFile;

pub(crate) struct Waiter {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl Waiter {
    fn new() -> Arc<Waiter> {
        Arc::new(Waiter {
            signaled: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub(crate) fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cv.notify_all();
    }

    fn arm(&self) {
        *self.signaled.lock() = false;
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match deadline {
                Some(d) => {
                    if self.cv.wait_until(&mut signaled, d).timed_out() {
                        break;
                    }
                }
                None => self.cv.wait(&mut signaled),
            }
        }
        *signaled
    }
}

/// Handle returned with [`CursorStep::Pending`]; wait on it, then step
/// the cursor again.
pub struct WaitHandle {
    waiter: Arc<Waiter>,
}

impl WaitHandle {
    /// Blocks until the underlying file changes, the cursor is aborted,
    /// or the timeout elapses. Returns whether a signal arrived.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.waiter.wait(timeout)
    }
}

/// Cooperative cancellation for cursors.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Default)]
struct AbortInner {
    flag: AtomicBool,
    waiters: Mutex<Vec<Weak<Waiter>>>,
}

impl AbortSignal {
    pub fn new() -> AbortSignal {
        AbortSignal::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Flags the abort and wakes every registered waiter so parked
    /// consumers observe it at their next step.
    pub fn abort(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        for weak in self.inner.waiters.lock().drain(..) {
            if let Some(waiter) = weak.upgrade() {
                waiter.signal();
            }
        }
    }

    fn register(&self, waiter: &Arc<Waiter>) {
        if self.is_aborted() {
            waiter.signal();
            return;
        }
        self.inner.waiters.lock().push(Arc::downgrade(waiter));
    }
}

pub enum CursorStep {
    /// One decoded record and its frame bounds.
    Ready { start: u64, record: Record, end: u64 },
    /// No complete frame yet; wait on the handle and step again.
    Pending(WaitHandle),
    /// The cursor was aborted.
    Done,
}

pub struct Cursor {
    native: Box<dyn NativeFile>,
    registry: Arc<RwLock<LogRegistry>>,
    pos: u64,
    filters: Vec<FilterFn>,
    abort: Option<AbortSignal>,
    waiter: Arc<Waiter>,
    watch_token: Option<u64>,
}

type FilterFn = Box<dyn Fn(&Arc<Schema>, u64, u64) -> bool + Send>;

impl Cursor {
    pub(crate) fn new(
        native: Box<dyn NativeFile>,
        registry: Arc<RwLock<LogRegistry>>,
        pos: u64,
        abort: Option<AbortSignal>,
    ) -> Cursor {
        let waiter = Waiter::new();
        if let Some(signal) = &abort {
            signal.register(&waiter);
        }
        Cursor {
            native,
            registry,
            pos,
            filters: Vec::new(),
            abort,
            waiter,
            watch_token: None,
        }
    }

    /// Byte offset of the next frame boundary.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Adds a frame predicate; frames any predicate rejects are skipped
    /// without decoding.
    pub fn filter(
        mut self,
        pred: impl Fn(&Arc<Schema>, u64, u64) -> bool + Send + 'static,
    ) -> Cursor {
        self.filters.push(Box::new(pred));
        self
    }

    pub fn next_step(&mut self) -> Result<CursorStep> {
        self.step(&mut |_, _, _| true)
    }

    /// One step with an extra per-call predicate (replay routes the
    /// projection's `matches` through here).
    pub(crate) fn step(
        &mut self,
        extra: &mut dyn FnMut(&Arc<Schema>, u64, u64) -> bool,
    ) -> Result<CursorStep> {
        loop {
            if self.aborted() {
                return Ok(CursorStep::Done);
            }
            let start = self.pos;

            let header_bytes = self.native.peek(FRAME_HEADER_BYTES, start)?;
            if header_bytes.len() < FRAME_HEADER_BYTES {
                match self.pend(start + FRAME_HEADER_BYTES as u64)? {
                    Some(step) => return Ok(step),
                    None => continue,
                }
            }
            let header = FrameHeader::read_from_bytes(&header_bytes)
                .map_err(|_| eyre::eyre!("malformed frame header at offset {}", start))?;
            let schema_id = header.schema_id();
            let body_len = header.body_len() as u64;
            let schema_len = header.schema_len() as u64;
            let mut off = start + FRAME_HEADER_BYTES as u64;

            let schema = if schema_len > 0 {
                match self.known(schema_id) {
                    // Re-registration of an already established schema;
                    // skip the blob.
                    Some(schema) => {
                        off += schema_len;
                        schema
                    }
                    None => {
                        let blob = self.native.peek(schema_len as usize, off)?;
                        if blob.len() < schema_len as usize {
                            match self.pend(off + schema_len)? {
                                Some(step) => return Ok(step),
                                None => continue,
                            }
                        }
                        let json = std::str::from_utf8(&blob).map_err(|e| {
                            eyre::eyre!("schema JSON at offset {} is not UTF-8: {}", off, e)
                        })?;
                        let schema = Schema::from_json(json)?;
                        self.registry
                            .write()
                            .by_id
                            .insert(schema_id, schema.clone());
                        off += schema_len;
                        schema
                    }
                }
            } else {
                match self.known(schema_id).or_else(|| lookup_by_id(schema_id)) {
                    Some(schema) => {
                        self.registry
                            .write()
                            .by_id
                            .entry(schema_id)
                            .or_insert_with(|| schema.clone());
                        schema
                    }
                    None => bail!(
                        "unknown schema id {:#018x} at offset {}",
                        schema_id,
                        start
                    ),
                }
            };
            let end = off + body_len;

            let pass =
                self.filters.iter().all(|f| f(&schema, start, end)) && extra(&schema, start, end);
            if !pass {
                // Skip without decoding, but never past a torn tail.
                if self.native.stat_sync()?.size < end {
                    match self.pend(end)? {
                        Some(step) => return Ok(step),
                        None => continue,
                    }
                }
                self.pos = end;
                continue;
            }

            let body = self.native.peek(body_len as usize, off)?;
            if body.len() < body_len as usize {
                match self.pend(end)? {
                    Some(step) => return Ok(step),
                    None => continue,
                }
            }
            let record = Record::from_bytes(&schema, body)?;
            self.pos = end;
            return Ok(CursorStep::Ready { start, record, end });
        }
    }

    fn known(&self, schema_id: u64) -> Option<Arc<Schema>> {
        self.registry.read().by_id.get(&schema_id).cloned()
    }

    /// Arms the waiter before re-checking availability, so a write
    /// landing between the short peek and the arm is never lost. Returns
    /// None when the data arrived in that window and the step should
    /// retry immediately.
    fn pend(&mut self, required_end: u64) -> Result<Option<CursorStep>> {
        if self.aborted() {
            return Ok(Some(CursorStep::Done));
        }
        self.ensure_watch()?;
        self.waiter.arm();
        if self.native.stat_sync()?.size >= required_end {
            return Ok(None);
        }
        Ok(Some(CursorStep::Pending(WaitHandle {
            waiter: self.waiter.clone(),
        })))
    }

    fn ensure_watch(&mut self) -> Result<()> {
        if self.watch_token.is_none() {
            let waiter = self.waiter.clone();
            let token = self.native.watch(Arc::new(move || waiter.signal()))?;
            self.watch_token = Some(token);
        }
        Ok(())
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|a| a.is_aborted())
    }

    /// Steps until a record arrives, the timeout elapses (None), or the
    /// cursor is aborted (None).
    pub fn next_blocking(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<(u64, Record, u64)>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.next_step()? {
                CursorStep::Ready { start, record, end } => return Ok(Some((start, record, end))),
                CursorStep::Done => return Ok(None),
                CursorStep::Pending(wait) => {
                    let remaining = match deadline {
                        Some(d) => {
                            let now = Instant::now();
                            if now >= d {
                                return Ok(None);
                            }
                            Some(d - now)
                        }
                        None => None,
                    };
                    wait.wait(remaining);
                }
            }
        }
    }

    /// Yields every record available right now, stopping at the first
    /// pending-data signal.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { cursor: self }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(token) = self.watch_token.take() {
            let _ = self.native.unwatch(token);
        }
    }
}

pub struct Drain<'a> {
    cursor: &'a mut Cursor,
}

impl Iterator for Drain<'_> {
    type Item = Result<(u64, Record, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.next_step() {
            Ok(CursorStep::Ready { start, record, end }) => Some(Ok((start, record, end))),
            Ok(CursorStep::Pending(_)) | Ok(CursorStep::Done) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
