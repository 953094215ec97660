//! # Futex-Style Condition Variable
//!
//! A 32-bit word in a shared region plus park/wake keyed by the word's
//! address. `wait(expect, timeout)` parks the calling thread only while
//! the word still holds `expect` (checked again under the parking lot's
//! bucket lock, so a notify between the caller's load and the park is
//! never lost). Wakeups are best-effort: callers re-validate state after
//! returning, exactly as with a raw futex.
//!
//! Parked threads are woken in-process only. A peer in another process
//! that mutates the word is still observed by any bounded wait when it
//! expires, so cross-process callers degrade to polling.

use parking_lot_core::{ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ring::region::SharedRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Another thread issued a notify while we were parked.
    Notified,
    /// The word no longer held the expected value.
    ValueMismatch,
    /// The timeout elapsed without a notify.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ConditionVariable {
    region: Arc<SharedRegion>,
    offset: usize,
}

impl ConditionVariable {
    pub(crate) fn new(region: Arc<SharedRegion>, offset: usize) -> ConditionVariable {
        ConditionVariable { region, offset }
    }

    fn word(&self) -> &AtomicU32 {
        self.region.atomic_u32(self.offset)
    }

    fn key(&self) -> usize {
        self.word() as *const AtomicU32 as usize
    }

    /// Current value of the underlying word.
    pub fn value(&self) -> u32 {
        self.word().load(Ordering::SeqCst)
    }

    /// Parks until notified, until the word stops holding `expect`, or
    /// until `timeout` elapses (`None` waits indefinitely).
    pub fn wait(&self, expect: u32, timeout: Option<Duration>) -> WaitOutcome {
        if self.word().load(Ordering::SeqCst) != expect {
            return WaitOutcome::ValueMismatch;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let validate = || self.word().load(Ordering::SeqCst) == expect;
        // SAFETY: the key is a live address for the lifetime of the
        // region Arc held by self, and validate/timed_out do not panic.
        let result = unsafe {
            parking_lot_core::park(
                self.key(),
                validate,
                || {},
                |_, _| {},
                DEFAULT_PARK_TOKEN,
                deadline,
            )
        };
        match result {
            ParkResult::Unparked(_) => WaitOutcome::Notified,
            ParkResult::Invalid => WaitOutcome::ValueMismatch,
            ParkResult::TimedOut => WaitOutcome::TimedOut,
        }
    }

    pub fn notify_one(&self) {
        // SAFETY: key addresses live memory; see wait().
        unsafe {
            parking_lot_core::unpark_one(self.key(), |_| DEFAULT_UNPARK_TOKEN);
        }
    }

    pub fn notify_all(&self) {
        // SAFETY: key addresses live memory; see wait().
        unsafe {
            parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
        }
    }
}
