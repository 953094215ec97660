//! # Projection Hook
//!
//! Application state materialized from a record log. The log calls
//! `matches` to decide whether a frame concerns the projection, and
//! `handle` for each matched record: during replay on open (before any
//! live write) and synchronously after every successful write, in write
//! order.
//!
//! `handle` runs on the writing thread. It must be cheap and must not
//! call back into the log.

use std::sync::Arc;

use crate::records::{Record, Schema};

pub trait Projection: Send {
    /// Whether a frame of this schema at `[start, end)` should be
    /// decoded and handed over. Defaults to everything.
    fn matches(&self, _schema: &Arc<Schema>, _start: u64, _end: u64) -> bool {
        true
    }

    /// Applies one matched record.
    fn handle(&mut self, record: &Record, start: u64, end: u64);
}
