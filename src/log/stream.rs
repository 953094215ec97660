//! # Append-Only Record Log
//!
//! A persistent log of records on a single native handle. Records of any
//! schema interleave freely; each schema's JSON is embedded the first
//! time it appears in the file and referenced by its 64-bit id after
//! that.
//!
//! ## Frame Format
//!
//! ```text
//! +------------------+------------------+------------------+
//! | Frame Header     | Schema JSON      | Record Body      |
//! | (16 bytes)       | (iff first use)  | (body_len bytes) |
//! +------------------+------------------+------------------+
//! ```
//!
//! The frame header (little-endian, zerocopy layout):
//! - `schema_id: u64`: first 8 bytes of SHA-256 over the canonical JSON
//! - `body_len: u32`: record buffer length
//! - `schema_len: u32`: schema JSON length, 0 once established
//!
//! ## Write Protocol
//!
//! A batch becomes one gather write: headers, first-sight schema blobs,
//! and bodies in frame order, issued as a single `writev_sync`. A short
//! count is an error and the in-memory write position does not advance;
//! partial persistence is never reported as success. After a full
//! write the projection sees each matched record, in order, on the
//! writing thread.
//!
//! ## Replay
//!
//! Opening replays the existing file through a cursor at offset 0. Every
//! complete frame advances the recovered write position whether or not
//! the projection matches it; matched frames are decoded and handed to
//! the projection. Replay stops at the first pending-data signal, so a
//! torn tail is simply never entered.

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::path::Path;
use std::sync::Arc;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{COPY_CHUNK_BYTES, FRAME_HEADER_BYTES};
use crate::log::cursor::{AbortSignal, Cursor, CursorStep};
use crate::log::projection::Projection;
use crate::records::{Record, Schema};
use crate::storage::{FileBacked, MemFile, NativeFile};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub(crate) struct FrameHeader {
    schema_id: U64,
    body_len: U32,
    schema_len: U32,
}

impl FrameHeader {
    fn new(schema_id: u64, body_len: u32, schema_len: u32) -> FrameHeader {
        FrameHeader {
            schema_id: U64::new(schema_id),
            body_len: U32::new(body_len),
            schema_len: U32::new(schema_len),
        }
    }

    pub(crate) fn schema_id(&self) -> u64 {
        self.schema_id.get()
    }

    pub(crate) fn body_len(&self) -> u32 {
        self.body_len.get()
    }

    pub(crate) fn schema_len(&self) -> u32 {
        self.schema_len.get()
    }
}

/// Schema ids established in this log, shared with its cursors.
#[derive(Default)]
pub(crate) struct LogRegistry {
    pub(crate) by_id: HashMap<u64, Arc<Schema>>,
}

pub struct RecordLog {
    native: Box<dyn NativeFile>,
    registry: Arc<RwLock<LogRegistry>>,
    projection: Option<Box<dyn Projection>>,
    write_pos: u64,
}

impl RecordLog {
    /// Opens over a native handle and replays existing content.
    pub fn open(
        native: Box<dyn NativeFile>,
        projection: Option<Box<dyn Projection>>,
    ) -> Result<RecordLog> {
        let mut log = RecordLog {
            native,
            registry: Arc::new(RwLock::new(LogRegistry::default())),
            projection,
            write_pos: 0,
        };
        log.replay()?;
        Ok(log)
    }

    /// Opens a file-backed log at `path`.
    pub fn open_path(path: &Path, projection: Option<Box<dyn Projection>>) -> Result<RecordLog> {
        RecordLog::open(Box::new(FileBacked::open(path)?), projection)
    }

    /// Opens a log over an in-memory buffer.
    pub fn in_memory(projection: Option<Box<dyn Projection>>) -> Result<RecordLog> {
        RecordLog::open(Box::new(MemFile::new()), projection)
    }

    fn replay(&mut self) -> Result<()> {
        let mut cursor = Cursor::new(self.native.clone_handle()?, self.registry.clone(), 0, None);
        let mut frames = 0usize;
        loop {
            let step = {
                let projection = &self.projection;
                cursor.step(&mut |schema, start, end| {
                    projection
                        .as_ref()
                        .map_or(true, |p| p.matches(schema, start, end))
                })?
            };
            match step {
                CursorStep::Ready { start, record, end } => {
                    self.write_pos = end;
                    frames += 1;
                    if let Some(projection) = self.projection.as_mut() {
                        projection.handle(&record, start, end);
                    }
                }
                CursorStep::Pending(_) | CursorStep::Done => {
                    // Skipped frames advanced the cursor too; its
                    // position is the end of the last complete frame.
                    self.write_pos = self.write_pos.max(cursor.position());
                    break;
                }
            }
        }
        tracing::debug!(frames, write_pos = self.write_pos, "log replay complete");
        Ok(())
    }

    /// Next byte offset a write would occupy.
    pub fn write_position(&self) -> u64 {
        self.write_pos
    }

    pub fn write_one_sync(&mut self, record: &Record) -> Result<()> {
        self.write_many_sync(std::slice::from_ref(record))
    }

    /// Persists a batch of records as one gather write.
    pub fn write_many_sync(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        struct Plan<'a> {
            header: FrameHeader,
            schema_json: Option<&'a [u8]>,
            body: &'a [u8],
        }

        let mut plans: SmallVec<[Plan<'_>; 8]> = SmallVec::new();
        {
            // First sight of a schema id embeds its JSON; the registry
            // learns the mapping before the write commits.
            let mut registry = self.registry.write();
            for record in records {
                let schema = record.schema();
                let id = schema.id();
                let schema_json = if registry.by_id.contains_key(&id) {
                    None
                } else {
                    registry.by_id.insert(id, schema.clone());
                    Some(schema.canonical_json().as_bytes())
                };
                let body = record.as_bytes();
                plans.push(Plan {
                    header: FrameHeader::new(
                        id,
                        body.len() as u32,
                        schema_json.map_or(0, |json| json.len() as u32),
                    ),
                    schema_json,
                    body,
                });
            }
        }

        let mut bufs: SmallVec<[&[u8]; 24]> = SmallVec::new();
        let mut total = 0usize;
        for plan in &plans {
            bufs.push(plan.header.as_bytes());
            total += FRAME_HEADER_BYTES;
            if let Some(json) = plan.schema_json {
                bufs.push(json);
                total += json.len();
            }
            bufs.push(plan.body);
            total += plan.body.len();
        }

        let wrote = self.native.writev_sync(&bufs)?;
        if wrote != total {
            tracing::warn!(wrote, expected = total, "log batch short write");
        }
        ensure!(
            wrote == total,
            "short write: wrote {} of {} bytes",
            wrote,
            total
        );

        let mut pos = self.write_pos;
        self.write_pos += total as u64;
        for (record, plan) in records.iter().zip(&plans) {
            let frame_len = FRAME_HEADER_BYTES
                + plan.schema_json.map_or(0, |json| json.len())
                + plan.body.len();
            let start = pos;
            let end = pos + frame_len as u64;
            pos = end;
            if let Some(projection) = self.projection.as_mut() {
                if projection.matches(record.schema(), start, end) {
                    projection.handle(record, start, end);
                }
            }
        }
        Ok(())
    }

    /// Cursor over the whole log.
    pub fn cursor(&self) -> Result<Cursor> {
        self.cursor_at(0)
    }

    /// Cursor resuming at a frame boundary previously returned as an
    /// `end` position.
    pub fn cursor_at(&self, position: u64) -> Result<Cursor> {
        Ok(Cursor::new(
            self.native.clone_handle()?,
            self.registry.clone(),
            position,
            None,
        ))
    }

    /// Cursor with cooperative cancellation.
    pub fn cursor_with(&self, position: u64, abort: AbortSignal) -> Result<Cursor> {
        Ok(Cursor::new(
            self.native.clone_handle()?,
            self.registry.clone(),
            position,
            Some(abort),
        ))
    }

    /// Streams this log's bytes into `target`'s native handle, stopping
    /// at the first pending-data signal. The target reflects the copied
    /// frames after its next reopen. Returns bytes transferred.
    pub fn copy_to(&mut self, target: &mut RecordLog) -> Result<u64> {
        let mut buf = vec![0u8; COPY_CHUNK_BYTES];
        let mut pos = 0u64;
        loop {
            let got = self.native.read_sync(&mut buf, pos)?;
            if got == 0 {
                break;
            }
            let wrote = target.native.write_sync(&buf[..got])?;
            ensure!(
                wrote == got,
                "short write: wrote {} of {} bytes",
                wrote,
                got
            );
            target.write_pos += wrote as u64;
            pos += got as u64;
        }
        Ok(pos)
    }

    /// Closes the underlying handle. Further operations reopen pooled
    /// files transparently; in-memory logs are unaffected.
    pub fn close(&mut self) -> Result<()> {
        self.native.close_sync()
    }
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog")
            .field("write_pos", &self.write_pos)
            .finish_non_exhaustive()
    }
}
