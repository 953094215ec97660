//! # flatkit - Zero-Copy Records, Shared-Memory Transports, Append Logs
//!
//! flatkit is a memory-and-storage toolkit built around one idea: a
//! record is a flat byte buffer with a schema-computed layout, and that
//! same buffer moves untouched between collections, threads, and files.
//!
//! - **Zero-copy records**: schema-driven accessors read and write a
//!   contiguous buffer in place; no serialization step, no per-field
//!   heap traffic
//! - **Lock-free transports**: a byte ring buffer, packet framing, and a
//!   typed slot queue over shared memory, coordinated only by atomics
//!   and futex-style park/wake
//! - **Append-only persistence**: a record log with schema
//!   deduplication, projection replay on open, and cursors that follow
//!   the file as it grows
//!
//! ## Quick Start
//!
//! ```ignore
//! use flatkit::records::{FieldDef, Record, Schema};
//! use flatkit::types::{FieldType, Value};
//! use flatkit::log::RecordLog;
//!
//! let schema = Schema::intern(
//!     Some("Event"),
//!     vec![
//!         FieldDef::new("seq", FieldType::BigUint64),
//!         FieldDef::new("msg", FieldType::Utf8),
//!     ],
//! )?;
//!
//! let mut log = RecordLog::open_path("./events.log".as_ref(), None)?;
//! log.write_one_sync(&Record::with_values(
//!     &schema,
//!     &[("seq", Value::U64(1)), ("msg", Value::str("hello"))],
//! )?)?;
//!
//! for entry in log.cursor()?.drain() {
//!     let (start, record, end) = entry?;
//!     println!("{start}..{end}: {}", record.get_str("msg")?);
//! }
//! ```
//!
//! ## Architecture
//!
//! Data flows leaves-first: primitive codecs feed the record codec,
//! whose buffers feed everything above.
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  FlatList / FlatSet   RecordLog + Cursor        │
//! │  (packed collections) (persistence + replay)    │
//! ├───────────────────────┬─────────────────────────┤
//! │  PacketStream / Queue │  NativeFile             │
//! │  RingBuffer           │  (FileBacked | MemFile) │
//! │  (shared memory)      │  + fd pool, block cache │
//! ├───────────────────────┴─────────────────────────┤
//! │        Record / RecordView (zero-copy codec)    │
//! ├─────────────────────────────────────────────────┤
//! │   Schema (layout, interning, 64-bit identity)   │
//! ├─────────────────────────────────────────────────┤
//! │     FieldType / Value (LE scalar codecs)        │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! The record codec and flat collections are single-threaded; share
//! them behind your own synchronization. The ring transports are built
//! for true parallelism across OS threads sharing a region. The record
//! log is single-threaded per instance, but any number of cursors can
//! follow one file concurrently, each over its own handle.
//!
//! ## Module Overview
//!
//! - [`types`]: primitive field types, `Value`, small-float codecs
//! - [`records`]: schemas, interning, records and their views
//! - [`flat`]: packed FlatList / FlatSet collections
//! - [`ring`]: shared region, ring buffer, packets, queue, condvars
//! - [`storage`]: native file handles, descriptor pool, block cache
//! - [`log`]: append-only record log, projections, cursors
//! - [`config`]: wire-format and resource constants

pub mod config;
pub mod flat;
pub mod log;
pub mod records;
pub mod ring;
pub mod storage;
pub mod types;

pub use flat::{FlatList, FlatSet};
pub use log::{AbortSignal, Cursor, CursorStep, Projection, RecordLog};
pub use records::{FieldDef, Record, RecordMut, RecordView, Schema};
pub use ring::{ConditionVariable, PacketStream, Queue, RingBuffer, SharedRegion};
pub use storage::{FileBacked, MemFile, NativeFile};
pub use types::{FieldType, Value};
