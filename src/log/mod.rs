//! # Append-Only Record Log
//!
//! Persistence for records: an append-only file of self-describing
//! frames, a projection replayed on open to rebuild application state,
//! and resumable cursors that follow the file as it grows.
//!
//! ```text
//! writer ── write_many_sync ──> RecordLog ──> NativeFile (one handle)
//!                                  │
//!                                  ├── Projection (replay + post-write)
//!                                  └── shared schema registry
//!                                         ▲
//! readers ── next_step/drain ──── Cursor ─┘  (own handle each)
//! ```
//!
//! The log itself is single-threaded per instance. Any number of
//! cursors may follow the same file concurrently, each over its own
//! native handle.

pub mod cursor;
pub mod projection;
pub mod stream;

pub use cursor::{AbortSignal, Cursor, CursorStep, Drain, WaitHandle};
pub use projection::Projection;
pub use stream::RecordLog;
