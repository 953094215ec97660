//! # Native File Contract
//!
//! The handle surface the append log consumes. Two implementations
//! exist: [`FileBacked`](crate::storage::FileBacked) over pooled OS
//! descriptors and [`MemFile`](crate::storage::MemFile) over an
//! in-memory buffer. Both are append-oriented: `write_sync` and
//! `writev_sync` add bytes at the end; reads are positioned and never
//! move a cursor.
//!
//! `writev_sync` performs exactly one gather write and reports the
//! count the OS returned. Callers detect short writes; the handle never
//! retries silently, because a partially persisted batch must surface
//! as an error upstream.

use eyre::Result;
use std::sync::Arc;

pub type WatchCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
}

pub trait NativeFile: Send {
    /// One gather write appending all buffers; returns bytes written,
    /// which may be short.
    fn writev_sync(&mut self, bufs: &[&[u8]]) -> Result<usize>;

    /// Appends one buffer; returns bytes written.
    fn write_sync(&mut self, buf: &[u8]) -> Result<usize>;

    /// Positioned read; returns the bytes copied, 0 at end of data.
    fn read_sync(&mut self, buf: &mut [u8], position: u64) -> Result<usize>;

    /// Copies up to `len` bytes at `position` without any cursor.
    fn peek(&mut self, len: usize, position: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let got = self.read_sync(&mut buf, position)?;
        buf.truncate(got);
        Ok(buf)
    }

    /// Registers a callback fired after every write through any handle
    /// to the same backing store. Returns an unsubscribe token.
    fn watch(&mut self, callback: WatchCallback) -> Result<u64>;

    fn unwatch(&mut self, token: u64) -> Result<()>;

    fn stat_sync(&self) -> Result<FileStat>;

    fn close_sync(&mut self) -> Result<()>;

    /// An independent handle over the same backing store, sharing
    /// content and watchers.
    fn clone_handle(&self) -> Result<Box<dyn NativeFile>>;
}
