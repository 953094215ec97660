//! # In-Memory Native File
//!
//! Buffers bytes in memory and fires watchers after each write. Clones
//! share content and watchers, which makes this the emulation backend
//! for tests and for logs that never touch disk.

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::storage::native::{FileStat, NativeFile, WatchCallback};

#[derive(Default)]
struct MemInner {
    data: Mutex<Vec<u8>>,
    watchers: Mutex<HashMap<u64, WatchCallback>>,
    next_token: AtomicU64,
}

impl MemInner {
    fn fire_watchers(&self) {
        // Snapshot under the lock, invoke outside it: a watcher may
        // re-enter this file (a cursor re-peeking, for instance).
        let callbacks: Vec<WatchCallback> = self.watchers.lock().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

#[derive(Clone, Default)]
pub struct MemFile {
    inner: Arc<MemInner>,
}

impl MemFile {
    pub fn new() -> MemFile {
        MemFile::default()
    }

    pub fn with_content(bytes: Vec<u8>) -> MemFile {
        let file = MemFile::new();
        *file.inner.data.lock() = bytes;
        file
    }

    /// Snapshot of the current content.
    pub fn content(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }
}

impl std::fmt::Debug for MemFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFile")
            .field("len", &self.inner.data.lock().len())
            .finish()
    }
}

impl NativeFile for MemFile {
    fn writev_sync(&mut self, bufs: &[&[u8]]) -> Result<usize> {
        let mut total = 0;
        {
            let mut data = self.inner.data.lock();
            for buf in bufs {
                data.extend_from_slice(buf);
                total += buf.len();
            }
        }
        self.inner.fire_watchers();
        Ok(total)
    }

    fn write_sync(&mut self, buf: &[u8]) -> Result<usize> {
        self.writev_sync(&[buf])
    }

    fn read_sync(&mut self, buf: &mut [u8], position: u64) -> Result<usize> {
        let data = self.inner.data.lock();
        let position = position as usize;
        if position >= data.len() {
            return Ok(0);
        }
        let take = buf.len().min(data.len() - position);
        buf[..take].copy_from_slice(&data[position..position + take]);
        Ok(take)
    }

    fn watch(&mut self, callback: WatchCallback) -> Result<u64> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers.lock().insert(token, callback);
        Ok(token)
    }

    fn unwatch(&mut self, token: u64) -> Result<()> {
        self.inner.watchers.lock().remove(&token);
        Ok(())
    }

    fn stat_sync(&self) -> Result<FileStat> {
        Ok(FileStat {
            size: self.inner.data.lock().len() as u64,
        })
    }

    fn close_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn clone_handle(&self) -> Result<Box<dyn NativeFile>> {
        Ok(Box::new(self.clone()))
    }
}
