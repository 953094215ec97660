//! # File Descriptor Pool
//!
//! A process-wide pool of open descriptors keyed by `(path, flags)`.
//! Opening past the cap (`max(1, 1024 / cpu_count)`) syncs and closes
//! the least-recently-used descriptor; the pool entry survives eviction
//! so watchers and the block cache persist, and the descriptor is
//! reopened on the next use.
//!
//! Watchers live on the entry rather than on individual handles: every
//! handle to a path shares them, so a write through any handle wakes
//! cursors holding their own handles to the same file.

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::fd_pool_cap;
use crate::storage::block_cache::BlockCache;
use crate::storage::native::WatchCallback;

/// Open flags for append-log files: read anywhere, append at the end.
pub(crate) const APPEND_FLAGS: &str = "a+";

type PoolKey = (PathBuf, &'static str);

pub(crate) struct PoolEntry {
    key: PoolKey,
    file: Mutex<Option<File>>,
    pub(crate) cache: Mutex<BlockCache>,
    watchers: Mutex<HashMap<u64, WatchCallback>>,
    next_token: AtomicU64,
}

struct FdPool {
    entries: HashMap<PoolKey, Arc<PoolEntry>>,
    use_ticks: HashMap<PoolKey, u64>,
    tick: u64,
}

fn pool() -> &'static Mutex<FdPool> {
    static POOL: OnceLock<Mutex<FdPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        Mutex::new(FdPool {
            entries: HashMap::new(),
            use_ticks: HashMap::new(),
            tick: 0,
        })
    })
}

/// Returns the shared entry for `path`, creating it on first sight.
pub(crate) fn checkout(path: &Path, cache_bytes: usize) -> Arc<PoolEntry> {
    let key = (path.to_path_buf(), APPEND_FLAGS);
    let mut pool = pool().lock();
    pool.entries
        .entry(key.clone())
        .or_insert_with(|| {
            Arc::new(PoolEntry {
                key,
                file: Mutex::new(None),
                cache: Mutex::new(BlockCache::new(cache_bytes)),
                watchers: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
            })
        })
        .clone()
}

impl PoolEntry {
    fn open_file(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.key.0)
            .wrap_err_with(|| format!("failed to open {:?}", self.key.0))
    }

    /// Runs `op` with the open descriptor, reopening after an eviction,
    /// then records the use (which may evict other entries).
    pub(crate) fn with_file<T>(&self, op: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let result = {
            let mut guard = self.file.lock();
            if guard.is_none() {
                *guard = Some(self.open_file()?);
            }
            let file = guard.as_mut().expect("descriptor just ensured");
            op(file)
        };
        note_use(&self.key);
        result
    }

    /// Syncs and closes the descriptor, keeping the entry alive.
    pub(crate) fn close(&self) -> Result<()> {
        let mut guard = self.file.lock();
        if let Some(file) = guard.take() {
            file.sync_all()
                .wrap_err_with(|| format!("failed to sync {:?} before close", self.key.0))?;
        }
        Ok(())
    }

    pub(crate) fn add_watcher(&self, callback: WatchCallback) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.watchers.lock().insert(token, callback);
        token
    }

    pub(crate) fn remove_watcher(&self, token: u64) {
        self.watchers.lock().remove(&token);
    }

    pub(crate) fn fire_watchers(&self) {
        let callbacks: Vec<WatchCallback> = self.watchers.lock().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

/// Marks `key` as most recently used and evicts past the cap.
fn note_use(key: &PoolKey) {
    let cap = fd_pool_cap();
    let mut pool = pool().lock();
    pool.tick += 1;
    let tick = pool.tick;
    pool.use_ticks.insert(key.clone(), tick);

    // Collect currently open entries, oldest first. try_lock skips
    // entries mid-operation; they are in use and not eviction targets.
    let mut open: Vec<(u64, Arc<PoolEntry>)> = pool
        .entries
        .iter()
        .filter_map(|(k, entry)| {
            if k == key {
                return None;
            }
            let guard = entry.file.try_lock()?;
            if guard.is_some() {
                Some((pool.use_ticks.get(k).copied().unwrap_or(0), entry.clone()))
            } else {
                None
            }
        })
        .collect();
    drop(pool);

    if open.len() + 1 <= cap {
        return;
    }
    open.sort_by_key(|(tick, _)| *tick);
    let excess = open.len() + 1 - cap;
    for (_, entry) in open.into_iter().take(excess) {
        tracing::trace!(path = ?entry.key.0, "evicting pooled descriptor");
        let mut guard = entry.file.lock();
        if let Some(file) = guard.take() {
            if let Err(err) = file.sync_all() {
                tracing::warn!(path = ?entry.key.0, %err, "sync failed during eviction");
            }
        }
    }
}
