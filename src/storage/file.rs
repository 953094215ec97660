//! # File-Backed Native Handle
//!
//! A [`NativeFile`] over a pooled OS descriptor. All handles to one path
//! share the pool entry, so they see each other's writes, share the
//! block cache, and wake each other's watchers. Reads go through the
//! SIEVE block cache; only complete blocks are cached and every write
//! invalidates from the old end of file (the previously partial tail
//! block).

use eyre::{Result, WrapErr};
use std::io::{IoSlice, Write};
use std::path::Path;
use std::sync::Arc;

use crate::config::{BLOCK_SIZE, DEFAULT_BLOCK_CACHE_BYTES};
use crate::storage::native::{FileStat, NativeFile, WatchCallback};
use crate::storage::pool::{checkout, PoolEntry};

pub struct FileBacked {
    entry: Arc<PoolEntry>,
}

impl FileBacked {
    /// Opens (creating if missing) with the default read-cache budget.
    pub fn open(path: &Path) -> Result<FileBacked> {
        FileBacked::open_with_cache(path, DEFAULT_BLOCK_CACHE_BYTES)
    }

    /// Opens with a caller-sized read cache. The cache is shared by
    /// every handle to `path`; the budget applies on first checkout.
    pub fn open_with_cache(path: &Path, cache_bytes: usize) -> Result<FileBacked> {
        let entry = checkout(path, cache_bytes);
        // Touch the descriptor so creation errors surface at open.
        entry.with_file(|_| Ok(()))?;
        Ok(FileBacked { entry })
    }
}

impl std::fmt::Debug for FileBacked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBacked").finish_non_exhaustive()
    }
}

fn read_full_at(file: &std::fs::File, buf: &mut [u8], position: u64) -> Result<usize> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        let mut done = 0;
        while done < buf.len() {
            let got = file
                .read_at(&mut buf[done..], position + done as u64)
                .wrap_err("positioned read failed")?;
            if got == 0 {
                break;
            }
            done += got;
        }
        Ok(done)
    }
    #[cfg(not(unix))]
    {
        compile_error!("file-backed logs require a unix platform; use MemFile elsewhere");
    }
}

impl NativeFile for FileBacked {
    fn writev_sync(&mut self, bufs: &[&[u8]]) -> Result<usize> {
        let (wrote, old_len) = self.entry.with_file(|f| {
            let old_len = f.metadata().wrap_err("stat before write failed")?.len();
            let slices: Vec<IoSlice<'_>> = bufs.iter().map(|b| IoSlice::new(b)).collect();
            let wrote = f.write_vectored(&slices).wrap_err("gather write failed")?;
            f.flush().wrap_err("flush failed")?;
            Ok((wrote, old_len))
        })?;
        self.entry.cache.lock().invalidate_from(old_len);
        self.entry.fire_watchers();
        Ok(wrote)
    }

    fn write_sync(&mut self, buf: &[u8]) -> Result<usize> {
        let (wrote, old_len) = self.entry.with_file(|f| {
            let old_len = f.metadata().wrap_err("stat before write failed")?.len();
            let wrote = f.write(buf).wrap_err("append write failed")?;
            f.flush().wrap_err("flush failed")?;
            Ok((wrote, old_len))
        })?;
        self.entry.cache.lock().invalidate_from(old_len);
        self.entry.fire_watchers();
        Ok(wrote)
    }

    fn read_sync(&mut self, buf: &mut [u8], position: u64) -> Result<usize> {
        let len = buf.len();
        let mut done = 0usize;
        while done < len {
            let abs = position + done as u64;
            let block_no = abs / BLOCK_SIZE as u64;
            let within = (abs % BLOCK_SIZE as u64) as usize;
            let want = (len - done).min(BLOCK_SIZE - within);

            let hit = {
                let mut cache = self.entry.cache.lock();
                match cache.get(block_no) {
                    Some(block) => {
                        buf[done..done + want].copy_from_slice(&block[within..within + want]);
                        true
                    }
                    None => false,
                }
            };
            if hit {
                done += want;
                continue;
            }

            let mut block = vec![0u8; BLOCK_SIZE];
            let got = self
                .entry
                .with_file(|f| read_full_at(f, &mut block, block_no * BLOCK_SIZE as u64))?;
            if got == BLOCK_SIZE {
                self.entry.cache.lock().insert(block_no, block.clone());
            }
            let take = want.min(got.saturating_sub(within));
            buf[done..done + take].copy_from_slice(&block[within..within + take]);
            done += take;
            if take < want {
                break;
            }
        }
        Ok(done)
    }

    fn watch(&mut self, callback: WatchCallback) -> Result<u64> {
        Ok(self.entry.add_watcher(callback))
    }

    fn unwatch(&mut self, token: u64) -> Result<()> {
        self.entry.remove_watcher(token);
        Ok(())
    }

    fn stat_sync(&self) -> Result<FileStat> {
        let size = self
            .entry
            .with_file(|f| f.metadata().wrap_err("stat failed").map(|m| m.len()))?;
        Ok(FileStat { size })
    }

    fn close_sync(&mut self) -> Result<()> {
        self.entry.close()
    }

    fn clone_handle(&self) -> Result<Box<dyn NativeFile>> {
        Ok(Box::new(FileBacked {
            entry: self.entry.clone(),
        }))
    }
}
