//! # Shared Memory Region
//!
//! The backing store every ring-buffer transport operates over. The
//! region is caller-supplied: either an owned heap allocation (threads
//! within one process) or a file-backed mapping (`memmap2`) that other
//! processes can map as well. Transports borrow the region through an
//! `Arc` and never unmap or close it on drop; the last `Arc` owner
//! releases the backing storage.
//!
//! ## Safety Model
//!
//! Control words are accessed as `&AtomicU32` projected at fixed,
//! 4-aligned offsets. Data cells are copied through raw pointers, never
//! through `&mut` references, so concurrent copies into disjoint byte
//! ranges do not create aliasing references. Range disjointness is the
//! transports' protocol invariant: a writer only touches bytes between
//! tail and head, readers only bytes between head and tail, and cursor
//! publication orders the copies.

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

enum Backing {
    // u64 words keep the base pointer 8-aligned for atomic projection.
    Heap(#[allow(dead_code)] Box<[u64]>),
    Mmap(#[allow(dead_code)] MmapMut),
}

pub struct SharedRegion {
    ptr: *mut u8,
    len: usize,
    _backing: Backing,
}

// SAFETY: all mutation goes through atomic words or raw-pointer copies
// coordinated by the transport protocols; the region itself hands out no
// references to mutable data.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion").field("len", &self.len).finish()
    }
}

impl SharedRegion {
    /// Allocates a zeroed in-process region of `len` bytes.
    pub fn alloc(len: usize) -> Arc<SharedRegion> {
        let words = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        let ptr = words.as_ptr() as *mut u8;
        Arc::new(SharedRegion {
            ptr,
            len,
            _backing: Backing::Heap(words),
        })
    }

    /// Maps `len` bytes of a file for cross-process sharing, creating
    /// and extending the file as needed.
    pub fn map_file(path: &Path, len: usize) -> Result<Arc<SharedRegion>> {
        ensure!(len > 0, "shared region length must be non-zero");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open shared region at {:?}", path))?;
        file.set_len(len as u64)
            .wrap_err_with(|| format!("failed to size shared region at {:?}", path))?;
        let mut mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to map shared region at {:?}", path))?
        };
        let ptr = mmap.as_mut_ptr();
        Ok(Arc::new(SharedRegion {
            ptr,
            len,
            _backing: Backing::Mmap(mmap),
        }))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Projects the 4 bytes at `offset` as an atomic word.
    pub(crate) fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset % 4 == 0, "atomic word offset must be 4-aligned");
        debug_assert!(offset + 4 <= self.len);
        // SAFETY: the base pointer is at least 8-aligned (u64 heap words
        // or a page-aligned mapping), the offset is 4-aligned and in
        // bounds, and the word is only ever accessed atomically.
        unsafe { &*(self.ptr.add(offset) as *const AtomicU32) }
    }

    pub(crate) fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() <= self.len);
        // SAFETY: in-bounds copy out of the region; the transport
        // protocol guarantees no writer touches this range concurrently.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    pub(crate) fn write_bytes(&self, offset: usize, src: &[u8]) {
        debug_assert!(offset + src.len() <= self.len);
        // SAFETY: in-bounds copy into the region; the transport protocol
        // guarantees this range is not concurrently read until the
        // cursor publishing it is stored.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len());
        }
    }
}
