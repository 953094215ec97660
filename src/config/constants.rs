//! # Configuration Constants
//!
//! All wire-format and resource constants in one place. When changing a
//! constant, check the dependency notes below.
//!
//! ## Dependency Graph
//!
//! ```text
//! RING_META_BYTES (12)
//!       │
//!       ├─> three atomic u32 words: head, tail, writer flag
//!       │     The shared-memory wire layout (bytes 0-3 head, 4-7 tail,
//!       │     8-11 writer flag) is fixed; data cells start at byte 12.
//!       │
//!       └─> RING_MIN_DATA_BYTES (4): a ring with fewer data cells
//!           cannot hold even one u32 slot and is rejected at construction.
//!
//! FRAME_HEADER_BYTES (16)
//!       │
//!       └─> zerocopy layout of LogFrameHeader: u64 schema id,
//!           u32 body length, u32 schema-JSON length. The on-disk log
//!           format is a sequence of these frames with no outer header.
//!
//! PACKET_HEADER_BYTES (8)
//!       │
//!       └─> the packet header is a record of {size: Uint32, bytes: Bytes}:
//!           a 4-byte size word plus the 4-byte offset slot of the
//!           variable payload. `size` counts from the first header byte.
//!
//! BLOCK_SIZE (4096)
//!       │
//!       └─> DEFAULT_BLOCK_CACHE_BYTES (256 KiB) must be a multiple of
//!           BLOCK_SIZE; the cache holds whole blocks only.
//! ```

/// Bytes occupied by the ring buffer control block: head, tail, writer flag.
pub const RING_META_BYTES: usize = 12;

/// Minimum usable data area for a ring buffer.
pub const RING_MIN_DATA_BYTES: usize = 4;

/// Fixed size of an on-disk log frame header.
pub const FRAME_HEADER_BYTES: usize = 16;

/// Fixed size of a packet header inside a ring buffer.
pub const PACKET_HEADER_BYTES: usize = 8;

/// Block granularity of the read cache in front of a native file.
pub const BLOCK_SIZE: usize = 4096;

/// Default read-cache budget for an append log.
pub const DEFAULT_BLOCK_CACHE_BYTES: usize = 256 * 1024;

/// Chunk size used when copying one log into another.
pub const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Total file descriptors the pool may keep open, divided across CPUs.
pub const FD_POOL_BUDGET: usize = 1024;

/// Open-descriptor cap for the process-wide file pool.
pub fn fd_pool_cap() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (FD_POOL_BUDGET / cpus).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_budget_is_whole_blocks() {
        assert_eq!(DEFAULT_BLOCK_CACHE_BYTES % BLOCK_SIZE, 0);
    }

    #[test]
    fn pool_cap_has_floor_of_one() {
        assert!(fd_pool_cap() >= 1);
    }
}
