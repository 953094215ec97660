//! # SIEVE Block Cache
//!
//! A read cache of whole blocks fronting a backing file. SIEVE keeps a
//! "visited" flag per block instead of strict recency ordering: a scan
//! of the file cannot evict the hot blocks, because eviction gives any
//! visited block a second chance before reclaiming it.
//!
//! Only complete blocks are cached. The growing tail of an append log
//! is read through uncached, and any write invalidates every block from
//! the first modified byte onward (for an append store that is just the
//! previously partial tail block).

use hashbrown::HashMap;

use crate::config::BLOCK_SIZE;

#[derive(Debug)]
struct CacheBlock {
    data: Vec<u8>,
    visited: bool,
}

#[derive(Debug)]
pub struct BlockCache {
    max_blocks: usize,
    blocks: HashMap<u64, CacheBlock>,
    order: Vec<u64>,
    hand: usize,
}

impl BlockCache {
    /// A cache holding up to `budget_bytes` of block data.
    pub fn new(budget_bytes: usize) -> BlockCache {
        BlockCache {
            max_blocks: (budget_bytes / BLOCK_SIZE).max(1),
            blocks: HashMap::new(),
            order: Vec::new(),
            hand: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Looks up a block and marks it visited.
    pub fn get(&mut self, block_no: u64) -> Option<&[u8]> {
        let block = self.blocks.get_mut(&block_no)?;
        block.visited = true;
        Some(&block.data)
    }

    /// Inserts a complete block, evicting with the SIEVE hand when full.
    pub fn insert(&mut self, block_no: u64, data: Vec<u8>) {
        debug_assert_eq!(data.len(), BLOCK_SIZE);
        if self.blocks.contains_key(&block_no) {
            if let Some(block) = self.blocks.get_mut(&block_no) {
                block.data = data;
                block.visited = true;
            }
            return;
        }
        while self.blocks.len() >= self.max_blocks {
            self.evict_one();
        }
        self.blocks.insert(
            block_no,
            CacheBlock {
                data,
                visited: false,
            },
        );
        self.order.push(block_no);
    }

    fn evict_one(&mut self) {
        // Scan with the hand: clear visited flags until an unvisited
        // block is found, then reclaim it.
        loop {
            if self.order.is_empty() {
                return;
            }
            if self.hand >= self.order.len() {
                self.hand = 0;
            }
            let candidate = self.order[self.hand];
            match self.blocks.get_mut(&candidate) {
                Some(block) if block.visited => {
                    block.visited = false;
                    self.hand += 1;
                }
                Some(_) => {
                    self.blocks.remove(&candidate);
                    self.order.remove(self.hand);
                    return;
                }
                None => {
                    // Stale order entry from an invalidation.
                    self.order.remove(self.hand);
                }
            }
        }
    }

    /// Drops every block containing bytes at or past `byte_pos`.
    pub fn invalidate_from(&mut self, byte_pos: u64) {
        let first = byte_pos / BLOCK_SIZE as u64;
        self.blocks.retain(|&no, _| no < first);
        self.order.retain(|no| self.blocks.contains_key(no));
        if self.hand >= self.order.len() {
            self.hand = 0;
        }
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.order.clear();
        self.hand = 0;
    }
}
