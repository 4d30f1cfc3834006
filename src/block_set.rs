//! The per-operation COW staging overlay.
//!
//! Every mutating operation (a file write, a directory insert or delete)
//! opens one of these, stages the blocks it touches, flushes them
//! unconditionally, and only then attempts the root-inode CAS. On conflict
//! the caller resets the overlay and restarts against the re-read root.

use std::collections::HashMap;

use crate::error::Result;
use crate::kv::KvStore;
use crate::pointer::{Pointer, PointerAllocator};

/// In-memory overlay of new/modified blocks for the duration of one
/// mutating attempt.
pub struct BlockSet<'a, S: KvStore> {
    store: &'a S,
    allocator: &'a PointerAllocator,
    new_blocks: HashMap<Pointer, Vec<u8>>,
    free_list: Vec<Pointer>,
}

impl<'a, S: KvStore> BlockSet<'a, S> {
    pub fn new(store: &'a S, allocator: &'a PointerAllocator) -> Self {
        BlockSet { store, allocator, new_blocks: HashMap::new(), free_list: Vec::new() }
    }

    /// Reads `key`, consulting staged blocks first so an in-progress
    /// mutation sees its own writes before anything reaches the backend.
    pub fn get(&self, key: Pointer) -> Result<Vec<u8>> {
        if let Some(bytes) = self.new_blocks.get(&key) {
            return Ok(bytes.clone());
        }
        crate::kv::fetch_versioned(self.store, key).map(|(bytes, _)| bytes)
    }

    /// Stages `new_bytes`. If `old_key` already names a block staged by this
    /// overlay, it's updated in place under the same key; otherwise a fresh
    /// pointer is allocated. This is the COW rule itself: a block that
    /// existed in KV before this operation started is never overwritten,
    /// only shadowed.
    pub fn put(&mut self, old_key: Pointer, new_bytes: Vec<u8>) -> Pointer {
        let key = if self.new_blocks.contains_key(&old_key) { old_key } else { self.alloc() };
        self.new_blocks.insert(key, new_bytes);
        key
    }

    fn alloc(&mut self) -> Pointer {
        self.free_list.pop().unwrap_or_else(|| self.allocator.fresh_pointer())
    }

    /// Discards everything staged so far, returning the pointers to the
    /// free list so a retried attempt reuses them instead of burning fresh
    /// ones on every conflict.
    pub fn reset(&mut self) {
        self.free_list.extend(self.new_blocks.drain().map(|(key, _)| key));
    }

    /// Writes every staged block unconditionally. The caller still owns the
    /// root-inode CAS, performed separately after this returns.
    pub fn flush(&mut self) -> Result<()> {
        let count = self.new_blocks.len();
        for (key, bytes) in self.new_blocks.drain() {
            self.store.put_if_version(key, bytes, None)?;
        }
        log::trace!("block-set flushed {count} block(s)");
        Ok(())
    }
}
