//! In-memory block store
//!
//! Keeps every block in a concurrent map. Useful for tests and for
//! scratch datasets that never need to outlive the process.

use super::BlockStore;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory block store
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<u64, Vec<u8>>,
    writes: AtomicU64,
}

impl MemoryBlockStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a block directly, bypassing the write counter
    pub fn insert(&self, tile_id: u64, data: Vec<u8>) {
        self.blocks.insert(tile_id, data);
    }

    /// Copy of the block for `tile_id`
    pub fn get(&self, tile_id: u64) -> Option<Vec<u8>> {
        self.blocks.get(&tile_id).map(|block| block.value().clone())
    }

    pub fn contains(&self, tile_id: u64) -> bool {
        self.blocks.contains_key(&tile_id)
    }

    pub fn remove(&self, tile_id: u64) -> Option<Vec<u8>> {
        self.blocks.remove(&tile_id).map(|(_, block)| block)
    }

    /// Get the number of blocks stored
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Clear all blocks
    pub fn clear(&self) {
        self.blocks.clear();
    }

    /// Number of successful `store` calls so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockStore for MemoryBlockStore {
    fn block_length(&self, tile_id: u64) -> Result<u64> {
        Ok(self
            .blocks
            .get(&tile_id)
            .map_or(0, |block| block.len() as u64))
    }

    fn load(&self, tile_id: u64, buffer: &mut [u8]) -> Result<usize> {
        let Some(block) = self.blocks.get(&tile_id) else {
            return Ok(0);
        };
        let len = block.len().min(buffer.len());
        buffer[..len].copy_from_slice(&block[..len]);
        Ok(len)
    }

    fn store(&self, tile_id: u64, data: &[u8]) -> Result<()> {
        self.blocks.insert(tile_id, data.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic_ops() -> Result<()> {
        let store = MemoryBlockStore::new();
        assert!(store.is_empty());
        assert_eq!(store.block_length(1)?, 0);

        store.store(1, b"tile one")?;
        assert_eq!(store.block_length(1)?, 8);
        assert_eq!(store.write_count(), 1);

        let mut buffer = vec![0u8; 8];
        assert_eq!(store.load(1, &mut buffer)?, 8);
        assert_eq!(&buffer, b"tile one");

        // Short buffer gets a prefix
        let mut short = vec![0u8; 4];
        assert_eq!(store.load(1, &mut short)?, 4);
        assert_eq!(&short, b"tile");

        // Missing tile loads nothing
        assert_eq!(store.load(2, &mut buffer)?, 0);

        assert_eq!(store.remove(1), Some(b"tile one".to_vec()));
        assert!(!store.contains(1));
        Ok(())
    }

    #[test]
    fn test_memory_store_seeding() {
        let store = MemoryBlockStore::new();
        store.insert(3, vec![1, 2, 3]);
        store.insert(4, vec![4]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(3), Some(vec![1, 2, 3]));
        assert_eq!(store.write_count(), 0);

        store.clear();
        assert!(store.is_empty());
    }
}
