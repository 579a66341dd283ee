//! Block stores backing evictable tile data
//!
//! # Architecture
//!
//! ```text
//! Stored item (VectorItem / BlobItem / GenericBlobItem)
//!   └─weak─→ dyn BlockStore
//!              ├─→ MemoryBlockStore   tile_id → bytes (DashMap)
//!              └─→ FileBlockStore     tile_id → tile_<id>.blk (optional zstd)
//! ```
//!
//! Items load synchronously on the calling thread when constructed and
//! write back when their last reference is dropped while dirty. The store
//! instance is owned by the caller, never by the items.

pub mod compression;
pub mod file;
pub mod memory;

pub use compression::CompressionAlgorithm;
pub use file::FileBlockStore;
pub use memory::MemoryBlockStore;

use crate::error::Result;

/// Keyed block storage addressed by tile id
pub trait BlockStore: Send + Sync {
    /// Byte length of the block stored for `tile_id`, 0 if there is none
    fn block_length(&self, tile_id: u64) -> Result<u64>;

    /// Copy up to `buffer.len()` bytes of the block into `buffer`
    ///
    /// Returns the number of bytes copied.
    fn load(&self, tile_id: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Replace the block for `tile_id` with `data`
    fn store(&self, tile_id: u64, data: &[u8]) -> Result<()>;
}
