// tilepool - Rust Implementation
// A bounded-memory tile cache for out-of-core terrain and mesh data

#![warn(rust_2018_idioms)]

pub mod config;
pub mod item;
pub mod logging;
pub mod pool;
pub mod store;

// Re-exports for convenience
pub use config::PoolConfig;
pub use item::{
    downcast_item, BlobItem, Codec, GenericBlobItem, ItemDescriptor, PodCodec, PoolItem,
    SerdeCodec, SharedItem, VectorItem,
};
pub use pool::{DataKind, ItemIdentity, PoolStats, SlotId, TilePool};
pub use store::{BlockStore, CompressionAlgorithm, FileBlockStore, MemoryBlockStore};

/// tilepool error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Store error: {0}")]
        Store(String),

        #[error("Short load for tile {tile_id}: expected {expected} bytes, loaded {loaded}")]
        ShortLoad {
            tile_id: u64,
            expected: u64,
            loaded: u64,
        },

        #[error("Codec error: {0}")]
        Codec(String),

        #[error("Backing store for tile {0} is no longer available")]
        StoreUnavailable(u64),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
