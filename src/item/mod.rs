//! Pool items
//!
//! An item is one typed block of tile data owned jointly by the pool and
//! any consumers holding a [`SharedItem`].
//!
//! # Architecture
//!
//! ```text
//! PoolItem (trait object, Arc-shared)
//!   ├─→ VectorItem<T>        growable array, 1.5x growth
//!   ├─→ BlobItem             fixed byte buffer
//!   └─→ GenericBlobItem<T>   one constructed value with a declared footprint
//!
//! ItemDescriptor (embedded in every item)
//!   ├─→ identity (owner, kind, tile)
//!   ├─→ size / dirty
//!   └─→ slot binding ──weak──→ TilePool accounting
//! ```
//!
//! Every item type is either in-memory or store-backed. Store-backed items
//! are loaded from a [`BlockStore`] at construction and written back when
//! the last reference is dropped while dirty. Plain element types persist
//! through [`PodCodec`], generic ones through [`SerdeCodec`].

pub mod blob;
pub mod codec;
pub mod vector;

pub use blob::{BlobItem, GenericBlobItem};
pub use codec::{Codec, PodCodec, SerdeCodec};
pub use vector::VectorItem;

use crate::error::{Error, Result};
use crate::pool::{DataKind, ItemIdentity, SlotId, TilePool};
use crate::store::BlockStore;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

/// Shared handle to a pooled item
pub type SharedItem = Arc<dyn PoolItem>;

/// Common interface of everything the pool can hold
pub trait PoolItem: Any + Send + Sync {
    fn descriptor(&self) -> &ItemDescriptor;

    /// Convert into `Any` for a checked downcast
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn size(&self) -> u64 {
        self.descriptor().size()
    }

    fn identity(&self) -> ItemIdentity {
        *self.descriptor().identity()
    }

    fn matches_kind(&self, owner_id: u64, kind: DataKind) -> bool {
        self.descriptor().identity().matches_kind(owner_id, kind)
    }

    fn matches(&self, owner_id: u64, kind: DataKind, tile_id: u64) -> bool {
        self.descriptor().identity().matches(owner_id, kind, tile_id)
    }

    fn slot_id(&self) -> SlotId {
        self.descriptor().slot_id()
    }

    fn mark_dirty(&self) {
        self.descriptor().mark_dirty()
    }

    fn is_dirty(&self) -> bool {
        self.descriptor().is_dirty()
    }
}

/// Downcast a shared item to its concrete type
pub fn downcast_item<T: PoolItem>(item: SharedItem) -> Option<Arc<T>> {
    item.into_any().downcast::<T>().ok()
}

struct SlotBinding {
    slot: SlotId,
    pool: Weak<TilePool>,
}

/// Identity and accounting state shared by every item type
pub struct ItemDescriptor {
    identity: ItemIdentity,
    size: AtomicU64,
    dirty: AtomicBool,
    binding: OnceLock<SlotBinding>,
}

impl ItemDescriptor {
    pub fn new(identity: ItemIdentity, size: u64) -> Self {
        Self {
            identity,
            size: AtomicU64::new(size),
            dirty: AtomicBool::new(false),
            binding: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &ItemIdentity {
        &self.identity
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn slot_id(&self) -> SlotId {
        self.binding
            .get()
            .map_or(SlotId::UNDEFINED, |binding| binding.slot)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Attach the item to a pool slot. Items are bound exactly once.
    pub(crate) fn bind_slot(&self, slot: SlotId, pool: Weak<TilePool>) {
        let bound = self.binding.set(SlotBinding { slot, pool }).is_ok();
        assert!(
            bound,
            "{} is already bound to {}; items cannot be inserted twice",
            self.identity,
            self.slot_id()
        );
    }

    /// Apply a size delta locally, without touching any pool
    pub(crate) fn adjust_size(&self, delta: i64) {
        if delta >= 0 {
            self.size.fetch_add(delta as u64, Ordering::AcqRel);
        } else {
            self.size.fetch_sub(delta.unsigned_abs(), Ordering::AcqRel);
        }
    }

    /// Record a change of the item's byte footprint
    ///
    /// Bound items route the delta through the pool so the slot lock
    /// serializes it with eviction; the pool total only moves if the slot
    /// still holds this item.
    pub(crate) fn notify_size_change(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(binding) = self.binding.get() {
            if let Some(pool) = binding.pool.upgrade() {
                pool.apply_size_change(binding.slot, self, delta);
                return;
            }
        }
        self.adjust_size(delta);
    }
}

impl std::fmt::Debug for ItemDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDescriptor")
            .field("identity", &self.identity)
            .field("size", &self.size())
            .field("dirty", &self.is_dirty())
            .field("slot", &self.slot_id())
            .finish()
    }
}

/// Non-owning link from a stored item back to its block store
pub(crate) struct StoreLink<T> {
    store: Weak<dyn BlockStore>,
    encode: fn(&[T]) -> Result<Vec<u8>>,
}

impl<T> StoreLink<T> {
    pub(crate) fn new<C: Codec<T>>(store: &Arc<dyn BlockStore>) -> Self {
        Self {
            store: Arc::downgrade(store),
            encode: C::encode,
        }
    }

    pub(crate) fn write(&self, tile_id: u64, values: &[T]) -> Result<()> {
        let store = self
            .store
            .upgrade()
            .ok_or(Error::StoreUnavailable(tile_id))?;
        let bytes = (self.encode)(values)?;
        store.store(tile_id, &bytes)?;
        debug!(tile_id, bytes = bytes.len(), "Flushed item to block store");
        Ok(())
    }
}

/// Read a whole block for `tile_id`, failing on a short read
pub(crate) fn load_block(store: &dyn BlockStore, tile_id: u64) -> Result<Vec<u8>> {
    let expected = store.block_length(tile_id)?;
    let len = usize::try_from(expected)
        .map_err(|_| Error::Store(format!("Block for tile {} is too large", tile_id)))?;

    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|e| {
        Error::Store(format!(
            "Cannot allocate {} bytes for tile {}: {}",
            expected, tile_id, e
        ))
    })?;
    buffer.resize(len, 0);

    let loaded = store.load(tile_id, &mut buffer)?;
    if loaded != len {
        return Err(Error::ShortLoad {
            tile_id,
            expected,
            loaded: loaded as u64,
        });
    }

    debug!(tile_id, bytes = len, "Loaded block");
    Ok(buffer)
}
