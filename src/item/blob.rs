//! Fixed-size blob items

use super::codec::{Codec, PodCodec};
use super::{load_block, ItemDescriptor, PoolItem, StoreLink};
use crate::error::{Error, Result};
use crate::pool::ItemIdentity;
use crate::store::BlockStore;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::any::Any;
use std::sync::Arc;
use tracing::error;

/// Fixed-length byte buffer (textures, packed display data)
///
/// The length is set at construction and never changes, so a blob never
/// reports size deltas to the pool.
pub struct BlobItem {
    descriptor: ItemDescriptor,
    data: RwLock<Box<[u8]>>,
    backing: Option<StoreLink<u8>>,
}

impl BlobItem {
    pub fn new(identity: ItemIdentity, data: Vec<u8>) -> Self {
        let data = data.into_boxed_slice();
        Self {
            descriptor: ItemDescriptor::new(identity, data.len() as u64),
            data: RwLock::new(data),
            backing: None,
        }
    }

    pub fn zeroed(identity: ItemIdentity, len: usize) -> Self {
        Self::new(identity, vec![0u8; len])
    }

    /// Load the blob for `identity.tile_id`, sized to the stored block
    pub fn load(identity: ItemIdentity, store: &Arc<dyn BlockStore>) -> Result<Self> {
        let data = load_block(store.as_ref(), identity.tile_id)?.into_boxed_slice();
        Ok(Self {
            descriptor: ItemDescriptor::new(identity, data.len() as u64),
            data: RwLock::new(data),
            backing: Some(StoreLink::new::<PodCodec>(store)),
        })
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn get_data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.data.read(), |data| &data[..])
    }

    /// Edit the bytes in place and mark the blob dirty
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.write();
        self.descriptor.mark_dirty();
        f(&mut data[..])
    }

    pub fn is_stored(&self) -> bool {
        self.backing.is_some()
    }

    pub fn flush(&self) -> Result<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        if !self.descriptor.is_dirty() {
            return Ok(());
        }

        let data = self.data.read();
        backing.write(self.descriptor.identity().tile_id, &data[..])?;
        self.descriptor.clear_dirty();
        Ok(())
    }
}

impl PoolItem for BlobItem {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for BlobItem {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!(
                identity = %self.descriptor.identity(),
                error = %e,
                "Failed to flush dirty blob, data lost"
            );
        }
    }
}

/// One constructed value with a declared byte footprint (graphs, DTMs)
pub struct GenericBlobItem<T> {
    descriptor: ItemDescriptor,
    value: RwLock<T>,
    backing: Option<StoreLink<T>>,
}

impl<T> GenericBlobItem<T> {
    /// Wrap `value`, accounting `size_of::<T>()` bytes
    pub fn new(identity: ItemIdentity, value: T) -> Self {
        Self::with_footprint(identity, value, std::mem::size_of::<T>() as u64)
    }

    /// Wrap `value`, accounting `footprint` bytes
    pub fn with_footprint(identity: ItemIdentity, value: T, footprint: u64) -> Self {
        Self {
            descriptor: ItemDescriptor::new(identity, footprint),
            value: RwLock::new(value),
            backing: None,
        }
    }

    /// Load the value for `identity.tile_id`
    ///
    /// A missing block yields `T::default()`. The footprint is the stored
    /// block length, or `size_of::<T>()` when nothing was stored yet.
    pub fn load<C: Codec<T>>(identity: ItemIdentity, store: &Arc<dyn BlockStore>) -> Result<Self>
    where
        T: Default,
    {
        let bytes = load_block(store.as_ref(), identity.tile_id)?;
        let mut values = C::decode(&bytes)?;
        let value = match values.len() {
            0 => T::default(),
            1 => values.remove(0),
            n => {
                return Err(Error::Codec(format!(
                    "Expected a single value for tile {}, found {}",
                    identity.tile_id, n
                )))
            }
        };

        let footprint = if bytes.is_empty() {
            std::mem::size_of::<T>() as u64
        } else {
            bytes.len() as u64
        };

        Ok(Self {
            descriptor: ItemDescriptor::new(identity, footprint),
            value: RwLock::new(value),
            backing: Some(StoreLink::new::<C>(store)),
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.value.read()
    }

    /// Mutate the value in place and mark the item dirty
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut value = self.value.write();
        self.descriptor.mark_dirty();
        f(&mut value)
    }

    pub fn is_stored(&self) -> bool {
        self.backing.is_some()
    }

    pub fn flush(&self) -> Result<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        if !self.descriptor.is_dirty() {
            return Ok(());
        }

        let value = self.value.read();
        backing.write(
            self.descriptor.identity().tile_id,
            std::slice::from_ref(&*value),
        )?;
        self.descriptor.clear_dirty();
        Ok(())
    }
}

impl<T: Clone> GenericBlobItem<T> {
    pub fn get(&self) -> T {
        self.value.read().clone()
    }
}

impl<T: Send + Sync + 'static> PoolItem for GenericBlobItem<T> {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T> Drop for GenericBlobItem<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!(
                identity = %self.descriptor.identity(),
                error = %e,
                "Failed to flush dirty value, data lost"
            );
        }
    }
}
