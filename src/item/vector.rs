//! Growable array items

use super::codec::Codec;
use super::{load_block, ItemDescriptor, PoolItem, StoreLink};
use crate::error::Result;
use crate::pool::ItemIdentity;
use crate::store::BlockStore;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::error;

/// Growable array of tile elements (points, indices, uv coordinates, ...)
///
/// Size is `len * size_of::<T>()`. Every length change is reported to the
/// owning pool. Appends grow capacity by at least 1.5x.
///
/// Content mutation is not serialized by the pool: one writer at a time.
pub struct VectorItem<T> {
    descriptor: ItemDescriptor,
    values: RwLock<Vec<T>>,
    backing: Option<StoreLink<T>>,
}

impl<T> VectorItem<T> {
    const ELEMENT_SIZE: u64 = std::mem::size_of::<T>() as u64;

    /// Create an empty in-memory item
    pub fn new(identity: ItemIdentity) -> Self {
        Self::with_values(identity, Vec::new())
    }

    /// Create an in-memory item holding `values`
    pub fn with_values(identity: ItemIdentity, values: Vec<T>) -> Self {
        Self {
            descriptor: ItemDescriptor::new(identity, Self::bytes_for(values.len())),
            values: RwLock::new(values),
            backing: None,
        }
    }

    /// Load the item for `identity.tile_id` from `store`
    ///
    /// Blocks the calling thread for the duration of the read. The item keeps
    /// a weak link to the store and writes itself back on drop when dirty.
    pub fn load<C: Codec<T>>(identity: ItemIdentity, store: &Arc<dyn BlockStore>) -> Result<Self> {
        let bytes = load_block(store.as_ref(), identity.tile_id)?;
        let values = C::decode(&bytes)?;
        Ok(Self {
            descriptor: ItemDescriptor::new(identity, Self::bytes_for(values.len())),
            values: RwLock::new(values),
            backing: Some(StoreLink::new::<C>(store)),
        })
    }

    fn bytes_for(count: usize) -> u64 {
        count as u64 * Self::ELEMENT_SIZE
    }

    fn delta_for(count: usize) -> i64 {
        Self::bytes_for(count) as i64
    }

    /// Ensure room for `additional` elements, growing by at least 1.5x
    fn reserve_for_append(values: &mut Vec<T>, additional: usize) {
        let needed = values.len() + additional;
        if needed > values.capacity() {
            let grown = values.len() + values.len().div_ceil(2);
            values.reserve_exact(needed.max(grown) - values.len());
        }
    }

    fn record_change(&self, delta: i64) {
        self.descriptor.mark_dirty();
        self.descriptor.notify_size_change(delta);
    }

    pub fn push_back(&self, value: T) {
        let mut values = self.values.write();
        Self::reserve_for_append(&mut values, 1);
        values.push(value);
        self.record_change(Self::delta_for(1));
    }

    /// Append every element produced by `iter`
    pub fn extend<I: IntoIterator<Item = T>>(&self, iter: I) {
        let iter = iter.into_iter();
        let mut values = self.values.write();
        let before = values.len();
        Self::reserve_for_append(&mut values, iter.size_hint().0);
        for value in iter {
            if values.len() == values.capacity() {
                Self::reserve_for_append(&mut values, 1);
            }
            values.push(value);
        }
        let added = values.len() - before;
        if added > 0 {
            self.record_change(Self::delta_for(added));
        }
    }

    /// Remove the element at `index`, keeping the order of the rest
    pub fn erase(&self, index: usize) {
        let mut values = self.values.write();
        assert!(
            index < values.len(),
            "erase index {} out of range for {} elements",
            index,
            values.len()
        );
        values.remove(index);
        self.record_change(-Self::delta_for(1));
    }

    /// Remove every position in `indices`, keeping the order of the rest
    pub fn erase_set(&self, indices: &BTreeSet<usize>) {
        let Some(&last) = indices.last() else {
            return;
        };

        let mut values = self.values.write();
        assert!(
            last < values.len(),
            "erase index {} out of range for {} elements",
            last,
            values.len()
        );

        let mut position = 0;
        values.retain(|_| {
            let keep = !indices.contains(&position);
            position += 1;
            keep
        });
        self.record_change(-Self::delta_for(indices.len()));
    }

    pub fn clear(&self) {
        self.clear_from(0);
    }

    /// Drop every element from `index` on and release the trailing storage
    pub fn clear_from(&self, index: usize) {
        let mut values = self.values.write();
        if index >= values.len() {
            return;
        }
        let removed = values.len() - index;
        values.truncate(index);
        values.shrink_to_fit();
        self.record_change(-Self::delta_for(removed));
    }

    /// Reserve capacity without changing the logical size
    pub fn reserve(&self, additional: usize) {
        self.values.write().reserve(additional);
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.values.read().capacity()
    }

    /// Read access to the elements
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [T]> {
        RwLockReadGuard::map(self.values.read(), |values| values.as_slice())
    }

    /// In-place access to the elements; the length cannot change
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [T]> {
        self.descriptor.mark_dirty();
        RwLockWriteGuard::map(self.values.write(), |values| values.as_mut_slice())
    }

    pub fn is_stored(&self) -> bool {
        self.backing.is_some()
    }

    /// Write the contents back to the block store if dirty
    ///
    /// In-memory items have nothing to flush and always succeed.
    pub fn flush(&self) -> Result<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        if !self.descriptor.is_dirty() {
            return Ok(());
        }

        let values = self.values.read();
        backing.write(self.descriptor.identity().tile_id, &values)?;
        self.descriptor.clear_dirty();
        Ok(())
    }
}

impl<T: Clone> VectorItem<T> {
    pub fn push_back_slice(&self, new_values: &[T]) {
        if new_values.is_empty() {
            return;
        }
        let mut values = self.values.write();
        Self::reserve_for_append(&mut values, new_values.len());
        values.extend_from_slice(new_values);
        self.record_change(Self::delta_for(new_values.len()));
    }

    pub fn get(&self, index: usize) -> T {
        let values = self.values.read();
        assert!(
            index < values.len(),
            "index {} out of range for {} elements",
            index,
            values.len()
        );
        values[index].clone()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.values.read().clone()
    }
}

impl<T: Send + Sync + 'static> PoolItem for VectorItem<T> {
    fn descriptor(&self) -> &ItemDescriptor {
        &self.descriptor
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T> Drop for VectorItem<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!(
                identity = %self.descriptor.identity(),
                error = %e,
                "Failed to flush dirty item, data lost"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{PodCodec, SerdeCodec};
    use crate::pool::DataKind;
    use crate::store::MemoryBlockStore;
    use serde::{Deserialize, Serialize};

    fn points_id(tile_id: u64) -> ItemIdentity {
        ItemIdentity::new(1, DataKind::Points, tile_id)
    }

    #[test]
    fn test_push_back_tracks_size() {
        let item = VectorItem::<u64>::new(points_id(1));
        assert_eq!(item.size(), 0);
        assert!(!item.is_dirty());

        item.push_back(10);
        item.push_back(20);
        assert_eq!(item.len(), 2);
        assert_eq!(item.size(), 16);
        assert!(item.is_dirty());

        item.push_back_slice(&[30, 40, 50]);
        assert_eq!(item.size(), 40);
        assert_eq!(item.to_vec(), vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_growth_law() {
        let item = VectorItem::<u32>::with_values(points_id(1), vec![0; 10]);
        // Fill up to capacity so the next append reallocates
        while item.len() < item.capacity() {
            item.push_back(0);
        }

        let before: Vec<u32> = (0..item.len() as u32).collect();
        item.write().copy_from_slice(&before);
        let previous = item.len();

        item.push_back(99);
        assert!(item.capacity() * 2 >= previous * 3);
        assert_eq!(&item.read()[..previous], before.as_slice());
        assert_eq!(item.get(previous), 99);
    }

    #[test]
    fn test_bulk_append_grows_to_needed() {
        let item = VectorItem::<u8>::with_values(points_id(1), vec![1, 2]);
        let bulk = vec![7u8; 100];
        item.push_back_slice(&bulk);
        assert!(item.capacity() >= 102);
        assert_eq!(item.size(), 102);
    }

    #[test]
    fn test_erase_preserves_order() {
        let item = VectorItem::<i32>::with_values(points_id(1), vec![0, 1, 2, 3, 4, 5]);

        item.erase(0);
        assert_eq!(item.to_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(item.size(), 20);

        let indices: BTreeSet<usize> = [1, 3].into_iter().collect();
        item.erase_set(&indices);
        assert_eq!(item.to_vec(), vec![1, 3, 5]);
        assert_eq!(item.size(), 12);

        item.erase_set(&BTreeSet::new());
        assert_eq!(item.len(), 3);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_erase_out_of_range_panics() {
        let item = VectorItem::<i32>::with_values(points_id(1), vec![1]);
        item.erase(1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_get_out_of_range_panics() {
        let item = VectorItem::<i32>::new(points_id(1));
        item.get(0);
    }

    #[test]
    fn test_clear_from() {
        let item = VectorItem::<u16>::with_values(points_id(1), vec![1, 2, 3, 4]);

        item.clear_from(2);
        assert_eq!(item.to_vec(), vec![1, 2]);
        assert_eq!(item.size(), 4);

        // Past the end is a no-op
        item.clear_from(5);
        assert_eq!(item.len(), 2);

        item.clear();
        assert!(item.is_empty());
        assert_eq!(item.size(), 0);
    }

    #[test]
    fn test_reserve_keeps_size() {
        let item = VectorItem::<u64>::new(points_id(1));
        item.reserve(64);
        assert!(item.capacity() >= 64);
        assert_eq!(item.size(), 0);
        assert!(!item.is_dirty());
    }

    #[test]
    fn test_stored_round_trip() -> Result<()> {
        let memory = Arc::new(MemoryBlockStore::new());
        memory.insert(5, bytemuck::cast_slice::<u32, u8>(&[1, 2, 3]).to_vec());
        let store: Arc<dyn BlockStore> = memory.clone();

        {
            let item = VectorItem::<u32>::load::<PodCodec>(points_id(5), &store)?;
            assert!(item.is_stored());
            assert_eq!(item.size(), 12);
            assert_eq!(item.to_vec(), vec![1, 2, 3]);
            item.push_back(4);
        }

        let block = memory.get(5).unwrap();
        let stored: Vec<u32> = bytemuck::pod_collect_to_vec(&block);
        assert_eq!(stored, vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_clean_item_does_not_write() -> Result<()> {
        let memory = Arc::new(MemoryBlockStore::new());
        memory.insert(5, vec![9; 8]);
        let store: Arc<dyn BlockStore> = memory.clone();

        let writes = memory.write_count();
        {
            let item = VectorItem::<u8>::load::<PodCodec>(points_id(5), &store)?;
            assert_eq!(item.len(), 8);
        }
        assert_eq!(memory.write_count(), writes);
        assert_eq!(memory.get(5), Some(vec![9; 8]));
        Ok(())
    }

    #[test]
    fn test_explicit_flush_clears_dirty() -> Result<()> {
        let memory = Arc::new(MemoryBlockStore::new());
        let store: Arc<dyn BlockStore> = memory.clone();

        let item = VectorItem::<u8>::load::<PodCodec>(points_id(8), &store)?;
        assert!(item.is_empty());
        item.push_back_slice(&[4, 5]);
        item.flush()?;
        assert!(!item.is_dirty());
        assert_eq!(memory.get(8), Some(vec![4, 5]));

        drop(item);
        assert_eq!(memory.write_count(), 1);
        Ok(())
    }

    #[test]
    fn test_flush_without_store_fails() -> Result<()> {
        let memory = Arc::new(MemoryBlockStore::new());
        let store: Arc<dyn BlockStore> = memory.clone();
        let item = VectorItem::<u8>::load::<PodCodec>(points_id(8), &store)?;
        item.push_back(1);

        drop(store);
        drop(memory);
        assert!(matches!(
            item.flush(),
            Err(crate::error::Error::StoreUnavailable(8))
        ));
        Ok(())
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Breakline {
        points: Vec<u32>,
        closed: bool,
    }

    #[test]
    fn test_generic_stored_round_trip() -> Result<()> {
        let memory = Arc::new(MemoryBlockStore::new());
        let store: Arc<dyn BlockStore> = memory.clone();
        let identity = ItemIdentity::new(2, DataKind::Feature, 3);

        {
            let item = VectorItem::<Breakline>::load::<SerdeCodec>(identity, &store)?;
            item.push_back(Breakline {
                points: vec![1, 2, 3],
                closed: true,
            });
        }

        let item = VectorItem::<Breakline>::load::<SerdeCodec>(identity, &store)?;
        assert_eq!(item.len(), 1);
        assert_eq!(item.get(0).points, vec![1, 2, 3]);
        assert!(item.get(0).closed);
        Ok(())
    }
}
