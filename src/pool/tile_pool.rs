//! Bounded-memory tile pool

use super::identity::DataKind;
use super::slot::{Slot, SlotEntry, SlotId};
use super::stats::{PoolCounters, PoolStats};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::item::{downcast_item, ItemDescriptor, PoolItem, SharedItem};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Bounded-memory pool of tile items
///
/// Items live in a growable slot table. Consumers remember the slot id
/// returned by [`TilePool::add`] together with the item identity and always
/// look items up through identity-checked calls, since slots are reused
/// after eviction.
///
/// Locking: ordinary operations hold the table read lock and one slot lock;
/// only table growth takes the table write lock. Evicted items are dropped
/// after every lock is released, so store write-back never runs under a
/// pool lock.
pub struct TilePool {
    table: RwLock<Vec<Slot>>,
    /// Sum of the sizes of all pooled items
    total_bytes: AtomicU64,
    max_bytes: AtomicU64,
    overflow_factor: f64,
    growth_factor: f64,
    /// Logical clock for access stamps
    clock: AtomicU64,
    counters: PoolCounters,
    self_ref: Weak<TilePool>,
}

impl std::fmt::Debug for TilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TilePool")
            .field("total_bytes", &self.total_size())
            .field("max_bytes", &self.max_size())
            .field("slots", &self.slot_count())
            .finish()
    }
}

impl TilePool {
    /// Create a pool from a validated configuration
    ///
    /// # Panics
    /// If `config` fails [`PoolConfig::validate`]; use [`TilePool::try_new`]
    /// for untrusted input.
    pub fn new(config: PoolConfig) -> Arc<Self> {
        if let Err(e) = config.validate() {
            panic!("invalid pool configuration: {}", e);
        }

        info!(
            max_bytes = config.max_bytes,
            slots = config.initial_slots,
            overflow_factor = config.overflow_factor,
            "Creating tile pool"
        );

        Arc::new_cyclic(|self_ref| Self {
            table: RwLock::new((0..config.initial_slots).map(|_| Slot::new()).collect()),
            total_bytes: AtomicU64::new(0),
            max_bytes: AtomicU64::new(config.max_bytes),
            overflow_factor: config.overflow_factor,
            growth_factor: config.growth_factor,
            clock: AtomicU64::new(0),
            counters: PoolCounters::default(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn try_new(config: PoolConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Self::new(config))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn add_total(&self, bytes: u64) -> u64 {
        self.total_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    fn sub_total(&self, bytes: u64) -> u64 {
        self.total_bytes.fetch_sub(bytes, Ordering::AcqRel) - bytes
    }

    fn adjust_total(&self, delta: i64) {
        if delta >= 0 {
            self.add_total(delta as u64);
        } else {
            self.sub_total(delta.unsigned_abs());
        }
    }

    fn overflow_limit(&self) -> u64 {
        (self.max_size() as f64 * self.overflow_factor) as u64
    }

    /// Running total of pooled bytes
    pub fn total_size(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub fn max_size(&self) -> u64 {
        self.max_bytes.load(Ordering::Acquire)
    }

    /// Change the budget; only allowed while the pool holds no bytes
    pub fn set_max_size(&self, max_bytes: u64) -> bool {
        let total = self.total_size();
        if total != 0 {
            warn!(
                total,
                requested = max_bytes,
                "Refusing to change the budget of a non-empty pool"
            );
            return false;
        }
        self.max_bytes.store(max_bytes, Ordering::Release);
        true
    }

    pub fn slot_count(&self) -> usize {
        self.table.read().len()
    }

    pub fn occupied_slots(&self) -> usize {
        self.table
            .read()
            .iter()
            .filter(|slot| !slot.lock().is_empty())
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        let (slots, occupied) = {
            let table = self.table.read();
            let occupied = table.iter().filter(|slot| !slot.lock().is_empty()).count();
            (table.len(), occupied)
        };
        self.counters
            .snapshot(slots, occupied, self.total_size(), self.max_size())
    }

    fn lookup(
        &self,
        slot_id: SlotId,
        accept: impl FnOnce(&SharedItem) -> bool,
    ) -> Option<SharedItem> {
        let table = self.table.read();
        let found = slot_id
            .index()
            .and_then(|index| table.get(index))
            .and_then(|slot| {
                let mut entry = slot.lock();
                let item = entry.item.as_ref().filter(|item| accept(item))?.clone();
                entry.last_access = self.tick();
                Some(item)
            });

        if found.is_some() {
            self.counters.record_hit();
        } else {
            self.counters.record_miss();
        }
        found
    }

    /// Item in `slot_id`, without any identity check
    pub fn get(&self, slot_id: SlotId) -> Option<SharedItem> {
        self.lookup(slot_id, |_| true)
    }

    /// Item in `slot_id` if it belongs to `owner_id` and has `kind`
    pub fn get_by_kind(
        &self,
        slot_id: SlotId,
        owner_id: u64,
        kind: DataKind,
    ) -> Option<SharedItem> {
        self.lookup(slot_id, |item| item.matches_kind(owner_id, kind))
    }

    /// Item in `slot_id` if it is the tile `(owner_id, kind, tile_id)`
    pub fn get_typed(
        &self,
        slot_id: SlotId,
        owner_id: u64,
        kind: DataKind,
        tile_id: u64,
    ) -> Option<SharedItem> {
        self.lookup(slot_id, |item| item.matches(owner_id, kind, tile_id))
    }

    /// [`TilePool::get_typed`] plus a checked downcast to the concrete type
    pub fn get_as<T: PoolItem>(
        &self,
        slot_id: SlotId,
        owner_id: u64,
        kind: DataKind,
        tile_id: u64,
    ) -> Option<Arc<T>> {
        self.get_typed(slot_id, owner_id, kind, tile_id)
            .and_then(downcast_item::<T>)
    }

    /// Remove the tile from `slot_id`; false if the slot holds something else
    pub fn remove(&self, slot_id: SlotId, owner_id: u64, kind: DataKind, tile_id: u64) -> bool {
        let removed = {
            let table = self.table.read();
            let Some(slot) = slot_id.index().and_then(|index| table.get(index)) else {
                return false;
            };
            let mut entry = slot.lock();
            if !entry
                .item
                .as_ref()
                .is_some_and(|item| item.matches(owner_id, kind, tile_id))
            {
                return false;
            }
            let removed = entry.item.take();
            if let Some(item) = &removed {
                let total = self.sub_total(item.size());
                self.counters.record_total(total);
            }
            removed
        };

        debug!(slot = %slot_id, owner_id, %kind, tile_id, "Removed item");
        drop(removed);
        true
    }

    /// Swap the tile in `slot_id` for `new_item`
    ///
    /// Returns false, leaving `new_item` unbound, if the occupant is not
    /// `(owner_id, kind, tile_id)`.
    pub fn replace(
        &self,
        new_item: SharedItem,
        slot_id: SlotId,
        owner_id: u64,
        kind: DataKind,
        tile_id: u64,
    ) -> bool {
        let old = {
            let table = self.table.read();
            let Some(slot) = slot_id.index().and_then(|index| table.get(index)) else {
                return false;
            };
            let mut entry = slot.lock();
            if !entry
                .item
                .as_ref()
                .is_some_and(|item| item.matches(owner_id, kind, tile_id))
            {
                return false;
            }

            let new_size = new_item.size();
            let old = self.place(&mut entry, slot_id, new_item, self.tick());
            let old_size = old.as_ref().map_or(0, |item| item.size());
            self.adjust_total(new_size as i64 - old_size as i64);
            self.counters.record_total(self.total_size());
            old
        };

        debug!(slot = %slot_id, owner_id, %kind, tile_id, "Replaced item");
        drop(old);
        true
    }

    /// Store `item` in a locked slot and bind it; returns the previous occupant
    fn place(
        &self,
        entry: &mut SlotEntry,
        slot_id: SlotId,
        item: SharedItem,
        now: u64,
    ) -> Option<SharedItem> {
        item.descriptor().bind_slot(slot_id, self.self_ref.clone());
        entry.last_access = now;
        entry.item.replace(item)
    }

    /// Insert `item`, evicting or growing as needed
    ///
    /// The returned slot id must be kept alongside the item identity. It is
    /// only valid until the slot is reused, which identity-checked lookups
    /// detect.
    ///
    /// # Panics
    /// If `item` was already inserted into a pool.
    pub fn add(&self, item: SharedItem) -> SlotId {
        let identity = item.identity();
        let size = item.size();
        let now = self.tick();
        let mut total = self.add_total(size);

        let mut pending = Some(item);
        let mut released = Vec::new();

        let slot_id = loop {
            let table = self.table.read();
            let max_bytes = self.max_size();
            let mut claimed: Option<usize> = None;
            let mut oldest: Option<(usize, u64)> = None;

            // First empty slot, and the least recently used occupant seen
            for (index, slot) in table.iter().enumerate() {
                let mut entry = slot.lock();
                if entry.is_empty() {
                    if claimed.is_none() {
                        if let Some(item) = pending.take() {
                            self.place(&mut entry, SlotId::from(index), item, now);
                            claimed = Some(index);
                        }
                    }
                    if total <= max_bytes {
                        break;
                    }
                } else if Some(index) != claimed
                    && oldest.map_or(true, |(_, stamp)| entry.last_access < stamp)
                {
                    oldest = Some((index, entry.last_access));
                }
            }

            if total > max_bytes {
                let oldest_stamp = oldest.map_or(now, |(_, stamp)| stamp);
                let threshold = now / 2 + oldest_stamp / 2 + (now % 2 + oldest_stamp % 2) / 2;
                self.evict_pass(
                    &table,
                    Some(threshold),
                    &mut pending,
                    &mut claimed,
                    now,
                    &mut released,
                );

                if self.total_size() > self.overflow_limit() {
                    self.evict_pass(&table, None, &mut pending, &mut claimed, now, &mut released);
                }
            }

            if let Some(index) = claimed {
                break SlotId::from(index);
            }

            total = self.total_size();
            if total <= max_bytes {
                drop(table);
                self.grow();
                continue;
            }

            // Over budget but within the overflow limit, or nothing evictable:
            // displace the least recently used occupant even if it is still
            // referenced and younger unreferenced items exist. Holders keep
            // their Arc; the pool just stops accounting for it.
            let index = match oldest {
                Some((index, _)) => index,
                None => {
                    drop(table);
                    self.grow();
                    continue;
                }
            };
            let Some(item) = pending.take() else {
                unreachable!("pending item is only taken when a slot is claimed");
            };
            let mut entry = table[index].lock();
            let displaced = self.place(&mut entry, SlotId::from(index), item, now);
            if let Some(displaced) = displaced {
                self.sub_total(displaced.size());
                self.counters.record_forced_eviction();
                warn!(
                    slot = index,
                    displaced = %displaced.identity(),
                    total = self.total_size(),
                    max_bytes,
                    "Pool over budget and no slot freed by eviction, displacing oldest slot"
                );
                released.push(displaced);
            }
            break SlotId::from(index);
        };

        let total = self.total_size();
        self.counters.record_total(total);
        debug!(
            slot = %slot_id,
            identity = %identity,
            bytes = size,
            total,
            evicted = released.len(),
            "Added item"
        );

        drop(released);
        slot_id
    }

    /// Evict solely owned items until the total is back within budget
    ///
    /// With a `threshold`, only items last accessed before it are eligible.
    /// The first slot freed (or found empty) receives the pending item if it
    /// has not been placed yet.
    fn evict_pass(
        &self,
        table: &[Slot],
        threshold: Option<u64>,
        pending: &mut Option<SharedItem>,
        claimed: &mut Option<usize>,
        now: u64,
        released: &mut Vec<SharedItem>,
    ) {
        for (index, slot) in table.iter().enumerate() {
            if self.total_size() <= self.max_size() {
                break;
            }
            if Some(index) == *claimed {
                continue;
            }

            let mut entry = slot.lock();
            if !entry.is_empty() {
                if threshold.is_some_and(|threshold| entry.last_access >= threshold) {
                    continue;
                }
                if !entry.is_solely_owned() {
                    continue;
                }
                if let Some(evicted) = entry.item.take() {
                    self.sub_total(evicted.size());
                    self.counters.record_eviction();
                    debug!(slot = index, identity = %evicted.identity(), "Evicted item");
                    released.push(evicted);
                }
            }

            if claimed.is_none() {
                if let Some(item) = pending.take() {
                    self.place(&mut entry, SlotId::from(index), item, now);
                    *claimed = Some(index);
                }
            }
        }
    }

    /// Grow the table by the growth factor
    ///
    /// Existing slots keep their items, ids and stamps.
    fn grow(&self) {
        let mut table = self.table.write();
        let old_len = table.len();
        let new_len = ((old_len as f64 * self.growth_factor).ceil() as usize).max(old_len + 1);
        table.resize_with(new_len, Slot::new);
        self.counters.record_growth();
        debug!(from = old_len, to = new_len, "Grew slot table");
    }

    /// Apply an item's size delta if `slot_id` still holds that item
    pub(crate) fn apply_size_change(
        &self,
        slot_id: SlotId,
        descriptor: &ItemDescriptor,
        delta: i64,
    ) {
        let table = self.table.read();
        let Some(slot) = slot_id.index().and_then(|index| table.get(index)) else {
            descriptor.adjust_size(delta);
            return;
        };

        let entry = slot.lock();
        descriptor.adjust_size(delta);
        let holds_item = entry
            .item
            .as_ref()
            .is_some_and(|item| std::ptr::eq(item.descriptor(), descriptor));
        if holds_item {
            self.adjust_total(delta);
        }
    }

    /// Release every item; returns how many were held
    pub fn clear(&self) -> usize {
        let released: Vec<SharedItem> = {
            let table = self.table.read();
            table
                .iter()
                .filter_map(|slot| {
                    let mut entry = slot.lock();
                    let item = entry.item.take()?;
                    self.sub_total(item.size());
                    Some(item)
                })
                .collect()
        };

        self.counters.record_total(self.total_size());
        info!(items = released.len(), "Cleared tile pool");
        released.len()
    }

    /// Recompute the sum of item sizes and compare it with the running total
    ///
    /// Takes the table write lock, so no pool operation is in flight while
    /// the sum is taken.
    pub fn verify_accounting(&self) -> bool {
        let table = self.table.write();
        let sum: u64 = table.iter().map(|slot| slot.lock().size()).sum();
        let total = self.total_size();
        if sum != total {
            warn!(sum, total, "Pool accounting mismatch");
        }
        sum == total
    }

    /// Access stamp of an occupied slot
    #[cfg(test)]
    pub(crate) fn last_access(&self, slot_id: SlotId) -> Option<u64> {
        let table = self.table.read();
        let slot = table.get(slot_id.index()?)?;
        let entry = slot.lock();
        entry.item.as_ref().map(|_| entry.last_access)
    }
}
