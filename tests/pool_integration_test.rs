//! End-to-end tests for pool budgeting, eviction and identity checks

use std::sync::Arc;
use tilepool::{
    BlobItem, DataKind, ItemIdentity, PoolConfig, PoolItem, SharedItem, SlotId, TilePool,
    VectorItem,
};

fn pool(max_bytes: u64, initial_slots: usize) -> Arc<TilePool> {
    tilepool::logging::init_for_tests();
    TilePool::new(PoolConfig {
        max_bytes,
        initial_slots,
        ..PoolConfig::default()
    })
}

fn blob(owner_id: u64, kind: DataKind, tile_id: u64, size: usize) -> SharedItem {
    Arc::new(BlobItem::zeroed(
        ItemIdentity::new(owner_id, kind, tile_id),
        size,
    ))
}

#[test]
fn test_lru_eviction_spares_referenced_items() {
    let pool = pool(1000, 2);

    // A is dropped by the caller, B stays referenced
    let slot_a = pool.add(blob(1, DataKind::Points, 1, 400));
    let b = blob(1, DataKind::Points, 2, 400);
    let slot_b = pool.add(b.clone());

    let slot_c = pool.add(blob(1, DataKind::Points, 3, 400));

    assert_eq!(slot_c, slot_a, "C should take the slot freed by A");
    assert_eq!(pool.total_size(), 800);
    assert!(pool.get_typed(slot_a, 1, DataKind::Points, 1).is_none());
    assert!(pool.get_typed(slot_b, 1, DataKind::Points, 2).is_some());
    assert!(pool.get_typed(slot_c, 1, DataKind::Points, 3).is_some());
    assert_eq!(b.slot_id(), slot_b);
    assert!(pool.verify_accounting());
}

#[test]
fn test_recently_used_items_survive() {
    let pool = pool(1000, 4);

    let slot_a = pool.add(blob(1, DataKind::Texture, 1, 300));
    let slot_b = pool.add(blob(1, DataKind::Texture, 2, 300));
    let slot_c = pool.add(blob(1, DataKind::Texture, 3, 300));

    // Touch A so B becomes the least recently used
    assert!(pool.get_typed(slot_a, 1, DataKind::Texture, 1).is_some());

    pool.add(blob(1, DataKind::Texture, 4, 300));

    assert!(pool.total_size() <= 1000);
    assert!(pool.get_typed(slot_a, 1, DataKind::Texture, 1).is_some());
    assert!(pool.get_typed(slot_b, 1, DataKind::Texture, 2).is_none());
    assert!(pool.get_typed(slot_c, 1, DataKind::Texture, 3).is_some());
    assert_eq!(pool.stats().evictions, 1);
}

#[test]
fn test_stale_slot_id_is_detected() {
    let pool = pool(100, 1);

    let slot = pool.add(blob(7, DataKind::Graph, 70, 100));
    let newcomer = pool.add(blob(8, DataKind::Graph, 80, 100));
    assert_eq!(newcomer, slot);

    // The remembered id now points at someone else's tile
    assert!(pool.get(slot).is_some());
    assert!(pool.get_by_kind(slot, 7, DataKind::Graph).is_none());
    assert!(pool.get_typed(slot, 7, DataKind::Graph, 70).is_none());
    assert!(!pool.remove(slot, 7, DataKind::Graph, 70));
    assert!(pool.get_typed(slot, 8, DataKind::Graph, 80).is_some());
}

#[test]
fn test_budget_change_requires_empty_pool() {
    let pool = pool(1000, 4);
    assert!(pool.set_max_size(500));

    let slot = pool.add(blob(1, DataKind::DtmData, 1, 200));
    assert!(!pool.set_max_size(2000));
    assert_eq!(pool.max_size(), 500);

    assert!(pool.remove(slot, 1, DataKind::DtmData, 1));
    assert_eq!(pool.total_size(), 0);
    assert!(pool.set_max_size(2000));
    assert_eq!(pool.max_size(), 2000);
}

#[test]
fn test_growth_keeps_existing_items() {
    let pool = pool(1 << 20, 2);

    let held: Vec<SharedItem> = (0..10)
        .map(|tile_id| blob(3, DataKind::UvCoords, tile_id, 16))
        .collect();
    let slots: Vec<SlotId> = held.iter().map(|item| pool.add(item.clone())).collect();

    assert!(pool.slot_count() >= 10);
    assert!(pool.stats().growths > 0);
    for (tile_id, (item, slot)) in held.iter().zip(&slots).enumerate() {
        assert_eq!(item.slot_id(), *slot);
        let found = pool
            .get_typed(*slot, 3, DataKind::UvCoords, tile_id as u64)
            .unwrap();
        assert!(Arc::ptr_eq(&found, item));
    }
    assert_eq!(pool.total_size(), 160);
    assert_eq!(pool.occupied_slots(), 10);
}

#[test]
fn test_typed_lookup_and_mutation() {
    let pool = pool(1 << 20, 8);
    let identity = ItemIdentity::new(5, DataKind::TriPtIndices, 42);
    let slot = pool.add(Arc::new(VectorItem::<u32>::new(identity)));

    let indices = pool
        .get_as::<VectorItem<u32>>(slot, 5, DataKind::TriPtIndices, 42)
        .unwrap();
    indices.push_back_slice(&[0, 1, 2, 2, 1, 3]);
    assert_eq!(pool.total_size(), 24);

    assert!(pool
        .get_as::<BlobItem>(slot, 5, DataKind::TriPtIndices, 42)
        .is_none());

    indices.clear_from(3);
    assert_eq!(indices.to_vec(), vec![0, 1, 2]);
    assert_eq!(pool.total_size(), 12);
    assert!(pool.verify_accounting());
}

#[test]
fn test_size_change_after_eviction_is_ignored() {
    let pool = pool(100, 1);
    let identity = ItemIdentity::new(1, DataKind::DiffSet, 1);
    let vector = Arc::new(VectorItem::with_values(identity, vec![0u8; 60]));
    pool.add(vector.clone());

    // Displaces the still-referenced vector
    pool.add(blob(1, DataKind::DiffSet, 2, 90));
    assert_eq!(pool.stats().forced_evictions, 1);
    assert_eq!(pool.total_size(), 90);

    vector.push_back_slice(&[1, 2, 3, 4]);
    assert_eq!(vector.size(), 64);
    assert_eq!(pool.total_size(), 90);
    assert!(pool.verify_accounting());
}

#[test]
fn test_replace_swaps_item() {
    let pool = pool(1000, 2);
    let slot = pool.add(blob(2, DataKind::DisplayData, 9, 100));

    let update = Arc::new(BlobItem::new(
        ItemIdentity::new(2, DataKind::DisplayData, 9),
        vec![7u8; 250],
    ));
    assert!(pool.replace(update.clone(), slot, 2, DataKind::DisplayData, 9));
    assert_eq!(pool.total_size(), 250);
    assert_eq!(update.slot_id(), slot);

    let found = pool
        .get_as::<BlobItem>(slot, 2, DataKind::DisplayData, 9)
        .unwrap();
    assert_eq!(&found.get_data()[..3], &[7, 7, 7]);
}

#[test]
fn test_concurrent_accounting() {
    let pool = pool(64 * 1024, 4);

    std::thread::scope(|scope| {
        for owner_id in 0..8u64 {
            let pool = &pool;
            scope.spawn(move || {
                for tile_id in 0..200u64 {
                    let identity = ItemIdentity::new(owner_id, DataKind::Points, tile_id);
                    let vector = Arc::new(VectorItem::<f32>::new(identity));
                    let slot = pool.add(vector.clone());

                    vector.extend((0..(tile_id % 32)).map(|v| v as f32));
                    if tile_id % 3 == 0 {
                        vector.clear();
                    }
                    drop(vector);

                    if tile_id % 5 == 0 {
                        pool.remove(slot, owner_id, DataKind::Points, tile_id);
                    } else if let Some(item) =
                        pool.get_typed(slot, owner_id, DataKind::Points, tile_id)
                    {
                        assert_eq!(item.identity().owner_id, owner_id);
                    }
                }
            });
        }
    });

    assert!(pool.verify_accounting());
    let stats = pool.stats();
    assert_eq!(stats.total_bytes, pool.total_size());
    assert!(stats.hits + stats.misses > 0);

    pool.clear();
    assert_eq!(pool.total_size(), 0);
    assert_eq!(pool.occupied_slots(), 0);
}
