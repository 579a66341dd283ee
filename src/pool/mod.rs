//! Tile pool
//!
//! ```text
//!   add(item) ──► TilePool ──► slot table ──► [Slot 0][Slot 1] ... [Slot n]
//!                    │                           │
//!                    │ budget / overflow          └─ Mutex<SlotEntry { item, last_access }>
//!                    ▼
//!              evict unreferenced LRU ─► grow table ─► displace oldest
//! ```
//!
//! Items are addressed by [`SlotId`] plus [`ItemIdentity`]; a slot id on
//! its own says nothing about what the slot currently holds.

mod identity;
mod slot;
mod stats;
mod tile_pool;

pub use identity::{DataKind, ItemIdentity};
pub use slot::SlotId;
pub use stats::PoolStats;
pub use tile_pool::TilePool;
