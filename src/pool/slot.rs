//! Slot management for the tile pool

use crate::item::SharedItem;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a slot in the pool table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(u64);

impl SlotId {
    /// Sentinel meaning "no slot"
    pub const UNDEFINED: SlotId = SlotId(u64::MAX);

    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn is_defined(&self) -> bool {
        *self != Self::UNDEFINED
    }

    /// Table index, `None` for the sentinel
    pub fn index(&self) -> Option<usize> {
        if self.is_defined() {
            usize::try_from(self.0).ok()
        } else {
            None
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl From<usize> for SlotId {
    fn from(index: usize) -> Self {
        Self(index as u64)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_defined() {
            write!(f, "Slot({})", self.0)
        } else {
            f.write_str("Slot(undefined)")
        }
    }
}

/// Contents of a slot, guarded by the slot lock
#[derive(Default)]
pub(crate) struct SlotEntry {
    pub(crate) item: Option<SharedItem>,
    /// Logical clock value of the last access
    pub(crate) last_access: u64,
}

impl SlotEntry {
    pub(crate) fn is_empty(&self) -> bool {
        self.item.is_none()
    }

    pub(crate) fn size(&self) -> u64 {
        self.item.as_ref().map_or(0, |item| item.size())
    }

    /// True when the pool holds the only reference to the occupant
    pub(crate) fn is_solely_owned(&mut self) -> bool {
        match self.item.as_mut() {
            Some(item) => std::sync::Arc::get_mut(item).is_some(),
            None => false,
        }
    }
}

/// A slot in the pool table
#[derive(Default)]
pub(crate) struct Slot {
    entry: Mutex<SlotEntry>,
}

impl Slot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotEntry> {
        self.entry.lock()
    }
}
