//! Tile identity: owner, data kind and tile id

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic category of a cached payload
///
/// New kinds are appended at the end; existing discriminants never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Point positions
    Points,
    /// Triangle indices into the point array
    TriPtIndices,
    /// Triangle indices into the uv array
    TriUvIndices,
    /// Texture coordinates
    UvCoords,
    /// Edit diff-sets
    DiffSet,
    /// Mesh topology graph
    Graph,
    /// Texture bitmap
    Texture,
    /// Display-only data (GPU side caches)
    DisplayData,
    /// Unclassified payload
    Unknown,
    /// Linear features (breaklines, boundaries)
    Feature,
    /// Triangulated DTM payload
    DtmData,
}

impl DataKind {
    /// Stable lower-case name used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Points => "points",
            DataKind::TriPtIndices => "tri_pt_indices",
            DataKind::TriUvIndices => "tri_uv_indices",
            DataKind::UvCoords => "uv_coords",
            DataKind::DiffSet => "diff_set",
            DataKind::Graph => "graph",
            DataKind::Texture => "texture",
            DataKind::DisplayData => "display_data",
            DataKind::Unknown => "unknown",
            DataKind::Feature => "feature",
            DataKind::DtmData => "dtm_data",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identity of a cached tile payload
///
/// Two items describe the same tile only when owner, kind and tile id all
/// match. Slot ids are never part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub owner_id: u64,
    pub kind: DataKind,
    pub tile_id: u64,
}

impl ItemIdentity {
    pub fn new(owner_id: u64, kind: DataKind, tile_id: u64) -> Self {
        Self {
            owner_id,
            kind,
            tile_id,
        }
    }

    /// Owner and kind match, any tile
    pub fn matches_kind(&self, owner_id: u64, kind: DataKind) -> bool {
        self.owner_id == owner_id && self.kind == kind
    }

    pub fn matches(&self, owner_id: u64, kind: DataKind, tile_id: u64) -> bool {
        self.matches_kind(owner_id, kind) && self.tile_id == tile_id
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tile(owner={}, kind={}, tile={})",
            self.owner_id, self.kind, self.tile_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_matching() {
        let id = ItemIdentity::new(1, DataKind::Points, 10);

        assert!(id.matches(1, DataKind::Points, 10));
        assert!(id.matches_kind(1, DataKind::Points));

        assert!(!id.matches(2, DataKind::Points, 10));
        assert!(!id.matches(1, DataKind::Texture, 10));
        assert!(!id.matches(1, DataKind::Points, 11));
        assert!(!id.matches_kind(1, DataKind::Texture));
    }

    #[test]
    fn test_identity_display() {
        let id = ItemIdentity::new(3, DataKind::TriPtIndices, 42);
        assert_eq!(id.to_string(), "Tile(owner=3, kind=tri_pt_indices, tile=42)");
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&DataKind::UvCoords).unwrap();
        assert_eq!(json, "\"uv_coords\"");

        let kind: DataKind = serde_json::from_str("\"dtm_data\"").unwrap();
        assert_eq!(kind, DataKind::DtmData);
    }
}
