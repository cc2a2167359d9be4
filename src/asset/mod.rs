//! Chunk hierarchy (asset side, read-only at runtime).
//!
//! A `DestructibleAsset` is a forest of chunk descriptors laid out so that
//! the children of every chunk occupy a contiguous index range. Assets are
//! produced by an offline baking step; `AssetBuilder` is the in-process
//! equivalent used by tools, tests and the harness.
//!
//! ## Layout
//!
//! ```text
//!   depth 0      [0]
//!                 |
//!   depth 1   [1][2][3][4]          first_child = 1, num_children = 4
//!              |
//!   depth 2   [5..9) [9..13) ...    children stay contiguous per parent
//! ```

pub mod behavior;
pub mod builder;

pub use behavior::{BehaviorGroup, DamageSpread};
pub use builder::{AssetBuilder, NodeId};

use bevy::math::Vec3;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkIndex;
use crate::error::{DestructibleError, Result};
use crate::math::Bounds3;

bitflags! {
    /// Authoring flags baked into a chunk descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AssetChunkFlags: u32 {
        /// Eligible for asset-defined support at the support depth.
        const SUPPORT = 1 << 0;
        const UNFRACTURABLE = 1 << 1;
        const UNDAMAGEABLE = 1 << 2;
        const UNCRUMBLEABLE = 1 << 3;
    }
}

bitflags! {
    /// Behavior switches of `DestructibleParameters`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ParameterFlags: u32 {
        const ACCUMULATE_DAMAGE = 1 << 0;
        const DEBRIS_TIMEOUT = 1 << 1;
        const DEBRIS_MAX_SEPARATION = 1 << 2;
        const CRUMBLE_SMALLEST_CHUNKS = 1 << 3;
        const WORLD_SUPPORT = 1 << 4;
        const ASSET_DEFINED_SUPPORT = 1 << 5;
        const USE_VALID_BOUNDS = 1 << 6;
        /// Snap overhanging structure that hangs off a single weak link.
        const USE_STRESS_SOLVER = 1 << 7;
    }
}

/// Immutable descriptor of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub index: ChunkIndex,
    pub depth: u16,
    pub parent: Option<ChunkIndex>,
    pub first_child: Option<ChunkIndex>,
    pub num_children: u16,
    /// Collision hull, approximated by its box in asset space.
    pub hull: Bounds3,
    pub sphere_center: Vec3,
    pub sphere_radius: f32,
    pub flags: AssetChunkFlags,
    /// `None` selects the default behavior group.
    pub behavior_group: Option<u16>,
}

impl ChunkDescriptor {
    pub fn is_leaf(&self) -> bool {
        self.num_children == 0
    }

    pub fn children(&self) -> impl Iterator<Item = ChunkIndex> {
        let start = self.first_child.map_or(0, |c| c.0);
        let end = if self.first_child.is_some() {
            start + u32::from(self.num_children)
        } else {
            start
        };
        (start..end).map(ChunkIndex)
    }

    pub fn centroid(&self) -> Vec3 {
        self.hull.center()
    }
}

/// Per-asset runtime parameters. Actors may override them at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestructibleParameters {
    /// Depth at which the support graph is evaluated.
    pub support_depth: u16,
    /// Chunks shallower than this never fracture.
    pub minimum_fracture_depth: u16,
    /// Dynamic islands made only of chunks at this depth or deeper are debris.
    pub debris_depth: Option<u16>,
    pub debris_lifetime_min: f32,
    pub debris_lifetime_max: f32,
    pub debris_max_separation_min: f32,
    pub debris_max_separation_max: f32,
    /// World-space region dynamic islands must stay inside.
    pub valid_bounds: Bounds3,
    /// Padding for static-geometry overlap when testing world support.
    pub support_padding: f32,
    /// Approximate spacing between crumble particles.
    pub crumble_particle_spacing: f32,
    /// Impulse applied to freshly broken-off chunks per unit of damage.
    pub fracture_impulse_scale: f32,
    /// Upper bound on the damage one event deals to one chunk. Zero disables.
    #[serde(default)]
    pub damage_cap: f32,
    /// How many levels below the visible chunk damage may descend looking
    /// for a fracturable chunk.
    #[serde(default = "unlimited_depth")]
    pub damage_depth_limit: u16,
    /// Seconds between the stress solver finding a weak link and snapping it.
    #[serde(default)]
    pub stress_solver_time_delay: f32,
    /// Overhangs at or below this mass never snap.
    #[serde(default)]
    pub stress_solver_mass_threshold: f32,
    pub flags: ParameterFlags,
}

fn unlimited_depth() -> u16 {
    u16::MAX
}

impl Default for DestructibleParameters {
    fn default() -> Self {
        Self {
            support_depth: 0,
            minimum_fracture_depth: 0,
            debris_depth: None,
            debris_lifetime_min: 1.0,
            debris_lifetime_max: 10.0,
            debris_max_separation_min: 1.0,
            debris_max_separation_max: 10.0,
            valid_bounds: Bounds3::from_center_extents(Vec3::ZERO, Vec3::splat(500.0)),
            support_padding: 0.01,
            crumble_particle_spacing: 0.25,
            fracture_impulse_scale: 0.0,
            damage_cap: 0.0,
            damage_depth_limit: unlimited_depth(),
            stress_solver_time_delay: 1.0,
            stress_solver_mass_threshold: 0.0,
            flags: ParameterFlags::WORLD_SUPPORT | ParameterFlags::ASSET_DEFINED_SUPPORT,
        }
    }
}

impl DestructibleParameters {
    pub fn has(&self, flag: ParameterFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// A baked destructible asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestructibleAsset {
    pub name: String,
    chunks: Vec<ChunkDescriptor>,
    default_behavior_group: BehaviorGroup,
    behavior_groups: Vec<BehaviorGroup>,
    /// Chunk pairs whose padded hulls touch and that are not ancestor/descendant.
    neighbors: Vec<(ChunkIndex, ChunkIndex)>,
    depth_count: u16,
    bounds: Bounds3,
    pub parameters: DestructibleParameters,
}

impl DestructibleAsset {
    pub(crate) fn from_parts(
        name: String,
        chunks: Vec<ChunkDescriptor>,
        default_behavior_group: BehaviorGroup,
        behavior_groups: Vec<BehaviorGroup>,
        neighbors: Vec<(ChunkIndex, ChunkIndex)>,
        parameters: DestructibleParameters,
    ) -> Result<Self> {
        let depth_count = chunks.iter().map(|c| c.depth + 1).max().unwrap_or(0);
        let mut bounds = Bounds3::EMPTY;
        for chunk in chunks.iter().filter(|c| c.depth == 0) {
            bounds.include(&chunk.hull);
        }
        let asset = Self {
            name,
            chunks,
            default_behavior_group,
            behavior_groups,
            neighbors,
            depth_count,
            bounds,
            parameters,
        };
        asset.validate()?;
        Ok(asset)
    }

    /// Checks the forest layout and parameter sanity.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DestructibleError::InvalidAsset(msg));
        if self.chunks.is_empty() {
            return invalid("asset has no chunks".to_string());
        }
        if !self.default_behavior_group.is_valid() {
            return invalid("default behavior group is invalid".to_string());
        }
        for (i, group) in self.behavior_groups.iter().enumerate() {
            if !group.is_valid() {
                return invalid(format!("behavior group {i} ({}) is invalid", group.name));
            }
        }
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.index.as_usize() != i {
                return invalid(format!("chunk {i} carries index {}", chunk.index));
            }
            match chunk.parent {
                None if chunk.depth != 0 => {
                    return invalid(format!("root chunk {i} has depth {}", chunk.depth));
                }
                Some(parent) => {
                    let Some(p) = self.chunks.get(parent.as_usize()) else {
                        return invalid(format!("chunk {i} has missing parent {parent}"));
                    };
                    if p.depth + 1 != chunk.depth {
                        return invalid(format!("chunk {i} depth does not follow parent"));
                    }
                    if !p.children().any(|c| c == chunk.index) {
                        return invalid(format!("chunk {i} is outside its parent's child range"));
                    }
                }
                None => {}
            }
            for child in chunk.children() {
                match self.chunks.get(child.as_usize()) {
                    Some(c) if c.parent == Some(chunk.index) => {}
                    _ => return invalid(format!("chunk {i} lists a foreign child {child}")),
                }
            }
            if let Some(group) = chunk.behavior_group {
                if usize::from(group) >= self.behavior_groups.len() {
                    return invalid(format!("chunk {i} references behavior group {group}"));
                }
            }
        }
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, index: ChunkIndex) -> Option<&ChunkDescriptor> {
        self.chunks.get(index.as_usize())
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    pub fn contains(&self, index: ChunkIndex) -> bool {
        index.as_usize() < self.chunks.len()
    }

    /// Number of hierarchy levels (max depth + 1).
    pub fn depth_count(&self) -> u16 {
        self.depth_count
    }

    pub fn bounds(&self) -> Bounds3 {
        self.bounds
    }

    /// Diagonal length of the root bounds, used by the legacy damage radius.
    pub fn size(&self) -> f32 {
        (self.bounds.half_extents() * 2.0).length()
    }

    pub fn roots(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.iter().filter(|c| c.parent.is_none())
    }

    pub fn chunks_at_depth(&self, depth: u16) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.iter().filter(move |c| c.depth == depth)
    }

    pub fn neighbors(&self) -> &[(ChunkIndex, ChunkIndex)] {
        &self.neighbors
    }

    pub fn default_behavior_group(&self) -> &BehaviorGroup {
        &self.default_behavior_group
    }

    pub fn behavior_groups(&self) -> &[BehaviorGroup] {
        &self.behavior_groups
    }

    /// Resolves an optional custom group, falling back to the default group.
    pub fn behavior_group(&self, index: Option<u16>) -> &BehaviorGroup {
        index
            .and_then(|i| self.behavior_groups.get(usize::from(i)))
            .unwrap_or(&self.default_behavior_group)
    }

    /// True if `ancestor` lies strictly above `chunk` in the same tree.
    pub fn is_ancestor(&self, ancestor: ChunkIndex, chunk: ChunkIndex) -> bool {
        let mut current = self.chunk(chunk).and_then(|c| c.parent);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.chunk(p).and_then(|c| c.parent);
        }
        false
    }

    /// Walks up from `chunk` until reaching `depth`. Chunks shallower than `depth` map to themselves.
    pub fn ancestor_at_depth(&self, chunk: ChunkIndex, depth: u16) -> Option<ChunkIndex> {
        let mut current = self.chunk(chunk)?;
        while current.depth > depth {
            current = self.chunk(current.parent?)?;
        }
        Some(current.index)
    }

    /// Chunks at the support depth, plus shallower leaves.
    pub fn support_depth_chunks(&self, support_depth: u16) -> Vec<ChunkIndex> {
        self.chunks
            .iter()
            .filter(|c| c.depth == support_depth || (c.depth < support_depth && c.is_leaf()))
            .map(|c| c.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower() -> DestructibleAsset {
        AssetBuilder::subdivided_box("tower", Vec3::new(2.0, 1.0, 2.0), 3)
            .build()
            .unwrap()
    }

    #[test]
    fn test_subdivided_layout() {
        let asset = tower();
        assert_eq!(asset.chunk_count(), 21);
        assert_eq!(asset.depth_count(), 3);
        assert_eq!(asset.chunks_at_depth(1).count(), 4);
        assert_eq!(asset.chunks_at_depth(2).count(), 16);
        let root = asset.chunk(ChunkIndex(0)).unwrap();
        assert_eq!(root.children().collect::<Vec<_>>().len(), 4);
        for child in root.children() {
            assert_eq!(asset.chunk(child).unwrap().parent, Some(ChunkIndex(0)));
        }
    }

    #[test]
    fn test_hierarchy_depth_invariant() {
        let asset = tower();
        for chunk in asset.chunks() {
            if let Some(parent) = chunk.parent {
                assert_eq!(asset.chunk(parent).unwrap().depth + 1, chunk.depth);
            } else {
                assert_eq!(chunk.depth, 0);
            }
        }
    }

    #[test]
    fn test_ancestor_queries() {
        let asset = tower();
        let leaf = asset.chunks_at_depth(2).next().unwrap().index;
        assert!(asset.is_ancestor(ChunkIndex(0), leaf));
        assert!(!asset.is_ancestor(leaf, ChunkIndex(0)));
        let mid = asset.ancestor_at_depth(leaf, 1).unwrap();
        assert_eq!(asset.chunk(mid).unwrap().depth, 1);
        assert_eq!(asset.ancestor_at_depth(leaf, 0), Some(ChunkIndex(0)));
    }

    #[test]
    fn test_neighbors_exclude_lineage() {
        let asset = tower();
        assert!(!asset.neighbors().is_empty());
        for &(a, b) in asset.neighbors() {
            assert!(!asset.is_ancestor(a, b) && !asset.is_ancestor(b, a));
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_behavior_group_fallback() {
        let asset = tower();
        assert_eq!(asset.behavior_group(None).name, "default");
        assert_eq!(asset.behavior_group(Some(42)).name, "default");
    }
}
