//! Per-instance chunk state.
//!
//! A `ChunkIndex` addresses a chunk in its asset; optional indices are
//! `Option<ChunkIndex>` rather than a negative sentinel.

use bevy::math::Vec3;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::math::Pose;
use crate::structure::IslandId;

/// Index of a chunk inside its asset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ChunkIndex(pub u32);

impl ChunkIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for ChunkIndex {
    fn from(v: u32) -> Self {
        ChunkIndex(v)
    }
}

bitflags! {
    /// Runtime state bits of an `ActorChunk`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChunkFlags: u32 {
        const VISIBLE = 1 << 0;
        const DYNAMIC = 1 << 1;
        const CRUMBLED = 1 << 2;
        const BELOW_SUPPORT_DEPTH = 1 << 3;
        const EXTERNALLY_SUPPORTED = 1 << 4;
        const WORLD_SUPPORTED = 1 << 5;
        /// A child was destroyed without leaving visible successors.
        const MISSING_CHILD = 1 << 6;
        const DESTROYED = 1 << 7;
        /// The chunk was replaced by its children.
        const FRACTURED = 1 << 8;
    }
}

/// Lifecycle stage of a chunk, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkState {
    /// Not yet reached by fracture; carried by a visible ancestor.
    Hidden,
    Kinematic,
    Dynamic,
    /// Replaced by its children.
    Fractured,
    Destroyed,
    Crumbled,
}

/// One chunk of a placed actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorChunk {
    pub index: ChunkIndex,
    pub flags: ChunkFlags,
    /// Pose relative to the owning island's physics actor.
    pub island_local: Pose,
    /// Last published world pose.
    pub pose: Pose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// `None` selects the asset's default behavior group.
    pub behavior_group: Option<u16>,
    pub damage: f32,
    pub island: Option<IslandId>,
}

impl ActorChunk {
    pub fn new(index: ChunkIndex, behavior_group: Option<u16>) -> Self {
        Self {
            index,
            flags: ChunkFlags::empty(),
            island_local: Pose::IDENTITY,
            pose: Pose::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            behavior_group,
            damage: 0.0,
            island: None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(ChunkFlags::VISIBLE)
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(ChunkFlags::DYNAMIC)
    }

    pub fn is_destroyed(&self) -> bool {
        self.flags.contains(ChunkFlags::DESTROYED)
    }

    pub fn is_fractured(&self) -> bool {
        self.flags.contains(ChunkFlags::FRACTURED)
    }

    pub fn is_externally_supported(&self) -> bool {
        self.flags.contains(ChunkFlags::EXTERNALLY_SUPPORTED)
    }

    pub fn state(&self) -> ChunkState {
        if self.flags.contains(ChunkFlags::CRUMBLED) {
            ChunkState::Crumbled
        } else if self.is_destroyed() {
            ChunkState::Destroyed
        } else if self.is_fractured() {
            ChunkState::Fractured
        } else if !self.is_visible() {
            ChunkState::Hidden
        } else if self.is_dynamic() {
            ChunkState::Dynamic
        } else {
            ChunkState::Kinematic
        }
    }
}
