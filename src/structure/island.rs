//! Islands: connected sets of visible chunks simulated as one rigid body.

use std::collections::BTreeSet;

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::chunk::ChunkIndex;
use crate::math::Pose;
use crate::physics::{ActorHandle, BodyKind};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct IslandId(pub u32);

impl std::fmt::Display for IslandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "island#{}", self.0)
    }
}

/// A chunk of a specific actor; node type of the support graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub actor: ActorId,
    pub chunk: ChunkIndex,
}

impl ChunkRef {
    pub fn new(actor: ActorId, chunk: ChunkIndex) -> Self {
        Self { actor, chunk }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IslandKind {
    /// Held in place by external support.
    Kinematic,
    Dynamic,
}

impl IslandKind {
    pub fn body_kind(self) -> BodyKind {
        match self {
            IslandKind::Kinematic => BodyKind::Kinematic,
            IslandKind::Dynamic => BodyKind::Dynamic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Island {
    pub(crate) id: IslandId,
    pub(crate) kind: IslandKind,
    pub(crate) owner: ActorId,
    pub(crate) chunks: BTreeSet<ChunkRef>,
    /// `None` while the island waits for its physics actor.
    pub(crate) actor: Option<ActorHandle>,
    /// World pose of the island frame; chunk poses are `actor_pose * island_local`.
    pub(crate) actor_pose: Pose,
    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    pub(crate) created_frame: u64,
    /// Seconds simulated since the island became dynamic.
    pub(crate) age: f32,
    /// World centroid when the island became dynamic.
    pub(crate) origin: Vec3,
    pub(crate) shapes_dirty: bool,
    pub(crate) sleeping: bool,
    /// Impulse to apply once the physics actor exists: `(impulse, point)`.
    pub(crate) pending_impulse: Option<(Vec3, Vec3)>,
}

impl Island {
    pub(crate) fn new(id: IslandId, kind: IslandKind, owner: ActorId, actor_pose: Pose, frame: u64) -> Self {
        Self {
            id,
            kind,
            owner,
            chunks: BTreeSet::new(),
            actor: None,
            actor_pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            created_frame: frame,
            age: 0.0,
            origin: actor_pose.position,
            shapes_dirty: true,
            sleeping: false,
            pending_impulse: None,
        }
    }

    pub fn id(&self) -> IslandId {
        self.id
    }

    pub fn kind(&self) -> IslandKind {
        self.kind
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == IslandKind::Dynamic
    }

    /// Actor that created the island; it owns destruction authority.
    pub fn owner(&self) -> ActorId {
        self.owner
    }

    pub fn chunks(&self) -> &BTreeSet<ChunkRef> {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn actor(&self) -> Option<ActorHandle> {
        self.actor
    }

    pub fn is_pending_actor(&self) -> bool {
        self.actor.is_none()
    }

    pub fn actor_pose(&self) -> Pose {
        self.actor_pose
    }

    pub fn created_frame(&self) -> u64 {
        self.created_frame
    }

    pub fn age(&self) -> f32 {
        self.age
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    /// Actors with at least one chunk in this island.
    pub fn member_actors(&self) -> BTreeSet<ActorId> {
        self.chunks.iter().map(|c| c.actor).collect()
    }
}
