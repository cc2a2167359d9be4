//! Transient damage and fracture records.

use bevy::math::Vec3;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::chunk::ChunkIndex;
use crate::physics::ActorHandle;

bitflags! {
    /// Origin and handling bits carried by damage and fracture events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FractureEventFlags: u32 {
        const DAMAGE_FROM_IMPACT = 1 << 0;
        const CRUMBLE = 1 << 1;
        const DELETE_CHUNK = 1 << 2;
        /// Received through a sync buffer; never echoed back out.
        const SYNC_DIRECT = 1 << 24;
        /// Decided locally from damage received through a sync buffer.
        const SYNC_DERIVED = 1 << 25;
        const MANUAL = 1 << 26;
        /// A weak link released by the stress solver.
        const SNAP = 1 << 27;
        const FORCED = 1 << 28;
        const SILENT = 1 << 29;
    }
}

/// One external damage application, queued until the next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    pub actor: ActorId,
    /// `None` asks for a raycast/proximity search.
    pub chunk: Option<ChunkIndex>,
    pub damage: f32,
    pub momentum: f32,
    pub position: Vec3,
    pub direction: Vec3,
    /// Zero for point damage.
    pub radius: f32,
    pub falloff: bool,
    pub flags: FractureEventFlags,
    pub impacting_actor: Option<ActorHandle>,
    pub user_data: u64,
}

impl DamageEvent {
    pub fn point(
        actor: ActorId,
        damage: f32,
        momentum: f32,
        position: Vec3,
        direction: Vec3,
        chunk: Option<ChunkIndex>,
    ) -> Self {
        Self {
            actor,
            chunk,
            damage,
            momentum,
            position,
            direction,
            radius: 0.0,
            falloff: false,
            flags: FractureEventFlags::empty(),
            impacting_actor: None,
            user_data: 0,
        }
    }

    pub fn radius(
        actor: ActorId,
        damage: f32,
        momentum: f32,
        position: Vec3,
        radius: f32,
        falloff: bool,
    ) -> Self {
        Self {
            radius,
            falloff,
            ..Self::point(actor, damage, momentum, position, Vec3::ZERO, None)
        }
    }

    pub fn is_impact(&self) -> bool {
        self.flags.contains(FractureEventFlags::DAMAGE_FROM_IMPACT)
    }
}

/// A decided fracture, waiting for its share of the per-frame budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractureEvent {
    pub actor: ActorId,
    pub chunk: ChunkIndex,
    pub position: Vec3,
    pub direction: Vec3,
    pub impulse: Vec3,
    pub damage: f32,
    pub flags: FractureEventFlags,
    /// Report this fracture contributes to.
    pub report: Option<u64>,
}

impl FractureEvent {
    /// A fracture that skips damage thresholds and reports.
    pub fn forced(actor: ActorId, chunk: ChunkIndex, flags: FractureEventFlags) -> Self {
        Self {
            actor,
            chunk,
            position: Vec3::ZERO,
            direction: Vec3::ZERO,
            impulse: Vec3::ZERO,
            damage: 0.0,
            flags: flags | FractureEventFlags::FORCED,
            report: None,
        }
    }
}

/// Entry of the hit-chunk history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitChunk {
    pub chunk_index: ChunkIndex,
    pub hit_chunk_flags: FractureEventFlags,
}

/// Entry of the damage coloring history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageEventCoreData {
    pub chunk_index: ChunkIndex,
    pub position: Vec3,
    pub damage: f32,
    pub radius: f32,
}

/// One processed impact, batched to `ImpactDamageReport` once per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactDamageEventData {
    pub actor: ActorId,
    pub chunk: Option<ChunkIndex>,
    pub position: Vec3,
    pub direction: Vec3,
    pub damage: f32,
    pub impacting_actor: Option<ActorHandle>,
}
