//! Aggregated reports handed to the application layer.

use bevy::math::Vec3;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::chunk::ChunkIndex;
use crate::math::Bounds3;
use crate::physics::ActorHandle;

bitflags! {
    /// Per-chunk flags in a damage report. Also the bit mask filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ReportChunkFlags: u32 {
        const DYNAMIC = 1;
        const EXTERNALLY_SUPPORTED = 2;
        const WORLD_SUPPORTED = 4;
        const FRACTURED = 8;
        const DESTROYED_FIFO_FULL = 16;
        const DESTROYED_TIMED_OUT = 32;
        const DESTROYED_EXCEEDED_MAX_DISTANCE = 64;
        const DESTROYED_CRUMBLED = 128;
        const DESTROYED_LEFT_VALID_BOUNDS = 256;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    pub index: ChunkIndex,
    /// Depth of the pieces the event produced.
    pub depth: u16,
    pub world_bounds: Bounds3,
    pub damage: f32,
    pub flags: ReportChunkFlags,
}

/// One aggregate per external damage call (or per eviction batch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageEventReport {
    pub actor: ActorId,
    pub hit_direction: Vec3,
    pub hit_position: Vec3,
    pub world_bounds: Bounds3,
    pub total_number_of_fracture_events: u32,
    pub min_depth: u16,
    pub max_depth: u16,
    pub fracture_events: Vec<ChunkData>,
    pub impact_damage_actor: Option<ActorHandle>,
    pub user_data: u64,
}

impl DamageEventReport {
    pub fn new(actor: ActorId, hit_position: Vec3, hit_direction: Vec3) -> Self {
        Self {
            actor,
            hit_direction,
            hit_position,
            world_bounds: Bounds3::EMPTY,
            total_number_of_fracture_events: 0,
            min_depth: u16::MAX,
            max_depth: 0,
            fracture_events: Vec::new(),
            impact_damage_actor: None,
            user_data: 0,
        }
    }

    /// Adds one event. Entries deeper than `max_listed_depth` count toward the
    /// totals and bounds but are not listed.
    pub fn record(&mut self, data: ChunkData, max_listed_depth: u16) {
        self.total_number_of_fracture_events += 1;
        self.min_depth = self.min_depth.min(data.depth);
        self.max_depth = self.max_depth.max(data.depth);
        self.world_bounds.include(&data.world_bounds);
        if data.depth <= max_listed_depth {
            self.fracture_events.push(data);
        }
    }

    /// Normalizes the depth range of an empty report to zero.
    pub fn finish(mut self) -> Self {
        if self.total_number_of_fracture_events == 0 {
            self.min_depth = 0;
            self.max_depth = 0;
        }
        self
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChunkStateEventFlags: u16 {
        const VISIBILITY_CHANGED = 1;
        const CHUNK_VISIBLE = 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStateEvent {
    pub chunk_index: ChunkIndex,
    pub event: ChunkStateEventFlags,
}

impl ChunkStateEvent {
    pub fn visibility(chunk_index: ChunkIndex, visible: bool) -> Self {
        let mut event = ChunkStateEventFlags::VISIBILITY_CHANGED;
        if visible {
            event |= ChunkStateEventFlags::CHUNK_VISIBLE;
        }
        Self { chunk_index, event }
    }

    pub fn is_visible(&self) -> bool {
        self.event.contains(ChunkStateEventFlags::CHUNK_VISIBLE)
    }
}

/// Visibility-change batch for one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStateEventData {
    pub actor: ActorId,
    pub events: Vec<ChunkStateEvent>,
}

/// Crumble effect of one destroyed chunk. `velocities` holds zero, one
/// (shared) or one-per-position entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkParticleReportData {
    pub actor: ActorId,
    pub chunk_index: ChunkIndex,
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
}
