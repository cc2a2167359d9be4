//! Fixed-layout sync records.
//!
//! Every unit encodes to exactly `WIRE_SIZE` bytes under the fixed-int
//! little-endian bincode options used by the buffer codec. Optional chunk
//! indices travel as `NO_CHUNK`.

use bevy::math::{Quat, Vec3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::chunk::ChunkIndex;
use crate::fracture::{DamageEvent, FractureEvent, FractureEventFlags};
use crate::math::Pose;

/// Wire value of an absent chunk index.
pub const NO_CHUNK: u32 = u32::MAX;

pub trait SyncUnit: Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Tag stored in the buffer preamble.
    const KIND: u16;
    const WIRE_SIZE: usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageEventUnit {
    pub chunk_index: u32,
    pub damage_event_flags: u32,
    pub damage: f32,
    pub momentum: f32,
    pub radius: f32,
    pub falloff: bool,
    pub position: [f32; 3],
    pub direction: [f32; 3],
}

impl SyncUnit for DamageEventUnit {
    const KIND: u16 = 1;
    const WIRE_SIZE: usize = 4 * 5 + 1 + 12 * 2;
}

impl DamageEventUnit {
    pub fn from_event(event: &DamageEvent) -> Self {
        Self {
            chunk_index: event.chunk.map_or(NO_CHUNK, |c| c.0),
            damage_event_flags: event.flags.bits(),
            damage: event.damage,
            momentum: event.momentum,
            radius: event.radius,
            falloff: event.falloff,
            position: event.position.to_array(),
            direction: event.direction.to_array(),
        }
    }

    /// The damage event to re-apply on the receiving side.
    pub fn to_event(&self, actor: ActorId) -> DamageEvent {
        DamageEvent {
            actor,
            chunk: (self.chunk_index != NO_CHUNK).then_some(ChunkIndex(self.chunk_index)),
            damage: self.damage,
            momentum: self.momentum,
            position: Vec3::from_array(self.position),
            direction: Vec3::from_array(self.direction),
            radius: self.radius,
            falloff: self.falloff,
            flags: FractureEventFlags::from_bits_truncate(self.damage_event_flags)
                | FractureEventFlags::SYNC_DIRECT,
            impacting_actor: None,
            user_data: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FractureEventUnit {
    pub chunk_index: u32,
    pub fracture_event_flags: u32,
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub impulse: [f32; 3],
}

impl SyncUnit for FractureEventUnit {
    const KIND: u16 = 2;
    const WIRE_SIZE: usize = 4 * 2 + 12 * 3;
}

impl FractureEventUnit {
    pub fn from_event(event: &FractureEvent) -> Self {
        Self {
            chunk_index: event.chunk.0,
            fracture_event_flags: event.flags.bits(),
            position: event.position.to_array(),
            direction: event.direction.to_array(),
            impulse: event.impulse.to_array(),
        }
    }

    /// A forced fracture marked as received through sync.
    pub fn to_event(&self, actor: ActorId) -> FractureEvent {
        FractureEvent {
            position: Vec3::from_array(self.position),
            direction: Vec3::from_array(self.direction),
            impulse: Vec3::from_array(self.impulse),
            ..FractureEvent::forced(
                actor,
                ChunkIndex(self.chunk_index),
                FractureEventFlags::from_bits_truncate(self.fracture_event_flags)
                    | FractureEventFlags::SYNC_DIRECT,
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkTransformUnit {
    pub chunk_index: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl SyncUnit for ChunkTransformUnit {
    const KIND: u16 = 3;
    const WIRE_SIZE: usize = 4 + 12 + 16;
}

impl ChunkTransformUnit {
    pub fn new(chunk: ChunkIndex, pose: &Pose) -> Self {
        Self {
            chunk_index: chunk.0,
            position: pose.position.to_array(),
            rotation: pose.rotation.to_array(),
        }
    }

    pub fn chunk(&self) -> ChunkIndex {
        ChunkIndex(self.chunk_index)
    }

    pub fn pose(&self) -> Pose {
        Pose::new(
            Vec3::from_array(self.position),
            Quat::from_array(self.rotation).normalize(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::buffer::wire_options;
    use bincode::Options;

    #[test]
    fn test_wire_sizes_match_encoding() {
        let damage = DamageEventUnit::from_event(&DamageEvent::point(
            ActorId(0),
            1.0,
            2.0,
            Vec3::ONE,
            Vec3::Z,
            Some(ChunkIndex(3)),
        ));
        let fracture = FractureEventUnit::from_event(&FractureEvent::forced(
            ActorId(0),
            ChunkIndex(1),
            FractureEventFlags::empty(),
        ));
        let transform = ChunkTransformUnit::new(ChunkIndex(2), &Pose::IDENTITY);
        let opts = wire_options();
        assert_eq!(opts.serialized_size(&damage).unwrap() as usize, DamageEventUnit::WIRE_SIZE);
        assert_eq!(opts.serialized_size(&fracture).unwrap() as usize, FractureEventUnit::WIRE_SIZE);
        assert_eq!(opts.serialized_size(&transform).unwrap() as usize, ChunkTransformUnit::WIRE_SIZE);
    }

    #[test]
    fn test_received_damage_is_marked_direct() {
        let event = DamageEvent::radius(ActorId(4), 3.0, 0.0, Vec3::X, 2.0, true);
        let unit = DamageEventUnit::from_event(&event);
        assert_eq!(unit.chunk_index, NO_CHUNK);
        let received = unit.to_event(ActorId(9));
        assert_eq!(received.actor, ActorId(9));
        assert!(received.chunk.is_none());
        assert!(received.falloff);
        assert!(received.flags.contains(FractureEventFlags::SYNC_DIRECT));
    }

    #[test]
    fn test_received_fracture_is_forced() {
        let unit = FractureEventUnit {
            chunk_index: 7,
            fracture_event_flags: FractureEventFlags::CRUMBLE.bits(),
            position: [0.0; 3],
            direction: [0.0, 0.0, 1.0],
            impulse: [0.0; 3],
        };
        let event = unit.to_event(ActorId(1));
        assert_eq!(event.chunk, ChunkIndex(7));
        assert!(event.flags.contains(
            FractureEventFlags::CRUMBLE | FractureEventFlags::FORCED | FractureEventFlags::SYNC_DIRECT
        ));
        assert!(event.report.is_none());
    }
}
