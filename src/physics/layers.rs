//! Collision groups for destructible bodies.

use bevy_rapier3d::rapier::geometry::{Group, InteractionGroups};

/// Membership groups of rapier colliders created by the runtime.
pub struct PhysicsLayers;

impl PhysicsLayers {
    /// Static scene geometry (world support).
    pub const WORLD: Group = Group::GROUP_1;
    /// Kinematic (supported) chunk islands
    pub const CHUNK_STATIC: Group = Group::GROUP_2;
    /// Simulated chunk islands
    pub const CHUNK_DYNAMIC: Group = Group::GROUP_3;
    /// Anchor body for world-attached joints; collides with nothing.
    pub const ANCHOR: Group = Group::GROUP_4;

    pub fn world() -> InteractionGroups {
        InteractionGroups::new(Self::WORLD, Self::CHUNK_DYNAMIC)
    }

    pub fn chunk_static() -> InteractionGroups {
        InteractionGroups::new(Self::CHUNK_STATIC, Self::CHUNK_DYNAMIC)
    }

    pub fn chunk_dynamic() -> InteractionGroups {
        InteractionGroups::new(
            Self::CHUNK_DYNAMIC,
            Self::WORLD | Self::CHUNK_STATIC | Self::CHUNK_DYNAMIC,
        )
    }

    pub fn anchor() -> InteractionGroups {
        InteractionGroups::new(Self::ANCHOR, Group::NONE)
    }
}
