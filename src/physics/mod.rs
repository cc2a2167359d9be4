//! Physics engine seam.
//!
//! The destructible runtime treats rigid-body dynamics as a black box behind
//! `PhysicsBackend`. Two backends ship with the crate:
//!
//! - [`HeadlessPhysics`]: bookkeeping-only integration (servers, tests).
//! - [`RapierPhysics`]: rapier pipeline from `bevy_rapier3d`.
//!
//! The backend lives behind a shared `RwLock`. Queries take the read lock,
//! and adding or removing actors takes the write lock.

pub mod headless;
pub mod layers;
pub mod rapier;

pub use headless::HeadlessPhysics;
pub use layers::PhysicsLayers;
pub use rapier::RapierPhysics;

use std::sync::Arc;

use bevy::math::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::math::{Bounds3, Pose};

/// Opaque handle of a rigid actor owned by the backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ActorHandle(pub u64);

/// Opaque handle of a joint owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JointHandle(pub u64);

/// Handle of a static scene box (world geometry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StaticHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    Kinematic,
    Dynamic,
}

/// One collision box of an actor, posed relative to the actor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeDesc {
    pub local_pose: Pose,
    pub half_extents: Vec3,
    /// Packed chunk reference (actor id << 32 | chunk index).
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidActorDesc {
    pub kind: BodyKind,
    pub pose: Pose,
    pub shapes: Vec<ShapeDesc>,
    pub mass: f32,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub user_data: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointKind {
    Fixed,
    Spherical,
}

/// Backend-side description of a joint. `None` endpoints attach to the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointBinding {
    pub kind: JointKind,
    pub actors: [Option<ActorHandle>; 2],
    /// Anchor frames in each endpoint's actor space (world space for `None`).
    pub local_frames: [Pose; 2],
}

/// Static-geometry overlap queries used by world support.
pub trait StaticQuery {
    fn overlaps_static(&self, bounds: &Bounds3) -> bool;
}

pub trait PhysicsBackend: StaticQuery + Send + Sync + 'static {
    fn create_actor(&mut self, desc: &RigidActorDesc) -> Option<ActorHandle>;
    fn release_actor(&mut self, handle: ActorHandle) -> bool;
    fn contains_actor(&self, handle: ActorHandle) -> bool;
    fn set_actor_shapes(&mut self, handle: ActorHandle, shapes: &[ShapeDesc], mass: f32) -> bool;
    fn global_pose(&self, handle: ActorHandle) -> Option<Pose>;
    fn set_global_pose(&mut self, handle: ActorHandle, pose: Pose) -> bool;
    /// `(linear, angular)`
    fn velocities(&self, handle: ActorHandle) -> Option<(Vec3, Vec3)>;
    fn apply_impulse(&mut self, handle: ActorHandle, impulse: Vec3, point: Vec3) -> bool;
    fn is_sleeping(&self, handle: ActorHandle) -> bool;
    fn set_awake(&mut self, handle: ActorHandle, awake: bool) -> bool;

    /// Takes an actor out of the simulation without releasing it.
    fn remove_from_scene(&mut self, handle: ActorHandle) -> bool;
    fn add_to_scene(&mut self, handle: ActorHandle) -> bool;

    fn create_joint(&mut self, binding: &JointBinding) -> Option<JointHandle>;
    fn joint_actors(&self, joint: JointHandle) -> Option<[Option<ActorHandle>; 2]>;
    fn set_joint_actors(
        &mut self,
        joint: JointHandle,
        actors: [Option<ActorHandle>; 2],
        local_frames: [Pose; 2],
    ) -> bool;
    fn release_joint(&mut self, joint: JointHandle) -> bool;

    fn add_static_box(&mut self, bounds: Bounds3) -> StaticHandle;
    fn remove_static(&mut self, handle: StaticHandle) -> Option<Bounds3>;

    fn simulate(&mut self, dt: f32);
}

/// Physics backend shared between the scene, joints and the host.
pub type SharedPhysics<P> = Arc<RwLock<P>>;

pub fn shared<P: PhysicsBackend>(backend: P) -> SharedPhysics<P> {
    Arc::new(RwLock::new(backend))
}

/// Packs a chunk reference into shape user data.
pub fn pack_chunk_ref(actor: u32, chunk: u32) -> u64 {
    (u64::from(actor) << 32) | u64::from(chunk)
}

pub fn unpack_chunk_ref(data: u64) -> (u32, u32) {
    ((data >> 32) as u32, data as u32)
}
