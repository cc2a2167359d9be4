//! Joints anchored on destructible chunks.
//!
//! A joint binds up to two chunks (or a chunk and the world) through a
//! backend joint. Fracture can move a chunk into a different island, and so
//! a different physics actor; `update_joint` follows each endpoint to its
//! successor's actor and swaps the backend joint's bodies when they changed.

use bevy::math::{Mat3, Quat, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actor::{ActorId, ActorStore, DestructibleActor};
use crate::chunk::ChunkIndex;
use crate::error::{DestructibleError, Result};
use crate::math::{is_unit, Pose};
use crate::physics::{ActorHandle, JointBinding, JointHandle, JointKind, PhysicsBackend};
use crate::structure::{successor, ChunkRef, Resolution, SupportStructure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JointId(pub u32);

impl std::fmt::Display for JointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "joint#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestructibleActorJointDesc {
    pub kind: JointKind,
    /// `None` anchors that side to the world.
    pub actors: [Option<ActorId>; 2],
    /// `None` picks the intact leaf chunk nearest to the anchor.
    pub chunks: [Option<ChunkIndex>; 2],
    pub global_anchors: [Vec3; 2],
    pub global_axes: [Vec3; 2],
    pub global_normals: [Vec3; 2],
}

impl Default for DestructibleActorJointDesc {
    fn default() -> Self {
        Self {
            kind: JointKind::Fixed,
            actors: [None, None],
            chunks: [None, None],
            global_anchors: [Vec3::ZERO; 2],
            global_axes: [Vec3::X; 2],
            global_normals: [Vec3::Y; 2],
        }
    }
}

impl DestructibleActorJointDesc {
    pub fn validate(&self) -> Result<()> {
        if self.actors.iter().all(Option::is_none) {
            return Err(DestructibleError::InvalidJointDesc("no destructible endpoint"));
        }
        for i in 0..2 {
            let (axis, normal) = (self.global_axes[i], self.global_normals[i]);
            if !is_unit(axis) {
                return Err(DestructibleError::InvalidJointDesc("axis is not unit length"));
            }
            if !is_unit(normal) {
                return Err(DestructibleError::InvalidJointDesc("normal is not unit length"));
            }
            if axis.dot(normal).abs() > 1.0e-3 {
                return Err(DestructibleError::InvalidJointDesc("axis and normal are not orthogonal"));
            }
            if !self.global_anchors[i].is_finite() {
                return Err(DestructibleError::InvalidJointDesc("anchor is not finite"));
            }
            if self.chunks[i].is_some() && self.actors[i].is_none() {
                return Err(DestructibleError::InvalidJointDesc("chunk given for a world endpoint"));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// World frame of one side: x along the axis, y along the normal.
    fn global_frame(&self, side: usize) -> Pose {
        let axis = self.global_axes[side];
        let normal = self.global_normals[side];
        let basis = Mat3::from_cols(axis, normal, axis.cross(normal));
        Pose::new(self.global_anchors[side], Quat::from_mat3(&basis).normalize())
    }
}

#[derive(Debug, Clone)]
pub struct DestructibleActorJoint {
    joint: JointHandle,
    kind: JointKind,
    endpoints: [Option<ChunkRef>; 2],
    /// Anchor frames in the endpoint chunk's asset frame (world for `None`).
    chunk_frames: [Pose; 2],
    /// Frames last handed to the backend, in the bound actors' local space.
    bound_frames: [Pose; 2],
}

impl DestructibleActorJoint {
    /// Resolves both endpoints and creates the backend joint. Fails when
    /// neither side resolves to a live physics actor.
    pub fn new<P: PhysicsBackend>(
        desc: &DestructibleActorJointDesc,
        actors: &ActorStore,
        structure: &SupportStructure,
        physics: &RwLock<P>,
    ) -> Result<Self> {
        desc.validate()?;
        let mut endpoints = [None, None];
        let mut chunk_frames = [Pose::IDENTITY; 2];
        let mut handles = [None, None];
        let mut local_frames = [Pose::IDENTITY; 2];
        for side in 0..2 {
            let world = desc.global_frame(side);
            chunk_frames[side] = world;
            local_frames[side] = world;
            let Some(actor_id) = desc.actors[side] else {
                continue;
            };
            let actor = actors
                .get(actor_id)
                .ok_or(DestructibleError::UnknownActor(actor_id))?;
            let chunk = match desc.chunks[side] {
                Some(chunk) => {
                    actor.check_chunk(chunk)?;
                    Some(chunk)
                }
                None => nearest_intact_leaf(actor, structure, actors, desc.global_anchors[side]),
            };
            let Some(chunk) = chunk else {
                warn!(actor = %actor_id, side, "joint endpoint found no intact chunk");
                continue;
            };
            let r = ChunkRef::new(actor_id, chunk);
            let Some(handle) = structure.chunk_intact(actors, r) else {
                warn!(actor = %actor_id, chunk = %chunk, side, "joint endpoint chunk has no live actor");
                continue;
            };
            let Some((frame, local)) = endpoint_frames(actors, r, world) else {
                continue;
            };
            endpoints[side] = Some(r);
            chunk_frames[side] = frame;
            local_frames[side] = local;
            handles[side] = Some(handle);
        }
        if handles.iter().all(Option::is_none) {
            return Err(DestructibleError::JointUnresolved);
        }
        let binding = JointBinding {
            kind: desc.kind,
            actors: handles,
            local_frames,
        };
        let joint = physics
            .write()
            .create_joint(&binding)
            .ok_or(DestructibleError::JointUnresolved)?;
        debug!(?joint, ?endpoints, "destructible joint created");
        Ok(Self {
            joint,
            kind: desc.kind,
            endpoints,
            chunk_frames,
            bound_frames: local_frames,
        })
    }

    pub fn joint(&self) -> JointHandle {
        self.joint
    }

    pub fn kind(&self) -> JointKind {
        self.kind
    }

    pub fn endpoints(&self) -> [Option<ChunkRef>; 2] {
        self.endpoints
    }

    /// Backend actors the joint references right now.
    pub fn bound_actors<P: PhysicsBackend>(&self, physics: &RwLock<P>) -> Option<[Option<ActorHandle>; 2]> {
        physics.read().joint_actors(self.joint)
    }

    /// Re-points the joint at the actors currently representing its chunks.
    ///
    /// Returns `false` when an endpoint chunk is gone for good; the joint is
    /// broken and the owner should release it. Each side resolves on its own:
    /// an endpoint whose island is still waiting for its physics actor keeps
    /// its old binding (or none, once that actor is released) while the other
    /// side is rebound.
    pub fn update_joint<P: PhysicsBackend>(
        &mut self,
        actors: &ActorStore,
        structure: &SupportStructure,
        physics: &RwLock<P>,
        reattach_workaround: bool,
    ) -> bool {
        let (current, wanted, frames) = {
            let backend = physics.read();
            let Some(current) = backend.joint_actors(self.joint) else {
                return false;
            };
            let mut wanted = current;
            let mut frames = self.bound_frames;
            for side in 0..2 {
                let Some(r) = self.endpoints[side] else {
                    continue;
                };
                match structure.resolve(actors, r) {
                    Resolution::Actor(handle) => {
                        wanted[side] = Some(handle);
                        let local = actors
                            .get(r.actor)
                            .and_then(|a| successor(a, r.chunk).and_then(|s| a.chunk(s)))
                            .map(|c| c.island_local.mul(&self.chunk_frames[side]));
                        if let Some(local) = local {
                            frames[side] = local;
                        }
                    }
                    Resolution::Pending(_) => {
                        if wanted[side].is_some_and(|h| !backend.contains_actor(h)) {
                            wanted[side] = None;
                        }
                    }
                    Resolution::Gone => {
                        warn!(joint = ?self.joint, side, chunk = ?r, "joint endpoint destroyed");
                        return false;
                    }
                }
            }
            (current, wanted, frames)
        };
        if current == wanted {
            return true;
        }
        let mut backend = physics.write();
        let swapped: Vec<ActorHandle> = wanted.iter().flatten().copied().collect();
        if reattach_workaround {
            for &handle in &swapped {
                backend.remove_from_scene(handle);
            }
        }
        let ok = backend.set_joint_actors(self.joint, wanted, frames);
        if ok {
            self.bound_frames = frames;
        }
        if reattach_workaround {
            for &handle in &swapped {
                backend.add_to_scene(handle);
            }
        }
        debug!(joint = ?self.joint, ?current, ?wanted, ok, "joint reattached");
        ok
    }

    pub fn release<P: PhysicsBackend>(self, physics: &RwLock<P>) -> bool {
        physics.write().release_joint(self.joint)
    }
}

/// Asset-frame and island-local anchor frames for an endpoint chunk.
fn endpoint_frames(actors: &ActorStore, r: ChunkRef, world: Pose) -> Option<(Pose, Pose)> {
    let actor = actors.get(r.actor)?;
    let visible = successor(actor, r.chunk)?;
    let state = actor.chunk(visible)?;
    let frame = state.pose.inverse().mul(&world);
    Some((frame, state.island_local.mul(&frame)))
}

/// Leaf chunk closest to `anchor` whose successor still has a physics actor.
fn nearest_intact_leaf(
    actor: &DestructibleActor,
    structure: &SupportStructure,
    actors: &ActorStore,
    anchor: Vec3,
) -> Option<ChunkIndex> {
    let mut best: Option<(ChunkIndex, f32)> = None;
    for desc in actor.asset().chunks().iter().filter(|d| d.is_leaf()) {
        let Some(visible) = successor(actor, desc.index) else {
            continue;
        };
        if structure
            .chunk_intact(actors, ChunkRef::new(actor.id(), desc.index))
            .is_none()
        {
            continue;
        }
        let (Some(state), Some(hull)) = (actor.chunk(visible), actor.scaled_hull(desc.index)) else {
            continue;
        };
        let d = state.pose.transform_point(hull.center()).distance_squared(anchor);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((desc.index, d));
        }
    }
    best.map(|(c, _)| c)
}
