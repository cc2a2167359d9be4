//! Rapier backend.
//!
//! Islands map to rapier rigid bodies (kinematic position-based for supported
//! islands, dynamic otherwise) with one cuboid collider per chunk. Static
//! scene boxes are parentless colliders in the `WORLD` group. World-anchored
//! joints attach to a single fixed anchor body.

use std::collections::BTreeMap;

use bevy::math::{Quat, Vec3};
use bevy_rapier3d::rapier::na::{Quaternion, Translation3, UnitQuaternion};
use bevy_rapier3d::rapier::prelude::*;
use tracing::debug;

use super::{
    ActorHandle, BodyKind, JointBinding, JointHandle, JointKind, PhysicsBackend, PhysicsLayers,
    RigidActorDesc, ShapeDesc, StaticHandle, StaticQuery,
};
use crate::math::{Bounds3, Pose};

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_isometry(pose: &Pose) -> Isometry<Real> {
    let q = pose.rotation;
    Isometry::from_parts(
        Translation3::new(pose.position.x, pose.position.y, pose.position.z),
        UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z)),
    )
}

fn from_isometry(iso: &Isometry<Real>) -> Pose {
    let t = iso.translation.vector;
    let r = iso.rotation;
    Pose::new(Vec3::new(t.x, t.y, t.z), Quat::from_xyzw(r.i, r.j, r.k, r.w))
}

fn pack_body(handle: RigidBodyHandle) -> ActorHandle {
    let (index, generation) = handle.into_raw_parts();
    ActorHandle((u64::from(generation) << 32) | u64::from(index))
}

fn unpack_body(handle: ActorHandle) -> RigidBodyHandle {
    RigidBodyHandle::from_raw_parts(handle.0 as u32, (handle.0 >> 32) as u32)
}

struct JointRecord {
    binding: JointBinding,
    rapier: Option<ImpulseJointHandle>,
}

pub struct RapierPhysics {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    anchor: RigidBodyHandle,
    joints: BTreeMap<JointHandle, JointRecord>,
    statics: BTreeMap<StaticHandle, (ColliderHandle, Bounds3)>,
    next_id: u64,
}

impl Default for RapierPhysics {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

impl RapierPhysics {
    pub fn new(gravity: Vec3) -> Self {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        let anchor = bodies.insert(RigidBodyBuilder::fixed().build());
        colliders.insert_with_parent(
            ColliderBuilder::ball(0.01)
                .collision_groups(PhysicsLayers::anchor())
                .sensor(true)
                .build(),
            anchor,
            &mut bodies,
        );
        Self {
            gravity: to_vector(gravity),
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            anchor,
            joints: BTreeMap::new(),
            statics: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn body_count(&self) -> usize {
        // The anchor body is internal.
        self.bodies.len().saturating_sub(1)
    }

    fn body(&self, handle: ActorHandle) -> Option<&RigidBody> {
        let h = unpack_body(handle);
        if h == self.anchor {
            return None;
        }
        self.bodies.get(h)
    }

    fn body_mut(&mut self, handle: ActorHandle) -> Option<&mut RigidBody> {
        let h = unpack_body(handle);
        if h == self.anchor {
            return None;
        }
        self.bodies.get_mut(h)
    }

    fn attach_shapes(&mut self, body: RigidBodyHandle, kind: BodyKind, shapes: &[ShapeDesc], mass: f32) {
        let groups = match kind {
            BodyKind::Kinematic => PhysicsLayers::chunk_static(),
            BodyKind::Dynamic => PhysicsLayers::chunk_dynamic(),
        };
        let per_shape = if shapes.is_empty() {
            0.0
        } else {
            mass / shapes.len() as f32
        };
        for shape in shapes {
            let h = shape.half_extents.max(Vec3::splat(1.0e-3));
            let collider = ColliderBuilder::cuboid(h.x, h.y, h.z)
                .position(to_isometry(&shape.local_pose))
                .collision_groups(groups)
                .mass(per_shape.max(1.0e-3))
                .user_data(u128::from(shape.user_data))
                .build();
            self.colliders
                .insert_with_parent(collider, body, &mut self.bodies);
        }
    }

    fn body_for(&self, actor: Option<ActorHandle>) -> Option<RigidBodyHandle> {
        match actor {
            None => Some(self.anchor),
            Some(a) => {
                let h = unpack_body(a);
                self.bodies.contains(h).then_some(h)
            }
        }
    }

    fn insert_joint(&mut self, binding: &JointBinding) -> Option<ImpulseJointHandle> {
        let body1 = self.body_for(binding.actors[0])?;
        let body2 = self.body_for(binding.actors[1])?;
        let frame1 = to_isometry(&binding.local_frames[0]);
        let frame2 = to_isometry(&binding.local_frames[1]);
        let data: GenericJoint = match binding.kind {
            JointKind::Fixed => FixedJointBuilder::new()
                .local_frame1(frame1)
                .local_frame2(frame2)
                .build()
                .into(),
            JointKind::Spherical => SphericalJointBuilder::new()
                .local_anchor1(frame1.translation.vector.into())
                .local_anchor2(frame2.translation.vector.into())
                .build()
                .into(),
        };
        Some(self.impulse_joints.insert(body1, body2, data, true))
    }
}

impl StaticQuery for RapierPhysics {
    fn overlaps_static(&self, bounds: &Bounds3) -> bool {
        self.statics.values().any(|(_, b)| b.intersects(bounds))
    }
}

impl PhysicsBackend for RapierPhysics {
    fn create_actor(&mut self, desc: &RigidActorDesc) -> Option<ActorHandle> {
        let builder = match desc.kind {
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
        };
        let body = builder
            .position(to_isometry(&desc.pose))
            .linvel(to_vector(desc.linear_velocity))
            .angvel(to_vector(desc.angular_velocity))
            .user_data(u128::from(desc.user_data))
            .build();
        let handle = self.bodies.insert(body);
        self.attach_shapes(handle, desc.kind, &desc.shapes, desc.mass);
        Some(pack_body(handle))
    }

    fn release_actor(&mut self, handle: ActorHandle) -> bool {
        let h = unpack_body(handle);
        if h == self.anchor {
            return false;
        }
        let removed = self
            .bodies
            .remove(
                h,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some();
        if removed {
            // Rapier drops attached joints with the body.
            for record in self.joints.values_mut() {
                if record.binding.actors.contains(&Some(handle)) {
                    record.rapier = None;
                    for slot in record.binding.actors.iter_mut() {
                        if *slot == Some(handle) {
                            *slot = None;
                        }
                    }
                }
            }
        }
        removed
    }

    fn contains_actor(&self, handle: ActorHandle) -> bool {
        self.body(handle).is_some()
    }

    fn set_actor_shapes(&mut self, handle: ActorHandle, shapes: &[ShapeDesc], mass: f32) -> bool {
        let Some(body) = self.body(handle) else {
            return false;
        };
        let kind = if body.is_dynamic() {
            BodyKind::Dynamic
        } else {
            BodyKind::Kinematic
        };
        let existing: Vec<ColliderHandle> = body.colliders().to_vec();
        for collider in existing {
            self.colliders
                .remove(collider, &mut self.islands, &mut self.bodies, true);
        }
        self.attach_shapes(unpack_body(handle), kind, shapes, mass);
        true
    }

    fn global_pose(&self, handle: ActorHandle) -> Option<Pose> {
        self.body(handle).map(|b| from_isometry(b.position()))
    }

    fn set_global_pose(&mut self, handle: ActorHandle, pose: Pose) -> bool {
        match self.body_mut(handle) {
            Some(body) => {
                body.set_position(to_isometry(&pose), true);
                true
            }
            None => false,
        }
    }

    fn velocities(&self, handle: ActorHandle) -> Option<(Vec3, Vec3)> {
        self.body(handle)
            .map(|b| (from_vector(b.linvel()), from_vector(b.angvel())))
    }

    fn apply_impulse(&mut self, handle: ActorHandle, impulse: Vec3, point: Vec3) -> bool {
        match self.body_mut(handle) {
            Some(body) if body.is_dynamic() => {
                body.apply_impulse_at_point(to_vector(impulse), point![point.x, point.y, point.z], true);
                true
            }
            _ => false,
        }
    }

    fn is_sleeping(&self, handle: ActorHandle) -> bool {
        self.body(handle).map_or(true, |b| b.is_sleeping())
    }

    fn set_awake(&mut self, handle: ActorHandle, awake: bool) -> bool {
        match self.body_mut(handle) {
            Some(body) => {
                if awake {
                    body.wake_up(true);
                } else {
                    body.sleep();
                }
                true
            }
            None => false,
        }
    }

    fn remove_from_scene(&mut self, handle: ActorHandle) -> bool {
        match self.body_mut(handle) {
            Some(body) if body.is_enabled() => {
                body.set_enabled(false);
                true
            }
            _ => false,
        }
    }

    fn add_to_scene(&mut self, handle: ActorHandle) -> bool {
        match self.body_mut(handle) {
            Some(body) if !body.is_enabled() => {
                body.set_enabled(true);
                true
            }
            _ => false,
        }
    }

    fn create_joint(&mut self, binding: &JointBinding) -> Option<JointHandle> {
        if binding.actors.iter().all(Option::is_none) {
            return None;
        }
        let rapier = self.insert_joint(binding)?;
        let handle = JointHandle(self.next_id);
        self.next_id += 1;
        self.joints.insert(
            handle,
            JointRecord {
                binding: *binding,
                rapier: Some(rapier),
            },
        );
        Some(handle)
    }

    fn joint_actors(&self, joint: JointHandle) -> Option<[Option<ActorHandle>; 2]> {
        self.joints.get(&joint).map(|r| r.binding.actors)
    }

    fn set_joint_actors(
        &mut self,
        joint: JointHandle,
        actors: [Option<ActorHandle>; 2],
        local_frames: [Pose; 2],
    ) -> bool {
        let Some(record) = self.joints.get(&joint) else {
            return false;
        };
        let mut binding = record.binding;
        let old = record.rapier;
        binding.actors = actors;
        binding.local_frames = local_frames;
        // Rapier joints cannot change bodies in place: remove and insert.
        if let Some(h) = old {
            self.impulse_joints.remove(h, true);
        }
        let rapier = self.insert_joint(&binding);
        debug!(?joint, reattached = rapier.is_some(), "joint bodies swapped");
        if let Some(record) = self.joints.get_mut(&joint) {
            record.binding = binding;
            record.rapier = rapier;
        }
        rapier.is_some()
    }

    fn release_joint(&mut self, joint: JointHandle) -> bool {
        match self.joints.remove(&joint) {
            Some(record) => {
                if let Some(h) = record.rapier {
                    self.impulse_joints.remove(h, true);
                }
                true
            }
            None => false,
        }
    }

    fn add_static_box(&mut self, bounds: Bounds3) -> StaticHandle {
        let c = bounds.center();
        let h = bounds.half_extents().max(Vec3::splat(1.0e-3));
        let collider = ColliderBuilder::cuboid(h.x, h.y, h.z)
            .translation(vector![c.x, c.y, c.z])
            .collision_groups(PhysicsLayers::world())
            .build();
        let collider = self.colliders.insert(collider);
        let handle = StaticHandle(self.next_id);
        self.next_id += 1;
        self.statics.insert(handle, (collider, bounds));
        handle
    }

    fn remove_static(&mut self, handle: StaticHandle) -> Option<Bounds3> {
        let (collider, bounds) = self.statics.remove(&handle)?;
        self.colliders
            .remove(collider, &mut self.islands, &mut self.bodies, true);
        Some(bounds)
    }

    fn simulate(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(kind: BodyKind, y: f32) -> RigidActorDesc {
        RigidActorDesc {
            kind,
            pose: Pose::from_position(Vec3::new(0.0, y, 0.0)),
            shapes: vec![ShapeDesc {
                local_pose: Pose::IDENTITY,
                half_extents: Vec3::splat(0.5),
                user_data: 0,
            }],
            mass: 1.0,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            user_data: 0,
        }
    }

    #[test]
    fn test_handle_packing_roundtrip() {
        let mut physics = RapierPhysics::default();
        let handle = physics.create_actor(&desc(BodyKind::Dynamic, 5.0)).unwrap();
        assert!(physics.contains_actor(handle));
        assert_eq!(physics.body_count(), 1);
        assert!(physics.release_actor(handle));
        assert!(!physics.contains_actor(handle));
    }

    #[test]
    fn test_dynamic_body_falls() {
        let mut physics = RapierPhysics::default();
        let handle = physics.create_actor(&desc(BodyKind::Dynamic, 5.0)).unwrap();
        let kinematic = physics.create_actor(&desc(BodyKind::Kinematic, 10.0)).unwrap();
        for _ in 0..30 {
            physics.simulate(1.0 / 60.0);
        }
        assert!(physics.global_pose(handle).unwrap().position.y < 5.0);
        assert!((physics.global_pose(kinematic).unwrap().position.y - 10.0).abs() < 1.0e-5);
    }

    #[test]
    fn test_joint_reattach() {
        let mut physics = RapierPhysics::default();
        let a = physics.create_actor(&desc(BodyKind::Dynamic, 1.0)).unwrap();
        let b = physics.create_actor(&desc(BodyKind::Dynamic, 2.0)).unwrap();
        let joint = physics
            .create_joint(&JointBinding {
                kind: JointKind::Fixed,
                actors: [Some(a), None],
                local_frames: [Pose::IDENTITY; 2],
            })
            .unwrap();
        assert!(physics.set_joint_actors(joint, [Some(b), None], [Pose::IDENTITY; 2]));
        assert_eq!(physics.joint_actors(joint), Some([Some(b), None]));
        assert!(physics.release_joint(joint));
    }

    #[test]
    fn test_static_boxes() {
        let mut physics = RapierPhysics::default();
        let floor = physics.add_static_box(Bounds3::new(Vec3::splat(-1.0), Vec3::ZERO));
        assert!(physics.overlaps_static(&Bounds3::from_center_extents(Vec3::ZERO, Vec3::splat(0.1))));
        assert!(physics.remove_static(floor).is_some());
        assert!(!physics.overlaps_static(&Bounds3::from_center_extents(Vec3::ZERO, Vec3::splat(0.1))));
    }
}
