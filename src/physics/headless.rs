//! Bookkeeping backend without collision response.
//!
//! Dynamic actors integrate velocity and gravity and fall asleep after a few
//! quiet steps. Kinematic actors never move. Static boxes answer world
//! support queries. This is enough for servers that only need authoritative
//! chunk state, and for deterministic tests.

use std::collections::BTreeMap;

use bevy::math::Vec3;

use super::{
    ActorHandle, BodyKind, JointBinding, JointHandle, PhysicsBackend, RigidActorDesc, ShapeDesc,
    StaticHandle, StaticQuery,
};
use crate::math::{Bounds3, Pose};

const SLEEP_SPEED: f32 = 0.05;
const SLEEP_STEPS: u32 = 4;

#[derive(Debug, Clone)]
pub struct HeadlessBody {
    pub kind: BodyKind,
    pub pose: Pose,
    pub shapes: Vec<ShapeDesc>,
    pub mass: f32,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub in_scene: bool,
    pub sleeping: bool,
    quiet_steps: u32,
}

#[derive(Debug, Clone)]
pub struct HeadlessJoint {
    pub binding: JointBinding,
}

#[derive(Debug, Clone)]
pub struct HeadlessPhysics {
    gravity: Vec3,
    bodies: BTreeMap<ActorHandle, HeadlessBody>,
    joints: BTreeMap<JointHandle, HeadlessJoint>,
    statics: BTreeMap<StaticHandle, Bounds3>,
    next_id: u64,
    /// Hard cap on live actors; creation fails beyond it.
    max_actors: Option<usize>,
    /// Counts remove/re-add cycles, for observing joint reattachment.
    pub scene_removals: u64,
}

impl Default for HeadlessPhysics {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessPhysics {
    pub fn new() -> Self {
        Self {
            gravity: Vec3::ZERO,
            bodies: BTreeMap::new(),
            joints: BTreeMap::new(),
            statics: BTreeMap::new(),
            next_id: 1,
            max_actors: None,
            scene_removals: 0,
        }
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_max_actors(mut self, max: usize) -> Self {
        self.max_actors = Some(max);
        self
    }

    pub fn body(&self, handle: ActorHandle) -> Option<&HeadlessBody> {
        self.bodies.get(&handle)
    }

    pub fn actor_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn joint(&self, joint: JointHandle) -> Option<&HeadlessJoint> {
        self.joints.get(&joint)
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl StaticQuery for HeadlessPhysics {
    fn overlaps_static(&self, bounds: &Bounds3) -> bool {
        self.statics.values().any(|s| s.intersects(bounds))
    }
}

impl PhysicsBackend for HeadlessPhysics {
    fn create_actor(&mut self, desc: &RigidActorDesc) -> Option<ActorHandle> {
        if self.max_actors.is_some_and(|max| self.bodies.len() >= max) {
            return None;
        }
        let handle = ActorHandle(self.next());
        self.bodies.insert(
            handle,
            HeadlessBody {
                kind: desc.kind,
                pose: desc.pose,
                shapes: desc.shapes.clone(),
                mass: desc.mass,
                linear_velocity: desc.linear_velocity,
                angular_velocity: desc.angular_velocity,
                in_scene: true,
                sleeping: false,
                quiet_steps: 0,
            },
        );
        Some(handle)
    }

    fn release_actor(&mut self, handle: ActorHandle) -> bool {
        let removed = self.bodies.remove(&handle).is_some();
        if removed {
            for joint in self.joints.values_mut() {
                for slot in joint.binding.actors.iter_mut() {
                    if *slot == Some(handle) {
                        *slot = None;
                    }
                }
            }
        }
        removed
    }

    fn contains_actor(&self, handle: ActorHandle) -> bool {
        self.bodies.contains_key(&handle)
    }

    fn set_actor_shapes(&mut self, handle: ActorHandle, shapes: &[ShapeDesc], mass: f32) -> bool {
        match self.bodies.get_mut(&handle) {
            Some(body) => {
                body.shapes = shapes.to_vec();
                body.mass = mass;
                true
            }
            None => false,
        }
    }

    fn global_pose(&self, handle: ActorHandle) -> Option<Pose> {
        self.bodies.get(&handle).map(|b| b.pose)
    }

    fn set_global_pose(&mut self, handle: ActorHandle, pose: Pose) -> bool {
        match self.bodies.get_mut(&handle) {
            Some(body) => {
                body.pose = pose;
                true
            }
            None => false,
        }
    }

    fn velocities(&self, handle: ActorHandle) -> Option<(Vec3, Vec3)> {
        self.bodies
            .get(&handle)
            .map(|b| (b.linear_velocity, b.angular_velocity))
    }

    fn apply_impulse(&mut self, handle: ActorHandle, impulse: Vec3, _point: Vec3) -> bool {
        match self.bodies.get_mut(&handle) {
            Some(body) if body.kind == BodyKind::Dynamic => {
                body.linear_velocity += impulse / body.mass.max(1.0e-3);
                body.sleeping = false;
                body.quiet_steps = 0;
                true
            }
            _ => false,
        }
    }

    fn is_sleeping(&self, handle: ActorHandle) -> bool {
        self.bodies.get(&handle).map_or(true, |b| b.sleeping)
    }

    fn set_awake(&mut self, handle: ActorHandle, awake: bool) -> bool {
        match self.bodies.get_mut(&handle) {
            Some(body) => {
                body.sleeping = !awake;
                body.quiet_steps = 0;
                if !awake {
                    body.linear_velocity = Vec3::ZERO;
                    body.angular_velocity = Vec3::ZERO;
                }
                true
            }
            None => false,
        }
    }

    fn remove_from_scene(&mut self, handle: ActorHandle) -> bool {
        match self.bodies.get_mut(&handle) {
            Some(body) if body.in_scene => {
                body.in_scene = false;
                self.scene_removals += 1;
                true
            }
            _ => false,
        }
    }

    fn add_to_scene(&mut self, handle: ActorHandle) -> bool {
        match self.bodies.get_mut(&handle) {
            Some(body) if !body.in_scene => {
                body.in_scene = true;
                true
            }
            _ => false,
        }
    }

    fn create_joint(&mut self, binding: &JointBinding) -> Option<JointHandle> {
        let live = binding
            .actors
            .iter()
            .flatten()
            .all(|a| self.bodies.contains_key(a));
        if !live || binding.actors.iter().all(Option::is_none) {
            return None;
        }
        let handle = JointHandle(self.next());
        self.joints.insert(handle, HeadlessJoint { binding: *binding });
        Some(handle)
    }

    fn joint_actors(&self, joint: JointHandle) -> Option<[Option<ActorHandle>; 2]> {
        self.joints.get(&joint).map(|j| j.binding.actors)
    }

    fn set_joint_actors(
        &mut self,
        joint: JointHandle,
        actors: [Option<ActorHandle>; 2],
        local_frames: [Pose; 2],
    ) -> bool {
        if actors.iter().flatten().any(|a| !self.bodies.contains_key(a)) {
            return false;
        }
        match self.joints.get_mut(&joint) {
            Some(j) => {
                j.binding.actors = actors;
                j.binding.local_frames = local_frames;
                true
            }
            None => false,
        }
    }

    fn release_joint(&mut self, joint: JointHandle) -> bool {
        self.joints.remove(&joint).is_some()
    }

    fn add_static_box(&mut self, bounds: Bounds3) -> StaticHandle {
        let handle = StaticHandle(self.next());
        self.statics.insert(handle, bounds);
        handle
    }

    fn remove_static(&mut self, handle: StaticHandle) -> Option<Bounds3> {
        self.statics.remove(&handle)
    }

    fn simulate(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            if body.kind != BodyKind::Dynamic || !body.in_scene || body.sleeping {
                continue;
            }
            body.linear_velocity += self.gravity * dt;
            body.pose.position += body.linear_velocity * dt;
            let spin = body.angular_velocity * dt;
            if spin.length_squared() > 0.0 {
                let delta = bevy::math::Quat::from_scaled_axis(spin);
                body.pose.rotation = (delta * body.pose.rotation).normalize();
            }
            if body.linear_velocity.length() < SLEEP_SPEED
                && body.angular_velocity.length() < SLEEP_SPEED
            {
                body.quiet_steps += 1;
                if body.quiet_steps >= SLEEP_STEPS {
                    body.sleeping = true;
                    body.linear_velocity = Vec3::ZERO;
                    body.angular_velocity = Vec3::ZERO;
                }
            } else {
                body.quiet_steps = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic_desc() -> RigidActorDesc {
        RigidActorDesc {
            kind: BodyKind::Dynamic,
            pose: Pose::IDENTITY,
            shapes: Vec::new(),
            mass: 2.0,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            user_data: 0,
        }
    }

    #[test]
    fn test_dynamic_body_sleeps_when_quiet() {
        let mut physics = HeadlessPhysics::new();
        let handle = physics.create_actor(&dynamic_desc()).unwrap();
        assert!(!physics.is_sleeping(handle));
        for _ in 0..SLEEP_STEPS {
            physics.simulate(1.0 / 60.0);
        }
        assert!(physics.is_sleeping(handle));
        physics.apply_impulse(handle, Vec3::X * 4.0, Vec3::ZERO);
        assert!(!physics.is_sleeping(handle));
        physics.simulate(0.5);
        assert!(physics.global_pose(handle).unwrap().position.x > 0.9);
    }

    #[test]
    fn test_max_actors_cap() {
        let mut physics = HeadlessPhysics::new().with_max_actors(1);
        assert!(physics.create_actor(&dynamic_desc()).is_some());
        assert!(physics.create_actor(&dynamic_desc()).is_none());
    }

    #[test]
    fn test_static_overlap() {
        let mut physics = HeadlessPhysics::new();
        let floor = physics.add_static_box(Bounds3::new(Vec3::new(-5.0, -1.0, -5.0), Vec3::new(5.0, 0.0, 5.0)));
        let probe = Bounds3::from_center_extents(Vec3::new(0.0, 0.5, 0.0), Vec3::splat(0.5));
        assert!(physics.overlaps_static(&probe));
        physics.remove_static(floor);
        assert!(!physics.overlaps_static(&probe));
    }

    #[test]
    fn test_joint_requires_live_actor() {
        let mut physics = HeadlessPhysics::new();
        let a = physics.create_actor(&dynamic_desc()).unwrap();
        let binding = JointBinding {
            kind: super::super::JointKind::Fixed,
            actors: [Some(a), None],
            local_frames: [Pose::IDENTITY; 2],
        };
        let joint = physics.create_joint(&binding).unwrap();
        assert_eq!(physics.joint_actors(joint), Some([Some(a), None]));
        physics.release_actor(a);
        assert_eq!(physics.joint_actors(joint), Some([None, None]));
    }
}
