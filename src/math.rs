//! Small geometry helpers shared by the runtime.
//!
//! `Pose` is a scale-free rigid transform (chunk poses never carry scale),
//! `Bounds3` an axis-aligned box used for overlap, distance and report bounds.

use bevy::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Rigid transform: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation * p + self.position
    }

    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.rotation * v
    }

    pub fn inverse(&self) -> Pose {
        let inv = self.rotation.inverse();
        Pose {
            position: inv * -self.position,
            rotation: inv,
        }
    }

    /// `self * other`: applies `other` first, then `self`.
    pub fn mul(&self, other: &Pose) -> Pose {
        Pose {
            position: self.transform_point(other.position),
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    pub fn inverse_transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation.inverse() * (p - self.position)
    }
}

/// Axis-aligned bounding box. An empty box has `min > max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bounds3 {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bounds3 {
    pub const EMPTY: Bounds3 = Bounds3 {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            (self.max - self.min) * 0.5
        }
    }

    pub fn volume(&self) -> f32 {
        let e = self.half_extents() * 2.0;
        e.x * e.y * e.z
    }

    pub fn include_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn include(&mut self, other: &Bounds3) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn inflated(&self, padding: f32) -> Bounds3 {
        if self.is_empty() {
            return *self;
        }
        Bounds3 {
            min: self.min - Vec3::splat(padding),
            max: self.max + Vec3::splat(padding),
        }
    }

    pub fn intersects(&self, other: &Bounds3) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Euclidean distance from `p` to the box surface, zero inside.
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        if self.is_empty() {
            return f32::MAX;
        }
        let clamped = p.clamp(self.min, self.max);
        clamped.distance(p)
    }

    /// World box of a local box carried by `pose`.
    pub fn transformed(&self, pose: &Pose) -> Bounds3 {
        if self.is_empty() {
            return *self;
        }
        let mut out = Bounds3::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.include_point(pose.transform_point(corner));
        }
        out
    }

    /// Slab test. Returns the entry distance along `dir` (which need not be normalized).
    pub fn ray_intersect(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let mut t_min = 0.0_f32;
        let mut t_max = f32::MAX;
        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            if d.abs() < 1.0e-12 {
                if o < self.min[axis] || o > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (self.min[axis] - o) * inv;
            let mut t1 = (self.max[axis] - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

/// Returns true if `v` is unit length within a loose tolerance.
pub fn is_unit(v: Vec3) -> bool {
    (v.length_squared() - 1.0).abs() < 1.0e-3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_inverse_roundtrip() {
        let pose = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.7));
        let p = Vec3::new(-4.0, 0.5, 2.0);
        let back = pose.inverse().transform_point(pose.transform_point(p));
        assert!(back.distance(p) < 1.0e-5);
        assert!(pose.inverse_transform_point(pose.transform_point(p)).distance(p) < 1.0e-5);
    }

    #[test]
    fn test_bounds_distance_and_intersection() {
        let b = Bounds3::from_center_extents(Vec3::ZERO, Vec3::ONE);
        assert_eq!(b.distance_to_point(Vec3::ZERO), 0.0);
        assert!((b.distance_to_point(Vec3::new(3.0, 0.0, 0.0)) - 2.0).abs() < 1.0e-6);
        let other = Bounds3::from_center_extents(Vec3::new(2.5, 0.0, 0.0), Vec3::ONE);
        assert!(!b.intersects(&other));
        assert!(b.inflated(0.6).intersects(&other));
        assert!(!Bounds3::EMPTY.intersects(&b));
    }

    #[test]
    fn test_ray_intersect() {
        let b = Bounds3::from_center_extents(Vec3::new(0.0, 0.0, 5.0), Vec3::ONE);
        let t = b.ray_intersect(Vec3::ZERO, Vec3::Z).unwrap();
        assert!((t - 4.0).abs() < 1.0e-5);
        assert!(b.ray_intersect(Vec3::ZERO, Vec3::X).is_none());
    }

    #[test]
    fn test_transformed_bounds_rotated() {
        let b = Bounds3::from_center_extents(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let pose = Pose::new(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let t = b.transformed(&pose);
        assert!((t.half_extents().x - 1.0).abs() < 1.0e-4);
        assert!((t.half_extents().y - 2.0).abs() < 1.0e-4);
    }
}
