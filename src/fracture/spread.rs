//! Damage-distance strategies.
//!
//! Two independent switches select how far damage reaches (`RadiusModel`)
//! and how the distance to a chunk is measured (`DistanceModel`). The legacy
//! variants reproduce the older sphere/centroid approximation.

use bevy::math::Vec3;

use crate::asset::BehaviorGroup;
use crate::math::Bounds3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiusModel {
    /// `minimum_radius + radius * radius_multiplier` from the behavior group.
    Spread,
    /// `radius`, or `size * damage_to_radius * damage / threshold` when zero.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceModel {
    /// Distance to the chunk's collision bounds.
    Exact,
    /// Centroid distance, minus the bounding sphere radius for leaves.
    Sphere,
}

impl RadiusModel {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            RadiusModel::Legacy
        } else {
            RadiusModel::Spread
        }
    }
}

impl DistanceModel {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            DistanceModel::Sphere
        } else {
            DistanceModel::Exact
        }
    }
}

/// Inputs of one damage application relevant to spreading.
#[derive(Debug, Clone, Copy)]
pub struct SpreadInput {
    pub damage: f32,
    pub radius: f32,
    pub is_impact: bool,
    pub falloff: bool,
}

/// Returns `(min_radius, max_radius)`.
pub fn radius_range(
    model: RadiusModel,
    group: &BehaviorGroup,
    input: &SpreadInput,
    asset_size: f32,
) -> (f32, f32) {
    let ratio = input.damage / group.damage_threshold.max(f32::EPSILON);
    match model {
        RadiusModel::Spread => {
            let min = group.damage_spread.minimum_radius;
            let max = if input.is_impact {
                group.damage_to_radius * ratio
            } else {
                min + input.radius * group.damage_spread.radius_multiplier
            };
            (min, max.max(min))
        }
        RadiusModel::Legacy => {
            let max = if input.radius > 0.0 {
                input.radius
            } else {
                asset_size * group.damage_to_radius * ratio
            };
            (0.0, max.max(0.0))
        }
    }
}

pub fn chunk_distance(
    model: DistanceModel,
    world_bounds: &Bounds3,
    sphere_center: Vec3,
    sphere_radius: f32,
    is_leaf: bool,
    point: Vec3,
) -> f32 {
    match model {
        DistanceModel::Exact => world_bounds.distance_to_point(point),
        DistanceModel::Sphere => {
            let d = sphere_center.distance(point);
            if is_leaf {
                (d - sphere_radius).max(0.0)
            } else {
                d
            }
        }
    }
}

/// Fraction of the damage a chunk at `distance` receives, in `[0, 1]`.
pub fn damage_fraction(
    model: RadiusModel,
    group: &BehaviorGroup,
    (min, max): (f32, f32),
    distance: f32,
    falloff: bool,
) -> f32 {
    if distance <= min {
        return 1.0;
    }
    if distance > max || max <= min {
        return 0.0;
    }
    match model {
        RadiusModel::Spread => {
            let exponent = if falloff {
                group.damage_spread.falloff_exponent
            } else {
                0.0
            };
            ((max - distance) / (max - min)).powf(exponent).clamp(0.0, 1.0)
        }
        RadiusModel::Legacy => {
            if falloff {
                (1.0 - distance / max).clamp(0.0, 1.0)
            } else {
                1.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> BehaviorGroup {
        BehaviorGroup::named("stone").with_threshold(10.0)
    }

    fn input(radius: f32, falloff: bool) -> SpreadInput {
        SpreadInput {
            damage: 20.0,
            radius,
            is_impact: false,
            falloff,
        }
    }

    #[test]
    fn test_spread_linear_falloff_matches_formula() {
        let g = group();
        let range = radius_range(RadiusModel::Spread, &g, &input(4.0, true), 1.0);
        assert_eq!(range, (0.0, 4.0));
        let f = damage_fraction(RadiusModel::Spread, &g, range, 1.0, true);
        assert!((f - 0.75).abs() < 1.0e-6);
        assert_eq!(damage_fraction(RadiusModel::Spread, &g, range, 1.0, false), 1.0);
        assert_eq!(damage_fraction(RadiusModel::Spread, &g, range, 5.0, true), 0.0);
    }

    #[test]
    fn test_legacy_radius_from_size() {
        let g = group();
        let range = radius_range(RadiusModel::Legacy, &g, &input(0.0, true), 5.0);
        // size * damage_to_radius * damage / threshold = 5 * 0.1 * 2
        assert!((range.1 - 1.0).abs() < 1.0e-6);
        let f = damage_fraction(RadiusModel::Legacy, &g, range, 0.5, true);
        assert!((f - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn test_impact_radius() {
        let g = group();
        let impact = SpreadInput {
            is_impact: true,
            ..input(0.0, true)
        };
        let (_, max) = radius_range(RadiusModel::Spread, &g, &impact, 1.0);
        assert!((max - 0.2).abs() < 1.0e-6);
    }

    #[test]
    fn test_distance_models_differ() {
        let bounds = Bounds3::from_center_extents(Vec3::ZERO, Vec3::ONE);
        let p = Vec3::new(3.0, 0.0, 0.0);
        let exact = chunk_distance(DistanceModel::Exact, &bounds, Vec3::ZERO, 3.0_f32.sqrt(), true, p);
        let sphere =
            chunk_distance(DistanceModel::Sphere, &bounds, Vec3::ZERO, 3.0_f32.sqrt(), false, p);
        assert!((exact - 2.0).abs() < 1.0e-6);
        assert!((sphere - 3.0).abs() < 1.0e-6);
    }
}
