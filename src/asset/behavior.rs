//! Behavior groups: per-chunk-class damage tunables.

use serde::{Deserialize, Serialize};

/// How damage spreads from the impact point to nearby chunks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageSpread {
    /// Everything inside this radius takes full damage.
    pub minimum_radius: f32,
    /// Scales the caller-supplied radius for radius damage.
    pub radius_multiplier: f32,
    /// Exponent of the falloff between minimum and maximum radius; 0 disables falloff.
    pub falloff_exponent: f32,
}

impl Default for DamageSpread {
    fn default() -> Self {
        Self {
            minimum_radius: 0.0,
            radius_multiplier: 1.0,
            falloff_exponent: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorGroup {
    pub name: String,
    /// Accumulated damage at which a chunk fractures.
    pub damage_threshold: f32,
    /// Legacy and impact radius scale: radius = damage_to_radius * damage / threshold.
    pub damage_to_radius: f32,
    pub damage_spread: DamageSpread,
    /// Converts impact force into damage.
    pub force_to_damage: f32,
    /// Mass per unit volume of chunk hulls.
    pub density: f32,
    /// Multiplies the island benefit score under sort-by-benefit eviction.
    pub benefit_weight: f32,
}

impl Default for BehaviorGroup {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            damage_threshold: 1.0,
            damage_to_radius: 0.1,
            damage_spread: DamageSpread::default(),
            force_to_damage: 0.1,
            density: 1.0,
            benefit_weight: 1.0,
        }
    }
}

impl BehaviorGroup {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.damage_threshold = threshold;
        self
    }

    pub fn with_spread(mut self, spread: DamageSpread) -> Self {
        self.damage_spread = spread;
        self
    }

    pub fn with_force_to_damage(mut self, factor: f32) -> Self {
        self.force_to_damage = factor;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.damage_threshold > 0.0
            && self.damage_to_radius >= 0.0
            && self.force_to_damage >= 0.0
            && self.density > 0.0
            && self.damage_spread.minimum_radius >= 0.0
            && self.damage_spread.radius_multiplier >= 0.0
            && self.damage_spread.falloff_exponent >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_group_is_valid() {
        assert!(BehaviorGroup::default().is_valid());
    }

    #[test]
    fn test_zero_threshold_invalid() {
        assert!(!BehaviorGroup::named("glass").with_threshold(0.0).is_valid());
    }
}
