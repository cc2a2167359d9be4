//! Module-wide configuration.
//!
//! `ModuleConfig` holds every module-wide LOD and budget parameter. A
//! `DestructibleModule` owns one and shares it with the scenes it creates;
//! setters validate before writing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::actor::RaycastFlags;
use crate::error::{DestructibleError, Result};
use crate::fracture::ReportChunkFlags;

/// When chunk state (visibility) events are delivered to the chunk report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChunkStateEventSchedule {
    #[default]
    Disabled,
    BeforeTick,
    FetchResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub max_dynamic_chunk_island_count: u32,
    pub max_chunk_count: u32,
    /// Evict by lowest benefit instead of oldest first.
    pub sort_by_benefit: bool,
    /// Hierarchy levels removed from the bottom of every asset.
    pub max_chunk_depth_offset: u16,
    /// 0..=1 blend between minimum and maximum debris lifetime/separation.
    pub max_chunk_separation_lod: f32,
    pub valid_bounds_padding: f32,
    pub chunk_report_bit_mask: ReportChunkFlags,
    /// Fractures deeper than this are counted but not listed in reports.
    pub chunk_report_max_fracture_event_depth: u16,
    pub chunk_state_event_schedule: ChunkStateEventSchedule,
    pub max_actor_creates_per_frame: u32,
    pub max_fractures_processed_per_frame: u32,
    pub use_legacy_chunk_bounds_testing: bool,
    pub use_legacy_damage_radius_spread: bool,
    pub damage_application_raycast_flags: RaycastFlags,
    pub mass_scale: f32,
    pub scaled_mass_exponent: f32,
    /// Remove and re-add actors around a joint endpoint swap.
    pub joint_reattach_workaround: bool,
    /// Bound of every actor's damage coloring ring.
    pub damage_coloring_capacity: usize,
    /// Seed for crumble particle placement.
    pub particle_seed: u64,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            max_dynamic_chunk_island_count: u32::MAX,
            max_chunk_count: u32::MAX,
            sort_by_benefit: false,
            max_chunk_depth_offset: 0,
            max_chunk_separation_lod: 1.0,
            valid_bounds_padding: 0.0,
            chunk_report_bit_mask: ReportChunkFlags::all(),
            chunk_report_max_fracture_event_depth: u16::MAX,
            chunk_state_event_schedule: ChunkStateEventSchedule::Disabled,
            max_actor_creates_per_frame: u32::MAX,
            max_fractures_processed_per_frame: u32::MAX,
            use_legacy_chunk_bounds_testing: false,
            use_legacy_damage_radius_spread: false,
            damage_application_raycast_flags: RaycastFlags::STATIC_CHUNKS,
            mass_scale: 1.0,
            scaled_mass_exponent: 0.5,
            joint_reattach_workaround: true,
            damage_coloring_capacity: 64,
            particle_seed: 0x5eed_c4a1,
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> DestructibleError {
    DestructibleError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

impl ModuleConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_chunk_separation_lod) {
            return Err(invalid("max_chunk_separation_lod", "must lie in [0, 1]"));
        }
        if self.valid_bounds_padding < 0.0 || !self.valid_bounds_padding.is_finite() {
            return Err(invalid("valid_bounds_padding", "must be finite and >= 0"));
        }
        if self.mass_scale <= 0.0 || !self.mass_scale.is_finite() {
            return Err(invalid("mass_scale", "must be finite and > 0"));
        }
        if !(0.0..=1.0).contains(&self.scaled_mass_exponent) {
            return Err(invalid("scaled_mass_exponent", "must lie in [0, 1]"));
        }
        Ok(())
    }

    /// `scale * (raw / scale)^exponent`
    pub fn scaled_mass(&self, raw_mass: f32) -> f32 {
        if raw_mass <= 0.0 {
            return 0.0;
        }
        self.mass_scale * (raw_mass / self.mass_scale).powf(self.scaled_mass_exponent)
    }

    /// Blend between a parameter's minimum and maximum by the separation LOD.
    pub fn separation_lerp(&self, min: f32, max: f32) -> f32 {
        (max - min) * self.max_chunk_separation_lod + min
    }

    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: ModuleConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron_string(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_ron_string()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
