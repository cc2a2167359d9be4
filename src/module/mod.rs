//! Process-wide destruction module: configuration, callbacks and scenes.
//!
//! Scenes share the module's [`ModuleContext`] and take a snapshot of it at
//! the start of every step, so setters called between steps apply to the
//! next one.

use std::collections::BTreeMap;
use std::sync::Arc;

use bevy::math::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actor::RaycastFlags;
use crate::callbacks::{
    ChunkParticleReport, ChunkReport, ImpactDamageReport, ModuleCallbacks, PhysicsActorReport,
};
use crate::config::{ChunkStateEventSchedule, ModuleConfig};
use crate::error::Result;
use crate::fracture::ReportChunkFlags;
use crate::physics::{PhysicsBackend, SharedPhysics};
use crate::scene::{DestructibleScene, StepStats};

/// Configuration and callbacks shared by a module and its scenes.
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    pub config: ModuleConfig,
    pub callbacks: ModuleCallbacks,
}

impl ModuleContext {
    pub fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            callbacks: ModuleCallbacks::default(),
        }
    }
}

pub type SharedContext = Arc<RwLock<ModuleContext>>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SceneId(pub u32);

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

pub struct DestructibleModule<P: PhysicsBackend> {
    context: SharedContext,
    scenes: BTreeMap<SceneId, DestructibleScene<P>>,
    next_scene: u32,
}

impl<P: PhysicsBackend> std::fmt::Debug for DestructibleModule<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestructibleModule")
            .field("scenes", &self.scenes.keys().collect::<Vec<_>>())
            .field("context", &*self.context.read())
            .finish()
    }
}

impl<P: PhysicsBackend> DestructibleModule<P> {
    pub fn new(config: ModuleConfig) -> Result<Self> {
        config.validate()?;
        info!("destructible module initialized");
        Ok(Self {
            context: Arc::new(RwLock::new(ModuleContext::new(config))),
            scenes: BTreeMap::new(),
            next_scene: 0,
        })
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn config(&self) -> ModuleConfig {
        self.context.read().config.clone()
    }

    pub fn set_config(&self, config: ModuleConfig) -> Result<()> {
        config.validate()?;
        self.context.write().config = config;
        Ok(())
    }

    /// Applies `change` and keeps the result only if it validates.
    fn update(&self, change: impl FnOnce(&mut ModuleConfig)) -> Result<()> {
        let mut ctx = self.context.write();
        let mut config = ctx.config.clone();
        change(&mut config);
        config.validate()?;
        ctx.config = config;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Scenes
    // ---------------------------------------------------------------------

    pub fn create_scene(&mut self, physics: SharedPhysics<P>) -> SceneId {
        let id = SceneId(self.next_scene);
        self.next_scene += 1;
        let scene = DestructibleScene::with_context(physics, Arc::clone(&self.context));
        self.scenes.insert(id, scene);
        info!(scene = %id, "scene registered");
        id
    }

    pub fn scene(&self, id: SceneId) -> Option<&DestructibleScene<P>> {
        self.scenes.get(&id)
    }

    pub fn scene_mut(&mut self, id: SceneId) -> Option<&mut DestructibleScene<P>> {
        self.scenes.get_mut(&id)
    }

    pub fn scene_ids(&self) -> Vec<SceneId> {
        self.scenes.keys().copied().collect()
    }

    /// Drops a scene with all its joints and actors, releasing their
    /// physics objects. Joints go first so no backend joint outlives its actors.
    pub fn release_scene(&mut self, id: SceneId) -> bool {
        let Some(mut scene) = self.scenes.remove(&id) else {
            return false;
        };
        for joint in scene.joint_ids() {
            if !scene.release_joint(joint) {
                warn!(scene = %id, joint = %joint, "backend joint was already gone");
            }
        }
        for actor in scene.actors().ids() {
            if let Err(err) = scene.release_actor(actor) {
                warn!(scene = %id, actor = %actor, %err, "failed to release actor");
            }
        }
        info!(scene = %id, "scene released");
        true
    }

    /// Steps every scene in id order.
    pub fn simulate(&mut self, dt: f32) -> Vec<(SceneId, StepStats)> {
        self.scenes
            .iter_mut()
            .map(|(id, scene)| (*id, scene.simulate(dt)))
            .collect()
    }

    /// Radius damage on every actor of every scene within reach. Returns the
    /// number of actors hit.
    pub fn apply_radius_damage(
        &mut self,
        damage: f32,
        momentum: f32,
        position: Vec3,
        radius: f32,
        falloff: bool,
    ) -> usize {
        self.scenes
            .values_mut()
            .map(|s| s.apply_scene_radius_damage(damage, momentum, position, radius, falloff))
            .sum()
    }

    // ---------------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------------

    pub fn set_max_dynamic_chunk_island_count(&self, count: u32) -> Result<()> {
        self.update(|c| c.max_dynamic_chunk_island_count = count)
    }

    pub fn set_max_chunk_count(&self, count: u32) -> Result<()> {
        self.update(|c| c.max_chunk_count = count)
    }

    pub fn set_sort_by_benefit(&self, sort: bool) -> Result<()> {
        self.update(|c| c.sort_by_benefit = sort)
    }

    pub fn set_max_chunk_depth_offset(&self, offset: u16) -> Result<()> {
        self.update(|c| c.max_chunk_depth_offset = offset)
    }

    pub fn set_max_chunk_separation_lod(&self, lod: f32) -> Result<()> {
        self.update(|c| c.max_chunk_separation_lod = lod)
    }

    pub fn set_valid_bounds_padding(&self, padding: f32) -> Result<()> {
        self.update(|c| c.valid_bounds_padding = padding)
    }

    pub fn set_chunk_report_bit_mask(&self, mask: ReportChunkFlags) -> Result<()> {
        self.update(|c| c.chunk_report_bit_mask = mask)
    }

    pub fn set_chunk_report_max_fracture_event_depth(&self, depth: u16) -> Result<()> {
        self.update(|c| c.chunk_report_max_fracture_event_depth = depth)
    }

    pub fn schedule_chunk_state_event_callback(&self, schedule: ChunkStateEventSchedule) -> Result<()> {
        self.update(|c| c.chunk_state_event_schedule = schedule)
    }

    pub fn set_max_actor_creates_per_frame(&self, count: u32) -> Result<()> {
        self.update(|c| c.max_actor_creates_per_frame = count)
    }

    pub fn set_max_fractures_processed_per_frame(&self, count: u32) -> Result<()> {
        self.update(|c| c.max_fractures_processed_per_frame = count)
    }

    pub fn set_use_legacy_chunk_bounds_testing(&self, legacy: bool) -> Result<()> {
        self.update(|c| c.use_legacy_chunk_bounds_testing = legacy)
    }

    pub fn set_use_legacy_damage_radius_spread(&self, legacy: bool) -> Result<()> {
        self.update(|c| c.use_legacy_damage_radius_spread = legacy)
    }

    pub fn set_damage_application_raycast_flags(&self, flags: RaycastFlags) -> Result<()> {
        self.update(|c| c.damage_application_raycast_flags = flags)
    }

    pub fn set_mass_scaling(&self, scale: f32, exponent: f32) -> Result<()> {
        self.update(|c| {
            c.mass_scale = scale;
            c.scaled_mass_exponent = exponent;
        })
    }

    pub fn set_joint_reattach_workaround(&self, enabled: bool) -> Result<()> {
        self.update(|c| c.joint_reattach_workaround = enabled)
    }

    // ---------------------------------------------------------------------
    // Callbacks
    // ---------------------------------------------------------------------

    pub fn callbacks(&self) -> ModuleCallbacks {
        self.context.read().callbacks.clone()
    }

    pub fn set_callbacks(&self, callbacks: ModuleCallbacks) {
        self.context.write().callbacks = callbacks;
    }

    pub fn set_chunk_report(&self, report: Option<Arc<dyn ChunkReport>>) {
        self.context.write().callbacks.chunk_report = report;
    }

    pub fn set_chunk_particle_report(&self, report: Option<Arc<dyn ChunkParticleReport>>) {
        self.context.write().callbacks.particle_report = report;
    }

    pub fn set_impact_damage_report(&self, report: Option<Arc<dyn ImpactDamageReport>>) {
        self.context.write().callbacks.impact_report = report;
    }

    pub fn set_physics_actor_report(&self, report: Option<Arc<dyn PhysicsActorReport>>) {
        self.context.write().callbacks.physics_actor_report = report;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::DestructibleActorDesc;
    use crate::asset::AssetBuilder;
    use crate::callbacks::ReportCollector;
    use crate::chunk::ChunkIndex;
    use crate::joint::DestructibleActorJointDesc;
    use crate::physics::{shared, HeadlessPhysics};

    fn module() -> DestructibleModule<HeadlessPhysics> {
        DestructibleModule::new(ModuleConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_setting_keeps_previous_value() {
        let module = module();
        module.set_max_chunk_separation_lod(0.25).unwrap();
        assert!(module.set_max_chunk_separation_lod(1.5).is_err());
        assert_eq!(module.config().max_chunk_separation_lod, 0.25);
        assert!(module.set_mass_scaling(-1.0, 0.5).is_err());
        assert_eq!(module.config().mass_scale, 1.0);
    }

    #[test]
    fn test_scenes_share_settings() {
        let mut module = module();
        let id = module.create_scene(shared(HeadlessPhysics::new()));
        module.set_max_chunk_depth_offset(1).unwrap();
        assert_eq!(module.scene(id).unwrap().config().max_chunk_depth_offset, 1);
    }

    #[test]
    fn test_module_radius_damage_reaches_every_scene() {
        let mut module = module();
        let collector = Arc::new(ReportCollector::new());
        module.set_callbacks(ModuleCallbacks::all(collector.clone()));
        let asset = Arc::new(
            AssetBuilder::subdivided_box("slab", Vec3::ONE, 2)
                .build()
                .unwrap(),
        );
        let mut actors = Vec::new();
        for _ in 0..2 {
            let id = module.create_scene(shared(HeadlessPhysics::new()));
            let scene = module.scene_mut(id).unwrap();
            actors.push((id, scene.create_actor(asset.clone(), &DestructibleActorDesc::default()).unwrap()));
        }
        module.simulate(0.01);
        assert_eq!(module.apply_radius_damage(5.0, 0.0, Vec3::ZERO, 2.0, false), 2);
        module.simulate(0.01);
        assert_eq!(collector.drain().damage.len(), 2);
        for (scene, actor) in actors {
            let scene = module.scene(scene).unwrap();
            assert!(!scene.actor(actor).unwrap().chunk(ChunkIndex(0)).unwrap().is_visible());
        }
    }

    #[test]
    fn test_release_scene_frees_physics() {
        let mut module = module();
        let physics = shared(HeadlessPhysics::new());
        let id = module.create_scene(physics.clone());
        let asset = Arc::new(
            AssetBuilder::subdivided_box("slab", Vec3::ONE, 1)
                .build()
                .unwrap(),
        );
        module
            .scene_mut(id)
            .unwrap()
            .create_actor(asset, &DestructibleActorDesc::default())
            .unwrap();
        module.simulate(0.01);
        assert_eq!(physics.read().actor_count(), 1);
        assert!(module.release_scene(id));
        assert_eq!(physics.read().actor_count(), 0);
        assert!(!module.release_scene(id));
    }

    #[test]
    fn test_release_scene_frees_joints() {
        let mut module = module();
        let physics = shared(HeadlessPhysics::new());
        let id = module.create_scene(physics.clone());
        let asset = Arc::new(
            AssetBuilder::subdivided_box("slab", Vec3::ONE, 1)
                .build()
                .unwrap(),
        );
        let scene = module.scene_mut(id).unwrap();
        let a = scene.create_actor(asset.clone(), &DestructibleActorDesc::default()).unwrap();
        let b = scene
            .create_actor(asset, &DestructibleActorDesc::at(Vec3::new(3.0, 0.0, 0.0)))
            .unwrap();
        module.simulate(0.01);
        let scene = module.scene_mut(id).unwrap();
        let joint = scene
            .create_joint(&DestructibleActorJointDesc {
                actors: [Some(a), Some(b)],
                chunks: [Some(ChunkIndex(0)), Some(ChunkIndex(0))],
                global_anchors: [Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)],
                ..Default::default()
            })
            .unwrap();
        let handle = scene.joint(joint).unwrap().joint();
        assert!(physics.read().joint(handle).is_some());

        assert!(module.release_scene(id));
        assert!(physics.read().joint(handle).is_none());
        assert_eq!(physics.read().actor_count(), 0);
    }
}
