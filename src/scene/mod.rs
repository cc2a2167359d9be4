//! Destructible scene: actors, islands and joints sharing one physics backend.
//!
//! Damage and queries may be issued at any time; all structural work happens
//! inside [`DestructibleScene::simulate`], in this order:
//!
//! 1. begin frame: per-frame counters, deferred `BeforeTick` state events,
//!    remote damage and fracture records, stress solver snaps
//! 2. queued damage, then fractures within the per-frame budget
//! 3. static support invalidation, new dynamic islands enter the budget FIFO
//! 4. island and chunk caps, debris lifetime and separation, valid bounds
//! 5. physics actor release, reshape and creation (write lock)
//! 6. joint updates
//! 7. physics step
//! 8. fetch results: poses, wake/sleep, publication, callbacks, auto-release,
//!    remote transforms, sync writes
//!
//! Histories, chunk event buffers and damage reports only change in step 8,
//! so readers never observe a half-processed step.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bevy::math::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actor::{
    ActorId, ActorStore, BufferGuard, DestructibleActor, DestructibleActorDesc,
    PhysicsActorQueryFlags, SyncFlags,
};
use crate::asset::{DestructibleAsset, ParameterFlags};
use crate::budget::{ActorBudgetManager, BudgetUsage};
use crate::callbacks::ModuleCallbacks;
use crate::chunk::{ChunkFlags, ChunkIndex};
use crate::config::{ChunkStateEventSchedule, ModuleConfig};
use crate::error::{DestructibleError, Result};
use crate::fracture::{
    ChunkData, ChunkStateEvent, ChunkStateEventData, DamageEvent, DamageEventCoreData,
    DamageEventReport, FractureContext, FractureEvent, FractureEventFlags, FractureProcessor,
    HitChunk, ReportChunkFlags,
};
use crate::joint::{DestructibleActorJoint, DestructibleActorJointDesc, JointId};
use crate::logging::TimingSpan;
use crate::math::{Bounds3, Pose};
use crate::module::{ModuleContext, SharedContext};
use crate::physics::{ActorHandle, PhysicsBackend, SharedPhysics, StaticHandle};
use crate::structure::{ChunkRef, IslandId, Resolution, StressSolver, SupportStructure};
use crate::sync::{
    group_segments, read_segments, write_segments, ChunkTransformUnit, DamageEventUnit,
    FractureEventUnit, SyncHandler, SyncSegment, SyncUnit,
};

/// What one `simulate` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    pub frame: u64,
    pub fractures_applied: usize,
    /// Fractures left queued by the per-frame budget.
    pub deferred_fractures: usize,
    pub islands_evicted: usize,
    pub islands_expired: usize,
    pub actors_created: usize,
    pub actors_released: usize,
    /// Islands still waiting for a physics actor.
    pub pending_islands: usize,
    pub broken_joints: usize,
    pub reports: usize,
    pub auto_released: usize,
}

#[derive(Default)]
struct SyncHandlers {
    damage: Option<Box<dyn SyncHandler<DamageEventUnit>>>,
    fracture: Option<Box<dyn SyncHandler<FractureEventUnit>>>,
    transform: Option<Box<dyn SyncHandler<ChunkTransformUnit>>>,
}

pub struct DestructibleScene<P: PhysicsBackend> {
    context: SharedContext,
    physics: SharedPhysics<P>,
    actors: ActorStore,
    structure: SupportStructure,
    processor: FractureProcessor,
    budget: ActorBudgetManager,
    joints: BTreeMap<JointId, DestructibleActorJoint>,
    next_joint: u32,
    broken_joints: BTreeSet<JointId>,
    support_invalidations: Vec<Bounds3>,
    stress_solvers: BTreeMap<ActorId, StressSolver>,
    /// State batches of the last step, fired at the next `BeforeTick`.
    deferred_state_events: Vec<ChunkStateEventData>,
    /// Actors with no visible chunk the host chose to keep.
    kept_empty: BTreeSet<ActorId>,
    published_reports: Vec<DamageEventReport>,
    sync: SyncHandlers,
    viewer: Option<Vec3>,
    lod_offset: u16,
    frame: u64,
    last_step: StepStats,
}

impl<P: PhysicsBackend> std::fmt::Debug for DestructibleScene<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestructibleScene")
            .field("frame", &self.frame)
            .field("actors", &self.actors.len())
            .field("islands", &self.structure.island_count())
            .field("joints", &self.joints.len())
            .field("processor", &self.processor)
            .finish()
    }
}

impl<P: PhysicsBackend> DestructibleScene<P> {
    /// A standalone scene with its own configuration.
    pub fn new(physics: SharedPhysics<P>, config: ModuleConfig) -> Result<Self> {
        config.validate()?;
        let context = Arc::new(RwLock::new(ModuleContext::new(config)));
        Ok(Self::with_context(physics, context))
    }

    pub(crate) fn with_context(physics: SharedPhysics<P>, context: SharedContext) -> Self {
        let (seed, lod_offset) = {
            let ctx = context.read();
            (ctx.config.particle_seed, ctx.config.max_chunk_depth_offset)
        };
        info!("destructible scene created");
        Self {
            context,
            physics,
            actors: ActorStore::new(),
            structure: SupportStructure::new(),
            processor: FractureProcessor::new(seed),
            budget: ActorBudgetManager::new(),
            joints: BTreeMap::new(),
            next_joint: 0,
            broken_joints: BTreeSet::new(),
            support_invalidations: Vec::new(),
            stress_solvers: BTreeMap::new(),
            deferred_state_events: Vec::new(),
            kept_empty: BTreeSet::new(),
            published_reports: Vec::new(),
            sync: SyncHandlers::default(),
            viewer: None,
            lod_offset,
            frame: 0,
            last_step: StepStats::default(),
        }
    }

    pub fn physics(&self) -> &SharedPhysics<P> {
        &self.physics
    }

    pub fn config(&self) -> ModuleConfig {
        self.context.read().config.clone()
    }

    /// Replaces the configuration shared with the owning module.
    pub fn set_config(&self, config: ModuleConfig) -> Result<()> {
        config.validate()?;
        self.context.write().config = config;
        Ok(())
    }

    pub fn set_callbacks(&self, callbacks: ModuleCallbacks) {
        self.context.write().callbacks = callbacks;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn last_step(&self) -> StepStats {
        self.last_step
    }

    pub fn budget_usage(&self) -> BudgetUsage {
        self.budget.usage()
    }

    pub fn actors(&self) -> &ActorStore {
        &self.actors
    }

    pub fn actor(&self, id: ActorId) -> Option<&DestructibleActor> {
        self.actors.get(id)
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut DestructibleActor> {
        self.actors.get_mut(id)
    }

    pub fn structure(&self) -> &SupportStructure {
        &self.structure
    }

    pub fn pending_damage(&self) -> usize {
        self.processor.pending_damage()
    }

    pub fn pending_fractures(&self) -> usize {
        self.processor.pending_fractures()
    }

    /// Viewer position used by benefit scoring.
    pub fn set_viewer_position(&mut self, viewer: Option<Vec3>) {
        self.viewer = viewer;
    }

    pub fn set_damage_sync_handler(&mut self, handler: Option<Box<dyn SyncHandler<DamageEventUnit>>>) {
        self.sync.damage = handler;
    }

    pub fn set_fracture_sync_handler(&mut self, handler: Option<Box<dyn SyncHandler<FractureEventUnit>>>) {
        self.sync.fracture = handler;
    }

    pub fn set_transform_sync_handler(&mut self, handler: Option<Box<dyn SyncHandler<ChunkTransformUnit>>>) {
        self.sync.transform = handler;
    }

    // ---------------------------------------------------------------------
    // Actors
    // ---------------------------------------------------------------------

    /// Places an asset instance. Its physics actors are created by the next
    /// `simulate`.
    pub fn create_actor(
        &mut self,
        asset: Arc<DestructibleAsset>,
        desc: &DestructibleActorDesc,
    ) -> Result<ActorId> {
        let config = self.config();
        let id = self
            .actors
            .insert_with(|id| DestructibleActor::new(id, asset, desc, &config))?;
        let physics = Arc::clone(&self.physics);
        let statics = physics.read();
        self.structure.add_actor(&mut self.actors, id, &*statics);
        if let Some(actor) = self.actors.get(id) {
            if actor.parameters().has(ParameterFlags::USE_STRESS_SOLVER) && !desc.dynamic {
                self.stress_solvers.insert(id, StressSolver::new(actor));
            }
        }
        info!(actor = %id, chunks = self.actors.get(id).map_or(0, |a| a.chunk_count()), "destructible actor created");
        Ok(id)
    }

    pub fn release_actor(&mut self, id: ActorId) -> Result<()> {
        if !self.actors.contains(id) {
            return Err(DestructibleError::UnknownActor(id));
        }
        self.release_actor_inner(id);
        let callbacks = self.context.read().callbacks.clone();
        let physics = Arc::clone(&self.physics);
        let mut backend = physics.write();
        self.release_physics_actors(&mut *backend, &callbacks);
        Ok(())
    }

    fn release_actor_inner(&mut self, id: ActorId) {
        self.structure.remove_actor(&mut self.actors, id);
        self.processor.forget_actor(id);
        self.stress_solvers.remove(&id);
        self.kept_empty.remove(&id);
        self.actors.remove(id);
        info!(actor = %id, "destructible actor released");
    }

    // ---------------------------------------------------------------------
    // Damage
    // ---------------------------------------------------------------------

    fn validate_damage(&self, event: &DamageEvent) -> Result<()> {
        let actor = self
            .actors
            .get(event.actor)
            .ok_or(DestructibleError::UnknownActor(event.actor))?;
        if let Some(chunk) = event.chunk {
            if let Err(err) = actor.check_chunk(chunk) {
                warn!(actor = %event.actor, chunk = %chunk, "damage names a chunk outside the asset");
                return Err(err);
            }
        }
        if !event.damage.is_finite() || event.damage < 0.0 {
            return Err(DestructibleError::InvalidParameter {
                name: "damage",
                reason: format!("{} is not a finite non-negative amount", event.damage),
            });
        }
        if !event.radius.is_finite() || event.radius < 0.0 {
            return Err(DestructibleError::InvalidParameter {
                name: "radius",
                reason: format!("{} is not a finite non-negative radius", event.radius),
            });
        }
        if !event.position.is_finite() || !event.direction.is_finite() {
            return Err(DestructibleError::InvalidParameter {
                name: "position",
                reason: "position and direction must be finite".to_string(),
            });
        }
        Ok(())
    }

    /// Queues a damage event for the next step. Nothing is queued on `Err`.
    pub fn apply_damage_event(&mut self, event: DamageEvent) -> Result<()> {
        self.validate_damage(&event)?;
        self.processor.queue_damage(event);
        Ok(())
    }

    /// Point damage. `chunk == None` searches for the chunk hit along
    /// `direction`, or the nearest visible one.
    pub fn apply_damage(
        &mut self,
        actor: ActorId,
        damage: f32,
        momentum: f32,
        position: Vec3,
        direction: Vec3,
        chunk: Option<ChunkIndex>,
    ) -> Result<()> {
        self.apply_damage_event(DamageEvent::point(actor, damage, momentum, position, direction, chunk))
    }

    pub fn apply_radius_damage(
        &mut self,
        actor: ActorId,
        damage: f32,
        momentum: f32,
        position: Vec3,
        radius: f32,
        falloff: bool,
    ) -> Result<()> {
        self.apply_damage_event(DamageEvent::radius(actor, damage, momentum, position, radius, falloff))
    }

    /// Radius damage on every actor whose bounds reach the sphere. Returns
    /// the number of actors hit.
    pub fn apply_scene_radius_damage(
        &mut self,
        damage: f32,
        momentum: f32,
        position: Vec3,
        radius: f32,
        falloff: bool,
    ) -> usize {
        let hit: Vec<ActorId> = self
            .actors
            .iter()
            .filter(|a| {
                let bounds = a.bounds();
                !bounds.is_empty() && bounds.distance_to_point(position) <= radius
            })
            .map(|a| a.id())
            .collect();
        for &id in &hit {
            let event = DamageEvent::radius(id, damage, momentum, position, radius, falloff);
            if self.apply_damage_event(event).is_err() {
                break;
            }
        }
        hit.len()
    }

    /// Impact damage: `|force|` scaled by the hit chunk's force-to-damage.
    pub fn take_impact(
        &mut self,
        actor: ActorId,
        force: Vec3,
        position: Vec3,
        chunk: Option<ChunkIndex>,
        impacting_actor: Option<ActorHandle>,
    ) -> Result<()> {
        let a = self
            .actors
            .get(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?;
        if let Some(chunk) = chunk {
            a.check_chunk(chunk)?;
        }
        let group = match chunk.or_else(|| a.nearest_visible_chunk(position, 0.0)) {
            Some(c) => a.behavior_group(c),
            None => a.asset().behavior_group(None),
        };
        let magnitude = force.length();
        let event = DamageEvent {
            actor,
            chunk,
            damage: magnitude * group.force_to_damage,
            momentum: magnitude,
            position,
            direction: force.normalize_or_zero(),
            radius: 0.0,
            falloff: false,
            flags: FractureEventFlags::DAMAGE_FROM_IMPACT,
            impacting_actor,
            user_data: 0,
        };
        self.apply_damage_event(event)
    }

    /// Replays recorded hits as forced fractures (deletions with
    /// `remove_chunks`).
    pub fn force_chunk_hits(&mut self, actor: ActorId, hits: &[HitChunk], remove_chunks: bool) -> Result<()> {
        let a = self
            .actors
            .get(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?;
        for hit in hits {
            a.check_chunk(hit.chunk_index)?;
        }
        for hit in hits {
            let mut flags = hit.hit_chunk_flags
                & (FractureEventFlags::CRUMBLE | FractureEventFlags::DELETE_CHUNK);
            if remove_chunks {
                flags |= FractureEventFlags::DELETE_CHUNK;
            }
            self.processor.queue_fracture(FractureEvent::forced(
                actor,
                hit.chunk_index,
                flags | FractureEventFlags::MANUAL,
            ));
        }
        Ok(())
    }

    /// Adds entries to the damage coloring history without applying damage.
    pub fn force_damage_coloring(&mut self, actor: ActorId, data: &[DamageEventCoreData]) -> Result<()> {
        let a = self
            .actors
            .get_mut(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?;
        for entry in data {
            a.check_chunk(entry.chunk_index)?;
        }
        for entry in data {
            a.damage_coloring_mut().record(*entry);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Dynamic control
    // ---------------------------------------------------------------------

    /// Turns one chunk, or every visible chunk of the actor, dynamic without
    /// damage. Returns the number of chunks that changed.
    pub fn set_dynamic(&mut self, actor: ActorId, chunk: Option<ChunkIndex>) -> Result<usize> {
        let a = self
            .actors
            .get(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?;
        let targets: Vec<ChunkIndex> = match chunk {
            Some(c) => {
                a.check_chunk(c)?;
                a.representative(c).into_iter().collect()
            }
            None => a.visible_chunks(),
        };
        let mut changed = 0;
        for c in targets {
            let r = ChunkRef::new(actor, c);
            let Some(island_id) = self
                .actors
                .get(actor)
                .and_then(|a| a.chunk(c))
                .filter(|s| s.is_visible() && !s.is_dynamic())
                .and_then(|s| s.island)
            else {
                continue;
            };
            let whole_island = chunk.is_none()
                && self
                    .structure
                    .island(island_id)
                    .is_some_and(|i| i.member_actors().len() == 1);
            let island = if whole_island {
                self.structure.convert_to_dynamic(&mut self.actors, island_id);
                Some(island_id)
            } else {
                self.structure.break_off(&mut self.actors, r)
            };
            let Some(island) = island else {
                continue;
            };
            let members: Vec<ChunkRef> = self
                .structure
                .island(island)
                .map(|i| i.chunks().iter().copied().collect())
                .unwrap_or_default();
            for m in members {
                if let Some(state) = self.actors.get_mut(m.actor).and_then(|a| a.chunk_mut(m.chunk)) {
                    state
                        .flags
                        .remove(ChunkFlags::EXTERNALLY_SUPPORTED | ChunkFlags::WORLD_SUPPORTED);
                }
            }
            changed += 1;
        }
        Ok(changed)
    }

    pub fn is_dynamic(&self, actor: ActorId, chunk: ChunkIndex) -> bool {
        self.actors
            .get(actor)
            .and_then(|a| a.representative(chunk).and_then(|r| a.chunk(r)))
            .is_some_and(|c| c.is_dynamic())
    }

    /// Applies an impulse to the physics actor carrying `chunk`. An island
    /// still waiting for its actor receives it on creation.
    pub fn add_force(
        &mut self,
        actor: ActorId,
        chunk: ChunkIndex,
        force: Vec3,
        position: Option<Vec3>,
    ) -> Result<bool> {
        let a = self
            .actors
            .get(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?;
        a.check_chunk(chunk)?;
        let Some(visible) = a.representative(chunk) else {
            return Ok(false);
        };
        let at = position
            .or_else(|| a.chunk_centroid(visible))
            .unwrap_or(Vec3::ZERO);
        match self.structure.resolve(&self.actors, ChunkRef::new(actor, visible)) {
            Resolution::Actor(handle) => Ok(self.physics.write().apply_impulse(handle, force, at)),
            Resolution::Pending(island_id) => {
                let Some(island) = self.structure.island_mut(island_id) else {
                    return Ok(false);
                };
                if !island.is_dynamic() {
                    return Ok(false);
                }
                island.pending_impulse = Some(match island.pending_impulse {
                    Some((sum, point)) => (sum + force, point),
                    None => (force, at),
                });
                Ok(true)
            }
            Resolution::Gone => Ok(false),
        }
    }

    pub fn set_chunk_awake_state(&mut self, actor: ActorId, chunk: ChunkIndex, awake: bool) -> Result<bool> {
        self.actors
            .get(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?
            .check_chunk(chunk)?;
        match self.chunk_intact(actor, chunk) {
            Some(handle) => Ok(self.physics.write().set_awake(handle, awake)),
            None => Ok(false),
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Physics actor currently representing the chunk. Pure query.
    pub fn chunk_intact(&self, actor: ActorId, chunk: ChunkIndex) -> Option<ActorHandle> {
        self.structure
            .chunk_intact(&self.actors, ChunkRef::new(actor, chunk))
    }

    pub fn acquire_chunk_event_buffer(
        &self,
        actor: ActorId,
        clear_on_release: bool,
    ) -> Result<BufferGuard<'_, ChunkStateEvent>> {
        self.actors
            .get(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?
            .acquire_chunk_event_buffer(clear_on_release)
    }

    /// Distinct physics actors backing the actor's visible chunks.
    pub fn acquire_physics_actor_buffer(
        &self,
        actor: ActorId,
        flags: PhysicsActorQueryFlags,
    ) -> Result<BufferGuard<'_, ActorHandle>> {
        let a = self
            .actors
            .get(actor)
            .ok_or(DestructibleError::UnknownActor(actor))?;
        let structure = &self.structure;
        a.physics_actor_buffer().acquire_with(|out| {
            let mut seen = BTreeSet::new();
            for chunk in a.chunks().iter().filter(|c| c.is_visible()) {
                let Some(island) = chunk.island.and_then(|id| structure.island(id)) else {
                    continue;
                };
                let Some(handle) = island.actor() else {
                    continue;
                };
                let class = if island.is_dynamic() {
                    PhysicsActorQueryFlags::DYNAMIC
                } else {
                    PhysicsActorQueryFlags::STATIC
                };
                if !flags.intersects(class) {
                    continue;
                }
                if !flags.contains(PhysicsActorQueryFlags::ALLOW_REDUNDANCY) && island.owner() != actor {
                    continue;
                }
                if seen.insert(handle) {
                    out.push(handle);
                }
            }
        })
    }

    /// Damage reports published by the last steps, oldest first.
    pub fn take_damage_reports(&mut self) -> Vec<DamageEventReport> {
        std::mem::take(&mut self.published_reports)
    }

    // ---------------------------------------------------------------------
    // Joints and static geometry
    // ---------------------------------------------------------------------

    pub fn create_joint(&mut self, desc: &DestructibleActorJointDesc) -> Result<JointId> {
        let joint = DestructibleActorJoint::new(desc, &self.actors, &self.structure, &self.physics)?;
        let id = JointId(self.next_joint);
        self.next_joint += 1;
        self.joints.insert(id, joint);
        Ok(id)
    }

    pub fn joint(&self, id: JointId) -> Option<&DestructibleActorJoint> {
        self.joints.get(&id)
    }

    pub fn joint_ids(&self) -> Vec<JointId> {
        self.joints.keys().copied().collect()
    }

    /// Joints whose endpoint chunk was destroyed. They stay until released.
    pub fn broken_joints(&self) -> Vec<JointId> {
        self.broken_joints.iter().copied().collect()
    }

    pub fn release_joint(&mut self, id: JointId) -> bool {
        self.broken_joints.remove(&id);
        match self.joints.remove(&id) {
            Some(joint) => joint.release(&self.physics),
            None => false,
        }
    }

    pub fn add_static_box(&mut self, bounds: Bounds3) -> StaticHandle {
        let handle = self.physics.write().add_static_box(bounds);
        self.support_invalidations.push(bounds);
        handle
    }

    pub fn remove_static(&mut self, handle: StaticHandle) -> Option<Bounds3> {
        let bounds = self.physics.write().remove_static(handle)?;
        self.support_invalidations.push(bounds);
        Some(bounds)
    }

    /// Re-tests world support of kinematic chunks near `bounds` next step.
    pub fn invalidate_static_support(&mut self, bounds: &[Bounds3]) {
        self.support_invalidations.extend_from_slice(bounds);
    }

    // ---------------------------------------------------------------------
    // Step
    // ---------------------------------------------------------------------

    pub fn simulate(&mut self, dt: f32) -> StepStats {
        self.frame += 1;
        let _span = TimingSpan::tick(self.frame);
        let (config, callbacks) = {
            let ctx = self.context.read();
            (ctx.config.clone(), ctx.callbacks.clone())
        };
        let mut stats = StepStats {
            frame: self.frame,
            ..Default::default()
        };

        self.begin_frame(&config, &callbacks);
        self.read_remote_events();
        self.tick_stress_solvers(dt);

        stats.fractures_applied = self.process_fracture_queue(&config);
        stats.deferred_fractures = self.processor.pending_fractures();

        self.apply_support_invalidation();
        self.admit_new_dynamic();

        let (evicted, expired) = self.enforce_budgets(&config);
        stats.islands_evicted = evicted;
        stats.islands_expired = expired;

        let (created, released) = self.sync_physics_actors(&config, &callbacks);
        stats.actors_created = created;
        stats.actors_released = released;
        stats.pending_islands = self.structure.pending_islands().len();

        stats.broken_joints = self.update_joints(&config);

        self.physics.write().simulate(dt);
        self.structure.advance_ages(dt);

        self.refresh_poses();
        let (woken, slept) = self.detect_wake_sleep();
        stats.reports = self.publish(&config, &callbacks, &woken, &slept);
        stats.auto_released = self.auto_release(&callbacks);
        {
            let physics = Arc::clone(&self.physics);
            let mut backend = physics.write();
            stats.actors_released += self.release_physics_actors(&mut *backend, &callbacks);
        }
        self.apply_remote_transforms();
        self.write_sync_buffers();

        self.last_step = stats;
        stats
    }

    fn begin_frame(&mut self, config: &ModuleConfig, callbacks: &ModuleCallbacks) {
        if config.max_chunk_depth_offset != self.lod_offset {
            self.lod_offset = config.max_chunk_depth_offset;
            for actor in self.actors.iter_mut() {
                actor.set_lod_offset(self.lod_offset);
            }
            debug!(offset = self.lod_offset, "chunk depth offset changed");
        }
        self.budget.begin_frame(self.frame, config);
        self.structure.set_frame(self.frame);
        let deferred = std::mem::take(&mut self.deferred_state_events);
        if config.chunk_state_event_schedule == ChunkStateEventSchedule::BeforeTick {
            if let Some(report) = &callbacks.chunk_report {
                for data in &deferred {
                    report.on_state_change_notify(data);
                }
            }
        }
    }

    fn user_actor_ids(&self) -> BTreeMap<u32, ActorId> {
        self.actors
            .iter()
            .filter(|a| a.sync_params().user_actor_id != 0)
            .map(|a| (a.sync_params().user_actor_id, a.id()))
            .collect()
    }

    fn read_remote_events(&mut self) {
        if self.sync.damage.is_none() && self.sync.fracture.is_none() {
            return;
        }
        let ids = self.user_actor_ids();
        let processor = &mut self.processor;
        if let Some(handler) = self.sync.damage.as_deref_mut() {
            drain_remote(handler, &ids, |actor, unit: &DamageEventUnit| {
                processor.queue_damage(unit.to_event(actor));
            });
        }
        if let Some(handler) = self.sync.fracture.as_deref_mut() {
            drain_remote(handler, &ids, |actor, unit: &FractureEventUnit| {
                processor.queue_fracture(unit.to_event(actor));
            });
        }
    }

    /// Queues the snaps that ripened since the last step. They fracture in
    /// this step like any other queued fracture.
    fn tick_stress_solvers(&mut self, dt: f32) {
        for solver in self.stress_solvers.values_mut() {
            for event in solver.tick(&self.actors, &self.structure, dt) {
                self.processor.queue_fracture(event);
            }
        }
    }

    fn process_fracture_queue(&mut self, config: &ModuleConfig) -> usize {
        let physics = Arc::clone(&self.physics);
        let statics = physics.read();
        let mut cx = FractureContext {
            actors: &mut self.actors,
            structure: &mut self.structure,
            statics: &*statics,
            config,
        };
        self.processor.process_damage(&mut cx);
        self.processor.process_fractures(&mut cx, &mut self.budget)
    }

    fn apply_support_invalidation(&mut self) {
        let bounds = std::mem::take(&mut self.support_invalidations);
        if bounds.is_empty() {
            return;
        }
        let physics = Arc::clone(&self.physics);
        let statics = physics.read();
        self.structure
            .on_static_support_invalidated(&mut self.actors, &*statics, &bounds);
    }

    fn admit_new_dynamic(&mut self) {
        for id in self.structure.take_new_dynamic() {
            if let Some(island) = self.structure.island(id).filter(|i| i.is_dynamic()) {
                self.budget.admit_new_island(id, island.created_frame());
            }
        }
    }

    fn enforce_budgets(&mut self, config: &ModuleConfig) -> (usize, usize) {
        let victims = self
            .budget
            .select_evictions(&self.structure, &self.actors, config, self.viewer);
        for &id in &victims {
            self.destroy_and_report(config, id, ReportChunkFlags::DESTROYED_FIFO_FULL);
        }
        let expired = self
            .budget
            .expired_islands(&self.structure, &self.actors, config);
        for &(id, reason) in &expired {
            debug!(island = %id, ?reason, "island expired");
            self.budget.forget_island(id);
            self.destroy_and_report(config, id, reason);
        }
        (victims.len(), expired.len())
    }

    /// Destroys an island and reports its chunks with `reason`, one report
    /// per member actor.
    fn destroy_and_report(&mut self, config: &ModuleConfig, id: IslandId, reason: ReportChunkFlags) {
        let Some(island) = self.structure.island(id) else {
            return;
        };
        let mut per_actor: BTreeMap<ActorId, Vec<ChunkData>> = BTreeMap::new();
        for r in island.chunks() {
            let Some(actor) = self.actors.get(r.actor) else {
                continue;
            };
            let Some(desc) = actor.descriptor(r.chunk) else {
                continue;
            };
            per_actor.entry(r.actor).or_default().push(ChunkData {
                index: r.chunk,
                depth: desc.depth,
                world_bounds: actor.chunk_bounds(r.chunk).unwrap_or(Bounds3::EMPTY),
                damage: 0.0,
                flags: reason,
            });
        }
        self.structure.destroy_island(&mut self.actors, id);
        for (actor_id, entries) in per_actor {
            if let Some(actor) = self.actors.get_mut(actor_id) {
                for e in &entries {
                    actor
                        .hit_chunks_mut()
                        .record(e.index, e.depth, FractureEventFlags::empty(), false);
                }
            }
            self.processor.report_destroyed(config, actor_id, entries);
        }
    }

    fn release_physics_actors(&mut self, backend: &mut P, callbacks: &ModuleCallbacks) -> usize {
        let handles = self.structure.take_released_actors();
        for &handle in &handles {
            if backend.release_actor(handle) {
                if let Some(report) = &callbacks.physics_actor_report {
                    report.on_release(handle);
                }
            }
        }
        handles.len()
    }

    /// Releases dead actors, reshapes changed islands and creates pending
    /// actors within the per-frame budget. Returns `(created, released)`.
    fn sync_physics_actors(&mut self, config: &ModuleConfig, callbacks: &ModuleCallbacks) -> (usize, usize) {
        let physics = Arc::clone(&self.physics);
        let mut backend = physics.write();
        let released = self.release_physics_actors(&mut *backend, callbacks);

        let reshaped: Vec<(IslandId, ActorHandle)> = self
            .structure
            .islands()
            .filter(|i| i.shapes_dirty)
            .filter_map(|i| i.actor().map(|h| (i.id(), h)))
            .collect();
        for (id, handle) in reshaped {
            if let Some((shapes, mass)) = self.structure.island_shapes(&self.actors, id, config) {
                backend.set_actor_shapes(handle, &shapes, mass);
            }
            if let Some(island) = self.structure.island_mut(id) {
                island.shapes_dirty = false;
            }
        }

        let mut created = 0;
        for id in self.structure.pending_islands() {
            if !self.budget.try_create_actor() {
                debug!(island = %id, "actor creation budget exhausted, island stays pending");
                break;
            }
            let Some(desc) = self.structure.rigid_actor_desc(&self.actors, id, config) else {
                continue;
            };
            match backend.create_actor(&desc) {
                Some(handle) => {
                    self.structure.attach_actor(id, handle);
                    created += 1;
                    if let Some(report) = &callbacks.physics_actor_report {
                        report.on_create(handle, id);
                    }
                }
                None => {
                    warn!(island = %id, "physics actor creation failed, retrying next step");
                    break;
                }
            }
        }

        let impulses: Vec<(IslandId, ActorHandle, Vec3, Vec3)> = self
            .structure
            .islands()
            .filter_map(|i| {
                let (impulse, point) = i.pending_impulse?;
                Some((i.id(), i.actor()?, impulse, point))
            })
            .collect();
        for (id, handle, impulse, point) in impulses {
            backend.apply_impulse(handle, impulse, point);
            if let Some(island) = self.structure.island_mut(id) {
                island.pending_impulse = None;
            }
        }
        (created, released)
    }

    fn update_joints(&mut self, config: &ModuleConfig) -> usize {
        let mut newly_broken = 0;
        for (id, joint) in self.joints.iter_mut() {
            if self.broken_joints.contains(id) {
                continue;
            }
            let intact = joint.update_joint(
                &self.actors,
                &self.structure,
                &self.physics,
                config.joint_reattach_workaround,
            );
            if !intact {
                warn!(joint = %id, "joint lost an endpoint and must be released");
                self.broken_joints.insert(*id);
                newly_broken += 1;
            }
        }
        newly_broken
    }

    fn refresh_poses(&mut self) {
        let physics = Arc::clone(&self.physics);
        let backend = physics.read();
        let bound: Vec<(IslandId, ActorHandle, bool)> = self
            .structure
            .islands()
            .filter_map(|i| i.actor().map(|h| (i.id(), h, i.is_dynamic())))
            .collect();
        for (id, handle, dynamic) in bound {
            let sleeping = backend.is_sleeping(handle);
            if let Some(island) = self.structure.island_mut(id) {
                island.sleeping = sleeping;
            }
            if !dynamic {
                continue;
            }
            let Some(pose) = backend.global_pose(handle) else {
                continue;
            };
            let (linear, angular) = backend
                .velocities(handle)
                .unwrap_or((Vec3::ZERO, Vec3::ZERO));
            self.structure
                .apply_island_pose(&mut self.actors, id, pose, linear, angular);
        }
    }

    /// Actors are awake while any dynamic island holding their chunks is.
    fn detect_wake_sleep(&mut self) -> (Vec<ActorId>, Vec<ActorId>) {
        let mut awake = BTreeSet::new();
        for island in self
            .structure
            .islands()
            .filter(|i| i.is_dynamic() && i.actor().is_some() && !i.is_sleeping())
        {
            awake.extend(island.member_actors());
        }
        let (mut woken, mut slept) = (Vec::new(), Vec::new());
        for actor in self.actors.iter_mut() {
            let now = awake.contains(&actor.id());
            if now != actor.is_awake() {
                actor.set_awake(now);
                if now {
                    woken.push(actor.id());
                } else {
                    slept.push(actor.id());
                }
            }
        }
        (woken, slept)
    }

    /// Publishes histories and buffers, then fires the step's callbacks.
    /// Returns the number of damage reports.
    fn publish(
        &mut self,
        config: &ModuleConfig,
        callbacks: &ModuleCallbacks,
        woken: &[ActorId],
        slept: &[ActorId],
    ) -> usize {
        let schedule = config.chunk_state_event_schedule;
        let mut state_batches = Vec::new();
        for actor in self.actors.iter_mut() {
            let events = actor.take_pending_state_events();
            actor.publish_step(&events);
            if schedule != ChunkStateEventSchedule::Disabled && !events.is_empty() {
                state_batches.push(ChunkStateEventData {
                    actor: actor.id(),
                    events,
                });
            }
        }

        let reports = self.processor.take_reports();
        if let Some(report) = &callbacks.chunk_report {
            for r in &reports {
                report.on_damage_notify(r);
            }
            if schedule == ChunkStateEventSchedule::FetchResults {
                for data in &state_batches {
                    report.on_state_change_notify(data);
                }
            }
            if !woken.is_empty() {
                report.on_destructible_wake(woken);
            }
            if !slept.is_empty() {
                report.on_destructible_sleep(slept);
            }
        }
        if schedule == ChunkStateEventSchedule::BeforeTick {
            self.deferred_state_events.extend(state_batches);
        }

        let particles = self.processor.take_particles();
        if let Some(report) = &callbacks.particle_report {
            for data in &particles {
                report.on_particle_emission(data);
            }
        }
        let impacts = self.processor.take_impacts();
        if let Some(report) = &callbacks.impact_report {
            if !impacts.is_empty() {
                report.on_impact_damage_notify(&impacts);
            }
        }

        let count = reports.len();
        self.published_reports.extend(reports);
        count
    }

    fn auto_release(&mut self, callbacks: &ModuleCallbacks) -> usize {
        let empty: Vec<ActorId> = self
            .actors
            .iter()
            .filter(|a| a.num_visible_chunks() == 0 && !self.kept_empty.contains(&a.id()))
            .map(|a| a.id())
            .collect();
        let mut released = 0;
        for id in empty {
            if callbacks.release_on_no_chunks_visible(id) {
                self.release_actor_inner(id);
                released += 1;
            } else {
                self.kept_empty.insert(id);
            }
        }
        released
    }

    /// Snaps dynamic islands to received chunk transforms.
    fn apply_remote_transforms(&mut self) {
        let Some(handler) = self.sync.transform.as_deref_mut() else {
            return;
        };
        let ids: BTreeMap<u32, ActorId> = self
            .actors
            .iter()
            .filter(|a| a.sync_params().user_actor_id != 0)
            .map(|a| (a.sync_params().user_actor_id, a.id()))
            .collect();
        let mut snaps: Vec<(ChunkRef, Pose)> = Vec::new();
        drain_remote(handler, &ids, |actor, unit: &ChunkTransformUnit| {
            snaps.push((ChunkRef::new(actor, unit.chunk()), unit.pose()));
        });
        if snaps.is_empty() {
            return;
        }
        let physics = Arc::clone(&self.physics);
        let mut backend = physics.write();
        for (r, pose) in snaps {
            let snappable = self
                .actors
                .get(r.actor)
                .and_then(|a| a.chunk(r.chunk))
                .is_some_and(|c| c.is_visible() && c.is_dynamic());
            if !snappable {
                continue;
            }
            let Some((island_id, island_pose)) = self.structure.island_pose_for_chunk(&self.actors, r, pose)
            else {
                continue;
            };
            let Some(island) = self.structure.island(island_id) else {
                continue;
            };
            let (linear, angular) = (island.linear_velocity, island.angular_velocity);
            if let Some(handle) = island.actor() {
                backend.set_global_pose(handle, island_pose);
            }
            self.structure
                .apply_island_pose(&mut self.actors, island_id, island_pose, linear, angular);
        }
    }

    fn write_sync_buffers(&mut self) {
        let outbox = self.processor.take_outbox();
        let actors = &self.actors;
        let user_id = |id: ActorId| actors.get(id).map(|a| a.sync_params().user_actor_id);
        let damage = group_segments(
            outbox
                .damage
                .iter()
                .filter_map(|e| Some((user_id(e.actor)?, DamageEventUnit::from_event(e)))),
        );
        let fractures = group_segments(
            outbox
                .fractures
                .iter()
                .filter_map(|e| Some((user_id(e.actor)?, FractureEventUnit::from_event(e)))),
        );
        let transforms = group_segments(
            actors
                .iter()
                .filter(|a| a.syncs(SyncFlags::TRANSFORM))
                .flat_map(|a| {
                    let user = a.sync_params().user_actor_id;
                    a.chunks()
                        .iter()
                        .filter(|c| c.is_visible() && c.is_dynamic())
                        .map(move |c| (user, ChunkTransformUnit::new(c.index, &c.pose)))
                }),
        );
        write_kind(&mut self.sync.damage, &damage);
        write_kind(&mut self.sync.fracture, &fractures);
        write_kind(&mut self.sync.transform, &transforms);
    }
}

/// Reads every queued buffer from `handler` and applies the records of known
/// actors. Each buffer is acknowledged with a summary.
fn drain_remote<U: SyncUnit>(
    handler: &mut dyn SyncHandler<U>,
    ids: &BTreeMap<u32, ActorId>,
    mut apply: impl FnMut(ActorId, &U),
) {
    loop {
        let segments = match read_segments(handler) {
            Ok(Some(segments)) => segments,
            Ok(None) => break,
            // Already reported to the handler; the buffer is consumed.
            Err(_) => continue,
        };
        let (mut applied, mut skipped) = (0usize, 0usize);
        for segment in segments {
            match ids.get(&segment.user_actor_id) {
                Some(&actor) => {
                    for unit in &segment.units {
                        apply(actor, unit);
                    }
                    applied += segment.units.len();
                }
                None => skipped += segment.units.len(),
            }
        }
        if skipped > 0 {
            warn!(kind = U::KIND, skipped, "sync records for unknown user_actor_id");
        }
        handler.on_read_done(&format!(
            "applied {applied} records, skipped {skipped} with unknown user_actor_id"
        ));
    }
}

fn write_kind<U: SyncUnit>(
    handler: &mut Option<Box<dyn SyncHandler<U>>>,
    segments: &[SyncSegment<U>],
) -> bool {
    let Some(handler) = handler.as_deref_mut() else {
        return false;
    };
    if segments.is_empty() {
        return false;
    }
    match write_segments(handler, segments) {
        Ok(written) => written,
        Err(err) => {
            warn!(kind = U::KIND, error = %err, "failed to encode sync buffer");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetBuilder;
    use crate::callbacks::ReportCollector;
    use crate::physics::{shared, HeadlessPhysics};

    fn tower() -> Arc<DestructibleAsset> {
        Arc::new(
            AssetBuilder::subdivided_box("tower", Vec3::ONE, 3)
                .build()
                .unwrap(),
        )
    }

    fn scene(config: ModuleConfig) -> (DestructibleScene<HeadlessPhysics>, Arc<ReportCollector>) {
        let scene = DestructibleScene::new(shared(HeadlessPhysics::new()), config).unwrap();
        let collector = Arc::new(ReportCollector::new());
        scene.set_callbacks(ModuleCallbacks::all(collector.clone()));
        (scene, collector)
    }

    #[test]
    fn test_actors_get_physics_actors_on_first_step() {
        let (mut scene, collector) = scene(ModuleConfig::default());
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        assert_eq!(scene.chunk_intact(id, ChunkIndex(0)), None);
        let stats = scene.simulate(1.0 / 60.0);
        assert_eq!(stats.actors_created, 1);
        assert!(scene.chunk_intact(id, ChunkIndex(0)).is_some());
        assert_eq!(collector.snapshot().created.len(), 1);
    }

    #[test]
    fn test_creation_throttle_leaves_islands_pending() {
        let config = ModuleConfig {
            max_actor_creates_per_frame: 1,
            ..Default::default()
        };
        let (mut scene, _) = scene(config);
        for x in [0.0, 5.0, 10.0] {
            scene
                .create_actor(tower(), &DestructibleActorDesc::at(Vec3::new(x, 0.0, 0.0)))
                .unwrap();
        }
        assert_eq!(scene.simulate(0.01).pending_islands, 2);
        assert_eq!(scene.simulate(0.01).pending_islands, 1);
        assert_eq!(scene.simulate(0.01).pending_islands, 0);
    }

    #[test]
    fn test_invalid_damage_is_rejected() {
        let (mut scene, _) = scene(ModuleConfig::default());
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        assert!(matches!(
            scene.apply_damage(id, 1.0, 0.0, Vec3::ZERO, Vec3::Z, Some(ChunkIndex(99))),
            Err(DestructibleError::ChunkOutOfRange { .. })
        ));
        assert!(matches!(
            scene.apply_damage(ActorId(42), 1.0, 0.0, Vec3::ZERO, Vec3::Z, None),
            Err(DestructibleError::UnknownActor(_))
        ));
        assert!(scene
            .apply_damage(id, f32::NAN, 0.0, Vec3::ZERO, Vec3::Z, None)
            .is_err());
        assert_eq!(scene.pending_damage(), 0);
    }

    #[test]
    fn test_state_events_follow_schedule() {
        let config = ModuleConfig {
            chunk_state_event_schedule: ChunkStateEventSchedule::BeforeTick,
            ..Default::default()
        };
        let (mut scene, collector) = scene(config);
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        scene.simulate(0.01);
        // The root's visibility batch is held for the next tick.
        assert!(collector.snapshot().state_changes.is_empty());
        scene.simulate(0.01);
        let batches = collector.drain().state_changes;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].actor, id);
        assert!(batches[0].events[0].is_visible());
    }

    #[test]
    fn test_chunk_event_buffer_published_at_step_end() {
        let (mut scene, _) = scene(ModuleConfig::default());
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        assert!(scene.acquire_chunk_event_buffer(id, false).unwrap().is_empty());
        scene.simulate(0.01);
        scene
            .apply_damage(id, 10.0, 0.0, Vec3::ZERO, Vec3::Z, Some(ChunkIndex(0)))
            .unwrap();
        scene.simulate(0.01);
        let guard = scene.acquire_chunk_event_buffer(id, true).unwrap();
        // Root shown, root hidden, four children shown.
        assert_eq!(guard.len(), 6);
        assert!(scene.acquire_chunk_event_buffer(id, false).is_err());
        drop(guard);
        assert!(scene.acquire_chunk_event_buffer(id, false).unwrap().is_empty());
    }

    #[test]
    fn test_physics_actor_buffer_filters_by_kind() {
        let (mut scene, _) = scene(ModuleConfig::default());
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        scene.simulate(0.01);
        scene.set_dynamic(id, Some(ChunkIndex(0))).unwrap();
        scene.simulate(0.01);
        let dynamic = scene
            .acquire_physics_actor_buffer(id, PhysicsActorQueryFlags::DYNAMIC)
            .unwrap()
            .to_vec();
        assert_eq!(dynamic.len(), 1);
        let stat = scene
            .acquire_physics_actor_buffer(id, PhysicsActorQueryFlags::STATIC)
            .unwrap()
            .to_vec();
        assert!(stat.is_empty());
    }

    #[test]
    fn test_set_dynamic_wakes_and_sleeps() {
        let (mut scene, collector) = scene(ModuleConfig::default());
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        scene.simulate(0.01);
        assert!(!scene.is_dynamic(id, ChunkIndex(3)));
        assert_eq!(scene.set_dynamic(id, None).unwrap(), 1);
        assert!(scene.is_dynamic(id, ChunkIndex(3)));
        scene.simulate(0.01);
        assert!(scene.actor(id).unwrap().is_awake());
        for _ in 0..6 {
            scene.simulate(0.01);
        }
        assert!(!scene.actor(id).unwrap().is_awake());
        let seen = collector.drain();
        assert_eq!(seen.woken, vec![id]);
        assert_eq!(seen.slept, vec![id]);
        assert!(scene.add_force(id, ChunkIndex(0), Vec3::X * 5.0, None).unwrap());
        scene.simulate(0.01);
        assert!(scene.actor(id).unwrap().is_awake());
    }

    #[test]
    fn test_empty_actor_auto_released_unless_kept() {
        let (mut scene, _) = scene(ModuleConfig::default());
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        scene.simulate(0.01);
        scene
            .force_chunk_hits(
                id,
                &[HitChunk {
                    chunk_index: ChunkIndex(0),
                    hit_chunk_flags: FractureEventFlags::empty(),
                }],
                true,
            )
            .unwrap();
        let stats = scene.simulate(0.01);
        assert_eq!(stats.auto_released, 1);
        assert!(scene.actor(id).is_none());
        assert_eq!(scene.physics().read().actor_count(), 0);

        let (mut keeper, _) = scene_with_keeper();
        let id = keeper
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        keeper.simulate(0.01);
        keeper
            .force_chunk_hits(
                id,
                &[HitChunk {
                    chunk_index: ChunkIndex(0),
                    hit_chunk_flags: FractureEventFlags::empty(),
                }],
                true,
            )
            .unwrap();
        assert_eq!(keeper.simulate(0.01).auto_released, 0);
        assert!(keeper.actor(id).is_some());
        keeper.release_actor(id).unwrap();
        assert!(keeper.release_actor(id).is_err());
    }

    fn scene_with_keeper() -> (DestructibleScene<HeadlessPhysics>, Arc<ReportCollector>) {
        let scene = DestructibleScene::new(shared(HeadlessPhysics::new()), ModuleConfig::default()).unwrap();
        let collector = Arc::new(ReportCollector::keeping_empty_actors());
        scene.set_callbacks(ModuleCallbacks::all(collector.clone()));
        (scene, collector)
    }

    #[test]
    fn test_removing_floor_drops_world_support() {
        let (mut scene, _) = scene(ModuleConfig::default());
        let floor = scene.add_static_box(Bounds3::new(
            Vec3::new(-10.0, -2.0, -10.0),
            Vec3::new(10.0, -1.0, 10.0),
        ));
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        scene.simulate(0.01);
        assert!(scene.actor(id).unwrap().chunk(ChunkIndex(0)).unwrap().is_externally_supported());
        scene.remove_static(floor).unwrap();
        scene.simulate(0.01);
        assert!(scene.is_dynamic(id, ChunkIndex(0)));
        assert_eq!(scene.structure().dynamic_island_count(), 1);
    }

    #[test]
    fn test_lod_offset_change_reaches_actors() {
        let (mut scene, _) = scene(ModuleConfig::default());
        let id = scene
            .create_actor(tower(), &DestructibleActorDesc::default())
            .unwrap();
        assert_eq!(scene.actor(id).unwrap().lod(), 2);
        let mut config = scene.config();
        config.max_chunk_depth_offset = 1;
        scene.set_config(config).unwrap();
        scene.simulate(0.01);
        assert_eq!(scene.actor(id).unwrap().lod(), 1);
    }
}
