//! Fracture processing: damage events in, fracture decisions out.
//!
//! Damage is queued by the scene and processed in arrival order at the start
//! of a step. Each event is located to a chunk, remapped to the actor's LOD,
//! walked down to the minimum fracture depth and spread to nearby chunks.
//! Chunks that cross their behavior group's threshold queue a
//! [`FractureEvent`]. Fractures are then applied against the
//! [`SupportStructure`] while the per-frame budget allows.
//!
//! Every damage call owns one [`DamageEventReport`]. A report completes when
//! its damage was processed and every fracture it queued was applied, so a
//! throttled fracture delays its report rather than splitting it.

pub mod event;
pub mod report;
pub mod spread;

pub use event::{
    DamageEvent, DamageEventCoreData, FractureEvent, FractureEventFlags, HitChunk,
    ImpactDamageEventData,
};
pub use report::{
    ChunkData, ChunkParticleReportData, ChunkStateEvent, ChunkStateEventData,
    ChunkStateEventFlags, DamageEventReport, ReportChunkFlags,
};
pub use spread::{DistanceModel, RadiusModel, SpreadInput};

use std::collections::{BTreeMap, VecDeque};

use bevy::math::Vec3;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::{debug, trace};

use crate::actor::{ActorId, ActorStore, DestructibleActor, RaycastFlags, SyncFlags};
use crate::asset::{AssetChunkFlags, ParameterFlags};
use crate::budget::ActorBudgetManager;
use crate::chunk::{ChunkFlags, ChunkIndex};
use crate::config::ModuleConfig;
use crate::math::Bounds3;
use crate::physics::StaticQuery;
use crate::structure::{ChunkRef, SupportStructure};

const MAX_CRUMBLE_PARTICLES: usize = 64;

/// World state a fracture pass mutates.
pub struct FractureContext<'a> {
    pub actors: &'a mut ActorStore,
    pub structure: &'a mut SupportStructure,
    pub statics: &'a dyn StaticQuery,
    pub config: &'a ModuleConfig,
}

#[derive(Debug)]
struct PendingReport {
    report: DamageEventReport,
    /// Fractures queued for this report and not applied yet.
    outstanding: u32,
    /// The damage event itself went through the pipeline.
    processed: bool,
}

#[derive(Debug, Clone)]
struct QueuedDamage {
    event: DamageEvent,
    report: u64,
}

/// Locally originated records waiting for the sync layer.
#[derive(Debug, Clone, Default)]
pub struct SyncOutbox {
    pub damage: Vec<DamageEvent>,
    pub fractures: Vec<FractureEvent>,
}

impl SyncOutbox {
    pub fn is_empty(&self) -> bool {
        self.damage.is_empty() && self.fractures.is_empty()
    }
}

pub struct FractureProcessor {
    damage_queue: VecDeque<QueuedDamage>,
    fracture_queue: VecDeque<FractureEvent>,
    reports: BTreeMap<u64, PendingReport>,
    completed: BTreeMap<u64, DamageEventReport>,
    next_report: u64,
    impacts: Vec<ImpactDamageEventData>,
    particles: Vec<ChunkParticleReportData>,
    outbox: SyncOutbox,
    rng: Xoshiro256PlusPlus,
}

impl std::fmt::Debug for FractureProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FractureProcessor")
            .field("damage_queue", &self.damage_queue.len())
            .field("fracture_queue", &self.fracture_queue.len())
            .field("open_reports", &self.reports.len())
            .finish()
    }
}

impl FractureProcessor {
    pub fn new(particle_seed: u64) -> Self {
        Self {
            damage_queue: VecDeque::new(),
            fracture_queue: VecDeque::new(),
            reports: BTreeMap::new(),
            completed: BTreeMap::new(),
            next_report: 0,
            impacts: Vec::new(),
            particles: Vec::new(),
            outbox: SyncOutbox::default(),
            rng: Xoshiro256PlusPlus::seed_from_u64(particle_seed),
        }
    }

    /// Queues one damage application and opens its report. Returns the report id.
    pub fn queue_damage(&mut self, event: DamageEvent) -> u64 {
        let id = self.next_report;
        self.next_report += 1;
        let mut report = DamageEventReport::new(event.actor, event.position, event.direction);
        report.impact_damage_actor = event.impacting_actor;
        report.user_data = event.user_data;
        self.reports.insert(
            id,
            PendingReport {
                report,
                outstanding: 0,
                processed: false,
            },
        );
        self.damage_queue.push_back(QueuedDamage { event, report: id });
        id
    }

    /// Queues a fracture that bypasses damage thresholds.
    pub fn queue_fracture(&mut self, event: FractureEvent) {
        self.fracture_queue.push_back(event);
    }

    pub fn pending_damage(&self) -> usize {
        self.damage_queue.len()
    }

    pub fn pending_fractures(&self) -> usize {
        self.fracture_queue.len()
    }

    pub fn open_reports(&self) -> usize {
        self.reports.len()
    }

    /// Drops queued work and open reports of a released actor.
    pub fn forget_actor(&mut self, actor: ActorId) {
        self.damage_queue.retain(|q| q.event.actor != actor);
        self.fracture_queue.retain(|f| f.actor != actor);
        self.reports.retain(|_, p| p.report.actor != actor);
        self.completed.retain(|_, r| r.actor != actor);
    }

    /// Runs every queued damage event through location, spread and threshold.
    pub fn process_damage(&mut self, cx: &mut FractureContext<'_>) {
        let _span = tracing::debug_span!("process_damage", queued = self.damage_queue.len()).entered();
        while let Some(queued) = self.damage_queue.pop_front() {
            self.process_damage_event(cx, &queued.event, queued.report);
            if let Some(pending) = self.reports.get_mut(&queued.report) {
                pending.processed = true;
            }
            self.try_complete(queued.report);
        }
    }

    /// Applies queued fractures until the queue drains or the frame's fracture
    /// budget runs out. Returns the number applied.
    pub fn process_fractures(
        &mut self,
        cx: &mut FractureContext<'_>,
        budget: &mut ActorBudgetManager,
    ) -> usize {
        let mut applied = 0;
        while !self.fracture_queue.is_empty() {
            if !budget.try_process_fracture() {
                debug!(
                    deferred = self.fracture_queue.len(),
                    "fracture budget exhausted, deferring"
                );
                break;
            }
            let Some(event) = self.fracture_queue.pop_front() else {
                break;
            };
            self.apply_fracture(cx, &event);
            if let Some(id) = event.report {
                if let Some(pending) = self.reports.get_mut(&id) {
                    pending.outstanding = pending.outstanding.saturating_sub(1);
                }
                self.try_complete(id);
            }
            applied += 1;
        }
        applied
    }

    /// Completes a report for chunks destroyed outside damage processing
    /// (evictions, timeouts, valid bounds). Entries are filtered by the
    /// report bit mask; nothing is emitted when none are left.
    pub fn report_destroyed(&mut self, config: &ModuleConfig, actor: ActorId, entries: Vec<ChunkData>) {
        let mut bounds = Bounds3::EMPTY;
        for e in &entries {
            bounds.include(&e.world_bounds);
        }
        let center = if bounds.is_empty() { Vec3::ZERO } else { bounds.center() };
        let mut report = DamageEventReport::new(actor, center, Vec3::ZERO);
        for entry in entries
            .into_iter()
            .filter(|e| e.flags.intersects(config.chunk_report_bit_mask))
        {
            report.record(entry, config.chunk_report_max_fracture_event_depth);
        }
        if report.total_number_of_fracture_events == 0 {
            return;
        }
        let id = self.next_report;
        self.next_report += 1;
        self.completed.insert(id, report.finish());
    }

    /// Completed reports in the order their damage was applied.
    pub fn take_reports(&mut self) -> Vec<DamageEventReport> {
        std::mem::take(&mut self.completed).into_values().collect()
    }

    pub fn take_impacts(&mut self) -> Vec<ImpactDamageEventData> {
        std::mem::take(&mut self.impacts)
    }

    pub fn take_particles(&mut self) -> Vec<ChunkParticleReportData> {
        std::mem::take(&mut self.particles)
    }

    pub fn take_outbox(&mut self) -> SyncOutbox {
        std::mem::take(&mut self.outbox)
    }

    fn try_complete(&mut self, id: u64) {
        let done = self
            .reports
            .get(&id)
            .is_some_and(|p| p.processed && p.outstanding == 0);
        if done {
            if let Some(pending) = self.reports.remove(&id) {
                self.completed.insert(id, pending.report.finish());
            }
        }
    }

    fn process_damage_event(&mut self, cx: &mut FractureContext<'_>, event: &DamageEvent, report: u64) {
        let Some(actor) = cx.actors.get(event.actor) else {
            return;
        };
        if event.is_impact() {
            self.impacts.push(ImpactDamageEventData {
                actor: event.actor,
                chunk: event.chunk,
                position: event.position,
                direction: event.direction,
                damage: event.damage,
                impacting_actor: event.impacting_actor,
            });
        }
        if !event.flags.contains(FractureEventFlags::SYNC_DIRECT) && actor.syncs(SyncFlags::DAMAGE) {
            self.outbox.damage.push(event.clone());
        }
        let Some(target) = locate(actor, event, cx.config) else {
            debug!(actor = %event.actor, position = ?event.position, "damage found no target chunk");
            return;
        };
        let targets = damage_targets(actor, event, target, cx.config);
        let accumulate = actor.parameters().has(ParameterFlags::ACCUMULATE_DAMAGE);
        let impulse = event.direction.normalize_or_zero()
            * event.momentum
            * actor.parameters().fracture_impulse_scale;

        let Some(actor) = cx.actors.get_mut(event.actor) else {
            return;
        };
        actor.damage_coloring_mut().record(DamageEventCoreData {
            chunk_index: target,
            position: event.position,
            damage: event.damage,
            radius: event.radius,
        });
        let mut derived_flags = event.flags
            & !(FractureEventFlags::DELETE_CHUNK
                | FractureEventFlags::FORCED
                | FractureEventFlags::SYNC_DIRECT);
        if event.flags.contains(FractureEventFlags::SYNC_DIRECT) {
            derived_flags |= FractureEventFlags::SYNC_DERIVED;
        }
        let mut queued = 0;
        for (chunk, amount) in targets {
            let Some(asset_flags) = actor.descriptor(chunk).map(|d| d.flags) else {
                continue;
            };
            if asset_flags.contains(AssetChunkFlags::UNDAMAGEABLE) {
                continue;
            }
            let threshold = actor.behavior_group(chunk).damage_threshold;
            let Some(state) = actor.chunk_mut(chunk) else {
                continue;
            };
            state.damage += amount;
            let total = state.damage;
            let fractures = total >= threshold && !asset_flags.contains(AssetChunkFlags::UNFRACTURABLE);
            if fractures || !accumulate {
                state.damage = 0.0;
            }
            if fractures {
                self.fracture_queue.push_back(FractureEvent {
                    actor: event.actor,
                    chunk,
                    position: event.position,
                    direction: event.direction,
                    impulse,
                    damage: total,
                    flags: derived_flags,
                    report: Some(report),
                });
                queued += 1;
            }
        }
        if let Some(pending) = self.reports.get_mut(&report) {
            pending.outstanding += queued;
        }
        trace!(actor = %event.actor, target = %target, fractures = queued, "damage processed");
    }

    fn apply_fracture(&mut self, cx: &mut FractureContext<'_>, event: &FractureEvent) {
        let Some(actor) = cx.actors.get(event.actor) else {
            return;
        };
        let lod = actor.lod();
        let Some(chunk) = actor.asset().ancestor_at_depth(event.chunk, lod) else {
            return;
        };
        if !actor.chunk(chunk).is_some_and(|c| c.is_visible()) && !reveal(cx, event.actor, chunk) {
            trace!(actor = %event.actor, chunk = %chunk, "fracture target already gone");
            return;
        }
        let Some(actor) = cx.actors.get(event.actor) else {
            return;
        };
        let Some(desc) = actor.descriptor(chunk).cloned() else {
            return;
        };
        let world_bounds = actor.chunk_bounds(chunk).unwrap_or(Bounds3::EMPTY);
        let velocity = actor.chunk_linear_velocity(chunk).unwrap_or(Vec3::ZERO);
        let crumble = (event.flags.contains(FractureEventFlags::CRUMBLE)
            || actor.parameters().has(ParameterFlags::CRUMBLE_SMALLEST_CHUNKS))
            && !desc.flags.contains(AssetChunkFlags::UNCRUMBLEABLE);
        let spacing = actor.parameters().crumble_particle_spacing;
        let deletes = actor.deletes_fractured_chunks();
        let already_loose = actor
            .chunk(chunk)
            .and_then(|c| c.island)
            .and_then(|id| cx.structure.island(id))
            .is_some_and(|island| island.is_dynamic() && island.chunk_count() == 1);
        let r = ChunkRef::new(event.actor, chunk);

        let outcome = if event.flags.contains(FractureEventFlags::DELETE_CHUNK) {
            cx.structure
                .remove_chunk(cx.actors, r)
                .then_some((desc.depth, ReportChunkFlags::FRACTURED))
        } else if !desc.is_leaf() && desc.depth < lod {
            let spawned = cx.structure.on_fracture(cx.actors, r, cx.statics);
            let mut flags = ReportChunkFlags::FRACTURED;
            if let Some(actor) = cx.actors.get(event.actor) {
                for &child in &spawned {
                    flags |= actor.chunk_report_flags(child);
                }
            }
            for &child in &spawned {
                queue_impulse(cx, ChunkRef::new(event.actor, child), event.impulse, event.position);
            }
            (!spawned.is_empty()).then_some((desc.depth + 1, flags))
        } else if !desc.is_leaf() {
            cx.structure
                .remove_chunk(cx.actors, r)
                .then_some((desc.depth, ReportChunkFlags::FRACTURED))
        } else if crumble {
            let positions = self.crumble_positions(&world_bounds, spacing);
            if cx.structure.remove_chunk(cx.actors, r) {
                if let Some(c) = cx.actors.get_mut(event.actor).and_then(|a| a.chunk_mut(chunk)) {
                    c.flags.insert(ChunkFlags::CRUMBLED);
                }
                self.particles.push(ChunkParticleReportData {
                    actor: event.actor,
                    chunk_index: chunk,
                    positions,
                    velocities: vec![velocity],
                });
                Some((desc.depth, ReportChunkFlags::DESTROYED_CRUMBLED))
            } else {
                None
            }
        } else if deletes {
            cx.structure
                .remove_chunk(cx.actors, r)
                .then_some((desc.depth, ReportChunkFlags::FRACTURED))
        } else if already_loose {
            None
        } else {
            cx.structure.break_off(cx.actors, r).map(|_| {
                queue_impulse(cx, r, event.impulse, event.position);
                (
                    desc.depth,
                    ReportChunkFlags::FRACTURED | ReportChunkFlags::DYNAMIC,
                )
            })
        };

        let Some((depth, flags)) = outcome else {
            return;
        };
        let Some(actor) = cx.actors.get_mut(event.actor) else {
            return;
        };
        actor.hit_chunks_mut().record(
            chunk,
            desc.depth,
            event.flags
                - (FractureEventFlags::SYNC_DIRECT
                    | FractureEventFlags::SYNC_DERIVED
                    | FractureEventFlags::MANUAL),
            !event.flags.contains(FractureEventFlags::FORCED),
        );
        let echo = !event.flags.intersects(
            FractureEventFlags::SYNC_DIRECT | FractureEventFlags::SYNC_DERIVED | FractureEventFlags::SILENT,
        );
        if echo && actor.syncs(SyncFlags::FRACTURE) {
            self.outbox.fractures.push(FractureEvent {
                chunk,
                report: None,
                ..event.clone()
            });
        }
        if let Some(pending) = event.report.and_then(|id| self.reports.get_mut(&id)) {
            if flags.intersects(cx.config.chunk_report_bit_mask) {
                pending.report.record(
                    ChunkData {
                        index: chunk,
                        depth,
                        world_bounds,
                        damage: event.damage,
                        flags,
                    },
                    cx.config.chunk_report_max_fracture_event_depth,
                );
            }
        }
        trace!(actor = %event.actor, chunk = %chunk, ?flags, "chunk fractured");
    }

    /// `ceil(volume / spacing^3)` points inside `bounds`, clamped to 1..=64.
    fn crumble_positions(&mut self, bounds: &Bounds3, spacing: f32) -> Vec<Vec3> {
        if bounds.is_empty() {
            return Vec::new();
        }
        let cell = spacing * spacing * spacing;
        let count = if cell > 0.0 {
            (bounds.volume() / cell).ceil() as usize
        } else {
            1
        };
        let extent = bounds.max - bounds.min;
        (0..count.clamp(1, MAX_CRUMBLE_PARTICLES))
            .map(|_| {
                let t = Vec3::new(self.rng.gen(), self.rng.gen(), self.rng.gen());
                bounds.min + extent * t
            })
            .collect()
    }
}

/// Fractures visible ancestors above a hidden chunk until the chunk shows.
fn reveal(cx: &mut FractureContext<'_>, actor: ActorId, chunk: ChunkIndex) -> bool {
    loop {
        let Some(a) = cx.actors.get(actor) else {
            return false;
        };
        let Some(state) = a.chunk(chunk) else {
            return false;
        };
        if state.is_visible() {
            return true;
        }
        if state.is_destroyed() || state.is_fractured() {
            return false;
        }
        let Some(ancestor) = a.visible_ancestor(chunk) else {
            return false;
        };
        let spawned = cx
            .structure
            .on_fracture(cx.actors, ChunkRef::new(actor, ancestor), cx.statics);
        if spawned.is_empty() {
            return false;
        }
    }
}

fn queue_impulse(cx: &mut FractureContext<'_>, chunk: ChunkRef, impulse: Vec3, point: Vec3) {
    if impulse == Vec3::ZERO {
        return;
    }
    let Some(island_id) = cx
        .actors
        .get(chunk.actor)
        .and_then(|a| a.chunk(chunk.chunk))
        .and_then(|c| c.island)
    else {
        return;
    };
    if let Some(island) = cx.structure.island_mut(island_id) {
        if island.is_dynamic() {
            island.pending_impulse = Some(match island.pending_impulse {
                Some((sum, at)) => (sum + impulse, at),
                None => (impulse, point),
            });
        }
    }
}

/// Chunk that takes the full damage, after LOD remap and the depth walk.
fn locate(actor: &DestructibleActor, event: &DamageEvent, config: &ModuleConfig) -> Option<ChunkIndex> {
    let found = match event.chunk {
        Some(chunk) => actor.representative(chunk)?,
        None => {
            let dir = event.direction.normalize_or_zero();
            let reach = actor.asset().size() * actor.scale();
            let flags = config.damage_application_raycast_flags & !RaycastFlags::SEGMENT_INTERSECT;
            let hit = if dir == Vec3::ZERO {
                None
            } else {
                actor.raycast(event.position - dir * reach, dir, flags)
            };
            match hit {
                Some((chunk, _)) => chunk,
                None => actor.nearest_visible_chunk(event.position, event.radius)?,
            }
        }
    };
    let lod = actor.lod();
    let mut target = actor.representative(actor.asset().ancestor_at_depth(found, lod)?)?;
    let walk_to = actor.parameters().minimum_fracture_depth.min(lod);
    let stop_depth = actor
        .descriptor(target)?
        .depth
        .saturating_add(actor.parameters().damage_depth_limit);
    loop {
        let desc = actor.descriptor(target)?;
        if desc.depth >= walk_to || desc.is_leaf() {
            return Some(target);
        }
        if desc.depth >= stop_depth {
            // The fracturable level lies beyond the damage depth limit.
            return None;
        }
        let distance = |c: ChunkIndex| {
            actor
                .chunk_centroid(c)
                .map_or(f32::MAX, |p| p.distance_squared(event.position))
        };
        target = desc
            .children()
            .min_by(|&a, &b| distance(a).total_cmp(&distance(b)))?;
    }
}

/// Damage per chunk. Point damage gives the target the full amount; every
/// other visible chunk takes the spread fraction. Visible ancestors of a
/// hidden target pass their share down to the target. No share exceeds the
/// actor's damage cap.
fn damage_targets(
    actor: &DestructibleActor,
    event: &DamageEvent,
    target: ChunkIndex,
    config: &ModuleConfig,
) -> Vec<(ChunkIndex, f32)> {
    let radius_model = RadiusModel::from_legacy_flag(config.use_legacy_damage_radius_spread);
    let distance_model = DistanceModel::from_legacy_flag(config.use_legacy_chunk_bounds_testing);
    let input = SpreadInput {
        damage: event.damage,
        radius: event.radius,
        is_impact: event.is_impact(),
        falloff: event.falloff,
    };
    let asset = actor.asset();
    let asset_size = asset.size() * actor.scale();
    let point = event.radius <= 0.0;
    let cap = actor.parameters().damage_cap;
    let capped = |damage: f32| if cap > 0.0 { damage.min(cap) } else { damage };
    let damage = if point { capped(event.damage) } else { event.damage };

    let mut shares: BTreeMap<ChunkIndex, f32> = BTreeMap::new();
    if point {
        shares.insert(target, damage);
    }
    for chunk in actor.chunks().iter().filter(|c| c.is_visible()) {
        let recipient = if asset.is_ancestor(chunk.index, target) {
            target
        } else {
            chunk.index
        };
        if point && recipient == target {
            continue;
        }
        let Some(desc) = actor.descriptor(recipient) else {
            continue;
        };
        let (Some(bounds), Some(center)) = (actor.chunk_bounds(recipient), actor.chunk_centroid(recipient)) else {
            continue;
        };
        let group = actor.behavior_group(recipient);
        let range = spread::radius_range(radius_model, group, &input, asset_size);
        let distance = spread::chunk_distance(
            distance_model,
            &bounds,
            center,
            desc.sphere_radius * actor.scale(),
            desc.is_leaf(),
            event.position,
        );
        let fraction = spread::damage_fraction(radius_model, group, range, distance, event.falloff);
        if fraction > 0.0 {
            let share = shares.entry(recipient).or_default();
            *share = share.max(capped(damage * fraction));
        }
    }
    shares.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::actor::{DestructibleActor, DestructibleActorDesc};
    use crate::asset::{AssetBuilder, DestructibleAsset};

    struct NoStatics;

    impl StaticQuery for NoStatics {
        fn overlaps_static(&self, _bounds: &Bounds3) -> bool {
            false
        }
    }

    struct Fixture {
        actors: ActorStore,
        structure: SupportStructure,
        budget: ActorBudgetManager,
        processor: FractureProcessor,
        config: ModuleConfig,
        frame: u64,
    }

    fn tower() -> DestructibleAsset {
        AssetBuilder::subdivided_box("tower", Vec3::ONE, 3).build().unwrap()
    }

    impl Fixture {
        fn new(config: ModuleConfig, asset: DestructibleAsset) -> (Self, ActorId) {
            let mut fx = Self {
                actors: ActorStore::new(),
                structure: SupportStructure::new(),
                budget: ActorBudgetManager::new(),
                processor: FractureProcessor::new(config.particle_seed),
                config,
                frame: 0,
            };
            let asset = Arc::new(asset);
            let desc = DestructibleActorDesc::at(Vec3::new(0.0, 5.0, 0.0));
            let config = fx.config.clone();
            let id = fx
                .actors
                .insert_with(|id| DestructibleActor::new(id, asset, &desc, &config))
                .unwrap();
            fx.structure.add_actor(&mut fx.actors, id, &NoStatics);
            (fx, id)
        }

        fn step(&mut self) -> Vec<DamageEventReport> {
            self.frame += 1;
            self.budget.begin_frame(self.frame, &self.config);
            let mut cx = FractureContext {
                actors: &mut self.actors,
                structure: &mut self.structure,
                statics: &NoStatics,
                config: &self.config,
            };
            self.processor.process_damage(&mut cx);
            self.processor.process_fractures(&mut cx, &mut self.budget);
            self.processor.take_reports()
        }

        fn actor(&self, id: ActorId) -> &DestructibleActor {
            self.actors.get(id).unwrap()
        }
    }

    fn hit(actor: ActorId, damage: f32, chunk: Option<u32>) -> DamageEvent {
        DamageEvent::point(
            actor,
            damage,
            0.0,
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::Z,
            chunk.map(ChunkIndex),
        )
    }

    #[test]
    fn test_root_fracture_reveals_children() {
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), tower());
        fx.processor.queue_damage(hit(id, 2.0, None));
        let reports = fx.step();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_number_of_fracture_events, 1);
        assert_eq!((reports[0].min_depth, reports[0].max_depth), (1, 1));
        let actor = fx.actor(id);
        assert!(!actor.chunk(ChunkIndex(0)).unwrap().is_visible());
        assert_eq!(
            actor.visible_chunks(),
            vec![ChunkIndex(1), ChunkIndex(2), ChunkIndex(3), ChunkIndex(4)]
        );
        assert!(fx.structure.partition_violations(&fx.actors).is_empty());
    }

    #[test]
    fn test_below_threshold_is_reported_empty() {
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), tower());
        fx.processor.queue_damage(hit(id, 0.5, Some(0)));
        let reports = fx.step();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_number_of_fracture_events, 0);
        assert_eq!(fx.actor(id).visible_chunks(), vec![ChunkIndex(0)]);
        // Damage does not accumulate by default.
        assert_eq!(fx.actor(id).chunk(ChunkIndex(0)).unwrap().damage, 0.0);
    }

    #[test]
    fn test_accumulated_damage_fractures() {
        let mut asset = AssetBuilder::subdivided_box("tower", Vec3::ONE, 3);
        asset.parameters_mut().flags |= ParameterFlags::ACCUMULATE_DAMAGE;
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), asset.build().unwrap());
        fx.processor.queue_damage(hit(id, 0.6, Some(0)));
        fx.step();
        assert!(fx.actor(id).chunk(ChunkIndex(0)).unwrap().is_visible());
        fx.processor.queue_damage(hit(id, 0.6, Some(0)));
        let reports = fx.step();
        assert_eq!(reports[0].total_number_of_fracture_events, 1);
        assert!(!fx.actor(id).chunk(ChunkIndex(0)).unwrap().is_visible());
    }

    #[test]
    fn test_lod_offset_destroys_instead_of_spawning() {
        let config = ModuleConfig {
            max_chunk_depth_offset: 1,
            ..Default::default()
        };
        let (mut fx, id) = Fixture::new(config, tower());
        fx.processor.queue_damage(hit(id, 2.0, Some(0)));
        fx.step();
        fx.processor.queue_damage(hit(id, 2.0, Some(1)));
        let reports = fx.step();
        assert_eq!(reports[0].total_number_of_fracture_events, 1);
        let actor = fx.actor(id);
        assert!(actor.is_chunk_destroyed(ChunkIndex(1)));
        assert!(actor.visible_chunks().iter().all(|c| c.0 <= 4));
        assert!(actor.chunk(ChunkIndex(0)).unwrap().flags.contains(ChunkFlags::MISSING_CHILD));
    }

    #[test]
    fn test_fracture_throttle_defers_report() {
        let config = ModuleConfig {
            max_fractures_processed_per_frame: 1,
            ..Default::default()
        };
        let (mut fx, id) = Fixture::new(config, tower());
        fx.processor.queue_damage(hit(id, 2.0, Some(0)));
        assert_eq!(fx.step().len(), 1);
        // Radius damage covering all four quadrants queues four fractures.
        let mut radius = DamageEvent::radius(id, 2.0, 0.0, Vec3::new(0.0, 5.0, 0.0), 3.0, false);
        radius.direction = Vec3::ZERO;
        fx.processor.queue_damage(radius);
        for _ in 0..3 {
            assert!(fx.step().is_empty());
        }
        let reports = fx.step();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_number_of_fracture_events, 4);
        assert_eq!(fx.processor.pending_fractures(), 0);
    }

    #[test]
    fn test_forced_fracture_reveals_hidden_target() {
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), tower());
        fx.processor
            .queue_fracture(FractureEvent::forced(id, ChunkIndex(5), FractureEventFlags::empty()));
        assert!(fx.step().is_empty());
        let actor = fx.actor(id);
        assert!(actor.chunk(ChunkIndex(0)).unwrap().is_fractured());
        assert!(actor.chunk(ChunkIndex(1)).unwrap().is_fractured());
        assert!(actor.chunk(ChunkIndex(5)).unwrap().is_dynamic());
        assert!(fx.structure.partition_violations(&fx.actors).is_empty());
    }

    #[test]
    fn test_crumble_emits_bounded_particles() {
        let mut asset = AssetBuilder::subdivided_box("tower", Vec3::ONE, 2);
        asset.parameters_mut().flags |= ParameterFlags::CRUMBLE_SMALLEST_CHUNKS;
        asset.parameters_mut().crumble_particle_spacing = 0.5;
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), asset.build().unwrap());
        fx.processor.queue_damage(hit(id, 2.0, Some(0)));
        fx.step();
        fx.processor.queue_damage(hit(id, 2.0, Some(1)));
        let reports = fx.step();
        assert!(reports[0].fracture_events[0]
            .flags
            .contains(ReportChunkFlags::DESTROYED_CRUMBLED));
        let particles = fx.processor.take_particles();
        assert_eq!(particles.len(), 1);
        // Quadrant volume 1 * 2 * 1 = 2, spacing^3 = 0.125.
        assert_eq!(particles[0].positions.len(), 16);
        assert_eq!(particles[0].velocities.len(), 1);
        let actor = fx.actor(id);
        assert!(actor.chunk(ChunkIndex(1)).unwrap().flags.contains(ChunkFlags::CRUMBLED));
        assert!(actor.is_chunk_destroyed(ChunkIndex(1)));
    }

    #[test]
    fn test_report_mask_filters_entries() {
        let config = ModuleConfig {
            chunk_report_bit_mask: ReportChunkFlags::DESTROYED_FIFO_FULL,
            ..Default::default()
        };
        let (mut fx, id) = Fixture::new(config, tower());
        fx.processor.queue_damage(hit(id, 2.0, Some(0)));
        let reports = fx.step();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_number_of_fracture_events, 0);
        assert!(!fx.actor(id).chunk(ChunkIndex(0)).unwrap().is_visible());
    }

    #[test]
    fn test_minimum_fracture_depth_walks_to_nearest_child() {
        let mut asset = AssetBuilder::subdivided_box("tower", Vec3::ONE, 3);
        asset.parameters_mut().minimum_fracture_depth = 1;
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), asset.build().unwrap());
        // Near the +x,+z quadrant (chunk 4).
        let mut event = hit(id, 2.0, Some(0));
        event.position = Vec3::new(0.8, 5.0, 0.8);
        fx.processor.queue_damage(event);
        let reports = fx.step();
        assert_eq!(reports[0].fracture_events[0].index, ChunkIndex(4));
        assert!(fx.actor(id).chunk(ChunkIndex(4)).unwrap().is_fractured());
        assert!(fx.actor(id).chunk(ChunkIndex(1)).unwrap().is_visible());
    }

    #[test]
    fn test_damage_cap_limits_point_damage() {
        let mut asset = AssetBuilder::subdivided_box("tower", Vec3::ONE, 3);
        asset.parameters_mut().damage_cap = 0.5;
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), asset.build().unwrap());
        fx.processor.queue_damage(hit(id, 2.0, Some(0)));
        let reports = fx.step();
        assert_eq!(reports[0].total_number_of_fracture_events, 0);
        assert_eq!(fx.actor(id).visible_chunks(), vec![ChunkIndex(0)]);
    }

    #[test]
    fn test_damage_cap_limits_radius_shares() {
        let mut asset = AssetBuilder::subdivided_box("tower", Vec3::ONE, 3);
        asset.parameters_mut().damage_cap = 0.5;
        let (fx, id) = Fixture::new(ModuleConfig::default(), asset.build().unwrap());
        let mut event = DamageEvent::radius(id, 4.0, 0.0, Vec3::new(0.0, 5.0, 0.0), 3.0, false);
        event.direction = Vec3::ZERO;
        let actor = fx.actor(id);
        let target = locate(actor, &event, &fx.config).unwrap();
        let shares = damage_targets(actor, &event, target, &fx.config);
        assert!(!shares.is_empty());
        assert!(shares.iter().all(|&(_, amount)| amount <= 0.5));
    }

    #[test]
    fn test_damage_depth_limit_stops_descent() {
        let build = |limit: u16| {
            let mut asset = AssetBuilder::subdivided_box("tower", Vec3::ONE, 3);
            asset.parameters_mut().minimum_fracture_depth = 1;
            asset.parameters_mut().damage_depth_limit = limit;
            asset.build().unwrap()
        };

        let (mut fx, id) = Fixture::new(ModuleConfig::default(), build(0));
        fx.processor.queue_damage(hit(id, 2.0, Some(0)));
        fx.step();
        assert_eq!(fx.actor(id).visible_chunks(), vec![ChunkIndex(0)]);

        let (mut fx, id) = Fixture::new(ModuleConfig::default(), build(1));
        fx.processor.queue_damage(hit(id, 2.0, Some(0)));
        let reports = fx.step();
        assert_eq!(reports[0].total_number_of_fracture_events, 1);
        assert!(!fx.actor(id).chunk(ChunkIndex(0)).unwrap().is_visible());
    }

    #[test]
    fn test_synced_damage_derives_unechoed_fractures() {
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), tower());
        {
            let actor = fx.actors.get_mut(id).unwrap();
            actor.set_sync_params(7, SyncFlags::FRACTURE);
            actor.set_hit_chunk_tracking_params(true, true, 8, false);
        }
        let mut event = hit(id, 2.0, Some(0));
        event.flags |= FractureEventFlags::SYNC_DIRECT;
        fx.processor.queue_damage(event);
        {
            let mut cx = FractureContext {
                actors: &mut fx.actors,
                structure: &mut fx.structure,
                statics: &NoStatics,
                config: &fx.config,
            };
            fx.processor.process_damage(&mut cx);
        }
        let queued: Vec<_> = fx.processor.fracture_queue.iter().map(|e| e.flags).collect();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].contains(FractureEventFlags::SYNC_DERIVED));
        assert!(!queued[0].contains(FractureEventFlags::SYNC_DIRECT));

        fx.step();
        assert!(fx.processor.take_outbox().fractures.is_empty());
        let actor = fx.actors.get_mut(id).unwrap();
        actor.hit_chunks_mut().publish();
        let history = actor.hit_chunk_history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].hit_chunk_flags.intersects(
            FractureEventFlags::SYNC_DIRECT | FractureEventFlags::SYNC_DERIVED
        ));

        // Local damage is echoed.
        fx.processor.queue_damage(hit(id, 2.0, Some(1)));
        fx.step();
        let echoed = fx.processor.take_outbox().fractures;
        assert!(!echoed.is_empty());
        assert!(echoed.iter().all(|e| !e.flags.contains(FractureEventFlags::SYNC_DERIVED)));
    }

    #[test]
    fn test_impacts_and_coloring_recorded() {
        let (mut fx, id) = Fixture::new(ModuleConfig::default(), tower());
        let mut event = hit(id, 0.2, Some(0));
        event.flags |= FractureEventFlags::DAMAGE_FROM_IMPACT;
        fx.processor.queue_damage(event);
        fx.step();
        assert_eq!(fx.processor.take_impacts().len(), 1);
        let actor = fx.actors.get_mut(id).unwrap();
        actor.damage_coloring_mut().publish();
        assert_eq!(actor.damage_coloring_history().len(), 1);
    }
}
