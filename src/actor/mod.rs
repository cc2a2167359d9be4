//! Destructible actors: placed instances of an asset.
//!
//! A `DestructibleActor` owns one `ActorChunk` per asset chunk plus the
//! per-instance histories and scoped buffers. Island membership and physics
//! actors are managed by the scene's `SupportStructure`; the actor only stores
//! the island id each visible chunk belongs to.

pub mod buffers;
pub mod history;

pub use buffers::{BufferGuard, PhysicsActorQueryFlags, ScopedBuffer};
pub use history::{DamageColoring, HitChunkTracker};

use std::collections::BTreeMap;
use std::sync::Arc;

use bevy::math::Vec3;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::asset::{BehaviorGroup, ChunkDescriptor, DestructibleAsset, DestructibleParameters};
use crate::chunk::{ActorChunk, ChunkFlags, ChunkIndex};
use crate::config::ModuleConfig;
use crate::error::{BufferKind, DestructibleError, Result};
use crate::fracture::{ChunkStateEvent, DamageEventCoreData, HitChunk, ReportChunkFlags};
use crate::math::{Bounds3, Pose};
use crate::physics::ActorHandle;

/// Scene-unique actor id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ActorId(pub u32);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

bitflags! {
    /// Chunk classes a raycast may hit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RaycastFlags: u32 {
        const STATIC_CHUNKS = 1;
        const DYNAMIC_CHUNKS = 2;
        const ALL_CHUNKS = Self::STATIC_CHUNKS.bits() | Self::DYNAMIC_CHUNKS.bits();
        /// Treat the direction as a segment; hits beyond its length are ignored.
        const SEGMENT_INTERSECT = 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SyncFlags: u32 {
        const DAMAGE = 1;
        const FRACTURE = 2;
        const TRANSFORM = 4;
    }
}

/// Replication identity of an actor. `user_actor_id == 0` disables sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncParams {
    pub user_actor_id: u32,
    pub flags: SyncFlags,
}

#[derive(Debug, Clone)]
pub struct DestructibleActorDesc {
    pub pose: Pose,
    /// Uniform scale applied to every chunk hull.
    pub scale: f32,
    /// Start simulated instead of kinematic.
    pub dynamic: bool,
    /// Connect to overlapping static actors in the support graph.
    pub form_extended_structures: bool,
    /// Overrides the asset's parameters when set.
    pub parameters: Option<DestructibleParameters>,
    /// Keep visibility events for `acquire_chunk_event_buffer`.
    pub create_chunk_events: bool,
    pub user_data: u64,
}

impl Default for DestructibleActorDesc {
    fn default() -> Self {
        Self {
            pose: Pose::IDENTITY,
            scale: 1.0,
            dynamic: false,
            form_extended_structures: false,
            parameters: None,
            create_chunk_events: true,
            user_data: 0,
        }
    }
}

impl DestructibleActorDesc {
    pub fn at(position: Vec3) -> Self {
        Self {
            pose: Pose::from_position(position),
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.scale > 0.0 && self.scale.is_finite() && self.pose.rotation.is_normalized()
    }
}

pub struct DestructibleActor {
    id: ActorId,
    asset: Arc<DestructibleAsset>,
    parameters: DestructibleParameters,
    pose: Pose,
    scale: f32,
    initially_dynamic: bool,
    form_extended_structures: bool,
    create_chunk_events: bool,
    delete_fractured_chunks: bool,
    lod: u16,
    chunks: Vec<ActorChunk>,
    pending_state_events: Vec<ChunkStateEvent>,
    chunk_events: ScopedBuffer<ChunkStateEvent>,
    physics_actors: ScopedBuffer<ActorHandle>,
    hit_chunks: HitChunkTracker,
    damage_coloring: DamageColoring,
    sync: SyncParams,
    awake: bool,
    pub user_data: u64,
}

impl std::fmt::Debug for DestructibleActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestructibleActor")
            .field("id", &self.id)
            .field("asset", &self.asset.name)
            .field("visible", &self.num_visible_chunks())
            .finish()
    }
}

impl DestructibleActor {
    pub(crate) fn new(
        id: ActorId,
        asset: Arc<DestructibleAsset>,
        desc: &DestructibleActorDesc,
        config: &ModuleConfig,
    ) -> Result<Self> {
        if !desc.is_valid() {
            return Err(DestructibleError::InvalidParameter {
                name: "actor_desc",
                reason: "scale must be positive and rotation normalized".to_string(),
            });
        }
        let parameters = desc
            .parameters
            .clone()
            .unwrap_or_else(|| asset.parameters.clone());
        let chunks = asset
            .chunks()
            .iter()
            .map(|c| {
                let mut chunk = ActorChunk::new(c.index, c.behavior_group);
                chunk.pose = desc.pose;
                if c.depth > parameters.support_depth {
                    chunk.flags |= ChunkFlags::BELOW_SUPPORT_DEPTH;
                }
                chunk
            })
            .collect();
        let mut actor = Self {
            id,
            lod: 0,
            asset,
            parameters,
            pose: desc.pose,
            scale: desc.scale,
            initially_dynamic: desc.dynamic,
            form_extended_structures: desc.form_extended_structures,
            create_chunk_events: desc.create_chunk_events,
            delete_fractured_chunks: false,
            chunks,
            pending_state_events: Vec::new(),
            chunk_events: ScopedBuffer::new(BufferKind::ChunkEvents),
            physics_actors: ScopedBuffer::new(BufferKind::PhysicsActors),
            hit_chunks: HitChunkTracker::default(),
            damage_coloring: DamageColoring::new(config.damage_coloring_capacity),
            sync: SyncParams::default(),
            awake: false,
            user_data: desc.user_data,
        };
        actor.set_lod_offset(config.max_chunk_depth_offset);
        Ok(actor)
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn asset(&self) -> &Arc<DestructibleAsset> {
        &self.asset
    }

    pub fn parameters(&self) -> &DestructibleParameters {
        &self.parameters
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_initially_dynamic(&self) -> bool {
        self.initially_dynamic
    }

    pub fn forms_extended_structures(&self) -> bool {
        self.form_extended_structures
    }

    /// Deepest level that may become visible.
    pub fn lod(&self) -> u16 {
        self.lod
    }

    pub(crate) fn set_lod_offset(&mut self, offset: u16) {
        self.lod = self
            .asset
            .depth_count()
            .saturating_sub(1)
            .saturating_sub(offset);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, index: ChunkIndex) -> Option<&ActorChunk> {
        self.chunks.get(index.as_usize())
    }

    pub(crate) fn chunk_mut(&mut self, index: ChunkIndex) -> Option<&mut ActorChunk> {
        self.chunks.get_mut(index.as_usize())
    }

    pub fn chunks(&self) -> &[ActorChunk] {
        &self.chunks
    }

    pub fn descriptor(&self, index: ChunkIndex) -> Option<&ChunkDescriptor> {
        self.asset.chunk(index)
    }

    pub fn check_chunk(&self, index: ChunkIndex) -> Result<()> {
        if self.asset.contains(index) {
            Ok(())
        } else {
            Err(DestructibleError::ChunkOutOfRange {
                index,
                count: self.chunks.len(),
            })
        }
    }

    pub fn chunk_visibilities(&self) -> Vec<bool> {
        self.chunks.iter().map(ActorChunk::is_visible).collect()
    }

    pub fn num_visible_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_visible()).count()
    }

    pub fn visible_chunks(&self) -> Vec<ChunkIndex> {
        self.chunks
            .iter()
            .filter(|c| c.is_visible())
            .map(|c| c.index)
            .collect()
    }

    /// Nearest strict ancestor that is visible, stopping at destroyed ancestors.
    pub fn visible_ancestor(&self, index: ChunkIndex) -> Option<ChunkIndex> {
        let mut current = self.asset.chunk(index)?.parent;
        while let Some(p) = current {
            let chunk = self.chunk(p)?;
            if chunk.is_visible() {
                return Some(p);
            }
            if chunk.is_destroyed() {
                return None;
            }
            current = self.asset.chunk(p)?.parent;
        }
        None
    }

    /// The chunk itself if visible, otherwise its visible ancestor.
    pub fn representative(&self, index: ChunkIndex) -> Option<ChunkIndex> {
        if self.chunk(index)?.is_visible() {
            Some(index)
        } else {
            self.visible_ancestor(index)
        }
    }

    /// No shapes of its own and no visible ancestor carrying it.
    pub fn is_chunk_destroyed(&self, index: ChunkIndex) -> bool {
        self.representative(index).is_none()
    }

    pub fn chunk_pose(&self, index: ChunkIndex) -> Option<Pose> {
        let rep = self.representative(index)?;
        self.chunk(rep).map(|c| c.pose)
    }

    pub fn chunk_linear_velocity(&self, index: ChunkIndex) -> Option<Vec3> {
        let rep = self.representative(index)?;
        self.chunk(rep).map(|c| c.linear_velocity)
    }

    pub fn chunk_angular_velocity(&self, index: ChunkIndex) -> Option<Vec3> {
        let rep = self.representative(index)?;
        self.chunk(rep).map(|c| c.angular_velocity)
    }

    /// Hull in the asset frame with the actor's scale applied.
    pub fn scaled_hull(&self, index: ChunkIndex) -> Option<Bounds3> {
        let hull = self.asset.chunk(index)?.hull;
        Some(Bounds3::new(hull.min * self.scale, hull.max * self.scale))
    }

    /// World bounds of the chunk at its current (or inherited) pose.
    pub fn chunk_bounds(&self, index: ChunkIndex) -> Option<Bounds3> {
        let pose = self.chunk_pose(index)?;
        Some(self.scaled_hull(index)?.transformed(&pose))
    }

    /// World bounds at the pose the chunk had when last visible or placed.
    pub(crate) fn chunk_bounds_at_rest(&self, index: ChunkIndex) -> Option<Bounds3> {
        let pose = self.chunk(index)?.pose;
        Some(self.scaled_hull(index)?.transformed(&pose))
    }

    pub fn chunk_centroid(&self, index: ChunkIndex) -> Option<Vec3> {
        let pose = self.chunk_pose(index)?;
        let desc = self.asset.chunk(index)?;
        Some(pose.transform_point(desc.sphere_center * self.scale))
    }

    /// Union of all visible chunks' world bounds.
    pub fn bounds(&self) -> Bounds3 {
        let mut bounds = Bounds3::EMPTY;
        for chunk in self.chunks.iter().filter(|c| c.is_visible()) {
            if let Some(b) = self.chunk_bounds(chunk.index) {
                bounds.include(&b);
            }
        }
        bounds
    }

    /// Bounds of the asset at the actor's placement pose.
    pub fn initial_bounds(&self) -> Bounds3 {
        let b = self.asset.bounds();
        Bounds3::new(b.min * self.scale, b.max * self.scale).transformed(&self.pose)
    }

    /// Report flags describing the chunk's current state.
    pub fn chunk_report_flags(&self, index: ChunkIndex) -> ReportChunkFlags {
        let Some(chunk) = self.chunk(index) else {
            return ReportChunkFlags::empty();
        };
        let mut flags = ReportChunkFlags::empty();
        flags.set(ReportChunkFlags::DYNAMIC, chunk.is_dynamic());
        flags.set(ReportChunkFlags::EXTERNALLY_SUPPORTED, chunk.is_externally_supported());
        flags.set(
            ReportChunkFlags::WORLD_SUPPORTED,
            chunk.flags.contains(ChunkFlags::WORLD_SUPPORTED),
        );
        flags.set(ReportChunkFlags::FRACTURED, chunk.is_fractured());
        flags.set(
            ReportChunkFlags::DESTROYED_CRUMBLED,
            chunk.flags.contains(ChunkFlags::CRUMBLED),
        );
        flags
    }

    pub fn chunk_behavior_group_index(&self, index: ChunkIndex) -> Option<u16> {
        self.chunk(index).and_then(|c| c.behavior_group)
    }

    pub fn behavior_group(&self, index: ChunkIndex) -> &BehaviorGroup {
        self.asset
            .behavior_group(self.chunk(index).and_then(|c| c.behavior_group))
    }

    pub fn support_depth(&self) -> u16 {
        self.parameters.support_depth
    }

    pub fn support_depth_chunk_indices(&self) -> Vec<ChunkIndex> {
        self.asset.support_depth_chunks(self.parameters.support_depth)
    }

    pub fn set_delete_fractured_chunks(&mut self, delete: bool) {
        self.delete_fractured_chunks = delete;
    }

    pub fn deletes_fractured_chunks(&self) -> bool {
        self.delete_fractured_chunks
    }

    /// Flips visibility and records the state event.
    pub(crate) fn set_visible(&mut self, index: ChunkIndex, visible: bool) {
        let Some(chunk) = self.chunks.get_mut(index.as_usize()) else {
            return;
        };
        if chunk.is_visible() == visible {
            return;
        }
        chunk.flags.set(ChunkFlags::VISIBLE, visible);
        self.pending_state_events
            .push(ChunkStateEvent::visibility(index, visible));
    }

    /// Marks a chunk destroyed and flags its parent as missing a child.
    pub(crate) fn mark_destroyed(&mut self, index: ChunkIndex) {
        self.set_visible(index, false);
        if let Some(chunk) = self.chunk_mut(index) {
            chunk.flags.insert(ChunkFlags::DESTROYED);
            chunk.flags.remove(ChunkFlags::DYNAMIC);
            chunk.island = None;
            chunk.damage = 0.0;
        }
        if let Some(parent) = self.asset.chunk(index).and_then(|c| c.parent) {
            if let Some(p) = self.chunk_mut(parent) {
                p.flags.insert(ChunkFlags::MISSING_CHILD);
            }
        }
    }

    pub(crate) fn take_pending_state_events(&mut self) -> Vec<ChunkStateEvent> {
        std::mem::take(&mut self.pending_state_events)
    }

    pub fn has_pending_state_events(&self) -> bool {
        !self.pending_state_events.is_empty()
    }

    /// Publishes this step's histories and visibility events.
    pub(crate) fn publish_step(&mut self, state_events: &[ChunkStateEvent]) {
        self.hit_chunks.publish();
        self.damage_coloring.publish();
        if self.create_chunk_events {
            self.chunk_events.extend(state_events.iter().copied());
        }
    }

    /// Visibility events published so far. `clear_on_release` empties the
    /// buffer when the guard drops.
    pub fn acquire_chunk_event_buffer(
        &self,
        clear_on_release: bool,
    ) -> Result<BufferGuard<'_, ChunkStateEvent>> {
        self.chunk_events.acquire(clear_on_release)
    }

    pub(crate) fn physics_actor_buffer(&self) -> &ScopedBuffer<ActorHandle> {
        &self.physics_actors
    }

    pub fn sync_params(&self) -> SyncParams {
        self.sync
    }

    pub fn set_sync_params(&mut self, user_actor_id: u32, flags: SyncFlags) {
        self.sync = SyncParams {
            user_actor_id,
            flags,
        };
    }

    pub(crate) fn syncs(&self, flag: SyncFlags) -> bool {
        self.sync.user_actor_id != 0 && self.sync.flags.contains(flag)
    }

    pub fn set_hit_chunk_tracking_params(
        &mut self,
        flush: bool,
        start: bool,
        search_depth: u16,
        track_all_changes: bool,
    ) {
        self.hit_chunks
            .set_params(flush, start, search_depth, track_all_changes);
    }

    pub fn hit_chunk_history(&self) -> &[HitChunk] {
        self.hit_chunks.history()
    }

    pub(crate) fn hit_chunks_mut(&mut self) -> &mut HitChunkTracker {
        &mut self.hit_chunks
    }

    pub fn set_damage_coloring_capacity(&mut self, capacity: usize) {
        self.damage_coloring.set_capacity(capacity);
    }

    pub fn damage_coloring_history(&self) -> Vec<DamageEventCoreData> {
        self.damage_coloring.history().copied().collect()
    }

    pub(crate) fn damage_coloring_mut(&mut self) -> &mut DamageColoring {
        &mut self.damage_coloring
    }

    pub fn is_awake(&self) -> bool {
        self.awake
    }

    pub(crate) fn set_awake(&mut self, awake: bool) {
        self.awake = awake;
    }

    /// Closest visible chunk hit by the ray, filtered by static/dynamic class.
    pub fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        flags: RaycastFlags,
    ) -> Option<(ChunkIndex, f32)> {
        let segment = flags.contains(RaycastFlags::SEGMENT_INTERSECT);
        let dir = if segment {
            direction
        } else {
            direction.normalize_or_zero()
        };
        if dir == Vec3::ZERO {
            return None;
        }
        let mut best: Option<(ChunkIndex, f32)> = None;
        for chunk in self.chunks.iter().filter(|c| c.is_visible()) {
            let class = if chunk.is_dynamic() {
                RaycastFlags::DYNAMIC_CHUNKS
            } else {
                RaycastFlags::STATIC_CHUNKS
            };
            if !flags.intersects(class) {
                continue;
            }
            let Some(hull) = self.scaled_hull(chunk.index) else {
                continue;
            };
            let local_origin = chunk.pose.inverse_transform_point(origin);
            let local_dir = chunk.pose.rotation.inverse() * dir;
            if let Some(t) = hull.ray_intersect(local_origin, local_dir) {
                if segment && t > 1.0 {
                    continue;
                }
                if best.map_or(true, |(_, bt)| t < bt) {
                    best = Some((chunk.index, t));
                }
            }
        }
        best
    }

    /// Nearest visible chunk whose bounds lie within `radius` of `position`
    /// (or within the chunk's own extent when that is larger).
    pub fn nearest_visible_chunk(&self, position: Vec3, radius: f32) -> Option<ChunkIndex> {
        let mut best: Option<(ChunkIndex, f32)> = None;
        for chunk in self.chunks.iter().filter(|c| c.is_visible()) {
            let Some(bounds) = self.chunk_bounds(chunk.index) else {
                continue;
            };
            let d = bounds.distance_to_point(position);
            let reach = radius.max(bounds.half_extents().length());
            if d <= reach && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((chunk.index, d));
            }
        }
        best.map(|(i, _)| i)
    }
}

/// All actors of a scene, keyed by id.
#[derive(Debug, Default)]
pub struct ActorStore {
    actors: BTreeMap<ActorId, DestructibleActor>,
    next_id: u32,
}

impl ActorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_with(
        &mut self,
        build: impl FnOnce(ActorId) -> Result<DestructibleActor>,
    ) -> Result<ActorId> {
        let id = ActorId(self.next_id);
        let actor = build(id)?;
        self.next_id += 1;
        self.actors.insert(id, actor);
        Ok(id)
    }

    pub(crate) fn remove(&mut self, id: ActorId) -> Option<DestructibleActor> {
        self.actors.remove(&id)
    }

    pub fn get(&self, id: ActorId) -> Option<&DestructibleActor> {
        self.actors.get(&id)
    }

    pub fn get_mut(&mut self, id: ActorId) -> Option<&mut DestructibleActor> {
        self.actors.get_mut(&id)
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn ids(&self) -> Vec<ActorId> {
        self.actors.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DestructibleActor> {
        self.actors.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DestructibleActor> {
        self.actors.values_mut()
    }
}
