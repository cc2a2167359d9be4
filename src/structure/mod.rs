//! Support structure: the partition of visible chunks into islands.
//!
//! Connectivity lives in a petgraph `UnGraphMap` keyed by `ChunkRef`. Edges
//! come from asset neighbor pairs and, for actors that form extended
//! structures, from overlapping chunks of different actors. Islands are
//! recomputed locally: a flood fill restricted to the members of the island
//! that changed, never a global pass.
//!
//! Physics actors are not created here. New or re-kinded islands are left
//! "pending" (`actor == None`) and the scene attaches actors later under the
//! backend's write lock, within the per-frame creation budget.

pub mod island;
pub mod stress;
pub(crate) mod support;

pub use island::{ChunkRef, Island, IslandId, IslandKind};
pub use stress::StressSolver;

use std::collections::{BTreeMap, BTreeSet};

use bevy::math::Vec3;
use petgraph::graphmap::UnGraphMap;
use tracing::debug;

use crate::actor::{ActorId, ActorStore, DestructibleActor};
use crate::chunk::{ChunkFlags, ChunkIndex};
use crate::config::ModuleConfig;
use crate::math::{Bounds3, Pose};
use crate::physics::{pack_chunk_ref, ActorHandle, RigidActorDesc, ShapeDesc, StaticQuery};

use support::support_flags;

/// Outcome of resolving a chunk to the physics actor representing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Actor(ActorHandle),
    /// A successor exists but its island has no physics actor yet.
    Pending(IslandId),
    Gone,
}

/// The visible chunk that currently stands in for `chunk`.
///
/// Visible chunks stand for themselves. Fractured chunks descend along first
/// children, stopping at a chunk that lost a child. Hidden, unfractured chunks
/// are carried by their visible ancestor.
pub fn successor(actor: &DestructibleActor, chunk: ChunkIndex) -> Option<ChunkIndex> {
    let state = actor.chunk(chunk)?;
    if state.is_visible() {
        return Some(chunk);
    }
    if state.is_destroyed() {
        return None;
    }
    if !state.is_fractured() {
        return actor.visible_ancestor(chunk);
    }
    let mut current = chunk;
    loop {
        let state = actor.chunk(current)?;
        if state.is_visible() {
            return Some(current);
        }
        if state.is_destroyed()
            || !state.is_fractured()
            || state.flags.contains(ChunkFlags::MISSING_CHILD)
        {
            return None;
        }
        current = actor.descriptor(current)?.first_child?;
    }
}

#[derive(Debug, Default)]
pub struct SupportStructure {
    graph: UnGraphMap<ChunkRef, ()>,
    islands: BTreeMap<IslandId, Island>,
    next_island: u32,
    frame: u64,
    /// Physics actors whose islands died or changed kind, awaiting release.
    released_actors: Vec<ActorHandle>,
    /// Islands that became dynamic since the last drain, in creation order.
    new_dynamic: Vec<IslandId>,
}

impl SupportStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn island(&self, id: IslandId) -> Option<&Island> {
        self.islands.get(&id)
    }

    pub(crate) fn island_mut(&mut self, id: IslandId) -> Option<&mut Island> {
        self.islands.get_mut(&id)
    }

    pub fn islands(&self) -> impl Iterator<Item = &Island> {
        self.islands.values()
    }

    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    pub fn dynamic_island_count(&self) -> usize {
        self.islands.values().filter(|i| i.is_dynamic()).count()
    }

    pub fn pending_islands(&self) -> Vec<IslandId> {
        self.islands
            .values()
            .filter(|i| i.actor.is_none())
            .map(|i| i.id)
            .collect()
    }

    pub fn island_of(&self, actor: ActorId, handle: ActorHandle) -> Option<&Island> {
        self.islands
            .values()
            .find(|i| i.actor == Some(handle) && i.chunks.iter().any(|c| c.actor == actor))
    }

    /// Islands with at least one chunk of `actor`.
    pub fn islands_of_actor(&self, actor: ActorId) -> Vec<IslandId> {
        self.islands
            .values()
            .filter(|i| i.chunks.iter().any(|c| c.actor == actor))
            .map(|i| i.id)
            .collect()
    }

    pub fn are_connected(&self, a: ChunkRef, b: ChunkRef) -> bool {
        self.graph.contains_edge(a, b)
    }

    pub(crate) fn take_released_actors(&mut self) -> Vec<ActorHandle> {
        std::mem::take(&mut self.released_actors)
    }

    pub(crate) fn take_new_dynamic(&mut self) -> Vec<IslandId> {
        std::mem::take(&mut self.new_dynamic)
    }

    fn create_island(&mut self, kind: IslandKind, owner: ActorId, pose: Pose) -> IslandId {
        let id = IslandId(self.next_island);
        self.next_island += 1;
        self.islands
            .insert(id, Island::new(id, kind, owner, pose, self.frame));
        id
    }

    /// Adds an actor's chunks to the graph and places its roots in one island.
    pub fn add_actor(
        &mut self,
        actors: &mut ActorStore,
        id: ActorId,
        statics: &dyn StaticQuery,
    ) -> Option<IslandId> {
        let actor = actors.get(id)?;
        let asset = actor.asset().clone();
        for desc in asset.chunks() {
            self.graph.add_node(ChunkRef::new(id, desc.index));
        }
        for &(a, b) in asset.neighbors() {
            self.graph
                .add_edge(ChunkRef::new(id, a), ChunkRef::new(id, b), ());
        }
        let pose = actor.pose();
        let dynamic = actor.is_initially_dynamic();
        let roots: Vec<(ChunkIndex, ChunkFlags)> = asset
            .roots()
            .map(|r| {
                let flags = if dynamic {
                    ChunkFlags::DYNAMIC
                } else {
                    support_flags(actor, r.index, &pose, statics)
                };
                (r.index, flags)
            })
            .collect();
        let extended = !dynamic && actor.forms_extended_structures();
        let kind = if dynamic {
            IslandKind::Dynamic
        } else {
            IslandKind::Kinematic
        };
        let island_id = self.create_island(kind, id, pose);
        let actor = actors.get_mut(id)?;
        let mut members = BTreeSet::new();
        for (root, flags) in roots {
            actor.set_visible(root, true);
            if let Some(chunk) = actor.chunk_mut(root) {
                chunk.flags |= flags;
                chunk.island = Some(island_id);
                chunk.island_local = Pose::IDENTITY;
                chunk.pose = pose;
            }
            members.insert(ChunkRef::new(id, root));
        }
        if let Some(island) = self.islands.get_mut(&island_id) {
            island.chunks = members;
        }
        if dynamic {
            self.refresh_origin(actors, island_id);
            self.new_dynamic.push(island_id);
        }
        // Disconnected roots still form separate islands, but a freshly placed
        // actor keeps its kind until something fractures.
        self.split_island_inner(actors, island_id, false);
        if extended {
            self.connect_extended(actors, id);
        }
        debug!(actor = %id, island = %island_id, ?kind, "actor added to support structure");
        Some(island_id)
    }

    /// Links overlapping chunks of `id` and every other static actor that forms
    /// extended structures, then merges islands that became adjacent.
    fn connect_extended(&mut self, actors: &mut ActorStore, id: ActorId) {
        let Some(actor) = actors.get(id) else {
            return;
        };
        let padding = actor.parameters().support_padding.max(1.0e-3);
        let own: Vec<(ChunkIndex, Bounds3)> = actor
            .chunks()
            .iter()
            .filter_map(|c| {
                actor
                    .chunk_bounds_at_rest(c.index)
                    .map(|b| (c.index, b.inflated(padding)))
            })
            .collect();
        let mut edges = Vec::new();
        for other in actors.iter() {
            if other.id() == id || !other.forms_extended_structures() || other.is_initially_dynamic() {
                continue;
            }
            for c in other.chunks() {
                let Some(bounds) = other.chunk_bounds_at_rest(c.index) else {
                    continue;
                };
                for (own_chunk, own_bounds) in &own {
                    if own_bounds.intersects(&bounds) {
                        edges.push((ChunkRef::new(id, *own_chunk), ChunkRef::new(other.id(), c.index)));
                    }
                }
            }
        }
        let mut merges = BTreeSet::new();
        for (a, b) in edges {
            self.graph.add_edge(a, b, ());
            let island_a = actors.get(a.actor).and_then(|x| x.chunk(a.chunk)).and_then(|c| c.island);
            let island_b = actors.get(b.actor).and_then(|x| x.chunk(b.chunk)).and_then(|c| c.island);
            if let (Some(ia), Some(ib)) = (island_a, island_b) {
                let both_kinematic = [ia, ib].iter().all(|i| {
                    self.islands
                        .get(i)
                        .is_some_and(|is| is.kind == IslandKind::Kinematic)
                });
                if ia != ib && both_kinematic {
                    merges.insert((ib.min(ia), ib.max(ia)));
                }
            }
        }
        // Islands merged earlier in this loop are redirected to their survivor.
        let mut redirect: BTreeMap<IslandId, IslandId> = BTreeMap::new();
        let find = |redirect: &BTreeMap<IslandId, IslandId>, mut i: IslandId| {
            while let Some(&next) = redirect.get(&i) {
                i = next;
            }
            i
        };
        for (a, b) in merges {
            let (a, b) = (find(&redirect, a), find(&redirect, b));
            if a != b && self.merge_islands(actors, a, b).is_some() {
                redirect.insert(b, a);
            }
        }
    }

    /// Drops an actor's chunks from the graph and from every island.
    pub fn remove_actor(&mut self, actors: &mut ActorStore, id: ActorId) {
        let affected = self.islands_of_actor(id);
        for island_id in &affected {
            if let Some(island) = self.islands.get_mut(island_id) {
                island.chunks.retain(|c| c.actor != id);
                island.shapes_dirty = true;
                if island.owner == id {
                    if let Some(first) = island.chunks.iter().next() {
                        island.owner = first.actor;
                    }
                }
            }
        }
        let nodes: Vec<ChunkRef> = self.graph.nodes().filter(|n| n.actor == id).collect();
        for node in nodes {
            self.graph.remove_node(node);
        }
        for island_id in affected {
            let empty = self
                .islands
                .get(&island_id)
                .is_some_and(|i| i.chunks.is_empty());
            if empty {
                if let Some(island) = self.islands.remove(&island_id) {
                    self.released_actors.extend(island.actor);
                }
            } else {
                self.split_island(actors, island_id);
            }
        }
    }

    /// Resolves a chunk to its live representation. Pure query.
    pub fn resolve(&self, actors: &ActorStore, chunk: ChunkRef) -> Resolution {
        let Some(actor) = actors.get(chunk.actor) else {
            return Resolution::Gone;
        };
        let Some(visible) = successor(actor, chunk.chunk) else {
            return Resolution::Gone;
        };
        let Some(island_id) = actor.chunk(visible).and_then(|c| c.island) else {
            return Resolution::Gone;
        };
        match self.islands.get(&island_id) {
            Some(island) => match island.actor {
                Some(handle) => Resolution::Actor(handle),
                None => Resolution::Pending(island_id),
            },
            None => Resolution::Gone,
        }
    }

    /// Physics actor currently backing `chunk`, if any.
    pub fn chunk_intact(&self, actors: &ActorStore, chunk: ChunkRef) -> Option<ActorHandle> {
        match self.resolve(actors, chunk) {
            Resolution::Actor(handle) => Some(handle),
            Resolution::Pending(_) | Resolution::Gone => None,
        }
    }

    /// Replaces a visible chunk by its children inside the same island, then
    /// separates the island. Returns the children made visible.
    pub fn on_fracture(
        &mut self,
        actors: &mut ActorStore,
        chunk: ChunkRef,
        statics: &dyn StaticQuery,
    ) -> Vec<ChunkIndex> {
        let Some(actor) = actors.get(chunk.actor) else {
            return Vec::new();
        };
        let Some(state) = actor.chunk(chunk.chunk).filter(|c| c.is_visible()).cloned() else {
            return Vec::new();
        };
        let Some(island_id) = state.island else {
            return Vec::new();
        };
        let Some(kind) = self.islands.get(&island_id).map(|i| i.kind) else {
            return Vec::new();
        };
        let children: Vec<(ChunkIndex, ChunkFlags)> = match actor.descriptor(chunk.chunk) {
            Some(desc) => desc
                .children()
                .map(|child| {
                    let flags = match kind {
                        IslandKind::Dynamic => ChunkFlags::DYNAMIC,
                        IslandKind::Kinematic => support_flags(actor, child, &state.pose, statics),
                    };
                    (child, flags)
                })
                .collect(),
            None => Vec::new(),
        };
        if children.is_empty() {
            return Vec::new();
        }
        let Some(actor) = actors.get_mut(chunk.actor) else {
            return Vec::new();
        };
        actor.set_visible(chunk.chunk, false);
        if let Some(parent) = actor.chunk_mut(chunk.chunk) {
            parent.flags.insert(ChunkFlags::FRACTURED);
            parent
                .flags
                .remove(ChunkFlags::DYNAMIC | ChunkFlags::EXTERNALLY_SUPPORTED | ChunkFlags::WORLD_SUPPORTED);
            parent.island = None;
            parent.damage = 0.0;
        }
        let mut spawned = Vec::with_capacity(children.len());
        for &(child, flags) in &children {
            actor.set_visible(child, true);
            if let Some(c) = actor.chunk_mut(child) {
                c.flags.remove(ChunkFlags::EXTERNALLY_SUPPORTED | ChunkFlags::WORLD_SUPPORTED);
                c.flags |= flags;
                c.island = Some(island_id);
                c.island_local = state.island_local;
                c.pose = state.pose;
                c.linear_velocity = state.linear_velocity;
                c.angular_velocity = state.angular_velocity;
                c.damage = 0.0;
            }
            spawned.push(child);
        }
        if let Some(island) = self.islands.get_mut(&island_id) {
            island.chunks.remove(&chunk);
            island
                .chunks
                .extend(spawned.iter().map(|&c| ChunkRef::new(chunk.actor, c)));
            island.shapes_dirty = true;
        }
        self.split_island(actors, island_id);
        spawned
    }

    /// Moves a visible chunk into its own dynamic island.
    pub fn break_off(&mut self, actors: &mut ActorStore, chunk: ChunkRef) -> Option<IslandId> {
        let island_id = actors
            .get(chunk.actor)?
            .chunk(chunk.chunk)
            .filter(|c| c.is_visible())?
            .island?;
        let island = self.islands.get(&island_id)?;
        if island.chunks.len() == 1 {
            self.convert_to_dynamic(actors, island_id);
            return Some(island_id);
        }
        let pose = island.actor_pose;
        let (lin, ang) = (island.linear_velocity, island.angular_velocity);
        let new_id = self.create_island(IslandKind::Dynamic, chunk.actor, pose);
        if let Some(old) = self.islands.get_mut(&island_id) {
            old.chunks.remove(&chunk);
            old.shapes_dirty = true;
        }
        if let Some(c) = actors.get_mut(chunk.actor).and_then(|a| a.chunk_mut(chunk.chunk)) {
            c.island = Some(new_id);
            c.flags.insert(ChunkFlags::DYNAMIC);
        }
        if let Some(new) = self.islands.get_mut(&new_id) {
            new.chunks.insert(chunk);
            new.linear_velocity = lin;
            new.angular_velocity = ang;
        }
        self.refresh_origin(actors, new_id);
        self.new_dynamic.push(new_id);
        self.split_island(actors, island_id);
        Some(new_id)
    }

    /// Destroys one visible chunk and separates what remains of its island.
    pub fn remove_chunk(&mut self, actors: &mut ActorStore, chunk: ChunkRef) -> bool {
        let Some(actor) = actors.get_mut(chunk.actor) else {
            return false;
        };
        let Some(island_id) = actor.chunk(chunk.chunk).and_then(|c| c.island) else {
            return false;
        };
        actor.mark_destroyed(chunk.chunk);
        if let Some(island) = self.islands.get_mut(&island_id) {
            island.chunks.remove(&chunk);
            island.shapes_dirty = true;
        }
        self.split_island(actors, island_id);
        true
    }

    /// Turns a kinematic island dynamic. Its kinematic actor is released and a
    /// dynamic one is created later.
    pub fn convert_to_dynamic(&mut self, actors: &mut ActorStore, id: IslandId) -> bool {
        let frame = self.frame;
        let Some(island) = self.islands.get_mut(&id) else {
            return false;
        };
        if island.kind == IslandKind::Dynamic {
            return false;
        }
        island.kind = IslandKind::Dynamic;
        island.created_frame = frame;
        island.age = 0.0;
        island.shapes_dirty = true;
        self.released_actors.extend(island.actor.take());
        for r in &island.chunks {
            if let Some(c) = actors.get_mut(r.actor).and_then(|a| a.chunk_mut(r.chunk)) {
                c.flags.insert(ChunkFlags::DYNAMIC);
            }
        }
        self.refresh_origin(actors, id);
        self.new_dynamic.push(id);
        debug!(island = %id, "island became dynamic");
        true
    }

    /// Re-tests support of kinematic chunks overlapping `bounds` and separates
    /// the islands that changed. Returns every island touched or created.
    pub fn on_static_support_invalidated(
        &mut self,
        actors: &mut ActorStore,
        statics: &dyn StaticQuery,
        bounds: &[Bounds3],
    ) -> Vec<IslandId> {
        if bounds.is_empty() {
            return Vec::new();
        }
        let mut updates = Vec::new();
        let mut dirty = BTreeSet::new();
        for island in self.islands.values() {
            if island.kind != IslandKind::Kinematic {
                continue;
            }
            for r in &island.chunks {
                let Some(actor) = actors.get(r.actor) else {
                    continue;
                };
                let Some(state) = actor.chunk(r.chunk) else {
                    continue;
                };
                let Some(chunk_bounds) = actor.chunk_bounds(r.chunk) else {
                    continue;
                };
                let padded = chunk_bounds.inflated(actor.parameters().support_padding);
                if !bounds.iter().any(|b| b.intersects(&padded)) {
                    continue;
                }
                let flags = support_flags(actor, r.chunk, &state.pose, statics);
                let old = state.flags & (ChunkFlags::EXTERNALLY_SUPPORTED | ChunkFlags::WORLD_SUPPORTED);
                if old != flags {
                    updates.push((*r, flags));
                    dirty.insert(island.id);
                }
            }
        }
        for (r, flags) in updates {
            if let Some(c) = actors.get_mut(r.actor).and_then(|a| a.chunk_mut(r.chunk)) {
                c.flags
                    .remove(ChunkFlags::EXTERNALLY_SUPPORTED | ChunkFlags::WORLD_SUPPORTED);
                c.flags |= flags;
            }
        }
        let mut touched = Vec::new();
        for id in dirty {
            touched.push(id);
            touched.extend(self.split_island(actors, id));
        }
        if !touched.is_empty() {
            debug!(islands = touched.len(), "static support invalidated");
        }
        touched
    }

    /// Moves every chunk of `b` into `a`. Returns the surviving island.
    pub fn merge_islands(
        &mut self,
        actors: &mut ActorStore,
        a: IslandId,
        b: IslandId,
    ) -> Option<IslandId> {
        if a == b {
            return self.islands.contains_key(&a).then_some(a);
        }
        let a_pose = self.islands.get(&a)?.actor_pose;
        let absorbed = self.islands.remove(&b)?;
        let relative = a_pose.inverse().mul(&absorbed.actor_pose);
        for r in &absorbed.chunks {
            if let Some(c) = actors.get_mut(r.actor).and_then(|x| x.chunk_mut(r.chunk)) {
                c.island = Some(a);
                c.island_local = relative.mul(&c.island_local);
            }
        }
        self.released_actors.extend(absorbed.actor);
        let absorbed_dynamic = absorbed.kind == IslandKind::Dynamic;
        if let Some(island) = self.islands.get_mut(&a) {
            island.chunks.extend(absorbed.chunks);
            island.shapes_dirty = true;
        }
        if absorbed_dynamic {
            self.convert_to_dynamic(actors, a);
        }
        debug!(survivor = %a, absorbed = %b, "islands merged");
        Some(a)
    }

    /// Separates an island into its connected components. Kinematic islands
    /// keep supported components kinematic and turn the rest dynamic.
    /// Returns the ids of newly created islands.
    pub fn split_island(&mut self, actors: &mut ActorStore, id: IslandId) -> Vec<IslandId> {
        self.split_island_inner(actors, id, true)
    }

    fn split_island_inner(
        &mut self,
        actors: &mut ActorStore,
        id: IslandId,
        separate_unsupported: bool,
    ) -> Vec<IslandId> {
        let Some(island) = self.islands.get(&id) else {
            return Vec::new();
        };
        if island.chunks.is_empty() {
            self.destroy_island(actors, id);
            return Vec::new();
        }
        let kind = island.kind;
        let owner = island.owner;
        let pose = island.actor_pose;
        let (lin, ang) = (island.linear_velocity, island.angular_velocity);
        let mut components: Vec<(bool, BTreeSet<ChunkRef>)> = self
            .components(island)
            .into_iter()
            .map(|component| {
                let supported = kind == IslandKind::Kinematic
                    && component.iter().any(|r| is_supported(actors, *r));
                (supported, component)
            })
            .collect();
        // Supported components first so a kinematic actor survives with the id.
        components.sort_by_key(|(supported, c)| (!*supported, std::cmp::Reverse(c.len())));
        let target_kind = |supported: bool| {
            if kind == IslandKind::Dynamic || !separate_unsupported || supported {
                kind
            } else {
                IslandKind::Dynamic
            }
        };
        let mut components = components.into_iter();
        let Some((first_supported, first)) = components.next() else {
            return Vec::new();
        };
        if let Some(island) = self.islands.get_mut(&id) {
            island.chunks = first;
            island.shapes_dirty = true;
        }
        if target_kind(first_supported) != kind {
            self.convert_to_dynamic(actors, id);
        }
        let mut created = Vec::new();
        for (supported, component) in components {
            let new_kind = target_kind(supported);
            let new_owner = if component.iter().any(|r| r.actor == owner) {
                owner
            } else {
                component.iter().next().map_or(owner, |r| r.actor)
            };
            let new_id = self.create_island(new_kind, new_owner, pose);
            for r in &component {
                if let Some(c) = actors.get_mut(r.actor).and_then(|a| a.chunk_mut(r.chunk)) {
                    c.island = Some(new_id);
                    if new_kind == IslandKind::Dynamic {
                        c.flags.insert(ChunkFlags::DYNAMIC);
                    }
                }
            }
            if let Some(island) = self.islands.get_mut(&new_id) {
                island.chunks = component;
                island.linear_velocity = lin;
                island.angular_velocity = ang;
            }
            if new_kind == IslandKind::Dynamic {
                self.refresh_origin(actors, new_id);
                self.new_dynamic.push(new_id);
            }
            created.push(new_id);
        }
        if !created.is_empty() {
            debug!(island = %id, created = created.len(), "island split");
        }
        created
    }

    fn components(&self, island: &Island) -> Vec<BTreeSet<ChunkRef>> {
        let mut unvisited = island.chunks.clone();
        let mut out = Vec::new();
        while let Some(seed) = unvisited.pop_first() {
            let mut component = BTreeSet::from([seed]);
            let mut stack = vec![seed];
            while let Some(node) = stack.pop() {
                if !self.graph.contains_node(node) {
                    continue;
                }
                for next in self.graph.neighbors(node) {
                    if unvisited.remove(&next) {
                        component.insert(next);
                        stack.push(next);
                    }
                }
            }
            out.push(component);
        }
        out
    }

    /// Removes an island, destroying its chunks. Returns the destroyed chunks.
    pub fn destroy_island(&mut self, actors: &mut ActorStore, id: IslandId) -> Vec<ChunkRef> {
        let Some(island) = self.islands.remove(&id) else {
            return Vec::new();
        };
        self.released_actors.extend(island.actor);
        for r in &island.chunks {
            if let Some(actor) = actors.get_mut(r.actor) {
                actor.mark_destroyed(r.chunk);
            }
        }
        debug!(island = %id, chunks = island.chunks.len(), "island destroyed");
        island.chunks.into_iter().collect()
    }

    pub(crate) fn attach_actor(&mut self, id: IslandId, handle: ActorHandle) {
        if let Some(island) = self.islands.get_mut(&id) {
            island.actor = Some(handle);
            island.shapes_dirty = false;
            island.sleeping = false;
        }
    }

    fn refresh_origin(&mut self, actors: &ActorStore, id: IslandId) {
        if let Some(centroid) = self.island_centroid(actors, id) {
            if let Some(island) = self.islands.get_mut(&id) {
                island.origin = centroid;
            }
        }
    }

    pub fn island_centroid(&self, actors: &ActorStore, id: IslandId) -> Option<Vec3> {
        let island = self.islands.get(&id)?;
        let points: Vec<Vec3> = island
            .chunks
            .iter()
            .filter_map(|r| actors.get(r.actor)?.chunk_centroid(r.chunk))
            .collect();
        if points.is_empty() {
            return None;
        }
        Some(points.iter().copied().sum::<Vec3>() / points.len() as f32)
    }

    pub fn island_bounds(&self, actors: &ActorStore, id: IslandId) -> Bounds3 {
        let mut bounds = Bounds3::EMPTY;
        if let Some(island) = self.islands.get(&id) {
            for r in &island.chunks {
                if let Some(b) = actors.get(r.actor).and_then(|a| a.chunk_bounds(r.chunk)) {
                    bounds.include(&b);
                }
            }
        }
        bounds
    }

    /// Collision boxes of an island in its actor frame, with the scaled mass.
    pub fn island_shapes(
        &self,
        actors: &ActorStore,
        id: IslandId,
        config: &ModuleConfig,
    ) -> Option<(Vec<ShapeDesc>, f32)> {
        let island = self.islands.get(&id)?;
        let mut shapes = Vec::with_capacity(island.chunks.len());
        let mut raw_mass = 0.0;
        for r in &island.chunks {
            let actor = actors.get(r.actor)?;
            let chunk = actor.chunk(r.chunk)?;
            let hull = actor.scaled_hull(r.chunk)?;
            shapes.push(ShapeDesc {
                local_pose: chunk.island_local.mul(&Pose::from_position(hull.center())),
                half_extents: hull.half_extents(),
                user_data: pack_chunk_ref(r.actor.0, r.chunk.0),
            });
            raw_mass += hull.volume() * actor.behavior_group(r.chunk).density;
        }
        Some((shapes, config.scaled_mass(raw_mass)))
    }

    pub fn rigid_actor_desc(
        &self,
        actors: &ActorStore,
        id: IslandId,
        config: &ModuleConfig,
    ) -> Option<RigidActorDesc> {
        let island = self.islands.get(&id)?;
        let (shapes, mass) = self.island_shapes(actors, id, config)?;
        Some(RigidActorDesc {
            kind: island.kind.body_kind(),
            pose: island.actor_pose,
            shapes,
            mass,
            linear_velocity: island.linear_velocity,
            angular_velocity: island.angular_velocity,
            user_data: u64::from(id.0),
        })
    }

    /// Moves an island frame and recomputes its chunks' world poses.
    pub(crate) fn apply_island_pose(
        &mut self,
        actors: &mut ActorStore,
        id: IslandId,
        pose: Pose,
        linear_velocity: Vec3,
        angular_velocity: Vec3,
    ) {
        let Some(island) = self.islands.get_mut(&id) else {
            return;
        };
        island.actor_pose = pose;
        island.linear_velocity = linear_velocity;
        island.angular_velocity = angular_velocity;
        for r in &island.chunks {
            if let Some(c) = actors.get_mut(r.actor).and_then(|a| a.chunk_mut(r.chunk)) {
                c.pose = pose.mul(&c.island_local);
                c.linear_velocity = linear_velocity;
                c.angular_velocity = angular_velocity;
            }
        }
    }

    /// Island pose that puts `chunk` at `world`.
    pub(crate) fn island_pose_for_chunk(
        &self,
        actors: &ActorStore,
        chunk: ChunkRef,
        world: Pose,
    ) -> Option<(IslandId, Pose)> {
        let state = actors.get(chunk.actor)?.chunk(chunk.chunk)?;
        let island = state.island?;
        Some((island, world.mul(&state.island_local.inverse())))
    }

    pub(crate) fn advance_ages(&mut self, dt: f32) {
        for island in self.islands.values_mut() {
            if island.kind == IslandKind::Dynamic && island.actor.is_some() {
                island.age += dt;
            }
        }
    }

    /// Describes every breach of the partition invariant. Empty when sound.
    pub fn partition_violations(&self, actors: &ActorStore) -> Vec<String> {
        let mut problems = Vec::new();
        let mut membership: BTreeMap<ChunkRef, usize> = BTreeMap::new();
        for island in self.islands.values() {
            if island.chunks.is_empty() {
                problems.push(format!("{} is empty", island.id));
            }
            for r in &island.chunks {
                *membership.entry(*r).or_default() += 1;
                match actors.get(r.actor).and_then(|a| a.chunk(r.chunk)) {
                    Some(c) if c.is_visible() && c.island == Some(island.id) => {}
                    Some(c) => problems.push(format!(
                        "{} lists {}{} but chunk says visible={} island={:?}",
                        island.id, r.actor, r.chunk, c.is_visible(), c.island
                    )),
                    None => problems.push(format!("{} lists unknown {}{}", island.id, r.actor, r.chunk)),
                }
            }
            let parts = self.components(island).len();
            if parts > 1 {
                problems.push(format!("{} is split into {} components", island.id, parts));
            }
        }
        for actor in actors.iter() {
            for chunk in actor.chunks().iter().filter(|c| c.is_visible()) {
                let r = ChunkRef::new(actor.id(), chunk.index);
                match membership.get(&r) {
                    Some(1) => {}
                    Some(n) => problems.push(format!("{}{} is in {} islands", r.actor, r.chunk, n)),
                    None => problems.push(format!("{}{} is visible without an island", r.actor, r.chunk)),
                }
            }
        }
        problems
    }
}

fn is_supported(actors: &ActorStore, chunk: ChunkRef) -> bool {
    actors
        .get(chunk.actor)
        .and_then(|a| a.chunk(chunk.chunk))
        .is_some_and(|c| c.is_externally_supported())
}
