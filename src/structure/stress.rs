//! Stress solver: snaps overhangs that hang off a single weak link.
//!
//! Links are an actor's support-depth chunks, connected by the asset's
//! neighbor pairs. When a link breaks, its unbroken neighbors are checked.
//! A neighbor left with exactly two traversal paths splits the structure
//! into two sides. If one side reaches external support and the other does
//! not, and the free side outweighs the mass threshold, the neighbor is
//! scheduled to snap after the configured delay. Links with support on both
//! sides are remembered as strained and re-checked on every later break.

use std::collections::{BTreeMap, BTreeSet};

use bevy::math::Vec3;
use bitflags::bitflags;
use tracing::debug;

use super::{successor, IslandKind, SupportStructure};
use crate::actor::{ActorId, ActorStore, DestructibleActor};
use crate::chunk::ChunkIndex;
use crate::fracture::{FractureEvent, FractureEventFlags};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct LinkCondition: u8 {
        const BROKEN = 1 << 0;
        const STRAINED = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingSnap {
    link: usize,
    /// Seconds left; negative once the snap has fired.
    remaining: f32,
    position: Vec3,
    impulse: Vec3,
}

/// Mass and centroid of one side of a candidate link.
#[derive(Debug, Clone, Copy, Default)]
struct Peninsula {
    supported: bool,
    mass: f32,
    center: Vec3,
}

impl Peninsula {
    fn add(&mut self, mass: f32, center: Vec3) {
        let total = self.mass + mass;
        if total > 0.0 {
            self.center = (self.center * self.mass + center * mass) / total;
        }
        self.mass = total;
    }
}

#[derive(Debug)]
pub struct StressSolver {
    actor: ActorId,
    links: Vec<ChunkIndex>,
    adjacency: Vec<Vec<usize>>,
    condition: Vec<LinkCondition>,
    recently_broken: Vec<usize>,
    strained: Vec<usize>,
    snaps: Vec<PendingSnap>,
    time_delay: f32,
    mass_threshold: f32,
}

impl StressSolver {
    pub fn new(actor: &DestructibleActor) -> Self {
        let links = actor.support_depth_chunk_indices();
        let slots: BTreeMap<ChunkIndex, usize> =
            links.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let mut adjacency = vec![Vec::new(); links.len()];
        for (a, b) in actor.asset().neighbors() {
            if let (Some(&i), Some(&j)) = (slots.get(a), slots.get(b)) {
                adjacency[i].push(j);
                adjacency[j].push(i);
            }
        }
        let params = actor.parameters();
        debug!(actor = %actor.id(), links = links.len(), "stress solver attached");
        Self {
            actor: actor.id(),
            condition: vec![LinkCondition::empty(); links.len()],
            links,
            adjacency,
            recently_broken: Vec::new(),
            strained: Vec::new(),
            snaps: Vec::new(),
            time_delay: params.stress_solver_time_delay.max(0.0),
            mass_threshold: params.stress_solver_mass_threshold,
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Snaps that have not fired yet.
    pub fn pending_snaps(&self) -> usize {
        self.snaps.iter().filter(|s| s.remaining >= 0.0).count()
    }

    pub fn strained_links(&self) -> Vec<ChunkIndex> {
        self.strained.iter().map(|&l| self.links[l]).collect()
    }

    /// Picks up links broken since the last tick, fires ripe snaps and
    /// schedules new ones. Returns the snap fractures to queue this frame.
    pub fn tick(&mut self, actors: &ActorStore, structure: &SupportStructure, dt: f32) -> Vec<FractureEvent> {
        let Some(actor) = actors.get(self.actor) else {
            return Vec::new();
        };
        self.refresh(actor, structure);
        let ripe = self.advance_snaps(dt);
        self.resolve(actor);
        ripe
    }

    fn is_broken(&self, link: usize) -> bool {
        self.condition[link].contains(LinkCondition::BROKEN)
    }

    fn refresh(&mut self, actor: &DestructibleActor, structure: &SupportStructure) {
        for link in 0..self.links.len() {
            if !self.is_broken(link) && is_detached(actor, structure, self.links[link]) {
                self.condition[link].insert(LinkCondition::BROKEN);
                self.recently_broken.push(link);
            }
        }
    }

    fn advance_snaps(&mut self, dt: f32) -> Vec<FractureEvent> {
        if self.snaps.is_empty() {
            return Vec::new();
        }
        let mut ripe = Vec::new();
        let mut expired = 0;
        for i in 0..self.snaps.len() {
            let snap = self.snaps[i];
            if snap.remaining < 0.0 {
                expired += 1;
                continue;
            }
            let remaining = snap.remaining - dt;
            self.snaps[i].remaining = remaining;
            if remaining < 0.0 && !self.is_broken(snap.link) {
                self.condition[snap.link].insert(LinkCondition::BROKEN);
                ripe.push(FractureEvent {
                    actor: self.actor,
                    chunk: self.links[snap.link],
                    position: snap.position,
                    direction: Vec3::ZERO,
                    impulse: snap.impulse,
                    damage: 0.0,
                    flags: FractureEventFlags::SNAP,
                    report: None,
                });
            }
        }
        if expired == self.snaps.len() {
            self.snaps.clear();
        }
        ripe
    }

    fn resolve(&mut self, actor: &DestructibleActor) {
        // Links waiting on a snap are either about to fracture or already broken.
        let mut seen: BTreeSet<usize> = self.snaps.iter().map(|s| s.link).collect();
        let mut candidates = Vec::new();
        while let Some(link) = self.recently_broken.pop() {
            for &next in &self.adjacency[link] {
                if !self.is_broken(next) && seen.insert(next) {
                    candidates.push(next);
                }
            }
        }
        let condition = &self.condition;
        self.strained
            .retain(|&l| !condition[l].contains(LinkCondition::BROKEN));
        for &link in &self.strained {
            if seen.insert(link) {
                candidates.push(link);
            }
        }
        for link in candidates {
            self.evaluate(actor, link);
        }
    }

    fn unbroken_neighbors(&self, link: usize) -> Vec<usize> {
        self.adjacency[link]
            .iter()
            .copied()
            .filter(|&n| !self.is_broken(n))
            .collect()
    }

    fn adjacent(&self, a: usize, b: usize) -> bool {
        self.adjacency[a].contains(&b)
    }

    /// Two starting points that split the structure at `link`, if it has them.
    fn traversal_paths(&self, link: usize) -> Option<[usize; 2]> {
        let initial = self.adjacency[link].len();
        if initial <= 2 {
            return None;
        }
        match self.unbroken_neighbors(link).as_slice() {
            &[a, b] => (!self.adjacent(a, b)).then_some([a, b]),
            &[a, b, c] if initial > 3 => {
                if self.adjacent(a, b) {
                    (!self.adjacent(a, c) && !self.adjacent(b, c)).then_some([a, c])
                } else if self.adjacent(a, c) != self.adjacent(b, c) {
                    Some([a, b])
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn evaluate(&mut self, actor: &DestructibleActor, link: usize) {
        let Some(paths) = self.traversal_paths(link) else {
            return;
        };
        let sides = paths.map(|start| self.traverse(actor, link, start));
        let free = match (sides[0].supported, sides[1].supported) {
            (false, false) if sides[0].mass > sides[1].mass => sides[0],
            (false, false) => sides[1],
            (true, false) => sides[1],
            (false, true) => sides[0],
            (true, true) => {
                if !self.condition[link].contains(LinkCondition::STRAINED) {
                    self.condition[link].insert(LinkCondition::STRAINED);
                    self.strained.push(link);
                }
                return;
            }
        };
        if free.mass <= self.mass_threshold {
            return;
        }
        let chunk = self.links[link];
        let position = actor.chunk_centroid(chunk).unwrap_or(free.center);
        self.snaps.push(PendingSnap {
            link,
            remaining: self.time_delay,
            position,
            impulse: -(free.center - position).normalize_or_zero(),
        });
        debug!(actor = %self.actor, chunk = %chunk, mass = free.mass, "weak link scheduled to snap");
    }

    /// Flood fill from `start` that never crosses `root`. Reaching a
    /// supported link discards the side's mass.
    fn traverse(&self, actor: &DestructibleActor, root: usize, start: usize) -> Peninsula {
        let mut visited = BTreeSet::from([root, start]);
        let mut stack = vec![start];
        let mut side = Peninsula::default();
        while let Some(link) = stack.pop() {
            let chunk = self.links[link];
            if is_supported(actor, chunk) {
                return Peninsula {
                    supported: true,
                    ..Default::default()
                };
            }
            if let Some(center) = actor.chunk_centroid(chunk) {
                side.add(link_mass(actor, chunk), center);
            }
            for &next in &self.adjacency[link] {
                if !self.is_broken(next) && visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        side
    }
}

/// True once the link no longer belongs to a kinematic island.
fn is_detached(actor: &DestructibleActor, structure: &SupportStructure, chunk: ChunkIndex) -> bool {
    let Some(state) = actor.chunk(chunk) else {
        return true;
    };
    if state.is_destroyed() || state.is_fractured() {
        return true;
    }
    successor(actor, chunk)
        .and_then(|visible| actor.chunk(visible))
        .and_then(|c| c.island)
        .and_then(|id| structure.island(id))
        .map_or(true, |island| island.kind() != IslandKind::Kinematic)
}

fn is_supported(actor: &DestructibleActor, chunk: ChunkIndex) -> bool {
    successor(actor, chunk)
        .and_then(|visible| actor.chunk(visible))
        .is_some_and(|c| c.is_externally_supported())
}

fn link_mass(actor: &DestructibleActor, chunk: ChunkIndex) -> f32 {
    actor
        .scaled_hull(chunk)
        .map_or(0.0, |hull| hull.volume() * actor.behavior_group(chunk).density)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::actor::DestructibleActorDesc;
    use crate::asset::{AssetBuilder, AssetChunkFlags, ParameterFlags};
    use crate::config::ModuleConfig;
    use crate::math::Bounds3;
    use crate::physics::StaticQuery;
    use crate::structure::ChunkRef;

    struct NoStatics;

    impl StaticQuery for NoStatics {
        fn overlaps_static(&self, _bounds: &Bounds3) -> bool {
            false
        }
    }

    const HUB: ChunkIndex = ChunkIndex(0);
    const NORTH: ChunkIndex = ChunkIndex(2);
    const SOUTH: ChunkIndex = ChunkIndex(3);
    const TIP: ChunkIndex = ChunkIndex(6);

    /// A hub with a supported wall on the west, two stubs north and south,
    /// and a three-chunk arm of mass 2 to the east.
    fn cross(threshold: f32, delay: f32) -> (ActorStore, SupportStructure, ActorId) {
        let mut b = AssetBuilder::new("cross");
        let slab = |x0: f32, x1: f32, y0: f32, y1: f32| {
            Bounds3::new(Vec3::new(x0, y0, -0.5), Vec3::new(x1, y1, 0.5))
        };
        b.add_chunk(None, slab(-0.5, 0.5, -0.5, 0.5));
        let wall = b.add_chunk(None, slab(-1.5, -0.5, -0.25, 0.25));
        b.add_chunk(None, slab(-0.25, 0.25, 0.5, 1.5));
        b.add_chunk(None, slab(-0.25, 0.25, -1.5, -0.5));
        b.add_chunk(None, slab(0.5, 1.5, -0.25, 0.25));
        b.add_chunk(None, slab(1.5, 2.5, -0.25, 0.25));
        b.add_chunk(None, slab(2.5, 3.5, -0.5, 0.5));
        b.set_flags(wall, AssetChunkFlags::SUPPORT);
        let params = b.parameters_mut();
        params.flags |= ParameterFlags::USE_STRESS_SOLVER;
        params.stress_solver_mass_threshold = threshold;
        params.stress_solver_time_delay = delay;
        let asset = Arc::new(b.build().unwrap());

        let mut actors = ActorStore::new();
        let mut structure = SupportStructure::new();
        let config = ModuleConfig::default();
        let id = actors
            .insert_with(|id| DestructibleActor::new(id, asset, &DestructibleActorDesc::default(), &config))
            .unwrap();
        structure.add_actor(&mut actors, id, &NoStatics);
        (actors, structure, id)
    }

    fn break_stubs(actors: &mut ActorStore, structure: &mut SupportStructure, id: ActorId) {
        structure.break_off(actors, ChunkRef::new(id, NORTH)).unwrap();
        structure.break_off(actors, ChunkRef::new(id, SOUTH)).unwrap();
    }

    #[test]
    fn test_links_follow_neighbor_pairs() {
        let (actors, _, id) = cross(1.5, 0.0);
        let solver = StressSolver::new(actors.get(id).unwrap());
        assert_eq!(solver.links.len(), 7);
        let mut hub = solver.adjacency[0].clone();
        hub.sort_unstable();
        assert_eq!(hub, vec![1, 2, 3, 4]);
        assert_eq!(solver.adjacency[6], vec![5]);
    }

    #[test]
    fn test_heavy_overhang_snaps_after_delay() {
        let (mut actors, mut structure, id) = cross(1.5, 0.05);
        let mut solver = StressSolver::new(actors.get(id).unwrap());
        assert!(solver.tick(&actors, &structure, 0.02).is_empty());

        break_stubs(&mut actors, &mut structure, id);
        assert!(solver.tick(&actors, &structure, 0.02).is_empty());
        assert_eq!(solver.pending_snaps(), 1);
        assert!(solver.tick(&actors, &structure, 0.02).is_empty());
        assert!(solver.tick(&actors, &structure, 0.02).is_empty());

        let fired = solver.tick(&actors, &structure, 0.02);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].chunk, HUB);
        assert!(fired[0].flags.contains(FractureEventFlags::SNAP));
        // Pushed away from the arm's centroid.
        assert!(fired[0].impulse.x < 0.0);
        assert_eq!(solver.pending_snaps(), 0);
        assert!(solver.tick(&actors, &structure, 0.02).is_empty());
    }

    #[test]
    fn test_light_overhang_stays() {
        let (mut actors, mut structure, id) = cross(5.0, 0.0);
        let mut solver = StressSolver::new(actors.get(id).unwrap());
        break_stubs(&mut actors, &mut structure, id);
        for _ in 0..5 {
            assert!(solver.tick(&actors, &structure, 0.02).is_empty());
        }
        assert_eq!(solver.pending_snaps(), 0);
    }

    #[test]
    fn test_doubly_supported_link_is_strained() {
        let (mut actors, mut structure, id) = cross(0.1, 0.0);
        // Support the tip as well: the hub then carries no overhang.
        if let Some(tip) = actors.get_mut(id).and_then(|a| a.chunk_mut(TIP)) {
            tip.flags |= crate::chunk::ChunkFlags::EXTERNALLY_SUPPORTED;
        }
        let mut solver = StressSolver::new(actors.get(id).unwrap());
        break_stubs(&mut actors, &mut structure, id);
        assert!(solver.tick(&actors, &structure, 0.02).is_empty());
        assert_eq!(solver.pending_snaps(), 0);
        assert_eq!(solver.strained_links(), vec![HUB]);
    }

    #[test]
    fn test_single_break_leaves_three_paths_unsnapped() {
        let (mut actors, mut structure, id) = cross(0.1, 0.0);
        let mut solver = StressSolver::new(actors.get(id).unwrap());
        structure.break_off(&mut actors, ChunkRef::new(id, NORTH)).unwrap();
        // West, south and east are pairwise apart, so the hub has three
        // independent paths and no single weak side.
        assert!(solver.tick(&actors, &structure, 0.02).is_empty());
        assert_eq!(solver.pending_snaps(), 0);
    }
}
