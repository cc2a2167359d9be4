//! Actor budget manager.
//!
//! Keeps dynamic islands in a FIFO ordered by creation. When the dynamic
//! island count or the scene's visible chunk count exceeds its cap, dynamic
//! victims are taken from the front
//! (oldest first) or by ascending benefit. Per-frame throttles bound fracture
//! processing and physics actor creation; excess work waits for later frames.

use std::collections::VecDeque;

use bevy::math::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actor::ActorStore;
use crate::asset::ParameterFlags;
use crate::config::ModuleConfig;
use crate::fracture::ReportChunkFlags;
use crate::structure::{IslandId, SupportStructure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FifoEntry {
    island: IslandId,
    created_frame: u64,
    sequence: u64,
}

/// Budget usage observed at the last eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub dynamic_islands: usize,
    /// Visible chunks across every actor, kinematic ones included.
    pub visible_chunks: usize,
    pub fractures_this_frame: u32,
    pub creates_this_frame: u32,
}

#[derive(Debug, Default)]
pub struct ActorBudgetManager {
    fifo: VecDeque<FifoEntry>,
    sequence: u64,
    frame: u64,
    fractures_this_frame: u32,
    creates_this_frame: u32,
    max_fractures: u32,
    max_creates: u32,
    usage: BudgetUsage,
}

impl ActorBudgetManager {
    pub fn new() -> Self {
        Self {
            max_fractures: u32::MAX,
            max_creates: u32::MAX,
            ..Default::default()
        }
    }

    /// Resets per-frame counters and picks up the current throttles.
    pub fn begin_frame(&mut self, frame: u64, config: &ModuleConfig) {
        self.frame = frame;
        self.fractures_this_frame = 0;
        self.creates_this_frame = 0;
        self.max_fractures = config.max_fractures_processed_per_frame;
        self.max_creates = config.max_actor_creates_per_frame;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Appends a freshly dynamic island to the FIFO.
    pub fn admit_new_island(&mut self, island: IslandId, created_frame: u64) {
        if self.fifo.iter().any(|e| e.island == island) {
            return;
        }
        self.sequence += 1;
        self.fifo.push_back(FifoEntry {
            island,
            created_frame,
            sequence: self.sequence,
        });
    }

    pub fn forget_island(&mut self, island: IslandId) {
        self.fifo.retain(|e| e.island != island);
    }

    pub fn tracked_islands(&self) -> Vec<IslandId> {
        self.fifo.iter().map(|e| e.island).collect()
    }

    /// Consumes one unit of the fracture throttle.
    pub fn try_process_fracture(&mut self) -> bool {
        if self.fractures_this_frame >= self.max_fractures {
            return false;
        }
        self.fractures_this_frame += 1;
        true
    }

    /// Consumes one unit of the actor creation throttle.
    pub fn try_create_actor(&mut self) -> bool {
        if self.creates_this_frame >= self.max_creates {
            return false;
        }
        self.creates_this_frame += 1;
        true
    }

    pub fn usage(&self) -> BudgetUsage {
        BudgetUsage {
            fractures_this_frame: self.fractures_this_frame,
            creates_this_frame: self.creates_this_frame,
            ..self.usage
        }
    }

    /// Picks islands to evict so the island and visible chunk caps hold.
    /// Only dynamic islands are candidates, so kinematic chunks alone can keep
    /// the chunk count over its cap. Victims are removed from the FIFO; the
    /// caller destroys them.
    pub fn select_evictions(
        &mut self,
        structure: &SupportStructure,
        actors: &ActorStore,
        config: &ModuleConfig,
        viewer: Option<Vec3>,
    ) -> Vec<IslandId> {
        self.fifo.retain(|e| {
            structure
                .island(e.island)
                .is_some_and(|i| i.is_dynamic())
        });
        let mut islands = self.fifo.len();
        let mut chunks: usize = actors.iter().map(|a| a.num_visible_chunks()).sum();
        let max_islands = config.max_dynamic_chunk_island_count as usize;
        let max_chunks = config.max_chunk_count as usize;
        let over = |islands: usize, chunks: usize| islands > max_islands || chunks > max_chunks;

        let mut victims = Vec::new();
        if over(islands, chunks) {
            let order: Vec<FifoEntry> = if config.sort_by_benefit {
                let mut scored: Vec<(f32, FifoEntry)> = self
                    .fifo
                    .par_iter()
                    .map(|e| (island_benefit(structure, actors, config, e.island, viewer), *e))
                    .collect();
                scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.sequence.cmp(&b.1.sequence)));
                scored.into_iter().map(|(_, e)| e).collect()
            } else {
                let mut fifo: Vec<FifoEntry> = self.fifo.iter().copied().collect();
                fifo.sort_by_key(|e| (e.created_frame, e.sequence));
                fifo
            };
            for entry in order {
                if !over(islands, chunks) {
                    break;
                }
                let size = structure.island(entry.island).map_or(0, |i| i.chunk_count());
                islands -= 1;
                chunks = chunks.saturating_sub(size);
                victims.push(entry.island);
            }
            self.fifo.retain(|e| !victims.contains(&e.island));
            debug!(
                evicted = victims.len(),
                by_benefit = config.sort_by_benefit,
                "budget eviction"
            );
        }
        self.usage.dynamic_islands = islands;
        self.usage.visible_chunks = chunks;
        victims
    }

    /// Dynamic islands past their debris lifetime or separation, or outside
    /// their valid bounds, with the reason to report.
    pub fn expired_islands(
        &self,
        structure: &SupportStructure,
        actors: &ActorStore,
        config: &ModuleConfig,
    ) -> Vec<(IslandId, ReportChunkFlags)> {
        let mut expired = Vec::new();
        for island in structure.islands().filter(|i| i.is_dynamic() && i.actor().is_some()) {
            let Some(owner) = actors.get(island.owner()) else {
                continue;
            };
            let params = owner.parameters();
            let is_debris = params.debris_depth.is_some_and(|depth| {
                island.chunks().iter().all(|r| {
                    actors
                        .get(r.actor)
                        .and_then(|a| a.descriptor(r.chunk))
                        .is_some_and(|d| d.depth >= depth)
                })
            });
            if is_debris && params.has(ParameterFlags::DEBRIS_TIMEOUT) {
                let lifetime =
                    config.separation_lerp(params.debris_lifetime_min, params.debris_lifetime_max);
                if island.age() > lifetime {
                    expired.push((island.id(), ReportChunkFlags::DESTROYED_TIMED_OUT));
                    continue;
                }
            }
            if is_debris && params.has(ParameterFlags::DEBRIS_MAX_SEPARATION) {
                let limit = config.separation_lerp(
                    params.debris_max_separation_min,
                    params.debris_max_separation_max,
                );
                let separated = structure
                    .island_centroid(actors, island.id())
                    .is_some_and(|c| c.distance(island.origin()) > limit);
                if separated {
                    expired.push((island.id(), ReportChunkFlags::DESTROYED_EXCEEDED_MAX_DISTANCE));
                    continue;
                }
            }
            if params.has(ParameterFlags::USE_VALID_BOUNDS) {
                let valid = params.valid_bounds.inflated(config.valid_bounds_padding);
                let bounds = structure.island_bounds(actors, island.id());
                if !bounds.is_empty() && !valid.intersects(&bounds) {
                    expired.push((island.id(), ReportChunkFlags::DESTROYED_LEFT_VALID_BOUNDS));
                }
            }
        }
        expired
    }
}

/// Higher is more worth keeping.
pub fn island_benefit(
    structure: &SupportStructure,
    actors: &ActorStore,
    config: &ModuleConfig,
    island: IslandId,
    viewer: Option<Vec3>,
) -> f32 {
    let Some(i) = structure.island(island) else {
        return 0.0;
    };
    let Some(first) = i.chunks().iter().next() else {
        return 0.0;
    };
    let Some(owner) = actors.get(first.actor) else {
        return 0.0;
    };
    let weight = owner.behavior_group(first.chunk).benefit_weight;
    let params = owner.parameters();
    let remaining = if params.has(ParameterFlags::DEBRIS_TIMEOUT) {
        let lifetime = config.separation_lerp(params.debris_lifetime_min, params.debris_lifetime_max);
        if lifetime > 0.0 {
            (1.0 - i.age() / lifetime).clamp(0.0, 1.0)
        } else {
            0.0
        }
    } else {
        1.0
    };
    let distance = match (viewer, structure.island_centroid(actors, island)) {
        (Some(v), Some(c)) => v.distance(c),
        _ => 0.0,
    };
    weight * i.chunk_count() as f32 * remaining / (1.0 + distance)
}
