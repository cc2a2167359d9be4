//! Bounded per-actor histories, published at step boundaries.

use std::collections::VecDeque;

use crate::chunk::ChunkIndex;
use crate::fracture::{DamageEventCoreData, FractureEventFlags, HitChunk};

/// Records fractured chunks for replication or replay.
#[derive(Debug, Clone, Default)]
pub struct HitChunkTracker {
    enabled: bool,
    /// Only chunks at or above this depth are recorded.
    search_depth: u16,
    /// Also record removals that were not caused by damage.
    track_all_changes: bool,
    pending: Vec<HitChunk>,
    published: Vec<HitChunk>,
}

impl HitChunkTracker {
    pub fn set_params(&mut self, flush: bool, start: bool, search_depth: u16, track_all_changes: bool) {
        if flush {
            self.pending.clear();
            self.published.clear();
        }
        self.enabled = start;
        self.search_depth = search_depth;
        self.track_all_changes = track_all_changes;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, chunk: ChunkIndex, depth: u16, flags: FractureEventFlags, from_damage: bool) {
        if !self.enabled || depth > self.search_depth || (!from_damage && !self.track_all_changes) {
            return;
        }
        self.pending.push(HitChunk {
            chunk_index: chunk,
            hit_chunk_flags: flags,
        });
    }

    pub fn publish(&mut self) {
        self.published.append(&mut self.pending);
    }

    pub fn history(&self) -> &[HitChunk] {
        &self.published
    }
}

/// Ring of recent damage applications.
#[derive(Debug, Clone)]
pub struct DamageColoring {
    capacity: usize,
    pending: Vec<DamageEventCoreData>,
    published: VecDeque<DamageEventCoreData>,
}

impl DamageColoring {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: Vec::new(),
            published: VecDeque::with_capacity(capacity),
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.published.len() > capacity {
            self.published.pop_front();
        }
    }

    pub fn record(&mut self, data: DamageEventCoreData) {
        if self.capacity > 0 {
            self.pending.push(data);
        }
    }

    pub fn publish(&mut self) {
        for data in self.pending.drain(..) {
            if self.published.len() == self.capacity {
                self.published.pop_front();
            }
            self.published.push_back(data);
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &DamageEventCoreData> {
        self.published.iter()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.published.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec3;

    #[test]
    fn test_hit_history_visible_after_publish() {
        let mut tracker = HitChunkTracker::default();
        tracker.set_params(true, true, 1, false);
        tracker.record(ChunkIndex(1), 1, FractureEventFlags::empty(), true);
        tracker.record(ChunkIndex(7), 2, FractureEventFlags::empty(), true);
        tracker.record(ChunkIndex(2), 1, FractureEventFlags::empty(), false);
        assert!(tracker.history().is_empty());
        tracker.publish();
        assert_eq!(tracker.history().len(), 1);
        assert_eq!(tracker.history()[0].chunk_index, ChunkIndex(1));
    }

    #[test]
    fn test_damage_coloring_ring_bounded() {
        let mut coloring = DamageColoring::new(2);
        for i in 0..5 {
            coloring.record(DamageEventCoreData {
                chunk_index: ChunkIndex(i),
                position: Vec3::ZERO,
                damage: i as f32,
                radius: 0.0,
            });
        }
        coloring.publish();
        let kept: Vec<u32> = coloring.history().map(|d| d.chunk_index.0).collect();
        assert_eq!(kept, vec![3, 4]);
    }
}
