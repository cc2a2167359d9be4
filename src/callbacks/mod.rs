//! Capability interfaces the host registers to observe destruction.
//!
//! Every method is called at most once per step with that step's batch,
//! from the thread running `DestructibleScene::simulate`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::actor::ActorId;
use crate::fracture::{
    ChunkParticleReportData, ChunkStateEventData, DamageEventReport, ImpactDamageEventData,
};
use crate::physics::ActorHandle;
use crate::structure::IslandId;

pub trait ChunkReport: Send + Sync {
    /// One report per damage application, fired even when nothing fractured.
    fn on_damage_notify(&self, report: &DamageEventReport);

    /// Visibility batch of one actor, when state events are scheduled.
    fn on_state_change_notify(&self, _data: &ChunkStateEventData) {}

    fn on_destructible_wake(&self, _actors: &[ActorId]) {}

    fn on_destructible_sleep(&self, _actors: &[ActorId]) {}

    /// Asked once an actor has no visible chunk left. `true` releases it at
    /// the end of the step.
    fn release_on_no_chunks_visible(&self, _actor: ActorId) -> bool {
        true
    }
}

pub trait ChunkParticleReport: Send + Sync {
    fn on_particle_emission(&self, data: &ChunkParticleReportData);
}

pub trait ImpactDamageReport: Send + Sync {
    fn on_impact_damage_notify(&self, events: &[ImpactDamageEventData]);
}

pub trait PhysicsActorReport: Send + Sync {
    fn on_create(&self, actor: ActorHandle, island: IslandId);

    fn on_release(&self, actor: ActorHandle);
}

/// Registered callbacks. Unset slots are skipped.
#[derive(Clone, Default)]
pub struct ModuleCallbacks {
    pub chunk_report: Option<Arc<dyn ChunkReport>>,
    pub particle_report: Option<Arc<dyn ChunkParticleReport>>,
    pub impact_report: Option<Arc<dyn ImpactDamageReport>>,
    pub physics_actor_report: Option<Arc<dyn PhysicsActorReport>>,
}

impl std::fmt::Debug for ModuleCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCallbacks")
            .field("chunk_report", &self.chunk_report.is_some())
            .field("particle_report", &self.particle_report.is_some())
            .field("impact_report", &self.impact_report.is_some())
            .field("physics_actor_report", &self.physics_actor_report.is_some())
            .finish()
    }
}

impl ModuleCallbacks {
    /// Routes every callback kind to one collector.
    pub fn all(collector: Arc<ReportCollector>) -> Self {
        Self {
            chunk_report: Some(collector.clone()),
            particle_report: Some(collector.clone()),
            impact_report: Some(collector.clone()),
            physics_actor_report: Some(collector),
        }
    }

    /// Answer of the chunk report, or `true` when none is registered.
    pub fn release_on_no_chunks_visible(&self, actor: ActorId) -> bool {
        self.chunk_report
            .as_ref()
            .map_or(true, |r| r.release_on_no_chunks_visible(actor))
    }
}

/// Everything a collector has seen since the last drain.
#[derive(Debug, Clone, Default)]
pub struct CollectedReports {
    pub damage: Vec<DamageEventReport>,
    pub state_changes: Vec<ChunkStateEventData>,
    pub woken: Vec<ActorId>,
    pub slept: Vec<ActorId>,
    pub particles: Vec<ChunkParticleReportData>,
    pub impacts: Vec<ImpactDamageEventData>,
    pub created: Vec<(ActorHandle, IslandId)>,
    pub released: Vec<ActorHandle>,
}

/// Callback implementation that stores every batch it receives.
#[derive(Debug, Default)]
pub struct ReportCollector {
    inner: Mutex<CollectedReports>,
    /// Answer to `release_on_no_chunks_visible`.
    keep_empty_actors: bool,
}

impl ReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector that asks the scene to keep actors with no visible chunks.
    pub fn keeping_empty_actors() -> Self {
        Self {
            keep_empty_actors: true,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> CollectedReports {
        self.inner.lock().clone()
    }

    pub fn drain(&self) -> CollectedReports {
        std::mem::take(&mut *self.inner.lock())
    }
}

impl ChunkReport for ReportCollector {
    fn on_damage_notify(&self, report: &DamageEventReport) {
        self.inner.lock().damage.push(report.clone());
    }

    fn on_state_change_notify(&self, data: &ChunkStateEventData) {
        self.inner.lock().state_changes.push(data.clone());
    }

    fn on_destructible_wake(&self, actors: &[ActorId]) {
        self.inner.lock().woken.extend_from_slice(actors);
    }

    fn on_destructible_sleep(&self, actors: &[ActorId]) {
        self.inner.lock().slept.extend_from_slice(actors);
    }

    fn release_on_no_chunks_visible(&self, _actor: ActorId) -> bool {
        !self.keep_empty_actors
    }
}

impl ChunkParticleReport for ReportCollector {
    fn on_particle_emission(&self, data: &ChunkParticleReportData) {
        self.inner.lock().particles.push(data.clone());
    }
}

impl ImpactDamageReport for ReportCollector {
    fn on_impact_damage_notify(&self, events: &[ImpactDamageEventData]) {
        self.inner.lock().impacts.extend_from_slice(events);
    }
}

impl PhysicsActorReport for ReportCollector {
    fn on_create(&self, actor: ActorHandle, island: IslandId) {
        self.inner.lock().created.push((actor, island));
    }

    fn on_release(&self, actor: ActorHandle) {
        self.inner.lock().released.push(actor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec3;

    #[test]
    fn test_release_defaults_to_true() {
        let callbacks = ModuleCallbacks::default();
        assert!(callbacks.release_on_no_chunks_visible(ActorId(1)));
        let keeper = ModuleCallbacks::all(Arc::new(ReportCollector::keeping_empty_actors()));
        assert!(!keeper.release_on_no_chunks_visible(ActorId(1)));
    }

    #[test]
    fn test_collector_drains() {
        let collector = Arc::new(ReportCollector::new());
        let callbacks = ModuleCallbacks::all(collector.clone());
        if let Some(report) = &callbacks.chunk_report {
            report.on_damage_notify(&DamageEventReport::new(ActorId(2), Vec3::ZERO, Vec3::Z));
            report.on_destructible_wake(&[ActorId(2)]);
        }
        let drained = collector.drain();
        assert_eq!(drained.damage.len(), 1);
        assert_eq!(drained.woken, vec![ActorId(2)]);
        assert!(collector.snapshot().damage.is_empty());
    }
}
