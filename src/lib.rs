//! Destructible Runtime
//!
//! Runtime for breakable structures built from a hierarchy of chunks:
//! - Assets (chunk hierarchy, behavior groups, neighbor graph)
//! - Actors (placed instances with per-chunk state and LOD)
//! - Support structure (islands, world support, extended structures)
//! - Fracture pipeline (damage spread, fracture budget, reports)
//! - Actor budgets (island/chunk caps, debris lifetime and separation)
//! - Joints that follow the chunks they connect
//! - Sync buffers for mirroring damage, fractures and transforms
//! - Physics backends (headless and rapier) and a Bevy plugin

pub mod actor;
pub mod asset;
pub mod budget;
pub mod callbacks;
pub mod chunk;
pub mod config;
pub mod error;
pub mod fracture;
pub mod joint;
pub mod logging;
pub mod math;
pub mod module;
pub mod physics;
pub mod plugin;
pub mod scene;
pub mod structure;
pub mod sync;

pub use actor::{ActorId, DestructibleActor, DestructibleActorDesc, PhysicsActorQueryFlags};
pub use asset::{AssetBuilder, DestructibleAsset};
pub use callbacks::{ModuleCallbacks, ReportCollector};
pub use chunk::ChunkIndex;
pub use config::{ChunkStateEventSchedule, ModuleConfig};
pub use error::{DestructibleError, Result};
pub use fracture::{DamageEventReport, ReportChunkFlags};
pub use module::{DestructibleModule, SceneId};
pub use physics::{shared, HeadlessPhysics, PhysicsBackend, RapierPhysics};
pub use scene::{DestructibleScene, StepStats};
