//! Bevy integration
//!
//! Runs one destructible scene over the rapier backend as an app resource.
//! Every `Update` tick steps the scene by the frame delta and forwards damage
//! reports as [`DestructionReportEvent`]s.
//!
//! ```rust,ignore
//! App::new()
//!     .add_plugins(MinimalPlugins)
//!     .insert_resource(DestructionSettings {
//!         gravity: Vec3::new(0.0, -9.81, 0.0),
//!         ..Default::default()
//!     })
//!     .add_plugins(DestructiblePlugin)
//!     .run();
//! ```

use bevy::prelude::*;
use tracing::{error, info};

use crate::config::ModuleConfig;
use crate::fracture::DamageEventReport;
use crate::physics::{shared, RapierPhysics};
use crate::scene::{DestructibleScene, StepStats};

/// Scene setup read once when the plugin is built.
#[derive(Resource, Clone, Debug)]
pub struct DestructionSettings {
    pub config: ModuleConfig,
    pub gravity: Vec3,
    /// Largest step handed to the scene; longer frames are clamped.
    pub max_step: f32,
}

impl Default for DestructionSettings {
    fn default() -> Self {
        Self {
            config: ModuleConfig::default(),
            gravity: Vec3::new(0.0, -9.81, 0.0),
            max_step: 1.0 / 30.0,
        }
    }
}

/// The app's destructible scene.
#[derive(Resource)]
pub struct DestructionWorld {
    pub scene: DestructibleScene<RapierPhysics>,
    pub last_step: StepStats,
}

/// One damage report of the last scene step.
#[derive(Event, Debug, Clone)]
pub struct DestructionReportEvent(pub DamageEventReport);

pub struct DestructiblePlugin;

impl Plugin for DestructiblePlugin {
    fn build(&self, app: &mut App) {
        if !app.world().contains_resource::<DestructionSettings>() {
            app.insert_resource(DestructionSettings::default());
        }
        let settings = app.world().resource::<DestructionSettings>().clone();
        let physics = shared(RapierPhysics::new(settings.gravity));
        match DestructibleScene::new(physics, settings.config) {
            Ok(scene) => {
                info!("destruction world ready");
                app.insert_resource(DestructionWorld {
                    scene,
                    last_step: StepStats::default(),
                });
            }
            Err(e) => error!("invalid destruction settings: {}", e),
        }
        app.add_event::<DestructionReportEvent>()
            .add_systems(Update, step_destruction);
    }
}

fn step_destruction(
    time: Res<Time>,
    settings: Res<DestructionSettings>,
    world: Option<ResMut<DestructionWorld>>,
    mut reports: EventWriter<DestructionReportEvent>,
) {
    let Some(mut world) = world else {
        return;
    };
    let dt = time.delta_secs().min(settings.max_step);
    if dt <= 0.0 {
        return;
    }
    let stats = world.scene.simulate(dt);
    world.last_step = stats;
    for report in world.scene.take_damage_reports() {
        reports.send(DestructionReportEvent(report));
    }
}
