//! Headless destruction harness.
//!
//! Drops a subdivided tower on a floor, hits it a few times and prints every
//! damage report and step summary as JSON lines.
//!
//! Usage: `destruction_harness [config.ron] [steps]`

use std::sync::Arc;

use anyhow::{bail, Context};
use bevy::math::Vec3;
use serde_json::json;
use tracing::info;

use destructible_runtime::logging::init_tracing_default;
use destructible_runtime::math::Bounds3;
use destructible_runtime::physics::{shared, HeadlessPhysics};
use destructible_runtime::{
    AssetBuilder, DestructibleActorDesc, DestructibleScene, ModuleCallbacks, ModuleConfig,
    ReportCollector,
};

const DEFAULT_STEPS: u64 = 120;
const DT: f32 = 1.0 / 60.0;

fn main() -> anyhow::Result<()> {
    init_tracing_default();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => ModuleConfig::load(&path).with_context(|| format!("loading config from {path}"))?,
        None => ModuleConfig::default(),
    };
    let steps = match args.next() {
        Some(n) => n.parse::<u64>().with_context(|| format!("invalid step count {n:?}"))?,
        None => DEFAULT_STEPS,
    };
    if steps == 0 {
        bail!("step count must be positive");
    }

    let physics = shared(HeadlessPhysics::new().with_gravity(Vec3::new(0.0, -9.81, 0.0)));
    let mut scene = DestructibleScene::new(physics, config).context("creating scene")?;
    let collector = Arc::new(ReportCollector::new());
    scene.set_callbacks(ModuleCallbacks::all(collector.clone()));

    scene.add_static_box(Bounds3::new(
        Vec3::new(-20.0, -1.0, -20.0),
        Vec3::new(20.0, 0.0, 20.0),
    ));
    let tower = Arc::new(
        AssetBuilder::subdivided_box("tower", Vec3::new(2.0, 4.0, 2.0), 3)
            .build()
            .context("building tower asset")?,
    );
    let actor = scene.create_actor(tower, &DestructibleActorDesc::at(Vec3::new(0.0, 4.0, 0.0)))?;
    info!(%actor, steps, "harness running");

    for step in 0..steps {
        match step {
            10 => scene.apply_damage(actor, 20.0, 5.0, Vec3::new(0.0, 6.0, -2.0), Vec3::Z, None)?,
            40 => scene.apply_radius_damage(actor, 8.0, 2.0, Vec3::new(1.0, 2.0, 1.0), 1.5, true)?,
            70 => scene.take_impact(actor, Vec3::new(-80.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 0.0), None, None)?,
            _ => {}
        }
        let stats = scene.simulate(DT);
        for report in collector.drain().damage {
            println!("{}", json!({ "frame": stats.frame, "report": report }));
        }
        if stats.fractures_applied > 0 || stats.islands_evicted > 0 || stats.islands_expired > 0 {
            println!("{}", json!({ "stats": stats }));
        }
    }

    let usage = scene.budget_usage();
    println!(
        "{}",
        json!({
            "frames": scene.frame(),
            "islands": scene.structure().island_count(),
            "dynamic_islands": scene.structure().dynamic_island_count(),
            "visible_chunks": scene.actor(actor).map_or(0, |a| a.num_visible_chunks()),
            "budget": usage,
        })
    );
    Ok(())
}
