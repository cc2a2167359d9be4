//! Property-based tests using proptest
//!
//! Invariants that must hold after every step, for any damage sequence:
//! - Partition: each visible chunk is in exactly one connected island
//! - Hierarchy: visible chunks form an antichain (no chunk with a visible ancestor)
//! - Idempotence: `chunk_intact` is stable without intervening steps
//! - Budget: the dynamic island cap holds and evictions match the overflow

use std::sync::Arc;

use bevy::math::Vec3;
use proptest::prelude::*;

use destructible_runtime::math::Bounds3;
use destructible_runtime::{
    shared, AssetBuilder, ChunkIndex, DestructibleActorDesc, DestructibleAsset, DestructibleScene,
    HeadlessPhysics, ModuleCallbacks, ModuleConfig, ReportCollector,
};

const DT: f32 = 1.0 / 60.0;

fn tower() -> Arc<DestructibleAsset> {
    Arc::new(
        AssetBuilder::subdivided_box("tower", Vec3::new(1.0, 2.0, 1.0), 3)
            .build()
            .unwrap(),
    )
}

#[derive(Debug, Clone)]
enum Hit {
    Point { chunk: u32, damage: f32 },
    Radius { x: f32, z: f32, damage: f32, radius: f32 },
}

fn hit_strategy() -> impl Strategy<Value = Hit> {
    prop_oneof![
        (0u32..21, 0.0f32..5.0).prop_map(|(chunk, damage)| Hit::Point { chunk, damage }),
        (-1.5f32..1.5, -1.5f32..1.5, 0.0f32..8.0, 0.0f32..2.0)
            .prop_map(|(x, z, damage, radius)| Hit::Radius { x, z, damage, radius }),
    ]
}

fn assert_invariants(scene: &DestructibleScene<HeadlessPhysics>) -> Result<(), TestCaseError> {
    let violations = scene.structure().partition_violations(scene.actors());
    prop_assert!(violations.is_empty(), "partition violated: {:?}", violations);
    for actor in scene.actors().iter() {
        let asset = actor.asset();
        let visible = actor.visible_chunks();
        for &a in &visible {
            for &b in &visible {
                prop_assert!(
                    !asset.is_ancestor(a, b) || a == b,
                    "{} and its descendant {} are both visible",
                    a,
                    b
                );
            }
        }
        for desc in asset.chunks() {
            if let Some(parent) = desc.parent {
                let parent_depth = asset.chunk(parent).map(|p| p.depth);
                prop_assert_eq!(parent_depth, Some(desc.depth - 1));
            }
        }
    }
    Ok(())
}

// ============================================================
// Structure Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_damage_keeps_partition_and_antichain(
        hits in prop::collection::vec(hit_strategy(), 1..12),
        floor in any::<bool>(),
        offset in 0u16..=2,
    ) {
        let config = ModuleConfig { max_chunk_depth_offset: offset, ..Default::default() };
        let mut scene = DestructibleScene::new(shared(HeadlessPhysics::new()), config).unwrap();
        scene.set_callbacks(ModuleCallbacks::all(Arc::new(ReportCollector::keeping_empty_actors())));
        if floor {
            scene.add_static_box(Bounds3::new(Vec3::new(-5.0, -3.0, -5.0), Vec3::new(5.0, -2.0, 5.0)));
        }
        let actor = scene.create_actor(tower(), &DestructibleActorDesc::default()).unwrap();
        scene.simulate(DT);
        assert_invariants(&scene)?;

        for hit in hits {
            match hit {
                Hit::Point { chunk, damage } => {
                    let position = scene
                        .actor(actor)
                        .and_then(|a| a.chunk_centroid(ChunkIndex(chunk)))
                        .unwrap_or(Vec3::ZERO);
                    scene
                        .apply_damage(actor, damage, 0.0, position, Vec3::NEG_Y, Some(ChunkIndex(chunk)))
                        .unwrap();
                }
                Hit::Radius { x, z, damage, radius } => {
                    scene
                        .apply_radius_damage(actor, damage, 0.0, Vec3::new(x, 0.0, z), radius, true)
                        .unwrap();
                }
            }
            scene.simulate(DT);
            assert_invariants(&scene)?;
        }
    }

    #[test]
    fn prop_chunk_intact_is_idempotent(
        chunks in prop::collection::vec(0u32..21, 1..8),
        damage in 1.0f32..4.0,
    ) {
        let mut scene = DestructibleScene::new(shared(HeadlessPhysics::new()), ModuleConfig::default()).unwrap();
        let actor = scene.create_actor(tower(), &DestructibleActorDesc::default()).unwrap();
        scene.simulate(DT);
        scene.apply_damage(actor, damage, 0.0, Vec3::ZERO, Vec3::NEG_Y, Some(ChunkIndex(0))).unwrap();
        scene.simulate(DT);
        for chunk in chunks {
            let first = scene.chunk_intact(actor, ChunkIndex(chunk));
            let second = scene.chunk_intact(actor, ChunkIndex(chunk));
            prop_assert_eq!(first, second);
        }
    }
}

// ============================================================
// Budget Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_island_cap_holds(
        cap in 1u32..5,
        existing in 0usize..4,
        incoming in 0usize..6,
    ) {
        let config = ModuleConfig { max_dynamic_chunk_island_count: cap, ..Default::default() };
        let mut scene = DestructibleScene::new(shared(HeadlessPhysics::new()), config).unwrap();
        let asset = tower();
        let mut x = 0.0;
        let mut spawn = |scene: &mut DestructibleScene<HeadlessPhysics>| {
            let desc = DestructibleActorDesc {
                dynamic: true,
                ..DestructibleActorDesc::at(Vec3::new(x, 0.0, 0.0))
            };
            x += 5.0;
            scene.create_actor(asset.clone(), &desc).unwrap();
        };

        for _ in 0..existing {
            spawn(&mut scene);
        }
        scene.simulate(DT);
        let before = scene.structure().dynamic_island_count();
        prop_assert!(before <= cap as usize);

        for _ in 0..incoming {
            spawn(&mut scene);
        }
        let stats = scene.simulate(DT);
        let after = scene.structure().dynamic_island_count();
        prop_assert!(after <= cap as usize);

        let room = (cap as usize).saturating_sub(before);
        prop_assert_eq!(stats.islands_evicted, incoming.saturating_sub(room));
    }
}
