//! Sync mirroring between two scenes
//!
//! An authoritative scene writes its damage, fracture and transform records
//! through a loopback channel; a mirror scene reads them back:
//! - fractures and damage reproduce the same chunk state
//! - mirrored events are not echoed back out
//! - unknown user ids and broken buffers are reported, not applied
//! - buffers come out in the order they went in

use std::sync::Arc;

use bevy::math::Vec3;
use parking_lot::Mutex;
use proptest::prelude::*;

use destructible_runtime::actor::SyncFlags;
use destructible_runtime::sync::{
    encode, group_segments, read_segments, write_segments, ChunkTransformUnit, DamageEventUnit,
    FractureEventUnit, LoopbackSyncHandler, SyncHandler, SyncUnit,
};
use destructible_runtime::{
    shared, ActorId, AssetBuilder, ChunkIndex, DestructibleActorDesc, DestructibleAsset,
    DestructibleScene, HeadlessPhysics, ModuleCallbacks, ModuleConfig, ReportCollector,
};

const DT: f32 = 1.0 / 60.0;
const USER_ID: u32 = 7;

// ============================================================
// Helpers
// ============================================================

/// Loopback end that also records its read summaries where the test can see them.
struct Observed<U> {
    inner: LoopbackSyncHandler<U>,
    messages: Arc<Mutex<Vec<String>>>,
}

impl<U: SyncUnit> Observed<U> {
    fn new(inner: LoopbackSyncHandler<U>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                messages: messages.clone(),
            },
            messages,
        )
    }
}

impl<U: SyncUnit> SyncHandler<U> for Observed<U> {
    fn on_write_begin(&mut self, size: usize) -> Option<&mut Vec<u8>> {
        self.inner.on_write_begin(size)
    }

    fn on_write_done(&mut self, header_count: u32) {
        self.inner.on_write_done(header_count);
    }

    fn on_read_begin(&mut self) -> Option<Vec<u8>> {
        self.inner.on_read_begin()
    }

    fn on_read_done(&mut self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// Hands out one fixed buffer, then nothing.
struct Canned {
    bytes: Option<Vec<u8>>,
    messages: Arc<Mutex<Vec<String>>>,
}

impl SyncHandler<FractureEventUnit> for Canned {
    fn on_write_begin(&mut self, _size: usize) -> Option<&mut Vec<u8>> {
        None
    }

    fn on_write_done(&mut self, _header_count: u32) {}

    fn on_read_begin(&mut self) -> Option<Vec<u8>> {
        self.bytes.take()
    }

    fn on_read_done(&mut self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// Reads from one channel and writes to another.
struct Duplex<U> {
    read: LoopbackSyncHandler<U>,
    write: LoopbackSyncHandler<U>,
}

impl<U: SyncUnit> SyncHandler<U> for Duplex<U> {
    fn on_write_begin(&mut self, size: usize) -> Option<&mut Vec<u8>> {
        self.write.on_write_begin(size)
    }

    fn on_write_done(&mut self, header_count: u32) {
        self.write.on_write_done(header_count);
    }

    fn on_read_begin(&mut self) -> Option<Vec<u8>> {
        self.read.on_read_begin()
    }

    fn on_read_done(&mut self, message: &str) {
        self.read.on_read_done(message);
    }
}

fn tower() -> Arc<DestructibleAsset> {
    Arc::new(
        AssetBuilder::subdivided_box("tower", Vec3::ONE, 3)
            .build()
            .unwrap(),
    )
}

fn scene() -> (DestructibleScene<HeadlessPhysics>, Arc<ReportCollector>) {
    let scene = DestructibleScene::new(shared(HeadlessPhysics::new()), ModuleConfig::default()).unwrap();
    let collector = Arc::new(ReportCollector::keeping_empty_actors());
    scene.set_callbacks(ModuleCallbacks::all(collector.clone()));
    (scene, collector)
}

fn synced_actor(
    scene: &mut DestructibleScene<HeadlessPhysics>,
    desc: &DestructibleActorDesc,
    user_actor_id: u32,
    flags: SyncFlags,
) -> ActorId {
    let id = scene.create_actor(tower(), desc).unwrap();
    scene.actor_mut(id).unwrap().set_sync_params(user_actor_id, flags);
    id
}

fn visible_set(scene: &DestructibleScene<HeadlessPhysics>, actor: ActorId) -> Vec<ChunkIndex> {
    scene.actor(actor).unwrap().visible_chunks()
}

// ============================================================
// Scene Mirroring
// ============================================================

#[test]
fn fractures_mirror_to_second_scene() {
    let channel = LoopbackSyncHandler::<FractureEventUnit>::new();
    let (mut source, _) = scene();
    let (mut mirror, mirror_reports) = scene();
    source.set_fracture_sync_handler(Some(Box::new(channel.writer())));
    let (reader, messages) = Observed::new(channel.reader());
    mirror.set_fracture_sync_handler(Some(Box::new(reader)));

    let a = synced_actor(&mut source, &DestructibleActorDesc::default(), USER_ID, SyncFlags::FRACTURE);
    let b = synced_actor(&mut mirror, &DestructibleActorDesc::default(), USER_ID, SyncFlags::FRACTURE);
    source.simulate(DT);
    mirror.simulate(DT);
    assert_eq!(channel.queued(), 0);

    source
        .apply_damage(a, 2.0, 0.0, Vec3::ZERO, Vec3::NEG_Y, Some(ChunkIndex(0)))
        .unwrap();
    source.simulate(DT);
    assert_eq!(channel.queued(), 1);

    mirror.simulate(DT);
    assert_eq!(channel.queued(), 0);
    assert_eq!(visible_set(&mirror, b), visible_set(&source, a));
    assert!(!visible_set(&mirror, b).contains(&ChunkIndex(0)));

    let messages = messages.lock();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("applied 1 records"));

    // Received fractures change state without opening a damage report.
    assert!(mirror_reports.drain().damage.is_empty());
}

#[test]
fn damage_mirrors_and_is_not_echoed() {
    let inbound = LoopbackSyncHandler::<DamageEventUnit>::new();
    let outbound = LoopbackSyncHandler::<DamageEventUnit>::new();
    let (mut source, _) = scene();
    let (mut mirror, _) = scene();
    source.set_damage_sync_handler(Some(Box::new(inbound.writer())));
    mirror.set_damage_sync_handler(Some(Box::new(Duplex {
        read: inbound.reader(),
        write: outbound.writer(),
    })));

    let a = synced_actor(&mut source, &DestructibleActorDesc::default(), USER_ID, SyncFlags::DAMAGE);
    let b = synced_actor(&mut mirror, &DestructibleActorDesc::default(), USER_ID, SyncFlags::DAMAGE);
    source.simulate(DT);
    mirror.simulate(DT);

    source
        .apply_damage(a, 2.0, 0.0, Vec3::ZERO, Vec3::NEG_Y, Some(ChunkIndex(0)))
        .unwrap();
    source.simulate(DT);
    assert_eq!(inbound.queued(), 1);

    mirror.simulate(DT);
    assert_eq!(inbound.queued(), 0);
    assert_eq!(visible_set(&mirror, b), visible_set(&source, a));
    assert_eq!(outbound.queued(), 0);
}

#[test]
fn unknown_user_id_is_skipped() {
    let channel = LoopbackSyncHandler::<FractureEventUnit>::new();
    let (mut source, _) = scene();
    let (mut mirror, _) = scene();
    source.set_fracture_sync_handler(Some(Box::new(channel.writer())));
    let (reader, messages) = Observed::new(channel.reader());
    mirror.set_fracture_sync_handler(Some(Box::new(reader)));

    let a = synced_actor(&mut source, &DestructibleActorDesc::default(), USER_ID, SyncFlags::FRACTURE);
    let b = synced_actor(&mut mirror, &DestructibleActorDesc::default(), USER_ID + 1, SyncFlags::FRACTURE);
    source.simulate(DT);
    mirror.simulate(DT);

    source
        .apply_damage(a, 2.0, 0.0, Vec3::ZERO, Vec3::NEG_Y, Some(ChunkIndex(0)))
        .unwrap();
    source.simulate(DT);
    mirror.simulate(DT);

    assert_eq!(visible_set(&mirror, b), vec![ChunkIndex(0)]);
    let messages = messages.lock();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("skipped 1"));
}

#[test]
fn transforms_snap_mirror_islands() {
    let channel = LoopbackSyncHandler::<ChunkTransformUnit>::new();
    let mut source =
        DestructibleScene::new(
            shared(HeadlessPhysics::new().with_gravity(Vec3::new(0.0, -9.81, 0.0))),
            ModuleConfig::default(),
        )
        .unwrap();
    let (mut mirror, _) = scene();
    source.set_transform_sync_handler(Some(Box::new(channel.writer())));
    mirror.set_transform_sync_handler(Some(Box::new(channel.reader())));

    let dynamic = DestructibleActorDesc {
        dynamic: true,
        ..Default::default()
    };
    let a = synced_actor(&mut source, &dynamic, USER_ID, SyncFlags::TRANSFORM);
    let b = synced_actor(&mut mirror, &dynamic, USER_ID, SyncFlags::empty());
    for _ in 0..5 {
        source.simulate(DT);
    }
    let fallen = source.actor(a).unwrap().chunk_pose(ChunkIndex(0)).unwrap().position;
    assert!(fallen.y < 0.0);

    for _ in 0..5 {
        mirror.simulate(DT);
    }
    let snapped = mirror.actor(b).unwrap().chunk_pose(ChunkIndex(0)).unwrap().position;
    assert!(snapped.distance(fallen) < 1e-4, "{snapped:?} vs {fallen:?}");
}

#[test]
fn truncated_buffer_is_rejected() {
    let unit = FractureEventUnit {
        chunk_index: 0,
        fracture_event_flags: 0,
        position: [0.0; 3],
        direction: [0.0, -1.0, 0.0],
        impulse: [0.0; 3],
    };
    let mut bytes = encode(&group_segments(vec![(USER_ID, unit)])).unwrap();
    bytes.truncate(bytes.len() - 3);

    let (mut mirror, _) = scene();
    let messages = Arc::new(Mutex::new(Vec::new()));
    mirror.set_fracture_sync_handler(Some(Box::new(Canned {
        bytes: Some(bytes),
        messages: messages.clone(),
    })));
    let b = synced_actor(&mut mirror, &DestructibleActorDesc::default(), USER_ID, SyncFlags::FRACTURE);
    mirror.simulate(DT);

    assert_eq!(visible_set(&mirror, b), vec![ChunkIndex(0)]);
    let messages = messages.lock();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("rejected:"), "{}", messages[0]);
}

// ============================================================
// Loopback Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_loopback_preserves_buffer_order(
        buffers in prop::collection::vec(
            prop::collection::vec((1u32..4, 0u32..64), 1..6),
            1..5,
        ),
    ) {
        let channel = LoopbackSyncHandler::<FractureEventUnit>::new();
        let mut writer = channel.writer();
        let mut reader = channel.reader();
        for records in &buffers {
            let segments = group_segments(records.iter().map(|&(user, chunk)| {
                (user, FractureEventUnit {
                    chunk_index: chunk,
                    fracture_event_flags: 0,
                    position: [0.0; 3],
                    direction: [0.0; 3],
                    impulse: [0.0; 3],
                })
            }));
            prop_assert!(write_segments(&mut writer, &segments).unwrap());
        }
        prop_assert_eq!(channel.queued(), buffers.len());

        for records in &buffers {
            let segments = read_segments(&mut reader).unwrap().unwrap();
            let mut read: Vec<(u32, u32)> = segments
                .iter()
                .flat_map(|s| s.units.iter().map(move |u| (s.user_actor_id, u.chunk_index)))
                .collect();
            let mut expected = records.clone();
            read.sort_unstable();
            expected.sort_unstable();
            prop_assert_eq!(read, expected);
        }
        prop_assert!(read_segments(&mut reader).unwrap().is_none());
    }
}
