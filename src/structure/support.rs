//! External support tests.

use crate::actor::DestructibleActor;
use crate::asset::{AssetChunkFlags, DestructibleAsset, ParameterFlags};
use crate::chunk::{ChunkFlags, ChunkIndex};
use crate::math::Pose;
use crate::physics::StaticQuery;

/// The chunk or one of its ancestors is flagged `SUPPORT` in the asset.
fn asset_flagged(asset: &DestructibleAsset, chunk: ChunkIndex) -> bool {
    let mut current = asset.chunk(chunk);
    while let Some(desc) = current {
        if desc.flags.contains(AssetChunkFlags::SUPPORT) {
            return true;
        }
        current = desc.parent.and_then(|p| asset.chunk(p));
    }
    false
}

fn flags_at(
    actor: &DestructibleActor,
    chunk: ChunkIndex,
    pose: &Pose,
    statics: &dyn StaticQuery,
) -> ChunkFlags {
    let params = actor.parameters();
    let mut flags = ChunkFlags::empty();
    if params.has(ParameterFlags::ASSET_DEFINED_SUPPORT) && asset_flagged(actor.asset(), chunk) {
        flags |= ChunkFlags::EXTERNALLY_SUPPORTED;
    }
    if params.has(ParameterFlags::WORLD_SUPPORT) {
        if let Some(hull) = actor.scaled_hull(chunk) {
            let bounds = hull.transformed(pose).inflated(params.support_padding);
            if statics.overlaps_static(&bounds) {
                flags |= ChunkFlags::EXTERNALLY_SUPPORTED | ChunkFlags::WORLD_SUPPORTED;
            }
        }
    }
    flags
}

/// Support flags for `chunk` placed at `pose`.
///
/// Chunks at or below the support depth are tested directly. Shallower chunks
/// are supported when any of their support-depth descendants would be.
pub(crate) fn support_flags(
    actor: &DestructibleActor,
    chunk: ChunkIndex,
    pose: &Pose,
    statics: &dyn StaticQuery,
) -> ChunkFlags {
    let Some(desc) = actor.descriptor(chunk) else {
        return ChunkFlags::empty();
    };
    let support_depth = actor.support_depth();
    if desc.depth >= support_depth {
        return flags_at(actor, chunk, pose, statics);
    }
    let asset = actor.asset();
    asset
        .support_depth_chunks(support_depth)
        .into_iter()
        .filter(|&c| c == chunk || asset.is_ancestor(chunk, c))
        .fold(ChunkFlags::empty(), |acc, c| acc | flags_at(actor, c, pose, statics))
}
