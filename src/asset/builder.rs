//! In-process asset baking.

use bevy::math::Vec3;

use super::{
    AssetChunkFlags, BehaviorGroup, ChunkDescriptor, DestructibleAsset, DestructibleParameters,
};
use crate::chunk::ChunkIndex;
use crate::error::{DestructibleError, Result};
use crate::math::Bounds3;

/// Builder-local chunk handle. Final indices are assigned breadth-first by `build`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    hull: Bounds3,
    flags: AssetChunkFlags,
    behavior_group: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct AssetBuilder {
    name: String,
    nodes: Vec<Node>,
    default_behavior_group: BehaviorGroup,
    behavior_groups: Vec<BehaviorGroup>,
    parameters: DestructibleParameters,
    neighbor_padding: f32,
}

impl AssetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            default_behavior_group: BehaviorGroup::default(),
            behavior_groups: Vec::new(),
            parameters: DestructibleParameters::default(),
            neighbor_padding: 0.001,
        }
    }

    /// A box split into 2x2 quadrants (x/z) per level, `depth_count` levels deep.
    /// Three levels give 1 + 4 + 16 chunks.
    pub fn subdivided_box(name: &str, half_extents: Vec3, depth_count: u16) -> Self {
        let mut builder = Self::new(name);
        let root = builder.add_chunk(None, Bounds3::from_center_extents(Vec3::ZERO, half_extents));
        let mut frontier = vec![root];
        for _ in 1..depth_count {
            let mut next = Vec::with_capacity(frontier.len() * 4);
            for node in frontier {
                let hull = builder.nodes[node.0].hull;
                let center = hull.center();
                let half = hull.half_extents();
                let quarter = Vec3::new(half.x * 0.5, half.y, half.z * 0.5);
                for (sx, sz) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
                    let c = center + Vec3::new(sx * quarter.x, 0.0, sz * quarter.z);
                    next.push(builder.add_chunk(Some(node), Bounds3::from_center_extents(c, quarter)));
                }
            }
            frontier = next;
        }
        builder
    }

    pub fn add_chunk(&mut self, parent: Option<NodeId>, hull: Bounds3) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            hull,
            flags: AssetChunkFlags::empty(),
            behavior_group: None,
        });
        if let Some(p) = parent {
            if let Some(node) = self.nodes.get_mut(p.0) {
                node.children.push(id);
            }
        }
        id
    }

    pub fn set_flags(&mut self, node: NodeId, flags: AssetChunkFlags) -> &mut Self {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.flags = flags;
        }
        self
    }

    /// Adds `flags` to every chunk whose hull satisfies `pred`.
    pub fn flag_where(&mut self, flags: AssetChunkFlags, pred: impl Fn(&Bounds3) -> bool) -> &mut Self {
        for node in &mut self.nodes {
            if pred(&node.hull) {
                node.flags |= flags;
            }
        }
        self
    }

    pub fn set_behavior_group(&mut self, node: NodeId, group: u16) -> &mut Self {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.behavior_group = Some(group);
        }
        self
    }

    /// Registers a custom behavior group and returns its index.
    pub fn add_behavior_group(&mut self, group: BehaviorGroup) -> Result<u16> {
        let index = u16::try_from(self.behavior_groups.len()).map_err(|_| {
            DestructibleError::InvalidAsset(format!(
                "more than {} behavior groups",
                u32::from(u16::MAX) + 1
            ))
        })?;
        self.behavior_groups.push(group);
        Ok(index)
    }

    pub fn default_behavior_group(mut self, group: BehaviorGroup) -> Self {
        self.default_behavior_group = group;
        self
    }

    pub fn parameters(mut self, parameters: DestructibleParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameters_mut(&mut self) -> &mut DestructibleParameters {
        &mut self.parameters
    }

    pub fn neighbor_padding(mut self, padding: f32) -> Self {
        self.neighbor_padding = padding;
        self
    }

    /// Flattens the forest breadth-first and computes neighbor pairs.
    pub fn build(&self) -> Result<DestructibleAsset> {
        if self.nodes.is_empty() {
            return Err(DestructibleError::InvalidAsset("asset has no chunks".to_string()));
        }

        // Breadth-first over all roots keeps every sibling range contiguous.
        let mut order: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        let mut depths: Vec<u16> = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if node.parent.is_none() {
                order.push(NodeId(i));
                depths.push(0);
            }
        }
        let mut cursor = 0;
        while cursor < order.len() {
            let id = order[cursor];
            let depth = depths[cursor];
            for &child in &self.nodes[id.0].children {
                order.push(child);
                depths.push(depth + 1);
            }
            cursor += 1;
        }
        if order.len() != self.nodes.len() {
            return Err(DestructibleError::InvalidAsset(
                "chunk graph contains unreachable or cyclic nodes".to_string(),
            ));
        }

        let mut remap = vec![ChunkIndex(0); self.nodes.len()];
        for (new_index, id) in order.iter().enumerate() {
            remap[id.0] = ChunkIndex(new_index as u32);
        }

        let mut chunks = Vec::with_capacity(order.len());
        for (new_index, id) in order.iter().enumerate() {
            let node = &self.nodes[id.0];
            let first_child = node.children.first().map(|c| remap[c.0]);
            let half = node.hull.half_extents();
            chunks.push(ChunkDescriptor {
                index: ChunkIndex(new_index as u32),
                depth: depths[new_index],
                parent: node.parent.map(|p| remap[p.0]),
                first_child,
                num_children: node.children.len() as u16,
                hull: node.hull,
                sphere_center: node.hull.center(),
                sphere_radius: half.length(),
                flags: node.flags,
                behavior_group: node.behavior_group,
            });
        }

        let neighbors = compute_neighbors(&chunks, self.neighbor_padding);
        DestructibleAsset::from_parts(
            self.name.clone(),
            chunks,
            self.default_behavior_group.clone(),
            self.behavior_groups.clone(),
            neighbors,
            self.parameters.clone(),
        )
    }
}

fn lineage(chunks: &[ChunkDescriptor], a: ChunkIndex, b: ChunkIndex) -> bool {
    let up = |from: ChunkIndex, target: ChunkIndex| {
        let mut current = chunks[from.as_usize()].parent;
        while let Some(p) = current {
            if p == target {
                return true;
            }
            current = chunks[p.as_usize()].parent;
        }
        false
    };
    up(a, b) || up(b, a)
}

/// Sort-and-sweep along x over padded hulls.
fn compute_neighbors(chunks: &[ChunkDescriptor], padding: f32) -> Vec<(ChunkIndex, ChunkIndex)> {
    let padded: Vec<Bounds3> = chunks.iter().map(|c| c.hull.inflated(padding)).collect();
    let mut sorted: Vec<usize> = (0..chunks.len()).collect();
    sorted.sort_by(|&a, &b| padded[a].min.x.total_cmp(&padded[b].min.x));

    let mut pairs = Vec::new();
    let mut active: Vec<usize> = Vec::new();
    for &i in &sorted {
        active.retain(|&j| padded[j].max.x >= padded[i].min.x);
        for &j in &active {
            if padded[i].intersects(&padded[j]) {
                let (a, b) = (chunks[i].index, chunks[j].index);
                if !lineage(chunks, a, b) {
                    pairs.push(if a < b { (a, b) } else { (b, a) });
                }
            }
        }
        active.push(i);
    }
    pairs.sort();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_empty() {
        assert!(AssetBuilder::new("empty").build().is_err());
    }

    #[test]
    fn test_behavior_group_indices_stop_at_u16_range() {
        let mut b = AssetBuilder::new("groups");
        for expected in 0..=u16::MAX {
            assert_eq!(b.add_behavior_group(BehaviorGroup::default()).unwrap(), expected);
        }
        assert!(matches!(
            b.add_behavior_group(BehaviorGroup::default()),
            Err(DestructibleError::InvalidAsset(_))
        ));
        assert_eq!(b.behavior_groups.len(), usize::from(u16::MAX) + 1);
    }

    #[test]
    fn test_manual_tree_breadth_first() {
        let mut b = AssetBuilder::new("slab");
        let root = b.add_chunk(None, Bounds3::from_center_extents(Vec3::ZERO, Vec3::ONE));
        let left = b.add_chunk(
            Some(root),
            Bounds3::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(0.0, 1.0, 1.0)),
        );
        let _leaf = b.add_chunk(
            Some(left),
            Bounds3::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(-0.5, 1.0, 1.0)),
        );
        let _right = b.add_chunk(
            Some(root),
            Bounds3::new(Vec3::new(0.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0)),
        );
        let asset = b.build().unwrap();
        // root, left, right, leaf
        assert_eq!(asset.chunk(ChunkIndex(1)).unwrap().depth, 1);
        assert_eq!(asset.chunk(ChunkIndex(2)).unwrap().depth, 1);
        assert_eq!(asset.chunk(ChunkIndex(3)).unwrap().parent, Some(ChunkIndex(1)));
        assert!(asset.neighbors().contains(&(ChunkIndex(1), ChunkIndex(2))));
        // The leaf touches the right half only through its parent's face, not directly.
        assert!(!asset.neighbors().contains(&(ChunkIndex(2), ChunkIndex(3))));
    }

    #[test]
    fn test_flag_where_marks_bottom_row() {
        let mut b = AssetBuilder::subdivided_box("wall", Vec3::ONE, 2);
        b.flag_where(AssetChunkFlags::SUPPORT, |hull| hull.min.y <= -1.0 + 1.0e-4);
        let asset = b.build().unwrap();
        assert!(asset
            .chunks()
            .iter()
            .all(|c| c.flags.contains(AssetChunkFlags::SUPPORT)));
    }
}
