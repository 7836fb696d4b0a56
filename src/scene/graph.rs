// scene/graph.rs

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use crate::renderer::batch::{DrawParams, IndirectWriter, InstanceWriter, SkinCursor};
use crate::scene::frustum::Visibility;
use crate::scene::node::{Node, NodeId, RenderType};
use crate::time::FrameInfo;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeEntry {
    pub id: NodeId,
    pub distance_sq: f32,
}

/// Nodes visible from one viewpoint, split by how they are rendered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeLists {
    /// Traversal order.
    pub lit: Vec<NodeEntry>,
    /// Front to back.
    pub opaque: Vec<NodeEntry>,
    /// Back to front.
    pub transparent: Vec<NodeEntry>,
}

impl NodeLists {
    pub fn len(&self) -> usize {
        self.lit.len() + self.opaque.len() + self.transparent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hierarchy of render nodes stored in an arena.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, node: Node) -> NodeId {
        let id = self.insert(node, None);
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.insert(node, Some(parent));
        self.nodes[parent.0].children.push(id);
        self.propagate_from(id);
        id
    }

    fn insert(&mut self, mut node: Node, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = parent;
        node.children.clear();
        self.nodes.push(node);
        id
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first pre-order over every root.
    pub fn traversal(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            self.collect_subtree(*root, &mut order);
        }
        order
    }

    fn collect_subtree(&self, id: NodeId, order: &mut Vec<NodeId>) {
        order.push(id);
        for child in &self.nodes[id.0].children {
            self.collect_subtree(*child, order);
        }
    }

    pub fn set_transform(&mut self, id: NodeId, local: Mat4) {
        self.nodes[id.0].local = local;
        self.propagate_from(id);
    }

    fn propagate_from(&mut self, id: NodeId) {
        let parent_world = self.nodes[id.0]
            .parent
            .map(|parent| self.nodes[parent.0].world)
            .unwrap_or(Mat4::IDENTITY);
        let mut subtree = Vec::new();
        self.collect_subtree(id, &mut subtree);

        let node = &mut self.nodes[id.0];
        node.world = parent_world * node.local;
        for child in subtree.into_iter().skip(1) {
            let parent = self.nodes[child.0].parent.map(|p| self.nodes[p.0].world);
            let node = &mut self.nodes[child.0];
            node.world = parent.unwrap_or(Mat4::IDENTITY) * node.local;
        }
    }

    /// Advances animations and recomputes world transforms.
    pub fn update(&mut self, frame: &FrameInfo) {
        for node in &mut self.nodes {
            node.update(frame.frame_delta);
        }
        for root in self.roots.clone() {
            self.propagate_from(root);
        }
    }

    /// Sum of every node's worst-case draw contribution below `root`.
    pub fn subtree_draw_params(&self, root: NodeId) -> DrawParams {
        let mut subtree = Vec::new();
        self.collect_subtree(root, &mut subtree);
        subtree
            .iter()
            .map(|id| self.nodes[id.0].batch_draw_params())
            .sum()
    }

    pub fn batch_draw_params(&self) -> DrawParams {
        self.roots
            .iter()
            .map(|root| self.subtree_draw_params(*root))
            .sum()
    }

    pub fn skin_vertices(&mut self, cursor: &mut SkinCursor) {
        for id in self.traversal() {
            self.nodes[id.0].skin_vertices(cursor);
        }
    }

    pub fn write_instance_data(&mut self, writer: &mut InstanceWriter<'_>) {
        for id in self.traversal() {
            self.nodes[id.0].write_instance_data(writer);
        }
    }

    pub fn write_batched_draws(&self, entries: &[NodeEntry], writer: &mut IndirectWriter<'_>) {
        for entry in entries {
            self.nodes[entry.id.0].write_batched_draws(writer);
        }
    }

    pub fn build_node_lists(&self, visibility: &Visibility, eye: Vec3) -> NodeLists {
        let order = self.traversal();
        let visible: Vec<Option<(NodeEntry, RenderType)>> = order
            .par_iter()
            .map(|id| {
                let node = &self.nodes[id.0];
                let center = node.world_center();
                if !visibility.intersects_sphere(center, node.world_radius()) {
                    return None;
                }
                let entry = NodeEntry {
                    id: *id,
                    distance_sq: center.distance_squared(eye),
                };
                Some((entry, node.render_type))
            })
            .collect();

        let mut lists = NodeLists::default();
        for (entry, render_type) in visible.into_iter().flatten() {
            match render_type {
                RenderType::Lit => lists.lit.push(entry),
                RenderType::Opaque => lists.opaque.push(entry),
                RenderType::Transparent => lists.transparent.push(entry),
            }
        }
        lists
            .opaque
            .sort_by(|a, b| a.distance_sq.total_cmp(&b.distance_sq));
        lists
            .transparent
            .sort_by(|a, b| b.distance_sq.total_cmp(&a.distance_sq));
        lists
    }

    /// Writes the batched draws of every shadow caster touching `visibility`.
    pub fn render_depth_only(&self, visibility: &Visibility, writer: &mut IndirectWriter<'_>) {
        for id in self.traversal() {
            let node = &self.nodes[id.0];
            if node.casts_shadows
                && node.is_batched()
                && visibility.intersects_sphere(node.world_center(), node.world_radius())
            {
                node.write_batched_draws(writer);
            }
        }
    }
}
