// scene/node.rs

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::renderer::batch::{BatchSlot, DrawParams, IndirectWriter, InstanceWriter, SkinCursor};
use crate::renderer::geometry::SkinnedMesh;
use crate::renderer::layout::DrawIndexedIndirect;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderType {
    /// Writes the G-buffer and is shaded by the deferred lights.
    Lit,
    Opaque,
    Transparent,
}

/// An animated instance of a skinned mesh.
#[derive(Clone, Debug)]
pub struct MeshNode {
    mesh: Arc<SkinnedMesh>,
    current_frame: u32,
    frame_time: f32,
    slot: Option<BatchSlot>,
}

impl MeshNode {
    pub fn new(mesh: Arc<SkinnedMesh>) -> Self {
        Self {
            mesh,
            current_frame: 0,
            frame_time: 0.0,
            slot: None,
        }
    }

    pub fn mesh(&self) -> &Arc<SkinnedMesh> {
        &self.mesh
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn frame_time(&self) -> f32 {
        self.frame_time
    }

    pub fn frame_count(&self) -> u32 {
        self.mesh.frame_count
    }

    /// Jumps to `frame` and restarts its timer. Out-of-range requests are ignored.
    pub fn set_frame(&mut self, frame: i32) {
        if frame < 0 || frame as u32 >= self.mesh.frame_count {
            log::warn!(
                "Ignoring frame {} for mesh '{}' with {} frames",
                frame,
                self.mesh.name,
                self.mesh.frame_count
            );
            return;
        }
        self.current_frame = frame as u32;
        self.frame_time = 0.0;
    }

    pub fn update(&mut self, dt: f32) {
        if self.mesh.frame_count == 0 {
            return;
        }
        if self.mesh.frame_rate <= 0.0 {
            log::warn!("Mesh '{}' has no frame rate, animation paused", self.mesh.name);
            return;
        }
        let frame_duration = 1.0 / self.mesh.frame_rate;
        self.frame_time -= dt;
        while self.frame_time < 0.0 {
            self.frame_time += frame_duration;
            self.current_frame = (self.current_frame + 1) % self.mesh.frame_count;
        }
    }

    pub fn batch_draw_params(&self) -> DrawParams {
        let submeshes = self.mesh.submeshes.len() as u32;
        DrawParams::new(self.mesh.vertex_count, submeshes, submeshes)
    }

    pub fn slot(&self) -> Option<BatchSlot> {
        self.slot
    }

    pub fn skin_vertices(&mut self, cursor: &mut SkinCursor) {
        let vertex_base = cursor.reserve(&self.mesh, self.current_frame);
        let instance_base = self.slot.map(|slot| slot.instance_base).unwrap_or(0);
        self.slot = Some(BatchSlot {
            vertex_base,
            instance_base,
        });
    }

    /// One instance record per submesh, all sharing `world`.
    pub fn write_instance_data(&mut self, world: Mat4, writer: &mut InstanceWriter<'_>) {
        let instance_base = writer.cursor();
        for submesh in &self.mesh.submeshes {
            writer.push(world, submesh.textures);
        }
        let vertex_base = self.slot.map(|slot| slot.vertex_base).unwrap_or(0);
        self.slot = Some(BatchSlot {
            vertex_base,
            instance_base,
        });
    }

    pub fn write_batched_draws(&self, writer: &mut IndirectWriter<'_>) {
        let Some(slot) = self.slot else {
            return;
        };
        for (i, submesh) in self.mesh.submeshes.iter().enumerate() {
            writer.push(DrawIndexedIndirect {
                index_count: submesh.index_count,
                instance_count: 1,
                first_index: self.mesh.first_index + submesh.first_index,
                base_vertex: slot.vertex_base as i32,
                first_instance: slot.instance_base + i as u32,
            });
        }
    }
}

/// Chunked terrain grid displaced by a height texture.
#[derive(Clone, Debug, PartialEq)]
pub struct HeightmapNode {
    /// Index of the terrain resources owned by the renderer.
    pub terrain: usize,
    pub size: f32,
    pub height_scale: f32,
    pub chunks: u32,
    pub chunk_resolution: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaterNode {
    pub size: f32,
    pub y_level: f32,
    pub uv_scale: f32,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Group,
    Mesh(MeshNode),
    Heightmap(HeightmapNode),
    Water(WaterNode),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub local: Mat4,
    pub bounding_radius: f32,
    pub render_type: RenderType,
    pub casts_shadows: bool,
    pub kind: NodeKind,
    pub(crate) world: Mat4,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        let (render_type, casts_shadows) = match kind {
            NodeKind::Mesh(_) => (RenderType::Lit, true),
            NodeKind::Heightmap(_) | NodeKind::Water(_) => (RenderType::Lit, false),
            NodeKind::Group => (RenderType::Opaque, false),
        };
        Self {
            name: name.into(),
            local: Mat4::IDENTITY,
            bounding_radius: 0.0,
            render_type,
            casts_shadows,
            kind,
            world: Mat4::IDENTITY,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, local: Mat4) -> Self {
        self.local = local;
        self.world = local;
        self
    }

    pub fn with_bounding_radius(mut self, radius: f32) -> Self {
        self.bounding_radius = radius;
        self
    }

    pub fn with_render_type(mut self, render_type: RenderType) -> Self {
        self.render_type = render_type;
        self
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn world_center(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    /// Bounding radius scaled by the largest world axis scale.
    pub fn world_radius(&self) -> f32 {
        let scale = self
            .world
            .x_axis
            .truncate()
            .length()
            .max(self.world.y_axis.truncate().length())
            .max(self.world.z_axis.truncate().length());
        self.bounding_radius * scale
    }

    pub fn as_mesh(&self) -> Option<&MeshNode> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn as_mesh_mut(&mut self) -> Option<&mut MeshNode> {
        match &mut self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn update(&mut self, dt: f32) {
        if let NodeKind::Mesh(mesh) = &mut self.kind {
            mesh.update(dt);
        }
    }

    pub fn batch_draw_params(&self) -> DrawParams {
        match &self.kind {
            NodeKind::Mesh(mesh) => mesh.batch_draw_params(),
            NodeKind::Group | NodeKind::Heightmap(_) | NodeKind::Water(_) => DrawParams::ZERO,
        }
    }

    pub fn skin_vertices(&mut self, cursor: &mut SkinCursor) {
        if let NodeKind::Mesh(mesh) = &mut self.kind {
            mesh.skin_vertices(cursor);
        }
    }

    pub fn write_instance_data(&mut self, writer: &mut InstanceWriter<'_>) {
        let world = self.world;
        if let NodeKind::Mesh(mesh) = &mut self.kind {
            mesh.write_instance_data(world, writer);
        }
    }

    pub fn write_batched_draws(&self, writer: &mut IndirectWriter<'_>) {
        if let NodeKind::Mesh(mesh) = &self.kind {
            mesh.write_batched_draws(writer);
        }
    }

    /// Whether this node draws through the shared batch.
    pub fn is_batched(&self) -> bool {
        matches!(self.kind, NodeKind::Mesh(_))
    }
}
