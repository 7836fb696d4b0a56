// src/renderer/geometry.rs
//! The static geometry store: every weighted vertex, index and baked joint
//! matrix loaded at startup, packed into one GPU buffer.

use std::sync::Arc;

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::error::SetupError;
use crate::renderer::layout::{StoreLayout, JOINT_MATRIX_SIZE};
use crate::renderer::mapping::ByteArena;
use crate::renderer::vertex::{TextureHandleSet, WeightedVertex};
use crate::renderer::RenderContext;

#[derive(Clone, Debug, PartialEq)]
pub struct SubmeshSource {
    pub first_index: u32,
    pub index_count: u32,
    pub textures: TextureHandleSet,
}

/// Raw mesh and baked animation handed over by a loader.
#[derive(Clone, Debug, Default)]
pub struct MeshSource {
    pub name: String,
    pub vertices: Vec<WeightedVertex>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<SubmeshSource>,
    pub joint_count: u32,
    /// `frame_count * joint_count` matrices, frame-major.
    pub frames: Vec<Mat4>,
    pub frame_rate: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submesh {
    /// Relative to the mesh's first index.
    pub first_index: u32,
    pub index_count: u32,
    pub textures: TextureHandleSet,
}

/// Where one mesh and its animation live inside the static store.
#[derive(Clone, Debug, PartialEq)]
pub struct SkinnedMesh {
    pub name: String,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub first_index: u32,
    pub submeshes: Vec<Submesh>,
    pub joint_base: u32,
    pub joint_count: u32,
    pub frame_count: u32,
    pub frame_rate: f32,
}

impl SkinnedMesh {
    /// First joint matrix of `frame`, in matrices from the joint section start.
    pub fn frame_joint_base(&self, frame: u32) -> u32 {
        self.joint_base + frame * self.joint_count
    }
}

/// Collects meshes and assigns their ranges before upload.
#[derive(Default)]
pub struct GeometryBuilder {
    sources: Vec<MeshSource>,
    meshes: Vec<Arc<SkinnedMesh>>,
    vertex_count: u32,
    index_count: u32,
    joint_matrix_count: u32,
}

impl GeometryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: MeshSource) -> Result<Arc<SkinnedMesh>, SetupError> {
        validate(&source)?;

        let frame_count = if source.joint_count == 0 {
            0
        } else {
            source.frames.len() as u32 / source.joint_count
        };

        let mesh = Arc::new(SkinnedMesh {
            name: source.name.clone(),
            first_vertex: self.vertex_count,
            vertex_count: source.vertices.len() as u32,
            first_index: self.index_count,
            submeshes: source
                .submeshes
                .iter()
                .map(|submesh| Submesh {
                    first_index: submesh.first_index,
                    index_count: submesh.index_count,
                    textures: submesh.textures,
                })
                .collect(),
            joint_base: self.joint_matrix_count,
            joint_count: source.joint_count,
            frame_count,
            frame_rate: source.frame_rate,
        });

        self.vertex_count += source.vertices.len() as u32;
        self.index_count += source.indices.len() as u32;
        self.joint_matrix_count += source.frames.len() as u32;
        self.sources.push(source);
        self.meshes.push(mesh.clone());
        Ok(mesh)
    }

    pub fn layout(&self, storage_alignment: u64) -> StoreLayout {
        StoreLayout::compute(
            self.vertex_count as u64,
            self.index_count as u64,
            self.joint_matrix_count as u64,
            storage_alignment,
        )
    }

    /// Serializes every section into `arena` at the offsets of `layout`.
    pub fn write(&self, arena: &mut ByteArena, layout: &StoreLayout) {
        arena.reallocate(layout.total as usize);
        for (source, mesh) in self.sources.iter().zip(&self.meshes) {
            let vertex_at = mesh.first_vertex as u64 * std::mem::size_of::<WeightedVertex>() as u64;
            arena.mapping(0).write_slice(vertex_at, &source.vertices);

            let index_at = mesh.first_index as u64 * crate::renderer::layout::INDEX_SIZE;
            arena
                .mapping(layout.index_offset)
                .write_slice(index_at, &source.indices);

            let joints: Vec<[[f32; 4]; 4]> = source
                .frames
                .iter()
                .map(Mat4::to_cols_array_2d)
                .collect();
            let joint_at = mesh.joint_base as u64 * JOINT_MATRIX_SIZE;
            arena
                .mapping(layout.joints_offset)
                .write_slice(joint_at, &joints);
        }
    }

    pub fn meshes(&self) -> &[Arc<SkinnedMesh>] {
        &self.meshes
    }
}

fn validate(source: &MeshSource) -> Result<(), SetupError> {
    let name = &source.name;
    let vertex_count = source.vertices.len() as u32;

    if source.submeshes.is_empty() {
        return Err(SetupError::Geometry(format!("mesh '{name}' has no submeshes")));
    }
    if let Some(index) = source.indices.iter().find(|index| **index >= vertex_count) {
        return Err(SetupError::Geometry(format!(
            "mesh '{name}' references vertex {index} of {vertex_count}"
        )));
    }
    for submesh in &source.submeshes {
        let end = submesh.first_index as usize + submesh.index_count as usize;
        if submesh.index_count == 0 || end > source.indices.len() {
            return Err(SetupError::Geometry(format!(
                "mesh '{name}' has submesh {}..{} outside {} indices",
                submesh.first_index,
                end,
                source.indices.len()
            )));
        }
    }
    if source.joint_count == 0 {
        return Err(SetupError::Geometry(format!("mesh '{name}' has no joints")));
    }
    if source.frames.is_empty() || source.frames.len() % source.joint_count as usize != 0 {
        return Err(SetupError::Geometry(format!(
            "mesh '{name}' has {} joint matrices for {} joints",
            source.frames.len(),
            source.joint_count
        )));
    }
    let max_joint = source
        .vertices
        .iter()
        .flat_map(|vertex| vertex.joints)
        .max()
        .unwrap_or(0);
    if max_joint >= source.joint_count {
        return Err(SetupError::Geometry(format!(
            "mesh '{name}' uses joint {max_joint} of {}",
            source.joint_count
        )));
    }
    Ok(())
}

/// GPU side of the static store.
pub struct StaticGeometryStore {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) layout: StoreLayout,
}

impl StaticGeometryStore {
    /// Packs the builder's meshes through a staging buffer into the store.
    pub fn upload(context: &RenderContext, builder: &GeometryBuilder) -> Self {
        let layout = builder.layout(context.storage_alignment());
        log::info!(
            "Static store: vertices {} B, indices @{} ({} B), joints @{} ({} B), total {} B",
            layout.vertex_size,
            layout.index_offset,
            layout.index_size,
            layout.joints_offset,
            layout.joints_size,
            layout.total
        );

        let mut arena = ByteArena::default();
        builder.write(&mut arena, &layout);
        let size = layout.total.max(wgpu::COPY_BUFFER_ALIGNMENT);

        let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("StaticGeometryStore"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDEX
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if !arena.is_empty() {
            let staging = context
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("StaticGeometryStaging"),
                    contents: arena.bytes(),
                    usage: wgpu::BufferUsages::COPY_SRC,
                });
            let mut encoder =
                context
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("StaticGeometryUpload"),
                    });
            encoder.copy_buffer_to_buffer(&staging, 0, &buffer, 0, layout.total);
            context.queue.submit(Some(encoder.finish()));
        }

        Self { buffer, layout }
    }

    pub fn is_empty(&self) -> bool {
        self.layout.vertex_size == 0
    }

    pub fn index_slice(&self) -> wgpu::BufferSlice<'_> {
        self.buffer.slice(self.layout.index_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(name: &str, frames: u32) -> MeshSource {
        let vertex = WeightedVertex {
            weights: [1.0, 0.0, 0.0, 0.0],
            ..Default::default()
        };
        MeshSource {
            name: name.into(),
            vertices: vec![vertex; 4],
            indices: vec![0, 1, 2, 0, 2, 3],
            submeshes: vec![SubmeshSource {
                first_index: 0,
                index_count: 6,
                textures: TextureHandleSet::default(),
            }],
            joint_count: 2,
            frames: vec![Mat4::IDENTITY; 2 * frames as usize],
            frame_rate: 24.0,
        }
    }

    #[test]
    fn meshes_get_consecutive_ranges() {
        let mut builder = GeometryBuilder::new();
        let a = builder.add(quad("a", 3)).unwrap();
        let b = builder.add(quad("b", 5)).unwrap();

        assert_eq!((a.first_vertex, a.first_index, a.joint_base), (0, 0, 0));
        assert_eq!((b.first_vertex, b.first_index, b.joint_base), (4, 6, 6));
        assert_eq!(a.frame_count, 3);
        assert_eq!(b.frame_count, 5);
        assert_eq!(b.frame_joint_base(2), 6 + 4);
    }

    #[test]
    fn write_places_sections_at_layout_offsets() {
        let mut builder = GeometryBuilder::new();
        builder.add(quad("a", 1)).unwrap();
        let mut second = quad("b", 1);
        second.indices = vec![3, 2, 1, 0, 1, 2];
        builder.add(second).unwrap();

        let layout = builder.layout(256);
        let mut arena = ByteArena::default();
        builder.write(&mut arena, &layout);

        assert_eq!(arena.len() as u64, layout.total);
        assert_eq!(arena.read::<u32>(layout.index_offset + 6 * 4), Some(3));
        let first_joint: [[f32; 4]; 4] = arena.read(layout.joints_offset).unwrap();
        assert_eq!(first_joint, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn rejects_out_of_range_joint() {
        let mut source = quad("bad", 1);
        source.vertices[2].joints = [5, 0, 0, 0];
        assert!(matches!(
            GeometryBuilder::new().add(source),
            Err(SetupError::Geometry(_))
        ));
    }

    #[test]
    fn rejects_partial_frames() {
        let mut source = quad("bad", 2);
        source.frames.pop();
        assert!(GeometryBuilder::new().add(source).is_err());
    }
}
