// src/renderer/assembler.rs
//! Per-frame batch setup shared by every lit and shadow pass.
//!
//! The dynamic buffer is laid out as `[indirect slots][instances][texture sets]`.
//! Each pass that issues its own multi-draw gets one indirect slot of
//! `max_indirect_cmds` records, because every upload of a frame lands before
//! the single submit.

use std::mem;
use std::num::NonZeroU64;

use crate::renderer::batch::{DrawParams, IndirectWriter, InstanceWriter, SkinCursor};
use crate::renderer::geometry::StaticGeometryStore;
use crate::renderer::RenderContext;
use crate::renderer::layout::{DrawIndexedIndirect, DynamicLayout};
use crate::renderer::mapping::{BarrierFlags, ByteArena, MappedBuffer};
use crate::renderer::skinning::{ScratchBuffer, SkinningStage};
use crate::scene::Graph;
use crate::settings::RenderSettings;

const INDIRECT_RECORD_SIZE: u64 = mem::size_of::<DrawIndexedIndirect>() as u64;

/// What the lit pass needs to know after [`BatchAssembler::setup_batches`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSetup {
    pub texture_offset: u64,
    pub texture_size: u64,
    pub draws: DrawParams,
    pub skinned_vertices: u32,
}

/// Indirect commands written for one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndirectSlot {
    pub offset: u64,
    pub count: u32,
}

impl IndirectSlot {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Sums the worst-case draw parameters of every graph.
pub fn total_draw_params(graphs: &[&mut Graph]) -> DrawParams {
    graphs.iter().map(|graph| graph.batch_draw_params()).sum()
}

/// Plans skinning ranges and writes instance and texture records for every
/// graph, in order. Returns the skinning plan.
pub fn assemble(graphs: &mut [&mut Graph], arena: &mut ByteArena, layout: &DynamicLayout) -> SkinCursor {
    let mut cursor = SkinCursor::new();
    for graph in graphs.iter_mut() {
        graph.skin_vertices(&mut cursor);
    }
    let mut writer = InstanceWriter::new(arena.mapping(0), layout);
    for graph in graphs.iter_mut() {
        graph.write_instance_data(&mut writer);
    }
    cursor
}

pub struct BatchAssembler {
    scratch: ScratchBuffer,
    dynamic: MappedBuffer,
    skinning: SkinningStage,
    layout: DynamicLayout,
    binding_alignment: u64,
    max_indirect_cmds: u32,
    pass_slots: u32,
    texture_sets_layout: wgpu::BindGroupLayout,
    texture_sets_group: Option<wgpu::BindGroup>,
    texture_sets_key: (u64, u64, u64),
    reallocations: u32,
}

impl BatchAssembler {
    pub fn new(context: &RenderContext, settings: &RenderSettings) -> Self {
        let device = &context.device;
        let binding_alignment = context.binding_alignment();

        let scratch = ScratchBuffer::new(device, settings.initial_scratch_vertices);
        let mut dynamic = MappedBuffer::new(
            "BatchDynamic",
            wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
        );
        let initial = DynamicLayout::compute(
            settings.initial_indirect_commands as u64,
            settings.initial_instances as u64,
            binding_alignment,
        );
        dynamic.ensure(device, initial.total);

        let texture_sets_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("TextureSetsLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        Self {
            scratch,
            dynamic,
            skinning: SkinningStage::new(device, context.uniform_alignment()),
            layout: DynamicLayout::default(),
            binding_alignment,
            max_indirect_cmds: 0,
            pass_slots: 0,
            texture_sets_layout,
            texture_sets_group: None,
            texture_sets_key: (0, 0, 0),
            reallocations: 0,
        }
    }

    pub fn texture_sets_layout(&self) -> &wgpu::BindGroupLayout {
        &self.texture_sets_layout
    }

    /// Texture handle sets of this frame's instances, or `None` when nothing
    /// was assembled.
    pub fn texture_sets_group(&self) -> Option<&wgpu::BindGroup> {
        self.texture_sets_group.as_ref()
    }

    pub fn scratch_buffer(&self) -> Option<&wgpu::Buffer> {
        self.scratch.buffer()
    }

    pub fn layout(&self) -> &DynamicLayout {
        &self.layout
    }

    /// Byte range of the instance region, for binding as a vertex buffer.
    pub fn instance_range(&self) -> std::ops::Range<u64> {
        self.layout.instance_offset..self.layout.instance_offset + self.layout.instance_size
    }

    /// Buffer reallocations since startup.
    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }

    /// Sizes the buffers for `graphs`, writes the shared instance data and
    /// records the skinning dispatches. `pass_slots` is the number of passes
    /// that will write indirect commands this frame.
    pub fn setup_batches(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        store: &StaticGeometryStore,
        graphs: &mut [&mut Graph],
        pass_slots: u32,
    ) -> BatchSetup {
        let device = &context.device;
        let draws = total_draw_params(graphs);

        if self.scratch.ensure(device, draws.max_vertices) {
            self.reallocations += 1;
        }

        self.max_indirect_cmds = draws.max_indirect_cmds;
        self.pass_slots = pass_slots;
        self.layout = DynamicLayout::compute(
            draws.max_indirect_cmds as u64 * pass_slots as u64,
            draws.instances as u64,
            self.binding_alignment,
        );
        if self.dynamic.ensure(device, self.layout.total) {
            self.reallocations += 1;
        }

        let cursor = assemble(graphs, self.dynamic.arena_mut(), &self.layout);

        self.skinning.encode(
            device,
            &context.queue,
            encoder,
            store,
            &self.scratch,
            cursor.dispatches(),
        );
        self.rebuild_texture_sets(device);

        log::trace!(
            "Batch setup: {} skinned vertices, {} commands x {} slots, {} instances",
            cursor.written(),
            draws.max_indirect_cmds,
            pass_slots,
            draws.instances
        );

        BatchSetup {
            texture_offset: self.layout.texture_offset,
            texture_size: self.layout.texture_size,
            draws,
            skinned_vertices: cursor.written(),
        }
    }

    fn rebuild_texture_sets(&mut self, device: &wgpu::Device) {
        let key = (
            self.dynamic.generation(),
            self.layout.texture_offset,
            self.layout.texture_size,
        );
        if self.texture_sets_group.is_some() && self.texture_sets_key == key {
            return;
        }
        let (Some(buffer), Some(size)) = (
            self.dynamic.buffer(),
            NonZeroU64::new(self.layout.texture_size),
        ) else {
            self.texture_sets_group = None;
            return;
        };
        self.texture_sets_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("TextureSetsBindGroup"),
            layout: &self.texture_sets_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: self.layout.texture_offset,
                    size: Some(size),
                }),
            }],
        }));
        self.texture_sets_key = key;
    }

    /// Byte offset of the first record of `slot`.
    pub fn slot_offset(&self, slot: u32) -> u64 {
        slot as u64 * self.max_indirect_cmds as u64 * INDIRECT_RECORD_SIZE
    }

    /// Lets `write` fill the indirect commands of `slot`.
    pub fn write_pass<F>(&mut self, slot: u32, write: F) -> IndirectSlot
    where
        F: FnOnce(&mut IndirectWriter<'_>),
    {
        if slot >= self.pass_slots {
            log::error!("Indirect slot {} out of range ({} slots)", slot, self.pass_slots);
            return IndirectSlot::default();
        }
        let offset = self.slot_offset(slot);
        let mut writer = IndirectWriter::new(self.dynamic.mapping(offset), self.max_indirect_cmds);
        write(&mut writer);
        IndirectSlot {
            offset,
            count: writer.count(),
        }
    }

    /// Uploads everything written this frame. Must run before submit.
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        self.dynamic.flush(queue, BarrierFlags::BUFFER_UPDATE | BarrierFlags::CLIENT_MAPPED);
    }

    /// Binds the skinned vertices, the instance stream and the index buffer.
    pub fn bind_batch(&self, pass: &mut wgpu::RenderPass<'_>, store: &StaticGeometryStore) -> bool {
        let (Some(scratch), Some(dynamic)) = (self.scratch.buffer(), self.dynamic.buffer()) else {
            return false;
        };
        if self.layout.instance_size == 0 || store.is_empty() {
            return false;
        }
        pass.set_vertex_buffer(0, scratch.slice(..));
        pass.set_vertex_buffer(1, dynamic.slice(self.instance_range()));
        pass.set_index_buffer(store.index_slice(), wgpu::IndexFormat::Uint32);
        true
    }

    /// Issues the commands of `slot` as one multi-draw.
    pub fn draw_slot(&self, pass: &mut wgpu::RenderPass<'_>, slot: IndirectSlot) {
        let Some(dynamic) = self.dynamic.buffer() else {
            return;
        };
        if slot.is_empty() {
            return;
        }
        pass.multi_draw_indexed_indirect(dynamic, slot.offset, slot.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::geometry::{SkinnedMesh, Submesh};
    use crate::renderer::vertex::{InstanceRaw, TextureHandleSet};
    use crate::scene::{MeshNode, Node, NodeKind};
    use glam::{Mat4, Vec3};
    use std::sync::Arc;

    fn mesh() -> Arc<SkinnedMesh> {
        Arc::new(SkinnedMesh {
            name: "unit".into(),
            first_vertex: 0,
            vertex_count: 24,
            first_index: 0,
            submeshes: vec![Submesh {
                first_index: 0,
                index_count: 36,
                textures: TextureHandleSet::default(),
            }],
            joint_base: 0,
            joint_count: 1,
            frame_count: 4,
            frame_rate: 24.0,
        })
    }

    fn graph_with(count: usize) -> Graph {
        let mut graph = Graph::new();
        for i in 0..count {
            graph.add_root(
                Node::new(format!("m{i}"), NodeKind::Mesh(MeshNode::new(mesh())))
                    .with_transform(Mat4::from_translation(Vec3::X * i as f32)),
            );
        }
        graph
    }

    #[test]
    fn assemble_is_idempotent() {
        let mut left = graph_with(3);
        let mut right = graph_with(2);
        let mut graphs = [&mut left, &mut right];
        let draws = total_draw_params(&graphs);
        assert_eq!(draws, DrawParams::new(120, 5, 5));

        let layout = DynamicLayout::compute(draws.max_indirect_cmds as u64, draws.instances as u64, 256);
        let mut first = ByteArena::with_capacity(layout.total as usize);
        let mut second = ByteArena::with_capacity(layout.total as usize);
        let a = assemble(&mut graphs, &mut first, &layout);
        let b = assemble(&mut graphs, &mut second, &layout);

        assert_eq!(a.dispatches(), b.dispatches());
        assert_eq!(first.bytes(), second.bytes());
        assert_eq!(a.written(), 120);

        let last: InstanceRaw = first.read(layout.instance_offset + 4 * 64).unwrap();
        assert_eq!(last, InstanceRaw::from_matrix(Mat4::from_translation(Vec3::X)));
    }
}
