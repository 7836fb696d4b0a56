// src/renderer/batch.rs
//! CPU side of batch assembly: draw parameter accounting, skinning ranges,
//! and the writers nodes use to fill the dynamic buffer.

use std::iter::Sum;
use std::mem;
use std::ops::{Add, AddAssign};

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::renderer::geometry::SkinnedMesh;
use crate::renderer::layout::{DrawIndexedIndirect, DynamicLayout};
use crate::renderer::mapping::MappingRef;
use crate::renderer::vertex::{InstanceRaw, TextureHandleSet};

/// Worst-case counts a node may draw this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DrawParams {
    pub max_vertices: u32,
    pub max_indirect_cmds: u32,
    pub instances: u32,
}

impl DrawParams {
    pub const ZERO: Self = Self {
        max_vertices: 0,
        max_indirect_cmds: 0,
        instances: 0,
    };

    pub fn new(max_vertices: u32, max_indirect_cmds: u32, instances: u32) -> Self {
        Self {
            max_vertices,
            max_indirect_cmds,
            instances,
        }
    }
}

impl Add for DrawParams {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            max_vertices: self.max_vertices + rhs.max_vertices,
            max_indirect_cmds: self.max_indirect_cmds + rhs.max_indirect_cmds,
            instances: self.instances + rhs.instances,
        }
    }
}

impl AddAssign for DrawParams {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for DrawParams {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a DrawParams> for DrawParams {
    fn sum<I: Iterator<Item = &'a DrawParams>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Parameters of one skinning dispatch. Also the uniform layout read by
/// the compute shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SkinDispatch {
    pub src_first_vertex: u32,
    pub vertex_count: u32,
    pub dst_first_vertex: u32,
    pub joint_base: u32,
}

impl SkinDispatch {
    pub fn dst_range(&self) -> std::ops::Range<u32> {
        self.dst_first_vertex..self.dst_first_vertex + self.vertex_count
    }
}

/// Running write position in the scratch vertex buffer.
#[derive(Debug, Default)]
pub struct SkinCursor {
    written: u32,
    dispatches: Vec<SkinDispatch>,
}

impl SkinCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next contiguous output range for `mesh` posed at `frame`
    /// and returns its first vertex.
    pub fn reserve(&mut self, mesh: &SkinnedMesh, frame: u32) -> u32 {
        let dst_first_vertex = self.written;
        self.dispatches.push(SkinDispatch {
            src_first_vertex: mesh.first_vertex,
            vertex_count: mesh.vertex_count,
            dst_first_vertex,
            joint_base: mesh.frame_joint_base(frame),
        });
        self.written += mesh.vertex_count;
        dst_first_vertex
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn dispatches(&self) -> &[SkinDispatch] {
        &self.dispatches
    }
}

/// Where a node's skinned vertices and instance records landed this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSlot {
    pub vertex_base: u32,
    pub instance_base: u32,
}

/// Writes instance matrices and texture handle sets side by side.
pub struct InstanceWriter<'a> {
    mapping: MappingRef<'a>,
    instance_offset: u64,
    texture_offset: u64,
    capacity: u32,
    cursor: u32,
}

impl<'a> InstanceWriter<'a> {
    /// `mapping` must point at the start of the dynamic buffer.
    pub fn new(mapping: MappingRef<'a>, layout: &DynamicLayout) -> Self {
        Self {
            mapping,
            instance_offset: layout.instance_offset,
            texture_offset: layout.texture_offset,
            capacity: (layout.instance_size / mem::size_of::<InstanceRaw>() as u64) as u32,
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Appends one instance and returns its index.
    pub fn push(&mut self, model: Mat4, textures: TextureHandleSet) -> u32 {
        let index = self.cursor;
        if index >= self.capacity {
            log::error!("Instance {} exceeds reserved capacity {}", index, self.capacity);
            return index;
        }
        let instance_at = self.instance_offset + index as u64 * mem::size_of::<InstanceRaw>() as u64;
        let texture_at =
            self.texture_offset + index as u64 * mem::size_of::<TextureHandleSet>() as u64;
        self.mapping.write(instance_at, &InstanceRaw::from_matrix(model));
        self.mapping.write(texture_at, &textures);
        self.cursor += 1;
        index
    }
}

/// Appends indirect commands to one pass slot.
pub struct IndirectWriter<'a> {
    mapping: MappingRef<'a>,
    capacity: u32,
    count: u32,
}

impl<'a> IndirectWriter<'a> {
    /// `mapping` must point at the first record of the slot.
    pub fn new(mapping: MappingRef<'a>, capacity: u32) -> Self {
        Self {
            mapping,
            capacity,
            count: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn push(&mut self, command: DrawIndexedIndirect) {
        if self.count >= self.capacity {
            log::error!("Indirect command {} exceeds slot capacity {}", self.count, self.capacity);
            return;
        }
        let at = self.count as u64 * mem::size_of::<DrawIndexedIndirect>() as u64;
        self.mapping.write(at, &command);
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mapping::ByteArena;

    fn mesh(first_vertex: u32, vertex_count: u32) -> SkinnedMesh {
        SkinnedMesh {
            name: "test".into(),
            first_vertex,
            vertex_count,
            first_index: 0,
            submeshes: Vec::new(),
            joint_base: 10,
            joint_count: 4,
            frame_count: 8,
            frame_rate: 24.0,
        }
    }

    #[test]
    fn draw_params_sum_is_componentwise() {
        let params = [
            DrawParams::new(100, 2, 2),
            DrawParams::new(0, 0, 0),
            DrawParams::new(30, 1, 1),
        ];
        let total: DrawParams = params.iter().sum();
        assert_eq!(total, DrawParams::new(130, 3, 3));

        let mut accumulated = DrawParams::ZERO;
        for p in params {
            accumulated += p;
        }
        assert_eq!(accumulated, total);
    }

    #[test]
    fn skin_cursor_assigns_back_to_back_ranges() {
        let mut cursor = SkinCursor::new();
        let a = cursor.reserve(&mesh(0, 50), 0);
        let b = cursor.reserve(&mesh(50, 20), 3);
        assert_eq!((a, b), (0, 50));
        assert_eq!(cursor.written(), 70);
        assert_eq!(cursor.dispatches()[1].joint_base, 10 + 3 * 4);
        assert_eq!(cursor.dispatches()[1].src_first_vertex, 50);
    }

    #[test]
    fn instance_writer_fills_both_regions() {
        let layout = DynamicLayout::compute(4, 2, 256);
        let mut arena = ByteArena::with_capacity(layout.total as usize);
        let textures = TextureHandleSet {
            diffuse: 3,
            normal: 4,
            material: 5,
            flags: 0,
        };
        {
            let mut writer = InstanceWriter::new(arena.mapping(0), &layout);
            writer.push(Mat4::from_scale(glam::Vec3::splat(2.0)), TextureHandleSet::default());
            assert_eq!(writer.push(Mat4::IDENTITY, textures), 1);
            // Full: ignored.
            writer.push(Mat4::IDENTITY, textures);
            assert_eq!(writer.cursor(), 2);
        }
        let second: InstanceRaw = arena.read(layout.instance_offset + 64).unwrap();
        assert_eq!(second, InstanceRaw::from_matrix(Mat4::IDENTITY));
        let set: TextureHandleSet = arena.read(layout.texture_offset + 16).unwrap();
        assert_eq!(set, textures);
    }

    #[test]
    fn indirect_writer_respects_capacity() {
        let mut arena = ByteArena::with_capacity(100);
        let mut writer = IndirectWriter::new(arena.mapping(20), 2);
        for _ in 0..3 {
            writer.push(DrawIndexedIndirect {
                index_count: 6,
                instance_count: 1,
                ..Default::default()
            });
        }
        assert_eq!(writer.count(), 2);
    }
}
