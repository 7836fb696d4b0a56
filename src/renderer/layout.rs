// src/renderer/layout.rs
//! Byte layout of the static geometry store and the dynamic batch buffer.
//!
//! All offsets here are computed on the CPU and fed to `wgpu` as buffer
//! binding offsets, so they must satisfy the device's alignment limits.

use std::mem;

use crate::renderer::vertex::{InstanceRaw, TextureHandleSet, WeightedVertex};

/// Size in bytes of one `u32` index.
pub const INDEX_SIZE: u64 = mem::size_of::<u32>() as u64;
/// Size in bytes of one joint matrix.
pub const JOINT_MATRIX_SIZE: u64 = mem::size_of::<[[f32; 4]; 4]>() as u64;
/// Alignment used between the indirect and instance regions.
pub const INSTANCE_REGION_ALIGNMENT: u64 = 16;

/// Rounds `value` up to the next multiple of `alignment`.
///
/// An alignment of zero leaves the value untouched.
pub const fn round_to_alignment(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// `[vertices][pad][indices][pad][joints]`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreLayout {
    pub vertex_size: u64,
    pub index_offset: u64,
    pub index_size: u64,
    pub joints_offset: u64,
    pub joints_size: u64,
    pub total: u64,
}

impl StoreLayout {
    pub fn compute(
        vertex_count: u64,
        index_count: u64,
        joint_matrix_count: u64,
        storage_alignment: u64,
    ) -> Self {
        let vertex_size = vertex_count * mem::size_of::<WeightedVertex>() as u64;
        let index_offset = round_to_alignment(vertex_size, INDEX_SIZE);
        let index_size = index_count * INDEX_SIZE;
        let joints_offset = round_to_alignment(index_offset + index_size, storage_alignment);
        let joints_size = joint_matrix_count * JOINT_MATRIX_SIZE;

        Self {
            vertex_size,
            index_offset,
            index_size,
            joints_offset,
            joints_size,
            total: joints_offset + joints_size,
        }
    }

    pub fn index_range(&self) -> std::ops::Range<u64> {
        self.index_offset..self.index_offset + self.index_size
    }
}

/// `[indirect commands][instance matrices][texture handle sets]`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DynamicLayout {
    pub indirect_size: u64,
    pub instance_offset: u64,
    pub instance_size: u64,
    pub texture_offset: u64,
    pub texture_size: u64,
    pub total: u64,
}

impl DynamicLayout {
    pub fn compute(indirect_records: u64, instances: u64, texture_alignment: u64) -> Self {
        let indirect_size = indirect_records * mem::size_of::<DrawIndexedIndirect>() as u64;
        let instance_offset = round_to_alignment(indirect_size, INSTANCE_REGION_ALIGNMENT);
        let instance_size = instances * mem::size_of::<InstanceRaw>() as u64;
        let texture_offset =
            round_to_alignment(instance_offset + instance_size, texture_alignment);
        let texture_size = instances * mem::size_of::<TextureHandleSet>() as u64;

        Self {
            indirect_size,
            instance_offset,
            instance_size,
            texture_offset,
            texture_size,
            total: texture_offset + texture_size,
        }
    }
}

/// Matches the record consumed by `multi_draw_indexed_indirect`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// Capacity of a buffer that only ever grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GrowableCapacity {
    capacity: u64,
}

impl GrowableCapacity {
    pub const fn new(capacity: u64) -> Self {
        Self { capacity }
    }

    pub const fn get(&self) -> u64 {
        self.capacity
    }

    /// Returns `Some((old, new))` when `required` no longer fits.
    pub fn ensure(&mut self, required: u64) -> Option<(u64, u64)> {
        if required <= self.capacity {
            return None;
        }
        let old = self.capacity;
        self.capacity = required.max(old.saturating_mul(2));
        Some((old, self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_alignment_rounds_up() {
        assert_eq!(round_to_alignment(0, 256), 0);
        assert_eq!(round_to_alignment(1, 256), 256);
        assert_eq!(round_to_alignment(256, 256), 256);
        assert_eq!(round_to_alignment(257, 256), 512);
        assert_eq!(round_to_alignment(10, 0), 10);
        assert_eq!(round_to_alignment(10, 3), 12);
    }

    #[test]
    fn store_layout_respects_alignment() {
        for storage_alignment in [4, 32, 64, 256] {
            let layout = StoreLayout::compute(37, 111, 5, storage_alignment);
            assert_eq!(layout.index_offset % INDEX_SIZE, 0);
            assert_eq!(layout.joints_offset % storage_alignment, 0);
            assert!(layout.index_offset >= layout.vertex_size);
            assert!(layout.joints_offset >= layout.index_offset + layout.index_size);
            assert_eq!(layout.total, layout.joints_offset + 5 * JOINT_MATRIX_SIZE);
        }
    }

    #[test]
    fn dynamic_layout_orders_regions() {
        let layout = DynamicLayout::compute(3, 7, 256);
        assert_eq!(layout.indirect_size, 60);
        assert_eq!(layout.instance_offset, 64);
        assert_eq!(layout.instance_size, 7 * 64);
        assert_eq!(layout.texture_offset % 256, 0);
        assert!(layout.texture_offset >= layout.instance_offset + layout.instance_size);
        assert_eq!(layout.texture_size, 7 * 16);
    }

    #[test]
    fn empty_dynamic_layout_is_empty() {
        assert_eq!(DynamicLayout::compute(0, 0, 256).total, 0);
    }

    #[test]
    fn capacity_never_shrinks() {
        let mut capacity = GrowableCapacity::new(0);
        let mut max_seen = 0;
        for required in [10, 4, 0, 30, 12, 31, 200, 1] {
            capacity.ensure(required);
            max_seen = max_seen.max(required);
            assert!(capacity.get() >= max_seen);
        }
    }

    #[test]
    fn capacity_reports_growth_once() {
        let mut capacity = GrowableCapacity::new(8);
        assert_eq!(capacity.ensure(8), None);
        assert_eq!(capacity.ensure(9), Some((8, 16)));
        assert_eq!(capacity.ensure(16), None);
        assert_eq!(capacity.ensure(100), Some((16, 100)));
    }

    #[test]
    fn indirect_record_is_twenty_bytes() {
        assert_eq!(mem::size_of::<DrawIndexedIndirect>(), 20);
    }
}
