// src/renderer/mapping.rs
//! CPU-visible mirrors of GPU buffers.
//!
//! A [`MappedBuffer`] keeps a byte arena the size of its GPU buffer. Writers
//! fill the arena through [`MappingRef`]s and [`MappedBuffer::flush`] uploads
//! the touched range before the frame is submitted.

use std::ops::Range;

use bitflags::bitflags;
use bytemuck::Pod;

use crate::renderer::layout::{round_to_alignment, GrowableCapacity};

bitflags! {
    /// Which consumers must observe an upload.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BarrierFlags: u32 {
        const UNIFORM = 1 << 0;
        const BUFFER_UPDATE = 1 << 1;
        const CLIENT_MAPPED = 1 << 2;
    }
}

impl BarrierFlags {
    /// Barrier required after rewriting light matrices.
    pub const LIGHT_MATRICES: Self = Self::UNIFORM
        .union(Self::BUFFER_UPDATE)
        .union(Self::CLIENT_MAPPED);
}

#[derive(Debug, Default)]
pub struct ByteArena {
    bytes: Vec<u8>,
    dirty: Option<Range<usize>>,
}

impl ByteArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            dirty: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replaces the storage with a zeroed block of `capacity` bytes.
    pub fn reallocate(&mut self, capacity: usize) {
        self.bytes = vec![0; capacity];
        self.dirty = None;
    }

    pub fn mapping(&mut self, offset: u64) -> MappingRef<'_> {
        MappingRef {
            arena: self,
            offset,
        }
    }

    pub fn read<T: Pod>(&self, offset: u64) -> Option<T> {
        let start = offset as usize;
        let end = start + std::mem::size_of::<T>();
        self.bytes
            .get(start..end)
            .map(bytemuck::pod_read_unaligned::<T>)
    }

    pub fn take_dirty(&mut self) -> Option<Range<usize>> {
        self.dirty.take()
    }

    fn write_bytes(&mut self, offset: u64, data: &[u8]) -> bool {
        let start = offset as usize;
        let end = start + data.len();
        let Some(target) = self.bytes.get_mut(start..end) else {
            log::error!(
                "Arena write {}..{} exceeds capacity {}",
                start,
                end,
                self.bytes.len()
            );
            return false;
        };
        target.copy_from_slice(data);
        self.dirty = Some(match self.dirty.take() {
            Some(range) => range.start.min(start)..range.end.max(end),
            None => start..end,
        });
        true
    }
}

/// A write cursor into a [`ByteArena`] at a fixed base offset.
pub struct MappingRef<'a> {
    arena: &'a mut ByteArena,
    offset: u64,
}

impl<'a> MappingRef<'a> {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Writes `value` at `at` bytes past this mapping's base offset.
    pub fn write<T: Pod>(&mut self, at: u64, value: &T) -> bool {
        self.arena
            .write_bytes(self.offset + at, bytemuck::bytes_of(value))
    }

    pub fn write_slice<T: Pod>(&mut self, at: u64, values: &[T]) -> bool {
        self.arena
            .write_bytes(self.offset + at, bytemuck::cast_slice(values))
    }

    /// Narrower mapping starting `offset` bytes further in.
    pub fn sub(&mut self, offset: u64) -> MappingRef<'_> {
        MappingRef {
            arena: &mut *self.arena,
            offset: self.offset + offset,
        }
    }
}

/// A GPU buffer paired with a CPU arena of the same size.
pub struct MappedBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: Option<wgpu::Buffer>,
    capacity: GrowableCapacity,
    arena: ByteArena,
    generation: u64,
}

impl MappedBuffer {
    pub fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            buffer: None,
            capacity: GrowableCapacity::default(),
            arena: ByteArena::default(),
            generation: 0,
        }
    }

    pub fn with_capacity(
        device: &wgpu::Device,
        label: &'static str,
        usage: wgpu::BufferUsages,
        capacity: u64,
    ) -> Self {
        let mut buffer = Self::new(label, usage);
        buffer.ensure(device, capacity);
        buffer
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.get()
    }

    /// Bumped on every reallocation so dependent bind groups know to rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn arena(&self) -> &ByteArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut ByteArena {
        &mut self.arena
    }

    pub fn mapping(&mut self, offset: u64) -> MappingRef<'_> {
        self.arena.mapping(offset)
    }

    /// Grows the buffer when `required` bytes do not fit. Returns `true`
    /// when the buffer was reallocated.
    pub fn ensure(&mut self, device: &wgpu::Device, required: u64) -> bool {
        let required = round_to_alignment(required, wgpu::COPY_BUFFER_ALIGNMENT);
        let Some((old, new)) = self.capacity.ensure(required) else {
            return false;
        };
        log::info!("Growing {} buffer: {} -> {}", self.label, old, new);

        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size: new,
            usage: self.usage,
            mapped_at_creation: false,
        }));
        self.arena.reallocate(new as usize);
        self.generation += 1;
        true
    }

    /// Uploads everything written since the last flush.
    pub fn flush(&mut self, queue: &wgpu::Queue, barrier: BarrierFlags) {
        let (Some(buffer), Some(range)) = (self.buffer.as_ref(), self.arena.take_dirty()) else {
            return;
        };
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let start = range.start / align * align;
        let end = round_to_alignment(range.end as u64, align as u64) as usize;
        let end = end.min(self.arena.len());

        log::trace!(
            "Flushing {} bytes {}..{} ({:?})",
            self.label,
            start,
            end,
            barrier
        );
        queue.write_buffer(buffer, start as u64, &self.arena.bytes()[start..end]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_writes_relative_to_base() {
        let mut arena = ByteArena::with_capacity(32);
        let mut mapping = arena.mapping(8);
        assert!(mapping.write(4, &7u32));
        let mut nested = mapping.sub(8);
        assert!(nested.write(0, &9u32));

        assert_eq!(arena.read::<u32>(12), Some(7));
        assert_eq!(arena.read::<u32>(16), Some(9));
        assert_eq!(arena.take_dirty(), Some(12..20));
        assert_eq!(arena.take_dirty(), None);
    }

    #[test]
    fn out_of_range_write_is_rejected() {
        let mut arena = ByteArena::with_capacity(8);
        assert!(!arena.mapping(4).write(2, &1u32));
        assert_eq!(arena.take_dirty(), None);
    }

    #[test]
    fn reallocate_zeroes_storage() {
        let mut arena = ByteArena::with_capacity(4);
        arena.mapping(0).write(0, &u32::MAX);
        arena.reallocate(16);
        assert_eq!(arena.len(), 16);
        assert!(arena.bytes().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn light_barrier_covers_all_flags() {
        assert_eq!(BarrierFlags::LIGHT_MATRICES, BarrierFlags::all());
    }
}
