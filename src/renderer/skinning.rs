// src/renderer/skinning.rs
//! Compute pass that poses every animated node into the scratch vertex buffer.

use std::borrow::Cow;
use std::num::NonZeroU64;

use crate::renderer::batch::SkinDispatch;
use crate::renderer::geometry::StaticGeometryStore;
use crate::renderer::layout::{round_to_alignment, GrowableCapacity};
use crate::renderer::mapping::{BarrierFlags, MappedBuffer};
use crate::renderer::vertex::SkinnedVertex;

const WORKGROUP_SIZE: u32 = 64;

/// GPU-only output of the skinning pass, bound as the batch vertex source.
pub struct ScratchBuffer {
    buffer: Option<wgpu::Buffer>,
    capacity: GrowableCapacity,
    generation: u64,
}

impl ScratchBuffer {
    pub fn new(device: &wgpu::Device, initial_vertices: u32) -> Self {
        let mut scratch = Self {
            buffer: None,
            capacity: GrowableCapacity::default(),
            generation: 0,
        };
        scratch.ensure(device, initial_vertices);
        scratch
    }

    /// Capacity in vertices.
    pub fn capacity(&self) -> u32 {
        (self.capacity.get() / SkinnedVertex::STRIDE) as u32
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reallocates when `vertices` no longer fit. Old contents are dropped.
    pub fn ensure(&mut self, device: &wgpu::Device, vertices: u32) -> bool {
        let required = vertices as u64 * SkinnedVertex::STRIDE;
        let Some((old, new)) = self.capacity.ensure(required) else {
            return false;
        };
        log::info!(
            "Growing skinning scratch buffer: {} -> {} vertices",
            old / SkinnedVertex::STRIDE,
            new / SkinnedVertex::STRIDE
        );
        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SkinningScratchBuffer"),
            size: new,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX,
            mapped_at_creation: false,
        }));
        self.generation += 1;
        true
    }
}

pub struct SkinningStage {
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    params: MappedBuffer,
    params_stride: u64,
    bind_group: Option<wgpu::BindGroup>,
    bound_generations: (u64, u64),
}

impl SkinningStage {
    pub fn new(device: &wgpu::Device, uniform_alignment: u64) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SkinningShader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("../shader/skin.wgsl"))),
        });

        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SkinningBindLayout"),
            entries: &[
                storage(0, true),
                storage(1, false),
                storage(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<SkinDispatch>() as u64
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SkinningPipelineLayout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("SkinningPipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("skin_vertices"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            pipeline,
            bind_layout,
            params: MappedBuffer::new("SkinningParams", wgpu::BufferUsages::UNIFORM),
            params_stride: round_to_alignment(
                std::mem::size_of::<SkinDispatch>() as u64,
                uniform_alignment,
            ),
            bind_group: None,
            bound_generations: (0, 0),
        }
    }

    fn write_params(&mut self, device: &wgpu::Device, dispatches: &[SkinDispatch]) {
        self.params
            .ensure(device, dispatches.len() as u64 * self.params_stride);
        let mut mapping = self.params.mapping(0);
        for (i, dispatch) in dispatches.iter().enumerate() {
            mapping.write(i as u64 * self.params_stride, dispatch);
        }
    }

    fn ensure_bind_group(
        &mut self,
        device: &wgpu::Device,
        store: &StaticGeometryStore,
        scratch: &ScratchBuffer,
    ) -> bool {
        let generations = (scratch.generation(), self.params.generation());
        if self.bind_group.is_some() && self.bound_generations == generations {
            return true;
        }
        let (Some(scratch_buffer), Some(params_buffer)) = (scratch.buffer(), self.params.buffer())
        else {
            return false;
        };
        let layout = &store.layout;
        let (Some(vertex_size), Some(joints_size)) = (
            NonZeroU64::new(layout.vertex_size),
            NonZeroU64::new(layout.joints_size),
        ) else {
            return false;
        };

        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SkinningBindGroup"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &store.buffer,
                        offset: 0,
                        size: Some(vertex_size),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scratch_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &store.buffer,
                        offset: layout.joints_offset,
                        size: Some(joints_size),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: params_buffer,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<SkinDispatch>() as u64),
                    }),
                },
            ],
        }));
        self.bound_generations = generations;
        true
    }

    /// Records one dispatch per node and uploads their parameters.
    pub fn encode(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        store: &StaticGeometryStore,
        scratch: &ScratchBuffer,
        dispatches: &[SkinDispatch],
    ) {
        if dispatches.is_empty() {
            return;
        }
        self.write_params(device, dispatches);
        if !self.ensure_bind_group(device, store, scratch) {
            log::warn!("Skinning skipped: static store or scratch buffer is empty");
            return;
        }
        self.params.flush(queue, BarrierFlags::UNIFORM);

        let Some(bind_group) = self.bind_group.as_ref() else {
            return;
        };
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("SkinningPass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        for (i, dispatch) in dispatches.iter().enumerate() {
            let offset = (i as u64 * self.params_stride) as u32;
            pass.set_bind_group(0, bind_group, &[offset]);
            pass.dispatch_workgroups(dispatch.vertex_count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
    }
}
