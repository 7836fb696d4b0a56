// src/renderer/shadows.rs
//! Depth-only batch pipelines for cube and planar shadow maps.

use std::mem;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::SetupError;
use crate::renderer::layout::round_to_alignment;
use crate::renderer::lights::{ShadowKind, POINT_SHADOW_FACES, SHADOW_FORMAT};
use crate::renderer::mapping::MappedBuffer;
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::vertex::{InstanceRaw, SkinnedVertex};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FaceUniform {
    index: u32,
    _padding: [u32; 3],
}

/// Bind group layouts shared by every light, plus the face-index table that
/// cube passes select with a dynamic offset.
pub struct ShadowLayouts {
    shadow: wgpu::BindGroupLayout,
    cube_light: wgpu::BindGroupLayout,
    spot_light: wgpu::BindGroupLayout,
    face_buffer: wgpu::Buffer,
    face_stride: u64,
    compare_sampler: wgpu::Sampler,
}

impl ShadowLayouts {
    fn new(device: &wgpu::Device, uniform_alignment: u64) -> Self {
        let light_uniform_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let shadow = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ShadowLayout"),
            entries: &[
                light_uniform_entry,
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(mem::size_of::<FaceUniform>() as u64),
                    },
                    count: None,
                },
            ],
        });

        let light_layout = |label, view_dimension| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[
                    light_uniform_entry,
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Depth,
                            view_dimension,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                        count: None,
                    },
                ],
            })
        };
        let cube_light = light_layout("CubeLightLayout", wgpu::TextureViewDimension::D2Array);
        let spot_light = light_layout("SpotLightLayout", wgpu::TextureViewDimension::D2);

        let face_stride = round_to_alignment(mem::size_of::<FaceUniform>() as u64, uniform_alignment);
        let mut faces = vec![0u8; (face_stride * POINT_SHADOW_FACES as u64) as usize];
        for face in 0..POINT_SHADOW_FACES {
            let at = face * face_stride as usize;
            let record = FaceUniform {
                index: face as u32,
                _padding: [0; 3],
            };
            faces[at..at + mem::size_of::<FaceUniform>()].copy_from_slice(bytemuck::bytes_of(&record));
        }
        let face_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ShadowFaceIndices"),
            contents: &faces,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let compare_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ShadowSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::GreaterEqual),
            ..Default::default()
        });

        Self {
            shadow,
            cube_light,
            spot_light,
            face_buffer,
            face_stride,
            compare_sampler,
        }
    }

    pub fn face_stride(&self) -> u64 {
        self.face_stride
    }

    pub fn light_layout(&self, kind: ShadowKind) -> &wgpu::BindGroupLayout {
        match kind {
            ShadowKind::Cube => &self.cube_light,
            ShadowKind::Planar => &self.spot_light,
        }
    }

    /// Returns the shadow-pass group and the accumulation-pass group of one light.
    pub fn light_bind_groups(
        &self,
        device: &wgpu::Device,
        label: &str,
        kind: ShadowKind,
        uniform: &MappedBuffer,
        sample_view: &wgpu::TextureView,
    ) -> Result<(wgpu::BindGroup, wgpu::BindGroup), SetupError> {
        let Some(buffer) = uniform.buffer() else {
            return Err(SetupError::Resource(format!("{label}: light uniform buffer was not allocated")));
        };

        let shadow_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label}ShadowGroup")),
            layout: &self.shadow,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.face_buffer,
                        offset: 0,
                        size: NonZeroU64::new(mem::size_of::<FaceUniform>() as u64),
                    }),
                },
            ],
        });

        let light_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label}LightGroup")),
            layout: self.light_layout(kind),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(sample_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.compare_sampler),
                },
            ],
        });

        Ok((shadow_group, light_group))
    }
}

pub struct ShadowStage {
    layouts: ShadowLayouts,
    cube_pipeline: wgpu::RenderPipeline,
    planar_pipeline: wgpu::RenderPipeline,
}

impl ShadowStage {
    pub fn new(device: &wgpu::Device, uniform_alignment: u64) -> Self {
        let layouts = ShadowLayouts::new(device, uniform_alignment);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ShadowPipelineLayout"),
            bind_group_layouts: &[&layouts.shadow],
            push_constant_ranges: &[],
        });

        let cube_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("CubeShadowShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/shadow_cube.wgsl").into()),
        });
        let planar_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("PlanarShadowShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/shadow_planar.wgsl").into()),
        });

        let build = |label: &str, shader: &wgpu::ShaderModule| {
            PipelineBuilder::new(device, &pipeline_layout, shader)
                .with_label(label)
                .with_vertex_buffer(SkinnedVertex::layout())
                .with_vertex_buffer(InstanceRaw::layout())
                .with_depth_stencil(SHADOW_FORMAT, true, wgpu::CompareFunction::Greater)
                .with_cull_mode(Some(wgpu::Face::Front))
                .build()
        };

        Self {
            cube_pipeline: build("CubeShadowPipeline", &cube_shader),
            planar_pipeline: build("PlanarShadowPipeline", &planar_shader),
            layouts,
        }
    }

    pub fn layouts(&self) -> &ShadowLayouts {
        &self.layouts
    }

    pub fn pipeline(&self, kind: ShadowKind) -> &wgpu::RenderPipeline {
        match kind {
            ShadowKind::Cube => &self.cube_pipeline,
            ShadowKind::Planar => &self.planar_pipeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_records_fit_dynamic_stride() {
        for alignment in [64, 256] {
            let stride = round_to_alignment(mem::size_of::<FaceUniform>() as u64, alignment);
            assert!(stride >= 16);
            assert_eq!(stride % alignment, 0);
        }
    }
}
