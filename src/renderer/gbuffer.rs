// renderer/gbuffer.rs
//! Geometry buffer targets, per-view camera uniforms and the batched lit pass.

use std::mem;
use std::num::NonZeroU64;

use crate::error::SetupError;
use crate::renderer::layout::round_to_alignment;
use crate::renderer::mapping::{BarrierFlags, MappedBuffer};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::textures::RenderTarget;
use crate::renderer::uniforms::CameraUniform;
use crate::renderer::vertex::{InstanceRaw, SkinnedVertex};

pub const DIFFUSE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// r: specular, g: shininess, b: material flags, a: lit mask.
pub const MATERIAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Number of camera views a frame can split the screen into.
pub const MAX_VIEWS: usize = 2;

pub struct GBuffer {
    pub diffuse: RenderTarget,
    pub normal: RenderTarget,
    pub material: RenderTarget,
    pub depth: RenderTarget,
}

impl GBuffer {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self {
            diffuse: RenderTarget::new(device, "GBufferDiffuse", width, height, DIFFUSE_FORMAT),
            normal: RenderTarget::new(device, "GBufferNormal", width, height, NORMAL_FORMAT),
            material: RenderTarget::new(device, "GBufferMaterial", width, height, MATERIAL_FORMAT),
            depth: RenderTarget::new(device, "GBufferDepth", width, height, DEPTH_FORMAT),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.depth.size()
    }

    /// Opens a pass over all four attachments. Only the first view of a frame
    /// clears; later views keep what earlier views wrote.
    pub fn begin_pass<'e>(&self, encoder: &'e mut wgpu::CommandEncoder, clear: bool) -> wgpu::RenderPass<'e> {
        let color_load = if clear {
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
        } else {
            wgpu::LoadOp::Load
        };
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GBufferPass"),
            color_attachments: &[
                color_attachment(&self.diffuse.view, color_load),
                color_attachment(&self.normal.view, color_load),
                color_attachment(&self.material.view, color_load),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    /// Color target states in attachment order, for pipelines writing the
    /// G-buffer.
    pub fn color_formats() -> [wgpu::TextureFormat; 3] {
        [DIFFUSE_FORMAT, NORMAL_FORMAT, MATERIAL_FORMAT]
    }
}

pub(crate) fn color_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        depth_slice: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
    })
}

/// Camera uniforms of every view, one dynamic-offset slot each.
pub struct CameraBuffer {
    uniform: MappedBuffer,
    stride: u64,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

impl CameraBuffer {
    pub fn new(device: &wgpu::Device, uniform_alignment: u64) -> Result<Self, SetupError> {
        let size = mem::size_of::<CameraUniform>() as u64;
        let stride = round_to_alignment(size, uniform_alignment);
        let uniform = MappedBuffer::with_capacity(
            device,
            "CameraUniforms",
            wgpu::BufferUsages::UNIFORM,
            stride * MAX_VIEWS as u64,
        );

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CameraLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(size),
                },
                count: None,
            }],
        });

        let Some(buffer) = uniform.buffer() else {
            return Err(SetupError::Resource("camera uniform buffer was not allocated".into()));
        };
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CameraBindGroup"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: 0,
                    size: NonZeroU64::new(size),
                }),
            }],
        });

        Ok(Self {
            uniform,
            stride,
            layout,
            bind_group,
        })
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Dynamic offset of `view`.
    pub fn offset(&self, view: usize) -> u32 {
        (view as u64 * self.stride) as u32
    }

    pub fn write(&mut self, view: usize, camera: &CameraUniform) {
        if view >= MAX_VIEWS {
            log::warn!("Camera view {} out of range", view);
            return;
        }
        let offset = view as u64 * self.stride;
        self.uniform.mapping(offset).write(0, camera);
    }

    pub fn flush(&mut self, queue: &wgpu::Queue) {
        self.uniform.flush(queue, BarrierFlags::UNIFORM);
    }
}

/// Pipeline drawing the skinned batch into the G-buffer.
pub struct LitStage {
    pipeline: wgpu::RenderPipeline,
}

impl LitStage {
    /// Group 0 is the camera, group 1 the per-instance texture sets, group 2
    /// the texture array.
    pub fn new(
        device: &wgpu::Device,
        camera_layout: &wgpu::BindGroupLayout,
        texture_sets_layout: &wgpu::BindGroupLayout,
        texture_array_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("LitPipelineLayout"),
            bind_group_layouts: &[camera_layout, texture_sets_layout, texture_array_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("LitShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/gbuffer.wgsl").into()),
        });

        let mut builder = PipelineBuilder::new(device, &layout, &shader)
            .with_label("LitPipeline")
            .with_vertex_buffer(SkinnedVertex::layout())
            .with_vertex_buffer(InstanceRaw::layout())
            .with_depth_stencil(DEPTH_FORMAT, true, wgpu::CompareFunction::Less);
        for format in GBuffer::color_formats() {
            builder = builder.with_color_target(format, None);
        }

        Self {
            pipeline: builder.build(),
        }
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }
}

/// Pixel rectangle of one view inside the shared targets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Splits `width` so the right view covers `split_ratio` of it. Views
    /// with no width come back as `None`.
    pub fn split(width: u32, height: u32, split_ratio: f32) -> [Option<Viewport>; MAX_VIEWS] {
        let width = width as f32;
        let right = (width * split_ratio.clamp(0.0, 1.0)).round();
        let left = width - right;
        let view = |x: f32, w: f32| {
            (w >= 1.0).then_some(Viewport {
                x,
                y: 0.0,
                width: w,
                height: height as f32,
            })
        };
        [view(0.0, left), view(left, right)]
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height.max(1.0)
    }

    pub fn to_vec4(self) -> glam::Vec4 {
        glam::Vec4::new(self.x, self.y, self.width, self.height)
    }

    pub fn apply(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_viewport(self.x, self.y, self.width, self.height, 0.0, 1.0);
        pass.set_scissor_rect(
            self.x as u32,
            self.y as u32,
            self.width as u32,
            self.height as u32,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_covers_the_full_width() {
        let [left, right] = Viewport::split(1280, 720, 0.25);
        let (left, right) = (left.unwrap(), right.unwrap());
        assert_eq!(left.width + right.width, 1280.0);
        assert_eq!(right.x, left.width);
        assert_eq!(right.width, 320.0);
    }

    #[test]
    fn empty_views_are_skipped() {
        let [left, right] = Viewport::split(800, 600, 0.0);
        assert!(left.is_some());
        assert!(right.is_none());

        let [left, right] = Viewport::split(800, 600, 1.0);
        assert!(left.is_none());
        assert_eq!(right.unwrap().width, 800.0);
    }
}
