// renderer/lighting.rs
//! Additive light accumulation over the G-buffer and the deferred combine.

use std::mem;
use std::num::NonZeroU64;

use crate::renderer::gbuffer::{color_attachment, CameraBuffer, Viewport};
use crate::renderer::layout::round_to_alignment;
use crate::renderer::lights::{PointLight, PointLightInstance, ShadowKind, SpotLight, SpotLightInstance};
use crate::renderer::mapping::{BarrierFlags, MappedBuffer};
use crate::renderer::pipeline_builder::{PipelineBuilder, ADDITIVE_BLEND};
use crate::renderer::primitives::{cone_mesh, sphere_mesh, ProxyMesh};
use crate::renderer::shadows::ShadowLayouts;
use crate::renderer::targets::{FrameTargets, HDR_FORMAT, LIGHT_FORMAT};
use crate::renderer::uniforms::CombineUniform;
use crate::renderer::vertex::ProxyVertex;

const POINT_STRIDE: u64 = mem::size_of::<PointLightInstance>() as u64;
const SPOT_STRIDE: u64 = mem::size_of::<SpotLightInstance>() as u64;
const RANGE_ALIGNMENT: u64 = 16;

/// Blend of both light targets. Every light adds onto the sum.
pub const LIGHT_BLEND: wgpu::BlendState = ADDITIVE_BLEND;
/// Proxy volumes draw their back faces so a camera inside a volume still
/// shades it.
pub const LIGHT_CULL_MODE: Option<wgpu::Face> = Some(wgpu::Face::Front);
/// Light passes have no depth attachment.
pub const LIGHT_DEPTH_STATE: Option<wgpu::DepthStencilState> = None;

/// Where one view's light records live in the instance buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LightRanges {
    pub point_offset: u64,
    pub point_count: u32,
    pub spot_offset: u64,
    pub spot_count: u32,
}

/// Lays out the point and spot records of every view back to back. Returns
/// the ranges and the total byte size.
pub fn plan_light_instances(counts: &[(usize, usize)]) -> (Vec<LightRanges>, u64) {
    let mut cursor = 0;
    let ranges = counts
        .iter()
        .map(|&(points, spots)| {
            let point_offset = round_to_alignment(cursor, RANGE_ALIGNMENT);
            let spot_offset = round_to_alignment(point_offset + points as u64 * POINT_STRIDE, RANGE_ALIGNMENT);
            cursor = spot_offset + spots as u64 * SPOT_STRIDE;
            LightRanges {
                point_offset,
                point_count: points as u32,
                spot_offset,
                spot_count: spots as u32,
            }
        })
        .collect();
    (ranges, cursor)
}

fn gbuffer_entries(start: u32, count: u32) -> impl Iterator<Item = wgpu::BindGroupLayoutEntry> {
    (start..start + count).map(|binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    })
}

fn depth_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn view_entry(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

struct LightPipelines {
    accumulate: wgpu::RenderPipeline,
    gizmo: Option<wgpu::RenderPipeline>,
}

pub struct LightingStage {
    gbuffer_layout: wgpu::BindGroupLayout,
    gbuffer_group: Option<wgpu::BindGroup>,
    bound_targets: u64,
    point: LightPipelines,
    spot: LightPipelines,
    sphere: ProxyMesh,
    cone: ProxyMesh,
    instances: MappedBuffer,
    ranges: Vec<LightRanges>,
}

impl LightingStage {
    pub fn new(
        device: &wgpu::Device,
        camera: &CameraBuffer,
        shadow_layouts: &ShadowLayouts,
        supports_line_mode: bool,
    ) -> Self {
        let entries: Vec<_> = gbuffer_entries(0, 3).chain([depth_entry(3)]).collect();
        let gbuffer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBufferSampleLayout"),
            entries: &entries,
        });

        if !supports_line_mode {
            log::warn!("Adapter lacks POLYGON_MODE_LINE; light gizmos are disabled");
        }

        let build = |kind: ShadowKind, label: &str, source: &'static str| {
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[camera.layout(), &gbuffer_layout, shadow_layouts.light_layout(kind)],
                push_constant_ranges: &[],
            });
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let instance_layout = match kind {
                ShadowKind::Cube => PointLightInstance::layout(),
                ShadowKind::Planar => SpotLightInstance::layout(),
            };
            let base = || {
                PipelineBuilder::new(device, &layout, &shader)
                    .with_vertex_buffer(ProxyVertex::layout())
                    .with_vertex_buffer(instance_layout.clone())
                    .with_color_target(LIGHT_FORMAT, Some(LIGHT_BLEND))
                    .with_color_target(LIGHT_FORMAT, Some(LIGHT_BLEND))
                    .with_cull_mode(LIGHT_CULL_MODE)
                    .with_depth_state(LIGHT_DEPTH_STATE)
            };
            LightPipelines {
                accumulate: base().with_label(label).build(),
                gizmo: supports_line_mode.then(|| {
                    base()
                        .with_label("LightGizmoPipeline")
                        .with_fragment_entry("fs_gizmo")
                        .with_polygon_mode(wgpu::PolygonMode::Line)
                        .with_cull_mode(None)
                        .build()
                }),
            }
        };

        let point = build(ShadowKind::Cube, "PointLightPipeline", include_str!("../shader/point_light.wgsl"));
        let spot = build(ShadowKind::Planar, "SpotLightPipeline", include_str!("../shader/spot_light.wgsl"));

        Self {
            gbuffer_layout,
            gbuffer_group: None,
            bound_targets: u64::MAX,
            point,
            spot,
            sphere: ProxyMesh::new(device, "LightSphere", sphere_mesh(16, 12)),
            cone: ProxyMesh::new(device, "LightCone", cone_mesh(16)),
            instances: MappedBuffer::new("LightInstances", wgpu::BufferUsages::VERTEX),
            ranges: Vec::new(),
        }
    }

    pub fn has_gizmos(&self) -> bool {
        self.point.gizmo.is_some() && self.spot.gizmo.is_some()
    }

    /// Rebuilds the G-buffer bind group after the targets were recreated.
    pub fn prepare_targets(&mut self, device: &wgpu::Device, targets: &FrameTargets) {
        if self.gbuffer_group.is_some() && self.bound_targets == targets.generation() {
            return;
        }
        let gbuffer = &targets.gbuffer;
        self.gbuffer_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBufferSampleGroup"),
            layout: &self.gbuffer_layout,
            entries: &[
                view_entry(0, &gbuffer.diffuse.view),
                view_entry(1, &gbuffer.normal.view),
                view_entry(2, &gbuffer.material.view),
                view_entry(3, &gbuffer.depth.view),
            ],
        }));
        self.bound_targets = targets.generation();
    }

    /// Writes the instance records of every view's lights and uploads them.
    pub fn write_instances(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        views: &[(&[PointLight], &[SpotLight])],
    ) {
        let counts: Vec<_> = views.iter().map(|(points, spots)| (points.len(), spots.len())).collect();
        let (ranges, total) = plan_light_instances(&counts);
        self.ranges = ranges;
        if total == 0 {
            return;
        }
        self.instances.ensure(device, total);
        for ((points, spots), range) in views.iter().zip(&self.ranges) {
            for (i, light) in points.iter().enumerate() {
                light.write_instance_data(self.instances.mapping(range.point_offset + i as u64 * POINT_STRIDE));
            }
            for (i, light) in spots.iter().enumerate() {
                light.write_instance_data(self.instances.mapping(range.spot_offset + i as u64 * SPOT_STRIDE));
            }
        }
        self.instances.flush(queue, BarrierFlags::BUFFER_UPDATE | BarrierFlags::CLIENT_MAPPED);
    }

    /// Opens the accumulation pass. Only the first view clears the targets.
    pub fn begin_pass<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
        targets: &FrameTargets,
        clear: bool,
    ) -> wgpu::RenderPass<'e> {
        let load = if clear {
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
        } else {
            wgpu::LoadOp::Load
        };
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("LightAccumulationPass"),
            color_attachments: &[
                color_attachment(&targets.diffuse_light.view, load),
                color_attachment(&targets.specular_light.view, load),
            ],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    /// Draws one proxy per light of view `view` into an open accumulation
    /// pass, then the wireframe gizmos when requested. Returns the number of
    /// lights drawn.
    #[allow(clippy::too_many_arguments)]
    pub fn encode_view(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        view: usize,
        viewport: &Viewport,
        camera: &CameraBuffer,
        point_lights: &[PointLight],
        spot_lights: &[SpotLight],
        gizmos: bool,
    ) -> u32 {
        let (Some(gbuffer_group), Some(range), Some(instances)) = (
            self.gbuffer_group.as_ref(),
            self.ranges.get(view),
            self.instances.buffer(),
        ) else {
            return 0;
        };

        viewport.apply(pass);
        pass.set_bind_group(0, camera.bind_group(), &[camera.offset(view)]);
        pass.set_bind_group(1, gbuffer_group, &[]);

        let mut drawn = 0;
        let mut passes = vec![false];
        if gizmos && self.has_gizmos() {
            passes.push(true);
        }
        for gizmo in passes {
            if range.point_count > 0 {
                let pipeline = if gizmo { self.point.gizmo.as_ref() } else { Some(&self.point.accumulate) };
                if let Some(pipeline) = pipeline {
                    pass.set_pipeline(pipeline);
                    let end = range.point_offset + range.point_count as u64 * POINT_STRIDE;
                    pass.set_vertex_buffer(0, self.sphere.vertex_buffer.slice(..));
                    pass.set_vertex_buffer(1, instances.slice(range.point_offset..end));
                    pass.set_index_buffer(self.sphere.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    for (i, light) in point_lights.iter().enumerate() {
                        let Some(shadow) = light.shadow_map() else {
                            continue;
                        };
                        pass.set_bind_group(2, shadow.light_group(), &[]);
                        pass.draw_indexed(0..self.sphere.index_count, 0, i as u32..i as u32 + 1);
                        drawn += u32::from(!gizmo);
                    }
                }
            }
            if range.spot_count > 0 {
                let pipeline = if gizmo { self.spot.gizmo.as_ref() } else { Some(&self.spot.accumulate) };
                if let Some(pipeline) = pipeline {
                    pass.set_pipeline(pipeline);
                    let end = range.spot_offset + range.spot_count as u64 * SPOT_STRIDE;
                    pass.set_vertex_buffer(0, self.cone.vertex_buffer.slice(..));
                    pass.set_vertex_buffer(1, instances.slice(range.spot_offset..end));
                    pass.set_index_buffer(self.cone.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    for (i, light) in spot_lights.iter().enumerate() {
                        let Some(shadow) = light.shadow_map() else {
                            continue;
                        };
                        pass.set_bind_group(2, shadow.light_group(), &[]);
                        pass.draw_indexed(0..self.cone.index_count, 0, i as u32..i as u32 + 1);
                        drawn += u32::from(!gizmo);
                    }
                }
            }
        }
        drawn
    }
}

/// Full-screen pass merging the G-buffer with the accumulated light.
pub struct CombineStage {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniform: MappedBuffer,
    bind_group: Option<wgpu::BindGroup>,
    bound_targets: u64,
}

impl CombineStage {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_size = mem::size_of::<CombineUniform>() as u64;
        let entries: Vec<_> = gbuffer_entries(0, 3)
            .chain([depth_entry(3)])
            .chain(gbuffer_entries(4, 2))
            .chain([wgpu::BindGroupLayoutEntry {
                binding: 6,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(uniform_size),
                },
                count: None,
            }])
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CombineLayout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("CombinePipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("CombineShader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../shader/fullscreen.wgsl"),
                    include_str!("../shader/combine.wgsl")
                )
                .into(),
            ),
        });
        let pipeline = PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("CombinePipeline")
            .with_vertex_entry("vs_fullscreen")
            .with_color_target(HDR_FORMAT, None)
            .with_color_target(HDR_FORMAT, None)
            .with_cull_mode(None)
            .build();

        Self {
            pipeline,
            layout,
            uniform: MappedBuffer::with_capacity(device, "CombineUniform", wgpu::BufferUsages::UNIFORM, uniform_size),
            bind_group: None,
            bound_targets: u64::MAX,
        }
    }

    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, targets: &FrameTargets, uniform: &CombineUniform) {
        self.uniform.mapping(0).write(0, uniform);
        self.uniform.flush(queue, BarrierFlags::UNIFORM);

        if self.bind_group.is_some() && self.bound_targets == targets.generation() {
            return;
        }
        let Some(buffer) = self.uniform.buffer() else {
            return;
        };
        let gbuffer = &targets.gbuffer;
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CombineBindGroup"),
            layout: &self.layout,
            entries: &[
                view_entry(0, &gbuffer.diffuse.view),
                view_entry(1, &gbuffer.normal.view),
                view_entry(2, &gbuffer.material.view),
                view_entry(3, &gbuffer.depth.view),
                view_entry(4, &targets.diffuse_light.view),
                view_entry(5, &targets.specular_light.view),
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: buffer.as_entire_binding(),
                },
            ],
        }));
        self.bound_targets = targets.generation();
    }

    /// Writes the HDR and bloom-bright targets.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, targets: &FrameTargets) {
        let Some(bind_group) = self.bind_group.as_ref() else {
            log::warn!("Combine pass skipped: bind group not prepared");
            return;
        };
        let clear = wgpu::LoadOp::Clear(wgpu::Color::BLACK);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("CombinePass"),
            color_attachments: &[
                color_attachment(&targets.hdr.view, clear),
                color_attachment(&targets.bright.view, clear),
            ],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_ranges_do_not_overlap() {
        let (ranges, total) = plan_light_instances(&[(3, 0), (5, 1)]);
        assert_eq!(ranges[0].point_offset, 0);
        assert_eq!(ranges[0].spot_offset, 96);
        assert_eq!(ranges[0].spot_count, 0);
        assert_eq!(ranges[1].point_offset, 96);
        assert_eq!(ranges[1].spot_offset, 96 + 5 * 32);
        assert_eq!(total, 96 + 5 * 32 + 48);
        for range in &ranges {
            assert_eq!(range.point_offset % RANGE_ALIGNMENT, 0);
            assert_eq!(range.spot_offset % RANGE_ALIGNMENT, 0);
        }
    }

    #[test]
    fn no_lights_need_no_buffer() {
        let (ranges, total) = plan_light_instances(&[(0, 0)]);
        assert_eq!(ranges.len(), 1);
        assert_eq!(total, 0);
    }
}
