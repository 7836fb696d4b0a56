// renderer/postprocess/mod.rs
//! Full-screen effects ping-ponging between two HDR targets, ending in a
//! tonemapped blit to the surface.

mod chain;

pub use chain::{plan_chain, ChainPlan, ChainStep, Effect, Source};

use std::collections::HashMap;
use std::mem;
use std::num::NonZeroU64;

use crate::renderer::gbuffer::color_attachment;
use crate::renderer::mapping::{BarrierFlags, MappedBuffer};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::targets::{FrameTargets, HDR_FORMAT};
use crate::renderer::textures::EnvironmentMap;
use crate::renderer::uniforms::PostUniform;

type GroupKey = (Source, Option<Source>);

pub struct PostProcess {
    layout: wgpu::BindGroupLayout,
    pipelines: HashMap<Effect, wgpu::RenderPipeline>,
    blit_pipeline: wgpu::RenderPipeline,
    uniform: MappedBuffer,
    sampler: wgpu::Sampler,
    environment: EnvironmentMap,
    bind_groups: HashMap<GroupKey, wgpu::BindGroup>,
    bound_targets: u64,
}

impl PostProcess {
    pub fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat, environment: EnvironmentMap) -> Self {
        let texture = |binding, sample_type, view_dimension| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        };
        let filterable = wgpu::TextureSampleType::Float { filterable: true };
        let unfiltered = wgpu::TextureSampleType::Float { filterable: false };
        let d2 = wgpu::TextureViewDimension::D2;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PostProcessLayout"),
            entries: &[
                texture(0, filterable, d2),
                texture(1, filterable, d2),
                texture(2, wgpu::TextureSampleType::Depth, d2),
                texture(3, unfiltered, d2),
                texture(4, unfiltered, d2),
                texture(5, filterable, wgpu::TextureViewDimension::Cube),
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 7,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(mem::size_of::<PostUniform>() as u64),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PostProcessPipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("PostProcessShader"),
            source: wgpu::ShaderSource::Wgsl(
                concat!(
                    include_str!("../../shader/fullscreen.wgsl"),
                    include_str!("../../shader/postprocess.wgsl")
                )
                .into(),
            ),
        });
        let build = |entry: &str, format| {
            PipelineBuilder::new(device, &pipeline_layout, &shader)
                .with_label(entry)
                .with_vertex_entry("vs_fullscreen")
                .with_fragment_entry(entry)
                .with_color_target(format, None)
                .with_cull_mode(None)
                .build()
        };

        let pipelines = Effect::ALL
            .into_iter()
            .map(|effect| (effect, build(effect.entry_point(), HDR_FORMAT)))
            .collect();
        let blit_pipeline = build("fs_blit", surface_format);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("PostProcessSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            layout,
            pipelines,
            blit_pipeline,
            uniform: MappedBuffer::with_capacity(
                device,
                "PostProcessUniform",
                wgpu::BufferUsages::UNIFORM,
                mem::size_of::<PostUniform>() as u64,
            ),
            sampler,
            environment,
            bind_groups: HashMap::new(),
            bound_targets: u64::MAX,
        }
    }

    pub fn update_uniform(&mut self, queue: &wgpu::Queue, uniform: &PostUniform) {
        self.uniform.mapping(0).write(0, uniform);
        self.uniform.flush(queue, BarrierFlags::UNIFORM);
    }

    fn mark_bind_groups_dirty(&mut self) {
        self.bind_groups.clear();
    }

    fn source_view(targets: &FrameTargets, source: Source) -> &wgpu::TextureView {
        match source {
            Source::Hdr => &targets.hdr.view,
            Source::Bright => &targets.bright.view,
            Source::Target(index) => &targets.ping_pong[index & 1].view,
        }
    }

    /// Creates the bind groups `plan` needs that are not cached yet.
    fn ensure_cached_bind_groups(&mut self, device: &wgpu::Device, targets: &FrameTargets, plan: &ChainPlan) {
        if self.bound_targets != targets.generation() {
            self.mark_bind_groups_dirty();
            self.bound_targets = targets.generation();
        }
        let Some(uniform) = self.uniform.buffer() else {
            return;
        };

        let keys = plan
            .draws()
            .map(|(_, source, secondary, _)| (source, secondary))
            .chain([(Source::Target(plan.bound), None)]);
        for key in keys {
            if self.bind_groups.contains_key(&key) {
                continue;
            }
            let (source, secondary) = key;
            let gbuffer = &targets.gbuffer;
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("PostProcessBindGroup"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(Self::source_view(targets, source)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(Self::source_view(
                            targets,
                            secondary.unwrap_or(source),
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&gbuffer.depth.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&gbuffer.normal.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::TextureView(&gbuffer.material.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(&self.environment.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: uniform.as_entire_binding(),
                    },
                ],
            });
            self.bind_groups.insert(key, group);
        }
    }

    /// Runs `plan` over the ping-pong targets and blits the result into
    /// `output`. Returns the number of effect draws.
    pub fn execute(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        targets: &FrameTargets,
        plan: &ChainPlan,
        output: &wgpu::TextureView,
    ) -> u32 {
        self.ensure_cached_bind_groups(device, targets, plan);

        let mut draws = 0;
        for (effect, source, secondary, target) in plan.draws() {
            let (Some(pipeline), Some(group)) = (
                self.pipelines.get(&effect),
                self.bind_groups.get(&(source, secondary)),
            ) else {
                log::warn!("Skipping {:?}: pipeline or bind group missing", effect);
                continue;
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(effect.entry_point()),
                color_attachments: &[color_attachment(
                    &targets.ping_pong[target & 1].view,
                    wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                )],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.draw(0..3, 0..1);
            draws += 1;
        }

        match self.bind_groups.get(&(Source::Target(plan.bound), None)) {
            Some(group) => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("BlitPass"),
                    color_attachments: &[color_attachment(output, wgpu::LoadOp::Clear(wgpu::Color::BLACK))],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.blit_pipeline);
                pass.set_bind_group(0, group, &[]);
                pass.draw(0..3, 0..1);
            }
            None => log::warn!("Blit skipped: no bind group for target {}", plan.bound),
        }
        draws
    }
}
