// renderer/terrain.rs
//! Heightmap and water surfaces. Both are drawn outside the shared batch, one
//! draw per node, straight into the G-buffer.

use std::collections::HashMap;
use std::mem;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use image::GrayImage;

use crate::renderer::gbuffer::{GBuffer, DEPTH_FORMAT};
use crate::renderer::layout::round_to_alignment;
use crate::renderer::mapping::{BarrierFlags, MappedBuffer};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::textures::Texture;
use crate::scene::{Graph, HeightmapNode, NodeEntry, NodeId, NodeKind, WaterNode};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct TerrainUniform {
    pub model: [[f32; 4]; 4],
    /// size, height scale, chunks per side, quads per chunk side.
    pub params: [f32; 4],
}

impl TerrainUniform {
    pub fn new(model: Mat4, node: &HeightmapNode) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            params: [
                node.size,
                node.height_scale,
                node.chunks.max(1) as f32,
                node.chunk_resolution.max(1) as f32,
            ],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct WaterUniform {
    pub model: [[f32; 4]; 4],
    /// half size, y level, uv scale, time.
    pub params: [f32; 4],
}

impl WaterUniform {
    pub fn new(model: Mat4, node: &WaterNode, time: f32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            params: [node.size, node.y_level, node.uv_scale, time],
        }
    }
}

/// One surface draw resolved from the scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SurfaceRecord {
    Terrain {
        terrain: usize,
        vertices: u32,
        instances: u32,
        uniform: TerrainUniform,
    },
    Water(WaterUniform),
}

/// Surfaces of every graph in traversal order, keyed by graph index.
pub fn plan_surfaces(graphs: &[&Graph], time: f32) -> Vec<(usize, NodeId, SurfaceRecord)> {
    let mut records = Vec::new();
    for (graph_index, graph) in graphs.iter().enumerate() {
        for id in graph.traversal() {
            let node = graph.node(id);
            let record = match &node.kind {
                NodeKind::Heightmap(heightmap) => {
                    let resolution = heightmap.chunk_resolution.max(1);
                    let chunks = heightmap.chunks.max(1);
                    SurfaceRecord::Terrain {
                        terrain: heightmap.terrain,
                        vertices: resolution * resolution * 6,
                        instances: chunks * chunks,
                        uniform: TerrainUniform::new(node.world(), heightmap),
                    }
                }
                NodeKind::Water(water) => SurfaceRecord::Water(WaterUniform::new(node.world(), water, time)),
                NodeKind::Group | NodeKind::Mesh(_) => continue,
            };
            records.push((graph_index, id, record));
        }
    }
    records
}

struct PlannedSurface {
    offset: u32,
    record: SurfaceRecord,
}

pub struct TerrainStage {
    terrain_pipeline: wgpu::RenderPipeline,
    water_pipeline: wgpu::RenderPipeline,
    terrain_layout: wgpu::BindGroupLayout,
    water_layout: wgpu::BindGroupLayout,
    uniforms: MappedBuffer,
    stride: u64,
    heightmaps: Vec<Texture>,
    height_sampler: wgpu::Sampler,
    terrain_groups: Vec<wgpu::BindGroup>,
    water_group: Option<wgpu::BindGroup>,
    bound_generation: u64,
    planned: HashMap<(usize, NodeId), PlannedSurface>,
}

impl TerrainStage {
    pub fn new(device: &wgpu::Device, camera_layout: &wgpu::BindGroupLayout, uniform_alignment: u64) -> Self {
        let record_size = mem::size_of::<TerrainUniform>().max(mem::size_of::<WaterUniform>()) as u64;
        let uniform_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(record_size),
            },
            count: None,
        };

        let terrain_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("TerrainLayout"),
            entries: &[
                uniform_entry,
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let water_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("WaterLayout"),
            entries: &[uniform_entry],
        });

        let build = |label: &str, layout: &wgpu::BindGroupLayout, source: &'static str| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[camera_layout, layout],
                push_constant_ranges: &[],
            });
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let mut builder = PipelineBuilder::new(device, &pipeline_layout, &shader)
                .with_label(label)
                .with_depth_stencil(DEPTH_FORMAT, true, wgpu::CompareFunction::Less);
            for format in GBuffer::color_formats() {
                builder = builder.with_color_target(format, None);
            }
            builder.build()
        };
        let terrain_pipeline = build("TerrainPipeline", &terrain_layout, include_str!("../shader/terrain.wgsl"));
        let water_pipeline = build("WaterPipeline", &water_layout, include_str!("../shader/water.wgsl"));

        let height_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("HeightSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            terrain_pipeline,
            water_pipeline,
            terrain_layout,
            water_layout,
            uniforms: MappedBuffer::new("SurfaceUniforms", wgpu::BufferUsages::UNIFORM),
            stride: round_to_alignment(record_size, uniform_alignment),
            heightmaps: Vec::new(),
            height_sampler,
            terrain_groups: Vec::new(),
            water_group: None,
            bound_generation: 0,
            planned: HashMap::new(),
        }
    }

    /// Uploads a height texture and returns the index heightmap nodes refer to.
    pub fn add_heightmap(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, heights: &GrayImage) -> usize {
        let index = self.heightmaps.len();
        let label = format!("Heightmap{index}");
        self.heightmaps.push(Texture::from_gray(device, queue, &label, heights));
        // groups are rebuilt on the next prepare
        self.terrain_groups.clear();
        log::info!(
            "Uploaded heightmap {} ({}x{})",
            index,
            heights.width(),
            heights.height()
        );
        index
    }

    /// Writes the uniforms of every surface in `graphs` and refreshes the
    /// bind groups if the uniform buffer moved.
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, graphs: &[&Graph], time: f32) {
        let records = plan_surfaces(graphs, time);
        self.planned.clear();
        if records.is_empty() {
            return;
        }

        self.uniforms.ensure(device, records.len() as u64 * self.stride);
        for (slot, (graph_index, id, record)) in records.into_iter().enumerate() {
            let offset = slot as u64 * self.stride;
            let mut mapping = self.uniforms.mapping(offset);
            match &record {
                SurfaceRecord::Terrain { uniform, .. } => mapping.write(0, uniform),
                SurfaceRecord::Water(uniform) => mapping.write(0, uniform),
            };
            self.planned.insert(
                (graph_index, id),
                PlannedSurface {
                    offset: offset as u32,
                    record,
                },
            );
        }
        self.uniforms.flush(queue, BarrierFlags::UNIFORM);
        self.rebuild_groups(device);
    }

    fn rebuild_groups(&mut self, device: &wgpu::Device) {
        let generation = self.uniforms.generation();
        let stale = generation != self.bound_generation || self.terrain_groups.len() != self.heightmaps.len();
        if !stale && self.water_group.is_some() {
            return;
        }
        let Some(buffer) = self.uniforms.buffer() else {
            return;
        };
        let uniform = wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: NonZeroU64::new(mem::size_of::<TerrainUniform>() as u64),
            }),
        };

        self.terrain_groups = self
            .heightmaps
            .iter()
            .map(|heights| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("TerrainBindGroup"),
                    layout: &self.terrain_layout,
                    entries: &[
                        uniform.clone(),
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&heights.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&self.height_sampler),
                        },
                    ],
                })
            })
            .collect();
        self.water_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("WaterBindGroup"),
            layout: &self.water_layout,
            entries: &[uniform],
        }));
        self.bound_generation = generation;
    }

    /// Draws the visible surfaces of graph `graph_index` into an open
    /// G-buffer pass. Returns the number of draws.
    pub fn draw(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        graph_index: usize,
        entries: &[NodeEntry],
        camera_group: &wgpu::BindGroup,
        camera_offset: u32,
    ) -> u32 {
        let mut draws = 0;
        for entry in entries {
            let Some(surface) = self.planned.get(&(graph_index, entry.id)) else {
                continue;
            };
            match surface.record {
                SurfaceRecord::Terrain {
                    terrain,
                    vertices,
                    instances,
                    ..
                } => {
                    let Some(group) = self.terrain_groups.get(terrain) else {
                        log::warn!("Heightmap node refers to missing terrain {}", terrain);
                        continue;
                    };
                    pass.set_pipeline(&self.terrain_pipeline);
                    pass.set_bind_group(0, camera_group, &[camera_offset]);
                    pass.set_bind_group(1, group, &[surface.offset]);
                    pass.draw(0..vertices, 0..instances);
                }
                SurfaceRecord::Water(_) => {
                    let Some(group) = self.water_group.as_ref() else {
                        continue;
                    };
                    pass.set_pipeline(&self.water_pipeline);
                    pass.set_bind_group(0, camera_group, &[camera_offset]);
                    pass.set_bind_group(1, group, &[surface.offset]);
                    pass.draw(0..6, 0..1);
                }
            }
            draws += 1;
        }
        draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Node;

    #[test]
    fn surfaces_are_planned_per_graph() {
        let mut left = Graph::new();
        left.add_root(Node::new(
            "terrain",
            NodeKind::Heightmap(HeightmapNode {
                terrain: 0,
                size: 500.0,
                height_scale: 80.0,
                chunks: 4,
                chunk_resolution: 16,
            }),
        ));
        left.add_root(Node::new("group", NodeKind::Group));
        let mut right = Graph::new();
        right.add_root(Node::new(
            "water",
            NodeKind::Water(WaterNode {
                size: 100.0,
                y_level: 5.0,
                uv_scale: 4.0,
            }),
        ));

        let records = plan_surfaces(&[&left, &right], 2.5);
        assert_eq!(records.len(), 2);
        match records[0] {
            (0, _, SurfaceRecord::Terrain { vertices, instances, .. }) => {
                assert_eq!(vertices, 16 * 16 * 6);
                assert_eq!(instances, 16);
            }
            other => panic!("unexpected record {other:?}"),
        }
        match records[1] {
            (1, _, SurfaceRecord::Water(uniform)) => assert_eq!(uniform.params, [100.0, 5.0, 4.0, 2.5]),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn surface_records_share_one_stride() {
        assert_eq!(mem::size_of::<TerrainUniform>(), 80);
        assert_eq!(mem::size_of::<WaterUniform>(), 80);
    }
}
