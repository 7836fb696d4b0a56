// renderer/renderer.rs
use std::sync::Arc;

use image::{GrayImage, RgbaImage};
use winit::dpi::PhysicalSize;

use crate::camera_track::{CameraTrack, TrackAction};
use crate::error::SetupError;
use crate::renderer::assembler::{BatchAssembler, IndirectSlot};
use crate::renderer::gbuffer::{CameraBuffer, LitStage, Viewport, MAX_VIEWS};
use crate::renderer::geometry::{GeometryBuilder, MeshSource, SkinnedMesh, StaticGeometryStore};
use crate::renderer::internal::RenderContext;
use crate::renderer::lighting::{CombineStage, LightingStage};
use crate::renderer::lights::{PointLight, ShadowKind, SpotLight, POINT_SHADOW_FACES};
use crate::renderer::postprocess::{plan_chain, PostProcess};
use crate::renderer::shadows::ShadowStage;
use crate::renderer::targets::{FrameTargets, TargetExtent};
use crate::renderer::terrain::TerrainStage;
use crate::renderer::textures::{EnvironmentMap, TextureRegistry};
use crate::renderer::uniforms::{CameraUniform, CombineUniform, PostUniform, PostView};
use crate::scene::{Camera, Graph, NodeId, Visibility};
use crate::settings::{DebugView, RenderSettings};
use crate::time::FrameInfo;

const ENVIRONMENT_SIZE: u32 = 128;

/// One camera looking at its own graph and lit by its own lights.
pub struct SceneView {
    pub graph: Graph,
    pub camera: Camera,
    pub point_lights: Vec<PointLight>,
    pub spot_lights: Vec<SpotLight>,
}

impl SceneView {
    pub fn new(graph: Graph, camera: Camera) -> Self {
        Self {
            graph,
            camera,
            point_lights: Vec::new(),
            spot_lights: Vec::new(),
        }
    }

    pub fn light_count(&self) -> usize {
        self.point_lights.len() + self.spot_lights.len()
    }
}

/// Indirect slots a frame needs: one per view, then one per shadow light.
pub fn pass_slot_count(views: &[SceneView]) -> u32 {
    (views.len() + views.iter().map(SceneView::light_count).sum::<usize>()) as u32
}

/// Renderer-owned switches read by the passes every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameConfig {
    pub ambient: [f32; 3],
    pub debug_view: DebugView,
    pub show_gizmos: bool,
    pub bloom: bool,
    pub skybox: bool,
    pub reflections: bool,
    pub fxaa: bool,
    /// Width share of the right view.
    pub split_ratio: f32,
}

impl FrameConfig {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            ambient: settings.ambient,
            debug_view: settings.debug_view,
            show_gizmos: settings.show_gizmos,
            bloom: settings.bloom,
            skybox: settings.skybox,
            reflections: settings.reflections,
            fxaa: settings.fxaa,
            split_ratio: 0.0,
        }
    }

    /// Optional post effects in chain order.
    pub fn post_effects(&self) -> [bool; 3] {
        [self.skybox, self.reflections, self.fxaa]
    }

    /// Applies a fired track action that touches configuration. Returns
    /// `false` for actions that target the scene instead.
    pub fn apply(&mut self, action: TrackAction, local_time: f32, duration: f32) -> bool {
        match action {
            TrackAction::SetSplitRatio { from, to } => {
                self.split_ratio = TrackAction::split_ratio_at(from, to, local_time, duration);
            }
            TrackAction::SetBloom(on) => self.bloom = on,
            TrackAction::SetGizmos(on) => self.show_gizmos = on,
            TrackAction::SetPostEffect { index, enabled } => match index {
                0 => self.skybox = enabled,
                1 => self.reflections = enabled,
                2 => self.fxaa = enabled,
                _ => log::warn!("No post effect at index {}", index),
            },
            TrackAction::SetFrame { .. } => return false,
        }
        true
    }
}

/// Counters of the last rendered frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub skinned_vertices: u32,
    pub lit_draws: u32,
    pub shadow_draws: u32,
    pub lights: u32,
    pub reallocations: u32,
}

/// Upload access handed to the scene constructor before the static store is
/// built.
pub struct SceneAssets<'a> {
    context: &'a RenderContext,
    textures: &'a mut TextureRegistry,
    geometry: &'a mut GeometryBuilder,
    terrain: &'a mut TerrainStage,
}

impl SceneAssets<'_> {
    pub fn add_texture(&mut self, label: &str, image: &RgbaImage) -> Result<u32, SetupError> {
        self.textures
            .add(&self.context.device, &self.context.queue, label, image)
    }

    pub fn add_mesh(&mut self, source: MeshSource) -> Result<Arc<SkinnedMesh>, SetupError> {
        self.geometry.add(source)
    }

    pub fn add_heightmap(&mut self, heights: &GrayImage) -> usize {
        self.terrain
            .add_heightmap(&self.context.device, &self.context.queue, heights)
    }
}

pub struct Renderer {
    context: RenderContext,
    settings: RenderSettings,
    config: FrameConfig,
    views: Vec<SceneView>,
    track: Option<CameraTrack>,
    camera: CameraBuffer,
    textures: TextureRegistry,
    store: StaticGeometryStore,
    assembler: BatchAssembler,
    lit: LitStage,
    terrain: TerrainStage,
    shadows: ShadowStage,
    lighting: LightingStage,
    combine: CombineStage,
    postprocess: PostProcess,
    targets: FrameTargets,
    stats: RenderStats,
}

impl Renderer {
    /// Builds every stage, lets `build_scene` register its assets and views,
    /// then uploads the static store and attaches the shadow maps.
    pub fn new<F>(context: RenderContext, settings: RenderSettings, build_scene: F) -> Result<Self, SetupError>
    where
        F: FnOnce(&mut SceneAssets<'_>) -> Result<Vec<SceneView>, SetupError>,
    {
        let device = &context.device;
        let camera = CameraBuffer::new(device, context.uniform_alignment())?;
        let mut textures = TextureRegistry::new(device, &context.queue);
        let mut terrain = TerrainStage::new(device, camera.layout(), context.uniform_alignment());
        let mut geometry = GeometryBuilder::new();

        let mut views = build_scene(&mut SceneAssets {
            context: &context,
            textures: &mut textures,
            geometry: &mut geometry,
            terrain: &mut terrain,
        })?;
        if views.is_empty() {
            return Err(SetupError::Resource("scene has no views".into()));
        }
        if views.len() > MAX_VIEWS {
            log::warn!("Only {} views are supported, dropping {}", MAX_VIEWS, views.len() - MAX_VIEWS);
            views.truncate(MAX_VIEWS);
        }

        let device = &context.device;
        textures.prepare(device);
        let store = StaticGeometryStore::upload(&context, &geometry);

        let shadows = ShadowStage::new(device, context.uniform_alignment());
        for view in &mut views {
            for light in &mut view.point_lights {
                light.attach_shadow_map(device, settings.shadow_map_size, shadows.layouts())?;
            }
            for light in &mut view.spot_lights {
                light.attach_shadow_map(device, settings.shadow_map_size, shadows.layouts())?;
            }
        }

        let assembler = BatchAssembler::new(&context, &settings);
        let lit = LitStage::new(
            device,
            camera.layout(),
            assembler.texture_sets_layout(),
            textures.layout(),
        );
        let lighting = LightingStage::new(device, &camera, shadows.layouts(), context.supports_line_mode);
        let combine = CombineStage::new(device);
        let environment = EnvironmentMap::procedural(device, &context.queue, ENVIRONMENT_SIZE);
        let postprocess = PostProcess::new(device, context.surface_format(), environment);
        let targets = FrameTargets::new(device, TargetExtent::new(context.config.width, context.config.height));

        log::info!(
            "Renderer ready: {} views, {} lights, {} textures",
            views.len(),
            views.iter().map(SceneView::light_count).sum::<usize>(),
            textures.len()
        );

        Ok(Self {
            config: FrameConfig::from_settings(&settings),
            settings,
            views,
            track: None,
            camera,
            textures,
            store,
            assembler,
            lit,
            terrain,
            shadows,
            lighting,
            combine,
            postprocess,
            targets,
            stats: RenderStats::default(),
            context,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FrameConfig {
        &mut self.config
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn views(&self) -> &[SceneView] {
        &self.views
    }

    pub fn views_mut(&mut self) -> &mut [SceneView] {
        &mut self.views
    }

    pub fn set_camera_track(&mut self, track: Option<CameraTrack>) {
        self.track = track;
    }

    pub fn has_camera_track(&self) -> bool {
        self.track.is_some()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    /// Advances the camera track, animations and transforms.
    pub fn update(&mut self, frame: &FrameInfo) {
        if let Some(track) = self.track.as_mut() {
            for fired in track.update(frame.frame_delta) {
                if self.config.apply(fired.action, fired.local_time, fired.duration) {
                    continue;
                }
                if let TrackAction::SetFrame { view, node, frame } = fired.action {
                    set_node_frame(&mut self.views, view, node, frame);
                }
            }
            let (position, rotation) = (track.position(), track.rotation());
            for view in &mut self.views {
                view.camera.set_pose(position, rotation);
            }
        }

        for view in &mut self.views {
            view.graph.update(frame);
        }
    }

    /// Recreates every size-dependent target. Zero sizes are ignored.
    pub fn on_window_resize(&mut self, new_size: PhysicalSize<u32>) {
        if !self.context.resize(new_size) {
            return;
        }
        log::info!("Window resized to {}x{}", new_size.width, new_size.height);
        let mut extent = self.targets.extent();
        if !extent.resize(new_size.width, new_size.height) {
            return;
        }
        self.targets = FrameTargets::new(&self.context.device, extent);
        debug_assert!(self.targets.matches(new_size.width, new_size.height));
    }

    /// Records and submits one frame. Lost or outdated surfaces are
    /// reconfigured and the frame is skipped; only unrecoverable surface
    /// errors are returned.
    pub fn render(&mut self, frame: &FrameInfo) -> Result<(), wgpu::SurfaceError> {
        let output = match self.context.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated, reconfiguring");
                self.context.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timed out, skipping frame");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let surface_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let Self {
            context,
            config,
            views,
            camera,
            textures,
            store,
            assembler,
            lit,
            terrain,
            shadows,
            lighting,
            combine,
            postprocess,
            targets,
            stats,
            settings,
            ..
        } = self;
        let device = &context.device;
        let queue = &context.queue;
        let (width, height) = targets.size();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("FrameEncoder"),
        });
        let mut frame_stats = RenderStats::default();

        // Cameras
        let viewports = Viewport::split(width, height, config.split_ratio);
        let mut post_views = Vec::with_capacity(MAX_VIEWS);
        for (index, (view, viewport)) in views.iter().zip(viewports).enumerate() {
            let Some(viewport) = viewport else {
                continue;
            };
            let uniform = CameraUniform::from_matrix(
                view.camera.view_proj(viewport.aspect()),
                view.camera.position(),
                viewport.to_vec4(),
                (width, height),
            );
            camera.write(index, &uniform);
            post_views.push(PostView::from_camera(&uniform));
        }
        camera.flush(queue);

        // Skinning and shared instance data
        let pass_slots = pass_slot_count(views);
        let setup = {
            let mut graphs: Vec<&mut Graph> = views.iter_mut().map(|view| &mut view.graph).collect();
            assembler.setup_batches(context, &mut encoder, store, &mut graphs, pass_slots)
        };
        frame_stats.skinned_vertices = setup.skinned_vertices;

        {
            let graphs: Vec<&Graph> = views.iter().map(|view| &view.graph).collect();
            terrain.prepare(device, queue, &graphs, frame.elapsed);
        }
        textures.prepare(device);

        // Lit pass per view
        let mut first = true;
        for (index, (view, viewport)) in views.iter().zip(viewports).enumerate() {
            let Some(viewport) = viewport else {
                continue;
            };
            let visibility = Visibility::Frustum(view.camera.frustum(viewport.aspect()));
            let lists = view.graph.build_node_lists(&visibility, view.camera.position());
            let slot = assembler.write_pass(index as u32, |writer| {
                view.graph.write_batched_draws(&lists.lit, writer);
            });

            let mut pass = targets.gbuffer.begin_pass(&mut encoder, first);
            first = false;
            viewport.apply(&mut pass);
            frame_stats.lit_draws += encode_batch(&mut pass, lit, assembler, store, camera, textures, index, slot);
            frame_stats.lit_draws += terrain.draw(
                &mut pass,
                index,
                &lists.lit,
                camera.bind_group(),
                camera.offset(index),
            );
        }

        // Shadows
        let near = settings.light_near;
        let mut slot_index = views.len() as u32;
        for view in views.iter_mut() {
            let SceneView {
                graph,
                point_lights,
                spot_lights,
                ..
            } = view;
            for light in point_lights.iter_mut() {
                let visibility = light.shadow_visibility();
                let slot = assembler.write_pass(slot_index, |writer| graph.render_depth_only(&visibility, writer));
                slot_index += 1;
                let pipeline = shadows.pipeline(ShadowKind::Cube);
                let batch: &BatchAssembler = assembler;
                light.render_shadow_map(queue, &mut encoder, near, |pass| {
                    pass.set_pipeline(pipeline);
                    if batch.bind_batch(pass, store) {
                        batch.draw_slot(pass, slot);
                    }
                });
                frame_stats.shadow_draws += slot.count * POINT_SHADOW_FACES as u32;
            }
            for light in spot_lights.iter_mut() {
                let visibility = light.shadow_visibility(near);
                let slot = assembler.write_pass(slot_index, |writer| graph.render_depth_only(&visibility, writer));
                slot_index += 1;
                let pipeline = shadows.pipeline(ShadowKind::Planar);
                let batch: &BatchAssembler = assembler;
                light.render_shadow_map(queue, &mut encoder, near, |pass| {
                    pass.set_pipeline(pipeline);
                    if batch.bind_batch(pass, store) {
                        batch.draw_slot(pass, slot);
                    }
                });
                frame_stats.shadow_draws += slot.count;
            }
        }

        // Light accumulation
        let lights: Vec<(&[PointLight], &[SpotLight])> = views
            .iter()
            .map(|view| (view.point_lights.as_slice(), view.spot_lights.as_slice()))
            .collect();
        lighting.write_instances(device, queue, &lights);
        lighting.prepare_targets(device, targets);
        {
            let mut pass = lighting.begin_pass(&mut encoder, targets, true);
            for (index, ((points, spots), viewport)) in lights.iter().zip(viewports).enumerate() {
                let Some(viewport) = viewport else {
                    continue;
                };
                frame_stats.lights +=
                    lighting.encode_view(&mut pass, index, &viewport, camera, points, spots, config.show_gizmos);
            }
        }

        // Combine and post
        combine.prepare(device, queue, targets, &CombineUniform::new(config.ambient, config.debug_view));
        combine.encode(&mut encoder, targets);

        let encode_gamma = !context.config.format.is_srgb();
        postprocess.update_uniform(queue, &PostUniform::new(&post_views, (width, height), encode_gamma));
        let plan = plan_chain(config.bloom, config.post_effects());
        postprocess.execute(device, &mut encoder, targets, &plan, &surface_view);

        assembler.flush(queue);
        queue.submit(Some(encoder.finish()));
        output.present();

        frame_stats.reallocations = assembler.reallocations();
        log::debug!(
            "Frame {}: {} skinned vertices, {} lit draws, {} shadow draws, {} lights, {} reallocations",
            frame.frame_index,
            frame_stats.skinned_vertices,
            frame_stats.lit_draws,
            frame_stats.shadow_draws,
            frame_stats.lights,
            frame_stats.reallocations
        );
        *stats = frame_stats;
        Ok(())
    }
}

/// Binds the batch and issues the view's multi-draw. Returns the number of
/// commands drawn.
#[allow(clippy::too_many_arguments)]
fn encode_batch(
    pass: &mut wgpu::RenderPass<'_>,
    lit: &LitStage,
    assembler: &BatchAssembler,
    store: &StaticGeometryStore,
    camera: &CameraBuffer,
    textures: &TextureRegistry,
    view: usize,
    slot: IndirectSlot,
) -> u32 {
    let (Some(texture_sets), Some(texture_array)) = (assembler.texture_sets_group(), textures.bind_group())
    else {
        return 0;
    };
    if slot.is_empty() {
        return 0;
    }
    pass.set_pipeline(lit.pipeline());
    pass.set_bind_group(0, camera.bind_group(), &[camera.offset(view)]);
    pass.set_bind_group(1, texture_sets, &[]);
    pass.set_bind_group(2, texture_array, &[]);
    if !assembler.bind_batch(pass, store) {
        return 0;
    }
    assembler.draw_slot(pass, slot);
    slot.count
}

/// Applies a scripted frame jump to node `node` of view `view`.
pub fn set_node_frame(views: &mut [SceneView], view: usize, node: usize, frame: i32) {
    let Some(scene) = views.get_mut(view) else {
        log::warn!("Track targets missing view {}", view);
        return;
    };
    match scene
        .graph
        .get_mut(NodeId(node))
        .and_then(|node| node.as_mesh_mut())
    {
        Some(mesh) => mesh.set_frame(frame),
        None => log::warn!("Track targets node {} of view {}, which is not a mesh", node, view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    fn view_with_lights(points: usize, spots: usize) -> SceneView {
        let mut view = SceneView::new(Graph::new(), Camera::default());
        for i in 0..points {
            view.point_lights
                .push(PointLight::new(Vec3::X * i as f32, Vec4::ONE, 100.0));
        }
        for _ in 0..spots {
            view.spot_lights
                .push(SpotLight::new(Vec3::ZERO, Vec3::X, Vec4::ONE, 500.0));
        }
        view
    }

    #[test]
    fn every_view_and_light_gets_a_slot() {
        let views = [view_with_lights(3, 0), view_with_lights(5, 1)];
        assert_eq!(pass_slot_count(&views), 2 + 3 + 6);
        assert_eq!(pass_slot_count(&[]), 0);
    }

    #[test]
    fn track_actions_update_config() {
        let mut config = FrameConfig::from_settings(&RenderSettings::default());
        assert!(config.apply(TrackAction::SetBloom(false), 0.0, 0.0));
        assert!(!config.bloom);
        assert!(config.apply(TrackAction::SetSplitRatio { from: 0.0, to: 0.5 }, 0.5, 0.5));
        assert_eq!(config.split_ratio, 0.5);
        assert!(!config.apply(
            TrackAction::SetFrame {
                view: 0,
                node: 0,
                frame: 1
            },
            0.0,
            0.0
        ));
    }

    #[test]
    fn frame_jumps_to_missing_nodes_are_ignored() {
        let mut views = vec![view_with_lights(0, 0)];
        set_node_frame(&mut views, 0, 7, 3);
        set_node_frame(&mut views, 4, 0, 3);
        assert!(views[0].graph.is_empty());
    }
}
