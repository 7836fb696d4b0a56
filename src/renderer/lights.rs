// src/renderer/lights.rs
//! Shadow-casting point and spot lights.
//!
//! Shadow maps use reverse-Z: the projection maps the light's near plane to
//! depth 1 and its radius to 0, and the shadow shaders write the linear value
//! `1 - distance / radius`. Targets clear to 0 and keep the greatest depth.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3, Vec4};

use crate::error::SetupError;
use crate::renderer::mapping::{BarrierFlags, MappedBuffer, MappingRef};
use crate::renderer::shadows::ShadowLayouts;
use crate::scene::{Frustum, Visibility};

pub const POINT_SHADOW_FACES: usize = 6;
pub const SHADOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Cube face look directions, in layer order.
pub const FACE_DIRECTIONS: [Vec3; POINT_SHADOW_FACES] = [
    Vec3::X,
    Vec3::NEG_X,
    Vec3::Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
];

fn face_up(face: usize) -> Vec3 {
    if face == 2 || face == 3 {
        Vec3::Z
    } else {
        Vec3::NEG_Y
    }
}

/// Directions this close to `±Y` need another up vector for a stable basis.
fn is_near_vertical(direction: Vec3) -> bool {
    direction.y.abs() > 0.999
}

/// 90 degree square projection with reversed depth.
pub fn shadow_projection(radius: f32, near: f32) -> Mat4 {
    Mat4::perspective_rh(90f32.to_radians(), 1.0, radius, near)
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct PointLightInstance {
    pub position: [f32; 3],
    pub radius: f32,
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct SpotLightInstance {
    pub position: [f32; 3],
    pub radius: f32,
    pub color: [f32; 4],
    pub direction: [f32; 3],
    pub _padding: f32,
}

impl PointLightInstance {
    /// Proxy vertices use location 0.
    pub const ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![
        1 => Float32x4,
        2 => Float32x4
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

impl SpotLightInstance {
    pub const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        1 => Float32x4,
        2 => Float32x4,
        3 => Float32x4
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct PointLightUniform {
    pub shadow_matrices: [[[f32; 4]; 4]; POINT_SHADOW_FACES],
    pub position: [f32; 3],
    pub radius: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct SpotLightUniform {
    pub shadow_matrix: [[f32; 4]; 4],
    pub position: [f32; 3],
    pub radius: f32,
    pub direction: [f32; 3],
    pub _padding: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowKind {
    /// Six layers, one per cube face.
    Cube,
    Planar,
}

impl ShadowKind {
    pub fn layers(self) -> u32 {
        match self {
            ShadowKind::Cube => POINT_SHADOW_FACES as u32,
            ShadowKind::Planar => 1,
        }
    }
}

/// Depth target, matrix buffer and bind groups owned by one light.
pub struct ShadowMap {
    kind: ShadowKind,
    _texture: wgpu::Texture,
    layer_views: Vec<wgpu::TextureView>,
    uniform: MappedBuffer,
    shadow_group: wgpu::BindGroup,
    light_group: wgpu::BindGroup,
    face_stride: u64,
}

impl ShadowMap {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        kind: ShadowKind,
        size: u32,
        layouts: &ShadowLayouts,
    ) -> Result<Self, SetupError> {
        let layers = kind.layers();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHADOW_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let layer_views = (0..layers)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("{label}Layer{layer}")),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{label}SampleView")),
            dimension: Some(match kind {
                ShadowKind::Cube => wgpu::TextureViewDimension::D2Array,
                ShadowKind::Planar => wgpu::TextureViewDimension::D2,
            }),
            array_layer_count: Some(layers),
            ..Default::default()
        });

        let uniform_size = match kind {
            ShadowKind::Cube => std::mem::size_of::<PointLightUniform>(),
            ShadowKind::Planar => std::mem::size_of::<SpotLightUniform>(),
        } as u64;
        let uniform = MappedBuffer::with_capacity(
            device,
            "LightUniform",
            wgpu::BufferUsages::UNIFORM,
            uniform_size,
        );

        let (shadow_group, light_group) =
            layouts.light_bind_groups(device, label, kind, &uniform, &sample_view)?;

        log::debug!("Created {:?} shadow map '{}' ({}x{} x{})", kind, label, size, size, layers);

        Ok(Self {
            kind,
            _texture: texture,
            layer_views,
            uniform,
            shadow_group,
            light_group,
            face_stride: layouts.face_stride(),
        })
    }

    pub fn kind(&self) -> ShadowKind {
        self.kind
    }

    /// Group sampled by the light accumulation pass.
    pub fn light_group(&self) -> &wgpu::BindGroup {
        &self.light_group
    }

    /// Uploads `uniform` and renders every layer. `render_fn` receives each
    /// face's pass with the light's group already bound at index 0.
    fn render<T: Pod, F>(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        uniform: &T,
        mut render_fn: F,
    ) where
        F: FnMut(&mut wgpu::RenderPass<'_>),
    {
        self.uniform.mapping(0).write(0, uniform);
        self.uniform.flush(queue, BarrierFlags::LIGHT_MATRICES);

        for (face, view) in self.layer_views.iter().enumerate() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ShadowPass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let offset = (face as u64 * self.face_stride) as u32;
            pass.set_bind_group(0, &self.shadow_group, &[offset]);
            render_fn(&mut pass);
        }
    }
}

pub struct PointLight {
    position: Vec3,
    radius: f32,
    /// rgb color, alpha is intensity.
    color: Vec4,
    shadow: Option<ShadowMap>,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec4, radius: f32) -> Self {
        Self {
            position,
            radius,
            color,
            shadow: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// One view-projection per cube face, in [`FACE_DIRECTIONS`] order.
    pub fn shadow_matrices(&self, near: f32) -> [Mat4; POINT_SHADOW_FACES] {
        let projection = shadow_projection(self.radius, near);
        std::array::from_fn(|face| {
            projection * Mat4::look_to_rh(self.position, FACE_DIRECTIONS[face], face_up(face))
        })
    }

    pub fn light_uniform(&self, near: f32) -> PointLightUniform {
        PointLightUniform {
            shadow_matrices: self.shadow_matrices(near).map(|m| m.to_cols_array_2d()),
            position: self.position.to_array(),
            radius: self.radius,
        }
    }

    pub fn instance(&self) -> PointLightInstance {
        PointLightInstance {
            position: self.position.to_array(),
            radius: self.radius,
            color: self.color.to_array(),
        }
    }

    pub fn write_instance_data(&self, mut mapping: MappingRef<'_>) -> bool {
        mapping.write(0, &self.instance())
    }

    /// Everything the light can shadow lies inside its radius.
    pub fn shadow_visibility(&self) -> Visibility {
        Visibility::Sphere {
            center: self.position,
            radius: self.radius,
        }
    }

    pub fn attach_shadow_map(
        &mut self,
        device: &wgpu::Device,
        size: u32,
        layouts: &ShadowLayouts,
    ) -> Result<(), SetupError> {
        self.shadow = Some(ShadowMap::new(device, "PointShadowMap", ShadowKind::Cube, size, layouts)?);
        Ok(())
    }

    pub fn shadow_map(&self) -> Option<&ShadowMap> {
        self.shadow.as_ref()
    }

    /// Writes the six face matrices and renders each face through `render_fn`.
    pub fn render_shadow_map<F>(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        near: f32,
        render_fn: F,
    ) where
        F: FnMut(&mut wgpu::RenderPass<'_>),
    {
        let uniform = self.light_uniform(near);
        match self.shadow.as_mut() {
            Some(shadow) => shadow.render(queue, encoder, &uniform, render_fn),
            None => log::warn!("Point light at {} has no shadow map", self.position),
        }
    }
}

pub struct SpotLight {
    position: Vec3,
    radius: f32,
    color: Vec4,
    direction: Vec3,
    shadow: Option<ShadowMap>,
}

impl SpotLight {
    pub fn new(position: Vec3, direction: Vec3, color: Vec4, radius: f32) -> Self {
        Self {
            position,
            radius,
            color,
            direction: direction.try_normalize().unwrap_or(Vec3::NEG_Y),
            shadow: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    fn up(&self) -> Vec3 {
        if is_near_vertical(self.direction) {
            Vec3::NEG_Z
        } else {
            Vec3::NEG_Y
        }
    }

    pub fn shadow_matrix(&self, near: f32) -> Mat4 {
        shadow_projection(self.radius, near) * Mat4::look_to_rh(self.position, self.direction, self.up())
    }

    pub fn shadow_matrices(&self, near: f32) -> [Mat4; 1] {
        [self.shadow_matrix(near)]
    }

    /// Rotates the proxy cone's +Z axis onto the light direction.
    pub fn proxy_rotation(&self) -> Mat3 {
        let z = self.direction;
        let up = if is_near_vertical(z) { Vec3::NEG_Z } else { Vec3::Y };
        let x = up.cross(z).normalize();
        let y = z.cross(x);
        Mat3::from_cols(x, y, z)
    }

    pub fn light_uniform(&self, near: f32) -> SpotLightUniform {
        SpotLightUniform {
            shadow_matrix: self.shadow_matrix(near).to_cols_array_2d(),
            position: self.position.to_array(),
            radius: self.radius,
            direction: self.direction.to_array(),
            _padding: 0.0,
        }
    }

    pub fn instance(&self) -> SpotLightInstance {
        SpotLightInstance {
            position: self.position.to_array(),
            radius: self.radius,
            color: self.color.to_array(),
            direction: self.direction.to_array(),
            _padding: 0.0,
        }
    }

    pub fn write_instance_data(&self, mut mapping: MappingRef<'_>) -> bool {
        mapping.write(0, &self.instance())
    }

    pub fn shadow_visibility(&self, near: f32) -> Visibility {
        Visibility::Frustum(Frustum::from_view_proj(self.shadow_matrix(near)))
    }

    pub fn attach_shadow_map(
        &mut self,
        device: &wgpu::Device,
        size: u32,
        layouts: &ShadowLayouts,
    ) -> Result<(), SetupError> {
        self.shadow = Some(ShadowMap::new(device, "SpotShadowMap", ShadowKind::Planar, size, layouts)?);
        Ok(())
    }

    pub fn shadow_map(&self) -> Option<&ShadowMap> {
        self.shadow.as_ref()
    }

    pub fn render_shadow_map<F>(
        &mut self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        near: f32,
        render_fn: F,
    ) where
        F: FnMut(&mut wgpu::RenderPass<'_>),
    {
        let uniform = self.light_uniform(near);
        match self.shadow.as_mut() {
            Some(shadow) => shadow.render(queue, encoder, &uniform, render_fn),
            None => log::warn!("Spot light at {} has no shadow map", self.position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mapping::ByteArena;

    fn project(m: Mat4, p: Vec3) -> Vec3 {
        let clip = m * p.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn record_sizes() {
        assert_eq!(std::mem::size_of::<PointLightInstance>(), 32);
        assert_eq!(std::mem::size_of::<SpotLightInstance>(), 48);
        assert_eq!(std::mem::size_of::<PointLightUniform>(), 400);
        assert_eq!(std::mem::size_of::<SpotLightUniform>(), 96);
    }

    #[test]
    fn face_centers_project_to_screen_center() {
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec4::ONE, 50.0);
        for (face, m) in light.shadow_matrices(0.1).iter().enumerate() {
            let ndc = project(*m, light.position() + FACE_DIRECTIONS[face] * 10.0);
            assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5, "face {face}: {ndc}");
        }
    }

    #[test]
    fn depth_is_reversed() {
        let light = PointLight::new(Vec3::ZERO, Vec4::ONE, 100.0);
        let m = light.shadow_matrices(0.1)[0];
        let near = project(m, Vec3::new(0.1, 0.0, 0.0)).z;
        let far = project(m, Vec3::new(100.0, 0.0, 0.0)).z;
        assert!((near - 1.0).abs() < 1e-4);
        assert!(far.abs() < 1e-4);
    }

    #[test]
    fn spot_looks_along_direction() {
        let light = SpotLight::new(Vec3::new(0.0, 300.0, -50.0), Vec3::X, Vec4::ONE, 500.0);
        let ndc = project(light.shadow_matrix(0.1), light.position() + Vec3::X * 20.0);
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(light.shadow_visibility(0.1).intersects_sphere(light.position() + Vec3::X * 100.0, 1.0));
        assert!(!light.shadow_visibility(0.1).intersects_sphere(light.position() - Vec3::X * 100.0, 1.0));
    }

    #[test]
    fn vertical_spot_has_valid_basis() {
        let light = SpotLight::new(Vec3::ZERO, Vec3::NEG_Y, Vec4::ONE, 10.0);
        let rotation = light.proxy_rotation();
        assert!(rotation.is_finite());
        assert!((rotation * Vec3::Z).abs_diff_eq(Vec3::NEG_Y, 1e-6));
        assert!(light.shadow_matrix(0.1).is_finite());
    }

    #[test]
    fn instance_data_is_written_at_mapping() {
        let light = PointLight::new(Vec3::new(100.0, 300.0, -50.0), Vec4::new(0.2, 0.2, 0.8, 50.0), 100.0);
        let mut arena = ByteArena::with_capacity(64);
        assert!(light.write_instance_data(arena.mapping(32)));
        let written: PointLightInstance = arena.read(32).unwrap();
        assert_eq!(written.radius, 100.0);
        assert_eq!(written.color[3], 50.0);
    }

    #[test]
    fn almost_vertical_spot_keeps_an_orthonormal_basis() {
        let direction = Vec3::new(1e-4, -1.0, 0.0);
        let light = SpotLight::new(Vec3::new(0.0, 300.0, 0.0), direction, Vec4::ONE, 500.0);
        let rotation = light.proxy_rotation();
        for axis in [rotation.x_axis, rotation.y_axis, rotation.z_axis] {
            assert!((axis.length() - 1.0).abs() < 1e-4, "{axis}");
        }
        assert!(rotation.x_axis.dot(rotation.y_axis).abs() < 1e-4);
        assert!(rotation.x_axis.dot(rotation.z_axis).abs() < 1e-4);
        assert!(rotation.determinant() > 0.99);

        let below = project(light.shadow_matrix(0.1), light.position() + light.direction() * 100.0);
        assert!(below.x.abs() < 1e-3 && below.y.abs() < 1e-3, "{below}");
        assert!(below.is_finite());
    }
}
