// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::settings::DebugView;

/// Per-view camera data. Lighting passes rebuild world positions from depth
/// with `inverse_view_proj` and the view's `viewport`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub inverse_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    /// x, y, width, height in pixels.
    pub viewport: [f32; 4],
    /// Full target width and height, then 1/width and 1/height.
    pub target: [f32; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        Self::from_matrix(Mat4::IDENTITY, Vec3::ZERO, Vec4::ONE, (1, 1))
    }

    pub fn from_matrix(view_proj: Mat4, camera_pos: Vec3, viewport: Vec4, target: (u32, u32)) -> Self {
        let (width, height) = (target.0.max(1) as f32, target.1.max(1) as f32);
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            inverse_view_proj: view_proj.inverse().to_cols_array_2d(),
            camera_pos: camera_pos.extend(1.0).to_array(),
            viewport: viewport.to_array(),
            target: [width, height, 1.0 / width, 1.0 / height],
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs of the deferred combine pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct CombineUniform {
    pub ambient: [f32; 4],
    /// x: debug view index, y: bloom threshold.
    pub params: [f32; 4],
}

impl CombineUniform {
    pub const BLOOM_THRESHOLD: f32 = 1.0;

    pub fn new(ambient: [f32; 3], debug_view: DebugView) -> Self {
        Self {
            ambient: [ambient[0], ambient[1], ambient[2], 1.0],
            params: [debug_view.index() as f32, Self::BLOOM_THRESHOLD, 0.0, 0.0],
        }
    }
}

/// Camera data of one view as seen by the post effects.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct PostView {
    pub inverse_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    /// x, y, width, height in pixels.
    pub viewport: [f32; 4],
}

impl PostView {
    pub fn from_camera(camera: &CameraUniform) -> Self {
        Self {
            inverse_view_proj: camera.inverse_view_proj,
            camera_pos: camera.camera_pos,
            viewport: camera.viewport,
        }
    }
}

/// Parameters shared by every full-screen post effect.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct PostUniform {
    pub views: [PostView; 2],
    /// 1/width, 1/height, width, height.
    pub texel: [f32; 4],
    /// x: view count, y: 1 when the blit must encode gamma, z: bloom strength.
    pub params: [f32; 4],
}

impl PostUniform {
    pub const BLOOM_STRENGTH: f32 = 0.6;

    pub fn new(views: &[PostView], size: (u32, u32), encode_gamma: bool) -> Self {
        let mut uniform = Self::default();
        for (slot, view) in uniform.views.iter_mut().zip(views) {
            *slot = *view;
        }
        let (width, height) = (size.0.max(1) as f32, size.1.max(1) as f32);
        uniform.texel = [1.0 / width, 1.0 / height, width, height];
        uniform.params = [
            views.len().min(2) as f32,
            if encode_gamma { 1.0 } else { 0.0 },
            Self::BLOOM_STRENGTH,
            0.0,
        ];
        uniform
    }
}
