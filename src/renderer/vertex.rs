// src/renderer/vertex.rs
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::mem;

/// Bind-pose vertex stored in the static geometry store and read by the
/// skinning compute pass.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct WeightedVertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

impl WeightedVertex {
    /// Stride in `f32` words as seen by the compute shader.
    pub const WORDS: u32 = (mem::size_of::<Self>() / mem::size_of::<f32>()) as u32;
}

/// Skinned vertex written by the compute pass into the scratch buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct SkinnedVertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
}

impl SkinnedVertex {
    pub const WORDS: u32 = (mem::size_of::<Self>() / mem::size_of::<f32>()) as u32;
    pub const STRIDE: u64 = mem::size_of::<Self>() as u64;

    pub const ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x2,
        2 => Float32x3,
        3 => Float32x4
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: Self::STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Per-instance model matrix, one value per instance (locations 4..=7).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
}

impl InstanceRaw {
    pub const ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        4 => Float32x4,
        5 => Float32x4,
        6 => Float32x4,
        7 => Float32x4
    ];

    pub fn from_matrix(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
        }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

/// Indices into the bindless texture array for one instance.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureHandleSet {
    pub diffuse: u32,
    pub normal: u32,
    pub material: u32,
    pub flags: u32,
}

/// Position-only vertex used by light proxies.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct ProxyVertex {
    pub pos: [f32; 3],
}

impl ProxyVertex {
    pub const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_struct_size() {
        assert_eq!(
            SkinnedVertex::layout().array_stride,
            std::mem::size_of::<SkinnedVertex>() as wgpu::BufferAddress
        );
        assert_eq!(
            InstanceRaw::layout().array_stride,
            std::mem::size_of::<InstanceRaw>() as wgpu::BufferAddress
        );
    }

    #[test]
    fn shader_word_strides() {
        assert_eq!(WeightedVertex::WORDS, 20);
        assert_eq!(SkinnedVertex::WORDS, 12);
        assert_eq!(std::mem::size_of::<TextureHandleSet>(), 16);
    }
}
