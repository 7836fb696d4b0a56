// src/renderer/textures.rs
//! Bindless texture array, render targets and the environment cubemap.

use std::num::NonZeroU32;

use glam::Vec3;
use image::{GrayImage, Rgba, RgbaImage};

use crate::error::SetupError;
use crate::renderer::vertex::TextureHandleSet;

/// Size of the shader-side `binding_array`. Unused slots repeat slot 0.
pub const MAX_TEXTURES: u32 = 64;

/// Material flag bits carried in [`TextureHandleSet::flags`].
pub mod material_flags {
    pub const REFLECTIVE: u32 = 1 << 0;
}

pub const WHITE_TEXTURE: u32 = 0;
pub const FLAT_NORMAL_TEXTURE: u32 = 1;
pub const DEFAULT_MATERIAL_TEXTURE: u32 = 2;

/// A single-mip 2D texture uploaded from an RGBA image.
pub struct Texture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Texture {
    pub fn from_image(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        image: &RgbaImage,
        format: wgpu::TextureFormat,
    ) -> Self {
        let (width, height) = image.dimensions();
        Self::from_bytes(device, queue, label, (width, height, 4), image.as_raw(), format)
    }

    /// Single channel `R8Unorm` texture, used for height data.
    pub fn from_gray(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_bytes(
            device,
            queue,
            label,
            (width, height, 1),
            image.as_raw(),
            wgpu::TextureFormat::R8Unorm,
        )
    }

    fn from_bytes(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        (width, height, bytes_per_pixel): (u32, u32, u32),
        bytes: &[u8],
        format: wgpu::TextureFormat,
    ) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_pixel * width),
                rows_per_image: Some(height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// A screen-sized attachment that later passes sample.
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

impl RenderTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

/// Owns every texture addressable through a [`TextureHandleSet`].
pub struct TextureRegistry {
    textures: Vec<Texture>,
    sampler: wgpu::Sampler,
    layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
}

impl TextureRegistry {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("TextureArrayLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: NonZeroU32::new(MAX_TEXTURES),
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("TextureArraySampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let mut registry = Self {
            textures: Vec::new(),
            sampler,
            layout,
            bind_group: None,
        };
        let defaults = [
            ("WhiteTexture", Rgba([255, 255, 255, 255])),
            ("FlatNormalTexture", Rgba([128, 128, 255, 255])),
            // specular 0.5, shininess 0.25
            ("DefaultMaterialTexture", Rgba([128, 64, 0, 255])),
        ];
        for (label, color) in defaults {
            let image = RgbaImage::from_pixel(1, 1, color);
            registry
                .textures
                .push(Texture::from_image(device, queue, label, &image, wgpu::TextureFormat::Rgba8Unorm));
        }
        registry
    }

    /// Handles that point at the built-in defaults.
    pub fn default_handles() -> TextureHandleSet {
        TextureHandleSet {
            diffuse: WHITE_TEXTURE,
            normal: FLAT_NORMAL_TEXTURE,
            material: DEFAULT_MATERIAL_TEXTURE,
            flags: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Uploads `image` and returns its handle.
    pub fn add(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        image: &RgbaImage,
    ) -> Result<u32, SetupError> {
        if self.textures.len() as u32 >= MAX_TEXTURES {
            return Err(SetupError::Texture(format!(
                "cannot register '{}': all {} texture slots are used",
                label, MAX_TEXTURES
            )));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(SetupError::Texture(format!("'{}' has no pixels", label)));
        }
        let handle = self.textures.len() as u32;
        self.textures.push(Texture::from_image(
            device,
            queue,
            label,
            image,
            wgpu::TextureFormat::Rgba8Unorm,
        ));
        self.bind_group = None;
        log::debug!("Registered texture '{}' as handle {}", label, handle);
        Ok(handle)
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Rebuilds the texture array bind group after registrations.
    pub fn prepare(&mut self, device: &wgpu::Device) {
        if self.bind_group.is_some() {
            return;
        }
        let views: Vec<&wgpu::TextureView> = (0..MAX_TEXTURES as usize)
            .map(|i| &self.textures.get(i).unwrap_or(&self.textures[0]).view)
            .collect();
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("TextureArrayBindGroup"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureViewArray(&views),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        }));
    }

    /// `None` until [`TextureRegistry::prepare`] ran after the last `add`.
    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }
}

/// Two-color checkerboard used by the procedural meshes.
pub fn checker_image(size: u32, cells: u32, a: Rgba<u8>, b: Rgba<u8>) -> RgbaImage {
    let cell = (size / cells.max(1)).max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            a
        } else {
            b
        }
    })
}

/// Direction through texel `(u, v)` of cube face `face`, both in [-1, 1].
pub fn cube_face_direction(face: u32, u: f32, v: f32) -> Vec3 {
    let dir = match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    };
    dir.normalize()
}

/// Vertical sky gradient sampled in `dir`.
pub fn sky_color(dir: Vec3) -> Vec3 {
    let zenith = Vec3::new(0.12, 0.28, 0.65);
    let horizon = Vec3::new(0.65, 0.72, 0.80);
    let ground = Vec3::new(0.18, 0.16, 0.14);
    if dir.y >= 0.0 {
        horizon.lerp(zenith, dir.y.powf(0.6))
    } else {
        horizon.lerp(ground, (-dir.y * 4.0).min(1.0))
    }
}

/// Procedural sky cubemap sampled by the skybox and reflection effects.
pub struct EnvironmentMap {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl EnvironmentMap {
    pub fn procedural(device: &wgpu::Device, queue: &wgpu::Queue, size: u32) -> Self {
        let size = size.max(1);
        let extent = wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 6,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("EnvironmentCubemap"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for face in 0..6 {
            let image = Self::face_image(face, size);
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: face },
                    aspect: wgpu::TextureAspect::All,
                },
                image.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * size),
                    rows_per_image: Some(size),
                },
                wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("EnvironmentCubemapView"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            array_layer_count: Some(6),
            ..Default::default()
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("EnvironmentSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
        }
    }

    fn face_image(face: u32, size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
            let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
            let color = sky_color(cube_face_direction(face, u, v)) * 255.0;
            Rgba([color.x as u8, color.y as u8, color.z as u8, 255])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_point_along_their_axis() {
        let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, axis) in axes.iter().enumerate() {
            let center = cube_face_direction(face as u32, 0.0, 0.0);
            assert!(center.abs_diff_eq(*axis, 1e-6), "face {face}: {center}");
        }
    }

    #[test]
    fn sky_is_brighter_above_than_below() {
        assert!(sky_color(Vec3::Y).z > sky_color(Vec3::NEG_Y).z);
    }

    #[test]
    fn checker_alternates_cells() {
        let white = Rgba([255, 255, 255, 255]);
        let black = Rgba([0, 0, 0, 255]);
        let image = checker_image(8, 2, white, black);
        assert_eq!(*image.get_pixel(0, 0), white);
        assert_eq!(*image.get_pixel(4, 0), black);
        assert_eq!(*image.get_pixel(4, 4), white);
    }
}
