// renderer/targets.rs
//! Every render target whose size follows the window.

use crate::renderer::gbuffer::GBuffer;
use crate::renderer::textures::RenderTarget;

pub const LIGHT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Size of the screen targets and how often they were recreated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetExtent {
    pub width: u32,
    pub height: u32,
    pub generation: u64,
}

impl TargetExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            generation: 0,
        }
    }

    /// Moves to the new size when it needs fresh targets and bumps the
    /// generation. Returns whether it did.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if !needs_reallocation((self.width, self.height), (width, height)) {
            return false;
        }
        self.width = width;
        self.height = height;
        self.generation += 1;
        true
    }

    /// True when every size in `sizes` equals this extent.
    pub fn fits_all(&self, sizes: impl IntoIterator<Item = (u32, u32)>) -> bool {
        sizes.into_iter().all(|size| size == (self.width, self.height))
    }
}

/// Screen-sized targets shared by all views. The views split them by
/// viewport.
pub struct FrameTargets {
    extent: TargetExtent,
    pub gbuffer: GBuffer,
    pub diffuse_light: RenderTarget,
    pub specular_light: RenderTarget,
    pub hdr: RenderTarget,
    pub bright: RenderTarget,
    pub ping_pong: [RenderTarget; 2],
}

impl FrameTargets {
    /// Screen targets besides the G-buffer, by label.
    pub const SCREEN_TARGETS: [(&'static str, wgpu::TextureFormat); 6] = [
        ("DiffuseLight", LIGHT_FORMAT),
        ("SpecularLight", LIGHT_FORMAT),
        ("HdrOutput", HDR_FORMAT),
        ("BloomBright", HDR_FORMAT),
        ("PingPongA", HDR_FORMAT),
        ("PingPongB", HDR_FORMAT),
    ];

    pub fn new(device: &wgpu::Device, extent: TargetExtent) -> Self {
        let width = extent.width.max(1);
        let height = extent.height.max(1);
        let generation = extent.generation;
        let [diffuse_light, specular_light, hdr, bright, ping_a, ping_b] = Self::SCREEN_TARGETS
            .map(|(label, format)| RenderTarget::new(device, label, width, height, format));
        log::info!("Allocated frame targets at {}x{} (generation {})", width, height, generation);
        Self {
            extent: TargetExtent {
                width,
                height,
                generation,
            },
            gbuffer: GBuffer::new(device, width, height),
            diffuse_light,
            specular_light,
            hdr,
            bright,
            ping_pong: [ping_a, ping_b],
        }
    }

    /// Changes whenever the targets are recreated; dependent bind groups
    /// compare against it.
    pub fn generation(&self) -> u64 {
        self.extent.generation
    }

    pub fn extent(&self) -> TargetExtent {
        self.extent
    }

    pub fn size(&self) -> (u32, u32) {
        self.gbuffer.size()
    }

    /// True when every target already has the given size.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        let wanted = TargetExtent::new(width, height);
        let sizes = [
            self.gbuffer.size(),
            self.diffuse_light.size(),
            self.specular_light.size(),
            self.hdr.size(),
            self.bright.size(),
        ];
        wanted.fits_all(sizes.into_iter().chain(self.ping_pong.iter().map(RenderTarget::size)))
    }
}

/// Whether a resize to `new` has to recreate the targets of `current`.
pub fn needs_reallocation(current: (u32, u32), new: (u32, u32)) -> bool {
    new.0 > 0 && new.1 > 0 && current != new
}
