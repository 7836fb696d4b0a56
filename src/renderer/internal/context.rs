use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::error::SetupError;
use crate::settings::RenderSettings;

/// Features the batched pipeline cannot run without.
const REQUIRED_FEATURES: [wgpu::Features; 3] = [
    wgpu::Features::INDIRECT_FIRST_INSTANCE,
    wgpu::Features::TEXTURE_BINDING_ARRAY,
    wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING,
];

pub struct RenderContext {
    pub(crate) surface: wgpu::Surface<'static>,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) config: wgpu::SurfaceConfiguration,
    pub(crate) size: PhysicalSize<u32>,
    pub(crate) limits: wgpu::Limits,
    pub(crate) supports_line_mode: bool,
}

impl RenderContext {
    pub(crate) async fn new(
        window: Arc<Window>,
        settings: &RenderSettings,
    ) -> Result<Self, SetupError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window)?;
        log::info!("Surface created successfully!");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;

        log::info!("Using adapter: {:?}", adapter.get_info());
        log::info!("Using backend: {:?}", adapter.get_info().backend);
        let adapter_features = adapter.features();

        let mut required_features = wgpu::Features::empty();
        let mut missing = wgpu::Features::empty();
        for feature in REQUIRED_FEATURES {
            if adapter_features.contains(feature) {
                required_features |= feature;
            } else {
                missing |= feature;
            }
        }
        if !missing.is_empty() {
            return Err(SetupError::MissingFeatures(missing));
        }

        let supports_line_mode = adapter_features.contains(wgpu::Features::POLYGON_MODE_LINE);
        if supports_line_mode {
            required_features |= wgpu::Features::POLYGON_MODE_LINE;
        } else {
            log::warn!("Wireframe not supported, light gizmos disabled");
        }
        if adapter_features.contains(wgpu::Features::FLOAT32_FILTERABLE) {
            required_features |= wgpu::Features::FLOAT32_FILTERABLE;
        }

        let mut limits = wgpu::Limits {
            max_binding_array_elements_per_shader_stage: 256,
            ..wgpu::Limits::default()
        };
        limits.max_bind_groups = limits.max_bind_groups.max(4);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features,
                required_limits: limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: settings.present_mode(&surface_caps.present_modes),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let limits = device.limits();
        log::info!(
            "Offset alignment: storage {} B, uniform {} B",
            limits.min_storage_buffer_offset_alignment,
            limits.min_uniform_buffer_offset_alignment
        );

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            limits,
            supports_line_mode,
        })
    }

    pub(crate) fn resize(&mut self, new_size: PhysicalSize<u32>) -> bool {
        if new_size.width == 0 || new_size.height == 0 {
            return false;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        true
    }

    pub(crate) fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    pub fn storage_alignment(&self) -> u64 {
        self.limits.min_storage_buffer_offset_alignment as u64
    }

    pub fn uniform_alignment(&self) -> u64 {
        self.limits.min_uniform_buffer_offset_alignment as u64
    }

    /// Alignment satisfying both uniform and storage offset limits.
    pub fn binding_alignment(&self) -> u64 {
        self.storage_alignment().max(self.uniform_alignment())
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}
