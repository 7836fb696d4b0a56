use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default = "RenderSettings::default_ambient")]
    pub ambient: [f32; 3],
    /// Minimum near plane of every shadow projection.
    #[serde(default = "RenderSettings::default_light_near")]
    pub light_near: f32,
    #[serde(default = "RenderSettings::enabled")]
    pub bloom: bool,
    #[serde(default = "RenderSettings::enabled")]
    pub skybox: bool,
    #[serde(default = "RenderSettings::enabled")]
    pub reflections: bool,
    #[serde(default = "RenderSettings::enabled")]
    pub fxaa: bool,
    #[serde(default)]
    pub show_gizmos: bool,
    #[serde(default)]
    pub debug_view: DebugView,
    #[serde(default)]
    pub initial_scratch_vertices: u32,
    #[serde(default)]
    pub initial_indirect_commands: u32,
    #[serde(default)]
    pub initial_instances: u32,
    #[serde(default = "RenderSettings::enabled")]
    pub camera_track: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_map_size: Self::default_shadow_map_size(),
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
            ambient: Self::default_ambient(),
            light_near: Self::default_light_near(),
            bloom: true,
            skybox: true,
            reflections: true,
            fxaa: true,
            show_gizmos: false,
            debug_view: DebugView::default(),
            initial_scratch_vertices: 0,
            initial_indirect_commands: 0,
            initial_instances: 0,
            camera_track: true,
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if !(self.light_near.is_finite() && self.light_near > 0.0) {
            warn!(
                "Light near plane {} must be positive. Using default value.",
                self.light_near
            );
            self.light_near = Self::default_light_near();
        }

        if self.ambient.iter().any(|c| !c.is_finite() || *c < 0.0) {
            warn!("Ambient color {:?} is invalid. Using default ambient.", self.ambient);
            self.ambient = Self::default_ambient();
        }

        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    const fn default_shadow_map_size() -> u32 {
        1024
    }

    const fn default_ambient() -> [f32; 3] {
        [0.05, 0.05, 0.08]
    }

    const fn default_light_near() -> f32 {
        0.1
    }

    const fn enabled() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

/// Which buffer the combine pass shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugView {
    #[default]
    Final,
    Diffuse,
    Normal,
    Material,
    Depth,
    DiffuseLight,
    SpecularLight,
}

impl DebugView {
    pub const ALL: [DebugView; 7] = [
        DebugView::Final,
        DebugView::Diffuse,
        DebugView::Normal,
        DebugView::Material,
        DebugView::Depth,
        DebugView::DiffuseLight,
        DebugView::SpecularLight,
    ];

    /// Index read by the combine shader.
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() as usize + 1) % Self::ALL.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> RenderSettings {
        RenderSettings {
            shadow_map_size: 0,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            light_near: -1.0,
            ambient: [f32::NAN, 0.0, 0.0],
            present_mode: PresentModeSetting::Immediate,
            ..RenderSettings::default()
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = RenderSettings::default();

        assert_eq!(validated.shadow_map_size, defaults.shadow_map_size);
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.resolution.height, Resolution::default().height);
        assert_eq!(validated.light_near, defaults.light_near);
        assert_eq!(validated.ambient, defaults.ambient);
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            shadow_map_size: 2048,
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            present_mode: PresentModeSetting::Mailbox,
            light_near: 0.5,
            ..RenderSettings::default()
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.shadow_map_size, valid.shadow_map_size);
        assert_eq!(validated.resolution.width, valid.resolution.width);
        assert_eq!(validated.resolution.height, valid.resolution.height);
        assert_eq!(validated.light_near, 0.5);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: RenderSettings =
            serde_json::from_str(r#"{ "bloom": false, "debug_view": "diffuse_light" }"#)
                .expect("parse");
        assert!(!settings.bloom);
        assert!(settings.fxaa);
        assert_eq!(settings.debug_view, DebugView::DiffuseLight);
        assert_eq!(settings.shadow_map_size, 1024);
        assert_eq!(settings.initial_instances, 0);
    }

    #[test]
    fn debug_view_cycles_through_every_buffer() {
        let mut view = DebugView::Final;
        for expected in 1..DebugView::ALL.len() as u32 {
            view = view.next();
            assert_eq!(view.index(), expected);
        }
        assert_eq!(view.next(), DebugView::Final);
    }

    #[test]
    fn present_mode_returns_desired_when_available() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [
            wgpu::PresentMode::Fifo,
            wgpu::PresentMode::Mailbox,
            wgpu::PresentMode::Immediate,
        ];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Mailbox
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn present_mode_uses_first_available_when_fifo_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Immediate];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Immediate
        );
    }
}
