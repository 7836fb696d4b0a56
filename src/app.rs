// app.rs
use std::sync::Arc;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::demo;
use crate::renderer::{RenderContext, Renderer};
use crate::settings::RenderSettings;
use crate::time::FrameClock;

pub struct App {
    settings: RenderSettings,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    window_id: Option<WindowId>,
    clock: FrameClock,
}

impl App {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            renderer: None,
            window: None,
            window_id: None,
            clock: FrameClock::new(),
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) {
        let resolution = &self.settings.resolution;
        let attributes = Window::default_attributes()
            .with_title("deferred batch renderer")
            .with_inner_size(PhysicalSize::new(resolution.width, resolution.height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Window creation failed: {}", err);
                event_loop.exit();
                return;
            }
        };

        let context = match pollster::block_on(RenderContext::new(window.clone(), &self.settings)) {
            Ok(context) => context,
            Err(err) => {
                log::error!("GPU initialisation failed: {}", err);
                event_loop.exit();
                return;
            }
        };
        let mut renderer = match Renderer::new(context, self.settings.clone(), demo::build_scene) {
            Ok(renderer) => renderer,
            Err(err) => {
                log::error!("Scene setup failed: {}", err);
                event_loop.exit();
                return;
            }
        };
        if self.settings.camera_track {
            renderer.set_camera_track(Some(demo::camera_track()));
        }

        self.window_id = Some(window.id());
        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.clock = FrameClock::new();
    }
}

/// Runtime toggles bound to letter keys.
fn handle_key(renderer: &mut Renderer, key: &str) {
    let config = renderer.config_mut();
    match key {
        "b" => config.bloom = !config.bloom,
        "f" => config.fxaa = !config.fxaa,
        "k" => config.skybox = !config.skybox,
        "r" => config.reflections = !config.reflections,
        "g" => config.show_gizmos = !config.show_gizmos,
        "v" => {
            config.debug_view = config.debug_view.next();
            log::info!("Debug view: {:?}", config.debug_view);
        }
        "t" => {
            let track = (!renderer.has_camera_track()).then(demo::camera_track);
            log::info!("Camera track {}", if track.is_some() { "on" } else { "off" });
            renderer.set_camera_track(track);
        }
        _ => {}
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            self.start(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                renderer.on_window_resize(size);
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(w) = &self.window {
                    renderer.on_window_resize(w.inner_size());
                }
            }
            WindowEvent::RedrawRequested => {
                let frame = self.clock.tick();
                renderer.update(&frame);
                if let Err(err) = renderer.render(&frame) {
                    log::error!("Frame {} failed: {}", frame.frame_index, err);
                    event_loop.exit();
                    return;
                }

                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Character(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                handle_key(renderer, &key.to_lowercase());
            }
            _ => {}
        }
    }
}
