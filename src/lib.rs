pub mod app;
pub mod camera_track;
pub mod demo;
pub mod error;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod time;

use app::App;
use settings::RenderSettings;
use winit::event_loop::EventLoop;

fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

pub fn run() -> Result<(), winit::error::EventLoopError> {
    init_logging();

    let settings = RenderSettings::load();
    log::info!("Starting deferred batch renderer with {:?}", settings);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(settings);

    let result = event_loop.run_app(&mut app);

    if let Err(ref err) = result {
        log::error!("Application error: {}", err);
    }

    log::info!("Application shutdown complete");

    result
}
