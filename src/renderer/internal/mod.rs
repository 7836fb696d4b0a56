mod context;

pub use context::RenderContext;
