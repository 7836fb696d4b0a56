pub mod assembler;
pub mod batch;
pub mod gbuffer;
pub mod geometry;
mod internal;
pub mod layout;
pub mod lighting;
pub mod lights;
pub mod mapping;
pub mod pipeline_builder;
pub mod postprocess;
pub mod primitives;
mod renderer;
pub mod shadows;
pub mod skinning;
pub mod targets;
pub mod terrain;
pub mod textures;
pub mod uniforms;
pub mod vertex;

pub use assembler::{BatchAssembler, BatchSetup, IndirectSlot};
pub use batch::{DrawParams, SkinCursor, SkinDispatch};
pub use geometry::{GeometryBuilder, MeshSource, SkinnedMesh, StaticGeometryStore, SubmeshSource};
pub use internal::RenderContext;
pub use lights::{PointLight, SpotLight};
pub use renderer::{
    pass_slot_count, set_node_frame, FrameConfig, RenderStats, Renderer, SceneAssets, SceneView,
};
pub use uniforms::CameraUniform;
pub use vertex::{SkinnedVertex, TextureHandleSet, WeightedVertex};
