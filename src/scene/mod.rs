// scene/mod.rs

pub mod camera;
pub mod frustum;
pub mod graph;
pub mod node;

pub use camera::Camera;
pub use frustum::{Frustum, Visibility};
pub use graph::{Graph, NodeEntry, NodeLists};
pub use node::{HeightmapNode, MeshNode, Node, NodeId, NodeKind, RenderType, WaterNode};
