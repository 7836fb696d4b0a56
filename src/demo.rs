//! The two-view demo: goober crowds on procedural terrain, lights and the
//! scripted fly-through.

use std::f32::consts::TAU;

use glam::{Mat4, Quat, Vec3, Vec4};
use image::{GrayImage, Luma, Rgba};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::camera_track::{CameraTrack, TrackAction, TrackEffect};
use crate::error::SetupError;
use crate::renderer::textures::{checker_image, material_flags, DEFAULT_MATERIAL_TEXTURE, FLAT_NORMAL_TEXTURE};
use crate::renderer::{
    MeshSource, PointLight, SceneAssets, SceneView, SpotLight, SubmeshSource, TextureHandleSet, WeightedVertex,
};
use crate::scene::{Camera, Graph, HeightmapNode, MeshNode, Node, NodeKind, WaterNode};

const GOOBER_JOINTS: u32 = 3;
const GOOBER_FRAMES: u32 = 24;
const GOOBER_FRAME_RATE: f32 = 24.0;
const GOOBER_SIDES: u32 = 12;
const GOOBER_RINGS: u32 = 9;
const GOOBER_HEIGHT: f32 = 2.0;
const GOOBER_RADIUS: f32 = 0.35;
/// Peak bend per joint, radians.
const GOOBER_SWING: f32 = 0.35;

const HEIGHTMAP_SIZE: u32 = 256;
const TERRAIN_HALF_EXTENT: f32 = 2500.0;
const TERRAIN_HEIGHT: f32 = 400.0;
const SEED: u64 = 12345;

struct GooberTextures {
    body: TextureHandleSet,
    caps: TextureHandleSet,
}

/// Registers the demo assets and returns the left and right views.
pub fn build_scene(assets: &mut SceneAssets<'_>) -> Result<Vec<SceneView>, SetupError> {
    let textures = goober_textures(assets)?;
    let goober = assets.add_mesh(goober_mesh(&textures))?;
    let mut rng = SmallRng::seed_from_u64(SEED);

    let heights = fbm_heightmap(HEIGHTMAP_SIZE, &mut rng);
    let terrain = assets.add_heightmap(&heights);
    let heightmap = |name: &str| {
        Node::new(
            name,
            NodeKind::Heightmap(HeightmapNode {
                terrain,
                size: TERRAIN_HALF_EXTENT,
                height_scale: TERRAIN_HEIGHT,
                chunks: 7,
                chunk_resolution: 32,
            }),
        )
        .with_bounding_radius(TERRAIN_HALF_EXTENT * 1.5)
    };
    let water = |name: &str, y_level: f32| {
        Node::new(
            name,
            NodeKind::Water(WaterNode {
                size: 5000.0,
                y_level,
                uv_scale: 40.0,
            }),
        )
        .with_bounding_radius(7500.0)
    };

    let mut left = Graph::new();
    left.add_root(heightmap("Terrain"));
    left.add_root(water("Water", 110.0));

    let line = [9.5, 25.0, 40.0, 55.0, 70.0].map(|x| Vec3::new(x, 268.75, 0.0));
    let grid = (0..=10).flat_map(|i| {
        (0..=10).map(move |j| Vec3::new(1000.0 + 30.0 * i as f32, 110.0, 1000.0 + 30.0 * j as f32))
    });
    for (index, position) in line.into_iter().chain(grid).enumerate() {
        let mut mesh = MeshNode::new(goober.clone());
        mesh.set_frame(rng.gen_range(0..GOOBER_FRAMES as i32));
        let node = Node::new(format!("Goober{index}"), NodeKind::Mesh(mesh))
            .with_transform(Mat4::from_scale_rotation_translation(Vec3::splat(10.0), Quat::IDENTITY, position))
            .with_bounding_radius(15.0);
        left.add_root(node);
    }

    let mut right = Graph::new();
    right.add_root(heightmap("SummerTerrain"));
    right.add_root(water("Water", 250.0));

    let mut left_view = SceneView::new(left, Camera::from_angles(Vec3::new(0.0, 300.0, 0.0), -35.0, 270.0));
    left_view.point_lights = vec![
        PointLight::new(Vec3::new(100.0, 300.0, -50.0), Vec4::new(0.2, 0.2, 0.8, 50.0), 100.0),
        PointLight::new(Vec3::new(0.0, 300.0, 30.0), Vec4::new(0.8, 0.2, 0.2, 50.0), 100.0),
        PointLight::new(Vec3::new(2000.0, 1000.0, 2000.0), Vec4::new(0.8, 0.8, 0.8, 20.0), 5000.0),
    ];

    let mut right_view = SceneView::new(right, Camera::from_angles(Vec3::new(300.0, 350.0, 300.0), -35.0, 45.0));
    right_view.point_lights = vec![
        PointLight::new(Vec3::new(0.0, 1500.0, -2500.0), Vec4::new(0.5, 0.5, 0.5, 0.5), 5000.0),
        PointLight::new(Vec3::new(25.0, 300.0, 30.0), Vec4::new(0.2, 0.8, 0.2, 50.0), 100.0),
        PointLight::new(Vec3::new(150.0, 300.0, -50.0), Vec4::new(0.8, 0.8, 0.2, 50.0), 100.0),
        PointLight::new(Vec3::new(300.0, 300.0, 100.0), Vec4::new(0.8, 0.2, 0.8, 50.0), 100.0),
        PointLight::new(Vec3::new(400.0, 300.0, -150.0), Vec4::new(0.2, 0.8, 0.8, 50.0), 100.0),
    ];
    right_view.spot_lights = vec![SpotLight::new(
        Vec3::new(0.0, 300.0, -50.0),
        Vec3::X,
        Vec4::new(0.8, 0.5, 0.5, 50.0),
        500.0,
    )];

    log::info!(
        "Demo scene: {} goobers, heightmap {}x{}",
        left_view.graph.len() - 2,
        HEIGHTMAP_SIZE,
        HEIGHTMAP_SIZE
    );
    Ok(vec![left_view, right_view])
}

/// The fly-through shared by both views.
pub fn camera_track() -> CameraTrack {
    let mut track = CameraTrack::new();
    let keys: [(f32, [f32; 3], f32, f32); 18] = [
        (0.0, [2000.0, 1000.0, 2000.0], -35.0, 45.0),
        (5.0, [2000.0, 1000.0, 2000.0], -35.0, 45.0),
        (10.0, [100.0, 300.0, 40.0], -35.0, 45.0),
        (15.0, [40.0, 300.0, 45.0], -35.0, 0.0),
        (20.0, [40.0, 300.0, 45.0], -35.0, 0.0),
        (25.0, [-20.0, 310.0, 20.0], -40.0, -50.0),
        (30.0, [-1000.0, 300.0, 1000.0], -45.0, 225.0),
        (35.0, [-1000.0, 300.0, 1000.0], -45.0, 225.0),
        (37.5, [-1000.0, 300.0, 1000.0], 35.0, 225.0),
        (40.0, [-1000.0, 300.0, 1000.0], 35.0, 225.0),
        (45.0, [1360.0, 300.0, 1360.0], -35.0, 45.0),
        (55.0, [1360.0, 300.0, 1360.0], -35.0, 45.0),
        (60.0, [300.0, 350.0, 300.0], -35.0, 45.0),
        (65.0, [300.0, 350.0, 300.0], -35.0, 45.0),
        (70.0, [-300.0, 350.0, 300.0], -35.0, 315.0),
        (75.0, [-300.0, 350.0, -300.0], -35.0, 225.0),
        (80.0, [300.0, 350.0, -300.0], -35.0, 135.0),
        (81.0, [300.0, 350.0, -300.0], -35.0, 45.0),
    ];
    for (time, position, pitch, yaw) in keys {
        track.add_keyframe(time, Vec3::from(position), pitch, yaw);
    }

    let effects = [
        TrackEffect::new(0.0, 0.0, TrackAction::SetSplitRatio { from: 0.0, to: 0.0 }),
        TrackEffect::new(10.0, 10.0, TrackAction::SetBloom(true)),
        TrackEffect::new(15.0, 15.0, TrackAction::SetBloom(false)),
        TrackEffect::new(17.0, 17.0, TrackAction::SetPostEffect { index: 2, enabled: false }),
        TrackEffect::new(19.0, 19.0, TrackAction::SetPostEffect { index: 2, enabled: true }),
        TrackEffect::new(32.5, 32.5, TrackAction::SetPostEffect { index: 1, enabled: false }),
        TrackEffect::new(35.0, 35.0, TrackAction::SetPostEffect { index: 1, enabled: true }),
        TrackEffect::new(38.0, 38.0, TrackAction::SetPostEffect { index: 0, enabled: false }),
        TrackEffect::new(40.0, 40.0, TrackAction::SetPostEffect { index: 0, enabled: true }),
        TrackEffect::new(47.5, 47.5, TrackAction::SetGizmos(true)),
        TrackEffect::new(50.0, 50.5, TrackAction::SetSplitRatio { from: 0.0, to: 0.5 }),
        TrackEffect::new(55.0, 55.0, TrackAction::SetGizmos(false)),
        TrackEffect::new(55.0, 55.5, TrackAction::SetSplitRatio { from: 0.5, to: 1.0 }),
    ];
    for effect in effects {
        track.add_effect(effect);
    }
    track
}

fn goober_textures(assets: &mut SceneAssets<'_>) -> Result<GooberTextures, SetupError> {
    let body = checker_image(128, 8, Rgba([214, 120, 48, 255]), Rgba([120, 52, 24, 255]));
    let caps = checker_image(64, 4, Rgba([220, 220, 230, 255]), Rgba([150, 160, 180, 255]));
    let body = assets.add_texture("GooberBody", &body)?;
    let caps = assets.add_texture("GooberCaps", &caps)?;
    let handles = |diffuse, flags| TextureHandleSet {
        diffuse,
        normal: FLAT_NORMAL_TEXTURE,
        material: DEFAULT_MATERIAL_TEXTURE,
        flags,
    };
    Ok(GooberTextures {
        body: handles(body, 0),
        caps: handles(caps, material_flags::REFLECTIVE),
    })
}

/// Joints sit evenly up the column, parented bottom to top.
fn joint_height(joint: u32) -> f32 {
    GOOBER_HEIGHT * joint as f32 / GOOBER_JOINTS as f32
}

/// Blends between the two joints around height `y`.
fn joint_weights(y: f32) -> ([u32; 4], [f32; 4]) {
    let segment = GOOBER_HEIGHT / GOOBER_JOINTS as f32;
    let t = (y / segment).max(0.0);
    let lower = (t.floor() as u32).min(GOOBER_JOINTS - 1);
    if lower == GOOBER_JOINTS - 1 {
        return ([lower, 0, 0, 0], [1.0, 0.0, 0.0, 0.0]);
    }
    let blend = t - lower as f32;
    ([lower, lower + 1, 0, 0], [1.0 - blend, blend, 0.0, 0.0])
}

/// Skinning matrices for every frame, frame-major.
fn goober_animation() -> Vec<Mat4> {
    let mut frames = Vec::with_capacity((GOOBER_FRAMES * GOOBER_JOINTS) as usize);
    for frame in 0..GOOBER_FRAMES {
        let phase = TAU * frame as f32 / GOOBER_FRAMES as f32;
        let mut parent = Mat4::IDENTITY;
        for joint in 0..GOOBER_JOINTS {
            let offset = if joint == 0 {
                0.0
            } else {
                GOOBER_HEIGHT / GOOBER_JOINTS as f32
            };
            let angle = GOOBER_SWING * (phase + joint as f32 * 0.8).sin();
            let pose = parent * Mat4::from_translation(Vec3::Y * offset) * Mat4::from_rotation_z(angle);
            let inverse_bind = Mat4::from_translation(Vec3::NEG_Y * joint_height(joint));
            frames.push(pose * inverse_bind);
            parent = pose;
        }
    }
    frames
}

/// A capped column bending over three joints: side walls and both caps as
/// separate submeshes.
fn goober_mesh(textures: &GooberTextures) -> MeshSource {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    let ring = |side: u32| {
        let theta = TAU * side as f32 / GOOBER_SIDES as f32;
        (theta.cos(), theta.sin())
    };

    for r in 0..=GOOBER_RINGS {
        let y = GOOBER_HEIGHT * r as f32 / GOOBER_RINGS as f32;
        let (joints, weights) = joint_weights(y);
        for side in 0..=GOOBER_SIDES {
            let (c, s) = ring(side);
            vertices.push(WeightedVertex {
                pos: [c * GOOBER_RADIUS, y, s * GOOBER_RADIUS],
                uv: [side as f32 / GOOBER_SIDES as f32, y / GOOBER_HEIGHT],
                normal: [c, 0.0, s],
                tangent: [-s, 0.0, c, 1.0],
                joints,
                weights,
            });
        }
    }
    let stride = GOOBER_SIDES + 1;
    for r in 0..GOOBER_RINGS {
        for side in 0..GOOBER_SIDES {
            let a = r * stride + side;
            let b = a + 1;
            let c = a + stride;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, d, a, d, b]);
        }
    }
    let side_count = indices.len() as u32;

    for (y, up) in [(0.0, false), (GOOBER_HEIGHT, true)] {
        let (joints, weights) = joint_weights(y);
        let normal = if up { [0.0, 1.0, 0.0] } else { [0.0, -1.0, 0.0] };
        let center = vertices.len() as u32;
        vertices.push(WeightedVertex {
            pos: [0.0, y, 0.0],
            uv: [0.5, 0.5],
            normal,
            tangent: [1.0, 0.0, 0.0, 1.0],
            joints,
            weights,
        });
        for side in 0..GOOBER_SIDES {
            let (c, s) = ring(side);
            vertices.push(WeightedVertex {
                pos: [c * GOOBER_RADIUS, y, s * GOOBER_RADIUS],
                uv: [0.5 + c * 0.5, 0.5 + s * 0.5],
                normal,
                tangent: [1.0, 0.0, 0.0, 1.0],
                joints,
                weights,
            });
        }
        for side in 0..GOOBER_SIDES {
            let current = center + 1 + side;
            let next = center + 1 + (side + 1) % GOOBER_SIDES;
            if up {
                indices.extend_from_slice(&[center, next, current]);
            } else {
                indices.extend_from_slice(&[center, current, next]);
            }
        }
    }

    MeshSource {
        name: "Goober".into(),
        vertices,
        submeshes: vec![
            SubmeshSource {
                first_index: 0,
                index_count: side_count,
                textures: textures.body,
            },
            SubmeshSource {
                first_index: side_count,
                index_count: indices.len() as u32 - side_count,
                textures: textures.caps,
            },
        ],
        indices,
        joint_count: GOOBER_JOINTS,
        frames: goober_animation(),
        frame_rate: GOOBER_FRAME_RATE,
    }
}

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

/// Five octaves of value noise, lifted toward the centre so the crowd sits
/// on land.
fn fbm_heightmap(size: u32, rng: &mut SmallRng) -> GrayImage {
    const OCTAVES: usize = 5;
    let lattices: Vec<(u32, Vec<f32>)> = (0..OCTAVES)
        .map(|octave| {
            let cells = 4u32 << octave;
            let values = (0..(cells + 1) * (cells + 1)).map(|_| rng.gen::<f32>()).collect();
            (cells, values)
        })
        .collect();

    let mut heights = vec![0.0f32; (size * size) as usize];
    for y in 0..size {
        for x in 0..size {
            let u = x as f32 / (size - 1) as f32;
            let v = y as f32 / (size - 1) as f32;
            let mut amplitude = 0.5;
            let mut value = 0.0;
            for (cells, lattice) in &lattices {
                let fx = u * *cells as f32;
                let fy = v * *cells as f32;
                let (ix, iy) = ((fx as u32).min(cells - 1), (fy as u32).min(cells - 1));
                let (tx, ty) = (smoothstep(fx - ix as f32), smoothstep(fy - iy as f32));
                let at = |i: u32, j: u32| lattice[(j * (cells + 1) + i) as usize];
                let top = at(ix, iy) + (at(ix + 1, iy) - at(ix, iy)) * tx;
                let bottom = at(ix, iy + 1) + (at(ix + 1, iy + 1) - at(ix, iy + 1)) * tx;
                value += (top + (bottom - top) * ty) * amplitude;
                amplitude *= 0.5;
            }
            let distance = ((u - 0.5).powi(2) + (v - 0.5).powi(2)).sqrt() * 2.0;
            heights[(y * size + x) as usize] = value * (1.2 - distance).clamp(0.2, 1.0);
        }
    }

    let max = heights.iter().copied().fold(f32::EPSILON, f32::max);
    GrayImage::from_fn(size, size, |x, y| {
        Luma([(heights[(y * size + x) as usize] / max * 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::GeometryBuilder;

    const EPSILON: f32 = 1e-5;

    fn textures() -> GooberTextures {
        GooberTextures {
            body: TextureHandleSet::default(),
            caps: TextureHandleSet::default(),
        }
    }

    #[test]
    fn goober_mesh_is_valid_geometry() {
        let mesh = goober_mesh(&textures());
        assert_eq!(mesh.frames.len(), (GOOBER_FRAMES * GOOBER_JOINTS) as usize);
        assert_eq!(mesh.indices.len() % 3, 0);
        let mut builder = GeometryBuilder::new();
        assert!(builder.add(mesh).is_ok());
    }

    #[test]
    fn weights_sum_to_one() {
        for step in 0..=20 {
            let y = GOOBER_HEIGHT * step as f32 / 20.0;
            let (joints, weights) = joint_weights(y);
            assert!((weights.iter().sum::<f32>() - 1.0).abs() < EPSILON, "y = {y}");
            assert!(joints.iter().all(|joint| *joint < GOOBER_JOINTS));
        }
    }

    #[test]
    fn root_joint_keeps_the_base_in_place() {
        let frames = goober_animation();
        for frame in 0..GOOBER_FRAMES {
            let root = frames[(frame * GOOBER_JOINTS) as usize];
            let base = root.transform_point3(Vec3::ZERO);
            assert!(base.length() < EPSILON, "frame {frame}: {base}");
        }
    }

    #[test]
    fn track_covers_the_whole_fly_through() {
        let track = camera_track();
        let keys = track.keyframes();
        assert_eq!(keys.len(), 18);
        assert_eq!(keys.first().map(|key| key.time), Some(0.0));
        assert_eq!(keys.last().map(|key| key.time), Some(81.0));
    }

    #[test]
    fn heightmap_is_deterministic() {
        let a = fbm_heightmap(32, &mut SmallRng::seed_from_u64(SEED));
        let b = fbm_heightmap(32, &mut SmallRng::seed_from_u64(SEED));
        assert_eq!(a, b);
        assert!(a.pixels().any(|pixel| pixel.0[0] == 255));
    }
}
