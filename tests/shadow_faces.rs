use deferred_batch::renderer::lights::{shadow_projection, FACE_DIRECTIONS, POINT_SHADOW_FACES};
use deferred_batch::renderer::{PointLight, SpotLight};
use glam::{Vec3, Vec4};

const EPSILON: f32 = 1e-5;
const NEAR: f32 = 0.1;

fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON.max(b.abs() * EPSILON)
}

/// Mirrors `cube_face` in the point light shader.
fn cube_face(d: Vec3) -> usize {
    let a = d.abs();
    if a.x >= a.y && a.x >= a.z {
        return if d.x > 0.0 { 0 } else { 1 };
    }
    if a.y >= a.z {
        return if d.y > 0.0 { 2 } else { 3 };
    }
    if d.z > 0.0 {
        4
    } else {
        5
    }
}

fn sample_directions() -> Vec<Vec3> {
    let mut directions = Vec::new();
    for x in -2..=2 {
        for y in -2..=2 {
            for z in -2..=2 {
                let d = Vec3::new(x as f32, y as f32, z as f32) + Vec3::new(0.13, -0.07, 0.03);
                directions.push(d.normalize());
            }
        }
    }
    directions
}

#[test]
fn classified_face_contains_the_point() {
    let light = PointLight::new(Vec3::new(100.0, 300.0, -50.0), Vec4::new(0.2, 0.2, 0.8, 50.0), 100.0);
    let matrices = light.shadow_matrices(NEAR);

    for direction in sample_directions() {
        let world = light.position() + direction * 40.0;
        let face = cube_face(direction);
        let clip = matrices[face] * world.extend(1.0);
        assert!(clip.w > 0.0, "{direction} behind face {face}");
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() <= 1.0 + EPSILON && ndc.y.abs() <= 1.0 + EPSILON, "{direction} -> {ndc}");
        assert!((0.0..=1.0).contains(&ndc.z));

        let opposite = face ^ 1;
        assert!((matrices[opposite] * world.extend(1.0)).w < 0.0);
    }
}

/// Faces whose frustum contains `world`, with a small tolerance on the edges.
fn faces_containing(light: &PointLight, world: Vec3) -> Vec<usize> {
    let matrices = light.shadow_matrices(NEAR);
    (0..POINT_SHADOW_FACES)
        .filter(|&face| {
            let clip = matrices[face] * world.extend(1.0);
            if clip.w <= EPSILON {
                return false;
            }
            let ndc = clip.truncate() / clip.w;
            ndc.x.abs() <= 1.0 + 1e-4 && ndc.y.abs() <= 1.0 + 1e-4
        })
        .collect()
}

#[test]
fn points_on_face_boundaries_are_seen_by_every_adjacent_face() {
    let light = PointLight::new(Vec3::new(100.0, 300.0, -50.0), Vec4::new(0.2, 0.2, 0.8, 50.0), 100.0);
    let cases = [
        (Vec3::new(1.0, 1.0, 0.0), 2),
        (Vec3::new(-1.0, 0.0, 1.0), 2),
        (Vec3::new(0.0, -1.0, -1.0), 2),
        (Vec3::new(1.0, 1.0, 1.0), 3),
        (Vec3::new(-1.0, -1.0, 1.0), 3),
    ];
    for (direction, expected) in cases {
        let world = light.position() + direction * 30.0;
        let faces = faces_containing(&light, world);
        assert_eq!(faces.len(), expected, "{direction}: {faces:?}");
        assert!(faces.contains(&cube_face(direction)), "{direction}: {faces:?}");
    }
}

#[test]
fn face_directions_classify_to_themselves() {
    for (face, direction) in FACE_DIRECTIONS.iter().enumerate() {
        assert_eq!(cube_face(*direction), face);
    }
    assert_eq!(FACE_DIRECTIONS.len(), POINT_SHADOW_FACES);
}

#[test]
fn projection_reverses_depth() {
    let radius = 500.0;
    let projection = shadow_projection(radius, NEAR);
    let depth_at = |distance: f32| {
        let clip = projection * Vec3::new(0.0, 0.0, -distance).extend(1.0);
        clip.z / clip.w
    };
    assert!(approx_eq(depth_at(NEAR), 1.0));
    assert!(depth_at(radius).abs() < 1e-3);
    assert!(depth_at(10.0) > depth_at(100.0));
}

#[test]
fn spot_light_looks_down_its_direction() {
    let light = SpotLight::new(Vec3::new(0.0, 300.0, -50.0), Vec3::X, Vec4::new(0.8, 0.5, 0.5, 50.0), 500.0);
    let matrix = light.shadow_matrix(NEAR);

    let ahead = matrix * (light.position() + Vec3::X * 250.0).extend(1.0);
    let ndc = ahead.truncate() / ahead.w;
    assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
    assert!(ndc.z > 0.0 && ndc.z < 1.0);

    let behind = matrix * (light.position() - Vec3::X * 250.0).extend(1.0);
    assert!(behind.w < 0.0);
}

#[test]
fn point_light_shadow_volume_is_its_radius() {
    let light = PointLight::new(Vec3::ZERO, Vec4::ONE, 100.0);
    let visibility = light.shadow_visibility();
    assert!(visibility.intersects_sphere(Vec3::new(105.0, 0.0, 0.0), 10.0));
    assert!(!visibility.intersects_sphere(Vec3::new(150.0, 0.0, 0.0), 10.0));
}
