use deferred_batch::renderer::lighting::{LIGHT_BLEND, LIGHT_CULL_MODE, LIGHT_DEPTH_STATE};
use deferred_batch::renderer::pipeline_builder::ADDITIVE_BLEND;
use glam::{Vec3, Vec4};

const EPSILON: f32 = 1e-5;

fn approx_eq(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() <= EPSILON * a.abs().max_element().max(1.0)
}

struct Surface {
    position: Vec3,
    normal: Vec3,
    specular_strength: f32,
    gloss: f32,
}

struct Light {
    position: Vec3,
    color: Vec4,
    radius: f32,
}

/// Mirrors `fs_main` of the point light shader with full visibility.
fn shade(surface: &Surface, eye: Vec3, light: &Light) -> (Vec3, Vec3) {
    let to_light = light.position - surface.position;
    let dist = to_light.length();
    if dist >= light.radius {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    let n = surface.normal.normalize();
    let l = to_light / dist;
    let v = (eye - surface.position).normalize();
    let h = (l + v).normalize();

    let falloff = 1.0 - dist / light.radius;
    let radiance = light.color.truncate() * falloff * falloff * light.color.w;
    let n_dot_l = n.dot(l).max(0.0);
    let shininess = 1.0 + surface.gloss * 127.0;
    let lit = if n_dot_l >= 0.0 { 1.0 } else { 0.0 };
    let specular = n.dot(h).max(0.0).powf(shininess) * surface.specular_strength * lit;
    (radiance * n_dot_l, radiance * specular)
}

fn factor(factor: wgpu::BlendFactor, src_alpha: f32) -> f32 {
    match factor {
        wgpu::BlendFactor::One => 1.0,
        wgpu::BlendFactor::Zero => 0.0,
        wgpu::BlendFactor::SrcAlpha => src_alpha,
        wgpu::BlendFactor::OneMinusSrcAlpha => 1.0 - src_alpha,
        other => panic!("unsupported blend factor {other:?}"),
    }
}

/// Applies the color component of `LIGHT_BLEND` the way the output merger does.
fn blend(dst: Vec3, src: Vec3, src_alpha: f32) -> Vec3 {
    let color = LIGHT_BLEND.color;
    assert_eq!(color.operation, wgpu::BlendOperation::Add);
    src * factor(color.src_factor, src_alpha) + dst * factor(color.dst_factor, src_alpha)
}

/// Draws each light's proxy over the targets in turn. Lights write alpha 1.
fn accumulate(surface: &Surface, eye: Vec3, lights: &[&Light]) -> (Vec3, Vec3) {
    lights.iter().fold((Vec3::ZERO, Vec3::ZERO), |(diffuse, specular), light| {
        let (d, s) = shade(surface, eye, light);
        (blend(diffuse, d, 1.0), blend(specular, s, 1.0))
    })
}

fn demo_lights() -> Vec<Light> {
    vec![
        Light {
            position: Vec3::new(100.0, 300.0, -50.0),
            color: Vec4::new(0.2, 0.2, 0.8, 50.0),
            radius: 100.0,
        },
        Light {
            position: Vec3::new(0.0, 300.0, 30.0),
            color: Vec4::new(0.8, 0.2, 0.2, 50.0),
            radius: 100.0,
        },
        Light {
            position: Vec3::new(2000.0, 1000.0, 2000.0),
            color: Vec4::new(0.8, 0.8, 0.8, 20.0),
            radius: 5000.0,
        },
        Light {
            position: Vec3::new(40.0, 280.0, 10.0),
            color: Vec4::new(0.2, 0.8, 0.2, 50.0),
            radius: 100.0,
        },
    ]
}

#[test]
fn draw_order_does_not_change_the_sum() {
    let lights = demo_lights();
    let eye = Vec3::new(100.0, 300.0, 40.0);
    let surfaces = [
        Surface {
            position: Vec3::new(40.0, 268.75, 0.0),
            normal: Vec3::Y,
            specular_strength: 0.5,
            gloss: 0.3,
        },
        Surface {
            position: Vec3::new(60.0, 275.0, -20.0),
            normal: Vec3::new(0.3, 0.8, -0.2),
            specular_strength: 1.0,
            gloss: 0.9,
        },
    ];

    let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];
    for surface in &surfaces {
        let reference = accumulate(surface, eye, &lights.iter().collect::<Vec<_>>());
        assert!(reference.0.max_element() > 0.0);
        for order in orders {
            let permuted: Vec<&Light> = order.iter().map(|&i| &lights[i]).collect();
            let (diffuse, specular) = accumulate(surface, eye, &permuted);
            assert!(approx_eq(diffuse, reference.0), "{order:?}: {diffuse} vs {}", reference.0);
            assert!(approx_eq(specular, reference.1), "{order:?}: {specular} vs {}", reference.1);
        }
    }
}

#[test]
fn lights_out_of_range_add_nothing() {
    let surface = Surface {
        position: Vec3::ZERO,
        normal: Vec3::Y,
        specular_strength: 1.0,
        gloss: 0.5,
    };
    let far = Light {
        position: Vec3::new(0.0, 150.0, 0.0),
        color: Vec4::new(1.0, 1.0, 1.0, 50.0),
        radius: 100.0,
    };
    let near = Light {
        position: Vec3::new(0.0, 50.0, 0.0),
        ..far
    };
    let eye = Vec3::new(0.0, 10.0, 10.0);

    assert_eq!(shade(&surface, eye, &far), (Vec3::ZERO, Vec3::ZERO));
    let alone = accumulate(&surface, eye, &[&near]);
    let with_far = accumulate(&surface, eye, &[&far, &near]);
    assert_eq!(alone, with_far);
}

#[test]
fn light_pipelines_add_without_depth() {
    let one_plus_one = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    };
    assert_eq!(LIGHT_BLEND, ADDITIVE_BLEND);
    assert_eq!(LIGHT_BLEND.color, one_plus_one);
    assert_eq!(LIGHT_BLEND.alpha, one_plus_one);
    assert_eq!(LIGHT_CULL_MODE, Some(wgpu::Face::Front));
    assert!(LIGHT_DEPTH_STATE.is_none());
}
