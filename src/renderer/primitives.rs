// renderer/primitives.rs
//! Procedural light-volume proxies. Both are unit sized and scaled by the
//! light radius in the vertex shader.

use std::f32::consts::{PI, SQRT_2};

use wgpu::util::DeviceExt;

use super::vertex::ProxyVertex;

/// Unit UV sphere with outward counter-clockwise faces.
pub fn sphere_mesh(segments: u32, rings: u32) -> (Vec<ProxyVertex>, Vec<u32>) {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let (ring_radius, y) = phi.sin_cos();
        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let (sin_theta, cos_theta) = theta.sin_cos();
            vertices.push(ProxyVertex {
                pos: [ring_radius * cos_theta, y, ring_radius * sin_theta],
            });
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;
            indices.extend_from_slice(&[current, current + 1, next]);
            indices.extend_from_slice(&[current + 1, next + 1, next]);
        }
    }

    (vertices, indices)
}

/// Cone with its apex at the origin opening along +Z to a cap at z = 1.
/// The cap radius of sqrt(2) encloses the corners of a square 90 degree
/// frustum.
pub fn cone_mesh(segments: u32) -> (Vec<ProxyVertex>, Vec<u32>) {
    let segments = segments.max(3);
    let mut vertices = Vec::with_capacity(segments as usize + 2);
    vertices.push(ProxyVertex { pos: [0.0, 0.0, 0.0] });
    vertices.push(ProxyVertex { pos: [0.0, 0.0, 1.0] });
    for segment in 0..segments {
        let theta = 2.0 * PI * segment as f32 / segments as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();
        vertices.push(ProxyVertex {
            pos: [SQRT_2 * cos_theta, SQRT_2 * sin_theta, 1.0],
        });
    }

    let mut indices = Vec::with_capacity(segments as usize * 6);
    for segment in 0..segments {
        let a = 2 + segment;
        let b = 2 + (segment + 1) % segments;
        // side, then cap
        indices.extend_from_slice(&[0, b, a]);
        indices.extend_from_slice(&[1, a, b]);
    }

    (vertices, indices)
}

/// Index/vertex buffers of one proxy shape.
pub struct ProxyMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl ProxyMesh {
    pub fn new(device: &wgpu::Device, label: &str, (vertices, indices): (Vec<ProxyVertex>, Vec<u32>)) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}Vertices")),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}Indices")),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn triangles(vertices: &[ProxyVertex], indices: &[u32]) -> Vec<[Vec3; 3]> {
        indices
            .chunks_exact(3)
            .map(|tri| [tri[0], tri[1], tri[2]].map(|i| Vec3::from_array(vertices[i as usize].pos)))
            .collect()
    }

    #[test]
    fn sphere_faces_point_outward() {
        let (vertices, indices) = sphere_mesh(16, 8);
        assert_eq!(indices.len(), 16 * 8 * 6);
        for [a, b, c] in triangles(&vertices, &indices) {
            let normal = (b - a).cross(c - a);
            if normal.length_squared() < 1e-8 {
                // collapsed triangle at a pole
                continue;
            }
            let center = (a + b + c) / 3.0;
            assert!(normal.dot(center) > 0.0);
        }
        for v in &vertices {
            assert!((Vec3::from_array(v.pos).length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn cone_faces_point_outward() {
        let (vertices, indices) = cone_mesh(12);
        assert_eq!(vertices.len(), 14);
        let centroid = Vec3::new(0.0, 0.0, 0.75);
        for [a, b, c] in triangles(&vertices, &indices) {
            let normal = (b - a).cross(c - a);
            let center = (a + b + c) / 3.0;
            assert!(normal.dot(center - centroid) > 0.0);
        }
    }
}
