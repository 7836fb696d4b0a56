use glam::{Mat4, Vec3, Vec4};

/// Six planes `(normal, d)` with normals pointing inward.
/// Order: left, right, bottom, top, near, far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts the planes of a view-projection matrix with `[0, 1]` clip depth.
    pub fn from_view_proj(m: Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);

        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(normalize_plane);
        Self { planes }
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.intersects_sphere(point, 0.0)
    }
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.truncate().length();
    if length > f32::EPSILON {
        plane / length
    } else {
        plane
    }
}

/// Volume a node must touch to be drawn in a pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Visibility {
    Frustum(Frustum),
    /// Point lights see everything within their radius.
    Sphere { center: Vec3, radius: f32 },
}

impl Visibility {
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        match self {
            Visibility::Frustum(frustum) => frustum.intersects_sphere(center, radius),
            Visibility::Sphere {
                center: origin,
                radius: reach,
            } => origin.distance_squared(center) <= (reach + radius) * (reach + radius),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(90f32.to_radians(), 1.0, 0.1, 100.0);
        Frustum::from_view_proj(proj * view)
    }

    #[test]
    fn point_in_front_is_inside() {
        let frustum = camera_frustum();
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -200.0)));
    }

    #[test]
    fn sphere_straddling_a_plane_is_visible() {
        let frustum = camera_frustum();
        // 45 degree half angle: x = -z is the left/right boundary.
        assert!(!frustum.contains_point(Vec3::new(12.0, 0.0, -10.0)));
        assert!(frustum.intersects_sphere(Vec3::new(12.0, 0.0, -10.0), 2.0));
    }

    #[test]
    fn sphere_visibility_uses_combined_radius() {
        let visibility = Visibility::Sphere {
            center: Vec3::ZERO,
            radius: 10.0,
        };
        assert!(visibility.intersects_sphere(Vec3::new(14.0, 0.0, 0.0), 5.0));
        assert!(!visibility.intersects_sphere(Vec3::new(16.0, 0.0, 0.0), 5.0));
    }
}
