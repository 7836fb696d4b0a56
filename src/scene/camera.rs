use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::scene::frustum::Frustum;

/// Perspective camera shared by a view's lit pass and culling.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Camera at `eye` with yaw applied before pitch, both in degrees.
    pub fn from_angles(eye: Vec3, pitch_deg: f32, yaw_deg: f32) -> Self {
        let mut camera = Self::default();
        camera.set_pose(eye, yaw_pitch(yaw_deg, pitch_deg));
        camera
    }

    /// Places the camera at `eye` looking down the rotated `-Z` axis.
    pub fn set_pose(&mut self, eye: Vec3, rotation: Quat) {
        self.eye = eye;
        self.target = eye + rotation * Vec3::NEG_Z;
        self.up = rotation * Vec3::Y;
    }

    pub fn position(&self) -> Vec3 {
        self.eye
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(self.eye, self.target, self.up);
        let proj = Mat4::perspective_rh(self.fov_y_radians, aspect, self.near, self.far);
        proj * view
    }

    pub fn frustum(&self, aspect: f32) -> Frustum {
        Frustum::from_view_proj(self.view_proj(aspect))
    }
}

/// Orientation from yaw around `+Y` followed by pitch around the local `+X`.
pub fn yaw_pitch(yaw_deg: f32, pitch_deg: f32) -> Quat {
    Quat::from_euler(EulerRot::YXZ, yaw_deg.to_radians(), pitch_deg.to_radians(), 0.0)
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 30.0, 175.0),
            target: Vec3::new(0.0, 30.0, 0.0),
            up: Vec3::Y,
            fov_y_radians: 90f32.to_radians(),
            near: 0.1,
            far: 10000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_proj_round_trips_world_points() {
        let camera = Camera::default();
        let vp = camera.view_proj(16.0 / 9.0);
        let inverse = vp.inverse();
        for point in [
            Vec3::new(0.0, 30.0, 0.0),
            Vec3::new(40.0, 10.0, 100.0),
            Vec3::new(-60.0, 50.0, 20.0),
        ] {
            let back = inverse.project_point3(vp.project_point3(point));
            // depth precision falls off with distance from the eye
            let tolerance = 1e-2 * (point - camera.eye).length();
            assert!((back - point).length() < tolerance, "{point} -> {back}");
        }
    }

    #[test]
    fn set_pose_looks_along_rotated_axis() {
        let mut cam = Camera::default();
        cam.set_pose(Vec3::ZERO, Quat::from_rotation_y(90f32.to_radians()));
        assert!((cam.target - Vec3::NEG_X).length() < 1e-5);
        assert!((cam.up - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn negative_pitch_looks_down() {
        let cam = Camera::from_angles(Vec3::new(0.0, 300.0, 0.0), -35.0, 270.0);
        let forward = cam.target - cam.eye;
        assert!(forward.y < 0.0);
        // yaw 270 turns -Z towards +X
        assert!(forward.x > 0.0);
        assert_eq!(cam.position(), Vec3::new(0.0, 300.0, 0.0));
    }
}
