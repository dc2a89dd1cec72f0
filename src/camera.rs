// Camera projection and view math
//
// Matrices are built by hand for Vulkan conventions: depth range 0..1,
// +y pointing down in clip space.

use glam::{Mat4, Vec3, Vec4};

pub struct Camera {
    projection: Mat4,
    view: Mat4,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }

    /// Perspective projection with a 0..1 depth range.
    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        assert!(aspect > 0.0 && aspect.is_finite(), "invalid aspect ratio");
        let tan_half_fovy = (fovy / 2.0).tan();
        self.projection = Mat4::from_cols(
            Vec4::new(1.0 / (aspect * tan_half_fovy), 0.0, 0.0, 0.0),
            Vec4::new(0.0, 1.0 / tan_half_fovy, 0.0, 0.0),
            Vec4::new(0.0, 0.0, far / (far - near), 1.0),
            Vec4::new(0.0, 0.0, -(far * near) / (far - near), 0.0),
        );
    }

    /// View matrix from a viewer position and YXZ euler rotation.
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let (s1, c1) = rotation.y.sin_cos();
        let (s2, c2) = rotation.x.sin_cos();
        let (s3, c3) = rotation.z.sin_cos();

        let u = Vec3::new(
            c1 * c3 + s1 * s2 * s3,
            c2 * s3,
            c1 * s2 * s3 - c3 * s1,
        );
        let v = Vec3::new(
            c3 * s1 * s2 - c1 * s3,
            c2 * c3,
            c1 * c3 * s2 + s1 * s3,
        );
        let w = Vec3::new(c2 * s1, -s2, c1 * c2);

        self.view = Mat4::from_cols(
            Vec4::new(u.x, v.x, w.x, 0.0),
            Vec4::new(u.y, v.y, w.y, 0.0),
            Vec4::new(u.z, v.z, w.z, 0.0),
            Vec4::new(-u.dot(position), -v.dot(position), -w.dot(position), 1.0),
        );
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_view_at_origin() {
        let mut camera = Camera::new();
        camera.set_view_yxz(Vec3::ZERO, Vec3::ZERO);
        assert!(camera.view().abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn view_translates_world_into_eye_space() {
        let mut camera = Camera::new();
        camera.set_view_yxz(Vec3::new(0.0, 0.0, -2.0), Vec3::ZERO);
        let p = camera.view().transform_point3(Vec3::new(0.0, 0.0, 1.0));
        // A point 1 unit ahead of the world origin sits 3 units ahead of the eye
        assert!((p.z - 3.0).abs() < 1e-6);
    }

    #[test]
    fn projection_maps_depth_range_to_zero_one() {
        let mut camera = Camera::new();
        let (near, far) = (0.1, 10.0);
        camera.set_perspective_projection(std::f32::consts::FRAC_PI_3, 1.0, near, far);

        let proj = camera.projection();
        let near_clip = proj * Vec4::new(0.0, 0.0, near, 1.0);
        let far_clip = proj * Vec4::new(0.0, 0.0, far, 1.0);

        assert!((near_clip.z / near_clip.w).abs() < 1e-5);
        assert!((far_clip.z / far_clip.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn projection_accounts_for_aspect() {
        let mut camera = Camera::new();
        camera.set_perspective_projection(std::f32::consts::FRAC_PI_3, 2.0, 0.1, 10.0);
        let proj = camera.projection();
        // Horizontal scale is half the vertical scale at aspect 2
        assert!((proj.col(0).x * 2.0 - proj.col(1).y).abs() < 1e-6);
    }
}
