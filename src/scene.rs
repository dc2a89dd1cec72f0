// Scene data: transforms, renderable objects, and the GPU-visible
// per-frame/per-draw structs

use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Vec3};
use std::sync::Arc;

use crate::model::Model;

/// Per-frame uniform data, one buffer per frame slot.
///
/// Layout must match the shader's global uniform block at set 0 binding 0:
/// a mat4 followed by a vec3 (padded to 16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection_view: Mat4,
    pub light_direction: Vec3,
    pub _padding: f32,
}

impl GlobalUbo {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection_view: Mat4::IDENTITY,
            light_direction: Vec3::new(1.0, -3.0, -1.0).normalize(),
            _padding: 0.0,
        }
    }
}

/// Per-draw push constant: the object's model matrix, vertex stage only.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PushConstantData {
    pub model: Mat4,
}

impl PushConstantData {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Translation, YXZ euler rotation, and non-uniform scale.
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
            * Mat4::from_euler(
                EulerRot::YXZ,
                self.rotation.y,
                self.rotation.x,
                self.rotation.z,
            )
            * Mat4::from_scale(self.scale)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// A renderable: shared mesh plus its placement in the world.
pub struct SceneObject {
    pub model: Arc<Model>,
    pub transform: Transform,
}

impl SceneObject {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            transform: Transform::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn global_ubo_layout_matches_shader_block() {
        // mat4 (64) + vec3 (12) + pad (4)
        assert_eq!(GlobalUbo::SIZE, 80);
        assert_eq!(std::mem::align_of::<GlobalUbo>(), 16);
    }

    #[test]
    fn push_constant_is_one_mat4() {
        assert_eq!(PushConstantData::SIZE, 64);
    }

    #[test]
    fn global_ubo_casts_to_bytes() {
        let ubo = GlobalUbo::default();
        assert_eq!(bytemuck::bytes_of(&ubo).len(), GlobalUbo::SIZE);
    }

    #[test]
    fn default_light_direction_is_normalized() {
        let ubo = GlobalUbo::default();
        assert!((ubo.light_direction.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn identity_transform_is_identity_matrix() {
        let transform = Transform::default();
        assert!(transform.matrix().abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn transform_applies_scale_then_rotation_then_translation() {
        let transform = Transform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::ZERO,
            scale: Vec3::splat(2.0),
        };
        let m = transform.matrix();
        let p = m * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!((p.truncate() - Vec3::new(3.0, 2.0, 3.0)).length() < 1e-6);
    }
}
