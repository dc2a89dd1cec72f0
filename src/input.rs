// Keyboard state tracking and the planar camera controller

use glam::Vec3;
use std::collections::HashSet;
use winit::keyboard::KeyCode;

use crate::scene::Transform;

/// Set of currently pressed keys, fed from window events.
#[derive(Debug, Default)]
pub struct InputState {
    pressed: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pressed(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.pressed.insert(key);
        } else {
            self.pressed.remove(&key);
        }
    }

    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }
}

/// Moves the viewer in the horizontal plane and rotates the look direction.
///
/// WASD moves relative to the facing direction, E/Q move up/down, arrow
/// keys rotate. Pitch is clamped short of straight up/down.
pub struct CameraController {
    pub move_speed: f32,
    pub look_speed: f32,
}

impl CameraController {
    pub fn new() -> Self {
        Self {
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }

    pub fn update(&self, input: &InputState, dt: f32, transform: &mut Transform) {
        let mut rotate = Vec3::ZERO;
        if input.is_pressed(KeyCode::ArrowRight) {
            rotate.y += 1.0;
        }
        if input.is_pressed(KeyCode::ArrowLeft) {
            rotate.y -= 1.0;
        }
        if input.is_pressed(KeyCode::ArrowUp) {
            rotate.x += 1.0;
        }
        if input.is_pressed(KeyCode::ArrowDown) {
            rotate.x -= 1.0;
        }

        if rotate.length_squared() > f32::EPSILON {
            transform.rotation += self.look_speed * dt * rotate.normalize();
        }

        transform.rotation.x = transform.rotation.x.clamp(-1.5, 1.5);
        transform.rotation.y = transform.rotation.y.rem_euclid(std::f32::consts::TAU);

        let yaw = transform.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        let up = Vec3::NEG_Y;

        let mut movement = Vec3::ZERO;
        if input.is_pressed(KeyCode::KeyW) {
            movement += forward;
        }
        if input.is_pressed(KeyCode::KeyS) {
            movement -= forward;
        }
        if input.is_pressed(KeyCode::KeyD) {
            movement += right;
        }
        if input.is_pressed(KeyCode::KeyA) {
            movement -= right;
        }
        if input.is_pressed(KeyCode::KeyE) {
            movement += up;
        }
        if input.is_pressed(KeyCode::KeyQ) {
            movement -= up;
        }

        if movement.length_squared() > f32::EPSILON {
            transform.translation += self.move_speed * dt * movement.normalize();
        }
    }
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_state_round_trip() {
        let mut input = InputState::new();
        assert!(!input.is_pressed(KeyCode::KeyW));
        input.set_pressed(KeyCode::KeyW, true);
        assert!(input.is_pressed(KeyCode::KeyW));
        input.set_pressed(KeyCode::KeyW, false);
        assert!(!input.is_pressed(KeyCode::KeyW));
    }

    #[test]
    fn forward_motion_follows_yaw() {
        let controller = CameraController::new();
        let mut input = InputState::new();
        input.set_pressed(KeyCode::KeyW, true);

        let mut transform = Transform::default();
        controller.update(&input, 1.0, &mut transform);

        // Yaw zero faces +z
        assert!(transform.translation.z > 0.0);
        assert!(transform.translation.x.abs() < 1e-6);
    }

    #[test]
    fn pitch_is_clamped() {
        let controller = CameraController::new();
        let mut input = InputState::new();
        input.set_pressed(KeyCode::ArrowUp, true);

        let mut transform = Transform::default();
        for _ in 0..100 {
            controller.update(&input, 0.1, &mut transform);
        }
        assert!(transform.rotation.x <= 1.5);
    }

    #[test]
    fn opposing_keys_cancel_out() {
        let controller = CameraController::new();
        let mut input = InputState::new();
        input.set_pressed(KeyCode::KeyW, true);
        input.set_pressed(KeyCode::KeyS, true);

        let mut transform = Transform::default();
        controller.update(&input, 1.0, &mut transform);
        assert!(transform.translation.length() < 1e-6);
    }
}
