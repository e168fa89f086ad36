use glam::{Quat, Vec3};

/// Extra kinematic control applied to a body each step, created only for bodies that need it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyControlState {
    /// Velocity the body is pushed towards.
    pub movement: Vec3,
    /// Rotation the body turns towards.
    pub target_rotation: Quat,
    /// How fast the rotation is approached, in radians per second.
    pub rotation_rate: f32,
    /// Angle between the previous and target rotation on the last applied step.
    pub previous_rotation_distance: f32,
    /// Set until the first step after creation.
    pub just_enabled: bool,
}

impl Default for BodyControlState {
    fn default() -> Self {
        Self {
            movement: Vec3::ZERO,
            target_rotation: Quat::IDENTITY,
            rotation_rate: 0.0,
            previous_rotation_distance: 0.0,
            just_enabled: true,
        }
    }
}

impl BodyControlState {
    pub fn set_target(&mut self, movement: Vec3, target_rotation: Quat, rotation_rate: f32) {
        self.movement = movement;
        self.target_rotation = target_rotation.normalize();
        self.rotation_rate = rotation_rate.max(0.0);
    }

    /// Computes the rotation to use for this step starting from `current`, and records the
    /// remaining distance to the target.
    pub fn step_rotation(&mut self, current: Quat, delta: f32) -> Quat {
        self.just_enabled = false;

        let distance = current.angle_between(self.target_rotation);
        self.previous_rotation_distance = distance;
        if distance <= f32::EPSILON {
            return self.target_rotation;
        }

        let progress = (self.rotation_rate * delta / distance).min(1.0);
        current.slerp(self.target_rotation, progress)
    }
}
