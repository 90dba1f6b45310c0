//! Transform, hierarchy and visibility components

use bevy_ecs::prelude::*;
use glam::{Mat3, Mat4, Quat, Vec3};

/// Local transform of a scene entity, relative to its [`Parent`] if it has one.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Get the local matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Local -Z in parent space
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Local +X in parent space
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Local +Y in parent space
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Orient so that local -Z points at `target`.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.rotation = look_rotation(self.position, target, up);
    }
}

/// Rotation whose -Z axis points from `eye` to `target`, with +Y as close to `up` as possible.
///
/// Degenerate inputs (eye on target, or up parallel to the view direction) fall back to
/// a perturbed up vector so the result is always a valid rotation.
pub fn look_rotation(eye: Vec3, target: Vec3, up: Vec3) -> Quat {
    let mut z = eye - target;
    if z.length_squared() == 0.0 {
        z = Vec3::Z;
    }
    let z = z.normalize();

    let mut x = up.cross(z);
    if x.length_squared() == 0.0 {
        // up and z are parallel
        let nudged = if up.z.abs() == 1.0 {
            z + Vec3::new(0.0001, 0.0, 0.0)
        } else {
            z + Vec3::new(0.0, 0.0, 0.0001)
        };
        x = up.cross(nudged.normalize());
    }
    let x = x.normalize();
    let y = z.cross(x);

    Quat::from_mat3(&Mat3::from_cols(x, y, z)).normalize()
}

/// Hierarchy link to the parent entity.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parent(pub Entity);

/// Visibility flag. Missing means visible.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility(pub bool);

impl Default for Visibility {
    fn default() -> Self {
        Self(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_points_forward_at_target() {
        let mut t = Transform::from_position(Vec3::new(0.0, 0.0, 5.0));
        t.look_at(Vec3::ZERO, Vec3::Y);
        assert!((t.forward() - Vec3::NEG_Z).length() < 1e-5);
        assert!((t.up() - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn look_rotation_handles_parallel_up() {
        let q = look_rotation(Vec3::ZERO, Vec3::Y, Vec3::Y);
        assert!(q.is_finite());
        assert!(((q * Vec3::NEG_Z) - Vec3::Y).length() < 1e-3);
    }
}
