//! Cameras
//!
//! Projection matrices use the OpenGL clip-space convention (`z` in `[-1, 1]`).
//! The oblique near-plane clip in [`crate::capture::reflection`] rewrites the third row
//! of that matrix in place, so the matrix is stored on the camera rather than
//! rebuilt on every access. Backends with a `[0, 1]` depth range correct it on upload.

use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec3, Vec4};

use super::transform::look_rotation;

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: 50.0_f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 2000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        Projection::Orthographic {
            left,
            right,
            top,
            bottom,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh_gl(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                near,
                far,
            } => Mat4::orthographic_rh_gl(left, right, bottom, top, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } => *near,
            Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } => *far,
            Projection::Orthographic { far, .. } => *far,
        }
    }

    pub fn is_perspective(&self) -> bool {
        matches!(self, Projection::Perspective { .. })
    }
}

/// A camera with its own pose and a cached projection matrix.
#[derive(Component, Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    /// Up hint used by [`Camera::look_at`]
    pub up: Vec3,
    pub projection: Projection,
    projection_matrix: Mat4,
    /// Debug frustum visualization, created on demand by editor selection
    pub helper: Option<FrustumHelper>,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Projection::default())
    }
}

impl Camera {
    pub fn new(projection: Projection) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            up: Vec3::Y,
            projection,
            projection_matrix: projection.matrix(),
            helper: None,
        }
    }

    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::new(Projection::perspective(fov_y_degrees, aspect, near, far))
    }

    pub fn orthographic(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        Self::new(Projection::orthographic(left, right, top, bottom, near, far))
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_up(mut self, up: Vec3) -> Self {
        self.up = up;
        self
    }

    /// Rebuild the projection matrix from [`Camera::projection`].
    pub fn update_projection_matrix(&mut self) {
        self.projection_matrix = self.projection.matrix();
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    /// Direct access for techniques that edit the matrix after it is built.
    pub fn projection_matrix_mut(&mut self) -> &mut Mat4 {
        &mut self.projection_matrix
    }

    /// Orient the camera so it looks at `target`, keeping `self.up` as the up hint.
    pub fn look_at(&mut self, target: Vec3) {
        self.rotation = look_rotation(self.position, target, self.up);
    }

    pub fn world_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    /// Inverse of the world matrix, i.e. the view matrix
    pub fn world_inverse(&self) -> Mat4 {
        self.world_matrix().inverse()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix * self.world_inverse()
    }

    /// Unit view direction in world space
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn is_perspective(&self) -> bool {
        self.projection.is_perspective()
    }

    /// Update the aspect ratio of a perspective projection and rebuild the matrix.
    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = &mut self.projection {
            *a = aspect;
        }
        self.update_projection_matrix();
    }

    /// Update the clip range and rebuild the matrix. Refreshes the frustum helper if present.
    pub fn set_near_far(&mut self, near: f32, far: f32) {
        match &mut self.projection {
            Projection::Perspective { near: n, far: f, .. }
            | Projection::Orthographic { near: n, far: f, .. } => {
                *n = near;
                *f = far;
            }
        }
        self.update_projection_matrix();
        self.refresh_helper();
    }

    /// Show the frustum helper, creating it on first use.
    pub fn show_helper(&mut self) {
        let corners = self.frustum_corners();
        let helper = self.helper.get_or_insert_with(FrustumHelper::default);
        helper.corners = corners;
        helper.visible = true;
    }

    pub fn hide_helper(&mut self) {
        if let Some(helper) = &mut self.helper {
            helper.visible = false;
        }
    }

    /// Recompute helper geometry after a projection change.
    pub fn refresh_helper(&mut self) {
        if self.helper.is_some() {
            let corners = self.frustum_corners();
            if let Some(helper) = &mut self.helper {
                helper.corners = corners;
            }
        }
    }

    /// The eight frustum corners in camera-local space, near plane first.
    pub fn frustum_corners(&self) -> [Vec3; 8] {
        let inverse = self.projection.matrix().inverse();
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        for z in [-1.0, 1.0] {
            for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = inverse * Vec4::new(x, y, z, 1.0);
                corners[i] = p.truncate() / p.w;
                i += 1;
            }
        }
        corners
    }
}

/// Line-drawn frustum shown for a selected capture camera.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrustumHelper {
    pub visible: bool,
    pub corners: [Vec3; 8],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_aspect_only_affects_perspective() {
        let mut camera = Camera::orthographic(-1.0, 1.0, 1.0, -1.0, 0.1, 10.0);
        let before = camera.projection_matrix();
        camera.set_aspect(2.0);
        assert_eq!(before, camera.projection_matrix());

        let mut camera = Camera::perspective(60.0, 1.0, 0.1, 10.0);
        camera.set_aspect(2.0);
        assert!(matches!(camera.projection, Projection::Perspective { aspect, .. } if aspect == 2.0));
    }

    #[test]
    fn near_far_change_refreshes_helper() {
        let mut camera = Camera::perspective(90.0, 1.0, 1.0, 100.0);
        camera.show_helper();
        camera.set_near_far(2.0, 50.0);
        let helper = camera.helper.as_ref().unwrap();
        // near plane corners sit at z = -near
        assert!((helper.corners[0].z + 2.0).abs() < 1e-3);
        assert!((helper.corners[4].z + 50.0).abs() < 1e-1);
    }

    #[test]
    fn view_matrix_inverts_pose() {
        let mut camera = Camera::default().with_position(Vec3::new(1.0, 2.0, 3.0));
        camera.look_at(Vec3::ZERO);
        let local = camera.world_inverse().transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert!(local.length() < 1e-5);
    }
}
