//! Infinite planes in Hessian normal form

use glam::{Mat3, Mat4, Vec3, Vec4};

/// Reflect `v` off a surface with unit normal `n`.
pub fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * v.dot(n) * n
}

/// Plane satisfying `normal · p + constant = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub constant: f32,
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            normal: Vec3::Y,
            constant: 0.0,
        }
    }
}

impl Plane {
    pub fn from_normal_and_coplanar_point(normal: Vec3, point: Vec3) -> Self {
        Self {
            normal,
            constant: -point.dot(normal),
        }
    }

    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.constant
    }

    /// Any point on the plane
    pub fn coplanar_point(&self) -> Vec3 {
        self.normal * -self.constant
    }

    /// Transform the plane by an affine matrix. The normal is renormalized.
    pub fn apply_matrix4(&self, matrix: &Mat4) -> Self {
        let normal_matrix = Mat3::from_mat4(*matrix).inverse().transpose();
        let point = matrix.transform_point3(self.coplanar_point());
        let normal = (normal_matrix * self.normal).normalize();
        Self::from_normal_and_coplanar_point(normal, point)
    }

    /// Mirror a point across the plane.
    pub fn reflect_point(&self, point: Vec3) -> Vec3 {
        point - 2.0 * self.distance_to_point(point) * self.normal
    }

    /// `(normal, constant)` packed for clip-plane arithmetic
    pub fn as_vec4(&self) -> Vec4 {
        self.normal.extend(self.constant)
    }
}
