//! Mesh data and the primitive shapes used for editor proxies

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec2, Vec3};

/// Vertex with position, normal and UV
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

/// Index of a mesh in a [`super::Scene`]'s mesh list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) usize);

/// An indexed triangle mesh
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// A single-quad plane of `width` x `height` in the XY plane, facing +Z.
    pub fn plane(width: f32, height: f32) -> Self {
        let mut mesh = Mesh::new("plane");
        let (hw, hh) = (width / 2.0, height / 2.0);

        for (x, y, u, v) in [
            (-hw, hh, 0.0, 0.0),
            (hw, hh, 1.0, 0.0),
            (-hw, -hh, 0.0, 1.0),
            (hw, -hh, 1.0, 1.0),
        ] {
            mesh.vertices.push(Vertex {
                position: Vec3::new(x, y, 0.0),
                normal: Vec3::Z,
                uv: Vec2::new(u, v),
            });
        }
        mesh.indices.extend_from_slice(&[0, 2, 1, 2, 3, 1]);
        mesh
    }

    /// An axis-aligned box of edge `size` centered at the origin.
    pub fn cuboid(size: f32) -> Self {
        let mut mesh = Mesh::new("box");
        let h = size / 2.0;

        // (normal, tangent u, tangent v) per face
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];

        for (normal, u_axis, v_axis) in faces {
            let base = mesh.vertices.len() as u32;
            for (su, sv) in [(-1.0, 1.0), (1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)] {
                mesh.vertices.push(Vertex {
                    position: (normal + u_axis * su + v_axis * sv) * h,
                    normal,
                    uv: Vec2::new((su + 1.0) * 0.5, (1.0 - sv) * 0.5),
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 2, base + 1, base + 2, base + 3, base + 1]);
        }
        mesh
    }

    /// A UV sphere
    pub fn sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        for ring in 0..=rings {
            let v = ring as f32 / rings as f32;
            let phi = v * std::f32::consts::PI;
            for segment in 0..=segments {
                let u = segment as f32 / segments as f32;
                let theta = u * std::f32::consts::TAU;
                let normal = Vec3::new(-theta.cos() * phi.sin(), phi.cos(), theta.sin() * phi.sin());
                mesh.vertices.push(Vertex {
                    position: normal * radius,
                    normal,
                    uv: Vec2::new(u, 1.0 - v),
                });
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment + 1;
                let b = ring * stride + segment;
                let c = (ring + 1) * stride + segment;
                let d = (ring + 1) * stride + segment + 1;
                if ring != 0 {
                    mesh.indices.extend_from_slice(&[a, b, d]);
                }
                if ring != rings - 1 {
                    mesh.indices.extend_from_slice(&[b, c, d]);
                }
            }
        }
        mesh
    }

    /// Bake `matrix` into positions and normals.
    pub fn transformed(mut self, matrix: &Mat4) -> Self {
        let normal_matrix = Mat3::from_mat4(*matrix).inverse().transpose();
        for vertex in &mut self.vertices {
            vertex.position = matrix.transform_point3(vertex.position);
            vertex.normal = (normal_matrix * vertex.normal).normalize();
        }
        self
    }
}
