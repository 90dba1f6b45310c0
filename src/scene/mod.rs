//! Scene graph
//!
//! Scene entities live in a Bevy ECS [`World`]. Hierarchy is expressed with the
//! [`Parent`] component; world matrices and effective visibility are resolved by
//! walking the parent chain on demand.

mod camera;
mod material;
mod mesh;
mod plane;
mod transform;

pub use camera::*;
pub use material::*;
pub use mesh::*;
pub use plane::*;
pub use transform::*;

use bevy_ecs::prelude::*;
use glam::Mat4;

/// Hierarchies deeper than this are treated as cyclic.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// Draws a mesh at the entity's world transform.
#[derive(Component, Debug, Clone)]
pub struct MeshInstance {
    pub mesh: MeshId,
    pub material: Option<MaterialId>,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub name: String,
}

/// A visible mesh resolved for drawing
#[derive(Debug, Clone, Copy)]
pub struct Renderable {
    pub entity: Entity,
    pub mesh: MeshId,
    pub material: Option<MaterialId>,
    pub world: Mat4,
}

/// The scene containing all renderable content
pub struct Scene {
    pub world: World,
    meshes: Vec<Mesh>,
    pub materials: MaterialLibrary,
    /// When set, every object is drawn with this material
    pub override_material: Option<MaterialId>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            meshes: Vec::new(),
            materials: MaterialLibrary::new(),
            override_material: None,
        }
    }

    /// Spawn a root entity.
    pub fn spawn(&mut self, transform: Transform) -> Entity {
        self.world.spawn((transform, Visibility::default())).id()
    }

    /// Spawn an entity under `parent`.
    pub fn spawn_child(&mut self, parent: Entity, transform: Transform) -> Entity {
        self.world
            .spawn((transform, Visibility::default(), Parent(parent)))
            .id()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        let id = MeshId(self.meshes.len());
        self.meshes.push(mesh);
        id
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// Add `mesh` as a child of `parent` and return the new mesh entity.
    pub fn attach_mesh(
        &mut self,
        parent: Entity,
        mesh: Mesh,
        material: Option<MaterialId>,
        name: &str,
    ) -> Entity {
        let mesh = self.add_mesh(mesh);
        let entity = self.spawn_child(parent, Transform::default());
        self.world.entity_mut(entity).insert(MeshInstance {
            mesh,
            material,
            cast_shadow: false,
            receive_shadow: false,
            name: name.to_string(),
        });
        entity
    }

    pub fn transform(&self, entity: Entity) -> Option<&Transform> {
        self.world.get::<Transform>(entity)
    }

    pub fn set_transform(&mut self, entity: Entity, transform: Transform) {
        if let Some(mut t) = self.world.get_mut::<Transform>(entity) {
            *t = transform;
        }
    }

    pub fn camera(&self, entity: Entity) -> Option<&Camera> {
        self.world.get::<Camera>(entity)
    }

    pub fn camera_mut(&mut self, entity: Entity) -> Option<Mut<'_, Camera>> {
        self.world.get_mut::<Camera>(entity)
    }

    pub fn mesh_instance_mut(&mut self, entity: Entity) -> Option<Mut<'_, MeshInstance>> {
        self.world.get_mut::<MeshInstance>(entity)
    }

    pub fn set_visible(&mut self, entity: Entity, visible: bool) {
        if let Some(mut v) = self.world.get_mut::<Visibility>(entity) {
            v.0 = visible;
        }
    }

    /// World matrix of `entity`, composed through its parents.
    pub fn world_matrix(&self, entity: Entity) -> Option<Mat4> {
        let mut matrix = self.transform(entity)?.matrix();
        let mut current = entity;
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let Some(Parent(parent)) = self.world.get::<Parent>(current).copied() else {
                return Some(matrix);
            };
            if let Some(t) = self.transform(parent) {
                matrix = t.matrix() * matrix;
            }
            current = parent;
        }
        log::warn!("Hierarchy of {entity:?} exceeds {MAX_HIERARCHY_DEPTH} levels");
        Some(matrix)
    }

    /// An entity is visible only if it and all its ancestors are.
    pub fn is_visible(&self, entity: Entity) -> bool {
        let mut current = entity;
        for _ in 0..MAX_HIERARCHY_DEPTH {
            if let Some(Visibility(false)) = self.world.get::<Visibility>(current) {
                return false;
            }
            match self.world.get::<Parent>(current) {
                Some(Parent(parent)) => current = *parent,
                None => return true,
            }
        }
        false
    }

    /// Visible mesh instances in a stable order.
    pub fn renderables(&self) -> Vec<Renderable> {
        let mut out: Vec<Renderable> = self
            .world
            .iter_entities()
            .filter_map(|entity_ref| {
                let instance = entity_ref.get::<MeshInstance>()?;
                let entity = entity_ref.id();
                if !self.is_visible(entity) {
                    return None;
                }
                Some(Renderable {
                    entity,
                    mesh: instance.mesh,
                    material: instance.material,
                    world: self.world_matrix(entity)?,
                })
            })
            .collect();
        out.sort_by_key(|r| r.entity);
        out
    }

    /// Material used to draw `renderable`, honoring the scene override.
    pub fn effective_material(&self, renderable: &Renderable) -> Option<MaterialId> {
        self.override_material.or(renderable.material)
    }

    /// Despawn `entity` and everything parented under it.
    pub fn despawn_recursive(&mut self, entity: Entity) {
        let children: Vec<Entity> = self
            .world
            .iter_entities()
            .filter(|e| e.get::<Parent>().is_some_and(|p| p.0 == entity))
            .map(|e| e.id())
            .collect();
        for child in children {
            self.despawn_recursive(child);
        }
        self.world.despawn(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn world_matrix_composes_parents() {
        let mut scene = Scene::new();
        let root = scene.spawn(Transform::from_position_rotation(
            Vec3::new(0.0, 5.0, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        ));
        let child = scene.spawn_child(root, Transform::from_position(Vec3::new(1.0, 0.0, 0.0)));

        let world = scene.world_matrix(child).unwrap();
        let p = world.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 5.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn hidden_ancestor_hides_renderable() {
        let mut scene = Scene::new();
        let root = scene.spawn(Transform::default());
        let mesh_entity = scene.attach_mesh(root, Mesh::cuboid(1.0), None, "box");
        assert_eq!(scene.renderables().len(), 1);

        scene.set_visible(root, false);
        assert!(!scene.is_visible(mesh_entity));
        assert!(scene.renderables().is_empty());
    }

    #[test]
    fn despawn_removes_children() {
        let mut scene = Scene::new();
        let root = scene.spawn(Transform::default());
        let mesh_entity = scene.attach_mesh(root, Mesh::cuboid(1.0), None, "box");
        scene.despawn_recursive(root);
        assert!(scene.transform(mesh_entity).is_none());
    }
}
