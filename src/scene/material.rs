//! Materials and their texture uniforms

use std::collections::HashMap;

use glam::Vec4;

use crate::backend::RenderTargetHandle;

/// Handle to a material in a [`MaterialLibrary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub(crate) usize);

/// How a material is shaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialKind {
    /// Built-in unlit/lit surface
    Simple,
    /// Samples a cube texture by world position
    CubeProbe,
    /// Samples a 2D texture by view-space normal
    SphereProbe,
    /// Full-screen or scene override material identified by name
    Custom(String),
}

/// A material: base color, scalar properties and named texture slots.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub kind: MaterialKind,
    pub color: Vec4,
    pub properties: HashMap<String, f32>,
    pub features: Vec<String>,
    textures: HashMap<String, Option<RenderTargetHandle>>,
}

impl Material {
    pub fn new(name: &str, kind: MaterialKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            color: Vec4::ONE,
            properties: HashMap::new(),
            features: Vec::new(),
            textures: HashMap::new(),
        }
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn with_property(mut self, name: &str, value: f32) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn with_texture(mut self, uniform: &str, texture: Option<RenderTargetHandle>) -> Self {
        self.textures.insert(uniform.to_string(), texture);
        self
    }

    pub fn enable_feature(&mut self, feature: &str) {
        if !self.features.iter().any(|f| f == feature) {
            self.features.push(feature.to_string());
        }
    }

    pub fn set_property(&mut self, name: &str, value: f32) {
        self.properties.insert(name.to_string(), value);
    }

    pub fn property(&self, name: &str) -> Option<f32> {
        self.properties.get(name).copied()
    }

    pub fn set_texture(&mut self, uniform: &str, texture: Option<RenderTargetHandle>) {
        self.textures.insert(uniform.to_string(), texture);
    }

    /// Texture bound to `uniform`. `None` when unbound or never declared.
    pub fn texture(&self, uniform: &str) -> Option<RenderTargetHandle> {
        self.textures.get(uniform).copied().flatten()
    }

    /// First bound texture, used by backends that sample a single slot.
    pub fn primary_texture(&self) -> Option<RenderTargetHandle> {
        let mut names: Vec<&String> = self.textures.keys().collect();
        names.sort();
        names.into_iter().find_map(|name| self.texture(name))
    }
}

/// Owns all materials of a scene.
#[derive(Debug, Default)]
pub struct MaterialLibrary {
    materials: Vec<Option<Material>>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) -> MaterialId {
        log::debug!("Material '{}' created", material.name);
        let id = MaterialId(self.materials.len());
        self.materials.push(Some(material));
        id
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Point a texture uniform at a new target. Returns false if the material is gone.
    pub fn set_texture(
        &mut self,
        id: MaterialId,
        uniform: &str,
        texture: Option<RenderTargetHandle>,
    ) -> bool {
        match self.get_mut(id) {
            Some(material) => {
                material.set_texture(uniform, texture);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: MaterialId) -> Option<Material> {
        self.materials.get_mut(id.0).and_then(Option::take)
    }

    pub fn len(&self) -> usize {
        self.materials.iter().filter(|m| m.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_material_ids_stay_unique() {
        let mut library = MaterialLibrary::new();
        let a = library.insert(Material::new("a", MaterialKind::Simple));
        library.remove(a);
        let b = library.insert(Material::new("b", MaterialKind::Simple));
        assert_ne!(a, b);
        assert!(library.get(a).is_none());
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn unbound_texture_reads_none() {
        let material = Material::new("m", MaterialKind::CubeProbe).with_texture("tCube", None);
        assert_eq!(material.texture("tCube"), None);
        assert_eq!(material.texture("missing"), None);
    }
}
