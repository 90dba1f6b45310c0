//! Ordered list of scene passes drawn for every view

use bevy_ecs::entity::Entity;
use glam::Vec3;

use crate::scene::MaterialId;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub u32);

/// One scene draw in the global pass list.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    pub id: PassId,
    pub name: String,
    /// Swapped in as the scene's override material while this pass draws
    pub override_material: Option<MaterialId>,
    /// Weak reference; when absent or stale the view's camera is used
    pub camera: Option<Entity>,
    pub clear: bool,
    pub clear_color: Vec3,
    pub clear_alpha: f32,
}

impl RenderPass {
    fn new(id: PassId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            override_material: None,
            camera: None,
            clear: false,
            clear_color: Vec3::ZERO,
            clear_alpha: 0.0,
        }
    }
}

/// Options for a pass being added.
#[derive(Debug, Clone, Default)]
pub struct PassDescriptor {
    pub name: String,
    pub override_material: Option<MaterialId>,
    pub camera: Option<Entity>,
}

impl PassDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_override_material(mut self, material: MaterialId) -> Self {
        self.override_material = Some(material);
        self
    }

    pub fn with_camera(mut self, camera: Entity) -> Self {
        self.camera = Some(camera);
        self
    }
}

/// The renderer's pass list.
///
/// Negative priorities insert at the head, everything else appends. After every
/// insertion or removal only the first pass clears, using the renderer's clear color.
#[derive(Debug, Default)]
pub struct RenderPassList {
    passes: Vec<RenderPass>,
    next_pass_id: u32,
}

impl RenderPassList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        descriptor: PassDescriptor,
        priority: i32,
        clear_color: Vec3,
        clear_alpha: f32,
    ) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let mut pass = RenderPass::new(id, &descriptor.name);
        pass.override_material = descriptor.override_material;
        pass.camera = descriptor.camera;

        if priority < 0 {
            self.passes.insert(0, pass);
        } else {
            self.passes.push(pass);
        }

        for pass in &mut self.passes {
            pass.clear = false;
        }
        if let Some(first) = self.passes.first_mut() {
            first.clear = true;
            first.clear_color = clear_color;
            first.clear_alpha = clear_alpha;
        }
        id
    }

    /// Remove a pass. The remaining passes keep their order; a new head inherits
    /// the clear.
    pub fn remove(&mut self, id: PassId) -> Option<RenderPass> {
        let index = self.passes.iter().position(|pass| pass.id == id)?;
        let removed = self.passes.remove(index);
        if removed.clear {
            if let Some(first) = self.passes.first_mut() {
                first.clear = true;
                first.clear_color = removed.clear_color;
                first.clear_alpha = removed.clear_alpha;
            }
        }
        Some(removed)
    }

    pub fn get(&self, id: PassId) -> Option<&RenderPass> {
        self.passes.iter().find(|pass| pass.id == id)
    }

    pub fn get_mut(&mut self, id: PassId) -> Option<&mut RenderPass> {
        self.passes.iter_mut().find(|pass| pass.id == id)
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn ids(&self) -> Vec<PassId> {
        self.passes.iter().map(|pass| pass.id).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }
}
