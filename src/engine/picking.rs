//! Editor picking registration

use std::any::Any;

use bevy_ecs::entity::Entity;

/// Receives the meshes that select an entity when clicked in the editor.
pub trait PickingRegistry {
    fn register(&mut self, entity: Entity, mesh_entity: Entity);

    fn unregister(&mut self, entity: Entity);

    fn as_any(&self) -> &dyn Any;
}

/// Registry that only remembers registrations.
#[derive(Debug, Default)]
pub struct RecordingPicking {
    registered: Vec<(Entity, Entity)>,
}

impl RecordingPicking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered(&self) -> &[(Entity, Entity)] {
        &self.registered
    }

    pub fn mesh_for(&self, entity: Entity) -> Option<Entity> {
        self.registered
            .iter()
            .find(|(owner, _)| *owner == entity)
            .map(|(_, mesh)| *mesh)
    }
}

impl PickingRegistry for RecordingPicking {
    fn register(&mut self, entity: Entity, mesh_entity: Entity) {
        log::debug!("Picking object registered for {entity:?}");
        self.registered.push((entity, mesh_entity));
    }

    fn unregister(&mut self, entity: Entity) {
        self.registered.retain(|(owner, _)| *owner != entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
