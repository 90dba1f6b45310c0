//! Engine events and the subscription table
//!
//! Components subscribe by [`EventKind`]. Events emitted while a frame is being
//! dispatched are queued and delivered after the render groups, in emission order.

use std::collections::HashMap;

use bevy_ecs::entity::Entity;

use super::component::ComponentId;

/// Kind of an engine event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Update,
    PostUpdate,
    PreRender,
    /// Render group `n`; group `0` is the plain `render` event
    Render(u32),
    Resize,
    PreRenderView,
    PostRenderView,
    RebuildMaterials,
    DefaultFiltersChanged,
    EditorSelected,
    EditorUnselected,
}

impl EventKind {
    /// Host-facing event name
    pub fn name(&self) -> String {
        match self {
            EventKind::Update => "update".into(),
            EventKind::PostUpdate => "postUpdate".into(),
            EventKind::PreRender => "preRender".into(),
            EventKind::Render(0) => "render".into(),
            EventKind::Render(group) => format!("renderGroup{group}"),
            EventKind::Resize => "resize".into(),
            EventKind::PreRenderView => "preRenderView".into(),
            EventKind::PostRenderView => "postRenderView".into(),
            EventKind::RebuildMaterials => "rebuildMaterials".into(),
            EventKind::DefaultFiltersChanged => "defaultFiltersChanged".into(),
            EventKind::EditorSelected => "editorSelected".into(),
            EventKind::EditorUnselected => "editorUnselected".into(),
        }
    }
}

/// An event with its payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineEvent {
    pub kind: EventKind,
    /// Frame time in seconds, zero for events outside the frame loop
    pub delta: f32,
    /// Subject of editor selection events
    pub entity: Option<Entity>,
}

impl EngineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            delta: 0.0,
            entity: None,
        }
    }

    pub fn with_delta(kind: EventKind, delta: f32) -> Self {
        Self {
            kind,
            delta,
            entity: None,
        }
    }

    pub fn for_entity(kind: EventKind, entity: Entity) -> Self {
        Self {
            kind,
            delta: 0.0,
            entity: Some(entity),
        }
    }
}

/// Subscription table plus the queue of emitted events.
#[derive(Debug, Default)]
pub struct EventBus {
    subscriptions: HashMap<EventKind, Vec<ComponentId>>,
    emitted: Vec<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `id` to `kind`. Subscribing twice has no effect.
    pub fn subscribe(&mut self, kind: EventKind, id: ComponentId) {
        let subscribers = self.subscriptions.entry(kind).or_default();
        if !subscribers.contains(&id) {
            subscribers.push(id);
        }
    }

    pub fn unsubscribe(&mut self, kind: EventKind, id: ComponentId) {
        if let Some(subscribers) = self.subscriptions.get_mut(&kind) {
            subscribers.retain(|subscriber| *subscriber != id);
        }
    }

    /// Remove every subscription held by `id`.
    pub fn unsubscribe_all(&mut self, id: ComponentId) {
        for subscribers in self.subscriptions.values_mut() {
            subscribers.retain(|subscriber| *subscriber != id);
        }
    }

    /// Subscribers of `kind` in subscription order.
    pub fn subscribers(&self, kind: EventKind) -> Vec<ComponentId> {
        self.subscriptions.get(&kind).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, kind: EventKind, id: ComponentId) -> bool {
        self.subscriptions
            .get(&kind)
            .is_some_and(|subscribers| subscribers.contains(&id))
    }

    /// Render groups with at least one subscriber, ascending.
    pub fn render_groups(&self) -> Vec<u32> {
        let mut groups: Vec<u32> = self
            .subscriptions
            .iter()
            .filter_map(|(kind, subscribers)| match kind {
                EventKind::Render(group) if !subscribers.is_empty() => Some(*group),
                _ => None,
            })
            .collect();
        groups.sort_unstable();
        groups
    }

    /// Queue an event for delivery after the current dispatch.
    pub fn emit(&mut self, event: EngineEvent) {
        log::trace!("Event '{}' emitted", event.kind.name());
        self.emitted.push(event);
    }

    pub fn drain_emitted(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.emitted)
    }

    pub fn has_emitted(&self, kind: EventKind) -> bool {
        self.emitted.iter().any(|event| event.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_group_names() {
        assert_eq!(EventKind::Render(0).name(), "render");
        assert_eq!(EventKind::Render(2).name(), "renderGroup2");
    }

    #[test]
    fn subscriptions_are_unique_and_ordered() {
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Update, ComponentId(3));
        bus.subscribe(EventKind::Update, ComponentId(1));
        bus.subscribe(EventKind::Update, ComponentId(3));
        assert_eq!(
            bus.subscribers(EventKind::Update),
            vec![ComponentId(3), ComponentId(1)]
        );

        bus.unsubscribe_all(ComponentId(3));
        assert_eq!(bus.subscribers(EventKind::Update), vec![ComponentId(1)]);
    }

    #[test]
    fn render_groups_ascend_and_skip_empty() {
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Render(4), ComponentId(0));
        bus.subscribe(EventKind::Render(0), ComponentId(1));
        bus.subscribe(EventKind::Render(2), ComponentId(2));
        bus.unsubscribe(EventKind::Render(2), ComponentId(2));
        assert_eq!(bus.render_groups(), vec![0, 4]);
    }

    #[test]
    fn emitted_events_drain_in_order() {
        let mut bus = EventBus::new();
        bus.emit(EngineEvent::new(EventKind::RebuildMaterials));
        bus.emit(EngineEvent::new(EventKind::Resize));
        assert!(bus.has_emitted(EventKind::Resize));

        let kinds: Vec<EventKind> = bus.drain_emitted().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::RebuildMaterials, EventKind::Resize]);
        assert!(bus.drain_emitted().is_empty());
    }
}
