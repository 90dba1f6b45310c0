//! Frame driver and component host
//!
//! The [`Engine`] owns every component in a slot table. A component is moved out
//! of its slot while one of its hooks runs, so the hook can take the whole
//! [`EngineContext`] mutably. View hooks reach the remaining components through
//! [`ComponentHooks`].

mod component;
mod events;
mod picking;

pub use component::*;
pub use events::*;
pub use picking::*;

use bevy_ecs::entity::Entity;

use crate::backend::create_backend;
use crate::compositor::{DefaultRenderer, RenderViewHooks, ViewContext};
use crate::config::CompositorConfig;
use crate::error::{CompositorError, CompositorResult};
use crate::resources::AssetRegistry;
use crate::scene::Scene;

/// Emitted events are redelivered at most this many rounds per frame.
const MAX_EVENT_ROUNDS: usize = 8;

/// A component and the entity it is attached to.
pub struct ComponentSlot {
    pub component: Box<dyn Component>,
    pub entity: Entity,
}

/// Slot table indexed by [`ComponentId`]. Removed slots are never reused.
#[derive(Default)]
pub struct ComponentSlots {
    slots: Vec<Option<ComponentSlot>>,
}

impl ComponentSlots {
    fn insert(&mut self, slot: ComponentSlot) -> ComponentId {
        self.slots.push(Some(slot));
        ComponentId(self.slots.len() - 1)
    }

    fn take(&mut self, id: ComponentId) -> Option<ComponentSlot> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    fn restore(&mut self, id: ComponentId, slot: ComponentSlot) {
        if let Some(entry) = self.slots.get_mut(id.0) {
            *entry = Some(slot);
        }
    }

    pub fn get(&self, id: ComponentId) -> Option<&ComponentSlot> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut ComponentSlot> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| ComponentId(index))
    }

    /// First component of type `T`.
    pub fn find<T: Component>(&self) -> Option<&T> {
        self.slots
            .iter()
            .flatten()
            .find_map(|slot| slot.component.as_any().downcast_ref::<T>())
    }
}

/// Everything components work with.
pub struct EngineContext {
    pub renderer: DefaultRenderer,
    pub assets: AssetRegistry,
    pub scene: Scene,
    pub events: EventBus,
    pub picking: Box<dyn PickingRegistry>,
    pub components: ComponentSlots,
    /// Editor mode builds proxy meshes and helpers
    pub editor: bool,
    /// Set by anything that needs another frame drawn
    pub needs_render: bool,
}

impl EngineContext {
    /// Hooks that dispatch to the current `PreRenderView` / `PostRenderView` subscribers.
    pub fn view_hooks<'a>(
        components: &'a mut ComponentSlots,
        events: &EventBus,
    ) -> ComponentHooks<'a> {
        ComponentHooks {
            components,
            pre: events.subscribers(EventKind::PreRenderView),
            post: events.subscribers(EventKind::PostRenderView),
        }
    }
}

/// View hooks backed by subscribed components.
///
/// A component that is itself being dispatched is out of its slot and skipped.
pub struct ComponentHooks<'a> {
    components: &'a mut ComponentSlots,
    pre: Vec<ComponentId>,
    post: Vec<ComponentId>,
}

impl RenderViewHooks for ComponentHooks<'_> {
    fn pre_render_view(&mut self, view: &mut ViewContext<'_>) {
        for id in &self.pre {
            if let Some(slot) = self.components.get_mut(*id) {
                slot.component.pre_render_view(view);
            }
        }
    }

    fn post_render_view(&mut self, view: &mut ViewContext<'_>) {
        for id in &self.post {
            if let Some(slot) = self.components.get_mut(*id) {
                slot.component.post_render_view(view);
            }
        }
    }
}

/// Drives components through the frame.
pub struct Engine {
    ctx: EngineContext,
}

impl Engine {
    pub fn new(renderer: DefaultRenderer, picking: Box<dyn PickingRegistry>) -> Self {
        Self {
            ctx: EngineContext {
                renderer,
                assets: AssetRegistry::new(),
                scene: Scene::new(),
                events: EventBus::new(),
                picking,
                components: ComponentSlots::default(),
                editor: false,
                needs_render: true,
            },
        }
    }

    /// Build the backend and renderer described by `config`.
    pub fn from_config(config: &CompositorConfig, picking: Box<dyn PickingRegistry>) -> Self {
        let backend = create_backend(config.backend, config.canvas.width, config.canvas.height);
        // The renderer scales the canvas by the pixel ratio when settings are applied.
        let renderer = DefaultRenderer::new(backend, config.renderer.clone());
        let mut engine = Self::new(renderer, picking);
        engine.ctx.editor = config.editor;
        engine
    }

    pub fn with_editor(mut self, editor: bool) -> Self {
        self.ctx.editor = editor;
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.ctx
    }

    pub fn scene(&self) -> &Scene {
        &self.ctx.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.ctx.scene
    }

    pub fn assets_mut(&mut self) -> &mut AssetRegistry {
        &mut self.ctx.assets
    }

    pub fn renderer(&self) -> &DefaultRenderer {
        &self.ctx.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut DefaultRenderer {
        &mut self.ctx.renderer
    }

    pub fn component<T: Component>(&self, id: ComponentId) -> Option<&T> {
        self.ctx
            .components
            .get(id)
            .and_then(|slot| slot.component.as_any().downcast_ref::<T>())
    }

    pub fn component_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut T> {
        self.ctx
            .components
            .get_mut(id)
            .and_then(|slot| slot.component.as_any_mut().downcast_mut::<T>())
    }

    /// Run `f` with the component moved out of its slot.
    fn with_component<R>(
        &mut self,
        id: ComponentId,
        f: impl FnOnce(&mut dyn Component, &mut EngineContext, Entity) -> R,
    ) -> CompositorResult<R> {
        let mut slot = self
            .ctx
            .components
            .take(id)
            .ok_or_else(|| CompositorError::Config(format!("no component {id:?}")))?;
        let result = f(slot.component.as_mut(), &mut self.ctx, slot.entity);
        self.ctx.components.restore(id, slot);
        Ok(result)
    }

    /// Attach a component to `entity` and initialize it.
    pub fn add_component(
        &mut self,
        entity: Entity,
        component: Box<dyn Component>,
        enabled: bool,
    ) -> CompositorResult<ComponentId> {
        let name = component.name();
        let id = self.ctx.components.insert(ComponentSlot { component, entity });
        let initialized = self.with_component(id, |component, ctx, entity| {
            component.init(ctx, id, entity)?;
            if enabled {
                component.enable(ctx);
            }
            Ok::<(), CompositorError>(())
        })?;
        if let Err(err) = initialized {
            self.ctx.components.take(id);
            self.ctx.events.unsubscribe_all(id);
            log::warn!("Component '{name}' failed to initialize: {err}");
            return Err(err);
        }
        log::debug!("Component '{name}' added as {id:?}");
        Ok(id)
    }

    /// Shut a component down and drop it.
    pub fn remove_component(&mut self, id: ComponentId) -> CompositorResult<()> {
        self.with_component(id, |component, ctx, _| component.shutdown(ctx))?;
        self.ctx.events.unsubscribe_all(id);
        if let Some(slot) = self.ctx.components.take(id) {
            log::debug!("Component '{}' removed", slot.component.name());
        }
        Ok(())
    }

    pub fn set_attributes(
        &mut self,
        id: ComponentId,
        changes: &AttributeChanges,
    ) -> CompositorResult<()> {
        self.with_component(id, |component, ctx, _| {
            component.on_attributes_changed(ctx, changes)
        })?
    }

    pub fn set_renderer_attributes(&mut self, changes: &AttributeChanges) -> CompositorResult<()> {
        let ctx = &mut self.ctx;
        ctx.renderer.attributes_changed(changes, &mut ctx.events)
    }

    pub fn send_view_command(
        &mut self,
        id: ComponentId,
        command: &ViewCommand,
    ) -> CompositorResult<()> {
        self.with_component(id, |component, ctx, _| {
            component.on_view_command(ctx, command)
        })
    }

    pub fn set_enabled(&mut self, id: ComponentId, enabled: bool) -> CompositorResult<()> {
        self.with_component(id, |component, ctx, _| {
            if enabled && !component.is_enabled() {
                component.enable(ctx);
            } else if !enabled && component.is_enabled() {
                component.disable(ctx);
            }
        })
    }

    pub fn select(&mut self, entity: Entity) {
        self.dispatch(EngineEvent::for_entity(EventKind::EditorSelected, entity));
    }

    pub fn unselect(&mut self, entity: Entity) {
        self.dispatch(EngineEvent::for_entity(EventKind::EditorUnselected, entity));
    }

    /// Resize the canvas to `width` x `height` layout pixels.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.ctx.renderer.resize(width, height);
        self.dispatch(EngineEvent::new(EventKind::Resize));
        self.ctx.needs_render = true;
    }

    /// Deliver `event` to its subscribers in subscription order.
    pub fn dispatch(&mut self, event: EngineEvent) {
        for id in self.ctx.events.subscribers(event.kind) {
            let Some(mut slot) = self.ctx.components.take(id) else {
                continue;
            };
            slot.component.on_event(&mut self.ctx, &event);
            self.ctx.components.restore(id, slot);
        }
    }

    /// Run one frame.
    ///
    /// Order: asset polling, `update`, `postUpdate`, `preRender`, then every render
    /// group in ascending order, then the events emitted along the way.
    pub fn frame(&mut self, delta: f32) {
        let loaded = self.ctx.assets.poll(self.ctx.renderer.backend_mut());
        if !loaded.is_empty() {
            self.ctx.needs_render = true;
        }

        self.dispatch(EngineEvent::with_delta(EventKind::Update, delta));
        self.dispatch(EngineEvent::with_delta(EventKind::PostUpdate, delta));

        let render = !self.ctx.renderer.settings().render_on_demand || self.ctx.needs_render;
        if render {
            self.ctx.needs_render = false;
            self.ctx.renderer.pre_render();
            self.dispatch(EngineEvent::with_delta(EventKind::PreRender, delta));
            for group in self.ctx.events.render_groups() {
                self.dispatch(EngineEvent::with_delta(EventKind::Render(group), delta));
            }
        }

        self.flush_emitted();
    }

    fn flush_emitted(&mut self) {
        for _ in 0..MAX_EVENT_ROUNDS {
            let emitted = self.ctx.events.drain_emitted();
            if emitted.is_empty() {
                return;
            }
            for event in emitted {
                if event.kind == EventKind::Resize {
                    let (width, height) = self.ctx.renderer.layout_size();
                    self.ctx.renderer.resize(width, height);
                    self.ctx.needs_render = true;
                }
                self.dispatch(event);
            }
        }
        log::warn!("Events still pending after {MAX_EVENT_ROUNDS} rounds");
    }

    /// Shut down every component.
    pub fn shutdown(&mut self) {
        let ids: Vec<ComponentId> = self.ctx.components.ids().collect();
        for id in ids {
            if let Err(err) = self.remove_component(id) {
                log::warn!("Failed to remove {id:?}: {err}");
            }
        }
    }
}
