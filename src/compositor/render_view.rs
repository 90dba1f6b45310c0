//! A camera drawn into a rectangle of the canvas
//!
//! Each view subscribes to its render group and draws its entity's camera
//! through [`DefaultRenderer::render_view`]. Views fade in and out and can
//! animate between viewport rectangles.

use std::any::Any;

use bevy_ecs::entity::Entity;
use serde::{Deserialize, Serialize};

use crate::engine::{
    AttributeChanges, Component, ComponentId, EngineContext, EngineEvent, EventKind, ViewCommand,
};
use crate::error::CompositorResult;
use crate::resources::AssetId;

use super::effect_chain::EffectComposer;
use super::fade::{FadeState, FadeStep};
use super::renderer::RenderOptions;
use super::viewport::{ViewportAnimation, ViewportRect, ViewportSpec, ViewportValue};

/// Replaces a view's own drawing on its render event.
pub type RenderOverride = Box<dyn FnMut(&mut EngineContext, Entity, f32)>;

/// View attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderViewSettings {
    /// `0` draws on `render`, anything else on `renderGroupN`
    pub render_group: u32,
    pub enable_post_process: bool,
    pub enable_shadows: bool,
    pub enable_pre_render_functions: bool,
    pub clear_color: bool,
    pub clear_depth: bool,
    pub viewport_left: ViewportValue,
    pub viewport_bottom: ViewportValue,
    pub viewport_width: ViewportValue,
    pub viewport_height: ViewportValue,
}

impl Default for RenderViewSettings {
    fn default() -> Self {
        let full = ViewportSpec::full();
        Self {
            render_group: 0,
            enable_post_process: true,
            enable_shadows: true,
            enable_pre_render_functions: true,
            clear_color: false,
            clear_depth: false,
            viewport_left: full.left,
            viewport_bottom: full.bottom,
            viewport_width: full.width,
            viewport_height: full.height,
        }
    }
}

impl RenderViewSettings {
    pub fn viewport(&self) -> ViewportSpec {
        ViewportSpec::new(
            self.viewport_left,
            self.viewport_bottom,
            self.viewport_width,
            self.viewport_height,
        )
    }

    fn set_viewport(&mut self, spec: ViewportSpec) {
        self.viewport_left = spec.left;
        self.viewport_bottom = spec.bottom;
        self.viewport_width = spec.width;
        self.viewport_height = spec.height;
    }
}

/// Draws the camera on its entity.
pub struct RenderView {
    settings: RenderViewSettings,
    enabled: bool,
    id: Option<ComponentId>,
    entity: Option<Entity>,
    fade: FadeState,
    rect: ViewportRect,
    animation: ViewportAnimation,
    render_target: Option<AssetId>,
    composer: Option<EffectComposer>,
    render_override: Option<RenderOverride>,
}

impl Default for RenderView {
    fn default() -> Self {
        Self::new(RenderViewSettings::default())
    }
}

impl RenderView {
    pub fn new(settings: RenderViewSettings) -> Self {
        Self {
            settings,
            enabled: false,
            id: None,
            entity: None,
            fade: FadeState::default(),
            rect: ViewportRect::default(),
            animation: ViewportAnimation::default(),
            render_target: None,
            composer: None,
            render_override: None,
        }
    }

    pub fn settings(&self) -> &RenderViewSettings {
        &self.settings
    }

    pub fn opacity(&self) -> f32 {
        self.fade.opacity
    }

    pub fn fade(&self) -> &FadeState {
        &self.fade
    }

    /// Rectangle currently drawn, in layout pixels
    pub fn viewport(&self) -> ViewportRect {
        self.rect
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_active()
    }

    pub fn render_target(&self) -> Option<AssetId> {
        self.render_target
    }

    pub fn effect_chain(&self) -> Option<&EffectComposer> {
        self.composer.as_ref()
    }

    /// Post-processing applied when `enable_post_process` is set.
    pub fn set_effect_chain(&mut self, composer: Option<EffectComposer>) {
        self.composer = composer;
    }

    /// Draw through `f` instead of the view's own render. `None` restores it.
    pub fn set_render_override(&mut self, f: Option<RenderOverride>) {
        self.render_override = f;
    }

    fn render_event(&self) -> EventKind {
        EventKind::Render(self.settings.render_group)
    }

    pub fn enable_render_view(&mut self, ctx: &mut EngineContext, fade: Option<f32>) {
        self.enable(ctx);
        self.fade = self.fade.enable(fade);
    }

    pub fn disable_render_view(&mut self, ctx: &mut EngineContext, fade: Option<f32>) {
        let (fade, immediate) = self.fade.disable(fade);
        self.fade = fade;
        if immediate {
            self.disable(ctx);
        }
    }

    pub fn toggle_render_view(&mut self, ctx: &mut EngineContext, fade: Option<f32>) {
        if self.enabled {
            self.disable_render_view(ctx, fade);
        } else {
            self.enable_render_view(ctx, fade);
        }
    }

    /// Move to `spec`, immediately or over `animation_time` seconds.
    pub fn set_viewport(
        &mut self,
        ctx: &mut EngineContext,
        spec: ViewportSpec,
        animation_time: Option<f32>,
    ) {
        self.settings.set_viewport(spec);
        match animation_time.filter(|seconds| *seconds > 0.0) {
            None => {
                self.animation = ViewportAnimation::default();
                self.resize(ctx);
            }
            Some(seconds) => {
                let to = self.resolve_viewport(ctx);
                self.animation = ViewportAnimation::start(self.rect, to, seconds);
            }
        }
        ctx.needs_render = true;
    }

    fn resolve_viewport(&self, ctx: &EngineContext) -> ViewportRect {
        let (width, height) = ctx.renderer.layout_size();
        self.settings.viewport().resolve(width as f32, height as f32)
    }

    /// Re-resolve the viewport against the canvas and fit the camera to it.
    pub fn resize(&mut self, ctx: &mut EngineContext) {
        self.rect = self.resolve_viewport(ctx);
        self.update_camera_projection(ctx);
    }

    fn update_camera_projection(&self, ctx: &mut EngineContext) {
        if self.rect.height <= 0.0 {
            return;
        }
        let Some(entity) = self.entity else {
            return;
        };
        if let Some(mut camera) = ctx.scene.camera_mut(entity) {
            camera.set_aspect(self.rect.aspect());
        }
    }

    /// Draw the view for this frame. Skips silently while anything it needs is
    /// still loading.
    pub fn render(&mut self, ctx: &mut EngineContext, delta: f32) {
        if !self.enabled {
            return;
        }
        let Some(entity) = self.entity else {
            return;
        };
        let render_target = match self.render_target {
            Some(asset) => match ctx.assets.handle(asset) {
                Some(handle) => Some(handle),
                None => return,
            },
            None => None,
        };
        if ctx.scene.camera(entity).is_none() {
            return;
        }

        if self.fade.is_fading() {
            let (fade, step) = self.fade.step(delta);
            self.fade = fade;
            ctx.needs_render = true;
            if step == FadeStep::Disable {
                self.disable(ctx);
                return;
            }
        }
        if let Some(rect) = self.animation.step(delta) {
            ctx.needs_render = true;
            self.rect = rect;
            self.update_camera_projection(ctx);
        }

        let Some(camera) = ctx.scene.camera(entity).cloned() else {
            return;
        };
        let options = RenderOptions {
            viewport: Some(self.rect),
            render_target,
            clear_color: self.settings.clear_color,
            clear_depth: self.settings.clear_depth,
            clear_stencil: false,
            enable_pre_render_functions: self.settings.enable_pre_render_functions,
            enable_shadows: self.settings.enable_shadows,
            opacity: Some(self.fade.opacity),
            delta: Some(delta),
            render_to_screen: None,
        };
        let composer = if self.settings.enable_post_process {
            self.composer.as_mut()
        } else {
            None
        };

        let mut hooks = EngineContext::view_hooks(&mut ctx.components, &ctx.events);
        if let Err(err) = ctx.renderer.render_view(
            &mut ctx.scene,
            &ctx.assets,
            &camera,
            &options,
            composer,
            &mut hooks,
        ) {
            log::warn!("Render view on {entity:?} failed: {err}");
        }
    }
}

impl Component for RenderView {
    fn name(&self) -> &'static str {
        "RenderView"
    }

    fn init(&mut self, ctx: &mut EngineContext, id: ComponentId, entity: Entity) -> CompositorResult<()> {
        self.id = Some(id);
        self.entity = Some(entity);
        ctx.events.subscribe(self.render_event(), id);
        ctx.events.subscribe(EventKind::Resize, id);
        self.resize(ctx);
        log::debug!("Render view on {entity:?} draws on '{}'", self.render_event().name());
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, ctx: &mut EngineContext) {
        self.enabled = true;
        ctx.needs_render = true;
    }

    fn disable(&mut self, ctx: &mut EngineContext) {
        self.enabled = false;
        ctx.needs_render = true;
    }

    fn shutdown(&mut self, ctx: &mut EngineContext) {
        if let Some(mut composer) = self.composer.take() {
            composer.release(ctx.renderer.backend_mut());
        }
        self.render_override = None;
    }

    fn on_attributes_changed(
        &mut self,
        ctx: &mut EngineContext,
        changes: &AttributeChanges,
    ) -> CompositorResult<()> {
        let previous_event = self.render_event();
        self.settings = changes.apply_to(&self.settings)?;

        if let Some(id) = self.id {
            let event = self.render_event();
            if event != previous_event {
                ctx.events.unsubscribe(previous_event, id);
                ctx.events.subscribe(event, id);
            }
        }
        if let Some(target) = changes.asset("render_target") {
            if let Some(asset) = target {
                ctx.assets.load(asset)?;
            }
            self.render_target = target;
        }
        if changes.keys().any(|key| key.starts_with("viewport_")) {
            self.resize(ctx);
        }
        ctx.needs_render = true;
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut EngineContext, event: &EngineEvent) {
        match event.kind {
            EventKind::Resize => self.resize(ctx),
            kind if kind == self.render_event() => {
                match (self.render_override.as_mut(), self.entity) {
                    (Some(f), Some(entity)) => f(ctx, entity, event.delta),
                    _ => self.render(ctx, event.delta),
                }
            }
            _ => {}
        }
    }

    fn on_view_command(&mut self, ctx: &mut EngineContext, command: &ViewCommand) {
        match *command {
            ViewCommand::EnableRenderView { fade } => self.enable_render_view(ctx, fade),
            ViewCommand::DisableRenderView { fade } => self.disable_render_view(ctx, fade),
            ViewCommand::ToggleRenderView { fade } => self.toggle_render_view(ctx, fade),
            ViewCommand::SetViewport {
                viewport,
                animation_time,
            } => self.set_viewport(ctx, viewport, animation_time),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCommand, HeadlessBackend, Viewport};
    use crate::compositor::{DefaultRenderer, EffectPass, RendererSettings};
    use crate::engine::{Engine, RecordingPicking};
    use crate::resources::RenderTargetDescriptor;
    use crate::scene::{Camera, Transform};
    use std::cell::Cell;
    use std::rc::Rc;

    fn engine() -> Engine {
        let renderer = DefaultRenderer::new(
            Box::new(HeadlessBackend::new(200, 100)),
            RendererSettings::default(),
        );
        Engine::new(renderer, Box::new(RecordingPicking::new()))
    }

    fn add_view(engine: &mut Engine, settings: RenderViewSettings) -> (Entity, ComponentId) {
        let entity = engine.scene_mut().spawn(Transform::default());
        engine
            .scene_mut()
            .world
            .entity_mut(entity)
            .insert(Camera::perspective(50.0, 1.0, 0.1, 100.0));
        let id = engine
            .add_component(entity, Box::new(RenderView::new(settings)), true)
            .unwrap();
        (entity, id)
    }

    fn headless(engine: &mut Engine) -> &mut HeadlessBackend {
        engine
            .renderer_mut()
            .backend_mut()
            .as_any_mut()
            .downcast_mut::<HeadlessBackend>()
            .unwrap()
    }

    fn aspect(engine: &Engine, entity: Entity) -> f32 {
        match engine.scene().camera(entity).unwrap().projection {
            crate::scene::Projection::Perspective { aspect, .. } => aspect,
            _ => unreachable!(),
        }
    }

    #[test]
    fn percent_viewport_resolves_on_init_and_resize() {
        let mut engine = engine();
        let settings = RenderViewSettings {
            viewport_width: ViewportValue::Percent(50.0),
            ..Default::default()
        };
        let (entity, id) = add_view(&mut engine, settings);
        let view = engine.component::<RenderView>(id).unwrap();
        assert_eq!(view.viewport(), ViewportRect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(aspect(&engine, entity), 1.0);

        engine.resize(400, 100);
        let view = engine.component::<RenderView>(id).unwrap();
        assert_eq!(view.viewport().width, 200.0);
        assert_eq!(aspect(&engine, entity), 2.0);
    }

    #[test]
    fn renders_on_its_group_only() {
        let mut engine = engine();
        let settings = RenderViewSettings {
            render_group: 2,
            ..Default::default()
        };
        let (_, id) = add_view(&mut engine, settings);
        assert!(engine
            .context()
            .events
            .is_subscribed(EventKind::Render(2), id));
        assert!(!engine
            .context()
            .events
            .is_subscribed(EventKind::Render(0), id));

        engine
            .set_attributes(id, &AttributeChanges::new().with("render_group", 0))
            .unwrap();
        assert!(engine
            .context()
            .events
            .is_subscribed(EventKind::Render(0), id));
        assert!(!engine
            .context()
            .events
            .is_subscribed(EventKind::Render(2), id));
    }

    #[test]
    fn view_draws_its_viewport_and_restores() {
        let mut engine = engine();
        let (_, id) = add_view(&mut engine, RenderViewSettings::default());
        engine
            .send_view_command(
                id,
                &ViewCommand::SetViewport {
                    viewport: ViewportSpec::parse("10", "20", "50%", "50%").unwrap(),
                    animation_time: None,
                },
            )
            .unwrap();
        headless(&mut engine).take_commands();
        engine.frame(0.016);

        let commands = headless(&mut engine).take_commands();
        let viewports: Vec<Viewport> = commands
            .iter()
            .filter_map(|command| match command {
                BackendCommand::SetViewport(viewport) => Some(*viewport),
                _ => None,
            })
            .collect();
        assert_eq!(viewports[0], Viewport::new(10.0, 20.0, 100.0, 50.0));
        assert_eq!(viewports.last(), Some(&Viewport::full(200, 100)));
        // partial viewports never fade the canvas
        assert!(!commands
            .iter()
            .any(|command| matches!(command, BackendCommand::SetCanvasOpacity(o) if *o != 1.0)));
    }

    #[test]
    fn animated_viewport_updates_aspect_every_step() {
        let mut engine = engine();
        let (entity, id) = add_view(&mut engine, RenderViewSettings::default());
        engine
            .send_view_command(
                id,
                &ViewCommand::SetViewport {
                    viewport: ViewportSpec::parse("0", "0", "100", "100").unwrap(),
                    animation_time: Some(1.0),
                },
            )
            .unwrap();
        assert_eq!(
            engine.component::<RenderView>(id).unwrap().viewport(),
            ViewportRect::new(0.0, 0.0, 200.0, 100.0)
        );

        engine.frame(0.5);
        let view = engine.component::<RenderView>(id).unwrap();
        assert_eq!(view.viewport(), ViewportRect::new(0.0, 0.0, 150.0, 100.0));
        assert!(view.is_animating());
        assert!((aspect(&engine, entity) - 1.5).abs() < 1e-6);

        engine.frame(0.6);
        let view = engine.component::<RenderView>(id).unwrap();
        assert_eq!(view.viewport(), ViewportRect::new(0.0, 0.0, 100.0, 100.0));
        assert!(!view.is_animating());
        assert!((aspect(&engine, entity) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fade_out_disables_after_epsilon_frame() {
        let mut engine = engine();
        let (_, id) = add_view(&mut engine, RenderViewSettings::default());
        engine
            .send_view_command(id, &ViewCommand::DisableRenderView { fade: Some(2.0) })
            .unwrap();

        engine.frame(1.0);
        assert!((engine.component::<RenderView>(id).unwrap().opacity() - 0.5).abs() < 1e-6);
        engine.frame(1.0);
        let view = engine.component::<RenderView>(id).unwrap();
        assert!(view.is_enabled());
        assert_eq!(view.opacity(), crate::compositor::FADE_OUT_EPSILON);
        engine.frame(0.016);
        assert!(!engine.component::<RenderView>(id).unwrap().is_enabled());
    }

    #[test]
    fn toggle_flips_state() {
        let mut engine = engine();
        let (_, id) = add_view(&mut engine, RenderViewSettings::default());
        let toggle = ViewCommand::ToggleRenderView { fade: None };
        engine.send_view_command(id, &toggle).unwrap();
        let view = engine.component::<RenderView>(id).unwrap();
        assert!(!view.is_enabled());
        assert_eq!(view.opacity(), 0.0);

        engine.send_view_command(id, &toggle).unwrap();
        let view = engine.component::<RenderView>(id).unwrap();
        assert!(view.is_enabled());
        assert_eq!(view.opacity(), 1.0);
    }

    #[test]
    fn unloaded_render_target_skips_the_view() {
        let mut engine = engine();
        let (_, id) = add_view(&mut engine, RenderViewSettings::default());
        let texture = engine
            .assets_mut()
            .create_render_texture("view_texture", RenderTargetDescriptor::default());
        engine
            .set_attributes(id, &AttributeChanges::new().with_asset("render_target", Some(texture)))
            .unwrap();

        // The load completes at the start of the next frame, so the view draws.
        headless(&mut engine).take_commands();
        engine.frame(0.016);
        let handle = engine.context().assets.handle(texture).unwrap();
        let commands = headless(&mut engine).take_commands();
        assert!(commands.iter().any(|command| matches!(
            command,
            BackendCommand::Render { target: Some(t), .. } if *t == handle
        )));

        engine.assets_mut().unload(texture);
        engine.frame(0.016);
        let commands = headless(&mut engine).take_commands();
        assert!(!commands
            .iter()
            .any(|command| matches!(command, BackendCommand::Render { .. })));
    }

    #[test]
    fn render_override_replaces_drawing() {
        let mut engine = engine();
        let (view_entity, id) = add_view(&mut engine, RenderViewSettings::default());
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        engine
            .component_mut::<RenderView>(id)
            .unwrap()
            .set_render_override(Some(Box::new(move |_ctx: &mut EngineContext, entity: Entity, _delta: f32| {
                assert_eq!(entity, view_entity);
                seen.set(seen.get() + 1);
            })));

        headless(&mut engine).take_commands();
        engine.frame(0.016);
        assert_eq!(calls.get(), 1);
        let commands = headless(&mut engine).take_commands();
        assert!(!commands
            .iter()
            .any(|command| matches!(command, BackendCommand::Render { .. })));

        engine.component_mut::<RenderView>(id).unwrap().set_render_override(None);
        engine.frame(0.016);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn effect_chain_is_spliced_once_across_frames() {
        let mut engine = engine();
        let (_, id) = add_view(&mut engine, RenderViewSettings::default());
        let mut composer = EffectComposer::new();
        composer.add_pass(EffectPass::new("vignette"));
        engine
            .component_mut::<RenderView>(id)
            .unwrap()
            .set_effect_chain(Some(composer));

        engine.frame(0.016);
        engine.frame(0.016);
        let chain = engine
            .component::<RenderView>(id)
            .unwrap()
            .effect_chain()
            .unwrap();
        assert_eq!(chain.passes.len(), 2);
        assert!(!chain.render_passes_need_update);
    }
}
