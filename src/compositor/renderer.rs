//! The default renderer: global pass list and per-view submission
//!
//! Every view is drawn through [`DefaultRenderer::render_view`]. Without an
//! effect chain the renderer clears once, binds the view's viewport and runs the
//! pass list directly. With one, the pass list is spliced into the chain and the
//! chain's final pass receives the view's viewport and opacity.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::backend::{RenderBackend, RenderTargetHandle, Viewport};
use crate::engine::{AttributeChanges, EngineEvent, EventBus, EventKind};
use crate::error::{CompositorResult, RenderWarning};
use crate::resources::AssetRegistry;
use crate::scene::{Camera, Scene};

use super::effect_chain::{ComposerPass, EffectComposer};
use super::pass_list::{PassDescriptor, PassId, RenderPass, RenderPassList};
use super::viewport::ViewportRect;

/// Frame time assumed when a view does not pass one
pub const DEFAULT_DELTA: f32 = 0.0167;

/// Below this many fragment uniform vectors light counts are clamped.
const LOW_UNIFORM_VECTORS: u32 = 29;

/// Renderer attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// `0` uses the platform ratio
    pub device_pixel_ratio: f32,
    pub antialias: bool,
    pub shadow_map_enabled: bool,
    pub shadow_map_enabled_mobile: bool,
    pub shadow_map_type: u32,
    pub shadow_map_cascade: bool,
    pub shadow_map_debug: bool,
    /// Negative means unlimited
    pub max_shadows: i32,
    pub max_point_lights: i32,
    pub max_dir_lights: i32,
    pub max_spot_lights: i32,
    pub max_hemi_lights: i32,
    pub clear_color: [f32; 3],
    pub clear_alpha: f32,
    pub gamma_input: bool,
    pub gamma_output: bool,
    pub render_on_demand: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
            antialias: false,
            shadow_map_enabled: true,
            shadow_map_enabled_mobile: false,
            shadow_map_type: 2,
            shadow_map_cascade: false,
            shadow_map_debug: false,
            max_shadows: -1,
            max_point_lights: -1,
            max_dir_lights: -1,
            max_spot_lights: -1,
            max_hemi_lights: -1,
            clear_color: [1.0, 1.0, 1.0],
            clear_alpha: 0.0,
            gamma_input: true,
            gamma_output: true,
            render_on_demand: false,
        }
    }
}

/// Settings after device capabilities were taken into account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererLimits {
    pub pixel_ratio: f32,
    pub shadow_map_enabled: bool,
    pub max_dir_lights: i32,
    pub max_point_lights: i32,
    pub max_shadows: i32,
    pub hdr_output: bool,
}

/// Uniforms shared by every material.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SharedUniforms {
    /// Origin and size of the area being drawn, `(x, y, width, height)`
    pub screen_dimensions: Vec4,
}

/// How a single view is drawn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    /// Layout-pixel rectangle; `None` keeps the current viewport
    pub viewport: Option<ViewportRect>,
    pub render_target: Option<RenderTargetHandle>,
    pub clear_color: bool,
    pub clear_depth: bool,
    pub clear_stencil: bool,
    /// Run `PreRenderView` subscribers before drawing
    pub enable_pre_render_functions: bool,
    pub enable_shadows: bool,
    pub opacity: Option<f32>,
    pub delta: Option<f32>,
    pub render_to_screen: Option<bool>,
}

/// What a view hook may use while a view is drawn.
pub struct ViewContext<'a> {
    pub renderer: &'a mut DefaultRenderer,
    pub scene: &'a mut Scene,
    pub assets: &'a AssetRegistry,
    pub camera: &'a Camera,
    pub options: &'a RenderOptions,
}

/// Callbacks around a view. Implemented by the engine to reach subscribed components.
pub trait RenderViewHooks {
    fn pre_render_view(&mut self, view: &mut ViewContext<'_>);

    fn post_render_view(&mut self, view: &mut ViewContext<'_>);
}

/// Hooks that do nothing. Used by nested captures.
pub struct NoHooks;

impl RenderViewHooks for NoHooks {
    fn pre_render_view(&mut self, _view: &mut ViewContext<'_>) {}

    fn post_render_view(&mut self, _view: &mut ViewContext<'_>) {}
}

/// Camera a pass draws through: its own when it still exists, else the view's.
pub fn pass_camera(scene: &Scene, pass: &RenderPass, view_camera: &Camera) -> Camera {
    pass.camera
        .and_then(|entity| scene.camera(entity))
        .cloned()
        .unwrap_or_else(|| view_camera.clone())
}

/// Draw one pass with its override material in place for exactly this draw.
pub fn render_scene_pass(
    backend: &mut dyn RenderBackend,
    scene: &mut Scene,
    pass: &RenderPass,
    camera: &Camera,
    target: Option<RenderTargetHandle>,
) {
    let previous = scene.override_material;
    if let Some(material) = pass.override_material {
        scene.override_material = Some(material);
    }
    backend.render(scene, camera, target, false);
    scene.override_material = previous;
}

fn clamp_light_limit(limit: i32) -> i32 {
    if limit < 0 {
        1
    } else {
        limit.min(1)
    }
}

/// Owns the backend and the global pass list.
pub struct DefaultRenderer {
    backend: Box<dyn RenderBackend>,
    settings: RendererSettings,
    limits: RendererLimits,
    passes: RenderPassList,
    shared_uniforms: SharedUniforms,
    default_pass: PassId,
    /// Canvas size in layout pixels
    layout_size: (u32, u32),
}

impl DefaultRenderer {
    /// Wrap `backend`, whose current size is taken as the layout size.
    pub fn new(backend: Box<dyn RenderBackend>, settings: RendererSettings) -> Self {
        let layout_size = backend.size();
        let mut renderer = Self {
            backend,
            settings,
            limits: RendererLimits {
                pixel_ratio: 1.0,
                shadow_map_enabled: true,
                max_dir_lights: -1,
                max_point_lights: -1,
                max_shadows: -1,
                hdr_output: false,
            },
            passes: RenderPassList::new(),
            shared_uniforms: SharedUniforms::default(),
            default_pass: PassId(0),
            layout_size,
        };

        let capabilities = renderer.backend.capabilities();
        if capabilities.is_mobile && !renderer.settings.shadow_map_enabled_mobile {
            renderer.settings.shadow_map_enabled = false;
        }
        if !capabilities.half_float_linear || capabilities.is_mobile {
            log::debug!("HDR output disabled on {}", renderer.backend.name());
        }
        renderer.apply_settings();
        renderer.default_pass = renderer.add_render_pass(PassDescriptor::new("Scene"), 0);
        log::info!("Renderer initialized on {}", renderer.backend.name());
        renderer
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn limits(&self) -> &RendererLimits {
        &self.limits
    }

    pub fn shared_uniforms(&self) -> &SharedUniforms {
        &self.shared_uniforms
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.limits.pixel_ratio
    }

    /// Canvas size in layout pixels
    pub fn layout_size(&self) -> (u32, u32) {
        self.layout_size
    }

    /// Canvas size in canvas pixels
    pub fn canvas_size(&self) -> (u32, u32) {
        self.backend.size()
    }

    pub fn passes(&self) -> &RenderPassList {
        &self.passes
    }

    /// The "Scene" pass every renderer starts with.
    pub fn default_pass(&self) -> PassId {
        self.default_pass
    }

    /// Add a pass. Negative priorities go first; the first pass clears with the
    /// renderer's clear color.
    pub fn add_render_pass(&mut self, descriptor: PassDescriptor, priority: i32) -> PassId {
        let id = self.passes.add(
            descriptor,
            priority,
            Vec3::from(self.settings.clear_color),
            self.settings.clear_alpha,
        );
        log::debug!("Render pass {id:?} added with priority {priority}");
        id
    }

    pub fn remove_render_pass(&mut self, id: PassId) -> bool {
        self.passes.remove(id).is_some()
    }

    pub fn render_pass_mut(&mut self, id: PassId) -> Option<&mut RenderPass> {
        self.passes.get_mut(id)
    }

    /// Push settings to the backend, clamped to what the device supports.
    pub fn apply_settings(&mut self) {
        let capabilities = self.backend.capabilities();
        if self.settings.device_pixel_ratio == 0.0 {
            self.settings.device_pixel_ratio = capabilities.platform_pixel_ratio;
        }
        let pixel_ratio = self.settings.device_pixel_ratio;

        self.backend.set_clear_color(
            Vec3::from(self.settings.clear_color),
            self.settings.clear_alpha,
        );

        let mut limits = RendererLimits {
            pixel_ratio,
            shadow_map_enabled: self.settings.shadow_map_enabled,
            max_dir_lights: self.settings.max_dir_lights,
            max_point_lights: self.settings.max_point_lights,
            max_shadows: self.settings.max_shadows,
            hdr_output: capabilities.half_float_linear && !capabilities.is_mobile,
        };
        if capabilities.max_fragment_uniform_vectors < LOW_UNIFORM_VECTORS || capabilities.is_mobile {
            limits.max_dir_lights = clamp_light_limit(limits.max_dir_lights);
            limits.max_point_lights = clamp_light_limit(limits.max_point_lights);
            limits.max_shadows = clamp_light_limit(limits.max_shadows);
        }

        let ratio_changed = limits.pixel_ratio != self.limits.pixel_ratio;
        self.limits = limits;
        if ratio_changed {
            let (width, height) = self.layout_size;
            self.resize(width, height);
        }
    }

    /// Apply changed renderer attributes. Requests for material rebuilds and
    /// resizes are emitted on `events`.
    pub fn attributes_changed(
        &mut self,
        changes: &AttributeChanges,
        events: &mut EventBus,
    ) -> CompositorResult<()> {
        self.settings = changes.apply_to(&self.settings)?;
        if self.backend.capabilities().is_mobile {
            self.settings.shadow_map_enabled =
                self.settings.shadow_map_enabled_mobile && self.settings.shadow_map_enabled;
        }
        self.apply_settings();

        let mut rebuild_materials = [
            "shadow_map_enabled_mobile",
            "gamma_output",
            "gamma_input",
            "shadow_map_enabled",
            "shadow_map_debug",
            "shadow_map_cascade",
        ]
        .iter()
        .any(|key| changes.contains(key));

        if changes.contains("shadow_map_type") {
            RenderWarning::ConfigurationWarning(
                "shadow maps must be regenerated after a shadow_map_type change".into(),
            )
            .emit();
            rebuild_materials = true;
        }
        if changes.contains("device_pixel_ratio") {
            events.emit(EngineEvent::new(EventKind::Resize));
        }
        if rebuild_materials {
            log::info!("Rebuilding materials");
            events.emit(EngineEvent::new(EventKind::RebuildMaterials));
        }
        Ok(())
    }

    /// Resize to `width` x `height` layout pixels.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.layout_size = (width, height);
        let ratio = self.limits.pixel_ratio;
        let canvas_width = (width as f32 * ratio).round() as u32;
        let canvas_height = (height as f32 * ratio).round() as u32;
        self.backend.resize(canvas_width, canvas_height);
        log::debug!("Renderer resized to {width}x{height} ({canvas_width}x{canvas_height} canvas)");
    }

    /// Start of a frame: bind the canvas and clear everything.
    pub fn pre_render(&mut self) {
        self.backend.set_render_target(None);
        self.backend.clear(true, true, true);
    }

    /// Backend viewport for a layout-pixel rectangle. Render targets are sized
    /// in their own pixels and are not scaled.
    fn backend_viewport(&self, rect: &ViewportRect, to_target: bool) -> Viewport {
        let scale = if to_target { 1.0 } else { self.limits.pixel_ratio };
        Viewport::new(
            rect.x * scale,
            rect.y * scale,
            rect.width * scale,
            rect.height * scale,
        )
    }

    /// Draw `scene` through `camera` with `options`.
    pub fn render_view(
        &mut self,
        scene: &mut Scene,
        assets: &AssetRegistry,
        camera: &Camera,
        options: &RenderOptions,
        composer: Option<&mut EffectComposer>,
        hooks: &mut dyn RenderViewHooks,
    ) -> CompositorResult<()> {
        if options.enable_pre_render_functions {
            hooks.pre_render_view(&mut ViewContext {
                renderer: &mut *self,
                scene: &mut *scene,
                assets,
                camera,
                options,
            });
        }
        log::trace!(
            "Render view into {:?}, shadows {}",
            options.render_target,
            options.enable_shadows && self.limits.shadow_map_enabled
        );

        let saved_viewport = self.backend.viewport();
        match composer.filter(|composer| !composer.is_empty()) {
            Some(composer) => self.render_effect_chain(scene, camera, options, composer)?,
            None => self.render_passes(scene, camera, options, saved_viewport),
        }

        hooks.post_render_view(&mut ViewContext {
            renderer: &mut *self,
            scene,
            assets,
            camera,
            options,
        });
        Ok(())
    }

    fn render_effect_chain(
        &mut self,
        scene: &mut Scene,
        camera: &Camera,
        options: &RenderOptions,
        composer: &mut EffectComposer,
    ) -> CompositorResult<()> {
        composer.splice_scene_passes(&self.passes.ids());

        let viewport = options
            .viewport
            .map(|rect| self.backend_viewport(&rect, options.render_target.is_some()));
        if let Some(ComposerPass::Effect(last)) = composer.last_pass_mut() {
            last.viewport = viewport;
            last.opacity = options.opacity.unwrap_or(1.0);
            last.render_to_screen = options.render_to_screen.unwrap_or(true);
            if let Some(target) = options.render_target {
                last.render_to_texture = Some(target);
                last.render_to_screen = false;
            }
        }

        let (width, height) = self.backend.size();
        self.shared_uniforms.screen_dimensions = Vec4::new(0.0, 0.0, width as f32, height as f32);
        composer.render(
            self.backend.as_mut(),
            scene,
            &self.passes,
            camera,
            options.delta.unwrap_or(DEFAULT_DELTA),
        )
    }

    fn render_passes(
        &mut self,
        scene: &mut Scene,
        camera: &Camera,
        options: &RenderOptions,
        saved_viewport: Viewport,
    ) {
        // Texture renders leave the canvas opacity alone.
        if options.render_target.is_none() {
            let (layout_width, layout_height) = self.layout_size;
            let covers_canvas = options.viewport.map_or(true, |rect| {
                rect.width == layout_width as f32 && rect.height == layout_height as f32
            });
            let opacity = match options.opacity {
                Some(opacity) if covers_canvas => opacity,
                _ => 1.0,
            };
            if self.backend.canvas_opacity() != opacity {
                self.backend.set_canvas_opacity(opacity);
            }
        }

        self.backend.set_render_target(options.render_target);
        self.backend
            .clear(options.clear_color, options.clear_depth, options.clear_stencil);

        if let Some(rect) = options.viewport {
            let ratio = self.limits.pixel_ratio;
            self.shared_uniforms.screen_dimensions =
                Vec4::new(rect.x, rect.y, rect.width * ratio, rect.height * ratio);
            let viewport = self.backend_viewport(&rect, options.render_target.is_some());
            self.backend.set_viewport(viewport);
        }

        for pass in self.passes.passes() {
            let pass_camera = pass_camera(scene, pass, camera);
            render_scene_pass(
                self.backend.as_mut(),
                scene,
                pass,
                &pass_camera,
                options.render_target,
            );
        }

        if options.viewport.is_some() {
            self.shared_uniforms.screen_dimensions = Vec4::new(
                saved_viewport.x,
                saved_viewport.y,
                saved_viewport.width,
                saved_viewport.height,
            );
            self.backend.set_viewport(saved_viewport);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCommand, Capabilities, HeadlessBackend};
    use crate::compositor::EffectPass;
    use crate::scene::{Material, MaterialKind, Mesh, Transform};

    fn renderer(width: u32, height: u32) -> DefaultRenderer {
        DefaultRenderer::new(
            Box::new(HeadlessBackend::new(width, height)),
            RendererSettings::default(),
        )
    }

    fn headless(renderer: &mut DefaultRenderer) -> &mut HeadlessBackend {
        renderer
            .backend_mut()
            .as_any_mut()
            .downcast_mut::<HeadlessBackend>()
            .unwrap()
    }

    struct CountingHooks {
        pre: usize,
        post: usize,
    }

    impl RenderViewHooks for CountingHooks {
        fn pre_render_view(&mut self, _view: &mut ViewContext<'_>) {
            self.pre += 1;
        }

        fn post_render_view(&mut self, _view: &mut ViewContext<'_>) {
            self.post += 1;
        }
    }

    #[test]
    fn starts_with_a_clearing_scene_pass() {
        let renderer = renderer(100, 100);
        let passes = renderer.passes().passes();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].name, "Scene");
        assert!(passes[0].clear);
    }

    #[test]
    fn override_material_is_scoped_to_its_pass() {
        let mut renderer = renderer(100, 100);
        let mut scene = Scene::new();
        let root = scene.spawn(Transform::default());
        let base = scene.materials.insert(Material::new("base", MaterialKind::Simple));
        let depth = scene
            .materials
            .insert(Material::new("depth", MaterialKind::Custom("depth".into())));
        scene.attach_mesh(root, Mesh::cuboid(1.0), Some(base), "box");
        renderer.add_render_pass(PassDescriptor::new("depth").with_override_material(depth), -1);

        let assets = AssetRegistry::new();
        renderer
            .render_view(
                &mut scene,
                &assets,
                &Camera::default(),
                &RenderOptions::default(),
                None,
                &mut NoHooks,
            )
            .unwrap();

        let materials: Vec<Option<_>> = headless(&mut renderer)
            .commands()
            .iter()
            .filter_map(|command| match command {
                BackendCommand::Render { draws, .. } => Some(draws[0].material),
                _ => None,
            })
            .collect();
        assert_eq!(materials, vec![Some(depth), Some(base)]);
        assert_eq!(scene.override_material, None);
    }

    #[test]
    fn viewport_is_scaled_and_restored() {
        let mut renderer = DefaultRenderer::new(
            Box::new(HeadlessBackend::new(200, 100)),
            RendererSettings {
                device_pixel_ratio: 2.0,
                ..Default::default()
            },
        );
        assert_eq!(renderer.canvas_size(), (400, 200));
        let before = renderer.backend().viewport();

        let options = RenderOptions {
            viewport: Some(ViewportRect::new(10.0, 0.0, 50.0, 40.0)),
            opacity: Some(0.5),
            ..Default::default()
        };
        let mut scene = Scene::new();
        renderer
            .render_view(
                &mut scene,
                &AssetRegistry::new(),
                &Camera::default(),
                &options,
                None,
                &mut NoHooks,
            )
            .unwrap();

        let backend = headless(&mut renderer);
        assert!(backend
            .commands()
            .contains(&BackendCommand::SetViewport(Viewport::new(20.0, 0.0, 100.0, 80.0))));
        // partial viewport keeps the canvas opaque
        assert_eq!(backend.canvas_opacity(), 1.0);
        assert_eq!(renderer.backend().viewport(), before);
        assert_eq!(
            renderer.shared_uniforms().screen_dimensions,
            Vec4::new(before.x, before.y, before.width, before.height)
        );
    }

    #[test]
    fn full_viewport_carries_opacity_to_canvas() {
        let mut renderer = renderer(300, 200);
        let options = RenderOptions {
            viewport: Some(ViewportRect::new(0.0, 0.0, 300.0, 200.0)),
            opacity: Some(0.4),
            ..Default::default()
        };
        renderer
            .render_view(
                &mut Scene::new(),
                &AssetRegistry::new(),
                &Camera::default(),
                &options,
                None,
                &mut NoHooks,
            )
            .unwrap();
        assert_eq!(renderer.backend().canvas_opacity(), 0.4);
    }

    #[test]
    fn pre_hooks_follow_the_option_and_post_hooks_always_run() {
        let mut renderer = renderer(100, 100);
        let mut hooks = CountingHooks { pre: 0, post: 0 };
        let assets = AssetRegistry::new();
        let mut scene = Scene::new();
        let camera = Camera::default();

        renderer
            .render_view(&mut scene, &assets, &camera, &RenderOptions::default(), None, &mut hooks)
            .unwrap();
        let options = RenderOptions {
            enable_pre_render_functions: true,
            ..Default::default()
        };
        renderer
            .render_view(&mut scene, &assets, &camera, &options, None, &mut hooks)
            .unwrap();

        assert_eq!(hooks.pre, 1);
        assert_eq!(hooks.post, 2);
    }

    #[test]
    fn effect_chain_final_pass_targets_the_view_texture() {
        let mut renderer = renderer(100, 100);
        let target = renderer
            .backend_mut()
            .create_render_target(&Default::default())
            .unwrap();
        let mut composer = EffectComposer::new();
        composer.add_pass(EffectPass::new("fxaa"));

        let options = RenderOptions {
            render_target: Some(target),
            render_to_screen: Some(true),
            opacity: Some(0.75),
            ..Default::default()
        };
        renderer
            .render_view(
                &mut Scene::new(),
                &AssetRegistry::new(),
                &Camera::default(),
                &options,
                Some(&mut composer),
                &mut NoHooks,
            )
            .unwrap();

        let Some(ComposerPass::Effect(last)) = composer.passes.last() else {
            panic!("expected an effect pass last");
        };
        assert!(!last.render_to_screen);
        assert_eq!(last.render_to_texture, Some(target));
        assert_eq!(last.opacity, 0.75);
        assert_eq!(composer.passes[0], ComposerPass::Scene(renderer.default_pass()));
        assert_eq!(
            renderer.shared_uniforms().screen_dimensions,
            Vec4::new(0.0, 0.0, 100.0, 100.0)
        );
    }

    #[test]
    fn renderer_attributes_request_rebuilds() {
        let mut renderer = renderer(100, 100);
        let mut events = EventBus::new();
        let changes = AttributeChanges::new()
            .with("shadow_map_type", 1)
            .with("clear_alpha", 0.5);
        renderer.attributes_changed(&changes, &mut events).unwrap();

        assert_eq!(renderer.settings().shadow_map_type, 1);
        assert_eq!(headless(&mut renderer).clear_color().1, 0.5);
        assert!(events.has_emitted(EventKind::RebuildMaterials));
        assert!(!events.has_emitted(EventKind::Resize));

        renderer
            .attributes_changed(&AttributeChanges::new().with("device_pixel_ratio", 2.0), &mut events)
            .unwrap();
        assert!(events.has_emitted(EventKind::Resize));
        assert_eq!(renderer.canvas_size(), (200, 200));
    }

    #[test]
    fn weak_devices_clamp_lights_and_shadows() {
        let capabilities = Capabilities {
            max_fragment_uniform_vectors: 16,
            is_mobile: true,
            ..Default::default()
        };
        let renderer = DefaultRenderer::new(
            Box::new(HeadlessBackend::with_capabilities(64, 64, capabilities)),
            RendererSettings {
                max_dir_lights: 4,
                ..Default::default()
            },
        );
        let limits = renderer.limits();
        assert_eq!(limits.max_dir_lights, 1);
        assert_eq!(limits.max_point_lights, 1);
        assert!(!limits.shadow_map_enabled);
        assert!(!limits.hdr_output);
    }

    #[test]
    fn zero_pixel_ratio_uses_platform_ratio() {
        let capabilities = Capabilities {
            platform_pixel_ratio: 3.0,
            ..Default::default()
        };
        let renderer = DefaultRenderer::new(
            Box::new(HeadlessBackend::with_capabilities(10, 10, capabilities)),
            RendererSettings {
                device_pixel_ratio: 0.0,
                ..Default::default()
            },
        );
        assert_eq!(renderer.pixel_ratio(), 3.0);
        assert_eq!(renderer.canvas_size(), (30, 30));
    }
}
