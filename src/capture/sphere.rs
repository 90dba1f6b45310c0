//! Sphere-map probes
//!
//! A single 179° camera sits at the probe and faces the observer. Its render is
//! sampled by view-space normal, a cheap stand-in for a cube probe.

use std::any::Any;

use bevy_ecs::entity::Entity;
use serde::{Deserialize, Serialize};

use crate::compositor::{NoHooks, RenderOptions, ViewContext, ViewportRect};
use crate::engine::{
    AttributeChanges, Component, ComponentId, EngineContext, EngineEvent, EventKind,
};
use crate::error::CompositorResult;
use crate::resources::{AssetId, TargetKind};
use crate::scene::{Camera, Material, MaterialId, MaterialKind, Mesh};

use super::cadence::FrameCadence;
use super::target::CaptureTarget;
use super::{attach_proxy, detach_proxy, world_position};

/// Uniform the probe material samples the sphere map through
pub const SPHERE_UNIFORM: &str = "tSphere";

const SPHERE_FOV: f32 = 179.0;

/// Sphere probe attributes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SphereCaptureSettings {
    pub near: f32,
    pub far: f32,
    pub update_frame_interval: u32,
}

impl Default for SphereCaptureSettings {
    fn default() -> Self {
        Self {
            near: 1.0,
            far: 12000.0,
            update_frame_interval: 0,
        }
    }
}

/// Renders a wide-angle view from its entity towards the observer.
pub struct SphereCapture {
    settings: SphereCaptureSettings,
    enabled: bool,
    entity: Option<Entity>,
    cadence: FrameCadence,
    camera: Camera,
    /// Decided once per frame on `update`
    perform_render: bool,
    target: CaptureTarget,
    initial_texture: Option<AssetId>,
    material: Option<MaterialId>,
    proxy: Option<Entity>,
}

impl Default for SphereCapture {
    fn default() -> Self {
        Self::new(SphereCaptureSettings::default())
    }
}

impl SphereCapture {
    pub fn new(settings: SphereCaptureSettings) -> Self {
        Self {
            settings,
            enabled: false,
            entity: None,
            cadence: FrameCadence::new(settings.update_frame_interval),
            camera: Camera::perspective(SPHERE_FOV, 1.0, settings.near, settings.far),
            perform_render: false,
            target: CaptureTarget::new(TargetKind::Texture2D, "render_tex_sphere_map"),
            initial_texture: None,
            material: None,
            proxy: None,
        }
    }

    /// Capture into `texture` rather than a temporary texture.
    pub fn with_sphere_texture(mut self, texture: AssetId) -> Self {
        self.initial_texture = Some(texture);
        self
    }

    pub fn settings(&self) -> &SphereCaptureSettings {
        &self.settings
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn target(&self) -> &CaptureTarget {
        &self.target
    }

    pub fn material(&self) -> Option<MaterialId> {
        self.material
    }

    pub fn proxy(&self) -> Option<Entity> {
        self.proxy
    }

    /// Whether this frame's views will refresh the sphere map.
    pub fn performs_render(&self) -> bool {
        self.perform_render
    }
}

impl Component for SphereCapture {
    fn name(&self) -> &'static str {
        "SphereCapture"
    }

    fn init(&mut self, ctx: &mut EngineContext, id: ComponentId, entity: Entity) -> CompositorResult<()> {
        self.entity = Some(entity);
        for kind in [
            EventKind::Update,
            EventKind::PostUpdate,
            EventKind::PreRenderView,
            EventKind::EditorSelected,
            EventKind::EditorUnselected,
        ] {
            ctx.events.subscribe(kind, id);
        }
        if let Some(position) = world_position(&ctx.scene, entity) {
            self.camera.position = position;
        }

        match self.initial_texture.take() {
            Some(texture) => {
                self.target
                    .set_configured(Some(texture), &mut ctx.assets, &mut ctx.scene.materials)?;
            }
            None => {
                self.target.ensure_temporary(&mut ctx.assets)?;
            }
        }
        let material = ctx.scene.materials.insert(
            Material::new("sphere_capture_material", MaterialKind::SphereProbe)
                .with_texture(SPHERE_UNIFORM, None),
        );
        self.target
            .bind_material(material, SPHERE_UNIFORM, &ctx.assets, &mut ctx.scene.materials);
        self.material = Some(material);

        if ctx.editor {
            self.proxy = Some(attach_proxy(
                ctx,
                entity,
                Mesh::sphere(0.25, 12, 12),
                material,
                "SphereMapCapturePlane",
            ));
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, ctx: &mut EngineContext) {
        self.enabled = true;
        ctx.needs_render = true;
    }

    fn disable(&mut self, _ctx: &mut EngineContext) {
        self.enabled = false;
        self.perform_render = false;
    }

    fn shutdown(&mut self, ctx: &mut EngineContext) {
        self.target.release(&mut ctx.assets);
        if let Some(material) = self.material.take() {
            ctx.scene.materials.remove(material);
        }
        if let (Some(proxy), Some(entity)) = (self.proxy.take(), self.entity) {
            detach_proxy(ctx, entity, proxy);
        }
    }

    fn on_attributes_changed(
        &mut self,
        ctx: &mut EngineContext,
        changes: &AttributeChanges,
    ) -> CompositorResult<()> {
        self.settings = changes.apply_to(&self.settings)?;
        self.cadence.set_interval(self.settings.update_frame_interval);
        if let Some(texture) = changes.asset("sphere_texture") {
            self.target
                .set_configured(texture, &mut ctx.assets, &mut ctx.scene.materials)?;
        }
        if changes.contains("near") || changes.contains("far") {
            self.camera.set_near_far(self.settings.near, self.settings.far);
        }
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut EngineContext, event: &EngineEvent) {
        match event.kind {
            EventKind::Update => {
                if self.target.poll_swap(&mut ctx.assets, &mut ctx.scene.materials) {
                    ctx.needs_render = true;
                }
                let due = self.cadence.advance_then_check();
                self.perform_render =
                    due && self.enabled && self.target.active_handle(&ctx.assets).is_some();
            }
            EventKind::PostUpdate if self.enabled => {
                if let Some(position) = self.entity.and_then(|e| world_position(&ctx.scene, e)) {
                    self.camera.position = position;
                }
            }
            EventKind::EditorSelected if event.entity == self.entity => self.camera.show_helper(),
            EventKind::EditorUnselected if event.entity == self.entity => {
                self.camera.hide_helper()
            }
            _ => {}
        }
    }

    fn pre_render_view(&mut self, view: &mut ViewContext<'_>) {
        if !self.enabled {
            return;
        }
        self.camera.look_at(view.camera.position);
        if !self.perform_render {
            return;
        }

        let (Some(handle), Some((width, height))) = (
            self.target.active_handle(view.assets),
            self.target.active_size(view.assets),
        ) else {
            return;
        };
        let options = RenderOptions {
            viewport: Some(ViewportRect::new(0.0, 0.0, width as f32, height as f32)),
            render_target: Some(handle),
            clear_color: true,
            ..Default::default()
        };
        if let Err(err) = view.renderer.render_view(
            view.scene,
            view.assets,
            &self.camera,
            &options,
            None,
            &mut NoHooks,
        ) {
            log::warn!("Sphere map capture failed: {err}");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
