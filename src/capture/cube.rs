//! Cube-map probes
//!
//! Six 90° cameras share the probe's position and keep fixed orientations, one
//! per cube face. Faces are rendered at the start of the frame on the probe's
//! cadence.

use std::any::Any;

use bevy_ecs::entity::Entity;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::compositor::{NoHooks, RenderOptions, ViewportRect};
use crate::engine::{
    AttributeChanges, Component, ComponentId, EngineContext, EngineEvent, EventKind,
};
use crate::error::CompositorResult;
use crate::resources::{AssetId, TargetKind};
use crate::scene::{look_rotation, Camera, Material, MaterialId, MaterialKind, Mesh};

use super::cadence::FrameCadence;
use super::target::CaptureTarget;
use super::{attach_proxy, detach_proxy, world_position};

/// Uniform the probe material samples the cube through
pub const CUBE_UNIFORM: &str = "tCube";

/// One face of a cube texture, in layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Layer index in the cube texture
    pub fn index(self) -> u32 {
        self as u32
    }

    /// Direction the face camera looks along.
    pub fn direction(self) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::X,
            CubeFace::NegativeX => Vec3::NEG_X,
            CubeFace::PositiveY => Vec3::Y,
            CubeFace::NegativeY => Vec3::NEG_Y,
            CubeFace::PositiveZ => Vec3::Z,
            CubeFace::NegativeZ => Vec3::NEG_Z,
        }
    }

    /// Up vector of the face camera. Cube textures are addressed with +Y flipped.
    pub fn up(self) -> Vec3 {
        match self {
            CubeFace::PositiveY => Vec3::Z,
            CubeFace::NegativeY => Vec3::NEG_Z,
            _ => Vec3::NEG_Y,
        }
    }

    pub fn rotation(self) -> Quat {
        look_rotation(Vec3::ZERO, self.direction(), self.up())
    }
}

/// Cube probe attributes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeCaptureSettings {
    pub near: f32,
    pub far: f32,
    pub update_frame_interval: u32,
    pub render_pos_x: bool,
    pub render_neg_x: bool,
    pub render_pos_y: bool,
    pub render_neg_y: bool,
    pub render_pos_z: bool,
    pub render_neg_z: bool,
}

impl Default for CubeCaptureSettings {
    fn default() -> Self {
        Self {
            near: 1.0,
            far: 12000.0,
            update_frame_interval: 0,
            render_pos_x: true,
            render_neg_x: true,
            render_pos_y: true,
            render_neg_y: true,
            render_pos_z: true,
            render_neg_z: true,
        }
    }
}

impl CubeCaptureSettings {
    pub fn renders_face(&self, face: CubeFace) -> bool {
        match face {
            CubeFace::PositiveX => self.render_pos_x,
            CubeFace::NegativeX => self.render_neg_x,
            CubeFace::PositiveY => self.render_pos_y,
            CubeFace::NegativeY => self.render_neg_y,
            CubeFace::PositiveZ => self.render_pos_z,
            CubeFace::NegativeZ => self.render_neg_z,
        }
    }
}

/// Renders the surroundings of its entity into a cube texture.
pub struct CubeCapture {
    settings: CubeCaptureSettings,
    enabled: bool,
    entity: Option<Entity>,
    cadence: FrameCadence,
    cameras: [Camera; 6],
    target: CaptureTarget,
    initial_texture: Option<AssetId>,
    material: Option<MaterialId>,
    proxy: Option<Entity>,
}

impl Default for CubeCapture {
    fn default() -> Self {
        Self::new(CubeCaptureSettings::default())
    }
}

impl CubeCapture {
    pub fn new(settings: CubeCaptureSettings) -> Self {
        let cameras = CubeFace::ALL.map(|face| {
            let mut camera = Camera::perspective(90.0, 1.0, settings.near, settings.far)
                .with_up(face.up());
            camera.rotation = face.rotation();
            camera
        });
        Self {
            settings,
            enabled: false,
            entity: None,
            cadence: FrameCadence::new(settings.update_frame_interval),
            cameras,
            target: CaptureTarget::new(TargetKind::Cube, "render_tex_cube"),
            initial_texture: None,
            material: None,
            proxy: None,
        }
    }

    /// Capture into `texture` rather than a temporary cube texture.
    pub fn with_cube_texture(mut self, texture: AssetId) -> Self {
        self.initial_texture = Some(texture);
        self
    }

    pub fn settings(&self) -> &CubeCaptureSettings {
        &self.settings
    }

    pub fn camera(&self, face: CubeFace) -> &Camera {
        &self.cameras[face.index() as usize]
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

    fn set_position(&mut self, position: Vec3) {
        for camera in &mut self.cameras {
            camera.position = position;
        }
    }

    fn set_helpers_visible(&mut self, visible: bool) {
        for camera in &mut self.cameras {
            if visible {
                camera.show_helper();
            } else {
                camera.hide_helper();
            }
        }
    }

    /// Render every enabled face into the active cube texture.
    pub fn capture(&mut self, ctx: &mut EngineContext) {
        let (Some(handle), Some((width, height))) = (
            self.target.active_handle(&ctx.assets),
            self.target.active_size(&ctx.assets),
        ) else {
            return;
        };
        let Some(generate_mipmaps) = ctx
            .renderer
            .backend_mut()
            .render_target_mut(handle)
            .map(|state| std::mem::replace(&mut state.generate_mipmaps, false))
        else {
            return;
        };

        let options = RenderOptions {
            viewport: Some(ViewportRect::new(0.0, 0.0, width as f32, height as f32)),
            render_target: Some(handle),
            clear_color: true,
            ..Default::default()
        };
        for face in CubeFace::ALL {
            if !self.settings.renders_face(face) {
                continue;
            }
            if let Some(state) = ctx.renderer.backend_mut().render_target_mut(handle) {
                state.active_cube_face = face.index();
            }
            let camera = &self.cameras[face.index() as usize];
            if let Err(err) = ctx.renderer.render_view(
                &mut ctx.scene,
                &ctx.assets,
                camera,
                &options,
                None,
                &mut NoHooks,
            ) {
                log::warn!("Cube face {face:?} capture failed: {err}");
            }
        }

        if let Some(state) = ctx.renderer.backend_mut().render_target_mut(handle) {
            state.generate_mipmaps = generate_mipmaps;
            state.needs_update = true;
        }
    }
}

impl Component for CubeCapture {
    fn name(&self) -> &'static str {
        "CubeCapture"
    }

    fn init(&mut self, ctx: &mut EngineContext, id: ComponentId, entity: Entity) -> CompositorResult<()> {
        self.entity = Some(entity);
        for kind in [
            EventKind::Update,
            EventKind::PostUpdate,
            EventKind::PreRender,
            EventKind::EditorSelected,
            EventKind::EditorUnselected,
        ] {
            ctx.events.subscribe(kind, id);
        }
        if let Some(position) = world_position(&ctx.scene, entity) {
            self.set_position(position);
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
            Material::new("cube_capture_material", MaterialKind::CubeProbe)
                .with_property("tFlip", 1.0)
                .with_texture(CUBE_UNIFORM, None),
        );
        self.target
            .bind_material(material, CUBE_UNIFORM, &ctx.assets, &mut ctx.scene.materials);
        self.material = Some(material);

        if ctx.editor {
            self.proxy = Some(attach_proxy(
                ctx,
                entity,
                Mesh::cuboid(0.25),
                material,
                "CubeMapCapturePlane",
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
        if let Some(texture) = changes.asset("cube_texture") {
            self.target
                .set_configured(texture, &mut ctx.assets, &mut ctx.scene.materials)?;
        }
        if changes.contains("near") || changes.contains("far") {
            for camera in &mut self.cameras {
                camera.set_near_far(self.settings.near, self.settings.far);
            }
        }
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut EngineContext, event: &EngineEvent) {
        match event.kind {
            EventKind::Update => {
                if self.target.poll_swap(&mut ctx.assets, &mut ctx.scene.materials) {
                    ctx.needs_render = true;
                }
            }
            EventKind::PostUpdate if self.enabled => {
                if let Some(position) = self.entity.and_then(|e| world_position(&ctx.scene, e)) {
                    self.set_position(position);
                }
            }
            EventKind::PreRender => {
                if self.cadence.advance_then_check() && self.enabled {
                    self.capture(ctx);
                }
            }
            EventKind::EditorSelected if event.entity == self.entity => {
                self.set_helpers_visible(true);
            }
            EventKind::EditorUnselected if event.entity == self.entity => {
                self.set_helpers_visible(false);
            }
            _ => {}
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
