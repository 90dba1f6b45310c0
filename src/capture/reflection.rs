//! Planar reflections
//!
//! Before a view is drawn, the observer camera is mirrored about the plane of
//! the owning entity and the scene is rendered from the mirrored pose into the
//! capture texture. The mirrored camera's near plane is replaced by the mirror
//! plane (Lengyel's oblique frustum clipping) so nothing behind the mirror is
//! drawn.

use std::any::Any;
use std::f32::consts::FRAC_PI_2;

use bevy_ecs::entity::Entity;
use glam::{Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::compositor::{NoHooks, RenderOptions, ViewContext, ViewportRect};
use crate::engine::{
    AttributeChanges, Component, ComponentId, EngineContext, EngineEvent, EventKind,
};
use crate::error::CompositorResult;
use crate::resources::{AssetId, TargetKind};
use crate::scene::{reflect, Camera, Material, MaterialId, MaterialKind, Mesh, Plane, Projection};

use super::cadence::FrameCadence;
use super::target::CaptureTarget;
use super::{attach_proxy, detach_proxy};

/// Uniform the reflection material samples the capture through
pub const REFLECTION_UNIFORM: &str = "environmentTexture2D";

const PROXY_MESH_NAME: &str = "ReflectionCapturePlane";

/// Unit normal of a capture plane rotated by `rotation`. The plane faces +Y at rest.
pub fn reflection_normal(rotation: Quat) -> Vec3 {
    (rotation * Vec3::Y).normalize()
}

/// Pose of the mirrored camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionPose {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
}

/// Mirror a point about the plane through `plane_point` with unit `normal`.
fn mirror(point: Vec3, plane_point: Vec3, normal: Vec3) -> Vec3 {
    -reflect(plane_point - point, normal) + plane_point
}

/// Mirror the pose of `camera` about the plane through `plane_point`.
///
/// The look target is one unit along the camera's view direction.
pub fn reflection_pose(plane_point: Vec3, normal: Vec3, camera: &Camera) -> ReflectionPose {
    let look_at = camera.rotation * Vec3::NEG_Z + camera.position;
    let down = camera.rotation * Vec3::NEG_Y;
    ReflectionPose {
        position: mirror(camera.position, plane_point, normal),
        target: mirror(look_at, plane_point, normal),
        up: -reflect(down, normal),
    }
}

/// Replace the near plane of a GL projection matrix with `clip_plane`, given in
/// view space as `(normal, constant)`.
///
/// `clip_bias` pulls the resulting depth range forward to avoid z-fighting on
/// the mirror surface.
pub fn oblique_projection(projection: Mat4, clip_plane: Vec4, clip_bias: f32) -> Mat4 {
    fn sign(value: f32) -> f32 {
        if value < 0.0 {
            -1.0
        } else {
            1.0
        }
    }

    let mut e = projection.to_cols_array();
    let q = Vec4::new(
        (sign(clip_plane.x) + e[8]) / e[0],
        (sign(clip_plane.y) + e[9]) / e[5],
        -1.0,
        (1.0 + e[10]) / e[14],
    );
    let c = clip_plane * (2.0 / clip_plane.dot(q));

    e[2] = c.x;
    e[6] = c.y;
    e[10] = c.z + 1.0 - clip_bias;
    e[14] = c.w;
    Mat4::from_cols_array(&e)
}

/// Reflection attributes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionSettings {
    pub clip_bias: f32,
    /// Frames skipped between captures
    pub update_frame_interval: u32,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self {
            clip_bias: 0.0,
            update_frame_interval: 0,
        }
    }
}

/// Renders the scene mirrored about its entity into a 2D texture.
pub struct ReflectionPlane {
    settings: ReflectionSettings,
    enabled: bool,
    entity: Option<Entity>,
    cadence: FrameCadence,
    perspective: Camera,
    orthographic: Camera,
    uses_orthographic: bool,
    target: CaptureTarget,
    initial_texture: Option<AssetId>,
    material: Option<MaterialId>,
    proxy: Option<Entity>,
}

impl Default for ReflectionPlane {
    fn default() -> Self {
        Self::new(ReflectionSettings::default())
    }
}

impl ReflectionPlane {
    pub fn new(settings: ReflectionSettings) -> Self {
        Self {
            settings,
            enabled: false,
            entity: None,
            cadence: FrameCadence::new(settings.update_frame_interval),
            perspective: Camera::default(),
            orthographic: Camera::orthographic(-1.0, 1.0, 1.0, -1.0, 0.1, 2000.0),
            uses_orthographic: false,
            target: CaptureTarget::new(TargetKind::Texture2D, "render_tex_reflection"),
            initial_texture: None,
            material: None,
            proxy: None,
        }
    }

    /// Capture into `texture` rather than a temporary texture.
    pub fn with_reflection_texture(mut self, texture: AssetId) -> Self {
        self.initial_texture = Some(texture);
        self
    }

    pub fn settings(&self) -> &ReflectionSettings {
        &self.settings
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

    /// Camera of the most recent reflection update.
    pub fn reflection_camera(&self) -> &Camera {
        if self.uses_orthographic {
            &self.orthographic
        } else {
            &self.perspective
        }
    }

    /// Mirror `camera` about the plane at `plane_world` and return the updated
    /// reflection camera.
    pub fn update_reflection(&mut self, plane_world: Mat4, camera: &Camera) -> &Camera {
        let (_, rotation, plane_point) = plane_world.to_scale_rotation_translation();
        let normal = reflection_normal(rotation);
        let pose = reflection_pose(plane_point, normal, camera);

        self.uses_orthographic = !camera.is_perspective();
        let clip_bias = self.settings.clip_bias;
        let reflection = if self.uses_orthographic {
            &mut self.orthographic
        } else {
            &mut self.perspective
        };
        match (camera.projection, &mut reflection.projection) {
            (
                Projection::Perspective { fov_y, aspect, .. },
                Projection::Perspective {
                    fov_y: to_fov,
                    aspect: to_aspect,
                    ..
                },
            ) => {
                *to_fov = fov_y;
                *to_aspect = aspect;
            }
            (
                Projection::Orthographic {
                    left,
                    right,
                    top,
                    bottom,
                    ..
                },
                Projection::Orthographic {
                    left: to_left,
                    right: to_right,
                    top: to_top,
                    bottom: to_bottom,
                    ..
                },
            ) => {
                *to_left = left;
                *to_right = right;
                *to_top = top;
                *to_bottom = bottom;
            }
            _ => {}
        }

        reflection.position = pose.position;
        reflection.up = pose.up;
        reflection.look_at(pose.target);
        reflection.update_projection_matrix();

        let clip_plane = Plane::from_normal_and_coplanar_point(normal, plane_point)
            .apply_matrix4(&reflection.world_inverse())
            .as_vec4();
        let oblique = oblique_projection(reflection.projection_matrix(), clip_plane, clip_bias);
        *reflection.projection_matrix_mut() = oblique;
        reflection
    }

    fn create_material(&mut self, ctx: &mut EngineContext) -> MaterialId {
        let mut material = Material::new("reflection_material", MaterialKind::Simple)
            .with_color(Vec4::new(0.0, 0.0, 0.0, 1.0))
            .with_property("gloss", 1.0)
            .with_property("reflectionBias", 1.0)
            .with_property("environmentMappingType", 2.0)
            .with_texture(REFLECTION_UNIFORM, None);
        material.enable_feature("Reflections");
        let id = ctx.scene.materials.insert(material);
        self.target
            .bind_material(id, REFLECTION_UNIFORM, &ctx.assets, &mut ctx.scene.materials);
        self.material = Some(id);
        id
    }

    fn create_proxy(&mut self, ctx: &mut EngineContext, entity: Entity, material: MaterialId) {
        let mesh = Mesh::plane(0.5, 0.5).transformed(&Mat4::from_rotation_x(-FRAC_PI_2));
        self.proxy = Some(attach_proxy(ctx, entity, mesh, material, PROXY_MESH_NAME));
    }
}

impl Component for ReflectionPlane {
    fn name(&self) -> &'static str {
        "ReflectionPlane"
    }

    fn init(&mut self, ctx: &mut EngineContext, id: ComponentId, entity: Entity) -> CompositorResult<()> {
        self.entity = Some(entity);
        ctx.events.subscribe(EventKind::Update, id);
        ctx.events.subscribe(EventKind::PreRenderView, id);

        match self.initial_texture.take() {
            Some(texture) => {
                self.target
                    .set_configured(Some(texture), &mut ctx.assets, &mut ctx.scene.materials)?;
            }
            None => {
                self.target.ensure_temporary(&mut ctx.assets)?;
            }
        }
        let material = self.create_material(ctx);
        if ctx.editor {
            self.create_proxy(ctx, entity, material);
        }
        log::debug!("Reflection plane initialized on {entity:?}");
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
        if let Some(handle) = self.target.active_handle(&ctx.assets) {
            let backend = ctx.renderer.backend_mut();
            backend.set_render_target(Some(handle));
            backend.clear(true, true, true);
        }
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
        if let Some(texture) = changes.asset("reflection_texture") {
            self.target
                .set_configured(texture, &mut ctx.assets, &mut ctx.scene.materials)?;
        }
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut EngineContext, event: &EngineEvent) {
        if event.kind == EventKind::Update
            && self.target.poll_swap(&mut ctx.assets, &mut ctx.scene.materials)
        {
            ctx.needs_render = true;
        }
    }

    fn pre_render_view(&mut self, view: &mut ViewContext<'_>) {
        if !self.enabled || !self.cadence.check_then_advance() {
            return;
        }
        let Some(plane_world) = self.entity.and_then(|entity| view.scene.world_matrix(entity))
        else {
            return;
        };
        let camera = self.update_reflection(plane_world, view.camera).clone();

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
            clear_depth: true,
            enable_shadows: false,
            enable_pre_render_functions: false,
            ..Default::default()
        };
        if let Err(err) = view.renderer.render_view(
            view.scene,
            view.assets,
            &camera,
            &options,
            None,
            &mut NoHooks,
        ) {
            log::warn!("Reflection capture failed: {err}");
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
    use crate::backend::{BackendCommand, HeadlessBackend};
    use crate::compositor::{DefaultRenderer, RenderView, RendererSettings};
    use crate::engine::{Engine, RecordingPicking};
    use crate::scene::Transform;

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn normal_follows_rotation() {
        assert_close(reflection_normal(Quat::IDENTITY), Vec3::Y);
        assert_close(
            reflection_normal(Quat::from_rotation_x(FRAC_PI_2)),
            Vec3::Z,
        );
    }

    #[test]
    fn camera_above_floor_is_mirrored_below() {
        let mut camera = Camera::default().with_position(Vec3::new(0.0, 5.0, 10.0));
        camera.look_at(Vec3::ZERO);
        let pose = reflection_pose(Vec3::ZERO, Vec3::Y, &camera);
        assert_close(pose.position, Vec3::new(0.0, -5.0, 10.0));
        // a camera looking down at the floor looks up at it from below
        assert!(pose.target.y > pose.position.y);
    }

    #[test]
    fn reflecting_twice_restores_pose() {
        let mut camera = Camera::default().with_position(Vec3::new(3.0, 4.0, -2.0));
        camera.look_at(Vec3::new(-1.0, 0.5, 6.0));
        let normal = reflection_normal(Quat::from_euler(glam::EulerRot::XYZ, 0.3, 0.7, -0.2));
        let point = Vec3::new(0.5, -1.0, 2.0);

        let once = reflection_pose(point, normal, &camera);
        let twice_position = mirror(once.position, point, normal);
        let twice_target = mirror(once.target, point, normal);

        let look_at = camera.rotation * Vec3::NEG_Z + camera.position;
        assert_close(twice_position, camera.position);
        assert_close(twice_target, look_at);
        assert_close(-reflect(-once.up, normal), camera.rotation * Vec3::Y);
    }

    #[test]
    fn mirror_plane_lies_on_the_near_plane() {
        let projection = Projection::perspective(60.0, 1.5, 1.0, 100.0).matrix();
        // view-space plane z = -5, facing the camera
        let plane = Plane::from_normal_and_coplanar_point(Vec3::Z, Vec3::new(0.0, 0.0, -5.0));
        let oblique = oblique_projection(projection, plane.as_vec4(), 0.0);

        for point in [
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::new(1.5, -2.0, -5.0),
            Vec3::new(-3.0, 0.5, -5.0),
        ] {
            let clip = oblique * point.extend(1.0);
            assert!((clip.z / clip.w + 1.0).abs() < 1e-4);
        }
        // in front of the mirror stays inside the depth range
        let clip = oblique * Vec4::new(0.0, 0.0, -20.0, 1.0);
        let depth = clip.z / clip.w;
        assert!(depth > -1.0 && depth <= 1.0);
        // behind it is clipped
        let clip = oblique * Vec4::new(0.0, 0.0, -3.0, 1.0);
        assert!(clip.z / clip.w < -1.0);
    }

    #[test]
    fn clip_bias_shifts_depth() {
        let projection = Projection::perspective(60.0, 1.0, 1.0, 100.0).matrix();
        let plane = Vec4::new(0.0, 0.0, 1.0, 5.0);
        let plain = oblique_projection(projection, plane, 0.0);
        let biased = oblique_projection(projection, plane, 0.1);
        let point = Vec4::new(0.0, 0.0, -5.0, 1.0);
        assert!((biased * point).z > (plain * point).z);
    }

    #[test]
    fn reflection_camera_copies_observer_intrinsics() {
        let mut plane = ReflectionPlane::default();
        let camera = Camera::perspective(35.0, 2.0, 0.5, 50.0).with_position(Vec3::new(0.0, 2.0, 5.0));
        let reflection = plane.update_reflection(Mat4::IDENTITY, &camera);
        match reflection.projection {
            Projection::Perspective { fov_y, aspect, .. } => {
                assert!((fov_y - 35.0_f32.to_radians()).abs() < 1e-6);
                assert_eq!(aspect, 2.0);
            }
            _ => panic!("expected a perspective reflection camera"),
        }
        assert_close(reflection.position, Vec3::new(0.0, -2.0, 5.0));

        let ortho = Camera::orthographic(-4.0, 4.0, 3.0, -3.0, 0.1, 100.0)
            .with_position(Vec3::new(0.0, 1.0, 0.0));
        let reflection = plane.update_reflection(Mat4::IDENTITY, &ortho);
        assert!(!reflection.is_perspective());
        assert!(!plane.reflection_camera().is_perspective());
    }

    fn engine_with_view(editor: bool) -> (Engine, Entity) {
        let renderer = DefaultRenderer::new(
            Box::new(HeadlessBackend::new(128, 128)),
            RendererSettings::default(),
        );
        let mut engine = Engine::new(renderer, Box::new(RecordingPicking::new())).with_editor(editor);
        let camera_entity = engine.scene_mut().spawn(Transform::default());
        let mut camera = Camera::default().with_position(Vec3::new(0.0, 3.0, 6.0));
        camera.look_at(Vec3::ZERO);
        engine.scene_mut().world.entity_mut(camera_entity).insert(camera);
        engine
            .add_component(camera_entity, Box::new(RenderView::default()), true)
            .unwrap();
        (engine, camera_entity)
    }

    fn headless(engine: &mut Engine) -> &mut HeadlessBackend {
        engine
            .renderer_mut()
            .backend_mut()
            .as_any_mut()
            .downcast_mut::<HeadlessBackend>()
            .unwrap()
    }

    fn mirrored_renders(commands: &[BackendCommand], target: crate::backend::RenderTargetHandle) -> usize {
        commands
            .iter()
            .filter(|command| {
                matches!(command, BackendCommand::Render { target: Some(t), .. } if *t == target)
            })
            .count()
    }

    #[test]
    fn captures_into_temporary_texture_before_the_view() {
        let (mut engine, _) = engine_with_view(false);
        let mirror_entity = engine.scene_mut().spawn(Transform::default());
        let id = engine
            .add_component(mirror_entity, Box::new(ReflectionPlane::default()), true)
            .unwrap();

        headless(&mut engine).take_commands();
        engine.frame(0.016);

        let plane = engine.component::<ReflectionPlane>(id).unwrap();
        let temporary = plane.target().temporary().unwrap();
        let handle = engine.context().assets.handle(temporary).unwrap();
        let material = plane.material().unwrap();
        assert_eq!(
            engine
                .scene()
                .materials
                .get(material)
                .unwrap()
                .texture(REFLECTION_UNIFORM),
            Some(handle)
        );

        let commands = headless(&mut engine).take_commands();
        let capture = commands
            .iter()
            .position(|command| {
                matches!(command, BackendCommand::Render { target: Some(t), .. } if *t == handle)
            })
            .unwrap();
        let view = commands
            .iter()
            .position(|command| matches!(command, BackendCommand::Render { target: None, .. }))
            .unwrap();
        assert!(capture < view);
        if let BackendCommand::Render {
            camera_position, ..
        } = &commands[capture]
        {
            assert_close(*camera_position, Vec3::new(0.0, -3.0, 6.0));
        }
        // the capture viewport is the texture, not the canvas
        assert!(commands
            .iter()
            .any(|command| matches!(command, BackendCommand::SetViewport(v) if v.width == 512.0)));
    }

    #[test]
    fn interval_skips_frames_and_keeps_the_texture() {
        let (mut engine, _) = engine_with_view(false);
        let mirror_entity = engine.scene_mut().spawn(Transform::default());
        let id = engine
            .add_component(
                mirror_entity,
                Box::new(ReflectionPlane::new(ReflectionSettings {
                    update_frame_interval: 2,
                    ..Default::default()
                })),
                true,
            )
            .unwrap();

        let mut captured = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..6 {
            engine.frame(0.016);
            let plane = engine.component::<ReflectionPlane>(id).unwrap();
            let handle = plane.target().active_handle(&engine.context().assets).unwrap();
            handles.push(handle);
            let commands = headless(&mut engine).take_commands();
            captured.push(mirrored_renders(&commands, handle) > 0);
        }
        assert_eq!(captured, vec![false, false, true, false, false, true]);
        assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn editor_builds_a_pickable_proxy() {
        let (mut engine, _) = engine_with_view(true);
        let mirror_entity = engine.scene_mut().spawn(Transform::default());
        let id = engine
            .add_component(mirror_entity, Box::new(ReflectionPlane::default()), true)
            .unwrap();

        let proxy = engine.component::<ReflectionPlane>(id).unwrap().proxy().unwrap();
        let picking = engine
            .context()
            .picking
            .as_any()
            .downcast_ref::<RecordingPicking>()
            .unwrap();
        assert_eq!(picking.mesh_for(mirror_entity), Some(proxy));
        let instance = engine
            .scene()
            .world
            .get::<crate::scene::MeshInstance>(proxy)
            .unwrap();
        assert_eq!(instance.name, PROXY_MESH_NAME);
        let mesh = engine.scene().mesh(instance.mesh).unwrap();
        assert!(mesh.vertices.iter().all(|v| v.position.y.abs() < 1e-6));
    }

    #[test]
    fn shutdown_clears_and_releases() {
        let (mut engine, _) = engine_with_view(false);
        let mirror_entity = engine.scene_mut().spawn(Transform::default());
        let id = engine
            .add_component(mirror_entity, Box::new(ReflectionPlane::default()), true)
            .unwrap();
        engine.frame(0.016);
        let plane = engine.component::<ReflectionPlane>(id).unwrap();
        let temporary = plane.target().temporary().unwrap();
        let material = plane.material().unwrap();
        let handle = engine.context().assets.handle(temporary).unwrap();
        headless(&mut engine).take_commands();

        engine.remove_component(id).unwrap();
        let commands = headless(&mut engine).take_commands();
        assert_eq!(
            &commands[..2],
            &[
                BackendCommand::SetRenderTarget(Some(handle)),
                BackendCommand::Clear {
                    target: Some(handle),
                    color: true,
                    depth: true,
                    stencil: true
                },
            ]
        );
        assert!(!engine.context().assets.contains(temporary));
        assert!(engine.scene().materials.get(material).is_none());
    }
}
