//! Headless backend for testing and GPU-less hosts.
//!
//! This backend doesn't touch a GPU. It keeps the same render-target state as a
//! real backend and records every call as a [`BackendCommand`], so compositor
//! behaviour can be checked without graphics hardware.

use glam::Vec3;

use crate::error::CompositorResult;
use crate::resources::{RenderTargetDescriptor, RenderTargetPool, RenderTargetState};
use crate::scene::{Camera, MaterialId, Scene};

use super::traits::*;

/// One recorded draw inside a [`BackendCommand::Render`]
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub entity: bevy_ecs::entity::Entity,
    pub material: Option<MaterialId>,
}

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    Resize {
        width: u32,
        height: u32,
    },
    CreateRenderTarget(RenderTargetHandle),
    DestroyRenderTarget(RenderTargetHandle),
    SetRenderTarget(Option<RenderTargetHandle>),
    SetClearColor {
        color: Vec3,
        alpha: f32,
    },
    Clear {
        target: Option<RenderTargetHandle>,
        color: bool,
        depth: bool,
        stencil: bool,
    },
    SetViewport(Viewport),
    Render {
        target: Option<RenderTargetHandle>,
        cube_face: Option<u32>,
        viewport: Viewport,
        camera_position: Vec3,
        force_clear: bool,
        draws: Vec<DrawRecord>,
    },
    Composite(CompositeDraw),
    SetCanvasOpacity(f32),
}

/// Backend that records instead of drawing.
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    capabilities: Capabilities,
    targets: RenderTargetPool,
    current_target: Option<RenderTargetHandle>,
    viewport: Viewport,
    clear_color: (Vec3, f32),
    canvas_opacity: f32,
    commands: Vec<BackendCommand>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_capabilities(width, height, Capabilities::default())
    }

    pub fn with_capabilities(width: u32, height: u32, capabilities: Capabilities) -> Self {
        Self {
            width,
            height,
            capabilities,
            targets: RenderTargetPool::new(),
            current_target: None,
            viewport: Viewport::full(width, height),
            clear_color: (Vec3::ZERO, 0.0),
            canvas_opacity: 1.0,
            commands: Vec::new(),
        }
    }

    /// Everything recorded so far
    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    /// Drain the recorded commands.
    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_color(&self) -> (Vec3, f32) {
        self.clear_color
    }

    fn record(&mut self, command: BackendCommand) {
        log::trace!("HeadlessBackend: {command:?}");
        self.commands.push(command);
    }
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless Backend"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.viewport = Viewport::full(width, height);
        self.record(BackendCommand::Resize { width, height });
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn create_render_target(
        &mut self,
        descriptor: &RenderTargetDescriptor,
    ) -> CompositorResult<RenderTargetHandle> {
        let handle = self.targets.allocate(descriptor);
        self.record(BackendCommand::CreateRenderTarget(handle));
        Ok(handle)
    }

    fn destroy_render_target(&mut self, handle: RenderTargetHandle) {
        if self.current_target == Some(handle) {
            self.current_target = None;
        }
        if self.targets.release(handle).is_some() {
            self.record(BackendCommand::DestroyRenderTarget(handle));
        }
    }

    fn render_target(&self, handle: RenderTargetHandle) -> Option<&RenderTargetState> {
        self.targets.get(handle)
    }

    fn render_target_mut(&mut self, handle: RenderTargetHandle) -> Option<&mut RenderTargetState> {
        self.targets.get_mut(handle)
    }

    fn set_render_target(&mut self, target: Option<RenderTargetHandle>) {
        self.current_target = target.filter(|handle| self.targets.contains(*handle));
        self.record(BackendCommand::SetRenderTarget(self.current_target));
    }

    fn current_render_target(&self) -> Option<RenderTargetHandle> {
        self.current_target
    }

    fn set_clear_color(&mut self, color: Vec3, alpha: f32) {
        self.clear_color = (color, alpha);
        self.record(BackendCommand::SetClearColor { color, alpha });
    }

    fn clear(&mut self, color: bool, depth: bool, stencil: bool) {
        self.record(BackendCommand::Clear {
            target: self.current_target,
            color,
            depth,
            stencil,
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.record(BackendCommand::SetViewport(viewport));
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn render(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        target: Option<RenderTargetHandle>,
        force_clear: bool,
    ) {
        if target.is_some() {
            self.set_render_target(target);
        }
        if force_clear {
            self.clear(true, true, true);
        }

        let draws = scene
            .renderables()
            .iter()
            .map(|renderable| DrawRecord {
                entity: renderable.entity,
                material: scene.effective_material(renderable),
            })
            .collect();

        let current = self.current_target;
        let mut cube_face = None;
        if let Some(state) = current.and_then(|handle| self.targets.get_mut(handle)) {
            state.version += 1;
            if state.descriptor.kind.layers() > 1 {
                cube_face = Some(state.active_cube_face);
            }
        }

        self.record(BackendCommand::Render {
            target: current,
            cube_face,
            viewport: self.viewport,
            camera_position: camera.position,
            force_clear,
            draws,
        });
    }

    fn composite(&mut self, draw: &CompositeDraw) {
        if let Some(state) = draw.target.and_then(|handle| self.targets.get_mut(handle)) {
            state.version += 1;
        }
        self.record(BackendCommand::Composite(draw.clone()));
    }

    fn set_canvas_opacity(&mut self, opacity: f32) {
        self.canvas_opacity = opacity;
        self.record(BackendCommand::SetCanvasOpacity(opacity));
    }

    fn canvas_opacity(&self) -> f32 {
        self.canvas_opacity
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::TargetKind;
    use crate::scene::{Mesh, Transform};

    #[test]
    fn render_into_cube_target_records_face() {
        let mut backend = HeadlessBackend::new(100, 100);
        let handle = backend
            .create_render_target(&RenderTargetDescriptor::temporary(TargetKind::Cube))
            .unwrap();
        backend.render_target_mut(handle).unwrap().active_cube_face = 3;

        let mut scene = Scene::new();
        let root = scene.spawn(Transform::default());
        scene.attach_mesh(root, Mesh::cuboid(1.0), None, "box");

        backend.render(&scene, &Camera::default(), Some(handle), false);

        let Some(BackendCommand::Render {
            target,
            cube_face,
            draws,
            ..
        }) = backend.commands().last()
        else {
            panic!("expected a render command");
        };
        assert_eq!(*target, Some(handle));
        assert_eq!(*cube_face, Some(3));
        assert_eq!(draws.len(), 1);
        assert_eq!(backend.render_target(handle).unwrap().version, 1);
    }

    #[test]
    fn destroyed_target_cannot_be_bound() {
        let mut backend = HeadlessBackend::new(100, 100);
        let handle = backend
            .create_render_target(&RenderTargetDescriptor::default())
            .unwrap();
        backend.destroy_render_target(handle);
        backend.set_render_target(Some(handle));
        assert_eq!(backend.current_render_target(), None);
    }

    #[test]
    fn resize_resets_viewport() {
        let mut backend = HeadlessBackend::new(100, 100);
        backend.set_viewport(Viewport::new(10.0, 10.0, 20.0, 20.0));
        backend.resize(300, 200);
        assert_eq!(backend.viewport(), Viewport::full(300, 200));
    }
}
