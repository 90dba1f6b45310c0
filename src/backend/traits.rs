//! Core backend abstraction
//!
//! The compositor only needs a small, three.js-shaped surface from the GPU layer:
//! bind a target, clear it, set a viewport, draw a scene through a camera, and
//! blend a finished image onto the screen or a texture.

use std::any::Any;

use glam::Vec3;

use crate::error::CompositorResult;
use crate::resources::{RenderTargetDescriptor, RenderTargetState};
use crate::scene::{Camera, Scene};

/// Handle to an off-screen render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetHandle(pub(crate) u64);

impl RenderTargetHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Rectangle in canvas pixels, origin at the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full-size viewport for a `width` x `height` surface
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0.0 {
            1.0
        } else {
            self.width / self.height
        }
    }
}

/// What the device can do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub gpu_available: bool,
    pub max_fragment_uniform_vectors: u32,
    pub half_float_linear: bool,
    pub is_mobile: bool,
    /// Ratio between canvas pixels and layout pixels reported by the platform
    pub platform_pixel_ratio: f32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            gpu_available: true,
            max_fragment_uniform_vectors: 1024,
            half_float_linear: true,
            is_mobile: false,
            platform_pixel_ratio: 1.0,
        }
    }
}

/// The last pass of an effect chain: blend `source` onto the screen or a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDraw {
    pub effect: String,
    pub source: Option<RenderTargetHandle>,
    /// `None` writes to the screen
    pub target: Option<RenderTargetHandle>,
    pub viewport: Option<Viewport>,
    pub opacity: f32,
}

/// Rendering backend consumed by the compositor.
pub trait RenderBackend {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Resize the canvas (in canvas pixels). Resets the viewport to the full canvas.
    fn resize(&mut self, width: u32, height: u32);

    /// Canvas size in canvas pixels
    fn size(&self) -> (u32, u32);

    fn create_render_target(
        &mut self,
        descriptor: &RenderTargetDescriptor,
    ) -> CompositorResult<RenderTargetHandle>;

    fn destroy_render_target(&mut self, handle: RenderTargetHandle);

    fn render_target(&self, handle: RenderTargetHandle) -> Option<&RenderTargetState>;

    fn render_target_mut(&mut self, handle: RenderTargetHandle) -> Option<&mut RenderTargetState>;

    /// Bind a target for subsequent clears and draws. `None` binds the canvas.
    fn set_render_target(&mut self, target: Option<RenderTargetHandle>);

    fn current_render_target(&self) -> Option<RenderTargetHandle>;

    fn set_clear_color(&mut self, color: Vec3, alpha: f32);

    /// Clear the selected buffers of the bound target.
    fn clear(&mut self, color: bool, depth: bool, stencil: bool);

    fn set_viewport(&mut self, viewport: Viewport);

    fn viewport(&self) -> Viewport;

    /// Draw `scene` through `camera`. A `target` rebinds before drawing.
    fn render(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        target: Option<RenderTargetHandle>,
        force_clear: bool,
    );

    fn composite(&mut self, draw: &CompositeDraw);

    fn set_canvas_opacity(&mut self, opacity: f32);

    fn canvas_opacity(&self) -> f32;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
