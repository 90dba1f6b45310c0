//! Post-processing chain attached to a view
//!
//! The chain ping-pongs between two canvas-sized buffers. Scene passes are
//! referenced by id so the renderer's pass list stays the single owner; the
//! final pass writes to the screen or a texture with the view's viewport and
//! opacity.

use crate::backend::{CompositeDraw, RenderBackend, RenderTargetHandle, Viewport};
use crate::error::CompositorResult;
use crate::resources::RenderTargetDescriptor;
use crate::scene::{Camera, Scene};

use super::pass_list::{PassId, RenderPassList};
use super::renderer::{pass_camera, render_scene_pass};

/// A full-screen effect.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectPass {
    pub name: String,
    pub enabled: bool,
    /// Swap read and write buffers after this pass
    pub needs_swap: bool,
    /// Whether the effect shader exposes an `opacity` uniform
    pub has_opacity: bool,
    pub opacity: f32,
    /// Canvas-pixel viewport of the final draw
    pub viewport: Option<Viewport>,
    pub render_to_screen: bool,
    pub render_to_texture: Option<RenderTargetHandle>,
}

impl EffectPass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            needs_swap: true,
            has_opacity: true,
            opacity: 1.0,
            viewport: None,
            render_to_screen: false,
            render_to_texture: None,
        }
    }
}

/// Entry of a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ComposerPass {
    /// One of the renderer's scene passes
    Scene(PassId),
    Effect(EffectPass),
}

impl ComposerPass {
    fn is_enabled(&self) -> bool {
        match self {
            ComposerPass::Scene(_) => true,
            ComposerPass::Effect(effect) => effect.enabled,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ComposerBuffers {
    read: RenderTargetHandle,
    write: RenderTargetHandle,
    size: (u32, u32),
}

/// Effect chain of a view.
#[derive(Debug)]
pub struct EffectComposer {
    pub passes: Vec<ComposerPass>,
    /// Set until the renderer has spliced its scene passes in front of the effects
    pub render_passes_need_update: bool,
    buffers: Option<ComposerBuffers>,
}

impl Default for EffectComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectComposer {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            render_passes_need_update: true,
            buffers: None,
        }
    }

    pub fn add_pass(&mut self, pass: EffectPass) {
        self.passes.push(ComposerPass::Effect(pass));
    }

    /// Prepend the renderer's scene passes. Only the first call after the flag is
    /// set has any effect.
    pub fn splice_scene_passes(&mut self, ids: &[PassId]) {
        if !self.render_passes_need_update {
            return;
        }
        let effects = std::mem::take(&mut self.passes);
        self.passes = ids
            .iter()
            .copied()
            .map(ComposerPass::Scene)
            .chain(effects)
            .collect();
        self.render_passes_need_update = false;
    }

    pub fn last_pass_mut(&mut self) -> Option<&mut ComposerPass> {
        self.passes.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// (Re)allocate the ping-pong buffers when the canvas size changed.
    fn ensure_buffers(
        &mut self,
        backend: &mut dyn RenderBackend,
    ) -> CompositorResult<ComposerBuffers> {
        let size = backend.size();
        if let Some(buffers) = self.buffers {
            if buffers.size == size {
                return Ok(buffers);
            }
        }
        self.release(backend);

        let descriptor = RenderTargetDescriptor::default().with_size(size.0.max(1), size.1.max(1));
        let read = backend.create_render_target(&descriptor.clone().with_label("Composer Read"))?;
        let write = match backend.create_render_target(&descriptor.with_label("Composer Write")) {
            Ok(write) => write,
            Err(err) => {
                backend.destroy_render_target(read);
                return Err(err);
            }
        };
        let buffers = ComposerBuffers { read, write, size };
        self.buffers = Some(buffers);
        log::debug!("Composer buffers allocated at {}x{}", size.0, size.1);
        Ok(buffers)
    }

    /// Run the chain. Removed scene passes are skipped.
    pub fn render(
        &mut self,
        backend: &mut dyn RenderBackend,
        scene: &mut Scene,
        scene_passes: &RenderPassList,
        view_camera: &Camera,
        delta: f32,
    ) -> CompositorResult<()> {
        let Some(last) = self.passes.iter().rposition(ComposerPass::is_enabled) else {
            return Ok(());
        };
        let buffers = self.ensure_buffers(backend)?;
        let (mut read, mut write) = (buffers.read, buffers.write);
        log::trace!("Composer render, delta {delta}");

        for (index, pass) in self.passes.iter().enumerate() {
            match pass {
                ComposerPass::Scene(id) => {
                    let Some(scene_pass) = scene_passes.get(*id) else {
                        continue;
                    };
                    let camera = pass_camera(scene, scene_pass, view_camera);
                    backend.set_render_target(Some(read));
                    if scene_pass.clear {
                        backend.set_clear_color(scene_pass.clear_color, scene_pass.clear_alpha);
                        backend.clear(true, true, true);
                    }
                    render_scene_pass(backend, scene, scene_pass, &camera, Some(read));
                }
                ComposerPass::Effect(effect) if index == last => {
                    let target = if effect.render_to_screen {
                        None
                    } else {
                        effect.render_to_texture
                    };
                    backend.composite(&CompositeDraw {
                        effect: effect.name.clone(),
                        source: Some(read),
                        target,
                        viewport: effect.viewport,
                        opacity: if effect.has_opacity { effect.opacity } else { 1.0 },
                    });
                }
                ComposerPass::Effect(effect) if effect.enabled => {
                    backend.composite(&CompositeDraw {
                        effect: effect.name.clone(),
                        source: Some(read),
                        target: Some(write),
                        viewport: None,
                        opacity: 1.0,
                    });
                    if effect.needs_swap {
                        std::mem::swap(&mut read, &mut write);
                    }
                }
                ComposerPass::Effect(_) => {}
            }
        }

        // A chain ending in a scene pass still has to reach the screen.
        if let Some(ComposerPass::Scene(_)) = self.passes.get(last) {
            backend.composite(&CompositeDraw {
                effect: "copy".to_string(),
                source: Some(read),
                target: None,
                viewport: None,
                opacity: 1.0,
            });
        }
        backend.set_render_target(None);
        Ok(())
    }

    /// Free the ping-pong buffers.
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(buffers) = self.buffers.take() {
            backend.destroy_render_target(buffers.read);
            backend.destroy_render_target(buffers.write);
        }
    }
}
