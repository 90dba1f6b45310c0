//! Placeholder and configured capture textures
//!
//! A capture draws into its configured texture asset once that has loaded and
//! into a temporary 512x512 texture until then. The material sampling the
//! capture is rebound before the temporary is unloaded, and the unloaded target
//! is only destroyed on the next asset poll.

use crate::backend::RenderTargetHandle;
use crate::error::CompositorResult;
use crate::resources::{
    AssetId, AssetRegistry, AssetState, Completion, RenderTargetDescriptor, TargetKind,
};
use crate::scene::{MaterialId, MaterialLibrary};

/// Texture a capture renders into.
#[derive(Debug)]
pub struct CaptureTarget {
    kind: TargetKind,
    temporary_name: &'static str,
    configured: Option<AssetId>,
    temporary: Option<AssetId>,
    /// Load of the configured asset not yet observed
    pending: Option<(AssetId, Completion<RenderTargetHandle>)>,
    pending_temporary: Option<Completion<RenderTargetHandle>>,
    binding: Option<(MaterialId, &'static str)>,
}

impl CaptureTarget {
    pub fn new(kind: TargetKind, temporary_name: &'static str) -> Self {
        Self {
            kind,
            temporary_name,
            configured: None,
            temporary: None,
            pending: None,
            pending_temporary: None,
            binding: None,
        }
    }

    pub fn configured(&self) -> Option<AssetId> {
        self.configured
    }

    pub fn temporary(&self) -> Option<AssetId> {
        self.temporary
    }

    /// Create (or reload) the temporary texture and queue its load.
    pub fn ensure_temporary(&mut self, assets: &mut AssetRegistry) -> CompositorResult<AssetId> {
        let id = match self.temporary {
            Some(id) if assets.contains(id) => id,
            _ => {
                let id = assets.create_render_texture(
                    self.temporary_name,
                    RenderTargetDescriptor::temporary(self.kind),
                );
                self.temporary = Some(id);
                id
            }
        };
        if !matches!(
            assets.state(id),
            Some(AssetState::Loaded) | Some(AssetState::Loading)
        ) {
            self.pending_temporary = Some(assets.once_loaded(id)?);
            assets.load(id)?;
        }
        Ok(id)
    }

    /// Sample this capture through `uniform` of `material`. Binds the active
    /// texture right away when one is loaded.
    pub fn bind_material(
        &mut self,
        material: MaterialId,
        uniform: &'static str,
        assets: &AssetRegistry,
        materials: &mut MaterialLibrary,
    ) {
        self.binding = Some((material, uniform));
        if let Some(handle) = self.active_handle(assets) {
            materials.set_texture(material, uniform, Some(handle));
        }
    }

    pub fn binding(&self) -> Option<(MaterialId, &'static str)> {
        self.binding
    }

    /// Point the capture at `asset`, or back at the temporary texture.
    ///
    /// A configured asset only becomes active after it has loaded; see
    /// [`CaptureTarget::poll_swap`].
    pub fn set_configured(
        &mut self,
        asset: Option<AssetId>,
        assets: &mut AssetRegistry,
        materials: &mut MaterialLibrary,
    ) -> CompositorResult<()> {
        self.configured = asset;
        match asset {
            Some(id) => {
                self.pending = Some((id, assets.once_loaded(id)?));
                assets.load(id)?;
            }
            None => {
                self.pending = None;
                self.ensure_temporary(assets)?;
                if let Some((material, uniform)) = self.binding {
                    let handle = self.temporary.and_then(|id| assets.handle(id));
                    materials.set_texture(material, uniform, handle);
                }
            }
        }
        Ok(())
    }

    /// Observe finished loads. Returns `true` when the configured texture took
    /// over from the temporary during this call.
    pub fn poll_swap(&mut self, assets: &mut AssetRegistry, materials: &mut MaterialLibrary) -> bool {
        if let Some(completion) = &mut self.pending_temporary {
            if let Some(handle) = completion.take() {
                self.pending_temporary = None;
                let configured_ready = self.configured.and_then(|id| assets.handle(id)).is_some();
                if let (Some((material, uniform)), false) = (self.binding, configured_ready) {
                    materials.set_texture(material, uniform, Some(handle));
                }
            }
        }

        let Some((id, completion)) = &mut self.pending else {
            return false;
        };
        let Some(handle) = completion.take() else {
            return false;
        };
        let id = *id;
        self.pending = None;
        if self.configured != Some(id) {
            return false;
        }

        if let Some((material, uniform)) = self.binding {
            materials.set_texture(material, uniform, Some(handle));
        }
        if let Some(temporary) = self.temporary {
            assets.unload(temporary);
        }
        self.pending_temporary = None;
        log::debug!("Capture switched from temporary texture to {id:?}");
        true
    }

    /// The texture to draw into this frame, if any is loaded.
    pub fn active_handle(&self, assets: &AssetRegistry) -> Option<RenderTargetHandle> {
        self.configured
            .and_then(|id| assets.handle(id))
            .or_else(|| self.temporary.and_then(|id| assets.handle(id)))
    }

    /// Size of the texture returned by [`CaptureTarget::active_handle`].
    pub fn active_size(&self, assets: &AssetRegistry) -> Option<(u32, u32)> {
        match self.configured.filter(|id| assets.handle(*id).is_some()) {
            Some(id) => assets.size(id),
            None => self
                .temporary
                .filter(|id| assets.handle(*id).is_some())
                .and_then(|id| assets.size(id)),
        }
    }

    /// Destroy the temporary texture and forget pending loads. The configured
    /// asset belongs to the host and is left alone.
    pub fn release(&mut self, assets: &mut AssetRegistry) {
        if let Some(temporary) = self.temporary.take() {
            assets.destroy(temporary);
        }
        self.pending = None;
        self.pending_temporary = None;
    }
}
