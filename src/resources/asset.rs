//! Render-texture assets with deferred loading
//!
//! Loading is modelled the way the host engine does it: `load()` only queues the
//! request and [`AssetRegistry::poll`] completes it on a later frame. Interested
//! parties register a [`Completion`] with [`AssetRegistry::once_loaded`], which
//! resolves at most once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{RenderBackend, RenderTargetHandle};
use crate::error::{CompositorError, CompositorResult};

use super::render_target::RenderTargetDescriptor;

/// Identifier of an asset in the [`AssetRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub(crate) u64);

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Ready(T),
    Taken,
}

/// Receiving half of a single-resolution channel.
#[derive(Debug)]
pub struct Completion<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

/// Sending half of a single-resolution channel. Consumed by [`Resolver::resolve`].
#[derive(Debug)]
pub struct Resolver<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

/// Create a connected resolver/completion pair.
pub fn completion<T>() -> (Resolver<T>, Completion<T>) {
    let slot = Arc::new(Mutex::new(Slot::Pending));
    (
        Resolver { slot: slot.clone() },
        Completion { slot },
    )
}

impl<T> Resolver<T> {
    pub fn resolve(self, value: T) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Ready(value);
        }
    }
}

impl<T> Completion<T> {
    /// A completion that is already resolved.
    pub fn ready(value: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Ready(value))),
        }
    }

    /// Take the value if it has arrived. Returns `Some` at most once.
    pub fn take(&mut self) -> Option<T> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Some(value),
            other => {
                *slot = other;
                None
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// True once the value has been taken.
    pub fn is_consumed(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Taken)
    }
}

/// Lifecycle of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Created,
    Loading,
    Loaded,
    Unloaded,
    Failed,
}

#[derive(Debug)]
struct RenderTextureAsset {
    name: String,
    descriptor: RenderTargetDescriptor,
    state: AssetState,
    handle: Option<RenderTargetHandle>,
    listeners: Vec<Resolver<RenderTargetHandle>>,
}

/// Owns render-texture assets and their GPU targets.
#[derive(Debug, Default)]
pub struct AssetRegistry {
    assets: HashMap<AssetId, RenderTextureAsset>,
    next_id: u64,
    pending_loads: Vec<AssetId>,
    pending_releases: Vec<RenderTargetHandle>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a render texture. The asset exists immediately but holds no
    /// target until it is loaded.
    pub fn create_render_texture(&mut self, name: &str, descriptor: RenderTargetDescriptor) -> AssetId {
        self.next_id += 1;
        let id = AssetId(self.next_id);
        self.assets.insert(
            id,
            RenderTextureAsset {
                name: name.to_string(),
                descriptor,
                state: AssetState::Created,
                handle: None,
                listeners: Vec::new(),
            },
        );
        log::debug!("Asset '{name}' created as {id:?}");
        id
    }

    /// Request loading. Completes on the next [`AssetRegistry::poll`].
    pub fn load(&mut self, id: AssetId) -> CompositorResult<()> {
        let asset = self.asset_mut(id)?;
        match asset.state {
            AssetState::Created | AssetState::Unloaded | AssetState::Failed => {
                asset.state = AssetState::Loading;
                self.pending_loads.push(id);
            }
            AssetState::Loading | AssetState::Loaded => {}
        }
        Ok(())
    }

    /// Register for the next load of `id`. Already-loaded assets resolve immediately.
    pub fn once_loaded(&mut self, id: AssetId) -> CompositorResult<Completion<RenderTargetHandle>> {
        let asset = self.asset_mut(id)?;
        if let (AssetState::Loaded, Some(handle)) = (asset.state, asset.handle) {
            return Ok(Completion::ready(handle));
        }
        let (resolver, completion) = completion();
        asset.listeners.push(resolver);
        Ok(completion)
    }

    /// Release the asset's target. The GPU resource is destroyed on the next poll.
    pub fn unload(&mut self, id: AssetId) {
        let Some(asset) = self.assets.get_mut(&id) else {
            return;
        };
        if let Some(handle) = asset.handle.take() {
            self.pending_releases.push(handle);
        }
        if asset.state == AssetState::Loading {
            self.pending_loads.retain(|pending| *pending != id);
        }
        if asset.state != AssetState::Created {
            asset.state = AssetState::Unloaded;
        }
        log::debug!("Asset '{}' unloaded", asset.name);
    }

    /// Unload and forget the asset. Outstanding completions never resolve.
    pub fn destroy(&mut self, id: AssetId) {
        self.unload(id);
        self.assets.remove(&id);
    }

    /// Complete queued loads and release unloaded targets.
    ///
    /// Returns the assets that finished loading during this call.
    pub fn poll(&mut self, backend: &mut dyn RenderBackend) -> Vec<AssetId> {
        for handle in self.pending_releases.drain(..) {
            backend.destroy_render_target(handle);
        }

        let mut loaded = Vec::new();
        for id in std::mem::take(&mut self.pending_loads) {
            let Some(asset) = self.assets.get_mut(&id) else {
                continue;
            };
            if asset.state != AssetState::Loading {
                continue;
            }
            let descriptor = asset
                .descriptor
                .clone()
                .with_label(&asset.name);
            match backend.create_render_target(&descriptor) {
                Ok(handle) => {
                    asset.handle = Some(handle);
                    asset.state = AssetState::Loaded;
                    for listener in asset.listeners.drain(..) {
                        listener.resolve(handle);
                    }
                    log::debug!("Asset '{}' loaded", asset.name);
                    loaded.push(id);
                }
                Err(err) => {
                    asset.state = AssetState::Failed;
                    log::warn!("Asset '{}' failed to load: {err}", asset.name);
                }
            }
        }
        loaded
    }

    /// The loaded target, or `None` while the asset is not ready.
    pub fn handle(&self, id: AssetId) -> Option<RenderTargetHandle> {
        self.assets.get(&id).and_then(|asset| asset.handle)
    }

    pub fn state(&self, id: AssetId) -> Option<AssetState> {
        self.assets.get(&id).map(|asset| asset.state)
    }

    pub fn size(&self, id: AssetId) -> Option<(u32, u32)> {
        self.assets
            .get(&id)
            .map(|asset| (asset.descriptor.width, asset.descriptor.height))
    }

    pub fn descriptor(&self, id: AssetId) -> Option<&RenderTargetDescriptor> {
        self.assets.get(&id).map(|asset| &asset.descriptor)
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.assets.contains_key(&id)
    }

    fn asset_mut(&mut self, id: AssetId) -> CompositorResult<&mut RenderTextureAsset> {
        self.assets
            .get_mut(&id)
            .ok_or(CompositorError::UnknownAsset(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn completion_yields_once() {
        let (resolver, mut completion) = completion::<u32>();
        assert_eq!(completion.take(), None);
        resolver.resolve(3);
        assert!(completion.is_ready());
        assert_eq!(completion.take(), Some(3));
        assert_eq!(completion.take(), None);
        assert!(completion.is_consumed());
    }

    #[test]
    fn load_completes_on_poll() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut assets = AssetRegistry::new();
        let id = assets.create_render_texture("tex", RenderTargetDescriptor::default());
        let mut done = assets.once_loaded(id).unwrap();

        assets.load(id).unwrap();
        assert_eq!(assets.state(id), Some(AssetState::Loading));
        assert!(assets.handle(id).is_none());
        assert_eq!(done.take(), None);

        assert_eq!(assets.poll(&mut backend), vec![id]);
        let handle = done.take().unwrap();
        assert_eq!(assets.handle(id), Some(handle));
        assert!(backend.render_target(handle).is_some());
    }

    #[test]
    fn unload_releases_target_on_next_poll() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut assets = AssetRegistry::new();
        let id = assets.create_render_texture("tex", RenderTargetDescriptor::default());
        assets.load(id).unwrap();
        assets.poll(&mut backend);
        let handle = assets.handle(id).unwrap();

        assets.unload(id);
        assert!(assets.handle(id).is_none());
        assert!(backend.render_target(handle).is_some());
        assets.poll(&mut backend);
        assert!(backend.render_target(handle).is_none());
    }

    #[test]
    fn unknown_asset_is_an_error() {
        let mut assets = AssetRegistry::new();
        assert_eq!(
            assets.load(AssetId(99)),
            Err(CompositorError::UnknownAsset(AssetId(99)))
        );
    }
}
