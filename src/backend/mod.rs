//! Backend abstraction layer
//!
//! Provides the [`RenderBackend`] trait and its implementations: a recording
//! [`HeadlessBackend`] and, with the `wgpu-backend` feature, an offscreen
//! [`WgpuBackend`].

pub mod headless;
pub mod traits;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use headless::*;
pub use traits::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;

use serde::{Deserialize, Serialize};

use crate::error::RenderWarning;

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// wgpu backend, falls back to headless when no adapter is found
    #[default]
    Wgpu,
    /// Recording backend without a GPU
    Headless,
}

/// Create a backend with a `width` x `height` canvas (canvas pixels).
///
/// A GPU backend that cannot be created degrades to [`HeadlessBackend`] with a
/// `MissingCapability` warning.
pub fn create_backend(backend_type: BackendType, width: u32, height: u32) -> Box<dyn RenderBackend> {
    match backend_type {
        BackendType::Headless => Box::new(HeadlessBackend::new(width, height)),
        #[cfg(feature = "wgpu-backend")]
        BackendType::Wgpu => match WgpuBackend::new_headless(width, height) {
            Ok(backend) => {
                log::info!("Using wgpu backend on {}", backend.adapter_name());
                Box::new(backend)
            }
            Err(err) => {
                RenderWarning::MissingCapability(format!(
                    "wgpu unavailable ({err}), falling back to headless rendering"
                ))
                .emit();
                Box::new(HeadlessBackend::with_capabilities(
                    width,
                    height,
                    Capabilities {
                        gpu_available: false,
                        ..Default::default()
                    },
                ))
            }
        },
        #[cfg(not(feature = "wgpu-backend"))]
        BackendType::Wgpu => {
            RenderWarning::MissingCapability(
                "built without the wgpu backend, falling back to headless rendering".into(),
            )
            .emit();
            Box::new(HeadlessBackend::with_capabilities(
                width,
                height,
                Capabilities {
                    gpu_available: false,
                    ..Default::default()
                },
            ))
        }
    }
}
