//! Capture Compositor - multi-view composition with render-to-texture captures
//!
//! Scene components draw the scene into textures and onto regions of the canvas:
//! - **Reflection planes**: mirrored cameras with an oblique near plane
//! - **Cube and sphere probes**: environment captures on a frame cadence
//! - **Render views**: viewport placement, animation and fades over a shared pass list
//!
//! # Backends
//! - **wgpu**: offscreen GPU rendering (feature `wgpu-backend`, on by default)
//! - **Headless**: records every backend call, used when no GPU is available
//!
//! Scene entities live in a Bevy ECS world; components are driven by the
//! [`Engine`] one frame at a time.

pub mod backend;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod resources;
pub mod scene;

// Re-export Bevy ECS for users building scenes
pub use bevy_ecs;

pub use backend::{BackendType, HeadlessBackend, RenderBackend};
pub use capture::{CubeCapture, ReflectionPlane, SphereCapture};
pub use compositor::{DefaultRenderer, RenderView};
pub use config::CompositorConfig;
pub use engine::{Component, Engine, EngineContext};
pub use error::{CompositorError, CompositorResult, RenderWarning};
pub use filters::DefaultFilters;
