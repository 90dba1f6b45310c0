//! TOML configuration
//!
//! ```toml
//! backend = "headless"
//! editor = false
//!
//! [canvas]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! device_pixel_ratio = 1.0
//! gamma_output = true
//!
//! [capture]
//! near = 1.0
//! far = 12000.0
//!
//! [filters.bloom]
//! enabled = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::BackendType;
use crate::capture::{CubeCaptureSettings, ReflectionSettings, SphereCaptureSettings};
use crate::compositor::RendererSettings;
use crate::error::{CompositorError, CompositorResult};
use crate::filters::FilterSettings;

/// Canvas size in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Defaults shared by new capture components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureDefaults {
    pub near: f32,
    pub far: f32,
    pub clip_bias: f32,
    pub update_frame_interval: u32,
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            near: 1.0,
            far: 12000.0,
            clip_bias: 0.0,
            update_frame_interval: 0,
        }
    }
}

impl CaptureDefaults {
    pub fn reflection(&self) -> ReflectionSettings {
        ReflectionSettings {
            clip_bias: self.clip_bias,
            update_frame_interval: self.update_frame_interval,
        }
    }

    pub fn cube(&self) -> CubeCaptureSettings {
        CubeCaptureSettings {
            near: self.near,
            far: self.far,
            update_frame_interval: self.update_frame_interval,
            ..Default::default()
        }
    }

    pub fn sphere(&self) -> SphereCaptureSettings {
        SphereCaptureSettings {
            near: self.near,
            far: self.far,
            update_frame_interval: self.update_frame_interval,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub backend: BackendType,
    /// Build editor proxies and helpers
    pub editor: bool,
    pub canvas: CanvasConfig,
    pub renderer: RendererSettings,
    pub capture: CaptureDefaults,
    pub filters: FilterSettings,
}

impl CompositorConfig {
    pub fn from_toml_str(content: &str) -> CompositorResult<Self> {
        toml::from_str(content).map_err(|e| CompositorError::Config(e.to_string()))
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> CompositorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompositorError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| {
            CompositorError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        log::info!(
            "Loaded compositor config from {} ({:?} backend, {}x{})",
            path.display(),
            config.backend,
            config.canvas.width,
            config.canvas.height
        );
        Ok(config)
    }
}
