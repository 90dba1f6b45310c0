//! Render-target descriptors and per-target state

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backend::RenderTargetHandle;

/// Default edge length of temporary capture targets
pub const TEMPORARY_TARGET_SIZE: u32 = 512;

/// Channel layout of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgba,
    Rgb,
}

/// Storage type of each channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TexelType {
    #[default]
    U8,
    F16,
    F32,
}

impl TexelType {
    pub fn bytes(&self) -> u32 {
        match self {
            TexelType::U8 => 1,
            TexelType::F16 => 2,
            TexelType::F32 => 4,
        }
    }
}

/// Shape of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TargetKind {
    #[default]
    #[serde(rename = "2d")]
    Texture2D,
    #[serde(rename = "cube")]
    Cube,
}

impl TargetKind {
    pub fn layers(&self) -> u32 {
        match self {
            TargetKind::Texture2D => 1,
            TargetKind::Cube => 6,
        }
    }
}

/// Persisted description of a render texture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderTargetDescriptor {
    #[serde(default)]
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub format: PixelFormat,
    #[serde(default)]
    pub texel: TexelType,
    #[serde(default)]
    pub kind: TargetKind,
}

impl Default for RenderTargetDescriptor {
    fn default() -> Self {
        Self::temporary(TargetKind::Texture2D)
    }
}

impl RenderTargetDescriptor {
    /// The placeholder used while a configured capture texture is loading.
    pub fn temporary(kind: TargetKind) -> Self {
        Self {
            label: None,
            width: TEMPORARY_TARGET_SIZE,
            height: TEMPORARY_TARGET_SIZE,
            format: PixelFormat::Rgba,
            texel: TexelType::U8,
            kind,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn byte_size(&self) -> u64 {
        let channels = match self.format {
            PixelFormat::Rgba => 4,
            PixelFormat::Rgb => 3,
        };
        self.width as u64
            * self.height as u64
            * channels
            * self.texel.bytes() as u64
            * self.kind.layers() as u64
    }
}

/// Mutable state the renderer keeps for each allocated target.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetState {
    pub descriptor: RenderTargetDescriptor,
    pub generate_mipmaps: bool,
    /// Cube face written by the next draw, `0..6` in +X, -X, +Y, -Y, +Z, -Z order
    pub active_cube_face: u32,
    pub needs_update: bool,
    /// Incremented whenever content is drawn into the target
    pub version: u64,
}

impl RenderTargetState {
    pub fn new(descriptor: RenderTargetDescriptor) -> Self {
        Self {
            descriptor,
            generate_mipmaps: true,
            active_cube_face: 0,
            needs_update: false,
            version: 0,
        }
    }
}

/// Handle allocator and state table shared by the backends.
#[derive(Debug, Default)]
pub struct RenderTargetPool {
    targets: HashMap<u64, RenderTargetState>,
    next_id: u64,
}

impl RenderTargetPool {
    pub fn new() -> Self {
        Self {
            targets: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn allocate(&mut self, descriptor: &RenderTargetDescriptor) -> RenderTargetHandle {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.targets
            .insert(id, RenderTargetState::new(descriptor.clone()));
        RenderTargetHandle(id)
    }

    pub fn release(&mut self, handle: RenderTargetHandle) -> Option<RenderTargetState> {
        self.targets.remove(&handle.0)
    }

    pub fn get(&self, handle: RenderTargetHandle) -> Option<&RenderTargetState> {
        self.targets.get(&handle.0)
    }

    pub fn get_mut(&mut self, handle: RenderTargetHandle) -> Option<&mut RenderTargetState> {
        self.targets.get_mut(&handle.0)
    }

    pub fn contains(&self, handle: RenderTargetHandle) -> bool {
        self.targets.contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
