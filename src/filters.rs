//! Default post-process filter settings
//!
//! Views without their own effect chain look up the scene's [`DefaultFilters`]
//! when they build one. Tone mapping replaces the renderer's gamma output, so
//! the two are kept coupled here.

use std::any::Any;

use bevy_ecs::entity::Entity;
use serde::{Deserialize, Serialize};

use crate::engine::{
    AttributeChanges, Component, ComponentId, EngineContext, EngineEvent, EventKind,
};
use crate::error::CompositorResult;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomFilter {
    pub enabled: bool,
    pub strength: f32,
    pub sigma: f32,
    pub resolution: u32,
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 1.0,
            sigma: 4.0,
            resolution: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMappingFilter {
    pub enabled: bool,
    /// Re-evaluate scene luminance every frame
    pub adaptive: bool,
    pub adapt_speed: f32,
    pub exposure_bias: f32,
    pub max_luminance: f32,
    /// Scene luminance used when not adaptive
    pub luminance: f32,
}

impl Default for ToneMappingFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            adaptive: true,
            adapt_speed: 0.5,
            exposure_bias: 1.0,
            max_luminance: 6.0,
            luminance: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FxaaFilter {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VignetteFilter {
    pub enabled: bool,
    pub offset: f32,
    pub darkness: f32,
}

impl Default for VignetteFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            offset: 1.0,
            darkness: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoFilter {
    pub enabled: bool,
    pub fog_enabled: bool,
    pub depth_scale: f32,
    pub only_ao: bool,
    pub ao_clamp: f32,
    pub lum_influence: f32,
    pub noise_amount: f32,
    pub radius: f32,
    pub diff_area: f32,
    pub g_displace: f32,
}

impl Default for SsaoFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            fog_enabled: true,
            depth_scale: 40000.0,
            only_ao: false,
            ao_clamp: 0.75,
            lum_influence: 0.75,
            noise_amount: 0.0002,
            radius: 8.0,
            diff_area: 0.4,
            g_displace: 0.4,
        }
    }
}

/// Depth of field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DofFilter {
    pub enabled: bool,
    pub aspect: f32,
    pub aperture: f32,
    pub focus: f32,
}

impl Default for DofFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            aspect: 1.0,
            aperture: 0.025,
            focus: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SepiaFilter {
    pub enabled: bool,
    pub amount: f32,
}

impl Default for SepiaFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            amount: 0.9,
        }
    }
}

/// Film grain and scanlines
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoFilter {
    pub enabled: bool,
    pub noise_intensity: f32,
    pub scanline_intensity: f32,
    pub scanline_count: f32,
    pub grayscale: bool,
}

impl Default for VideoFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            noise_intensity: 0.15,
            scanline_intensity: 0.05,
            scanline_count: 512.0,
            grayscale: false,
        }
    }
}

/// Every default filter record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub bloom: BloomFilter,
    pub tone_mapping: ToneMappingFilter,
    pub fxaa: FxaaFilter,
    pub vignette: VignetteFilter,
    pub ssao: SsaoFilter,
    pub dof: DofFilter,
    pub sepia: SepiaFilter,
    pub video: VideoFilter,
}

/// Scene-wide filter defaults.
#[derive(Debug, Default)]
pub struct DefaultFilters {
    settings: FilterSettings,
    enabled: bool,
}

impl DefaultFilters {
    pub fn new(settings: FilterSettings) -> Self {
        Self {
            settings,
            enabled: false,
        }
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// Gamma output the renderer should use with these filters.
    pub fn gamma_output(&self) -> bool {
        !(self.settings.tone_mapping.enabled && self.enabled)
    }

    /// Push the gamma coupling to the renderer and announce the change.
    pub fn update_filters(&self, ctx: &mut EngineContext) -> CompositorResult<()> {
        let gamma_output = self.gamma_output();
        if ctx.renderer.settings().gamma_output != gamma_output {
            let changes = AttributeChanges::new().with("gamma_output", gamma_output);
            ctx.renderer.attributes_changed(&changes, &mut ctx.events)?;
        }
        ctx.events
            .emit(EngineEvent::new(EventKind::DefaultFiltersChanged));
        Ok(())
    }

    fn refresh(&self, ctx: &mut EngineContext) {
        if let Err(err) = self.update_filters(ctx) {
            log::warn!("Failed to apply default filters: {err}");
        }
    }
}

/// The scene's default filters, if a [`DefaultFilters`] component is present.
pub fn get_default_filters(ctx: &EngineContext) -> Option<&DefaultFilters> {
    ctx.components.find::<DefaultFilters>()
}

impl Component for DefaultFilters {
    fn name(&self) -> &'static str {
        "DefaultFilters"
    }

    fn init(&mut self, ctx: &mut EngineContext, _id: ComponentId, _entity: Entity) -> CompositorResult<()> {
        self.update_filters(ctx)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, ctx: &mut EngineContext) {
        self.enabled = true;
        self.refresh(ctx);
    }

    fn disable(&mut self, ctx: &mut EngineContext) {
        self.enabled = false;
        self.refresh(ctx);
    }

    fn on_attributes_changed(
        &mut self,
        ctx: &mut EngineContext,
        changes: &AttributeChanges,
    ) -> CompositorResult<()> {
        self.settings = changes.apply_to(&self.settings)?;
        self.update_filters(ctx)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
