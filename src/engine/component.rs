//! The component contract
//!
//! Components are plain structs owning their state. The engine calls into them
//! through [`Component`]; everything they may touch is reachable from the
//! [`EngineContext`] passed in.

use std::any::Any;

use bevy_ecs::entity::Entity;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::compositor::{ViewContext, ViewportSpec};
use crate::error::{CompositorError, CompositorResult};
use crate::resources::AssetId;

use super::events::EngineEvent;
use super::EngineContext;

/// Index of a component in the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

/// A set of changed attributes, keyed by attribute name.
///
/// Asset-valued attributes hold the asset id as an integer; an empty string
/// clears them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeChanges {
    values: toml::Table,
}

impl AttributeChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn with_asset(self, key: &str, asset: Option<AssetId>) -> Self {
        match asset {
            Some(id) => self.with(key, id.0 as i64),
            None => self.with(key, ""),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(toml::Value::as_bool)
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.get(key)? {
            toml::Value::Float(value) => Some(*value as f32),
            toml::Value::Integer(value) => Some(*value as f32),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(toml::Value::as_integer)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(toml::Value::as_str)
    }

    /// `None` when the attribute did not change, `Some(None)` when it was cleared.
    pub fn asset(&self, key: &str) -> Option<Option<AssetId>> {
        match self.get(key)? {
            toml::Value::Integer(id) if *id > 0 => Some(Some(AssetId(*id as u64))),
            _ => Some(None),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay the changes on a serde record and read it back.
    pub fn apply_to<T: Serialize + DeserializeOwned>(&self, current: &T) -> CompositorResult<T> {
        let mut table = match toml::Value::try_from(current) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(CompositorError::Config("attributes must be a record".into())),
            Err(err) => return Err(CompositorError::Config(err.to_string())),
        };
        for (key, value) in &self.values {
            table.insert(key.clone(), value.clone());
        }
        toml::Value::Table(table)
            .try_into()
            .map_err(|err: toml::de::Error| CompositorError::Config(err.to_string()))
    }
}

/// Commands addressed to a render view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewCommand {
    EnableRenderView { fade: Option<f32> },
    DisableRenderView { fade: Option<f32> },
    ToggleRenderView { fade: Option<f32> },
    SetViewport {
        viewport: ViewportSpec,
        animation_time: Option<f32>,
    },
}

/// Lifecycle and event hooks of a scene component.
///
/// Everything except [`Component::name`] and the enabled state has a no-op
/// default. Disabled components still receive events and are expected to
/// return early.
pub trait Component: Any {
    fn name(&self) -> &'static str;

    /// Called once when the component is added. Subscriptions are made here.
    fn init(
        &mut self,
        _ctx: &mut EngineContext,
        _id: ComponentId,
        _entity: Entity,
    ) -> CompositorResult<()> {
        Ok(())
    }

    fn is_enabled(&self) -> bool;

    fn enable(&mut self, ctx: &mut EngineContext);

    fn disable(&mut self, ctx: &mut EngineContext);

    /// Release everything the component holds. Subscriptions are dropped by the engine.
    fn shutdown(&mut self, _ctx: &mut EngineContext) {}

    fn on_attributes_changed(
        &mut self,
        _ctx: &mut EngineContext,
        _changes: &AttributeChanges,
    ) -> CompositorResult<()> {
        Ok(())
    }

    fn on_event(&mut self, _ctx: &mut EngineContext, _event: &EngineEvent) {}

    fn on_view_command(&mut self, _ctx: &mut EngineContext, _command: &ViewCommand) {}

    /// Runs before a view is drawn, for subscribers of `PreRenderView`.
    fn pre_render_view(&mut self, _view: &mut ViewContext<'_>) {}

    /// Runs after a view is drawn, for subscribers of `PostRenderView`.
    fn post_render_view(&mut self, _view: &mut ViewContext<'_>) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
