//! Error and warning types for the compositor.
//!
//! Hard failures (a backend that cannot allocate a render target, a config file
//! that does not parse) are [`CompositorError`]s. Degraded-but-working states are
//! [`RenderWarning`]s: they are logged once and the caller carries on.

use thiserror::Error;

use crate::resources::AssetId;

/// Errors that can occur in the compositor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositorError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("failed to create render target: {0}")]
    RenderTargetCreation(String),
    #[error("unknown asset {0:?}")]
    UnknownAsset(AssetId),
    #[error("unknown render target {0}")]
    UnknownRenderTarget(u64),
    #[error("invalid viewport value: {0}")]
    InvalidViewport(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type CompositorResult<T> = Result<T, CompositorError>;

/// Conditions that degrade rendering without stopping it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderWarning {
    /// A backend feature is absent and a lower-capability path is used instead.
    #[error("missing capability: {0}")]
    MissingCapability(String),
    /// A setting changed in a way that needs manual follow-up by the caller.
    #[error("configuration warning: {0}")]
    ConfigurationWarning(String),
}

impl RenderWarning {
    /// Log the warning.
    pub fn emit(&self) {
        log::warn!("{self}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompositorError::UnknownRenderTarget(7);
        assert_eq!(err.to_string(), "unknown render target 7");

        let err = CompositorError::InvalidViewport("abc".to_string());
        assert_eq!(err.to_string(), "invalid viewport value: abc");
    }

    #[test]
    fn test_warning_display() {
        let warning = RenderWarning::MissingCapability("no GPU adapter".into());
        assert_eq!(warning.to_string(), "missing capability: no GPU adapter");
    }
}
