//! Render targets and the asset registry that owns them

mod asset;
mod render_target;

pub use asset::*;
pub use render_target::*;
