//! Multi-view composition
//!
//! [`DefaultRenderer`] owns the global pass list and draws one view at a time;
//! [`RenderView`] components decide where, when and how opaque each view is.

mod effect_chain;
mod fade;
mod pass_list;
mod render_view;
mod renderer;
mod viewport;

pub use effect_chain::*;
pub use fade::*;
pub use pass_list::*;
pub use render_view::*;
pub use renderer::*;
pub use viewport::*;
