//! Render-to-texture captures
//!
//! Planar reflections, cube-map probes and sphere-map probes. Each capture draws
//! the scene from its own camera into a texture on a frame cadence and exposes
//! that texture through a material.

pub mod cadence;
pub mod cube;
pub mod reflection;
pub mod sphere;
pub mod target;

pub use cadence::FrameCadence;
pub use cube::{CubeCapture, CubeCaptureSettings, CubeFace};
pub use reflection::{ReflectionPlane, ReflectionSettings};
pub use sphere::{SphereCapture, SphereCaptureSettings};
pub use target::CaptureTarget;

use bevy_ecs::entity::Entity;
use glam::Vec3;

use crate::engine::EngineContext;
use crate::scene::{MaterialId, Mesh, Scene};

/// World-space position of `entity`.
pub(crate) fn world_position(scene: &Scene, entity: Entity) -> Option<Vec3> {
    scene
        .world_matrix(entity)
        .map(|matrix| matrix.w_axis.truncate())
}

/// Attach an editor proxy mesh to `entity` and make it pickable.
pub(crate) fn attach_proxy(
    ctx: &mut EngineContext,
    entity: Entity,
    mesh: Mesh,
    material: MaterialId,
    name: &str,
) -> Entity {
    let proxy = ctx.scene.attach_mesh(entity, mesh, Some(material), name);
    ctx.picking.register(entity, proxy);
    proxy
}

pub(crate) fn detach_proxy(ctx: &mut EngineContext, entity: Entity, proxy: Entity) {
    ctx.scene.despawn_recursive(proxy);
    ctx.picking.unregister(entity);
}
