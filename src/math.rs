//! Math types for Lumenar

pub use glam::{Mat4, Quat, Vec2, Vec3};

/// Scale vector for rendering a unit bounding box over a planar target.
///
/// The z-dimension of a planar target is zero; it is set to the larger of the
/// two planar dimensions so a 3D augmentation can be shown on top of it.
pub fn planar_target_scale(size: Vec2) -> Vec3 {
    Vec3::new(size.x, size.y, size.x.max(size.y))
}
