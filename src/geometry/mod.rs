//! Rigid-motion types used as solver parameter blocks.
//!
//! The [`Transform`] type stores an SE(3) element as 6 scalars
//! `(tx, ty, tz, rx, ry, rz)` where the rotation part is an axis-angle
//! vector (magnitude = angle, direction = axis). This minimal storage is what
//! the optimizer mutates directly: translation and rotation are exposed as
//! two independent 3-scalar parameter blocks.
//!
//! Composition goes through rotation matrices internally and normalizes back
//! to the 6-scalar storage at the boundary.

pub mod so3;
pub mod transform;

pub use transform::Transform;
