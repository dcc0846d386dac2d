//! This module contains the math utils that mainly come from `cgmath`.

pub use cgmath::*;

pub mod color;
pub mod transform;

pub mod prelude {
    pub use super::color::Color;
    pub use super::transform::Transform;
    pub use cgmath::prelude::*;
    pub use cgmath::{Matrix4, Quaternion, Vector2, Vector3, Vector4};
}
