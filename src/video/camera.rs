use crate::math::prelude::*;
use crate::math::Matrix4;
use crate::video::state::SurfaceRect;

/// The matrices a batcher renders with. Cameras are plain values supplied
/// by the scene layer; the core never derives them itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// World-to-view matrix.
    pub view: Matrix4<f32>,
    /// View-to-clip matrix.
    pub projection: Matrix4<f32>,
    /// Optional viewport rectangle. When absent the full target is used.
    pub viewport: Option<SurfaceRect>,
}

impl Default for Camera {
    fn default() -> Self {
        Camera {
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            viewport: None,
        }
    }
}

impl Camera {
    /// A pixel-space orthographic camera with the origin at the lower-left
    /// corner, which is what most 2d content wants.
    pub fn ortho(width: f32, height: f32) -> Self {
        Camera {
            view: Matrix4::identity(),
            projection: cgmath::ortho(0.0, width, 0.0, height, -1.0, 1.0),
            viewport: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ortho_maps_pixel_corners() {
        use cgmath::Point3;
        use cgmath::Transform;

        let camera = Camera::ortho(640.0, 480.0);
        let origin = camera.projection.transform_point(Point3::new(0.0, 0.0, 0.0));
        assert!((origin.x + 1.0).abs() < 1e-6);
        assert!((origin.y + 1.0).abs() < 1e-6);

        let corner = camera
            .projection
            .transform_point(Point3::new(640.0, 480.0, 0.0));
        assert!((corner.x - 1.0).abs() < 1e-6);
        assert!((corner.y - 1.0).abs() < 1e-6);
    }
}
