use cgmath::prelude::*;
use cgmath::Transform as _;
use cgmath::{Decomposed, Matrix4, Point3, Quaternion, Vector3};

/// `Transform` is used to store and manipulate the position, rotation and
/// scale of an object. We use a right handed, y-up coordinate system.
///
/// A transform only knows its local components; the world transform of a
/// parented object is produced by folding the ancestor chain with
/// [`Transform::concat`].
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    decomposed: Decomposed<Vector3<f32>, Quaternion<f32>>,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            decomposed: Decomposed::one(),
        }
    }
}

impl Transform {
    /// Gets the scale component in local space.
    #[inline]
    pub fn scale(&self) -> f32 {
        self.decomposed.scale
    }

    /// Sets the scale component in local space.
    #[inline]
    pub fn set_scale(&mut self, scale: f32) {
        self.decomposed.scale = scale;
    }

    #[inline]
    pub fn position(&self) -> Vector3<f32> {
        self.decomposed.disp
    }

    #[inline]
    pub fn set_position<T>(&mut self, position: T)
    where
        T: Into<Vector3<f32>>,
    {
        self.decomposed.disp = position.into();
    }

    #[inline]
    pub fn translate<T>(&mut self, disp: T)
    where
        T: Into<Vector3<f32>>,
    {
        self.decomposed.disp += disp.into();
    }

    #[inline]
    pub fn rotation(&self) -> Quaternion<f32> {
        self.decomposed.rot
    }

    #[inline]
    pub fn set_rotation<T>(&mut self, rotation: T)
    where
        T: Into<Quaternion<f32>>,
    {
        self.decomposed.rot = rotation.into();
    }

    #[inline]
    pub fn rotate<T>(&mut self, rotate: T)
    where
        T: Into<Quaternion<f32>>,
    {
        self.decomposed.rot = rotate.into() * self.decomposed.rot;
    }

    /// Combines `self` with a child transform, yielding the transform that
    /// first applies `child` and then `self`. Folding a parent chain
    /// root-to-leaf with this produces the world transform of the leaf.
    #[inline]
    pub fn concat(&self, child: &Transform) -> Transform {
        Transform {
            decomposed: self.decomposed.concat(&child.decomposed),
        }
    }

    /// The homogeneous matrix of this transform.
    #[inline]
    pub fn matrix(&self) -> Matrix4<f32> {
        Matrix4::from(self.decomposed)
    }

    /// Transforms a point from the space this transform maps out of.
    #[inline]
    pub fn transform_point(&self, p: Point3<f32>) -> Point3<f32> {
        self.decomposed.transform_point(p)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cgmath::{Deg, Euler};

    #[test]
    fn identity() {
        let t = Transform::default();
        assert_eq!(t.position(), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(t.scale(), 1.0);
        assert_eq!(t.matrix(), Matrix4::identity());
    }

    #[test]
    fn translate_and_scale() {
        let mut t = Transform::default();
        t.set_position([1.0, 2.0, 3.0]);
        t.translate([1.0, 0.0, 0.0]);
        t.set_scale(2.0);

        let p = t.transform_point(Point3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Point3::new(4.0, 4.0, 5.0));
    }

    #[test]
    fn parent_chain() {
        let mut parent = Transform::default();
        parent.set_position([1.0, 0.0, 2.0]);

        let mut child = Transform::default();
        child.set_position([1.0, 0.0, 0.0]);

        let world = parent.concat(&child);
        assert_eq!(world.position(), Vector3::new(2.0, 0.0, 2.0));
    }

    #[test]
    fn rotation() {
        let mut t = Transform::default();
        t.set_rotation(Quaternion::from(Euler::new(
            Deg(0.0),
            Deg(0.0),
            Deg(90.0),
        )));

        let p = t.transform_point(Point3::new(1.0, 0.0, 0.0));
        assert!((p.x - 0.0).abs() < 1e-6);
        assert!((p.y - 1.0).abs() < 1e-6);
    }
}
