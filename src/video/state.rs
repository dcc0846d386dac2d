//! Plain-data render state descriptors.
//!
//! Everything in here is a value type. Draw commands snapshot these per
//! frame, and the backend compares the snapshots against its tracked GPU
//! state to skip redundant driver calls.

use crate::math::prelude::{Vector2, Vector3, Vector4};
use crate::math::Matrix4;
use crate::video::resources::ImageId;

/// A pixel-wise comparison function.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Comparison {
    Never,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    NotEqual,
    Always,
}

/// Specifies how incoming RGBA values (source) and the RGBA in framebuffer
/// (destination) are combined.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Equation {
    /// Adds source and destination. Source and destination are multiplied
    /// by blending parameters before addition.
    Add,
    /// Subtracts destination from source. Source and destination are
    /// multiplied by blending parameters before subtraction.
    Subtract,
    /// Subtracts source from destination. Source and destination are
    /// multiplied by blending parameters before subtraction.
    ReverseSubtract,
}

/// Blend values.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum BlendValue {
    SourceColor,
    SourceAlpha,
    DestinationColor,
    DestinationAlpha,
}

/// Blend factors.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    Value(BlendValue),
    OneMinusValue(BlendValue),
}

/// The full blend descriptor. `None` at the usage site means blending is
/// disabled.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Blend {
    pub equation: Equation,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl Blend {
    /// Standard non-premultiplied alpha blending.
    pub fn alpha() -> Self {
        Blend {
            equation: Equation::Add,
            src: BlendFactor::Value(BlendValue::SourceAlpha),
            dst: BlendFactor::OneMinusValue(BlendValue::SourceAlpha),
        }
    }

    /// Additive blending.
    pub fn additive() -> Self {
        Blend {
            equation: Equation::Add,
            src: BlendFactor::Value(BlendValue::SourceAlpha),
            dst: BlendFactor::One,
        }
    }
}

/// Depth buffer interaction of a draw.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct DepthState {
    pub comparison: Comparison,
    pub write: bool,
}

impl Default for DepthState {
    fn default() -> Self {
        DepthState {
            comparison: Comparison::Always, // no depth test,
            write: false,                   // no depth write,
        }
    }
}

/// Stencil buffer operations.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    Increment,
    IncrementWrap,
    Decrement,
    DecrementWrap,
    Invert,
}

/// Stencil test of a draw. `None` at the usage site means the stencil test
/// is disabled.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct StencilTest {
    pub comparison: Comparison,
    pub reference: i32,
    pub mask: u32,
    pub on_fail: StencilOp,
    pub on_depth_fail: StencilOp,
    pub on_pass: StencilOp,
}

impl Default for StencilTest {
    fn default() -> Self {
        StencilTest {
            comparison: Comparison::Always,
            reference: 0,
            mask: !0,
            on_fail: StencilOp::Keep,
            on_depth_fail: StencilOp::Keep,
            on_pass: StencilOp::Keep,
        }
    }
}

/// Defines how the input vertex data is used to assemble primitives.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Primitive {
    /// Separate points.
    Points,
    /// Separate lines.
    Lines,
    /// Line strips.
    LineStrip,
    /// Separate triangles.
    Triangles,
    /// Triangle strips.
    TriangleStrip,
}

impl Primitive {
    /// The number of primitives assembled from `indices` indices.
    pub fn assemble(self, indices: u32) -> u32 {
        match self {
            Primitive::Points => indices,
            Primitive::Lines => indices / 2,
            Primitive::LineStrip => indices.saturating_sub(1),
            Primitive::Triangles => indices / 3,
            Primitive::TriangleStrip => indices.saturating_sub(2),
        }
    }

    /// Strip primitives can not be merged; concatenating two strips would
    /// weld their end vertices into phantom primitives.
    pub fn is_mergeable(self) -> bool {
        match self {
            Primitive::Points | Primitive::Lines | Primitive::Triangles => true,
            Primitive::LineStrip | Primitive::TriangleStrip => false,
        }
    }
}

/// An axis aligned rectangle in pixels, used for clip and viewport
/// rectangles. The origin is the lower-left corner of the target.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct SurfaceRect {
    pub position: Vector2<i32>,
    pub size: Vector2<u32>,
}

impl SurfaceRect {
    #[inline]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        SurfaceRect {
            position: Vector2::new(x, y),
            size: Vector2::new(width, height),
        }
    }

    /// A rectangle covering `size` from the origin.
    #[inline]
    pub fn of_size(size: Vector2<u32>) -> Self {
        SurfaceRect {
            position: Vector2::new(0, 0),
            size,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size.x == 0 || self.size.y == 0
    }
}

/// Specify how the texture is sampled whenever the pixel being sampled.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SamplerFilter {
    Nearest,
    Linear,
}

/// Sets the wrap parameter for texture coordinates.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SamplerWrap {
    Clamp,
    Repeat,
    Mirror,
}

/// The parameters of a sampler object. The backend caches one native
/// sampler per distinct parameter set.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct SamplerParams {
    pub filter: SamplerFilter,
    pub wrap: SamplerWrap,
}

impl Default for SamplerParams {
    fn default() -> Self {
        SamplerParams {
            filter: SamplerFilter::Linear,
            wrap: SamplerWrap::Clamp,
        }
    }
}

/// Where a batcher renders to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub enum RenderTarget {
    /// The default backbuffer. Sorts before any texture target.
    Backbuffer,
    /// An image resource used as render target. A framebuffer for it is
    /// created lazily, once, the first time it is drawn into.
    Texture(ImageId),
}

impl Default for RenderTarget {
    fn default() -> Self {
        RenderTarget::Backbuffer
    }
}

/// The clear operations applied the first time a target is bound in a
/// frame.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct ClearOps {
    pub color: Option<crate::math::color::Color>,
    pub depth: Option<f32>,
    pub stencil: Option<i32>,
}

impl Default for ClearOps {
    fn default() -> Self {
        ClearOps {
            color: Some(crate::math::color::Color::black()),
            depth: Some(1.0),
            stencil: None,
        }
    }
}

impl ClearOps {
    /// No clearing at all; the target keeps its previous contents.
    pub fn none() -> Self {
        ClearOps {
            color: None,
            depth: None,
            stencil: None,
        }
    }
}

/// Uniform variable type.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UniformType {
    I32,
    F32,
    Vector2f,
    Vector3f,
    Vector4f,
    Matrix4f,
}

/// Uniform variable of a draw. Matrices are supplied in column major order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum UniformValue {
    I32(i32),
    F32(f32),
    Vector2f([f32; 2]),
    Vector3f([f32; 3]),
    Vector4f([f32; 4]),
    Matrix4f([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn uniform_type(&self) -> UniformType {
        match *self {
            UniformValue::I32(_) => UniformType::I32,
            UniformValue::F32(_) => UniformType::F32,
            UniformValue::Vector2f(_) => UniformType::Vector2f,
            UniformValue::Vector3f(_) => UniformType::Vector3f,
            UniformValue::Vector4f(_) => UniformType::Vector4f,
            UniformValue::Matrix4f(_) => UniformType::Matrix4f,
        }
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vector2f(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vector3f(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vector4f(v)
    }
}

impl From<Vector2<f32>> for UniformValue {
    fn from(v: Vector2<f32>) -> Self {
        UniformValue::Vector2f(*v.as_ref())
    }
}

impl From<Vector3<f32>> for UniformValue {
    fn from(v: Vector3<f32>) -> Self {
        UniformValue::Vector3f(*v.as_ref())
    }
}

impl From<Vector4<f32>> for UniformValue {
    fn from(v: Vector4<f32>) -> Self {
        UniformValue::Vector4f(*v.as_ref())
    }
}

impl From<Matrix4<f32>> for UniformValue {
    fn from(v: Matrix4<f32>) -> Self {
        UniformValue::Matrix4f(v.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn assemble() {
        assert_eq!(Primitive::Triangles.assemble(6), 2);
        assert_eq!(Primitive::TriangleStrip.assemble(6), 4);
        assert_eq!(Primitive::TriangleStrip.assemble(0), 0);
        assert_eq!(Primitive::Lines.assemble(6), 3);
        assert_eq!(Primitive::Points.assemble(6), 6);
    }

    #[test]
    fn strips_are_not_mergeable() {
        assert!(Primitive::Triangles.is_mergeable());
        assert!(Primitive::Points.is_mergeable());
        assert!(!Primitive::TriangleStrip.is_mergeable());
        assert!(!Primitive::LineStrip.is_mergeable());
    }

    #[test]
    fn target_ordering() {
        use crate::video::resources::ImageId;

        let mut targets = vec![
            RenderTarget::Texture(ImageId(4)),
            RenderTarget::Backbuffer,
            RenderTarget::Texture(ImageId(1)),
        ];
        targets.sort();

        assert_eq!(
            targets,
            vec![
                RenderTarget::Backbuffer,
                RenderTarget::Texture(ImageId(1)),
                RenderTarget::Texture(ImageId(4)),
            ]
        );
    }

    #[test]
    fn uniform_types() {
        let v: UniformValue = 1.0f32.into();
        assert_eq!(v.uniform_type(), UniformType::F32);

        let v: UniformValue = [0.0f32, 1.0].into();
        assert_eq!(v.uniform_type(), UniformType::Vector2f);
    }
}
