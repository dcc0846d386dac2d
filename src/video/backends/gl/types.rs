//! Conversions from the plain-data state descriptors into GL enumerants.

use gl;
use gl::types::GLenum;

use crate::video::state::{
    BlendFactor, BlendValue, Comparison, Equation, Primitive, SamplerFilter, SamplerWrap,
    StencilOp,
};

impl From<Comparison> for GLenum {
    fn from(v: Comparison) -> Self {
        match v {
            Comparison::Never => gl::NEVER,
            Comparison::Less => gl::LESS,
            Comparison::LessOrEqual => gl::LEQUAL,
            Comparison::Greater => gl::GREATER,
            Comparison::GreaterOrEqual => gl::GEQUAL,
            Comparison::Equal => gl::EQUAL,
            Comparison::NotEqual => gl::NOTEQUAL,
            Comparison::Always => gl::ALWAYS,
        }
    }
}

impl From<Equation> for GLenum {
    fn from(v: Equation) -> Self {
        match v {
            Equation::Add => gl::FUNC_ADD,
            Equation::Subtract => gl::FUNC_SUBTRACT,
            Equation::ReverseSubtract => gl::FUNC_REVERSE_SUBTRACT,
        }
    }
}

impl From<BlendFactor> for GLenum {
    fn from(v: BlendFactor) -> Self {
        match v {
            BlendFactor::Zero => gl::ZERO,
            BlendFactor::One => gl::ONE,
            BlendFactor::Value(BlendValue::SourceColor) => gl::SRC_COLOR,
            BlendFactor::Value(BlendValue::SourceAlpha) => gl::SRC_ALPHA,
            BlendFactor::Value(BlendValue::DestinationColor) => gl::DST_COLOR,
            BlendFactor::Value(BlendValue::DestinationAlpha) => gl::DST_ALPHA,
            BlendFactor::OneMinusValue(BlendValue::SourceColor) => gl::ONE_MINUS_SRC_COLOR,
            BlendFactor::OneMinusValue(BlendValue::SourceAlpha) => gl::ONE_MINUS_SRC_ALPHA,
            BlendFactor::OneMinusValue(BlendValue::DestinationColor) => gl::ONE_MINUS_DST_COLOR,
            BlendFactor::OneMinusValue(BlendValue::DestinationAlpha) => gl::ONE_MINUS_DST_ALPHA,
        }
    }
}

impl From<Primitive> for GLenum {
    fn from(v: Primitive) -> Self {
        match v {
            Primitive::Points => gl::POINTS,
            Primitive::Lines => gl::LINES,
            Primitive::LineStrip => gl::LINE_STRIP,
            Primitive::Triangles => gl::TRIANGLES,
            Primitive::TriangleStrip => gl::TRIANGLE_STRIP,
        }
    }
}

impl From<StencilOp> for GLenum {
    fn from(v: StencilOp) -> Self {
        match v {
            StencilOp::Keep => gl::KEEP,
            StencilOp::Zero => gl::ZERO,
            StencilOp::Replace => gl::REPLACE,
            StencilOp::Increment => gl::INCR,
            StencilOp::IncrementWrap => gl::INCR_WRAP,
            StencilOp::Decrement => gl::DECR,
            StencilOp::DecrementWrap => gl::DECR_WRAP,
            StencilOp::Invert => gl::INVERT,
        }
    }
}

impl From<SamplerFilter> for GLenum {
    fn from(v: SamplerFilter) -> Self {
        match v {
            SamplerFilter::Nearest => gl::NEAREST,
            SamplerFilter::Linear => gl::LINEAR,
        }
    }
}

impl From<SamplerWrap> for GLenum {
    fn from(v: SamplerWrap) -> Self {
        match v {
            SamplerWrap::Clamp => gl::CLAMP_TO_EDGE,
            SamplerWrap::Repeat => gl::REPEAT,
            SamplerWrap::Mirror => gl::MIRRORED_REPEAT,
        }
    }
}
