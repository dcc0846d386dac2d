use crate::video::batch::BatcherHandle;
use crate::video::geometry::GeometryHandle;
use crate::video::resources::{ImageId, ShaderId};
use crate::video::state::UniformType;

/// Errors of the rendering core. Everything in here is fatal for the
/// current frame or the whole session; there is no retry path. The only
/// wait anywhere in the pipeline is the bounded fence poll, whose
/// expiration surfaces as `SyncTimeout`.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "{} has no shader source for the active backend.", _0)]
    NoShaderSource(ShaderId),
    #[fail(display = "{} already exists.", _0)]
    ShaderDuplicated(ShaderId),
    #[fail(display = "Failed to compile {} stage of {}:\n{}", _1, _0, _2)]
    ShaderCompileFailure(ShaderId, &'static str, String),
    #[fail(display = "Failed to link {}:\n{}", _0, _1)]
    ShaderLinkFailure(ShaderId, String),
    #[fail(display = "Uniform block '{}' is undefined in {}.", _1, _0)]
    UniformBlockUndefined(ShaderId, String),
    #[fail(display = "Uniform '{}' is undefined in {}.", _1, _0)]
    UniformUndefined(ShaderId, String),
    #[fail(display = "Uniform '{}' of {} needs a {:?} instead of {:?}.", _1, _0, _2, _3)]
    UniformTypeMismatch(ShaderId, String, UniformType, UniformType),
    #[fail(display = "{} samples {} textures, but the command provides {}.", _0, _1, _2)]
    TextureSlotMismatch(ShaderId, usize, usize),
    #[fail(display = "Surface of {} is incomplete: {}", _0, _1)]
    SurfaceIncomplete(ImageId, String),

    #[fail(display = "{} is invalid.", _0)]
    ImageInvalid(ImageId),
    #[fail(display = "{} is invalid.", _0)]
    ShaderInvalid(ShaderId),
    #[fail(display = "{} is invalid.", _0)]
    GeometryInvalid(GeometryHandle),
    #[fail(display = "{} is invalid.", _0)]
    BatcherInvalid(BatcherHandle),
    #[fail(display = "{} carries malformed data: {}", _0, _1)]
    ImageMalformed(ImageId, String),
    #[fail(display = "Geometry carries malformed data: {}", _0)]
    GeometryMalformed(String),

    #[fail(
        display = "Geometry of {} bytes exceeds the {} byte capacity of buffer '{}'.",
        _1, _2, _0
    )]
    GeometryTooLarge(&'static str, usize, usize),
    #[fail(
        display = "Frame data exhausted the {} byte capacity of buffer '{}'.",
        _1, _0
    )]
    FrameCapacityExhausted(&'static str, usize),

    #[fail(
        display = "Timed out after {}ms waiting for the gpu fence of frame {}.",
        _0, _1
    )]
    SyncTimeout(u64, u64),
    #[fail(display = "The OpenGL implementation does not support {}.", _0)]
    Requirement(String),
    #[fail(display = "[GL] {}", _0)]
    Backend(String),
}

pub type Result<T> = ::std::result::Result<T, Error>;
