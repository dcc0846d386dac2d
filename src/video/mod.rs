//! The batching and draw-command pipeline.
//!
//! Applications build [`Geometry`](geometry/struct.Geometry.html) objects
//! and group them into [`Batcher`](batch/struct.Batcher.html)s through the
//! [`Renderer`](renderer/struct.Renderer.html). Every frame the renderer
//! asks each dirty batcher to sort its geometry and merge neighbouring
//! pieces with identical resolved state into draw commands, then replays
//! the command queue through a
//! [`RendererBackend`](backends/trait.RendererBackend.html).
//!
//! The backend owns the GPU-visible memory: a few rotating byte ranges per
//! logical buffer, each guarded by a fence so the CPU never overwrites data
//! the GPU is still reading.

pub mod backends;
pub mod batch;
pub mod camera;
pub mod command;
pub mod errors;
pub mod geometry;
pub mod renderer;
pub mod resources;
pub mod state;
pub mod vertex;

/// Maximum number of texture slots a draw command can bind.
pub const MAX_TEXTURE_SLOTS: usize = 8;

/// Maximum number of per-draw uniform overrides.
pub const MAX_UNIFORM_OVERRIDES: usize = 8;

/// Maximum depth of a geometry parent chain. Deeper chains are treated as
/// malformed to keep the world-transform walk bounded.
pub const MAX_PARENT_DEPTH: usize = 64;

pub mod prelude {
    pub use super::backends::{GlProfile, RendererBackend, SubmitInfo, VideoConfig};
    pub use super::batch::{Batcher, BatcherHandle, BatcherParams};
    pub use super::camera::Camera;
    pub use super::command::{BufferCommand, DrawCommand, DrawKind, Frame};
    pub use super::errors::{Error, Result};
    pub use super::geometry::{
        Geometry, GeometryHandle, GeometryParams, TextureBinding, UploadHint,
    };
    pub use super::renderer::{FrameInfo, Renderer};
    pub use super::resources::{
        DisplayEvent, DisplayRequest, GlslSources, ImageId, ImageResource, Resource,
        ResourceEvent, ShaderId, ShaderLayout, ShaderResource, ShaderSources,
    };
    pub use super::state::{
        Blend, BlendFactor, BlendValue, ClearOps, Comparison, DepthState, Equation, Primitive,
        RenderTarget, SamplerFilter, SamplerParams, SamplerWrap, StencilOp, StencilTest,
        SurfaceRect, UniformType, UniformValue,
    };
    pub use super::vertex::Vertex;
}
