//! The interface to the external resource and display collaborators.
//!
//! Images and shaders are loaded, decoded and owned elsewhere; the core
//! only learns about them through [`ResourceEvent`]s and addresses them by
//! integer ids afterwards. By the time a removal event handler returns, the
//! backend has released every GPU object for that id.
//!
//! [`ResourceEvent`]: enum.ResourceEvent.html

use std::fmt;

use crate::math::prelude::Vector2;
use crate::video::state::UniformType;

/// Id of an image resource, assigned by the resource system.
#[derive(
    Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct ImageId(pub u32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Image ({})", self.0)
    }
}

/// Id of a shader resource, assigned by the resource system.
#[derive(
    Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct ShaderId(pub u32);

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Shader ({})", self.0)
    }
}

/// An image resource as delivered by the resource system: decoded RGBA8
/// pixels, tightly packed, row by row from the bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    pub id: ImageId,
    pub dimensions: Vector2<u32>,
    pub pixels: Vec<u8>,
}

impl ImageResource {
    /// The expected byte length of the pixel data.
    #[inline]
    pub fn expected_len(&self) -> usize {
        self.dimensions.x as usize * self.dimensions.y as usize * 4
    }
}

/// GLSL sources of one shader.
///
/// Vertex attribute locations are a contract with the backend: `0` is the
/// position, `1` the color, `2` the texture coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct GlslSources {
    pub vertex: String,
    pub fragment: String,
}

/// Per-backend shader sources. A backend that finds its slot empty reports
/// a fatal `NoShaderSource` error instead of guessing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderSources {
    pub glsl: Option<GlslSources>,
}

/// The declared layout of a shader: which texture slots it samples, the
/// name of its globals uniform block, and its scalar uniforms. The backend
/// validates the declaration against the linked program and caches the
/// resolved locations keyed by shader id.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderLayout {
    /// One sampler uniform name per texture slot; slot order is array
    /// order. Every draw must provide at least this many textures.
    pub samplers: Vec<String>,
    /// The uniform block carrying the camera matrices.
    pub globals_block: String,
    /// Scalar uniforms that may be overridden per draw.
    pub uniforms: Vec<(String, UniformType)>,
}

impl Default for ShaderLayout {
    fn default() -> Self {
        ShaderLayout {
            samplers: Vec::new(),
            globals_block: "Globals".to_owned(),
            uniforms: Vec::new(),
        }
    }
}

/// A shader resource as delivered by the resource system.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderResource {
    pub id: ShaderId,
    pub sources: ShaderSources,
    pub layout: ShaderLayout,
}

/// The payload of a resource event.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Image(ImageResource),
    Shader(ShaderResource),
}

/// Resource lifecycle notifications from the resource system. Creation
/// handlers allocate and upload GPU objects immediately; removal handlers
/// must not return before every GPU object of the resource is released.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    Created(Resource),
    Removed(Resource),
}

/// Notifications from the display collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayEvent {
    /// The drawable size changed; the backend recreates its backbuffer
    /// representation at the new size.
    SizeChanged(Vector2<u32>),
    /// The application asks for a different display mode. The core only
    /// forwards this to the windowing layer, it does not decide success.
    ChangeRequested {
        dimensions: Vector2<u32>,
        fullscreen: bool,
        vsync: bool,
    },
}

/// A display mode change forwarded to the windowing layer, to be drained
/// with `Renderer::drain_display_requests`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRequest {
    pub dimensions: Vector2<u32>,
    pub fullscreen: bool,
    pub vsync: bool,
}
