//! Frame-transient draw and upload commands.

use smallvec::SmallVec;

use crate::math::Matrix4;
use crate::utils::prelude::{DataBuffer, DataBufferPtr, HashValue};
use crate::video::geometry::{GeometryHandle, TextureBinding};
use crate::video::resources::ShaderId;
use crate::video::state::{
    Blend, ClearOps, DepthState, Primitive, RenderTarget, StencilTest, SurfaceRect, UniformValue,
};
use crate::video::vertex::Vertex;
use crate::video::{MAX_TEXTURE_SLOTS, MAX_UNIFORM_OVERRIDES};

/// Where the bytes of a draw come from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawKind {
    /// The vertex data was re-transformed this frame and travels with the
    /// frame's data buffer; the backend copies it into the active ring
    /// range before drawing.
    Stream {
        vertices: DataBufferPtr<[Vertex]>,
        indices: DataBufferPtr<[u32]>,
    },
    /// The vertex data of a static geometry was uploaded in an earlier
    /// frame; the backend draws straight from the retained byte range.
    Retained { geometry: GeometryHandle },
}

/// An immutable-per-frame descriptor of one or more geometries rendered
/// with one resolved state. Constructed by batchers, consumed by the
/// backend, never persisted beyond the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    /// Sequential position in the frame's command queue, assigned when the
    /// command is pushed. The backend uses it to pair a command with its
    /// upload slot.
    pub id: u32,
    pub kind: DrawKind,
    pub primitive: Primitive,
    pub target: RenderTarget,
    pub shader: ShaderId,
    pub textures: SmallVec<[TextureBinding; MAX_TEXTURE_SLOTS]>,
    pub blend: Option<Blend>,
    pub depth_state: DepthState,
    pub stencil: Option<StencilTest>,
    pub clip: Option<SurfaceRect>,
    pub viewport: Option<SurfaceRect>,
    pub clear: ClearOps,
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub uniforms: SmallVec<[(HashValue<str>, UniformValue); MAX_UNIFORM_OVERRIDES]>,
    pub num_vertices: u32,
    pub num_indices: u32,
}

/// A one-shot upload of a static geometry's baked bytes into the backend's
/// retained buffer region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferCommand {
    pub geometry: GeometryHandle,
    pub vertices: DataBufferPtr<[Vertex]>,
    pub indices: DataBufferPtr<[u32]>,
}

/// One frame's worth of commands and their backing bytes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame {
    pub uploads: Vec<BufferCommand>,
    pub cmds: Vec<DrawCommand>,
    pub bufs: DataBuffer,
}

impl Frame {
    /// Creates a new frame with the specified byte capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Frame {
            uploads: Vec::new(),
            cmds: Vec::with_capacity(16),
            bufs: DataBuffer::with_capacity(capacity),
        }
    }

    /// Forgets the recorded commands. Has no effect on the allocated
    /// capacity of the underlying storage.
    #[inline]
    pub fn clear(&mut self) {
        self.uploads.clear();
        self.cmds.clear();
        self.bufs.clear();
    }

    /// Appends a draw command, assigning its queue id.
    #[inline]
    pub fn push(&mut self, mut cmd: DrawCommand) {
        cmd.id = self.cmds.len() as u32;
        self.cmds.push(cmd);
    }
}
