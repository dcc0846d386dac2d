//! The backends of the renderer, responsible for only one thing: moving
//! frame data into GPU-visible memory and replaying draw commands with the
//! minimal number of driver calls.

pub mod headless;
pub mod ring;

pub mod gl;

use crate::math::prelude::Vector2;
use crate::video::command::Frame;
use crate::video::errors::Result;
use crate::video::resources::{ImageId, ImageResource, ShaderResource, ShaderId};

/// Which upload path the OpenGL backend uses. Both share the same ring
/// accounting and state diffing; only the way bytes reach the buffer
/// object differs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum GlProfile {
    /// Core profile 3.3. Frame data is staged on the CPU and flushed with
    /// `BufferSubData` after the fence wait.
    Core33,
    /// Core profile 4.4 with `ARB_buffer_storage`. The ring buffers are
    /// persistently mapped once and written through directly.
    Core44,
}

/// Configuration of the rendering core, decided once at startup.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct VideoConfig {
    pub profile: GlProfile,
    /// Number of frames in flight; each logical buffer keeps this many
    /// rotating ranges.
    pub buffering: usize,
    /// Byte capacity of one vertex ring range.
    pub vertex_capacity: usize,
    /// Byte capacity of one index ring range.
    pub index_capacity: usize,
    /// Byte capacity of one globals-uniform ring range.
    pub globals_capacity: usize,
    /// Byte capacity of the retained (static geometry) buffer region.
    pub static_capacity: usize,
    /// Upper bound of the fence poll before the frame is declared lost.
    pub fence_timeout_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            profile: GlProfile::Core44,
            buffering: 3,
            vertex_capacity: 4 * 1024 * 1024,
            index_capacity: 1024 * 1024,
            globals_capacity: 512 * 1024,
            static_capacity: 8 * 1024 * 1024,
            fence_timeout_ms: 1000,
        }
    }
}

impl VideoConfig {
    /// The per-geometry size limits the batcher validates against.
    pub fn limits(&self) -> BufferLimits {
        BufferLimits {
            vertex_bytes: self.vertex_capacity,
            index_bytes: self.index_capacity,
        }
    }
}

/// Per-geometry size limits derived from the configured range capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub vertex_bytes: usize,
    pub index_bytes: usize,
}

/// What a submission did, for frame statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    pub drawcalls: u32,
    pub primitives: u32,
}

/// The stateful engine below the renderer. Implementations own the
/// GPU-visible buffers, track currently-bound GPU state to diff against
/// incoming commands, and tie resource lifecycles to the created/removed
/// events of the resource system.
///
/// The per-frame call order is fixed: `pre_draw`, `upload_buffer_commands`,
/// `upload_geometry_commands`, `submit_commands`, `post_draw`.
pub trait RendererBackend {
    /// Begins a frame: waits until the ring range owned by this frame is
    /// safe to write and resets transient counters.
    fn pre_draw(&mut self) -> Result<()>;

    /// Copies baked static geometry into the retained buffer region.
    fn upload_buffer_commands(&mut self, frame: &Frame) -> Result<()>;

    /// Copies this frame's stream vertex/index bytes and per-command
    /// globals into the active ring range.
    fn upload_geometry_commands(&mut self, frame: &Frame) -> Result<()>;

    /// Diffs GPU state per command and issues the draw calls.
    fn submit_commands(&mut self, frame: &Frame) -> Result<SubmitInfo>;

    /// Ends a frame: installs the fence for the active range and advances
    /// the ring index. Presentation itself is owned by the windowing
    /// collaborator.
    fn post_draw(&mut self) -> Result<()>;

    /// The display size changed; recreates the backbuffer representation.
    fn resize(&mut self, dimensions: Vector2<u32>) -> Result<()>;

    /// Invalidates every cached binding, forcing the next frame to rebind
    /// from scratch.
    fn clear(&mut self);

    /// Releases every GPU object and mapping this backend owns.
    fn cleanup(&mut self) -> Result<()>;

    fn image_created(&mut self, image: &ImageResource) -> Result<()>;
    fn image_removed(&mut self, id: ImageId) -> Result<()>;
    fn shader_created(&mut self, shader: &ShaderResource) -> Result<()>;
    fn shader_removed(&mut self, id: ShaderId) -> Result<()>;

    /// Concrete-type access for tests and tooling.
    fn as_any(&self) -> &dyn ::std::any::Any;
}

/// Creates the OpenGL backend. `loader` resolves GL symbols from the
/// context the windowing collaborator created; the context must be current
/// on this thread.
pub fn new<F>(config: &VideoConfig, loader: F) -> Result<Box<dyn RendererBackend>>
where
    F: FnMut(&str) -> *const ::std::os::raw::c_void,
{
    let backend = unsafe { self::gl::backend::GlBackend::new(config, loader)? };
    Ok(Box::new(backend))
}

/// Creates the headless backend, which performs all bookkeeping but no GPU
/// work. Used by tests and server-side builds.
pub fn new_headless(config: &VideoConfig) -> Box<dyn RendererBackend> {
    Box::new(self::headless::HeadlessBackend::new(config))
}
