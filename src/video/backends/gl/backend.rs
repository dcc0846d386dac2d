//! The OpenGL core profile implementation of `RendererBackend`.
//!
//! Frame data flows through three ring-buffered buffer objects (vertices,
//! indices, globals). On `Core44` the rings are persistently mapped and
//! written through directly; on `Core33` they are staged on the CPU and
//! flushed with `BufferSubData`. Both variants share the same accounting:
//! a range is written only after the fence installed on it a buffering
//! cycle ago has signaled.
//!
//! Static geometry lives in a separate pair of buffers managed by a
//! free-list allocator; draws reference its ranges purely by offset.

use std::ffi::CString;
use std::ptr;

use gl;
use gl::types::*;

use crate::math::prelude::Vector2;
use crate::utils::prelude::{FastHashMap, HashValue};
use crate::video::command::{DrawCommand, DrawKind, Frame};
use crate::video::errors::{Error, Result};
use crate::video::geometry::GeometryHandle;
use crate::video::resources::{
    GlslSources, ImageId, ImageResource, ShaderId, ShaderResource,
};
use crate::video::state::{
    Blend, ClearOps, DepthState, RenderTarget, SamplerParams, StencilTest, SurfaceRect,
    UniformType, UniformValue,
};
use crate::video::vertex::Vertex;

use super::super::ring::{FrameSync, RangeAlloc, RingBuffer};
use super::super::{GlProfile, RendererBackend, SubmitInfo, VideoConfig};
use super::binding::{resolve_scissor, resolve_viewport, GpuBindingState};

/// The uniform block binding point of the globals block.
const GLOBALS_BINDING: GLuint = 0;

/// std140 size of the globals block: projection + view.
const GLOBALS_SIZE: usize = 128;

/// Offset alignment required for `BindBufferRange` on the uniform buffer;
/// raised to the driver's value at startup.
const DEFAULT_UBO_ALIGN: usize = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Globals {
    projection: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
}

impl Globals {
    fn as_bytes(&self) -> &[u8] {
        unsafe {
            ::std::slice::from_raw_parts(
                self as *const Globals as *const u8,
                ::std::mem::size_of::<Globals>(),
            )
        }
    }
}

#[derive(Debug)]
struct GlFence(GLsync);

/// One ring-buffered buffer object and its upload path.
struct StreamBuffer {
    name: &'static str,
    target: GLenum,
    buffer: GLuint,
    ring: RingBuffer,
    storage: StreamStorage,
}

enum StreamStorage {
    /// `Core44`: persistently mapped, coherent; writes land directly.
    Persistent(*mut u8),
    /// `Core33`: CPU staging, flushed with `BufferSubData` per frame.
    Staged(Vec<u8>),
}

impl StreamBuffer {
    unsafe fn new(
        name: &'static str,
        target: GLenum,
        buffering: usize,
        range_capacity: usize,
        profile: GlProfile,
    ) -> Result<Self> {
        let ring = RingBuffer::new(buffering, range_capacity);
        let total = ring.total_capacity();

        let mut buffer = 0;
        gl::GenBuffers(1, &mut buffer);
        assert!(buffer != 0);
        gl::BindBuffer(target, buffer);

        let storage = match profile {
            GlProfile::Core44 => {
                let flags = gl::MAP_WRITE_BIT | gl::MAP_PERSISTENT_BIT | gl::MAP_COHERENT_BIT;
                gl::BufferStorage(target, total as GLsizeiptr, ptr::null(), flags);
                check()?;

                let map = gl::MapBufferRange(target, 0, total as GLsizeiptr, flags);
                check()?;
                if map.is_null() {
                    return Err(Error::Backend(format!(
                        "failed to map the {} buffer.",
                        name
                    )));
                }

                StreamStorage::Persistent(map as *mut u8)
            }
            GlProfile::Core33 => {
                gl::BufferData(target, total as GLsizeiptr, ptr::null(), gl::STREAM_DRAW);
                check()?;
                StreamStorage::Staged(vec![0; total])
            }
        };

        Ok(StreamBuffer {
            name,
            target,
            buffer,
            ring,
            storage,
        })
    }

    fn reset(&mut self, slot: usize) {
        self.ring.reset(slot);
    }

    /// Copies `bytes` into the active range and returns the absolute byte
    /// offset inside the buffer object.
    unsafe fn write(&mut self, slot: usize, bytes: &[u8], align: usize) -> Result<usize> {
        let offset = self
            .ring
            .alloc_checked(slot, bytes.len(), align, self.name)?;

        match self.storage {
            StreamStorage::Persistent(map) => {
                ptr::copy_nonoverlapping(bytes.as_ptr(), map.add(offset), bytes.len());
            }
            StreamStorage::Staged(ref mut staging) => {
                staging[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
        }

        Ok(offset)
    }

    /// Pushes the staged span of the active range to the driver. A no-op
    /// for the persistently mapped variant, which is coherent.
    unsafe fn flush(&mut self, slot: usize) -> Result<()> {
        if let StreamStorage::Staged(ref staging) = self.storage {
            let (start, len) = self.ring.span(slot);
            if len > 0 {
                gl::BindBuffer(self.target, self.buffer);
                gl::BufferSubData(
                    self.target,
                    start as GLintptr,
                    len as GLsizeiptr,
                    staging.as_ptr().add(start) as *const ::std::os::raw::c_void,
                );
                check()?;
            }
        }

        Ok(())
    }

    unsafe fn cleanup(&mut self) {
        if let StreamStorage::Persistent(_) = self.storage {
            gl::BindBuffer(self.target, self.buffer);
            gl::UnmapBuffer(self.target);
        }
        gl::DeleteBuffers(1, &self.buffer);
        self.buffer = 0;
    }
}

/// Byte ranges of one retained geometry inside the static buffers.
#[derive(Debug, Clone, Copy)]
struct RetainedRange {
    vertex_offset: usize,
    vertex_bytes: usize,
    index_offset: usize,
    index_bytes: usize,
}

/// The retained buffer region for static geometry.
struct StaticStore {
    vbo: GLuint,
    ibo: GLuint,
    vertices: RangeAlloc,
    indices: RangeAlloc,
    ranges: FastHashMap<GeometryHandle, RetainedRange>,
    // Ranges freed this frame may still be read by frames in flight;
    // they return to the allocator once their frame is provably retired.
    pending: Vec<(u64, RetainedRange)>,
}

impl StaticStore {
    unsafe fn new(capacity: usize) -> Result<Self> {
        let mut vbo = 0;
        gl::GenBuffers(1, &mut vbo);
        gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
        gl::BufferData(
            gl::ARRAY_BUFFER,
            capacity as GLsizeiptr,
            ptr::null(),
            gl::STATIC_DRAW,
        );
        check()?;

        let mut ibo = 0;
        gl::GenBuffers(1, &mut ibo);
        gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, ibo);
        gl::BufferData(
            gl::ELEMENT_ARRAY_BUFFER,
            capacity as GLsizeiptr,
            ptr::null(),
            gl::STATIC_DRAW,
        );
        check()?;

        Ok(StaticStore {
            vbo,
            ibo,
            vertices: RangeAlloc::new(capacity),
            indices: RangeAlloc::new(capacity),
            ranges: FastHashMap::default(),
            pending: Vec::new(),
        })
    }

    /// Returns ranges freed at least `buffering` frames ago to the
    /// allocator.
    fn release_retired(&mut self, frame: u64, buffering: usize) {
        let vertices = &mut self.vertices;
        let indices = &mut self.indices;
        self.pending.retain(|&(freed, range)| {
            if frame >= freed + buffering as u64 {
                vertices.free(range.vertex_offset, range.vertex_bytes);
                indices.free(range.index_offset, range.index_bytes);
                false
            } else {
                true
            }
        });
    }
}

struct GlImage {
    texture: GLuint,
    dimensions: Vector2<u32>,
    refs: u32,
    fbo: Option<GLuint>,
}

struct UniformEntry {
    location: GLint,
    ty: UniformType,
    name: String,
}

struct GlShader {
    program: GLuint,
    texture_slots: usize,
    uniforms: FastHashMap<HashValue<str>, UniformEntry>,
}

/// Where the bytes of one submitted command ended up this frame.
#[derive(Debug, Clone, Copy, Default)]
struct UploadSlot {
    vertex_offset: usize,
    index_offset: usize,
    globals_offset: usize,
}

pub struct GlBackend {
    profile: GlProfile,
    ubo_align: usize,
    fence_timeout_ms: u64,

    binding: GpuBindingState,
    sync: FrameSync<GlFence>,
    vertices: StreamBuffer,
    indices: StreamBuffer,
    globals: StreamBuffer,
    statics: StaticStore,
    uploads: Vec<UploadSlot>,

    images: FastHashMap<ImageId, GlImage>,
    shaders: FastHashMap<ShaderId, GlShader>,
    samplers: FastHashMap<SamplerParams, GLuint>,

    vao_stream: GLuint,
    vao_static: GLuint,
    dimensions: Vector2<u32>,
}

impl GlBackend {
    /// Creates the backend against the context that is current on this
    /// thread. `loader` resolves GL symbols; the first `resize` establishes
    /// the backbuffer dimensions.
    pub unsafe fn new<F>(config: &VideoConfig, loader: F) -> Result<Self>
    where
        F: FnMut(&str) -> *const ::std::os::raw::c_void,
    {
        gl::load_with(loader);

        if config.profile == GlProfile::Core44 && !gl::BufferStorage::is_loaded() {
            return Err(Error::Requirement("ARB_buffer_storage".into()));
        }
        if !gl::FenceSync::is_loaded() {
            return Err(Error::Requirement("sync objects".into()));
        }

        let mut ubo_align = 0;
        gl::GetIntegerv(gl::UNIFORM_BUFFER_OFFSET_ALIGNMENT, &mut ubo_align);
        let ubo_align = if ubo_align > 0 {
            ubo_align as usize
        } else {
            DEFAULT_UBO_ALIGN
        };

        info!(
            "GlBackend {:?}, buffering {}, uniform offset alignment {}.",
            config.profile, config.buffering, ubo_align
        );

        let vertices = StreamBuffer::new(
            "vertices",
            gl::ARRAY_BUFFER,
            config.buffering,
            config.vertex_capacity,
            config.profile,
        )?;
        let indices = StreamBuffer::new(
            "indices",
            gl::ELEMENT_ARRAY_BUFFER,
            config.buffering,
            config.index_capacity,
            config.profile,
        )?;
        let globals = StreamBuffer::new(
            "globals",
            gl::UNIFORM_BUFFER,
            config.buffering,
            config.globals_capacity,
            config.profile,
        )?;
        let statics = StaticStore::new(config.static_capacity)?;

        let vao_stream = Self::create_vao(vertices.buffer, indices.buffer)?;
        let vao_static = Self::create_vao(statics.vbo, statics.ibo)?;

        // Fixed pipeline defaults; everything else is diffed per command.
        gl::Disable(gl::CULL_FACE);
        gl::Enable(gl::SCISSOR_TEST);
        gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
        check()?;

        Ok(GlBackend {
            profile: config.profile,
            ubo_align,
            fence_timeout_ms: config.fence_timeout_ms,
            binding: GpuBindingState::new(),
            sync: FrameSync::new(config.buffering),
            vertices,
            indices,
            globals,
            statics,
            uploads: Vec::new(),
            images: FastHashMap::default(),
            shaders: FastHashMap::default(),
            samplers: FastHashMap::default(),
            vao_stream,
            vao_static,
            dimensions: Vector2::new(0, 0),
        })
    }

    /// Builds a vertex array describing the fixed vertex layout over `vbo`,
    /// with `ibo` as its element buffer.
    unsafe fn create_vao(vbo: GLuint, ibo: GLuint) -> Result<GLuint> {
        let mut vao = 0;
        gl::GenVertexArrays(1, &mut vao);
        assert!(vao != 0);

        gl::BindVertexArray(vao);
        gl::BindBuffer(gl::ARRAY_BUFFER, vbo);

        let stride = Vertex::STRIDE as GLsizei;
        gl::EnableVertexAttribArray(0);
        gl::VertexAttribPointer(0, 3, gl::FLOAT, gl::FALSE, stride, offset_ptr(0));
        gl::EnableVertexAttribArray(1);
        gl::VertexAttribPointer(1, 4, gl::FLOAT, gl::FALSE, stride, offset_ptr(12));
        gl::EnableVertexAttribArray(2);
        gl::VertexAttribPointer(2, 2, gl::FLOAT, gl::FALSE, stride, offset_ptr(28));

        gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, ibo);
        gl::BindVertexArray(0);

        check()?;
        Ok(vao)
    }

    fn target_dimensions(&self, target: RenderTarget) -> Result<Vector2<u32>> {
        match target {
            RenderTarget::Backbuffer => Ok(self.dimensions),
            RenderTarget::Texture(id) => self
                .images
                .get(&id)
                .map(|v| v.dimensions)
                .ok_or_else(|| Error::ImageInvalid(id)),
        }
    }

    /// The framebuffer object of a texture target, created lazily exactly
    /// once per image id.
    unsafe fn framebuffer(&mut self, id: ImageId) -> Result<GLuint> {
        let texture = {
            let image = self.images.get(&id).ok_or_else(|| Error::ImageInvalid(id))?;
            if let Some(fbo) = image.fbo {
                return Ok(fbo);
            }
            image.texture
        };

        let mut fbo = 0;
        gl::GenFramebuffers(1, &mut fbo);
        assert!(fbo != 0);

        gl::BindFramebuffer(gl::FRAMEBUFFER, fbo);
        self.binding.target = None;
        gl::FramebufferTexture2D(
            gl::FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            texture,
            0,
        );

        let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
        if status != gl::FRAMEBUFFER_COMPLETE {
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::DeleteFramebuffers(1, &fbo);
            return Err(Error::SurfaceIncomplete(id, describe_fbo_status(status)));
        }

        if let Some(image) = self.images.get_mut(&id) {
            image.fbo = Some(fbo);
        }
        Ok(fbo)
    }

    unsafe fn sampler(
        samplers: &mut FastHashMap<SamplerParams, GLuint>,
        params: SamplerParams,
    ) -> Result<GLuint> {
        if let Some(&v) = samplers.get(&params) {
            return Ok(v);
        }

        let mut sampler = 0;
        gl::GenSamplers(1, &mut sampler);
        assert!(sampler != 0);

        let filter: GLenum = params.filter.into();
        let wrap: GLenum = params.wrap.into();
        gl::SamplerParameteri(sampler, gl::TEXTURE_MIN_FILTER, filter as GLint);
        gl::SamplerParameteri(sampler, gl::TEXTURE_MAG_FILTER, filter as GLint);
        gl::SamplerParameteri(sampler, gl::TEXTURE_WRAP_S, wrap as GLint);
        gl::SamplerParameteri(sampler, gl::TEXTURE_WRAP_T, wrap as GLint);
        check()?;

        samplers.insert(params, sampler);
        Ok(sampler)
    }

    unsafe fn wait_fence(fence: GlFence, timeout_ms: u64, frame: u64) -> Result<()> {
        const SLICE_NANOS: u64 = 1_000_000;

        let mut waited_ms = 0;
        loop {
            let r = gl::ClientWaitSync(fence.0, gl::SYNC_FLUSH_COMMANDS_BIT, SLICE_NANOS);
            match r {
                gl::ALREADY_SIGNALED | gl::CONDITION_SATISFIED => {
                    gl::DeleteSync(fence.0);
                    return Ok(());
                }
                gl::TIMEOUT_EXPIRED => {
                    waited_ms += 1;
                    if waited_ms >= timeout_ms {
                        gl::DeleteSync(fence.0);
                        return Err(Error::SyncTimeout(timeout_ms, frame));
                    }
                }
                _ => {
                    gl::DeleteSync(fence.0);
                    return Err(Error::Backend("waiting on a fence failed.".into()));
                }
            }
        }
    }
}

impl RendererBackend for GlBackend {
    fn pre_draw(&mut self) -> Result<()> {
        let frame = self.sync.frame();
        let fence_frame = frame.saturating_sub(self.sync.buffering() as u64);
        let timeout = self.fence_timeout_ms;
        let slot = self
            .sync
            .begin_frame(|fence| unsafe { Self::wait_fence(fence, timeout, fence_frame) })?;

        self.vertices.reset(slot);
        self.indices.reset(slot);
        self.globals.reset(slot);
        self.statics
            .release_retired(frame, self.sync.buffering());
        self.uploads.clear();
        self.binding.begin_frame();
        Ok(())
    }

    fn upload_buffer_commands(&mut self, frame: &Frame) -> Result<()> {
        unsafe {
            if !frame.uploads.is_empty() {
                // The element buffer binding is VAO state; detach before
                // touching it.
                gl::BindVertexArray(0);
                self.binding.vao = None;
            }

            for upload in &frame.uploads {
                if let Some(old) = self.statics.ranges.remove(&upload.geometry) {
                    self.statics.pending.push((self.sync.frame(), old));
                }

                let verts = frame.bufs.as_bytes(upload.vertices);
                let idxs = frame.bufs.as_bytes(upload.indices);

                let vertex_offset = self
                    .statics
                    .vertices
                    .alloc(verts.len(), Vertex::STRIDE)
                    .ok_or_else(|| {
                        Error::GeometryTooLarge(
                            "static",
                            verts.len(),
                            self.statics.vertices.capacity(),
                        )
                    })?;
                let index_offset = self
                    .statics
                    .indices
                    .alloc(idxs.len(), ::std::mem::size_of::<u32>())
                    .ok_or_else(|| {
                        Error::GeometryTooLarge(
                            "static",
                            idxs.len(),
                            self.statics.indices.capacity(),
                        )
                    })?;

                gl::BindBuffer(gl::ARRAY_BUFFER, self.statics.vbo);
                gl::BufferSubData(
                    gl::ARRAY_BUFFER,
                    vertex_offset as GLintptr,
                    verts.len() as GLsizeiptr,
                    verts.as_ptr() as *const ::std::os::raw::c_void,
                );
                gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, self.statics.ibo);
                gl::BufferSubData(
                    gl::ELEMENT_ARRAY_BUFFER,
                    index_offset as GLintptr,
                    idxs.len() as GLsizeiptr,
                    idxs.as_ptr() as *const ::std::os::raw::c_void,
                );
                check()?;

                self.statics.ranges.insert(
                    upload.geometry,
                    RetainedRange {
                        vertex_offset,
                        vertex_bytes: verts.len(),
                        index_offset,
                        index_bytes: idxs.len(),
                    },
                );
            }
        }

        Ok(())
    }

    fn upload_geometry_commands(&mut self, frame: &Frame) -> Result<()> {
        let slot = self.sync.current();

        unsafe {
            if !frame.cmds.is_empty() {
                gl::BindVertexArray(0);
                self.binding.vao = None;
            }

            for cmd in &frame.cmds {
                let mut upload = UploadSlot::default();

                if let DrawKind::Stream { vertices, indices } = cmd.kind {
                    upload.vertex_offset = self.vertices.write(
                        slot,
                        frame.bufs.as_bytes(vertices),
                        Vertex::STRIDE,
                    )?;
                    upload.index_offset = self.indices.write(
                        slot,
                        frame.bufs.as_bytes(indices),
                        ::std::mem::size_of::<u32>(),
                    )?;
                }

                let globals = Globals {
                    projection: cmd.projection.into(),
                    view: cmd.view.into(),
                };
                upload.globals_offset =
                    self.globals
                        .write(slot, globals.as_bytes(), self.ubo_align)?;

                debug_assert_eq!(self.uploads.len(), cmd.id as usize);
                self.uploads.push(upload);
            }

            self.vertices.flush(slot)?;
            self.indices.flush(slot)?;
            self.globals.flush(slot)?;
        }

        Ok(())
    }

    fn submit_commands(&mut self, frame: &Frame) -> Result<SubmitInfo> {
        let mut info = SubmitInfo::default();

        unsafe {
            for cmd in &frame.cmds {
                self.submit(cmd)?;
                info.drawcalls += 1;
                info.primitives += cmd.primitive.assemble(cmd.num_indices);
            }
        }

        Ok(info)
    }

    fn post_draw(&mut self) -> Result<()> {
        unsafe {
            let fence = gl::FenceSync(gl::SYNC_GPU_COMMANDS_COMPLETE, 0);
            if fence.is_null() {
                return Err(Error::Backend("failed to create a fence.".into()));
            }

            gl::Flush();
            self.sync.end_frame(GlFence(fence));
            check()?;
        }

        Ok(())
    }

    fn resize(&mut self, dimensions: Vector2<u32>) -> Result<()> {
        debug!("Backbuffer resized to {}x{}.", dimensions.x, dimensions.y);
        self.dimensions = dimensions;
        Ok(())
    }

    fn clear(&mut self) {
        self.binding.invalidate();
    }

    fn cleanup(&mut self) -> Result<()> {
        unsafe {
            for fence in self.sync.drain() {
                gl::DeleteSync(fence.0);
            }

            self.vertices.cleanup();
            self.indices.cleanup();
            self.globals.cleanup();
            gl::DeleteBuffers(1, &self.statics.vbo);
            gl::DeleteBuffers(1, &self.statics.ibo);
            gl::DeleteVertexArrays(1, &self.vao_stream);
            gl::DeleteVertexArrays(1, &self.vao_static);

            for (_, image) in self.images.drain() {
                if let Some(fbo) = image.fbo {
                    gl::DeleteFramebuffers(1, &fbo);
                }
                gl::DeleteTextures(1, &image.texture);
            }
            for (_, shader) in self.shaders.drain() {
                gl::DeleteProgram(shader.program);
            }
            for (_, sampler) in self.samplers.drain() {
                gl::DeleteSamplers(1, &sampler);
            }

            self.statics.ranges.clear();
            self.statics.pending.clear();
            self.binding.invalidate();
            check()
        }
    }

    fn image_created(&mut self, image: &ImageResource) -> Result<()> {
        if let Some(v) = self.images.get_mut(&image.id) {
            v.refs += 1;
            debug!("{} referenced again (rc {}).", image.id, v.refs);
            return Ok(());
        }

        if image.pixels.len() != image.expected_len() {
            return Err(Error::ImageMalformed(
                image.id,
                format!(
                    "{} pixel bytes for {}x{}.",
                    image.pixels.len(),
                    image.dimensions.x,
                    image.dimensions.y
                ),
            ));
        }

        unsafe {
            let mut texture = 0;
            gl::GenTextures(1, &mut texture);
            assert!(texture != 0);

            gl::ActiveTexture(gl::TEXTURE0);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            if let Some(slot) = self.binding.slots.get_mut(0) {
                *slot = None;
            }

            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                gl::RGBA8 as GLint,
                image.dimensions.x as GLsizei,
                image.dimensions.y as GLsizei,
                0,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                image.pixels.as_ptr() as *const ::std::os::raw::c_void,
            );
            check()?;

            self.images.insert(
                image.id,
                GlImage {
                    texture,
                    dimensions: image.dimensions,
                    refs: 1,
                    fbo: None,
                },
            );
        }

        debug!("{} created.", image.id);
        Ok(())
    }

    fn image_removed(&mut self, id: ImageId) -> Result<()> {
        let refs = {
            let image = self
                .images
                .get_mut(&id)
                .ok_or_else(|| Error::ImageInvalid(id))?;
            image.refs -= 1;
            image.refs
        };

        if refs > 0 {
            debug!("{} dereferenced (rc {}).", id, refs);
            return Ok(());
        }

        if let Some(image) = self.images.remove(&id) {
            unsafe {
                if let Some(fbo) = image.fbo {
                    gl::DeleteFramebuffers(1, &fbo);
                }
                gl::DeleteTextures(1, &image.texture);
            }
        }

        self.binding.purge_image(id);
        debug!("{} removed.", id);
        Ok(())
    }

    fn shader_created(&mut self, shader: &ShaderResource) -> Result<()> {
        if self.shaders.contains_key(&shader.id) {
            return Err(Error::ShaderDuplicated(shader.id));
        }

        let sources = Self::require_glsl(shader)?;

        unsafe {
            let vs = Self::compile(shader.id, gl::VERTEX_SHADER, "vertex", &sources.vertex)?;
            let fs = match Self::compile(
                shader.id,
                gl::FRAGMENT_SHADER,
                "fragment",
                &sources.fragment,
            ) {
                Ok(v) => v,
                Err(e) => {
                    gl::DeleteShader(vs);
                    return Err(e);
                }
            };

            let program = Self::link(shader.id, &[vs, fs]);
            gl::DeleteShader(vs);
            gl::DeleteShader(fs);
            let program = program?;

            match Self::reflect(program, shader) {
                Ok(uniforms) => {
                    self.shaders.insert(
                        shader.id,
                        GlShader {
                            program,
                            texture_slots: shader.layout.samplers.len(),
                            uniforms,
                        },
                    );
                    self.binding.program = None;
                    debug!("{} created.", shader.id);
                    Ok(())
                }
                Err(e) => {
                    gl::DeleteProgram(program);
                    Err(e)
                }
            }
        }
    }

    fn shader_removed(&mut self, id: ShaderId) -> Result<()> {
        let shader = self
            .shaders
            .remove(&id)
            .ok_or_else(|| Error::ShaderInvalid(id))?;

        unsafe {
            gl::DeleteProgram(shader.program);
        }

        if self.binding.program == Some(id) {
            self.binding.program = None;
        }
        debug!("{} removed.", id);
        Ok(())
    }

    fn as_any(&self) -> &dyn ::std::any::Any {
        self
    }
}

impl GlBackend {
    /// The upload profile this backend was created with.
    pub fn profile(&self) -> GlProfile {
        self.profile
    }

    /// The GLSL sources of a shader resource, or the fatal configuration
    /// error naming the resource when they are absent.
    pub fn require_glsl(shader: &ShaderResource) -> Result<&GlslSources> {
        shader
            .sources
            .glsl
            .as_ref()
            .ok_or_else(|| Error::NoShaderSource(shader.id))
    }

    /// Resolves the declared layout against the linked program: sampler
    /// slots are assigned, the globals block is bound, and the scalar
    /// uniform locations are cached.
    unsafe fn reflect(
        program: GLuint,
        shader: &ShaderResource,
    ) -> Result<FastHashMap<HashValue<str>, UniformEntry>> {
        gl::UseProgram(program);

        for (slot, name) in shader.layout.samplers.iter().enumerate() {
            let location = Self::uniform_location(program, name)?;
            if location == -1 {
                return Err(Error::UniformUndefined(shader.id, name.clone()));
            }
            gl::Uniform1i(location, slot as GLint);
        }

        let block = CString::new(shader.layout.globals_block.as_bytes())
            .map_err(|_| Error::UniformBlockUndefined(shader.id, shader.layout.globals_block.clone()))?;
        let index = gl::GetUniformBlockIndex(program, block.as_ptr());
        if index == gl::INVALID_INDEX {
            return Err(Error::UniformBlockUndefined(
                shader.id,
                shader.layout.globals_block.clone(),
            ));
        }
        gl::UniformBlockBinding(program, index, GLOBALS_BINDING);

        let mut uniforms = FastHashMap::default();
        for (name, ty) in &shader.layout.uniforms {
            let location = Self::uniform_location(program, name)?;
            if location == -1 {
                return Err(Error::UniformUndefined(shader.id, name.clone()));
            }
            uniforms.insert(
                HashValue::from(name),
                UniformEntry {
                    location,
                    ty: *ty,
                    name: name.clone(),
                },
            );
        }

        check()?;
        Ok(uniforms)
    }

    unsafe fn uniform_location(program: GLuint, name: &str) -> Result<GLint> {
        let c_name = CString::new(name.as_bytes())
            .map_err(|_| Error::Backend(format!("uniform name '{}' contains a nul byte.", name)))?;
        let location = gl::GetUniformLocation(program, c_name.as_ptr());
        check()?;
        Ok(location)
    }

    unsafe fn compile(
        id: ShaderId,
        stage: GLenum,
        stage_name: &'static str,
        src: &str,
    ) -> Result<GLuint> {
        let shader = gl::CreateShader(stage);
        let c_src = CString::new(src.as_bytes()).map_err(|_| {
            Error::ShaderCompileFailure(id, stage_name, "source contains a nul byte.".into())
        })?;
        gl::ShaderSource(shader, 1, &c_src.as_ptr(), ptr::null());
        gl::CompileShader(shader);

        let mut status = GLint::from(gl::FALSE);
        gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);
        if status != GLint::from(gl::TRUE) {
            let mut len = 0;
            gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
            let mut buf = vec![0u8; len.max(1) as usize];
            gl::GetShaderInfoLog(shader, len, ptr::null_mut(), buf.as_mut_ptr() as *mut GLchar);
            gl::DeleteShader(shader);

            let log = String::from_utf8_lossy(&buf)
                .trim_end_matches('\0')
                .to_string();
            return Err(Error::ShaderCompileFailure(id, stage_name, log));
        }

        Ok(shader)
    }

    unsafe fn link(id: ShaderId, shaders: &[GLuint]) -> Result<GLuint> {
        let program = gl::CreateProgram();
        for &shader in shaders {
            gl::AttachShader(program, shader);
        }
        gl::LinkProgram(program);
        for &shader in shaders {
            gl::DetachShader(program, shader);
        }

        let mut status = GLint::from(gl::FALSE);
        gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);
        if status != GLint::from(gl::TRUE) {
            let mut len = 0;
            gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len);
            let mut buf = vec![0u8; len.max(1) as usize];
            gl::GetProgramInfoLog(program, len, ptr::null_mut(), buf.as_mut_ptr() as *mut GLchar);
            gl::DeleteProgram(program);

            let log = String::from_utf8_lossy(&buf)
                .trim_end_matches('\0')
                .to_string();
            return Err(Error::ShaderLinkFailure(id, log));
        }

        Ok(program)
    }

    /// Diffs one command against the tracked state and issues its draw.
    /// The precedence is fixed: viewport, scissor, target, shader,
    /// textures and uniforms, then blend/depth/stencil.
    unsafe fn submit(&mut self, cmd: &DrawCommand) -> Result<()> {
        let target_size = self.target_dimensions(cmd.target)?;

        let viewport = resolve_viewport(cmd.viewport, target_size);
        Self::apply_viewport(&mut self.binding, viewport)?;

        let scissor = resolve_scissor(cmd.clip, target_size);
        Self::apply_scissor(&mut self.binding, scissor)?;

        if self.binding.target != Some(cmd.target) {
            let fbo = match cmd.target {
                RenderTarget::Backbuffer => 0,
                RenderTarget::Texture(id) => self.framebuffer(id)?,
            };
            gl::BindFramebuffer(gl::FRAMEBUFFER, fbo);
            check()?;
            self.binding.target = Some(cmd.target);
        }

        if !self.binding.cleared.contains(&cmd.target) {
            Self::apply_clear(&mut self.binding, cmd.clear, target_size)?;
            Self::apply_scissor(&mut self.binding, scissor)?;
            self.binding.cleared.insert(cmd.target);
        }

        let shader = self
            .shaders
            .get(&cmd.shader)
            .ok_or_else(|| Error::ShaderInvalid(cmd.shader))?;

        if self.binding.program != Some(cmd.shader) {
            gl::UseProgram(shader.program);
            check()?;
            self.binding.program = Some(cmd.shader);
        }

        let upload = self.uploads[cmd.id as usize];
        if self.binding.globals_offset != Some(upload.globals_offset) {
            gl::BindBufferRange(
                gl::UNIFORM_BUFFER,
                GLOBALS_BINDING,
                self.globals.buffer,
                upload.globals_offset as GLintptr,
                GLOBALS_SIZE as GLsizeiptr,
            );
            check()?;
            self.binding.globals_offset = Some(upload.globals_offset);
        }

        for &(field, value) in cmd.uniforms.iter() {
            let entry = shader.uniforms.get(&field).ok_or_else(|| {
                Error::UniformUndefined(cmd.shader, format!("{:?}", field))
            })?;
            if entry.ty != value.uniform_type() {
                return Err(Error::UniformTypeMismatch(
                    cmd.shader,
                    entry.name.clone(),
                    entry.ty,
                    value.uniform_type(),
                ));
            }
            Self::apply_uniform(entry.location, value)?;
        }

        if cmd.textures.len() < shader.texture_slots {
            return Err(Error::TextureSlotMismatch(
                cmd.shader,
                shader.texture_slots,
                cmd.textures.len(),
            ));
        }

        while self.binding.slots.len() < shader.texture_slots {
            self.binding.slots.push(None);
        }

        for slot in 0..shader.texture_slots {
            let binding = cmd.textures[slot];
            let params = binding.sampler.unwrap_or_default();

            if self.binding.slots[slot] != Some((binding, params)) {
                let texture = self
                    .images
                    .get(&binding.image)
                    .map(|v| v.texture)
                    .ok_or_else(|| Error::ImageInvalid(binding.image))?;
                let sampler = Self::sampler(&mut self.samplers, params)?;

                gl::ActiveTexture(gl::TEXTURE0 + slot as GLuint);
                gl::BindTexture(gl::TEXTURE_2D, texture);
                gl::BindSampler(slot as GLuint, sampler);
                check()?;
                self.binding.slots[slot] = Some((binding, params));
            }
        }

        Self::apply_blend(&mut self.binding, cmd.blend)?;
        Self::apply_depth(&mut self.binding, cmd.depth_state)?;
        Self::apply_stencil(&mut self.binding, cmd.stencil)?;

        let (vao, vertex_offset, index_offset, num_indices) = match cmd.kind {
            DrawKind::Stream { .. } => (
                self.vao_stream,
                upload.vertex_offset,
                upload.index_offset,
                cmd.num_indices,
            ),
            DrawKind::Retained { geometry } => {
                let range = self
                    .statics
                    .ranges
                    .get(&geometry)
                    .ok_or_else(|| Error::GeometryInvalid(geometry))?;
                (
                    self.vao_static,
                    range.vertex_offset,
                    range.index_offset,
                    cmd.num_indices,
                )
            }
        };

        if self.binding.vao != Some(vao) {
            gl::BindVertexArray(vao);
            self.binding.vao = Some(vao);
        }

        gl::DrawElementsBaseVertex(
            cmd.primitive.into(),
            num_indices as GLsizei,
            gl::UNSIGNED_INT,
            offset_ptr(index_offset),
            (vertex_offset / Vertex::STRIDE) as GLint,
        );
        check()
    }

    unsafe fn apply_viewport(state: &mut GpuBindingState, rect: SurfaceRect) -> Result<()> {
        if state.viewport != Some(rect) {
            gl::Viewport(
                rect.position.x,
                rect.position.y,
                rect.size.x as GLsizei,
                rect.size.y as GLsizei,
            );
            check()?;
            state.viewport = Some(rect);
        }

        Ok(())
    }

    unsafe fn apply_scissor(state: &mut GpuBindingState, rect: SurfaceRect) -> Result<()> {
        if state.scissor != Some(rect) {
            gl::Scissor(
                rect.position.x,
                rect.position.y,
                rect.size.x as GLsizei,
                rect.size.y as GLsizei,
            );
            check()?;
            state.scissor = Some(rect);
        }

        Ok(())
    }

    unsafe fn apply_clear(
        state: &mut GpuBindingState,
        clear: ClearOps,
        target_size: Vector2<u32>,
    ) -> Result<()> {
        let mut bits = 0;

        if let Some(color) = clear.color {
            bits |= gl::COLOR_BUFFER_BIT;
            gl::ClearColor(color.r, color.g, color.b, color.a);
        }
        if let Some(depth) = clear.depth {
            bits |= gl::DEPTH_BUFFER_BIT;
            gl::ClearDepth(f64::from(depth));
            // The depth clear honors the depth mask.
            Self::apply_depth(
                state,
                DepthState {
                    comparison: crate::video::state::Comparison::Always,
                    write: true,
                },
            )?;
        }
        if let Some(stencil) = clear.stencil {
            bits |= gl::STENCIL_BUFFER_BIT;
            gl::ClearStencil(stencil);
        }

        if bits != 0 {
            // The clear covers the whole target, whatever the command
            // clips to.
            Self::apply_scissor(state, SurfaceRect::of_size(target_size))?;
            gl::Clear(bits);
            check()?;
        }

        Ok(())
    }

    unsafe fn apply_blend(state: &mut GpuBindingState, blend: Option<Blend>) -> Result<()> {
        if state.blend != Some(blend) {
            match blend {
                Some(v) => {
                    if !matches!(state.blend, Some(Some(_))) {
                        gl::Enable(gl::BLEND);
                    }
                    gl::BlendFunc(v.src.into(), v.dst.into());
                    gl::BlendEquation(v.equation.into());
                }
                None => {
                    gl::Disable(gl::BLEND);
                }
            }

            check()?;
            state.blend = Some(blend);
        }

        Ok(())
    }

    unsafe fn apply_depth(state: &mut GpuBindingState, depth: DepthState) -> Result<()> {
        use crate::video::state::Comparison;

        if state.depth != Some(depth) {
            // Even with a non-zero depth mask, the buffer is not updated
            // while the depth test is disabled.
            let enable = depth.comparison != Comparison::Always || depth.write;
            if enable {
                gl::Enable(gl::DEPTH_TEST);
            } else {
                gl::Disable(gl::DEPTH_TEST);
            }

            gl::DepthMask(if depth.write { gl::TRUE } else { gl::FALSE });
            gl::DepthFunc(depth.comparison.into());
            check()?;
            state.depth = Some(depth);
        }

        Ok(())
    }

    unsafe fn apply_stencil(
        state: &mut GpuBindingState,
        stencil: Option<StencilTest>,
    ) -> Result<()> {
        if state.stencil != Some(stencil) {
            match stencil {
                Some(v) => {
                    gl::Enable(gl::STENCIL_TEST);
                    gl::StencilFunc(v.comparison.into(), v.reference, v.mask);
                    gl::StencilOp(
                        v.on_fail.into(),
                        v.on_depth_fail.into(),
                        v.on_pass.into(),
                    );
                }
                None => {
                    gl::Disable(gl::STENCIL_TEST);
                }
            }

            check()?;
            state.stencil = Some(stencil);
        }

        Ok(())
    }

    unsafe fn apply_uniform(location: GLint, value: UniformValue) -> Result<()> {
        match value {
            UniformValue::I32(v) => gl::Uniform1i(location, v),
            UniformValue::F32(v) => gl::Uniform1f(location, v),
            UniformValue::Vector2f(v) => gl::Uniform2f(location, v[0], v[1]),
            UniformValue::Vector3f(v) => gl::Uniform3f(location, v[0], v[1], v[2]),
            UniformValue::Vector4f(v) => gl::Uniform4f(location, v[0], v[1], v[2], v[3]),
            UniformValue::Matrix4f(v) => {
                gl::UniformMatrix4fv(location, 1, gl::FALSE, v[0].as_ptr())
            }
        }

        check()
    }
}

#[inline]
fn offset_ptr(offset: usize) -> *const ::std::os::raw::c_void {
    offset as *const ::std::os::raw::c_void
}

fn describe_fbo_status(status: GLenum) -> String {
    match status {
        gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => {
            "not all framebuffer attachment points are attachment complete.".into()
        }
        gl::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => {
            "no images are attached to the framebuffer.".into()
        }
        gl::FRAMEBUFFER_UNSUPPORTED => {
            "the combination of internal formats violates implementation restrictions.".into()
        }
        other => format!("status 0x{:x}.", other),
    }
}

unsafe fn check() -> Result<()> {
    match gl::GetError() {
        gl::NO_ERROR => Ok(()),
        gl::INVALID_ENUM => Err(Error::Backend(
            "an unacceptable value is specified for an enumerated argument.".into(),
        )),
        gl::INVALID_VALUE => Err(Error::Backend("a numeric argument is out of range.".into())),
        gl::INVALID_OPERATION => Err(Error::Backend(
            "the specified operation is not allowed in the current state.".into(),
        )),
        gl::INVALID_FRAMEBUFFER_OPERATION => Err(Error::Backend(
            "the command tried to render to or read from an incomplete framebuffer.".into(),
        )),
        gl::OUT_OF_MEMORY => Err(Error::Backend(
            "there is not enough memory left to execute the command.".into(),
        )),
        _ => Err(Error::Backend("unknown OpenGL error.".into())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::video::resources::{ShaderLayout, ShaderSources};

    #[test]
    fn missing_glsl_source_is_fatal() {
        let shader = ShaderResource {
            id: ShaderId(9),
            sources: ShaderSources::default(),
            layout: ShaderLayout::default(),
        };

        match GlBackend::require_glsl(&shader) {
            Err(Error::NoShaderSource(id)) => assert_eq!(id, ShaderId(9)),
            other => panic!("expected NoShaderSource, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn globals_block_layout() {
        assert_eq!(::std::mem::size_of::<Globals>(), GLOBALS_SIZE);
    }
}
