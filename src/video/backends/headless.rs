//! A backend without a GPU. It performs the same bookkeeping as the real
//! ones — frame rotation, ring accounting, resource reference counts, state
//! validation — but every driver call is a no-op. Tests and server-side
//! builds run against it.

use crate::math::prelude::Vector2;
use crate::utils::prelude::FastHashMap;
use crate::video::command::{DrawKind, Frame};
use crate::video::errors::{Error, Result};
use crate::video::geometry::GeometryHandle;
use crate::video::resources::{ImageId, ImageResource, ShaderId, ShaderResource};
use crate::video::vertex::Vertex;

use super::ring::{FrameSync, RangeAlloc, RingBuffer};
use super::{RendererBackend, SubmitInfo, VideoConfig};

struct HeadlessImage {
    dimensions: Vector2<u32>,
    refs: u32,
}

struct HeadlessShader {
    texture_slots: usize,
}

#[derive(Debug, Clone, Copy)]
struct RetainedRange {
    vertex_offset: usize,
    vertex_bytes: usize,
    index_offset: usize,
    index_bytes: usize,
}

pub struct HeadlessBackend {
    sync: FrameSync<()>,
    vertices: RingBuffer,
    indices: RingBuffer,
    globals: RingBuffer,
    static_vertices: RangeAlloc,
    static_indices: RangeAlloc,
    retained: FastHashMap<GeometryHandle, RetainedRange>,
    images: FastHashMap<ImageId, HeadlessImage>,
    shaders: FastHashMap<ShaderId, HeadlessShader>,
    dimensions: Vector2<u32>,
}

impl HeadlessBackend {
    pub fn new(config: &VideoConfig) -> Self {
        HeadlessBackend {
            sync: FrameSync::new(config.buffering),
            vertices: RingBuffer::new(config.buffering, config.vertex_capacity),
            indices: RingBuffer::new(config.buffering, config.index_capacity),
            globals: RingBuffer::new(config.buffering, config.globals_capacity),
            static_vertices: RangeAlloc::new(config.static_capacity),
            static_indices: RangeAlloc::new(config.static_capacity),
            retained: FastHashMap::default(),
            images: FastHashMap::default(),
            shaders: FastHashMap::default(),
            dimensions: Vector2::new(0, 0),
        }
    }

    /// Whether a texture object for `id` is currently allocated.
    pub fn is_image_alive(&self, id: ImageId) -> bool {
        self.images.contains_key(&id)
    }

    /// The reference count of `id`, or 0 when unknown.
    pub fn image_refs(&self, id: ImageId) -> u32 {
        self.images.get(&id).map(|v| v.refs).unwrap_or(0)
    }

    /// Whether a program object for `id` is currently allocated.
    pub fn is_shader_alive(&self, id: ShaderId) -> bool {
        self.shaders.contains_key(&id)
    }

    /// The number of frames begun so far.
    pub fn frames(&self) -> u64 {
        self.sync.frame()
    }

    /// Whether a retained range for `handle` is resident.
    pub fn is_retained(&self, handle: GeometryHandle) -> bool {
        self.retained.contains_key(&handle)
    }

    /// The dimensions of an allocated image, if any.
    pub fn image_dimensions(&self, id: ImageId) -> Option<Vector2<u32>> {
        self.images.get(&id).map(|v| v.dimensions)
    }

    /// The current backbuffer dimensions.
    pub fn dimensions(&self) -> Vector2<u32> {
        self.dimensions
    }
}

impl RendererBackend for HeadlessBackend {
    fn pre_draw(&mut self) -> Result<()> {
        let slot = self.sync.begin_frame(|()| -> Result<()> { Ok(()) })?;
        self.vertices.reset(slot);
        self.indices.reset(slot);
        self.globals.reset(slot);
        Ok(())
    }

    fn upload_buffer_commands(&mut self, frame: &Frame) -> Result<()> {
        for upload in &frame.uploads {
            if let Some(old) = self.retained.remove(&upload.geometry) {
                self.static_vertices.free(old.vertex_offset, old.vertex_bytes);
                self.static_indices.free(old.index_offset, old.index_bytes);
            }

            let vertex_bytes = upload.vertices.size();
            let index_bytes = upload.indices.size();

            let vertex_offset = self
                .static_vertices
                .alloc(vertex_bytes, Vertex::STRIDE)
                .ok_or_else(|| {
                    Error::GeometryTooLarge("static", vertex_bytes, self.static_vertices.capacity())
                })?;
            let index_offset = self
                .static_indices
                .alloc(index_bytes, ::std::mem::size_of::<u32>())
                .ok_or_else(|| {
                    Error::GeometryTooLarge("static", index_bytes, self.static_indices.capacity())
                })?;

            self.retained.insert(
                upload.geometry,
                RetainedRange {
                    vertex_offset,
                    vertex_bytes,
                    index_offset,
                    index_bytes,
                },
            );
        }

        Ok(())
    }

    fn upload_geometry_commands(&mut self, frame: &Frame) -> Result<()> {
        let slot = self.sync.current();

        for cmd in &frame.cmds {
            if let DrawKind::Stream { vertices, indices } = cmd.kind {
                self.vertices
                    .alloc_checked(slot, vertices.size(), Vertex::STRIDE, "vertices")?;
                self.indices.alloc_checked(
                    slot,
                    indices.size(),
                    ::std::mem::size_of::<u32>(),
                    "indices",
                )?;
            }

            // view + projection, std140.
            self.globals.alloc_checked(slot, 128, 256, "globals")?;
        }

        Ok(())
    }

    fn submit_commands(&mut self, frame: &Frame) -> Result<SubmitInfo> {
        let mut info = SubmitInfo::default();

        for cmd in &frame.cmds {
            let shader = self
                .shaders
                .get(&cmd.shader)
                .ok_or_else(|| Error::ShaderInvalid(cmd.shader))?;

            if cmd.textures.len() < shader.texture_slots {
                return Err(Error::TextureSlotMismatch(
                    cmd.shader,
                    shader.texture_slots,
                    cmd.textures.len(),
                ));
            }

            for binding in cmd.textures.iter().take(shader.texture_slots) {
                if !self.images.contains_key(&binding.image) {
                    return Err(Error::ImageInvalid(binding.image));
                }
            }

            if let DrawKind::Retained { geometry } = cmd.kind {
                if !self.retained.contains_key(&geometry) {
                    return Err(Error::GeometryInvalid(geometry));
                }
            }

            info.drawcalls += 1;
            info.primitives += cmd.primitive.assemble(cmd.num_indices);
        }

        Ok(info)
    }

    fn post_draw(&mut self) -> Result<()> {
        self.sync.end_frame(());
        Ok(())
    }

    fn resize(&mut self, dimensions: Vector2<u32>) -> Result<()> {
        self.dimensions = dimensions;
        Ok(())
    }

    fn clear(&mut self) {}

    fn cleanup(&mut self) -> Result<()> {
        self.retained.clear();
        self.images.clear();
        self.shaders.clear();
        Ok(())
    }

    fn image_created(&mut self, image: &ImageResource) -> Result<()> {
        if let Some(v) = self.images.get_mut(&image.id) {
            v.refs += 1;
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

        self.images.insert(
            image.id,
            HeadlessImage {
                dimensions: image.dimensions,
                refs: 1,
            },
        );
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

        if refs == 0 {
            self.images.remove(&id);
        }
        Ok(())
    }

    fn shader_created(&mut self, shader: &ShaderResource) -> Result<()> {
        if self.shaders.contains_key(&shader.id) {
            return Err(Error::ShaderDuplicated(shader.id));
        }

        self.shaders.insert(
            shader.id,
            HeadlessShader {
                texture_slots: shader.layout.samplers.len(),
            },
        );
        Ok(())
    }

    fn shader_removed(&mut self, id: ShaderId) -> Result<()> {
        self.shaders
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::ShaderInvalid(id))
    }

    fn as_any(&self) -> &dyn ::std::any::Any {
        self
    }
}
