//! The centralized management of the rendering core.
//!
//! The `Renderer` owns the geometry and batcher pools and drives the
//! per-frame lifecycle against the backend:
//!
//! 1. `pre_draw` — wait until the frame's ring range is writable;
//! 2. collect batchers, order them by (target, depth, shader), and ask
//!    each one to batch into the shared command queue;
//! 3. upload static and stream bytes, submit the commands;
//! 4. `post_draw` — install the frame's fence and advance the ring.

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use crate::math::prelude::Vector2;
use crate::utils::prelude::{FastHashSet, ObjectPool};
use crate::video::backends::{self, BufferLimits, RendererBackend, VideoConfig};
use crate::video::batch::{Batcher, BatcherHandle, BatcherParams};
use crate::video::command::Frame;
use crate::video::errors::{Error, Result};
use crate::video::geometry::{Geometry, GeometryHandle, GeometryParams};
use crate::video::resources::{
    DisplayEvent, DisplayRequest, Resource, ResourceEvent,
};

/// The statistics of one frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameInfo {
    pub duration: Duration,
    pub drawcalls: u32,
    pub primitives: u32,
    pub alive_batchers: u32,
    pub alive_geometries: u32,
}

/// The rendering engine layer between application code and the graphics
/// API.
pub struct Renderer {
    backend: Box<dyn RendererBackend>,
    limits: BufferLimits,
    geometries: ObjectPool<GeometryHandle, Geometry>,
    batchers: ObjectPool<BatcherHandle, Batcher>,
    resident: FastHashSet<GeometryHandle>,
    frame: Frame,
    display_requests: Vec<DisplayRequest>,
}

impl Renderer {
    /// Creates a renderer over the OpenGL backend. The GL context must be
    /// current on this thread; `loader` resolves its symbols.
    pub fn new<F>(config: VideoConfig, loader: F) -> Result<Self>
    where
        F: FnMut(&str) -> *const ::std::os::raw::c_void,
    {
        let backend = backends::new(&config, loader)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Creates a headless renderer, which performs all bookkeeping but no
    /// GPU work.
    pub fn headless(config: VideoConfig) -> Self {
        let backend = backends::new_headless(&config);
        Self::with_backend(config, backend)
    }

    fn with_backend(config: VideoConfig, backend: Box<dyn RendererBackend>) -> Self {
        Renderer {
            backend,
            limits: config.limits(),
            geometries: ObjectPool::new(),
            batchers: ObjectPool::new(),
            resident: FastHashSet::default(),
            frame: Frame::with_capacity(64 * 1024),
            display_requests: Vec::new(),
        }
    }

    /// The backend, for introspection.
    pub fn backend(&self) -> &dyn RendererBackend {
        &*self.backend
    }
}

impl Renderer {
    /// Creates and registers a batcher.
    pub fn create_batcher(&mut self, params: BatcherParams) -> BatcherHandle {
        self.add_batcher(Batcher::new(params))
    }

    /// Registers an externally constructed batcher.
    pub fn add_batcher(&mut self, batcher: Batcher) -> BatcherHandle {
        self.batchers.create(batcher)
    }

    pub fn batcher(&self, handle: BatcherHandle) -> Option<&Batcher> {
        self.batchers.get(handle)
    }

    /// Mutable access to a batcher. Its setters mark it dirty themselves.
    pub fn batcher_mut(&mut self, handle: BatcherHandle) -> Option<&mut Batcher> {
        self.batchers.get_mut(handle)
    }

    /// Removes a batcher, releasing its geometry list. The geometries
    /// themselves are left untouched and keep any other owners.
    pub fn delete_batcher(&mut self, handle: BatcherHandle) {
        if let Some(mut batcher) = self.batchers.free(handle) {
            for geometry in batcher.release_geometry() {
                if let Some(g) = self.geometries.get_mut(geometry) {
                    g.owners.retain(|&mut v| v != handle);
                }
            }
        }
    }

    /// Creates a geometry from `params`.
    pub fn create_geometry(&mut self, params: GeometryParams) -> Result<GeometryHandle> {
        params.validate()?;
        Ok(self.geometries.create(Geometry::new(params)))
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&Geometry> {
        self.geometries.get(handle)
    }

    /// Mutable access to a geometry. When the returned guard drops, every
    /// owning batcher is marked dirty and a static geometry loses its
    /// GPU residency, so the next frame re-bakes and re-uploads it.
    pub fn geometry_mut(&mut self, handle: GeometryHandle) -> Option<GeometryMut> {
        let Renderer {
            ref mut geometries,
            ref mut batchers,
            ref mut resident,
            ..
        } = *self;

        geometries.get_mut(handle).map(move |geometry| GeometryMut {
            handle,
            geometry,
            batchers,
            resident,
        })
    }

    /// Destroys a geometry, detaching it from every owning batcher.
    /// Idempotent: destroying an already-destroyed handle is a no-op.
    pub fn delete_geometry(&mut self, handle: GeometryHandle) {
        if let Some(geometry) = self.geometries.free(handle) {
            for &owner in geometry.owners.iter() {
                if let Some(batcher) = self.batchers.get_mut(owner) {
                    batcher.detach(handle);
                }
            }
            self.resident.remove(&handle);
        }
    }

    /// Appends a geometry to a batcher. Adding the same geometry to the
    /// same batcher twice is a no-op.
    pub fn add_geometry(&mut self, batcher: BatcherHandle, geometry: GeometryHandle) -> Result<()> {
        let b = self
            .batchers
            .get_mut(batcher)
            .ok_or_else(|| Error::BatcherInvalid(batcher))?;
        let g = self
            .geometries
            .get_mut(geometry)
            .ok_or_else(|| Error::GeometryInvalid(geometry))?;

        if g.owners.contains(&batcher) {
            return Ok(());
        }

        g.owners.push(batcher);
        b.attach(geometry);
        Ok(())
    }

    /// Removes a geometry from a batcher without destroying it.
    pub fn remove_geometry(
        &mut self,
        batcher: BatcherHandle,
        geometry: GeometryHandle,
    ) -> Result<()> {
        let b = self
            .batchers
            .get_mut(batcher)
            .ok_or_else(|| Error::BatcherInvalid(batcher))?;
        let g = self
            .geometries
            .get_mut(geometry)
            .ok_or_else(|| Error::GeometryInvalid(geometry))?;

        g.owners.retain(|&mut v| v != batcher);
        b.detach(geometry);
        Ok(())
    }
}

impl Renderer {
    /// Renders one frame: batches every batcher in order, uploads the
    /// frame's bytes into the active ring range, diffs state and issues
    /// the draw calls, then presents and advances the ring.
    pub fn draw(&mut self) -> Result<FrameInfo> {
        let ts = Instant::now();

        self.backend.pre_draw()?;
        self.frame.clear();

        // Batcher order: target first (backbuffer before texture targets,
        // texture targets by id), then depth, then the default shader.
        // This minimizes backend state changes across batcher boundaries.
        let mut order: Vec<_> = self
            .batchers
            .iter()
            .filter_map(|h| {
                self.batchers
                    .get(h)
                    .map(|b| (b.target(), b.depth(), b.shader(), h))
            })
            .collect();
        order.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        {
            let Renderer {
                ref mut batchers,
                ref geometries,
                ref mut resident,
                ref mut frame,
                ref limits,
                ..
            } = *self;

            for (_, _, _, handle) in order {
                if let Some(batcher) = batchers.get_mut(handle) {
                    batcher.batch(geometries, limits, resident, frame)?;
                }
            }
        }

        self.backend.upload_buffer_commands(&self.frame)?;
        self.backend.upload_geometry_commands(&self.frame)?;
        let submitted = self.backend.submit_commands(&self.frame)?;
        self.backend.post_draw()?;

        Ok(FrameInfo {
            duration: Instant::now() - ts,
            drawcalls: submitted.drawcalls,
            primitives: submitted.primitives,
            alive_batchers: self.batchers.len() as u32,
            alive_geometries: self.geometries.len() as u32,
        })
    }

    /// Forwards a display size change to the backend.
    pub fn resize(&mut self, dimensions: Vector2<u32>) -> Result<()> {
        self.backend.resize(dimensions)
    }

    /// Drops every batcher and geometry and invalidates the backend's
    /// cached bindings.
    pub fn clear(&mut self) {
        let handles: Vec<_> = self.batchers.iter().collect();
        for h in handles {
            self.batchers.free(h);
        }
        let handles: Vec<_> = self.geometries.iter().collect();
        for h in handles {
            self.geometries.free(h);
        }
        self.resident.clear();
        self.backend.clear();
    }

    /// Dispatches a resource lifecycle event to the backend. By the time a
    /// removal returns, every GPU object of the resource is released.
    pub fn handle_resource_event(&mut self, event: &ResourceEvent) -> Result<()> {
        match *event {
            ResourceEvent::Created(Resource::Image(ref image)) => {
                self.backend.image_created(image)
            }
            ResourceEvent::Created(Resource::Shader(ref shader)) => {
                self.backend.shader_created(shader)
            }
            ResourceEvent::Removed(Resource::Image(ref image)) => {
                self.backend.image_removed(image.id)
            }
            ResourceEvent::Removed(Resource::Shader(ref shader)) => {
                self.backend.shader_removed(shader.id)
            }
        }
    }

    /// Dispatches a display event. Size changes go to the backend; mode
    /// change requests are queued for the windowing layer to drain.
    pub fn handle_display_event(&mut self, event: DisplayEvent) -> Result<()> {
        match event {
            DisplayEvent::SizeChanged(dimensions) => self.backend.resize(dimensions),
            DisplayEvent::ChangeRequested {
                dimensions,
                fullscreen,
                vsync,
            } => {
                self.display_requests.push(DisplayRequest {
                    dimensions,
                    fullscreen,
                    vsync,
                });
                Ok(())
            }
        }
    }

    /// Takes the queued display mode change requests.
    pub fn drain_display_requests(&mut self) -> Vec<DisplayRequest> {
        ::std::mem::replace(&mut self.display_requests, Vec::new())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.backend.cleanup() {
            warn!("Backend cleanup failed: {}", e);
        }
    }
}

/// A mutable borrow of a geometry. Dropping it marks every owning batcher
/// dirty and evicts the geometry's retained GPU range, which is what makes
/// setter calls conservative: any mutation invalidates the cached command
/// order.
pub struct GeometryMut<'a> {
    handle: GeometryHandle,
    geometry: &'a mut Geometry,
    batchers: &'a mut ObjectPool<BatcherHandle, Batcher>,
    resident: &'a mut FastHashSet<GeometryHandle>,
}

impl<'a> Deref for GeometryMut<'a> {
    type Target = Geometry;

    fn deref(&self) -> &Geometry {
        self.geometry
    }
}

impl<'a> DerefMut for GeometryMut<'a> {
    fn deref_mut(&mut self) -> &mut Geometry {
        self.geometry
    }
}

impl<'a> Drop for GeometryMut<'a> {
    fn drop(&mut self) {
        for &owner in self.geometry.owners.iter() {
            if let Some(batcher) = self.batchers.get_mut(owner) {
                batcher.mark_dirty();
            }
        }
        self.resident.remove(&self.handle);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::video::geometry::UploadHint;
    use crate::video::vertex::Vertex;

    fn renderer() -> Renderer {
        Renderer::headless(VideoConfig::default())
    }

    fn triangle(hint: UploadHint) -> GeometryParams {
        GeometryParams {
            vertices: vec![Vertex::default(); 3],
            hint,
            ..Default::default()
        }
    }

    #[test]
    fn geometry_mutation_marks_owners_dirty() {
        use crate::video::resources::{
            Resource, ResourceEvent, ShaderId, ShaderLayout, ShaderResource, ShaderSources,
        };

        let mut r = renderer();
        r.handle_resource_event(&ResourceEvent::Created(Resource::Shader(ShaderResource {
            id: ShaderId(0),
            sources: ShaderSources::default(),
            layout: ShaderLayout::default(),
        })))
        .unwrap();

        let batcher = r.create_batcher(BatcherParams::default());
        let geometry = r
            .create_geometry(triangle(UploadHint::Stream))
            .unwrap();
        r.add_geometry(batcher, geometry).unwrap();
        assert!(r.batcher(batcher).unwrap().is_dirty());

        // Drawing a frame cleans the batcher.
        r.draw().unwrap();
        assert!(!r.batcher(batcher).unwrap().is_dirty());

        // Any mutation through the guard dirties it again.
        r.geometry_mut(geometry).unwrap().set_depth(1.0);
        assert!(r.batcher(batcher).unwrap().is_dirty());
    }

    #[test]
    fn delete_geometry_detaches_and_is_idempotent() {
        let mut r = renderer();
        let batcher = r.create_batcher(BatcherParams::default());
        let geometry = r
            .create_geometry(triangle(UploadHint::Stream))
            .unwrap();
        r.add_geometry(batcher, geometry).unwrap();

        assert_eq!(r.batcher(batcher).unwrap().geometry().len(), 1);
        r.delete_geometry(geometry);
        assert_eq!(r.batcher(batcher).unwrap().geometry().len(), 0);

        // Second delete is a no-op.
        r.delete_geometry(geometry);
        assert!(r.geometry(geometry).is_none());
    }

    #[test]
    fn delete_batcher_releases_but_keeps_geometry() {
        let mut r = renderer();
        let b1 = r.create_batcher(BatcherParams::default());
        let b2 = r.create_batcher(BatcherParams::default());
        let geometry = r
            .create_geometry(triangle(UploadHint::Stream))
            .unwrap();
        r.add_geometry(b1, geometry).unwrap();
        r.add_geometry(b2, geometry).unwrap();

        r.delete_batcher(b1);
        let g = r.geometry(geometry).unwrap();
        assert_eq!(g.owners.as_slice(), &[b2]);
    }

    #[test]
    fn display_change_requests_are_queued() {
        let mut r = renderer();
        r.handle_display_event(DisplayEvent::ChangeRequested {
            dimensions: Vector2::new(1280, 720),
            fullscreen: true,
            vsync: false,
        })
        .unwrap();

        let requests = r.drain_display_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].fullscreen);
        assert!(r.drain_display_requests().is_empty());
    }
}
