//! `Batcher` as the named bucket of geometry. Geometry inside a batcher is
//! sorted and merged into the minimal sequence of draw commands before
//! submission to the backend.

use smallvec::SmallVec;

use crate::math::transform::Transform;
use crate::utils::prelude::{DataBuffer, FastHashSet, HashValue, ObjectPool};
use crate::video::backends::BufferLimits;
use crate::video::camera::Camera;
use crate::video::command::{BufferCommand, DrawCommand, DrawKind, Frame};
use crate::video::errors::{Error, Result};
use crate::video::geometry::{Geometry, GeometryHandle, TextureBinding, UploadHint};
use crate::video::resources::ShaderId;
use crate::video::state::{
    Blend, ClearOps, DepthState, Primitive, RenderTarget, StencilTest, SurfaceRect, UniformValue,
};
use crate::video::vertex::Vertex;
use crate::video::{MAX_PARENT_DEPTH, MAX_TEXTURE_SLOTS, MAX_UNIFORM_OVERRIDES};

impl_handle!(BatcherHandle);

/// The creation parameters of a batcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatcherParams {
    /// The camera every geometry of this batcher renders with.
    pub camera: Camera,
    /// The default shader, used by geometry without an override.
    pub shader: ShaderId,
    /// Where this batcher renders to.
    pub target: RenderTarget,
    /// Sort key against sibling batchers rendering to the same target.
    pub depth: f32,
    /// Clear operations applied on first bind of the target each frame.
    pub clear: ClearOps,
}

impl Default for BatcherParams {
    fn default() -> Self {
        BatcherParams {
            camera: Camera::default(),
            shader: ShaderId::default(),
            target: RenderTarget::Backbuffer,
            depth: 0.0,
            clear: ClearOps::default(),
        }
    }
}

/// Groups geometry sharing a camera and default shader, and converts it
/// into an ordered, minimal sequence of [`DrawCommand`]s.
///
/// The command sequence is cached; while no geometry was added, removed or
/// mutated, re-batching re-emits the cached sequence untouched, which keeps
/// the output deterministic and the clean path cheap.
///
/// [`DrawCommand`]: ../command/struct.DrawCommand.html
pub struct Batcher {
    camera: Camera,
    shader: ShaderId,
    target: RenderTarget,
    depth: f32,
    clear: ClearOps,

    geometry: Vec<GeometryHandle>,
    dirty: bool,
    cmds: Vec<DrawCommand>,
    bufs: DataBuffer,
}

impl Batcher {
    /// Creates a batcher. It renders nothing until registered with
    /// `Renderer::add_batcher` and populated with geometry.
    pub fn new(params: BatcherParams) -> Self {
        Batcher {
            camera: params.camera,
            shader: params.shader,
            target: params.target,
            depth: params.depth,
            clear: params.clear,
            geometry: Vec::new(),
            dirty: true,
            cmds: Vec::with_capacity(32),
            bufs: DataBuffer::with_capacity(512),
        }
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.dirty = true;
    }

    #[inline]
    pub fn shader(&self) -> ShaderId {
        self.shader
    }

    #[inline]
    pub fn target(&self) -> RenderTarget {
        self.target
    }

    #[inline]
    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: f32) {
        self.depth = depth;
        self.dirty = true;
    }

    #[inline]
    pub fn clear_ops(&self) -> ClearOps {
        self.clear
    }

    pub fn set_clear_ops(&mut self, clear: ClearOps) {
        self.clear = clear;
        self.dirty = true;
    }

    /// The geometry handles of this batcher, in insertion order.
    #[inline]
    pub fn geometry(&self) -> &[GeometryHandle] {
        &self.geometry
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn attach(&mut self, handle: GeometryHandle) {
        self.geometry.push(handle);
        self.dirty = true;
    }

    pub(crate) fn detach(&mut self, handle: GeometryHandle) {
        if let Some(i) = self.geometry.iter().position(|&v| v == handle) {
            self.geometry.remove(i);
            self.dirty = true;
        }
    }

    pub(crate) fn release_geometry(&mut self) -> Vec<GeometryHandle> {
        self.dirty = true;
        self.cmds.clear();
        self.bufs.clear();
        ::std::mem::replace(&mut self.geometry, Vec::new())
    }

    /// Emits this batcher's commands into `frame`, re-batching first if
    /// anything changed since the last frame. Static geometry that is not
    /// resident on the GPU yet additionally gets a one-shot upload command.
    pub(crate) fn batch(
        &mut self,
        geometries: &ObjectPool<GeometryHandle, Geometry>,
        limits: &BufferLimits,
        resident: &mut FastHashSet<GeometryHandle>,
        frame: &mut Frame,
    ) -> Result<()> {
        if self.dirty {
            self.rebuild(geometries, limits)?;
            self.dirty = false;
        }

        for cmd in &self.cmds {
            if let DrawKind::Retained { geometry } = cmd.kind {
                if !resident.contains(&geometry) {
                    let g = geometries
                        .get(geometry)
                        .ok_or_else(|| Error::GeometryInvalid(geometry))?;

                    let world = world_transform(geometries, geometry)?;
                    let mut verts = Vec::with_capacity(g.vertices().len());
                    transform_vertices(&world, g.vertices(), &mut verts);
                    let mut idxs = Vec::new();
                    append_indices(g, 0, &mut idxs)?;

                    let vertices = frame.bufs.extend_from_slice(&verts);
                    let indices = frame.bufs.extend_from_slice(&idxs);
                    frame.uploads.push(BufferCommand {
                        geometry,
                        vertices,
                        indices,
                    });
                    resident.insert(geometry);
                }
            }
        }

        for cmd in &self.cmds {
            let mut out = cmd.clone();
            if let DrawKind::Stream { vertices, indices } = cmd.kind {
                let vertices = frame.bufs.extend_from_slice(self.bufs.as_slice(vertices));
                let indices = frame.bufs.extend_from_slice(self.bufs.as_slice(indices));
                out.kind = DrawKind::Stream { vertices, indices };
            }
            frame.push(out);
        }

        Ok(())
    }

    fn rebuild(
        &mut self,
        geometries: &ObjectPool<GeometryHandle, Geometry>,
        limits: &BufferLimits,
    ) -> Result<()> {
        self.cmds.clear();
        self.bufs.clear();

        // Primary key is the painter's depth; shader identity breaks ties.
        // The target component of the composite key collapses inside a
        // single batcher, since all of its geometry shares one target. The
        // sort is stable, so full ties keep insertion order.
        let default_shader = self.shader;
        let mut order: Vec<(f32, ShaderId, GeometryHandle)> = self
            .geometry
            .iter()
            .filter_map(|&h| {
                geometries
                    .get(h)
                    .map(|g| (g.depth(), g.shader().unwrap_or(default_shader), h))
            })
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut pending: Option<(ResolvedState, Vec<Vertex>, Vec<u32>)> = None;

        for (_, _, h) in order {
            let g = match geometries.get(h) {
                Some(g) => g,
                None => continue,
            };
            if g.vertices().is_empty() {
                continue;
            }

            self.check_limits(g, limits)?;
            let state = ResolvedState::resolve(g, default_shader);

            if g.hint() == UploadHint::Static {
                self.flush(&mut pending);

                let num_vertices = g.vertices().len() as u32;
                let num_indices = g
                    .indices()
                    .map(|v| v.len())
                    .unwrap_or_else(|| g.vertices().len()) as u32;

                let cmd = self.command(
                    state,
                    DrawKind::Retained { geometry: h },
                    num_vertices,
                    num_indices,
                );
                self.cmds.push(cmd);
                continue;
            }

            let world = world_transform(geometries, h)?;
            let mergeable = state.primitive.is_mergeable();

            match pending {
                Some((ref current, ref mut verts, ref mut idxs))
                    if mergeable && *current == state =>
                {
                    let base = verts.len() as u32;
                    transform_vertices(&world, g.vertices(), verts);
                    append_indices(g, base, idxs)?;
                }
                _ => {
                    self.flush(&mut pending);

                    let mut verts = Vec::with_capacity(g.vertices().len());
                    transform_vertices(&world, g.vertices(), &mut verts);
                    let mut idxs = Vec::new();
                    append_indices(g, 0, &mut idxs)?;
                    pending = Some((state, verts, idxs));
                }
            }
        }

        self.flush(&mut pending);
        Ok(())
    }

    fn check_limits(&self, g: &Geometry, limits: &BufferLimits) -> Result<()> {
        let vertex_bytes = g.vertices().len() * Vertex::STRIDE;
        if vertex_bytes > limits.vertex_bytes {
            return Err(Error::GeometryTooLarge(
                "vertices",
                vertex_bytes,
                limits.vertex_bytes,
            ));
        }

        let num_indices = g
            .indices()
            .map(|v| v.len())
            .unwrap_or_else(|| g.vertices().len());
        let index_bytes = num_indices * ::std::mem::size_of::<u32>();
        if index_bytes > limits.index_bytes {
            return Err(Error::GeometryTooLarge(
                "indices",
                index_bytes,
                limits.index_bytes,
            ));
        }

        Ok(())
    }

    fn flush(&mut self, pending: &mut Option<(ResolvedState, Vec<Vertex>, Vec<u32>)>) {
        if let Some((state, verts, idxs)) = pending.take() {
            let num_vertices = verts.len() as u32;
            let num_indices = idxs.len() as u32;
            let vertices = self.bufs.extend_from_slice(&verts);
            let indices = self.bufs.extend_from_slice(&idxs);

            let cmd = self.command(
                state,
                DrawKind::Stream { vertices, indices },
                num_vertices,
                num_indices,
            );
            self.cmds.push(cmd);
        }
    }

    fn command(
        &self,
        state: ResolvedState,
        kind: DrawKind,
        num_vertices: u32,
        num_indices: u32,
    ) -> DrawCommand {
        DrawCommand {
            id: 0,
            kind,
            primitive: state.primitive,
            target: self.target,
            shader: state.shader,
            textures: state.textures,
            blend: state.blend,
            depth_state: state.depth_state,
            stencil: state.stencil,
            clip: state.clip,
            viewport: self.camera.viewport,
            clear: self.clear,
            view: self.camera.view,
            projection: self.camera.projection,
            uniforms: state.uniforms,
            num_vertices,
            num_indices,
        }
    }
}

/// The resolved render state of one geometry. Two adjacent geometries merge
/// into one draw command exactly when their resolved states compare equal.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedState {
    primitive: Primitive,
    shader: ShaderId,
    textures: SmallVec<[TextureBinding; MAX_TEXTURE_SLOTS]>,
    blend: Option<Blend>,
    depth_state: DepthState,
    stencil: Option<StencilTest>,
    clip: Option<SurfaceRect>,
    uniforms: SmallVec<[(HashValue<str>, UniformValue); MAX_UNIFORM_OVERRIDES]>,
}

impl ResolvedState {
    fn resolve(g: &Geometry, default_shader: ShaderId) -> Self {
        ResolvedState {
            primitive: g.primitive(),
            shader: g.shader().unwrap_or(default_shader),
            textures: SmallVec::from_slice(g.textures()),
            blend: g.blend(),
            depth_state: g.depth_state(),
            stencil: g.stencil(),
            clip: g.clip(),
            uniforms: SmallVec::from_slice(g.uniforms()),
        }
    }
}

/// Folds the parent chain of `handle` into its world transform. The walk is
/// bounded by `MAX_PARENT_DEPTH` so a cyclic chain surfaces as an error
/// instead of hanging the frame.
fn world_transform(
    geometries: &ObjectPool<GeometryHandle, Geometry>,
    handle: GeometryHandle,
) -> Result<Transform> {
    let g = geometries
        .get(handle)
        .ok_or_else(|| Error::GeometryInvalid(handle))?;

    let mut world = *g.transform();
    let mut parent = g.parent();
    let mut depth = 0;

    while let Some(p) = parent {
        depth += 1;
        if depth > MAX_PARENT_DEPTH {
            return Err(Error::GeometryMalformed(format!(
                "parent chain deeper than {}.",
                MAX_PARENT_DEPTH
            )));
        }

        match geometries.get(p) {
            Some(pg) => {
                world = pg.transform().concat(&world);
                parent = pg.parent();
            }
            None => break,
        }
    }

    Ok(world)
}

fn transform_vertices(world: &Transform, src: &[Vertex], out: &mut Vec<Vertex>) {
    use cgmath::Point3;

    out.reserve(src.len());
    for v in src {
        let p = world.transform_point(Point3::new(
            v.position[0],
            v.position[1],
            v.position[2],
        ));
        out.push(Vertex {
            position: [p.x, p.y, p.z],
            color: v.color,
            texcoord: v.texcoord,
        });
    }
}

/// Appends `g`'s indices rebased onto `base`, synthesizing a sequential
/// range when the geometry carries none.
fn append_indices(g: &Geometry, base: u32, out: &mut Vec<u32>) -> Result<()> {
    match g.indices() {
        Some(indices) => {
            let len = g.vertices().len() as u32;
            out.reserve(indices.len());
            for &v in indices {
                if v >= len {
                    return Err(Error::GeometryMalformed(format!(
                        "index out of bounds ({} vertices).",
                        len
                    )));
                }
                out.push(base + v);
            }
        }
        None => {
            let len = g.vertices().len() as u32;
            out.reserve(len as usize);
            out.extend(base..base + len);
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::video::geometry::GeometryParams;
    use crate::video::resources::ImageId;

    fn quad(depth: f32) -> Geometry {
        let mut g = Geometry::new(GeometryParams {
            vertices: vec![Vertex::default(); 4],
            indices: Some(vec![0, 1, 2, 2, 3, 0]),
            ..Default::default()
        });
        g.set_depth(depth);
        g
    }

    fn limits() -> BufferLimits {
        BufferLimits {
            vertex_bytes: 1 << 20,
            index_bytes: 1 << 20,
        }
    }

    fn run(
        batcher: &mut Batcher,
        geometries: &ObjectPool<GeometryHandle, Geometry>,
    ) -> Frame {
        let mut frame = Frame::default();
        let mut resident = FastHashSet::default();
        batcher
            .batch(geometries, &limits(), &mut resident, &mut frame)
            .unwrap();
        frame
    }

    #[test]
    fn empty_batcher_emits_no_commands() {
        let geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());
        let frame = run(&mut batcher, &geometries);
        assert!(frame.cmds.is_empty());
        assert!(frame.uploads.is_empty());
    }

    #[test]
    fn identical_state_merges_into_one_command() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        for _ in 0..3 {
            let h = geometries.create(quad(0.0));
            batcher.attach(h);
        }

        let frame = run(&mut batcher, &geometries);
        assert_eq!(frame.cmds.len(), 1);
        assert_eq!(frame.cmds[0].num_vertices, 12);
        assert_eq!(frame.cmds[0].num_indices, 18);
    }

    #[test]
    fn distinct_textures_split_commands() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        let mut a = quad(0.0);
        a.set_textures(vec![ImageId(1)]);
        let mut b = quad(0.0);
        b.set_textures(vec![ImageId(2)]);

        batcher.attach(geometries.create(a));
        batcher.attach(geometries.create(b));

        let frame = run(&mut batcher, &geometries);
        assert_eq!(frame.cmds.len(), 2);
    }

    #[test]
    fn depth_sorts_before_insertion_order() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        let mut far = quad(1.0);
        far.transform_mut().set_position([8.0, 0.0, 0.0]);
        let near = quad(0.0);

        // Inserted far-first; the near quad must still come first in the
        // merged buffer.
        batcher.attach(geometries.create(far));
        batcher.attach(geometries.create(near));

        let frame = run(&mut batcher, &geometries);
        assert_eq!(frame.cmds.len(), 1);

        if let DrawKind::Stream { vertices, .. } = frame.cmds[0].kind {
            let verts = frame.bufs.as_slice(vertices);
            assert_eq!(verts.len(), 8);
            // Near quad (untranslated) first, far quad second.
            assert_eq!(verts[0].position[0], 0.0);
            assert_eq!(verts[4].position[0], 8.0);
        } else {
            panic!("expected a stream command");
        }
    }

    #[test]
    fn equal_depth_ties_break_on_shader_identity() {
        use crate::video::resources::ShaderId;

        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        // Inserted with the higher shader id first; the emitted order
        // follows shader identity, not insertion.
        let mut a = quad(0.0);
        a.set_shader(ShaderId(2));
        let mut b = quad(0.0);
        b.set_shader(ShaderId(1));

        batcher.attach(geometries.create(a));
        batcher.attach(geometries.create(b));

        let frame = run(&mut batcher, &geometries);
        assert_eq!(frame.cmds.len(), 2);
        assert_eq!(frame.cmds[0].shader, ShaderId(1));
        assert_eq!(frame.cmds[1].shader, ShaderId(2));
    }

    #[test]
    fn strips_never_merge() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        for _ in 0..2 {
            let g = Geometry::new(GeometryParams {
                primitive: Primitive::TriangleStrip,
                vertices: vec![Vertex::default(); 4],
                ..Default::default()
            });
            batcher.attach(geometries.create(g));
        }

        let frame = run(&mut batcher, &geometries);
        assert_eq!(frame.cmds.len(), 2);
    }

    #[test]
    fn clean_rebatch_is_identical() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        batcher.attach(geometries.create(quad(0.0)));
        batcher.attach(geometries.create(quad(1.0)));

        let first = run(&mut batcher, &geometries);
        assert!(!batcher.is_dirty());
        let second = run(&mut batcher, &geometries);
        assert_eq!(first, second);
    }

    #[test]
    fn too_large_geometry_is_an_error() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        let g = Geometry::new(GeometryParams {
            vertices: vec![Vertex::default(); 64],
            ..Default::default()
        });
        batcher.attach(geometries.create(g));

        let tiny = BufferLimits {
            vertex_bytes: 64,
            index_bytes: 1 << 20,
        };
        let mut frame = Frame::default();
        let mut resident = FastHashSet::default();
        match batcher.batch(&geometries, &tiny, &mut resident, &mut frame) {
            Err(Error::GeometryTooLarge(..)) => (),
            other => panic!("expected GeometryTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn static_geometry_uploads_once() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        let g = Geometry::new(GeometryParams {
            vertices: vec![Vertex::default(); 4],
            hint: UploadHint::Static,
            ..Default::default()
        });
        let h = geometries.create(g);
        batcher.attach(h);

        let mut resident = FastHashSet::default();
        let mut frame = Frame::default();
        batcher
            .batch(&geometries, &limits(), &mut resident, &mut frame)
            .unwrap();
        assert_eq!(frame.uploads.len(), 1);
        assert_eq!(frame.cmds.len(), 1);
        assert_eq!(frame.cmds[0].kind, DrawKind::Retained { geometry: h });

        // Second frame: still resident, no new upload.
        let mut frame = Frame::default();
        batcher
            .batch(&geometries, &limits(), &mut resident, &mut frame)
            .unwrap();
        assert!(frame.uploads.is_empty());
        assert_eq!(frame.cmds.len(), 1);
    }

    #[test]
    fn parent_chain_transforms_apply() {
        let mut geometries = ObjectPool::new();
        let mut batcher = Batcher::new(BatcherParams::default());

        let mut root = quad(0.0);
        root.transform_mut().set_position([10.0, 0.0, 0.0]);
        let root = geometries.create(root);

        let mut child = quad(0.0);
        child.transform_mut().set_position([0.0, 5.0, 0.0]);
        child.set_parent(root);
        let child = geometries.create(child);

        batcher.attach(child);

        let frame = run(&mut batcher, &geometries);
        if let DrawKind::Stream { vertices, .. } = frame.cmds[0].kind {
            let verts = frame.bufs.as_slice(vertices);
            assert_eq!(verts[0].position, [10.0, 5.0, 0.0]);
        } else {
            panic!("expected a stream command");
        }
    }
}
