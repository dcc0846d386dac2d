//! CPU-side geometry: vertex data plus the render state it wants to be
//! drawn with. No GPU state is touched here.

use smallvec::SmallVec;

use crate::math::transform::Transform;
use crate::utils::prelude::HashValue;
use crate::video::batch::BatcherHandle;
use crate::video::errors::{Error, Result};
use crate::video::resources::{ImageId, ShaderId};
use crate::video::state::{
    Blend, DepthState, Primitive, SamplerParams, StencilTest, SurfaceRect, UniformValue,
};
use crate::video::vertex::Vertex;
use crate::video::{MAX_TEXTURE_SLOTS, MAX_UNIFORM_OVERRIDES};

impl_handle!(GeometryHandle);

/// Hint about the intended update strategy of the vertex data.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum UploadHint {
    /// The vertices are re-transformed and re-uploaded every frame. This is
    /// the default and the right choice for anything that moves.
    Stream,
    /// The vertices are baked and uploaded once, and draws reference the
    /// uploaded byte range by offset afterwards. Mutating such a geometry
    /// re-bakes and re-uploads it.
    Static,
}

impl Default for UploadHint {
    fn default() -> Self {
        UploadHint::Stream
    }
}

/// A texture with an optional sampler override. Without an override the
/// default sampler parameters apply.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub struct TextureBinding {
    pub image: ImageId,
    pub sampler: Option<SamplerParams>,
}

impl From<ImageId> for TextureBinding {
    fn from(image: ImageId) -> Self {
        TextureBinding {
            image,
            sampler: None,
        }
    }
}

/// The immutable creation parameters of a geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryParams {
    /// How the vertex data is assembled into primitives.
    pub primitive: Primitive,
    /// The vertex list in model space.
    pub vertices: Vec<Vertex>,
    /// Optional index list. When absent, a sequential index range is
    /// synthesized so the downstream path is uniformly indexed.
    pub indices: Option<Vec<u32>>,
    /// Update strategy of the vertex data.
    pub hint: UploadHint,
}

impl Default for GeometryParams {
    fn default() -> Self {
        GeometryParams {
            primitive: Primitive::Triangles,
            vertices: Vec::new(),
            indices: None,
            hint: UploadHint::Stream,
        }
    }
}

impl GeometryParams {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref indices) = self.indices {
            let len = self.vertices.len() as u32;
            if indices.iter().any(|&v| v >= len) {
                return Err(Error::GeometryMalformed(format!(
                    "index out of bounds ({} vertices).",
                    len
                )));
            }
        }

        Ok(())
    }
}

/// A piece of renderable content: vertices, a transform, and the render
/// state attributes that decide which draw command it ends up in.
///
/// Geometry belongs to zero or more batchers. Mutations go through
/// `Renderer::geometry_mut`, which marks every owning batcher dirty when
/// the borrow ends.
#[derive(Debug, Clone)]
pub struct Geometry {
    params: GeometryParams,
    transform: Transform,
    parent: Option<GeometryHandle>,
    shader: Option<ShaderId>,
    textures: SmallVec<[TextureBinding; MAX_TEXTURE_SLOTS]>,
    blend: Option<Blend>,
    depth_state: DepthState,
    stencil: Option<StencilTest>,
    clip: Option<SurfaceRect>,
    depth: f32,
    uniforms: SmallVec<[(HashValue<str>, UniformValue); MAX_UNIFORM_OVERRIDES]>,
    pub(crate) owners: SmallVec<[BatcherHandle; 2]>,
}

impl Geometry {
    pub(crate) fn new(params: GeometryParams) -> Self {
        Geometry {
            params,
            transform: Transform::default(),
            parent: None,
            shader: None,
            textures: SmallVec::new(),
            blend: None,
            depth_state: DepthState::default(),
            stencil: None,
            clip: None,
            depth: 0.0,
            uniforms: SmallVec::new(),
            owners: SmallVec::new(),
        }
    }

    #[inline]
    pub fn primitive(&self) -> Primitive {
        self.params.primitive
    }

    #[inline]
    pub fn hint(&self) -> UploadHint {
        self.params.hint
    }

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.params.vertices
    }

    /// Replaces the vertex list. Indices are validated against the new
    /// length on the next batch.
    #[inline]
    pub fn set_vertices(&mut self, vertices: Vec<Vertex>) {
        self.params.vertices = vertices;
    }

    #[inline]
    pub fn indices(&self) -> Option<&[u32]> {
        self.params.indices.as_ref().map(Vec::as_slice)
    }

    #[inline]
    pub fn set_indices(&mut self, indices: Option<Vec<u32>>) {
        self.params.indices = indices;
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[inline]
    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    #[inline]
    pub fn parent(&self) -> Option<GeometryHandle> {
        self.parent
    }

    /// Re-parents this geometry. The world matrix becomes the fold of the
    /// ancestor chain.
    #[inline]
    pub fn set_parent<T>(&mut self, parent: T)
    where
        T: Into<Option<GeometryHandle>>,
    {
        self.parent = parent.into();
    }

    #[inline]
    pub fn shader(&self) -> Option<ShaderId> {
        self.shader
    }

    /// Overrides the batcher's default shader for this geometry.
    #[inline]
    pub fn set_shader<T>(&mut self, shader: T)
    where
        T: Into<Option<ShaderId>>,
    {
        self.shader = shader.into();
    }

    #[inline]
    pub fn textures(&self) -> &[TextureBinding] {
        &self.textures
    }

    pub fn set_textures<T, I>(&mut self, textures: I)
    where
        T: Into<TextureBinding>,
        I: IntoIterator<Item = T>,
    {
        self.textures.clear();
        for v in textures {
            assert!(self.textures.len() < MAX_TEXTURE_SLOTS);
            self.textures.push(v.into());
        }
    }

    #[inline]
    pub fn blend(&self) -> Option<Blend> {
        self.blend
    }

    #[inline]
    pub fn set_blend<T>(&mut self, blend: T)
    where
        T: Into<Option<Blend>>,
    {
        self.blend = blend.into();
    }

    #[inline]
    pub fn depth_state(&self) -> DepthState {
        self.depth_state
    }

    #[inline]
    pub fn set_depth_state(&mut self, depth_state: DepthState) {
        self.depth_state = depth_state;
    }

    #[inline]
    pub fn stencil(&self) -> Option<StencilTest> {
        self.stencil
    }

    #[inline]
    pub fn set_stencil<T>(&mut self, stencil: T)
    where
        T: Into<Option<StencilTest>>,
    {
        self.stencil = stencil.into();
    }

    #[inline]
    pub fn clip(&self) -> Option<SurfaceRect> {
        self.clip
    }

    /// Restricts rendering of this geometry to a clip rectangle. A
    /// zero-area rectangle means "no clipping", not "clip everything".
    #[inline]
    pub fn set_clip<T>(&mut self, clip: T)
    where
        T: Into<Option<SurfaceRect>>,
    {
        self.clip = clip.into();
    }

    /// The painter's-algorithm sort key. Lower values draw first.
    #[inline]
    pub fn depth(&self) -> f32 {
        self.depth
    }

    #[inline]
    pub fn set_depth(&mut self, depth: f32) {
        self.depth = depth;
    }

    #[inline]
    pub fn uniforms(&self) -> &[(HashValue<str>, UniformValue)] {
        &self.uniforms
    }

    /// Binds the named uniform override for this geometry's draws.
    pub fn set_uniform<F, V>(&mut self, field: F, value: V)
    where
        F: Into<HashValue<str>>,
        V: Into<UniformValue>,
    {
        let field = field.into();
        let value = value.into();

        for v in self.uniforms.iter_mut() {
            if v.0 == field {
                v.1 = value;
                return;
            }
        }

        assert!(self.uniforms.len() < MAX_UNIFORM_OVERRIDES);
        self.uniforms.push((field, value));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_indices() {
        let params = GeometryParams {
            vertices: vec![Vertex::default(); 3],
            indices: Some(vec![0, 1, 2]),
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        let params = GeometryParams {
            vertices: vec![Vertex::default(); 3],
            indices: Some(vec![0, 1, 3]),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn uniform_overrides_dedup() {
        let mut geometry = Geometry::new(GeometryParams::default());
        geometry.set_uniform("u_Tint", 1.0f32);
        geometry.set_uniform("u_Tint", 0.5f32);
        assert_eq!(geometry.uniforms().len(), 1);
        assert_eq!(geometry.uniforms()[0].1, UniformValue::F32(0.5));
    }
}
