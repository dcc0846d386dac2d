//! The explicitly tracked GPU binding state.
//!
//! Every state the diffing routine compares against lives in this one
//! struct, passed by mutable reference through the submit path. `None`
//! always means "unknown, must apply" rather than "disabled", so a fresh or
//! invalidated state re-applies everything on the next command.

use smallvec::SmallVec;

use crate::math::prelude::Vector2;
use crate::utils::prelude::FastHashSet;
use crate::video::geometry::TextureBinding;
use crate::video::resources::ShaderId;
use crate::video::state::{
    Blend, DepthState, RenderTarget, SamplerParams, StencilTest, SurfaceRect,
};
use crate::video::MAX_TEXTURE_SLOTS;

#[derive(Debug, Default)]
pub struct GpuBindingState {
    pub viewport: Option<SurfaceRect>,
    pub scissor: Option<SurfaceRect>,
    pub target: Option<RenderTarget>,
    pub program: Option<ShaderId>,
    pub vao: Option<u32>,
    /// What is bound in each texture slot; entries are `None` when unknown
    /// or unbound.
    pub slots: SmallVec<[Option<(TextureBinding, SamplerParams)>; MAX_TEXTURE_SLOTS]>,
    pub blend: Option<Option<Blend>>,
    pub depth: Option<DepthState>,
    pub stencil: Option<Option<StencilTest>>,
    pub globals_offset: Option<usize>,
    /// Targets already cleared this frame. Reset in `pre_draw`.
    pub cleared: FastHashSet<RenderTarget>,
}

impl GpuBindingState {
    pub fn new() -> Self {
        Default::default()
    }

    /// Forgets everything. The next command re-applies the full state.
    pub fn invalidate(&mut self) {
        *self = Default::default();
    }

    /// Per-frame reset: targets must be re-cleared and re-bound, bindings
    /// survive across frames.
    pub fn begin_frame(&mut self) {
        self.cleared.clear();
        self.target = None;
    }

    /// Drops every slot binding that references `image` so a removed image
    /// can not remain bound.
    pub fn purge_image(&mut self, image: crate::video::resources::ImageId) {
        for slot in self.slots.iter_mut() {
            if let Some((binding, _)) = *slot {
                if binding.image == image {
                    *slot = None;
                }
            }
        }

        if self.target == Some(RenderTarget::Texture(image)) {
            self.target = None;
        }
        self.cleared.remove(&RenderTarget::Texture(image));
    }
}

/// The viewport of a command: the camera's rectangle, or the full target
/// when the camera does not carry one.
pub fn resolve_viewport(camera: Option<SurfaceRect>, target: Vector2<u32>) -> SurfaceRect {
    match camera {
        Some(v) if !v.is_empty() => v,
        _ => SurfaceRect::of_size(target),
    }
}

/// The scissor rectangle of a command. A zero-area clip means "clipping
/// disabled" and resolves to the full target size; this is deliberate
/// degenerate-case policy, not a fallback.
pub fn resolve_scissor(clip: Option<SurfaceRect>, target: Vector2<u32>) -> SurfaceRect {
    match clip {
        Some(v) if !v.is_empty() => v,
        _ => SurfaceRect::of_size(target),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::video::resources::ImageId;

    #[test]
    fn zero_area_clip_resolves_to_full_target() {
        let target = Vector2::new(640, 480);

        let r = resolve_scissor(Some(SurfaceRect::new(10, 10, 0, 0)), target);
        assert_eq!(r, SurfaceRect::of_size(target));

        let r = resolve_scissor(Some(SurfaceRect::new(0, 0, 0, 100)), target);
        assert_eq!(r, SurfaceRect::of_size(target));

        let r = resolve_scissor(None, target);
        assert_eq!(r, SurfaceRect::of_size(target));

        let r = resolve_scissor(Some(SurfaceRect::new(10, 10, 20, 20)), target);
        assert_eq!(r, SurfaceRect::new(10, 10, 20, 20));
    }

    #[test]
    fn viewport_falls_back_to_target_size() {
        let target = Vector2::new(800, 600);

        assert_eq!(resolve_viewport(None, target), SurfaceRect::of_size(target));
        assert_eq!(
            resolve_viewport(Some(SurfaceRect::new(0, 0, 400, 300)), target),
            SurfaceRect::new(0, 0, 400, 300)
        );
    }

    #[test]
    fn purge_image_unbinds_slots_and_target() {
        let mut state = GpuBindingState::new();
        let binding = TextureBinding {
            image: ImageId(7),
            sampler: None,
        };
        state.slots.push(Some((binding, SamplerParams::default())));
        state.target = Some(RenderTarget::Texture(ImageId(7)));

        state.purge_image(ImageId(7));
        assert_eq!(state.slots[0], None);
        assert_eq!(state.target, None);
    }
}
