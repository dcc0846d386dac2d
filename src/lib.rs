//! # What is This?
//!
//! Easel is the draw-batching layer of a small and portable 2d/3d engine,
//! sitting between application code and the graphics API. Applications
//! describe *what* to render with `Geometry` objects grouped into
//! `Batcher`s; easel decides *how*, by sorting and merging geometry into a
//! minimal sequence of draw commands and replaying them through a stateful
//! backend that owns the GPU-visible memory.
//!
//! The backend keeps several rotating byte ranges per logical buffer, so the
//! CPU can write the next frame's data while the GPU is still consuming the
//! previous one. A fence guards every range: a range is never rewritten
//! until the GPU confirmed it is done reading it.
//!
//! Window creation, input, and asset import are external collaborators. The
//! only things easel consumes from them are resource created/removed events,
//! camera matrices and display size changes.

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate smallvec;

#[macro_use]
pub mod utils;
pub mod math;
pub mod video;

pub mod prelude {
    pub use crate::video::prelude::*;
}
