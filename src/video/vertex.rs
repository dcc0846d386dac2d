//! The fixed vertex layout of the pipeline.

use std::{mem, slice};

/// A single vertex: position, color and texture coordinate, tightly packed
/// for direct GPU upload. The byte layout is a contract with the backend's
/// vertex array setup: position at offset 0, color at 12, texcoord at 28,
/// stride 36.
#[repr(C)]
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub texcoord: [f32; 2],
}

impl Vertex {
    /// The distance in bytes between consecutive vertices.
    pub const STRIDE: usize = 36;

    #[inline]
    pub fn new(position: [f32; 3], color: [f32; 4], texcoord: [f32; 2]) -> Self {
        Vertex {
            position,
            color,
            texcoord,
        }
    }

    /// Reinterprets a vertex slice as raw bytes.
    pub fn as_bytes(values: &[Vertex]) -> &[u8] {
        let len = values.len() * mem::size_of::<Vertex>();
        unsafe { slice::from_raw_parts(values.as_ptr() as *const u8, len) }
    }
}

impl Default for Vertex {
    fn default() -> Self {
        Vertex {
            position: [0.0; 3],
            color: [1.0; 4],
            texcoord: [0.0; 2],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(mem::size_of::<Vertex>(), Vertex::STRIDE);

        let v = Vertex::default();
        let base = &v as *const Vertex as usize;
        assert_eq!(&v.position as *const _ as usize - base, 0);
        assert_eq!(&v.color as *const _ as usize - base, 12);
        assert_eq!(&v.texcoord as *const _ as usize - base, 28);
    }

    #[test]
    fn as_bytes() {
        let verts = [
            Vertex::new([1.0, 2.0, 3.0], [1.0, 1.0, 1.0, 1.0], [0.0, 0.0]),
            Vertex::new([4.0, 5.0, 6.0], [0.0, 0.0, 0.0, 1.0], [1.0, 1.0]),
        ];

        let bytes = Vertex::as_bytes(&verts);
        assert_eq!(bytes.len(), 2 * Vertex::STRIDE);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes()[..]);
    }
}
