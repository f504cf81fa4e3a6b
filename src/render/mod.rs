//! GPU rendering pipeline.
//!
//! Two passes per admitted tick: the capture pass blits the camera image
//! into the offscreen frame buffer, the composite pass draws every
//! layer's quad to the window surface through the keying shader.

mod compositor;
mod pacer;

pub use compositor::Compositor;
pub use pacer::FramePacer;

use crate::composition::KeyParams;

/// Which pipeline a drawable renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    /// Plain textured blit (capture pass).
    Basic,
    /// Keying shader with per-layer uniforms (composite pass).
    Keyed,
}

/// Vertex format for the fullscreen quads.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            },
            wgpu::VertexAttribute {
                offset: 8,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    pub fn new(position: [f32; 2], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }
}

/// Uniform block for the keying shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KeyUniforms {
    pub thresh: f32,
    pub softness: f32,
    pub invert: f32,
    pub opacity: f32,
}

impl KeyUniforms {
    pub fn from_params(params: &KeyParams) -> Self {
        Self {
            thresh: params.thresh,
            softness: params.softness,
            invert: params.invert,
            opacity: params.opacity,
        }
    }
}

impl Default for KeyUniforms {
    fn default() -> Self {
        Self::from_params(&KeyParams::default())
    }
}

/// Full-frame quad as two triangles.
pub fn fullscreen_quad() -> [Vertex; 6] {
    [
        Vertex::new([-1.0, -1.0], [0.0, 1.0]),
        Vertex::new([1.0, -1.0], [1.0, 1.0]),
        Vertex::new([1.0, 1.0], [1.0, 0.0]),
        Vertex::new([-1.0, -1.0], [0.0, 1.0]),
        Vertex::new([1.0, 1.0], [1.0, 0.0]),
        Vertex::new([-1.0, 1.0], [0.0, 0.0]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniforms_mirror_params() {
        let params = KeyParams {
            thresh: 0.75,
            softness: 0.1,
            invert: 0.0,
            opacity: 0.5,
        };
        let uniforms = KeyUniforms::from_params(&params);
        assert_eq!(uniforms.thresh, 0.75);
        assert_eq!(uniforms.softness, 0.1);
        assert_eq!(uniforms.invert, 0.0);
        assert_eq!(uniforms.opacity, 0.5);
    }

    #[test]
    fn test_quad_covers_clip_space() {
        let quad = fullscreen_quad();
        assert_eq!(quad.len(), 6);
        for v in &quad {
            assert!(v.position[0].abs() == 1.0 && v.position[1].abs() == 1.0);
        }
    }
}
