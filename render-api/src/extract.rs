//! Data types for extraction from the host engine into the render world.
//! The host fills these each frame; the renderer never reaches back into host state.

use std::collections::HashMap;

/// Bytes per vertex in `ExtractedMesh::vertex_data`: position (3 x f32) + normal (3 x f32).
pub const VERTEX_STRIDE: usize = 24;

/// Per-mesh instance data extracted from the main world.
#[derive(Clone, Debug)]
pub struct ExtractedMesh {
    /// Host-defined entity or instance id.
    pub entity_id: u64,
    /// Interleaved position + normal, `VERTEX_STRIDE` bytes per vertex.
    pub vertex_data: Vec<u8>,
    /// Index data (u32 indices, three per triangle).
    pub index_data: Vec<u8>,
    /// World transform: column-major 4x4 matrix (WGSL/wgpu convention).
    /// Index [col*4+row]; e.g. m[0..4] is the first column.
    pub transform: [f32; 16],
    /// Linear RGB albedo of the mesh material.
    pub base_color: [f32; 3],
    /// Whether this instance is visible.
    pub visible: bool,
}

/// All extracted meshes for the current frame.
#[derive(Default, Debug)]
pub struct ExtractedMeshes {
    pub meshes: HashMap<u64, ExtractedMesh>,
}

/// Pinhole camera described by its position and orthonormal basis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: [f32; 3],
    pub forward: [f32; 3],
    pub right: [f32; 3],
    pub up: [f32; 3],
    /// Vertical field of view in radians.
    pub vertical_fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: [0.0, 1.0, 5.0],
            forward: [0.0, 0.0, -1.0],
            right: [1.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
            vertical_fov: std::f32::consts::FRAC_PI_4,
        }
    }
}

/// The light that drives direct lighting of probe ray hits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    /// Infinitely distant light. `direction` is the direction the light travels.
    Directional { direction: [f32; 3], color: [f32; 3] },
    /// One-sided rectangle centred at `position`, spanned by the half-extents
    /// `right` and `up`, emitting along `forward`.
    Area {
        position: [f32; 3],
        forward: [f32; 3],
        right: [f32; 3],
        up: [f32; 3],
        color: [f32; 3],
    },
}

impl Default for Light {
    fn default() -> Self {
        Light::Directional {
            direction: [0.3, -0.8, 0.5],
            color: [1.0, 1.0, 1.0],
        }
    }
}

/// View/camera data for the current frame.
#[derive(Clone, Debug, Default)]
pub struct ExtractedView {
    pub camera: Camera,
    pub viewport_size: (u32, u32),
    /// Optional main light. If None, the renderer uses `Light::default()`.
    pub light: Option<Light>,
}
