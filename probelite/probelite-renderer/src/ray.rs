//! Ray and intersection records in their GPU layout.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Payload slot carrying a shadow ray's direct-light contribution (`w = 1` when active).
pub const PAYLOAD_DIRECT: usize = 0;
/// Payload slot whose `x` holds the primary hit distance for the shadow resolve.
pub const PAYLOAD_DISTANCE: usize = 1;

/// 96-byte ray. A ray with `t_max < t_min` is inactive and never occludes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Ray {
    pub origin: Vec3,
    pub t_min: f32,
    pub direction: Vec3,
    pub t_max: f32,
    pub payload: [Vec4; 4],
}

const _: () = assert!(std::mem::size_of::<Ray>() == 96);

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3, t_min: f32, t_max: f32) -> Self {
        Self { origin, t_min, direction, t_max, payload: [Vec4::ZERO; 4] }
    }

    pub fn inactive() -> Self {
        Self { origin: Vec3::ZERO, t_min: 0.0, direction: Vec3::Z, t_max: -1.0, payload: [Vec4::ZERO; 4] }
    }

    pub fn is_active(&self) -> bool {
        self.t_max >= self.t_min
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

impl Default for Ray {
    fn default() -> Self {
        Self::inactive()
    }
}

/// 16-byte hit record. A miss stores distance `-1` and primitive `u32::MAX`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Intersection {
    pub distance: f32,
    pub primitive: u32,
    pub barycentrics: Vec2,
}

const _: () = assert!(std::mem::size_of::<Intersection>() == 16);

impl Intersection {
    pub const MISS: Intersection = Intersection { distance: -1.0, primitive: u32::MAX, barycentrics: Vec2::ZERO };

    pub fn is_hit(&self) -> bool {
        self.distance >= 0.0
    }
}

impl Default for Intersection {
    fn default() -> Self {
        Self::MISS
    }
}

/// Which ray set a stage runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Batch {
    /// `probe_count × probe_resolution²` probe rays.
    Probes,
    /// One primary ray per pixel of the traced view.
    View,
}

impl Batch {
    pub fn kind(self) -> u32 {
        match self {
            Batch::Probes => 0,
            Batch::View => 1,
        }
    }
}
