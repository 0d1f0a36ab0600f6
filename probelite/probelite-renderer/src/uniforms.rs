//! Per-frame uniform block and random buffer, triple-buffered by frame slot.

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use render_api::{Camera, Light};

use crate::config::ProbeliteConfig;
use crate::field::FieldLayout;
use crate::probe_grid::ProbeGrid;

/// Size of one slot of the uniform ring; matches the dynamic-offset alignment.
pub const UNIFORM_STRIDE: u64 = 256;
/// `vec2` entries in each slot's random buffer.
pub const RANDOM_COUNT: usize = 256;
/// Byte size of one slot's random buffer (`vec2` pairs packed as `vec4`).
pub const RANDOM_STRIDE: u64 = (RANDOM_COUNT * 8) as u64;

pub const LIGHT_DIRECTIONAL: u32 = 0;
pub const LIGHT_AREA: u32 = 1;

pub const FLAG_SPECULAR: u32 = 1;
pub const FLAG_JITTER: u32 = 2;

/// Snapshot of everything a frame's stages read, laid out as sixteen 16-byte rows.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub camera_position: Vec3,
    pub frame_index: u32,
    /// Camera right scaled by `tan(fov / 2) * aspect`.
    pub camera_right: Vec3,
    pub view_width: u32,
    /// Camera up scaled by `tan(fov / 2)`.
    pub camera_up: Vec3,
    pub view_height: u32,
    pub camera_forward: Vec3,
    pub light_kind: u32,
    pub light_position: Vec3,
    pub probe_resolution: u32,
    pub light_right: Vec3,
    pub shadow_resolution: u32,
    pub light_up: Vec3,
    pub radiance_resolution: u32,
    /// Direction light travels (directional) or emission normal (area).
    pub light_direction: Vec3,
    pub probe_count: u32,
    pub light_color: Vec3,
    pub random_count: u32,
    pub grid_center: Vec3,
    pub max_distance: f32,
    pub grid_extent: Vec3,
    pub blend_factor: f32,
    pub grid_dims: UVec3,
    pub flags: u32,
    pub sky_color: Vec3,
    pub normal_bias: f32,
    pub ambient_default: Vec3,
    pub depth_bias: f32,
    pub variance_sharpness: f32,
    pub min_variance: f32,
    pub indirect_intensity: f32,
    pub specular_sharpness: f32,
    pub node_count: u32,
    pub triangle_count: u32,
    pub _pad: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<FrameUniforms>() == UNIFORM_STRIDE as usize);

/// Scene counts the traversal kernels bound their loops with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneCounts {
    pub nodes: u32,
    pub triangles: u32,
}

impl FrameUniforms {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        config: &ProbeliteConfig,
        layout: &FieldLayout,
        scene: SceneCounts,
        camera: &Camera,
        light: &Light,
        view: (u32, u32),
        frame_index: u64,
        specular: bool,
    ) -> Self {
        let grid = &layout.grid;
        let tan_half = (camera.vertical_fov * 0.5).tan();
        let aspect = if view.1 > 0 { view.0 as f32 / view.1 as f32 } else { 1.0 };

        let mut u = Self::zeroed();
        u.camera_position = Vec3::from_array(camera.position);
        u.camera_forward = Vec3::from_array(camera.forward).normalize_or_zero();
        u.camera_right = Vec3::from_array(camera.right).normalize_or_zero() * tan_half * aspect;
        u.camera_up = Vec3::from_array(camera.up).normalize_or_zero() * tan_half;
        u.frame_index = frame_index as u32;
        u.view_width = view.0;
        u.view_height = view.1;

        match *light {
            Light::Directional { direction, color } => {
                u.light_kind = LIGHT_DIRECTIONAL;
                u.light_direction = Vec3::from_array(direction).normalize_or_zero();
                u.light_color = Vec3::from_array(color);
            }
            Light::Area { position, forward, right, up, color } => {
                u.light_kind = LIGHT_AREA;
                u.light_position = Vec3::from_array(position);
                u.light_direction = Vec3::from_array(forward).normalize_or_zero();
                u.light_right = Vec3::from_array(right);
                u.light_up = Vec3::from_array(up);
                u.light_color = Vec3::from_array(color);
            }
        }

        u.probe_resolution = layout.probe_resolution;
        u.shadow_resolution = layout.shadow_resolution;
        u.radiance_resolution = layout.radiance_resolution;
        u.probe_count = grid.probe_count();
        u.random_count = RANDOM_COUNT as u32;
        u.grid_center = grid.center;
        u.grid_extent = grid.extent;
        u.grid_dims = grid.dims;
        u.max_distance = grid.max_ray_distance();

        u.blend_factor = config.blend_factor;
        u.normal_bias = config.normal_bias;
        u.depth_bias = config.depth_bias;
        u.variance_sharpness = config.variance_sharpness;
        u.specular_sharpness = config.specular_sharpness;
        u.min_variance = config.min_variance;
        u.indirect_intensity = config.indirect_intensity;
        u.sky_color = config.sky_color;
        u.ambient_default = config.ambient_default;
        if specular {
            u.flags |= FLAG_SPECULAR;
        }
        if config.jitter_rays {
            u.flags |= FLAG_JITTER;
        }

        u.node_count = scene.nodes;
        u.triangle_count = scene.triangles;
        u
    }

    pub fn specular_enabled(&self) -> bool {
        self.flags & FLAG_SPECULAR != 0
    }

    pub fn jitter(&self) -> bool {
        self.flags & FLAG_JITTER != 0
    }

    pub fn rays_per_probe(&self) -> u32 {
        self.probe_resolution * self.probe_resolution
    }

    pub fn grid(&self) -> ProbeGrid {
        ProbeGrid { dims: self.grid_dims, center: self.grid_center, extent: self.grid_extent }
    }
}

/// Per-batch header: which ray set a dispatch covers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BatchUniform {
    pub kind: u32,
    pub ray_count: u32,
    pub width: u32,
    pub height: u32,
}

/// Uniform-in-`[0, 1)²` samples for one frame, reproducible from `(seed, frame_index)`.
pub fn random_block(seed: u64, frame_index: u64) -> [Vec2; RANDOM_COUNT] {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ frame_index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    std::array::from_fn(|_| Vec2::new(rng.random::<f32>(), rng.random::<f32>()))
}

/// Host copy of the slot ring shared by both backends.
#[derive(Clone, Debug)]
pub struct UniformRing {
    frames: Vec<FrameUniforms>,
    random: Vec<[Vec2; RANDOM_COUNT]>,
}

impl UniformRing {
    pub fn new(slots: usize) -> Self {
        Self { frames: vec![FrameUniforms::zeroed(); slots], random: vec![[Vec2::ZERO; RANDOM_COUNT]; slots] }
    }

    pub fn write(&mut self, slot: usize, uniforms: &FrameUniforms, random: &[Vec2; RANDOM_COUNT]) {
        self.frames[slot] = *uniforms;
        self.random[slot] = *random;
    }

    pub fn frame(&self, slot: usize) -> &FrameUniforms {
        &self.frames[slot]
    }

    pub fn random(&self, slot: usize) -> &[Vec2; RANDOM_COUNT] {
        &self.random[slot]
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_block_is_reproducible() {
        assert_eq!(random_block(7, 42), random_block(7, 42));
        assert_ne!(random_block(7, 42), random_block(7, 43));
        assert!(random_block(1, 0).iter().all(|v| (0.0..1.0).contains(&v.x) && (0.0..1.0).contains(&v.y)));
    }

    #[test]
    fn camera_basis_is_prescaled() {
        let config = ProbeliteConfig::default();
        let layout = FieldLayout::from_config(
            ProbeGrid::new([2, 2, 2], Vec3::ZERO, Vec3::splat(2.0)).unwrap(),
            &config,
        );
        let camera = Camera { vertical_fov: std::f32::consts::FRAC_PI_2, ..Default::default() };
        let u = FrameUniforms::build(&config, &layout, SceneCounts::default(), &camera, &Light::default(), (200, 100), 3, true);
        assert!((u.camera_up.length() - 1.0).abs() < 1e-5);
        assert!((u.camera_right.length() - 2.0).abs() < 1e-5);
        assert_eq!(u.probe_count, 8);
        assert!(u.specular_enabled());
    }
}
