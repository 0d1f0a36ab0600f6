//! Lighting helpers shared by the shading and accumulation kernels.
//! The WGSL in `shaders/common.wgsl` mirrors these functions.

use glam::{IVec3, Vec3, Vec4};

use crate::octahedral;
use crate::probe_grid::Atlas;
use crate::uniforms::FrameUniforms;

/// Ambient-cube face normals, `+x +y +z -x -y -z`.
pub const AMBIENT_FACES: [Vec3; 6] = [Vec3::X, Vec3::Y, Vec3::Z, Vec3::NEG_X, Vec3::NEG_Y, Vec3::NEG_Z];

/// Floor on a probe's visibility weight so occluded neighbourhoods still blend.
pub const MIN_PROBE_VISIBILITY: f32 = 0.05;

/// Temporal blend `old·(1-b) + new·b`; `b == 0` returns `old` untouched.
#[inline]
pub fn temporal_blend<T>(old: T, new: T, b: f32) -> T
where
    T: Copy + std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    if b <= 0.0 {
        old
    } else {
        old * (1.0 - b) + new * b
    }
}

/// Irradiance from an ambient cube in direction `n` (squared-normal face weights).
pub fn eval_ambient_cube(faces: &[Vec3; 6], n: Vec3) -> Vec3 {
    let nsq = n * n;
    let x = if n.x >= 0.0 { faces[0] } else { faces[3] };
    let y = if n.y >= 0.0 { faces[1] } else { faces[4] };
    let z = if n.z >= 0.0 { faces[2] } else { faces[5] };
    x * nsq.x + y * nsq.y + z * nsq.z
}

/// One-tailed Chebyshev bound on the probability that a point at `distance` is visible.
pub fn chebyshev_visibility(mean: f32, mean_sq: f32, distance: f32, min_variance: f32) -> f32 {
    if distance <= mean {
        return 1.0;
    }
    let variance = (mean_sq - mean * mean).max(min_variance);
    let d = distance - mean;
    variance / (variance + d * d)
}

/// Read-only view of the previous frame's radiance and depth maps.
pub struct FieldSampler<'a> {
    pub uniforms: &'a FrameUniforms,
    pub radiance: &'a Atlas<Vec4>,
    pub depth: &'a Atlas<Vec4>,
}

impl FieldSampler<'_> {
    fn probe_position(&self, c: IVec3) -> Vec3 {
        let u = self.uniforms;
        let spacing = u.grid_extent / u.grid_dims.as_vec3();
        u.grid_center - u.grid_extent * 0.5 + (c.as_vec3() + Vec3::splat(0.5)) * spacing
    }

    /// Chebyshev-weighted trilinear blend of the 8 probes around `p`, looked up along `n`.
    pub fn irradiance(&self, p: Vec3, n: Vec3) -> Vec3 {
        let u = self.uniforms;
        if u.probe_count == 0 {
            return u.ambient_default;
        }
        let dims = u.grid_dims.as_ivec3();
        let spacing = u.grid_extent / u.grid_dims.as_vec3();
        let first = u.grid_center - u.grid_extent * 0.5 + spacing * 0.5;
        let rel = (p - first) / spacing.max(Vec3::splat(1e-6));
        let base = rel.floor().as_ivec3().clamp(IVec3::ZERO, dims - IVec3::ONE);
        let alpha = (rel - base.as_vec3()).clamp(Vec3::ZERO, Vec3::ONE);

        let mut sum = Vec3::ZERO;
        let mut weight_sum = 0.0;
        for corner in 0..8 {
            let offset = IVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let c = (base + offset).min(dims - IVec3::ONE);
            let probe = (c.x + c.y * dims.x + c.z * dims.x * dims.y) as u32;
            let probe_pos = self.probe_position(c);

            let tri = Vec3::ONE - alpha + offset.as_vec3() * (2.0 * alpha - Vec3::ONE);
            let mut w = tri.x * tri.y * tri.z;

            let to_probe = (probe_pos - p).normalize_or(n);
            let wrap = (to_probe.dot(n) + 1.0) * 0.5;
            let mut w_dir = wrap * wrap + 0.2;

            let from_probe = p - probe_pos;
            let distance = from_probe.length();
            let dir = from_probe.normalize_or(n);
            let t = octahedral::texel_of(dir, u.shadow_resolution);
            let moments = self.depth.get(probe, t.x, t.y);
            let vis = chebyshev_visibility(moments.x, moments.y, distance - u.depth_bias, u.min_variance);
            w_dir *= vis.max(MIN_PROBE_VISIBILITY);
            w *= w_dir;

            let rt = octahedral::texel_of(n, u.radiance_resolution);
            sum += self.radiance.get(probe, rt.x, rt.y).truncate() * w;
            weight_sum += w;
        }
        if weight_sum > 0.0 {
            sum / weight_sum
        } else {
            u.ambient_default
        }
    }
}
