use glam::{Vec3, Vec4};
use rayon::prelude::*;

use crate::field::{ambient_faces, AMBIENT_TILE};
use crate::lighting::{eval_ambient_cube, temporal_blend, AMBIENT_FACES};
use crate::octahedral;
use crate::probe_grid::Atlas;
use crate::ray::Ray;
use crate::uniforms::FrameUniforms;

/// Weighted mean of a probe's ray samples; `None` when no ray carries weight.
fn gather(rays: &[Ray], samples: &[Vec4], first: usize, count: usize, weight: impl Fn(Vec3) -> f32) -> Option<Vec3> {
    let mut sum = Vec3::ZERO;
    let mut weight_sum = 0.0;
    for r in first..first + count {
        let w = weight(rays[r].direction);
        if w > 0.0 {
            sum += samples[r].truncate() * w;
            weight_sum += w;
        }
    }
    (weight_sum > 0.0).then(|| sum / weight_sum)
}

/// Ambient cube: cosine-weighted mean per face, blended into the three channel atlases.
pub fn ambient(u: &FrameUniforms, rays: &[Ray], samples: &[Vec4], ambient: &mut [Atlas<f32>; 3]) {
    let layout = *ambient[0].layout();
    let per_probe = u.rays_per_probe() as usize;
    let b = u.blend_factor;
    let [red, green, blue] = ambient;
    red.as_mut_slice()
        .par_iter_mut()
        .zip(green.as_mut_slice().par_iter_mut())
        .zip(blue.as_mut_slice().par_iter_mut())
        .enumerate()
        .for_each(|(i, ((r, g), bl))| {
            let (probe, tx, ty) = layout.locate(i);
            let face = AMBIENT_FACES[(tx + ty * AMBIENT_TILE.0) as usize];
            let old = Vec3::new(*r, *g, *bl);
            let fresh = gather(rays, samples, probe as usize * per_probe, per_probe, |d| face.dot(d).max(0.0))
                .unwrap_or(old);
            let new = temporal_blend(old, fresh, b);
            (*r, *g, *bl) = (new.x, new.y, new.z);
        });
}

/// Radiance map from the freshly blended ambient cube; specular map from a sharp lobe
/// gather of the raw samples. Runs strictly after `ambient`.
pub fn radiance(
    u: &FrameUniforms,
    rays: &[Ray],
    samples: &[Vec4],
    ambient: &[Atlas<f32>; 3],
    radiance: &mut Atlas<Vec4>,
    specular: Option<&mut Atlas<Vec4>>,
) {
    let b = u.blend_factor;
    let res = u.radiance_resolution;
    let layout = *radiance.layout();
    radiance.as_mut_slice().par_iter_mut().enumerate().for_each(|(i, texel)| {
        let (probe, tx, ty) = layout.locate(i);
        let dir = octahedral::texel_direction(tx, ty, res);
        let irradiance = eval_ambient_cube(&ambient_faces(ambient, probe), dir);
        *texel = temporal_blend(*texel, irradiance.extend(1.0), b);
    });

    let Some(specular) = specular else { return };
    if !u.specular_enabled() {
        return;
    }
    let per_probe = u.rays_per_probe() as usize;
    let layout = *specular.layout();
    specular.as_mut_slice().par_iter_mut().enumerate().for_each(|(i, texel)| {
        let (probe, tx, ty) = layout.locate(i);
        let dir = octahedral::texel_direction(tx, ty, res);
        let lobe = |d: Vec3| dir.dot(d).max(0.0).powf(u.specular_sharpness);
        if let Some(fresh) = gather(rays, samples, probe as usize * per_probe, per_probe, lobe) {
            *texel = temporal_blend(*texel, fresh.extend(1.0), b);
        }
    });
}

/// Blends this frame's octahedral variance map into the persistent depth map.
pub fn shadow(u: &FrameUniforms, octahedral_map: &Atlas<Vec4>, depth: &mut Atlas<Vec4>) {
    let b = u.blend_factor;
    depth
        .as_mut_slice()
        .par_iter_mut()
        .zip(octahedral_map.as_slice().par_iter())
        .for_each(|(d, o)| *d = temporal_blend(*d, *o, b));
}
