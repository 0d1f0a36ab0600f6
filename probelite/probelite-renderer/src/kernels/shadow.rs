use glam::Vec4;
use rayon::prelude::*;

use crate::octahedral;
use crate::probe_grid::Atlas;
use crate::ray::{Intersection, Ray, PAYLOAD_DIRECT, PAYLOAD_DISTANCE};
use crate::uniforms::FrameUniforms;

/// A shadow ray occludes when it carries light and the any-hit query found something.
#[inline]
pub fn is_occluded(shadow: &Ray, hit: &Intersection) -> bool {
    shadow.is_active() && shadow.payload[PAYLOAD_DIRECT].w > 0.0 && hit.is_hit()
}

/// Pass A: adds visible direct light to each sample and, for probe rays, records
/// `(d, d², occluded, 1)` of the primary hit.
pub fn resolve_samples(shadow_rays: &[Ray], shadow_hits: &[Intersection], samples: &mut [Vec4], new_shadow: Option<&mut [Vec4]>) {
    samples
        .par_iter_mut()
        .zip(shadow_rays.par_iter().zip(shadow_hits.par_iter()))
        .for_each(|(sample, (shadow, hit))| {
            if shadow.is_active() && !is_occluded(shadow, hit) {
                let direct = shadow.payload[PAYLOAD_DIRECT];
                *sample += Vec4::new(direct.x, direct.y, direct.z, 0.0);
            }
        });

    if let Some(new_shadow) = new_shadow {
        new_shadow
            .par_iter_mut()
            .zip(shadow_rays.par_iter().zip(shadow_hits.par_iter()))
            .for_each(|(out, (shadow, hit))| {
                let d = shadow.payload[PAYLOAD_DISTANCE].x;
                let occluded = if is_occluded(shadow, hit) { 1.0 } else { 0.0 };
                *out = Vec4::new(d, d * d, occluded, 1.0);
            });
    }
}

/// Pass B: per depth texel, cosine-power (`variance_sharpness`) filter of the probe's
/// fresh samples into the octahedral variance map. Texels no sample reaches keep their value.
pub fn filter_variance(u: &FrameUniforms, rays: &[Ray], new_shadow: &[Vec4], octahedral_map: &mut Atlas<Vec4>) {
    let layout = *octahedral_map.layout();
    let per_probe = u.rays_per_probe() as usize;
    let res = u.shadow_resolution;
    octahedral_map.as_mut_slice().par_iter_mut().enumerate().for_each(|(i, texel)| {
        let (probe, tx, ty) = layout.locate(i);
        let dir = octahedral::texel_direction(tx, ty, res);
        let first = probe as usize * per_probe;
        let mut sum = Vec4::ZERO;
        let mut weight_sum = 0.0;
        for r in first..first + per_probe {
            let w = dir.dot(rays[r].direction).max(0.0).powf(u.variance_sharpness);
            if w > 0.0 {
                sum += new_shadow[r] * w;
                weight_sum += w;
            }
        }
        if weight_sum > 0.0 {
            let m = sum / weight_sum;
            *texel = Vec4::new(m.x, m.y, m.z, 1.0);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn lit_shadow_ray(distance: f32) -> Ray {
        let mut r = Ray::new(Vec3::ZERO, Vec3::Y, 0.0, 100.0);
        r.payload[PAYLOAD_DIRECT] = Vec4::new(0.5, 0.25, 1.0, 1.0);
        r.payload[PAYLOAD_DISTANCE].x = distance;
        r
    }

    #[test]
    fn occluded_rays_add_no_direct_light() {
        let shadow = [lit_shadow_ray(2.0), lit_shadow_ray(3.0)];
        let hits = [Intersection::MISS, Intersection { distance: 1.0, ..Intersection::MISS }];
        let mut samples = [Vec4::new(0.1, 0.1, 0.1, 1.0); 2];
        let mut new_shadow = [Vec4::ZERO; 2];
        resolve_samples(&shadow, &hits, &mut samples, Some(&mut new_shadow));
        assert!((samples[0] - Vec4::new(0.6, 0.35, 1.1, 1.0)).abs().max_element() < 1e-6);
        assert_eq!(samples[1], Vec4::new(0.1, 0.1, 0.1, 1.0));
        assert_eq!(new_shadow[0], Vec4::new(2.0, 4.0, 0.0, 1.0));
        assert_eq!(new_shadow[1], Vec4::new(3.0, 9.0, 1.0, 1.0));
    }
}
