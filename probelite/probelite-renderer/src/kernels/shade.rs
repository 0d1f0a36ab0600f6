use glam::{Vec2, Vec3, Vec4};
use rayon::prelude::*;

use crate::lighting::FieldSampler;
use crate::ray::{Intersection, Ray, PAYLOAD_DIRECT, PAYLOAD_DISTANCE};
use crate::scene::SceneGeometry;
use crate::uniforms::{FrameUniforms, LIGHT_AREA, RANDOM_COUNT};

/// Shadow rays towards a directional light are unbounded.
pub const SHADOW_FAR: f32 = 1.0e30;
/// Clamp on the squared distance to an area-light sample.
pub const AREA_LIGHT_MIN_DISTANCE_SQ: f32 = 0.25;

/// Random-buffer entry used for the area-light sample of ray `ray`.
#[inline]
pub fn light_sample_index(ray: usize) -> usize {
    (ray * 61 + 17) % RANDOM_COUNT
}

/// Direction to the light, shadow-ray length and incoming radiance at `p`.
pub fn sample_light(u: &FrameUniforms, p: Vec3, xi: Vec2) -> Option<(Vec3, f32, Vec3)> {
    if u.light_kind == LIGHT_AREA {
        let target = u.light_position + u.light_right * (2.0 * xi.x - 1.0) + u.light_up * (2.0 * xi.y - 1.0);
        let to_light = target - p;
        let dist = to_light.length();
        if dist <= 0.0 {
            return None;
        }
        let l = to_light / dist;
        let cos_light = (-l).dot(u.light_direction).max(0.0);
        if cos_light <= 0.0 {
            return None;
        }
        let area = 4.0 * u.light_right.cross(u.light_up).length();
        let radiance = u.light_color * (cos_light * area / (dist * dist).max(AREA_LIGHT_MIN_DISTANCE_SQ));
        Some((l, dist, radiance))
    } else {
        let l = -u.light_direction;
        (l != Vec3::ZERO).then_some((l, SHADOW_FAR, u.light_color))
    }
}

pub struct ShadeInputs<'a> {
    pub uniforms: &'a FrameUniforms,
    pub random: &'a [Vec2; RANDOM_COUNT],
    pub scene: &'a SceneGeometry,
    pub field: FieldSampler<'a>,
}

/// Turns hit records into radiance samples (`w = 1` on hits) and one shadow ray each.
pub fn shade(inputs: &ShadeInputs<'_>, rays: &[Ray], hits: &[Intersection], samples: &mut [Vec4], shadow_rays: &mut [Ray]) {
    let u = inputs.uniforms;
    samples
        .par_iter_mut()
        .zip(shadow_rays.par_iter_mut())
        .enumerate()
        .for_each(|(i, (sample, shadow))| {
            let ray = &rays[i];
            let hit = &hits[i];
            if !hit.is_hit() {
                *sample = u.sky_color.extend(0.0);
                *shadow = Ray::inactive();
                shadow.payload[PAYLOAD_DISTANCE].x = u.max_distance;
                return;
            }

            let t = hit.distance;
            let p = ray.at(t);
            let (n, albedo) = inputs.scene.interpolate(hit.primitive, hit.barycentrics);
            let mut n = n.normalize_or(-ray.direction);
            if n.dot(ray.direction) > 0.0 {
                n = -n;
            }

            let indirect = albedo * inputs.field.irradiance(p, n) * u.indirect_intensity;
            *sample = indirect.extend(1.0);

            *shadow = Ray::inactive();
            if let Some((l, dist, radiance)) = sample_light(u, p, inputs.random[light_sample_index(i)]) {
                let n_dot_l = n.dot(l);
                if n_dot_l > 0.0 {
                    let origin = p + n * u.normal_bias;
                    let t_max = if dist >= SHADOW_FAR { SHADOW_FAR } else { (dist - u.normal_bias).max(0.0) };
                    *shadow = Ray::new(origin, l, 0.0, t_max);
                    shadow.payload[PAYLOAD_DIRECT] = (albedo * radiance * n_dot_l).extend(1.0);
                }
            }
            shadow.payload[PAYLOAD_DISTANCE].x = t;
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeliteConfig;
    use crate::field::{FieldLayout, ProbeTextures};
    use crate::probe_grid::ProbeGrid;
    use crate::uniforms::{random_block, SceneCounts};
    use render_api::{Camera, Light};

    #[test]
    fn miss_writes_sky_and_inactive_shadow_ray() {
        let config = ProbeliteConfig { sky_color: Vec3::new(0.5, 0.6, 0.7), ..Default::default() };
        let grid = ProbeGrid::new([1, 1, 1], Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        let layout = FieldLayout::from_config(grid, &config);
        let textures = ProbeTextures::allocate(&layout, Vec3::ZERO, false).unwrap();
        let light = Light::Directional { direction: [0.0, -1.0, 0.0], color: [1.0; 3] };
        let u = FrameUniforms::build(&config, &layout, SceneCounts::default(), &Camera::default(), &light, (1, 1), 0, false);
        let random = random_block(0, 0);
        let scene = SceneGeometry::new(
            vec![Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0)],
            vec![Vec3::NEG_Y; 3],
            vec![Vec3::ONE; 3],
        )
        .unwrap();
        let inputs = ShadeInputs {
            uniforms: &u,
            random: &random,
            scene: &scene,
            field: FieldSampler { uniforms: &u, radiance: &textures.radiance, depth: &textures.depth },
        };
        let rays = [Ray::new(Vec3::Y, Vec3::NEG_Y, 0.0, 10.0), Ray::new(Vec3::Y, Vec3::Y, 0.0, 10.0)];
        let hits = [
            Intersection { distance: 1.0, primitive: 0, barycentrics: Vec2::new(0.25, 0.25) },
            Intersection::MISS,
        ];
        let mut samples = [Vec4::ZERO; 2];
        let mut shadow = [Ray::default(); 2];
        shade(&inputs, &rays, &hits, &mut samples, &mut shadow);

        assert_eq!(samples[1], Vec4::new(0.5, 0.6, 0.7, 0.0));
        assert!(!shadow[1].is_active());
        assert_eq!(shadow[1].payload[PAYLOAD_DISTANCE].x, u.max_distance);

        // the stored normal faces away from the ray and gets flipped towards the light
        assert_eq!(samples[0].w, 1.0);
        assert!(shadow[0].is_active());
        assert_eq!(shadow[0].direction, Vec3::Y);
        assert!((shadow[0].origin.y - config.normal_bias).abs() < 1e-6);
        assert_eq!(shadow[0].payload[PAYLOAD_DIRECT], Vec4::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(shadow[0].payload[PAYLOAD_DISTANCE].x, 1.0);
    }

    fn area_uniforms() -> FrameUniforms {
        let config = ProbeliteConfig::default();
        let grid = ProbeGrid::new([1, 1, 1], Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        let layout = FieldLayout::from_config(grid, &config);
        let light = Light::Area {
            position: [0.0, 2.0, 0.0],
            forward: [0.0, -1.0, 0.0],
            right: [0.5, 0.0, 0.0],
            up: [0.0, 0.0, 0.5],
            color: [1.0, 1.0, 1.0],
        };
        FrameUniforms::build(&config, &layout, SceneCounts::default(), &Camera::default(), &light, (1, 1), 0, false)
    }

    #[test]
    fn area_light_falls_off_with_cosine_and_distance() {
        let u = area_uniforms();
        let centre = Vec2::splat(0.5);

        let (l, dist, below) = sample_light(&u, Vec3::ZERO, centre).unwrap();
        assert_eq!(l, Vec3::Y);
        assert_eq!(dist, 2.0);
        // unit emitter area, distance 2
        assert!((below - Vec3::splat(0.25)).length() < 1e-6, "{below}");

        let (_, _, off_axis) = sample_light(&u, Vec3::new(2.0, 0.0, 0.0), centre).unwrap();
        let expected = std::f32::consts::FRAC_1_SQRT_2 / 8.0;
        assert!((off_axis.x - expected).abs() < 1e-5, "{off_axis}");

        assert!(sample_light(&u, Vec3::new(0.0, 3.0, 0.0), centre).is_none(), "behind the emitter");
    }

    #[test]
    fn area_light_clamps_close_samples() {
        let u = area_uniforms();
        let (_, dist, close) = sample_light(&u, Vec3::new(0.0, 1.9, 0.0), Vec2::splat(0.5)).unwrap();
        assert!((dist - 0.1).abs() < 1e-5);
        let expected = 1.0 / AREA_LIGHT_MIN_DISTANCE_SQ;
        assert!((close - Vec3::splat(expected)).length() < 1e-4, "{close}");
    }
}
