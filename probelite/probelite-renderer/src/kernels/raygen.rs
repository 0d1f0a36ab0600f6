use glam::{Vec2, Vec3};
use rayon::prelude::*;

use crate::octahedral;
use crate::ray::Ray;
use crate::uniforms::{FrameUniforms, RANDOM_COUNT};

/// Far clip for camera rays.
pub const CAMERA_FAR: f32 = 1.0e30;

/// Random-buffer entry that jitters ray `texel` of probe `probe`.
#[inline]
pub fn jitter_index(probe: u32, texel: u32) -> usize {
    (texel as usize + probe as usize * 37) % RANDOM_COUNT
}

/// One ray per probe texel: ray `r` belongs to probe `r / res²`, texel `r % res²`.
pub fn probe_rays(u: &FrameUniforms, directions: &[Vec3], random: &[Vec2; RANDOM_COUNT], rays: &mut [Ray]) {
    let grid = u.grid();
    let res = u.probe_resolution;
    let per_probe = u.rays_per_probe();
    let jitter = u.jitter();
    rays.par_iter_mut().enumerate().for_each(|(r, ray)| {
        let probe = r as u32 / per_probe;
        let texel = r as u32 % per_probe;
        let direction = if jitter {
            let xi = random[jitter_index(probe, texel)];
            let cell = Vec2::new((texel % res) as f32, (texel / res) as f32);
            octahedral::decode((cell + xi) / res as f32)
        } else {
            directions[texel as usize]
        };
        *ray = Ray::new(grid.position_of(probe), direction, 0.0, u.max_distance);
    });
}

/// One primary ray per pixel through the pre-scaled camera basis.
pub fn camera_rays(u: &FrameUniforms, rays: &mut [Ray]) {
    let (w, h) = (u.view_width.max(1), u.view_height.max(1));
    rays.par_iter_mut().enumerate().for_each(|(i, ray)| {
        let (x, y) = (i as u32 % w, i as u32 / w);
        let ndc = Vec2::new(
            (x as f32 + 0.5) / w as f32 * 2.0 - 1.0,
            1.0 - (y as f32 + 0.5) / h as f32 * 2.0,
        );
        let dir = (u.camera_forward + u.camera_right * ndc.x + u.camera_up * ndc.y).normalize_or(u.camera_forward);
        *ray = Ray::new(u.camera_position, dir, 0.0, CAMERA_FAR);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeliteConfig;
    use crate::field::FieldLayout;
    use crate::probe_grid::ProbeGrid;
    use crate::uniforms::{random_block, SceneCounts};
    use render_api::{Camera, Light};

    fn uniforms(jitter: bool) -> FrameUniforms {
        let config = ProbeliteConfig { probe_resolution: 4, jitter_rays: jitter, ..Default::default() };
        let grid = ProbeGrid::new([2, 2, 2], Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        let layout = FieldLayout::from_config(grid, &config);
        FrameUniforms::build(&config, &layout, SceneCounts::default(), &Camera::default(), &Light::default(), (8, 4), 5, false)
    }

    #[test]
    fn probe_rays_are_reproducible() {
        let u = uniforms(true);
        let table = octahedral::direction_table(4);
        let random = random_block(11, 5);
        let mut a = vec![Ray::default(); 8 * 16];
        let mut b = vec![Ray::default(); 8 * 16];
        probe_rays(&u, &table, &random, &mut a);
        probe_rays(&u, &table, &random, &mut b);
        assert!(a.iter().zip(&b).all(|(x, y)| bytemuck::bytes_of(x) == bytemuck::bytes_of(y)));
    }

    #[test]
    fn jitter_stays_inside_the_texel() {
        let u = uniforms(true);
        let table = octahedral::direction_table(4);
        let mut rays = vec![Ray::default(); 8 * 16];
        probe_rays(&u, &table, &random_block(3, 5), &mut rays);
        for (r, ray) in rays.iter().enumerate() {
            let texel = r as u32 % 16;
            let t = octahedral::texel_of(ray.direction, 4);
            assert_eq!((t.x, t.y), (texel % 4, texel / 4));
            assert_eq!(ray.origin, u.grid().position_of(r as u32 / 16));
        }
    }

    #[test]
    fn without_jitter_the_table_is_used_verbatim() {
        let u = uniforms(false);
        let table = octahedral::direction_table(4);
        let mut rays = vec![Ray::default(); 8 * 16];
        probe_rays(&u, &table, &random_block(3, 5), &mut rays);
        assert!(rays.iter().enumerate().all(|(r, ray)| ray.direction == table[r % 16]));
    }

    #[test]
    fn centre_pixel_looks_forward() {
        let mut u = uniforms(false);
        u.view_width = 3;
        u.view_height = 3;
        let mut rays = vec![Ray::default(); 9];
        camera_rays(&u, &mut rays);
        assert!((rays[4].direction - u.camera_forward).length() < 1e-6);
        assert!(rays[0].direction.y > 0.0 && rays[0].direction.x < 0.0);
    }
}
