use glam::Vec3;
use rayon::prelude::*;

use crate::accel::Bvh;
use crate::ray::{Intersection, Ray};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntersectMode {
    /// Closest hit with primitive and barycentrics.
    Nearest,
    /// Any occluder; only `distance` is written.
    Any,
}

/// Queries every ray against the BVH. Inactive rays always miss.
pub fn intersect(mode: IntersectMode, bvh: &Bvh, positions: &[Vec3], rays: &[Ray], hits: &mut [Intersection]) {
    hits.par_iter_mut().zip(rays.par_iter()).for_each(|(hit, ray)| {
        *hit = if !ray.is_active() {
            Intersection::MISS
        } else {
            match mode {
                IntersectMode::Nearest => bvh
                    .intersect_nearest(positions, ray.origin, ray.direction, ray.t_min, ray.t_max)
                    .map_or(Intersection::MISS, |h| Intersection {
                        distance: h.distance,
                        primitive: h.primitive,
                        barycentrics: h.barycentrics,
                    }),
                IntersectMode::Any => bvh
                    .intersect_any(positions, ray.origin, ray.direction, ray.t_min, ray.t_max)
                    .map_or(Intersection::MISS, |t| Intersection { distance: t, ..Intersection::MISS }),
            }
        };
    });
}
