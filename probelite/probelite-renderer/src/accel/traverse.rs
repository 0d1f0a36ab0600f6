use glam::{Vec2, Vec3};

use super::{Bvh, TRAVERSAL_STACK};

/// Nearest-hit result. `barycentrics` are the weights of vertices 1 and 2.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub distance: f32,
    pub primitive: u32,
    pub barycentrics: Vec2,
}

/// Two-sided Möller–Trumbore. Returns `(t, u, v)` for hits with `t` in `[t_min, t_max]`.
pub fn moller_trumbore(origin: Vec3, dir: Vec3, v0: Vec3, v1: Vec3, v2: Vec3, t_min: f32, t_max: f32) -> Option<(f32, f32, f32)> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t >= t_min && t <= t_max).then_some((t, u, v))
}

impl Bvh {
    /// Closest hit along the ray. `positions` is the flattened triangle list the tree was built from.
    pub fn intersect_nearest(&self, positions: &[Vec3], origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        let mut closest = t_max;
        self.walk(origin, dir, t_min, &mut closest, |tri, closest| {
            let base = tri as usize * 3;
            if let Some((t, u, v)) =
                moller_trumbore(origin, dir, positions[base], positions[base + 1], positions[base + 2], t_min, *closest)
            {
                *closest = t;
                best = Some(Hit { distance: t, primitive: tri, barycentrics: Vec2::new(u, v) });
            }
            false
        });
        best
    }

    /// First hit found in `[t_min, t_max]`, not necessarily the closest.
    pub fn intersect_any(&self, positions: &[Vec3], origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let mut found = None;
        let mut limit = t_max;
        self.walk(origin, dir, t_min, &mut limit, |tri, limit| {
            let base = tri as usize * 3;
            match moller_trumbore(origin, dir, positions[base], positions[base + 1], positions[base + 2], t_min, *limit) {
                Some((t, _, _)) => {
                    found = Some(t);
                    true
                }
                None => false,
            }
        });
        found
    }

    /// Stack traversal; `visit` returns true to stop early and may shrink `t_max`.
    fn walk(&self, origin: Vec3, dir: Vec3, t_min: f32, t_max: &mut f32, mut visit: impl FnMut(u32, &mut f32) -> bool) {
        if self.nodes.is_empty() {
            return;
        }
        let inv_dir = dir.recip();
        let mut stack = [0u32; TRAVERSAL_STACK];
        let mut top = 1;
        while top > 0 {
            top -= 1;
            let index = stack[top];
            let node = &self.nodes[index as usize];
            if node.aabb().hit(origin, inv_dir, t_min, *t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_first as usize;
                for &tri in &self.tri_indices[first..first + node.count as usize] {
                    if visit(tri, t_max) {
                        return;
                    }
                }
            } else if top + 2 <= TRAVERSAL_STACK {
                stack[top] = node.left_first;
                stack[top + 1] = index + 1;
                top += 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scattered_triangles(n: usize) -> Vec<Vec3> {
        // Deterministic pseudo-random soup.
        let mut s = 0x1234_5678u32;
        let mut next = move || {
            s ^= s << 13;
            s ^= s >> 17;
            s ^= s << 5;
            (s as f32 / u32::MAX as f32) * 10.0 - 5.0
        };
        let mut positions = Vec::with_capacity(n * 3);
        for _ in 0..n {
            let c = Vec3::new(next(), next(), next());
            positions.push(c);
            positions.push(c + Vec3::new(next(), next(), next()) * 0.2);
            positions.push(c + Vec3::new(next(), next(), next()) * 0.2);
        }
        positions
    }

    fn brute_force(positions: &[Vec3], origin: Vec3, dir: Vec3) -> Option<(f32, u32)> {
        let mut best: Option<(f32, u32)> = None;
        for (i, tri) in positions.chunks_exact(3).enumerate() {
            let limit = best.map_or(f32::MAX, |b| b.0);
            if let Some((t, _, _)) = moller_trumbore(origin, dir, tri[0], tri[1], tri[2], 0.0, limit) {
                best = Some((t, i as u32));
            }
        }
        best
    }

    #[test]
    fn nearest_agrees_with_brute_force() {
        let positions = scattered_triangles(300);
        let bvh = Bvh::build(&positions).unwrap();
        for i in 0..200 {
            let a = i as f32 * 0.61;
            let b = i as f32 * 0.23;
            let origin = Vec3::new(a.sin() * 8.0, b.cos() * 8.0, (a + b).sin() * 8.0);
            let dir = (-origin + Vec3::new(b.sin(), a.cos(), 0.5)).normalize();
            let expected = brute_force(&positions, origin, dir);
            let got = bvh.intersect_nearest(&positions, origin, dir, 0.0, f32::MAX);
            match (expected, got) {
                (None, None) => {}
                (Some((t, _)), Some(hit)) => assert!((t - hit.distance).abs() < 1e-4, "ray {i}: {t} vs {}", hit.distance),
                (e, g) => panic!("ray {i}: brute force {e:?}, bvh {g:?}"),
            }
            assert_eq!(expected.is_some(), bvh.intersect_any(&positions, origin, dir, 0.0, f32::MAX).is_some());
        }
    }

    #[test]
    fn empty_tree_always_misses() {
        let bvh = Bvh::default();
        assert!(bvh.intersect_nearest(&[], Vec3::ZERO, Vec3::X, 0.0, f32::MAX).is_none());
        assert!(bvh.intersect_any(&[], Vec3::ZERO, Vec3::X, 0.0, f32::MAX).is_none());
    }

    #[test]
    fn barycentrics_weight_vertices_one_and_two() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let bvh = Bvh::build(&positions).unwrap();
        let hit = bvh
            .intersect_nearest(&positions, Vec3::new(0.25, 0.5, 1.0), Vec3::NEG_Z, 0.0, 10.0)
            .unwrap();
        assert!((hit.distance - 1.0).abs() < 1e-6);
        assert!((hit.barycentrics - glam::Vec2::new(0.25, 0.5)).length() < 1e-6);
    }
}
