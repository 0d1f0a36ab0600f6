//! Octahedral direction mapping shared by every probe map.
//!
//! `encode` folds the unit sphere onto the `[0, 1]²` square; `decode` is its inverse.
//! Texel `(x, y)` of a `res × res` tile covers `[x, x + 1) / res × [y, y + 1) / res`.

use glam::{UVec2, Vec2, Vec3};

#[inline]
fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Unit direction -> octahedral coordinates in `[0, 1]²`.
pub fn encode(dir: Vec3) -> Vec2 {
    let l1 = dir.x.abs() + dir.y.abs() + dir.z.abs();
    if l1 <= 0.0 {
        return Vec2::splat(0.5);
    }
    let n = dir / l1;
    let mut xy = Vec2::new(n.x, n.y);
    if n.z < 0.0 {
        xy = Vec2::new(
            (1.0 - n.y.abs()) * sign_not_zero(n.x),
            (1.0 - n.x.abs()) * sign_not_zero(n.y),
        );
    }
    xy * 0.5 + Vec2::splat(0.5)
}

/// Octahedral coordinates in `[0, 1]²` -> unit direction.
pub fn decode(uv: Vec2) -> Vec3 {
    let f = uv * 2.0 - Vec2::ONE;
    let mut n = Vec3::new(f.x, f.y, 1.0 - f.x.abs() - f.y.abs());
    let t = (-n.z).max(0.0);
    n.x += if n.x >= 0.0 { -t } else { t };
    n.y += if n.y >= 0.0 { -t } else { t };
    n.normalize()
}

/// Texel of a `res × res` tile containing `dir`.
pub fn texel_of(dir: Vec3, res: u32) -> UVec2 {
    let uv = encode(dir) * res as f32;
    let max = res.saturating_sub(1) as f32;
    UVec2::new(uv.x.floor().clamp(0.0, max) as u32, uv.y.floor().clamp(0.0, max) as u32)
}

/// Direction through the centre of texel `(x, y)`.
pub fn texel_direction(x: u32, y: u32, res: u32) -> Vec3 {
    decode((Vec2::new(x as f32, y as f32) + Vec2::splat(0.5)) / res as f32)
}

/// Texel-centre directions of a `res × res` tile, indexed `x + y * res`.
pub fn direction_table(res: u32) -> Vec<Vec3> {
    (0..res * res).map(|t| texel_direction(t % res, t / res, res)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_directions() {
        let dirs = [
            Vec3::X,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
            Vec3::new(0.3, -0.8, 0.5).normalize(),
            Vec3::new(-0.6, 0.1, -0.79).normalize(),
        ];
        for d in dirs {
            let back = decode(encode(d));
            assert!((back - d).length() < 1e-5, "{d:?} -> {back:?}");
        }
    }

    #[test]
    fn encode_stays_in_unit_square() {
        for i in 0..64 {
            let theta = i as f32 * 0.37;
            let phi = i as f32 * 0.91;
            let d = Vec3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
            let uv = encode(d);
            assert!((0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y));
        }
    }

    #[test]
    fn texel_direction_maps_back_to_its_texel() {
        let res = 8;
        for y in 0..res {
            for x in 0..res {
                assert_eq!(texel_of(texel_direction(x, y, res), res), UVec2::new(x, y));
            }
        }
    }

    #[test]
    fn direction_table_is_unit_length() {
        let table = direction_table(16);
        assert_eq!(table.len(), 256);
        assert!(table.iter().all(|d| (d.length() - 1.0).abs() < 1e-5));
    }
}
