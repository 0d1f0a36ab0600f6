//! Probe grid geometry and the octahedral atlases that store per-probe tiles.

use glam::{UVec3, Vec3};

use crate::accel::Aabb;
use crate::error::{RenderError, RenderResult};

/// Fitted axes never get thinner than this fraction of the widest axis, so a planar
/// scene still gets distinct probe layers on both sides of the plane.
pub const MIN_AXIS_FRACTION: f32 = 0.25;

/// Absolute floor for a fitted axis, for scenes that collapse to a line or a point.
pub const MIN_AXIS_EXTENT: f32 = 1.0e-2;

/// Uniform `dims` grid of probes inside the box `center ± extent / 2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeGrid {
    pub dims: UVec3,
    pub center: Vec3,
    pub extent: Vec3,
}

impl ProbeGrid {
    pub fn new(dims: [u32; 3], center: Vec3, extent: Vec3) -> RenderResult<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(RenderError::InvalidConfig(format!("probe grid dims must be >= 1, got {dims:?}")));
        }
        if dims.iter().try_fold(1u32, |acc, &d| acc.checked_mul(d)).is_none() {
            return Err(RenderError::InvalidConfig(format!("probe grid {dims:?} has more than u32::MAX probes")));
        }
        if !center.is_finite() || !extent.is_finite() || extent.cmplt(Vec3::ZERO).any() {
            return Err(RenderError::InvalidConfig(format!(
                "probe volume must be finite and non-negative, got center {center} extent {extent}"
            )));
        }
        Ok(Self { dims: UVec3::from_array(dims), center, extent })
    }

    /// Volume around `bounds` scaled by `margin`; an invalid box yields the empty grid.
    /// Flat axes are widened to `MIN_AXIS_FRACTION` of the widest one.
    pub fn fit(bounds: &Aabb, dims: [u32; 3], margin: f32) -> RenderResult<Self> {
        if !bounds.is_valid() {
            return Self::new(dims, Vec3::ZERO, Vec3::ZERO);
        }
        let extent = bounds.extent() * margin;
        let floor = (extent.max_element() * MIN_AXIS_FRACTION).max(MIN_AXIS_EXTENT);
        Self::new(dims, bounds.center(), extent.max(Vec3::splat(floor)))
    }

    /// A zero-extent volume holds no probes.
    pub fn is_empty(&self) -> bool {
        self.extent == Vec3::ZERO
    }

    pub fn probe_count(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.dims.x * self.dims.y * self.dims.z
        }
    }

    /// Probes in one `k` layer (one atlas row).
    pub fn probes_per_layer(&self) -> u32 {
        self.dims.x * self.dims.y
    }

    pub fn spacing(&self) -> Vec3 {
        self.extent / self.dims.as_vec3()
    }

    pub fn probe_position(&self, i: u32, j: u32, k: u32) -> Vec3 {
        self.center - self.extent * 0.5 + (UVec3::new(i, j, k).as_vec3() + Vec3::splat(0.5)) * self.spacing()
    }

    pub fn index(&self, i: u32, j: u32, k: u32) -> u32 {
        i + j * self.dims.x + k * self.dims.x * self.dims.y
    }

    pub fn coords(&self, index: u32) -> UVec3 {
        let layer = self.probes_per_layer();
        UVec3::new(index % self.dims.x, (index % layer) / self.dims.x, index / layer)
    }

    pub fn position_of(&self, index: u32) -> Vec3 {
        let c = self.coords(index);
        self.probe_position(c.x, c.y, c.z)
    }

    /// Upper bound for probe ray length: 1.5 × the volume diagonal.
    pub fn max_ray_distance(&self) -> f32 {
        self.extent.length() * 1.5
    }
}

/// Placement of per-probe tiles inside one 2D atlas.
///
/// Probe `p` occupies tile column `p % (gx * gy)` and row `p / (gx * gy)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasLayout {
    pub tiles_per_row: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl AtlasLayout {
    pub fn for_grid(grid: &ProbeGrid, tile_width: u32, tile_height: u32) -> Self {
        if grid.is_empty() {
            return Self::single_texel();
        }
        Self { tiles_per_row: grid.probes_per_layer(), rows: grid.dims.z, tile_width, tile_height }
    }

    /// 1×1 atlas used by the empty field.
    pub fn single_texel() -> Self {
        Self { tiles_per_row: 1, rows: 1, tile_width: 1, tile_height: 1 }
    }

    pub fn width(&self) -> u32 {
        self.tiles_per_row * self.tile_width
    }

    pub fn height(&self) -> u32 {
        self.rows * self.tile_height
    }

    pub fn texel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn texels_per_tile(&self) -> u32 {
        self.tile_width * self.tile_height
    }

    /// Linear atlas index of texel `(tx, ty)` in probe `probe`'s tile.
    pub fn texel_index(&self, probe: u32, tx: u32, ty: u32) -> usize {
        let x = (probe % self.tiles_per_row) * self.tile_width + tx;
        let y = (probe / self.tiles_per_row) * self.tile_height + ty;
        y as usize * self.width() as usize + x as usize
    }

    /// Inverse of `texel_index`: `(probe, tx, ty)` of a linear atlas index.
    pub fn locate(&self, index: usize) -> (u32, u32, u32) {
        let width = self.width() as usize;
        let (x, y) = ((index % width) as u32, (index / width) as u32);
        let probe = (y / self.tile_height) * self.tiles_per_row + x / self.tile_width;
        (probe, x % self.tile_width, y % self.tile_height)
    }
}

/// Host-side atlas storage, row-major, `layout.width()` texels per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Atlas<T> {
    layout: AtlasLayout,
    data: Vec<T>,
}

impl<T: Copy> Atlas<T> {
    pub fn filled(layout: AtlasLayout, value: T) -> RenderResult<Self> {
        let n = layout.texel_count();
        let mut data = Vec::new();
        data.try_reserve_exact(n).map_err(|e| {
            RenderError::exhausted(format!("atlas {}x{}: {e}", layout.width(), layout.height()))
        })?;
        data.resize(n, value);
        Ok(Self { layout, data })
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    pub fn get(&self, probe: u32, tx: u32, ty: u32) -> T {
        self.data[self.layout.texel_index(probe, tx, ty)]
    }

    pub fn set(&mut self, probe: u32, tx: u32, ty: u32, value: T) {
        let i = self.layout.texel_index(probe, tx, ty);
        self.data[i] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_cubed_grid_sits_at_half_offsets() {
        let grid = ProbeGrid::new([2, 2, 2], Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        let mut positions: Vec<Vec3> = (0..grid.probe_count()).map(|p| grid.position_of(p)).collect();
        positions.sort_by(|a, b| a.to_array().partial_cmp(&b.to_array()).unwrap());
        let mut expected = Vec::new();
        for x in [-0.5, 0.5] {
            for y in [-0.5, 0.5] {
                for z in [-0.5, 0.5] {
                    expected.push(Vec3::new(x, y, z));
                }
            }
        }
        assert_eq!(positions, expected);
    }

    #[test]
    fn positions_are_distinct_and_inside_the_volume() {
        let grid = ProbeGrid::new([3, 2, 4], Vec3::new(1.0, -2.0, 0.5), Vec3::new(6.0, 2.0, 8.0)).unwrap();
        let lo = grid.center - grid.extent * 0.5;
        let hi = grid.center + grid.extent * 0.5;
        let positions: Vec<Vec3> = (0..grid.probe_count()).map(|p| grid.position_of(p)).collect();
        assert_eq!(positions.len(), 24);
        for (a, pa) in positions.iter().enumerate() {
            assert!(pa.cmpge(lo).all() && pa.cmple(hi).all());
            for pb in &positions[a + 1..] {
                assert!(pa.distance(*pb) > 1e-4);
            }
        }
        // neighbours along x are one spacing apart
        let d = grid.probe_position(1, 0, 0) - grid.probe_position(0, 0, 0);
        assert!((d - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn index_and_coords_agree() {
        let grid = ProbeGrid::new([4, 3, 2], Vec3::ZERO, Vec3::ONE).unwrap();
        for p in 0..grid.probe_count() {
            let c = grid.coords(p);
            assert_eq!(grid.index(c.x, c.y, c.z), p);
        }
    }

    #[test]
    fn zero_extent_grid_is_empty() {
        let grid = ProbeGrid::fit(&Aabb::EMPTY, [12, 8, 10], 1.05).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.probe_count(), 0);
        assert_eq!(AtlasLayout::for_grid(&grid, 16, 16), AtlasLayout::single_texel());
    }

    #[test]
    fn flat_scene_keeps_layers_apart() {
        let bounds = Aabb::from_points(&[Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0)]);
        let grid = ProbeGrid::fit(&bounds, [2, 2, 2], 1.05).unwrap();
        assert!((grid.extent.y - 2.1 * MIN_AXIS_FRACTION).abs() < 1e-5);
        let positions: Vec<Vec3> = (0..grid.probe_count()).map(|p| grid.position_of(p)).collect();
        for (a, pa) in positions.iter().enumerate() {
            for pb in &positions[a + 1..] {
                assert!(pa.distance(*pb) > 1e-3);
            }
        }
        // one layer below the plane, one above
        assert!(grid.probe_position(0, 0, 0).y < 0.0 && grid.probe_position(0, 1, 0).y > 0.0);
    }

    #[test]
    fn single_point_scene_gets_a_small_volume() {
        let bounds = Aabb::from_points(&[Vec3::ONE]);
        let grid = ProbeGrid::fit(&bounds, [2, 2, 2], 1.05).unwrap();
        assert!(!grid.is_empty());
        assert_eq!(grid.extent, Vec3::splat(MIN_AXIS_EXTENT));
    }

    #[test]
    fn probe_count_overflow_is_rejected() {
        let err = ProbeGrid::new([65536, 65536, 2], Vec3::ZERO, Vec3::ONE).unwrap_err();
        assert!(matches!(err, RenderError::InvalidConfig(_)));
    }

    #[test]
    fn atlas_packs_layers_into_rows() {
        let grid = ProbeGrid::new([2, 3, 4], Vec3::ZERO, Vec3::ONE).unwrap();
        let layout = AtlasLayout::for_grid(&grid, 3, 2);
        assert_eq!((layout.width(), layout.height()), (18, 8));
        // probe 7 is in layer 1, column 1
        assert_eq!(layout.texel_index(7, 0, 0), 2 * 18 + 3);
        assert_eq!(layout.texel_index(7, 2, 1), 3 * 18 + 5);
        for i in 0..layout.texel_count() {
            let (p, tx, ty) = layout.locate(i);
            assert_eq!(layout.texel_index(p, tx, ty), i);
        }
    }
}
