//! Flattened triangle geometry consumed by the tracer.

use glam::{Vec2, Vec3};

use crate::accel::Aabb;
use crate::error::{RenderError, RenderResult};

/// Non-indexed triangle list: vertices `3t`, `3t + 1`, `3t + 2` form triangle `t`.
#[derive(Clone, Debug, Default)]
pub struct SceneGeometry {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    colors: Vec<Vec3>,
}

impl SceneGeometry {
    pub fn new(positions: Vec<Vec3>, normals: Vec<Vec3>, colors: Vec<Vec3>) -> RenderResult<Self> {
        if positions.len() != normals.len() || positions.len() != colors.len() {
            return Err(RenderError::InvalidScene(format!(
                "attribute count mismatch: {} positions, {} normals, {} colors",
                positions.len(),
                normals.len(),
                colors.len()
            )));
        }
        if positions.len() % 3 != 0 {
            return Err(RenderError::InvalidScene(format!(
                "vertex count {} is not a multiple of 3",
                positions.len()
            )));
        }
        if positions.iter().any(|p| !p.is_finite()) {
            return Err(RenderError::InvalidScene("non-finite vertex position".to_string()));
        }
        Ok(Self { positions, normals, colors })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn colors(&self) -> &[Vec3] {
        &self.colors
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Vertex min/max box; `Aabb::EMPTY` for an empty scene.
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.positions)
    }

    /// Barycentric interpolation of normal and colour over triangle `primitive`.
    /// The normal is not normalized; degenerate normals come back as zero.
    pub fn interpolate(&self, primitive: u32, barycentrics: Vec2) -> (Vec3, Vec3) {
        let base = primitive as usize * 3;
        let w = Vec3::new(1.0 - barycentrics.x - barycentrics.y, barycentrics.x, barycentrics.y);
        let normal = self.normals[base] * w.x + self.normals[base + 1] * w.y + self.normals[base + 2] * w.z;
        let color = self.colors[base] * w.x + self.colors[base + 1] * w.y + self.colors[base + 2] * w.z;
        (normal, color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_attributes() {
        let err = SceneGeometry::new(vec![Vec3::ZERO; 3], vec![Vec3::Z; 2], vec![Vec3::ONE; 3]);
        assert!(matches!(err, Err(RenderError::InvalidScene(_))));
    }

    #[test]
    fn rejects_partial_triangles() {
        let err = SceneGeometry::new(vec![Vec3::ZERO; 4], vec![Vec3::Z; 4], vec![Vec3::ONE; 4]);
        assert!(err.is_err());
    }

    #[test]
    fn interpolates_with_vertex_weights() {
        let scene = SceneGeometry::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![Vec3::Z; 3],
            vec![Vec3::X, Vec3::Y, Vec3::Z],
        )
        .unwrap();
        let (n, c) = scene.interpolate(0, Vec2::new(0.25, 0.5));
        assert_eq!(n, Vec3::Z);
        assert!((c - Vec3::new(0.25, 0.25, 0.5)).length() < 1e-6);
    }
}
