//! Extracted meshes to world-space triangle soup.

use glam::{Mat3, Mat4, Vec3};
use render_api::{ExtractedMesh, VERTEX_STRIDE};

/// One mesh expanded to three vertices per triangle, in world space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlattenedMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub colors: Vec<Vec3>,
}

impl FlattenedMesh {
    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn append(&mut self, other: &FlattenedMesh) {
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.colors.extend_from_slice(&other.colors);
    }
}

/// Applies the mesh transform (normals through the inverse transpose) and expands the
/// index buffer. Triangles that reference a missing vertex or end up non-finite are dropped.
pub fn flatten_mesh(mesh: &ExtractedMesh) -> FlattenedMesh {
    let vertices: Vec<[f32; 6]> = mesh
        .vertex_data
        .chunks_exact(VERTEX_STRIDE)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    let indices: Vec<u32> = mesh.index_data.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();

    let transform = Mat4::from_cols_array(&mesh.transform);
    let linear = Mat3::from_mat4(transform);
    let normal_matrix = if linear.determinant().abs() > 1e-12 { linear.inverse().transpose() } else { linear };
    let color = Vec3::from_array(mesh.base_color);

    let mut out = FlattenedMesh::default();
    let (mut out_of_range, mut non_finite) = (0usize, 0usize);
    for tri in indices.chunks_exact(3) {
        let Some(corners) = tri
            .iter()
            .map(|&i| vertices.get(i as usize))
            .collect::<Option<Vec<_>>>()
        else {
            out_of_range += 1;
            continue;
        };
        let positions: Vec<Vec3> =
            corners.iter().map(|v| transform.transform_point3(Vec3::new(v[0], v[1], v[2]))).collect();
        if !color.is_finite() || positions.iter().any(|p| !p.is_finite()) {
            non_finite += 1;
            continue;
        }
        for (v, position) in corners.iter().zip(positions) {
            let normal = (normal_matrix * Vec3::new(v[3], v[4], v[5])).normalize_or_zero();
            out.positions.push(position);
            out.normals.push(normal);
            out.colors.push(color);
        }
    }
    if out_of_range > 0 {
        log::warn!("mesh {}: dropped {out_of_range} triangles with out-of-range indices", mesh.entity_id);
    }
    if non_finite > 0 {
        log::warn!("mesh {}: dropped {non_finite} triangles with non-finite data", mesh.entity_id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(transform: Mat4, indices: &[u32]) -> ExtractedMesh {
        let vertices: [[f32; 6]; 3] = [
            [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0, 0.0, 1.0, 0.0],
        ];
        ExtractedMesh {
            entity_id: 3,
            vertex_data: bytemuck::cast_slice(&vertices).to_vec(),
            index_data: bytemuck::cast_slice(indices).to_vec(),
            transform: transform.to_cols_array(),
            base_color: [0.5, 0.25, 1.0],
            visible: true,
        }
    }

    #[test]
    fn applies_transform_and_normal_matrix() {
        let transform = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0)) * Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let flat = flatten_mesh(&mesh(transform, &[0, 1, 2]));
        assert_eq!(flat.triangle_count(), 1);
        assert_eq!(flat.positions[1], Vec3::new(2.0, 2.0, 0.0));
        assert!((flat.normals[0] - Vec3::Y).length() < 1e-6);
        assert_eq!(flat.colors[2], Vec3::new(0.5, 0.25, 1.0));
    }

    #[test]
    fn skips_out_of_range_triangles() {
        let flat = flatten_mesh(&mesh(Mat4::IDENTITY, &[0, 1, 2, 0, 1, 9]));
        assert_eq!(flat.triangle_count(), 1);
    }

    #[test]
    fn skips_non_finite_triangles() {
        let mut nan_vertex = mesh(Mat4::IDENTITY, &[0, 1, 2]);
        nan_vertex.vertex_data[..4].copy_from_slice(&f32::NAN.to_ne_bytes());
        assert_eq!(flatten_mesh(&nan_vertex).triangle_count(), 0);

        let mut nan_transform = mesh(Mat4::IDENTITY, &[0, 1, 2]);
        nan_transform.transform[13] = f32::NAN;
        assert_eq!(flatten_mesh(&nan_transform).triangle_count(), 0);

        let mut nan_color = mesh(Mat4::IDENTITY, &[0, 1, 2]);
        nan_color.base_color[0] = f32::INFINITY;
        assert_eq!(flatten_mesh(&nan_color).triangle_count(), 0);
    }
}
