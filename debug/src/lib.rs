//! Shared scene setup for the debug programs.

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};
use render_api::{Camera, ExtractedMesh, ExtractedMeshes, Light};

/// Unit quad in the xz plane facing +y, as `(vertex_data, index_data)`.
pub fn quad_buffers() -> (Vec<u8>, Vec<u8>) {
    let vertices: [[f32; 6]; 4] = [
        [-0.5, 0.0, -0.5, 0.0, 1.0, 0.0],
        [0.5, 0.0, -0.5, 0.0, 1.0, 0.0],
        [0.5, 0.0, 0.5, 0.0, 1.0, 0.0],
        [-0.5, 0.0, 0.5, 0.0, 1.0, 0.0],
    ];
    let indices: [u32; 6] = [0, 2, 1, 0, 3, 2];
    (bytemuck::cast_slice(&vertices).to_vec(), bytemuck::cast_slice(&indices).to_vec())
}

/// Unit cube centred on the origin with per-face normals.
pub fn cube_buffers() -> (Vec<u8>, Vec<u8>) {
    let faces = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
    let mut vertices: Vec<[f32; 6]> = Vec::with_capacity(24);
    let mut indices: Vec<u32> = Vec::with_capacity(36);
    for n in faces {
        let (t, b) = n.any_orthonormal_pair();
        let base = vertices.len() as u32;
        for (s, u) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let p = n * 0.5 + t * s + b * u;
            vertices.push([p.x, p.y, p.z, n.x, n.y, n.z]);
        }
        // Wind counter-clockwise around the outward normal.
        if t.cross(b).dot(n) > 0.0 {
            indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
        } else {
            indices.extend([base, base + 2, base + 1, base, base + 3, base + 2]);
        }
    }
    (bytemuck::cast_slice(&vertices).to_vec(), bytemuck::cast_slice(&indices).to_vec())
}

fn mesh(entity_id: u64, buffers: &(Vec<u8>, Vec<u8>), transform: Mat4, base_color: [f32; 3]) -> ExtractedMesh {
    ExtractedMesh {
        entity_id,
        vertex_data: buffers.0.clone(),
        index_data: buffers.1.clone(),
        transform: transform.to_cols_array(),
        base_color,
        visible: true,
    }
}

/// Open-front room (4 × 3 × 4) with a red and a green wall and two boxes inside.
pub fn box_room() -> ExtractedMeshes {
    let quad = quad_buffers();
    let cube = cube_buffers();
    let wall = |pos: Vec3, rot: Quat, size: Vec3| Mat4::from_scale_rotation_translation(size, rot, pos);
    let half_pi = std::f32::consts::FRAC_PI_2;
    let list = [
        mesh(1, &quad, wall(Vec3::ZERO, Quat::IDENTITY, Vec3::new(4.0, 1.0, 4.0)), [0.75, 0.75, 0.75]),
        mesh(2, &quad, wall(Vec3::new(0.0, 3.0, 0.0), Quat::from_rotation_x(std::f32::consts::PI), Vec3::new(4.0, 1.0, 4.0)), [0.75, 0.75, 0.75]),
        mesh(3, &quad, wall(Vec3::new(-2.0, 1.5, 0.0), Quat::from_rotation_z(-half_pi), Vec3::new(3.0, 1.0, 4.0)), [0.7, 0.1, 0.1]),
        mesh(4, &quad, wall(Vec3::new(2.0, 1.5, 0.0), Quat::from_rotation_z(half_pi), Vec3::new(3.0, 1.0, 4.0)), [0.1, 0.7, 0.1]),
        mesh(5, &quad, wall(Vec3::new(0.0, 1.5, -2.0), Quat::from_rotation_x(half_pi), Vec3::new(4.0, 1.0, 3.0)), [0.75, 0.75, 0.75]),
        mesh(6, &cube, wall(Vec3::new(-0.6, 0.6, -0.5), Quat::from_rotation_y(0.3), Vec3::new(1.0, 1.2, 1.0)), [0.8, 0.8, 0.8]),
        mesh(7, &cube, wall(Vec3::new(0.7, 0.4, 0.6), Quat::from_rotation_y(-0.3), Vec3::splat(0.8)), [0.8, 0.8, 0.8]),
    ];
    ExtractedMeshes { meshes: list.into_iter().map(|m| (m.entity_id, m)).collect::<HashMap<_, _>>() }
}

/// Area light just below the ceiling, emitting downwards.
pub fn ceiling_light() -> Light {
    Light::Area {
        position: [0.0, 2.95, 0.0],
        forward: [0.0, -1.0, 0.0],
        right: [0.5, 0.0, 0.0],
        up: [0.0, 0.0, 0.5],
        color: [6.0, 5.6, 5.0],
    }
}

/// Camera on a circle of `distance` around `target`, looking at it.
pub fn orbit_camera(angle: f32, target: Vec3, distance: f32) -> Camera {
    let position = target + Vec3::new(angle.sin() * distance, 0.4, angle.cos() * distance);
    let forward = (target - position).normalize();
    let right = forward.cross(Vec3::Y).normalize();
    let up = right.cross(forward);
    Camera {
        position: position.to_array(),
        forward: forward.to_array(),
        right: right.to_array(),
        up: up.to_array(),
        vertical_fov: std::f32::consts::FRAC_PI_3,
    }
}
