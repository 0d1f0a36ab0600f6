//! Triangle BVH over static scene geometry.
//!
//! Nodes are stored depth-first in a flat array that uploads to the GPU unchanged:
//! the left child of an internal node is always the next node, the right child index
//! is stored in the node. Leaves reference a contiguous range of `tri_indices`.

mod traverse;

pub use traverse::{moller_trumbore, Hit};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::{RenderError, RenderResult};

pub const MAX_LEAF_TRIANGLES: usize = 4;
/// Traversal stack depth; median splits keep the tree depth at `log2(n / 4) + 1`.
pub const TRAVERSAL_STACK: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb { min: Vec3::INFINITY, max: Vec3::NEG_INFINITY };

    pub fn from_points(points: &[Vec3]) -> Self {
        points.iter().fold(Self::EMPTY, |mut b, &p| {
            b.expand(p);
            b
        })
    }

    pub fn expand(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        if self.is_valid() {
            self.max - self.min
        } else {
            Vec3::ZERO
        }
    }

    /// Slab test; returns the entry distance when the ray overlaps `[t_min, t_max]`.
    pub fn hit(&self, origin: Vec3, inv_dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(t_min);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

/// GPU node layout (32 bytes). `count == 0` marks an internal node.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    /// Internal: right child index. Leaf: first entry in `tri_indices`.
    pub left_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

const _: () = assert!(std::mem::size_of::<BvhNode>() == 32);

impl BvhNode {
    fn leaf(aabb: &Aabb, first: u32, count: u32) -> Self {
        Self { aabb_min: aabb.min.to_array(), left_first: first, aabb_max: aabb.max.to_array(), count }
    }

    fn internal(aabb: &Aabb, right: u32) -> Self {
        Self { aabb_min: aabb.min.to_array(), left_first: right, aabb_max: aabb.max.to_array(), count: 0 }
    }

    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    pub fn aabb(&self) -> Aabb {
        Aabb { min: Vec3::from_array(self.aabb_min), max: Vec3::from_array(self.aabb_max) }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Bvh {
    pub nodes: Vec<BvhNode>,
    /// Leaf triangle permutation; entries are triangle indices into the scene.
    pub tri_indices: Vec<u32>,
}

impl Bvh {
    /// Builds over a flattened triangle list (`positions.len() / 3` triangles).
    pub fn build(positions: &[Vec3]) -> RenderResult<Self> {
        let triangle_count = positions.len() / 3;
        if triangle_count == 0 {
            return Ok(Self::default());
        }
        if u32::try_from(triangle_count).is_err() {
            return Err(RenderError::exhausted(format!("{triangle_count} triangles exceed u32 indexing")));
        }

        let mut bounds = Vec::new();
        let mut centroids = Vec::new();
        let mut tri_indices = Vec::new();
        let mut nodes = Vec::new();
        try_reserve(&mut bounds, triangle_count)?;
        try_reserve(&mut centroids, triangle_count)?;
        try_reserve(&mut tri_indices, triangle_count)?;
        try_reserve(&mut nodes, 2 * triangle_count.div_ceil(MAX_LEAF_TRIANGLES))?;

        for tri in positions.chunks_exact(3) {
            let b = Aabb::from_points(tri);
            bounds.push(b);
            centroids.push(b.center());
        }
        tri_indices.extend(0..triangle_count as u32);

        let mut builder = Builder { bounds: &bounds, centroids: &centroids, nodes };
        builder.split(&mut tri_indices, 0);
        Ok(Self { nodes: builder.nodes, tri_indices })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.tri_indices.len() as u32
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.nodes.first().map(BvhNode::aabb)
    }
}

fn try_reserve<T>(v: &mut Vec<T>, n: usize) -> RenderResult<()> {
    v.try_reserve_exact(n)
        .map_err(|e| RenderError::exhausted(format!("bvh allocation of {n} elements: {e}")))
}

struct Builder<'a> {
    bounds: &'a [Aabb],
    centroids: &'a [Vec3],
    nodes: Vec<BvhNode>,
}

impl Builder<'_> {
    /// Emits the subtree for `tris` (which starts at `first` in the permutation) and returns its node index.
    fn split(&mut self, tris: &mut [u32], first: usize) -> u32 {
        let index = self.nodes.len();
        let aabb = tris.iter().fold(Aabb::EMPTY, |b, &t| b.union(&self.bounds[t as usize]));
        if tris.len() <= MAX_LEAF_TRIANGLES {
            self.nodes.push(BvhNode::leaf(&aabb, first as u32, tris.len() as u32));
            return index as u32;
        }
        self.nodes.push(BvhNode::internal(&aabb, 0));

        let centroid_bounds = tris.iter().fold(Aabb::EMPTY, |mut b, &t| {
            b.expand(self.centroids[t as usize]);
            b
        });
        let axis = longest_axis(centroid_bounds.extent());
        let mid = tris.len() / 2;
        let centroids = self.centroids;
        tris.select_nth_unstable_by(mid, |&a, &b| {
            centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
        });

        let (left, right) = tris.split_at_mut(mid);
        self.split(left, first);
        let right_index = self.split(right, first + mid);
        self.nodes[index] = BvhNode::internal(&aabb, right_index);
        index as u32
    }
}

fn longest_axis(extent: Vec3) -> usize {
    if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    }
}
