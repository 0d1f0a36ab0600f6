//! Host kernels for every stage. Each function is one data-parallel dispatch:
//! a `rayon` loop with one invocation per ray, probe texel or atlas texel.
//! The WGSL entry points in `shaders/` compute the same values.

pub mod accumulate;
pub mod intersect;
pub mod raygen;
pub mod shade;
pub mod shadow;

pub use intersect::IntersectMode;
