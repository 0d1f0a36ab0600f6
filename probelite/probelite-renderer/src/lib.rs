//! Probelite Renderer: ray-traced DDGI probe field. A triangle BVH, probe and camera rays,
//! octahedral probe atlases with temporal accumulation, driven per frame by a slot-based
//! orchestrator on either a `rayon` CPU backend or wgpu compute.

pub mod accel;
pub mod backend;
pub mod config;
pub mod error;
pub mod field;
pub mod kernels;
pub mod lighting;
pub mod octahedral;
pub mod orchestrator;
pub mod present;
pub mod probe_grid;
pub mod ray;
pub mod scene;
pub mod sync;
pub mod textures;
pub mod uniforms;

pub use accel::{Aabb, Bvh, BvhNode};
pub use backend::{ComputeBackend, CpuBackend, CpuPublished, FrameState, GpuPublished, Stage, ViewImage, WgpuBackend};
pub use backend::gpu::{request_adapter, request_device, ResourceArena, ResourceHandle, ResourceId};
pub use config::{GridBounds, ProbeliteConfig, ToneMapping};
pub use error::{RenderError, RenderResult};
pub use field::{FieldLayout, IrradianceField, ProbeTextures};
pub use orchestrator::Renderer;
pub use present::{tone_map, PresentPass};
pub use probe_grid::{Atlas, AtlasLayout, ProbeGrid};
pub use scene::SceneGeometry;
pub use sync::{FrameCompletion, FrameSlots, FrameToken};
pub use textures::{ProbeTexture, TextureSet};

/// Renderer on the CPU reference backend.
pub type CpuRenderer = Renderer<CpuBackend>;
/// Renderer on the wgpu compute backend.
pub type GpuRenderer = Renderer<WgpuBackend>;
