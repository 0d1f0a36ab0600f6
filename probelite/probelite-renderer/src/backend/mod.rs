//! Compute backends. Both run the same stages in the same order; the orchestrator
//! only talks to this trait.

pub mod cpu;
pub mod gpu;

pub use cpu::{CpuBackend, CpuPublished, ViewImage};
pub use gpu::{GpuPublished, WgpuBackend};

use glam::Vec2;

use crate::accel::Bvh;
use crate::error::RenderResult;
use crate::field::IrradianceField;
use crate::ray::Batch;
use crate::scene::SceneGeometry;
use crate::sync::FrameCompletion;
use crate::uniforms::{FrameUniforms, RANDOM_COUNT};

/// One dispatch (or a pair for two-pass stages) in the per-frame pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    GenerateRays,
    IntersectPrimary,
    Shade,
    IntersectShadow,
    ResolveShadow,
    AccumulateAmbient,
    AccumulateRadiance,
    AccumulateShadow,
    Publish,
}

impl Stage {
    /// Dependency order; every stage reads what the previous ones wrote.
    pub const ORDER: [Stage; 9] = [
        Stage::GenerateRays,
        Stage::IntersectPrimary,
        Stage::Shade,
        Stage::IntersectShadow,
        Stage::ResolveShadow,
        Stage::AccumulateAmbient,
        Stage::AccumulateRadiance,
        Stage::AccumulateShadow,
        Stage::Publish,
    ];

    /// Accumulation stages only ever run over the probe batch.
    pub fn is_accumulation(self) -> bool {
        matches!(self, Stage::AccumulateAmbient | Stage::AccumulateRadiance | Stage::AccumulateShadow)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::GenerateRays => "generate_rays",
            Stage::IntersectPrimary => "intersect_primary",
            Stage::Shade => "shade",
            Stage::IntersectShadow => "intersect_shadow",
            Stage::ResolveShadow => "resolve_shadow",
            Stage::AccumulateAmbient => "accumulate_ambient",
            Stage::AccumulateRadiance => "accumulate_radiance",
            Stage::AccumulateShadow => "accumulate_shadow",
            Stage::Publish => "publish",
        }
    }
}

/// Orchestrator state; `Stage`s plus the host-side bracket around them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitForSlot,
    Running(Stage),
    Release,
}

/// Executes stages for the frame orchestrator.
///
/// Calls within a frame arrive as `begin_frame`, one `encode` per stage in `Stage::ORDER`,
/// then `submit`. Scene and field uploads only happen between frames.
pub trait ComputeBackend {
    /// Read-only view of the latest published maps.
    type Published: Clone;

    /// Replaces geometry and acceleration structure.
    fn upload_scene(&mut self, scene: &SceneGeometry, bvh: &Bvh) -> RenderResult<()>;

    /// Replaces every probe map with `field`'s initial contents.
    fn allocate_field(&mut self, field: IrradianceField) -> RenderResult<()>;

    /// Whether the specular map survived allocation.
    fn specular_enabled(&self) -> bool;

    /// Sizes the camera-batch buffers; a zero area disables the view batch.
    fn ensure_view(&mut self, width: u32, height: u32) -> RenderResult<()>;

    /// Writes the slot's uniform block and random buffer.
    fn begin_frame(&mut self, slot: usize, uniforms: &FrameUniforms, random: &[Vec2; RANDOM_COUNT]) -> RenderResult<()>;

    /// Records `stage` for every batch in `batches`. `Publish` ignores `batches`.
    fn encode(&mut self, stage: Stage, batches: &[Batch]) -> RenderResult<()>;

    /// Hands the frame to the device; `completion` fires when it retires.
    fn submit(&mut self, completion: FrameCompletion) -> RenderResult<()>;

    /// Gives the device a chance to run completion callbacks.
    fn poll(&self);

    fn published(&self) -> Self::Published;
}
