//! Reference backend: every stage runs immediately as a `rayon` kernel on the host.
//! Deterministic for a fixed seed, so tests and offline bakes use it.

use std::sync::Arc;

use glam::{Vec2, Vec4};

use super::{ComputeBackend, Stage};
use crate::accel::Bvh;
use crate::error::{RenderError, RenderResult};
use crate::field::{IrradianceField, ProbeTextures};
use crate::kernels::{accumulate, intersect, raygen, shade, shadow, IntersectMode};
use crate::lighting::FieldSampler;
use crate::ray::{Batch, Intersection, Ray};
use crate::scene::SceneGeometry;
use crate::sync::FrameCompletion;
use crate::uniforms::{FrameUniforms, UniformRing, RANDOM_COUNT};

/// Per-batch working set, one entry per ray.
#[derive(Default)]
struct RayBuffers {
    rays: Vec<Ray>,
    hits: Vec<Intersection>,
    samples: Vec<Vec4>,
    shadow_rays: Vec<Ray>,
    shadow_hits: Vec<Intersection>,
    /// `(d, d², occluded, 1)` per ray; probe batch only.
    new_shadow: Vec<Vec4>,
}

impl RayBuffers {
    fn resize(&mut self, count: usize, with_shadow: bool) -> RenderResult<()> {
        let shadow_count = if with_shadow { count } else { 0 };
        grow(&mut self.rays, count, Ray::default())?;
        grow(&mut self.hits, count, Intersection::MISS)?;
        grow(&mut self.samples, count, Vec4::ZERO)?;
        grow(&mut self.shadow_rays, count, Ray::default())?;
        grow(&mut self.shadow_hits, count, Intersection::MISS)?;
        grow(&mut self.new_shadow, shadow_count, Vec4::ZERO)?;
        Ok(())
    }
}

fn grow<T: Clone>(v: &mut Vec<T>, count: usize, value: T) -> RenderResult<()> {
    if count > v.len() {
        v.try_reserve_exact(count - v.len())
            .map_err(|e| RenderError::exhausted(format!("ray buffer of {count} entries: {e}")))?;
    }
    v.resize(count, value);
    Ok(())
}

/// Traced view image: one linear-radiance sample per pixel, row-major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec4>,
}

/// Snapshot published at the end of each frame.
#[derive(Clone, Debug)]
pub struct CpuPublished {
    pub frame_index: u32,
    pub textures: Arc<ProbeTextures>,
    pub view: Arc<ViewImage>,
}

pub struct CpuBackend {
    scene: SceneGeometry,
    bvh: Bvh,
    field: Option<IrradianceField>,
    ring: UniformRing,
    slot: usize,
    probes: RayBuffers,
    view: RayBuffers,
    view_size: (u32, u32),
    published: Option<CpuPublished>,
}

impl CpuBackend {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            scene: SceneGeometry::empty(),
            bvh: Bvh::default(),
            field: None,
            ring: UniformRing::new(frames_in_flight),
            slot: 0,
            probes: RayBuffers::default(),
            view: RayBuffers::default(),
            view_size: (0, 0),
            published: None,
        }
    }

    /// Live (not yet published) maps, for inspection between frames.
    pub fn field(&self) -> Option<&IrradianceField> {
        self.field.as_ref()
    }

    fn run(&mut self, stage: Stage, batch: Batch) -> RenderResult<()> {
        let Self { scene, bvh, field, ring, slot, probes, view, .. } = self;
        let field = field.as_mut().ok_or_else(|| RenderError::device("cpu backend: no probe field allocated"))?;
        let u = ring.frame(*slot);
        let random = ring.random(*slot);
        let buffers = match batch {
            Batch::Probes => probes,
            Batch::View => view,
        };
        if buffers.rays.is_empty() {
            return Ok(());
        }
        let textures = &mut field.textures;
        match stage {
            Stage::GenerateRays => match batch {
                Batch::Probes => raygen::probe_rays(u, &field.directions, random, &mut buffers.rays),
                Batch::View => raygen::camera_rays(u, &mut buffers.rays),
            },
            Stage::IntersectPrimary => {
                intersect::intersect(IntersectMode::Nearest, bvh, scene.positions(), &buffers.rays, &mut buffers.hits)
            }
            Stage::Shade => {
                let inputs = shade::ShadeInputs {
                    uniforms: u,
                    random,
                    scene,
                    field: FieldSampler { uniforms: u, radiance: &textures.radiance, depth: &textures.depth },
                };
                shade::shade(&inputs, &buffers.rays, &buffers.hits, &mut buffers.samples, &mut buffers.shadow_rays);
            }
            Stage::IntersectShadow => intersect::intersect(
                IntersectMode::Any,
                bvh,
                scene.positions(),
                &buffers.shadow_rays,
                &mut buffers.shadow_hits,
            ),
            Stage::ResolveShadow => {
                let probe_batch = batch == Batch::Probes;
                let new_shadow = probe_batch.then_some(buffers.new_shadow.as_mut_slice());
                shadow::resolve_samples(&buffers.shadow_rays, &buffers.shadow_hits, &mut buffers.samples, new_shadow);
                if probe_batch {
                    shadow::filter_variance(u, &buffers.rays, &buffers.new_shadow, &mut textures.octahedral);
                }
            }
            Stage::AccumulateAmbient if batch == Batch::Probes => {
                accumulate::ambient(u, &buffers.rays, &buffers.samples, &mut textures.ambient)
            }
            Stage::AccumulateRadiance if batch == Batch::Probes => accumulate::radiance(
                u,
                &buffers.rays,
                &buffers.samples,
                &textures.ambient,
                &mut textures.radiance,
                textures.specular.as_mut(),
            ),
            Stage::AccumulateShadow if batch == Batch::Probes => {
                accumulate::shadow(u, &textures.octahedral, &mut textures.depth)
            }
            _ => {}
        }
        Ok(())
    }

    fn publish(&mut self) -> RenderResult<()> {
        let field = self.field.as_ref().ok_or_else(|| RenderError::device("cpu backend: no probe field allocated"))?;
        let (width, height) = self.view_size;
        let pixels = if width > 0 && height > 0 { self.view.samples.clone() } else { Vec::new() };
        self.published = Some(CpuPublished {
            frame_index: self.ring.frame(self.slot).frame_index,
            textures: Arc::new(field.textures.clone()),
            view: Arc::new(ViewImage { width, height, pixels }),
        });
        Ok(())
    }
}

impl ComputeBackend for CpuBackend {
    type Published = Option<CpuPublished>;

    fn upload_scene(&mut self, scene: &SceneGeometry, bvh: &Bvh) -> RenderResult<()> {
        self.scene = scene.clone();
        self.bvh = bvh.clone();
        Ok(())
    }

    fn allocate_field(&mut self, field: IrradianceField) -> RenderResult<()> {
        self.probes.resize(field.layout.probe_ray_count() as usize, true)?;
        self.published = Some(CpuPublished {
            frame_index: 0,
            textures: Arc::new(field.textures.clone()),
            view: Arc::new(ViewImage::default()),
        });
        self.field = Some(field);
        Ok(())
    }

    fn specular_enabled(&self) -> bool {
        self.field.as_ref().is_some_and(|f| f.textures.specular.is_some())
    }

    fn ensure_view(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if self.view_size != (width, height) {
            self.view.resize(width as usize * height as usize, false)?;
            self.view_size = (width, height);
        }
        Ok(())
    }

    fn begin_frame(&mut self, slot: usize, uniforms: &FrameUniforms, random: &[Vec2; RANDOM_COUNT]) -> RenderResult<()> {
        self.ring.write(slot, uniforms, random);
        self.slot = slot;
        Ok(())
    }

    fn encode(&mut self, stage: Stage, batches: &[Batch]) -> RenderResult<()> {
        if stage == Stage::Publish {
            return self.publish();
        }
        for &batch in batches {
            self.run(stage, batch)?;
        }
        Ok(())
    }

    fn submit(&mut self, completion: FrameCompletion) -> RenderResult<()> {
        completion.complete();
        Ok(())
    }

    fn poll(&self) {}

    fn published(&self) -> Self::Published {
        self.published.clone()
    }
}
