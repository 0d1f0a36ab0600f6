//! Frame orchestrator: owns the scene, its BVH and the in-flight frame slots, and drives a
//! `ComputeBackend` through `WaitForSlot -> stages -> Release` once per `draw`.

use render_api::{Camera, Light};

use crate::accel::{Aabb, Bvh};
use crate::backend::{ComputeBackend, CpuBackend, FrameState, Stage, WgpuBackend};
use crate::config::ProbeliteConfig;
use crate::error::{RenderError, RenderResult};
use crate::field::{FieldLayout, IrradianceField};
use crate::ray::Batch;
use crate::scene::SceneGeometry;
use crate::sync::{FrameSlots, FrameToken};
use crate::uniforms::{random_block, FrameUniforms, SceneCounts};

/// Camera and light recorded by `update` for the next `draw`.
#[derive(Clone, Copy, Debug)]
struct FrameUpdate {
    camera: Camera,
    light: Light,
    frame_index: u64,
}

pub struct Renderer<B: ComputeBackend> {
    backend: B,
    config: ProbeliteConfig,
    scene: SceneGeometry,
    bvh: Bvh,
    layout: FieldLayout,
    slots: FrameSlots,
    pending: Option<FrameUpdate>,
    state: FrameState,
}

impl Renderer<CpuBackend> {
    pub fn new_cpu(config: ProbeliteConfig) -> RenderResult<Self> {
        let backend = CpuBackend::new(config.frames_in_flight);
        Self::new(backend, config)
    }
}

impl Renderer<WgpuBackend> {
    pub fn new_wgpu(device: wgpu::Device, queue: wgpu::Queue, config: ProbeliteConfig) -> RenderResult<Self> {
        config.validate()?;
        let backend = WgpuBackend::new(device, queue, &config)?;
        Self::new(backend, config)
    }

    pub fn device(&self) -> &wgpu::Device {
        self.backend.device()
    }

    pub fn queue(&self) -> &wgpu::Queue {
        self.backend.queue()
    }

    /// Presents the last traced view into `output_view` (e.g. a swapchain texture).
    pub fn present_to(&self, output_view: &wgpu::TextureView, target_size: (u32, u32)) -> RenderResult<()> {
        self.backend.present_to(output_view, target_size)
    }
}

impl<B: ComputeBackend> Renderer<B> {
    /// Starts with an empty scene and the field its bounds imply.
    pub fn new(backend: B, config: ProbeliteConfig) -> RenderResult<Self> {
        config.validate()?;
        let layout = FieldLayout::for_scene(&Aabb::EMPTY, &config)?;
        let mut renderer = Self {
            backend,
            slots: FrameSlots::new(config.frames_in_flight),
            config,
            scene: SceneGeometry::empty(),
            bvh: Bvh::default(),
            layout,
            pending: None,
            state: FrameState::Idle,
        };
        renderer.backend.upload_scene(&renderer.scene, &renderer.bvh)?;
        renderer.allocate_field()?;
        Ok(renderer)
    }

    pub fn config(&self) -> &ProbeliteConfig {
        &self.config
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn scene(&self) -> &SceneGeometry {
        &self.scene
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Latest complete probe maps (and traced view).
    pub fn published(&self) -> B::Published {
        self.backend.published()
    }

    /// Blocks until every submitted frame has retired.
    pub fn wait_idle(&self) -> RenderResult<()> {
        let backend = &self.backend;
        self.slots.drain(self.config.slot_timeout, || backend.poll())
    }

    fn allocate_field(&mut self) -> RenderResult<()> {
        let field = IrradianceField::allocate(self.layout, self.config.ambient_default, self.config.specular_enabled)?;
        self.backend.allocate_field(field)
    }

    /// Replaces the geometry. The BVH is always rebuilt; probe state is kept when the grid
    /// layout comes out unchanged and reallocated otherwise.
    pub fn set_scene(&mut self, scene: SceneGeometry) -> RenderResult<()> {
        self.wait_idle()?;
        let bvh = Bvh::build(scene.positions())?;
        let layout = FieldLayout::for_scene(&scene.bounds(), &self.config)?;
        self.backend.upload_scene(&scene, &bvh)?;
        log::info!(
            "scene: {} triangles, {} bvh nodes",
            scene.triangle_count(),
            bvh.node_count()
        );
        self.scene = scene;
        self.bvh = bvh;
        if layout == self.layout {
            log::debug!("probe layout unchanged; keeping accumulated probe state");
            return Ok(());
        }
        self.layout = layout;
        self.allocate_field()
    }

    /// Records camera and light for the next `draw`. Call exactly once per frame.
    pub fn update(&mut self, camera: &Camera, light: &Light, frame_index: u64) {
        let update = FrameUpdate { camera: *camera, light: *light, frame_index };
        if let Some(previous) = self.pending.replace(update) {
            log::warn!(
                "update for frame {frame_index} replaces frame {} which was never drawn",
                previous.frame_index
            );
        }
    }

    /// Runs one frame and returns its completion token. Blocks only while waiting for the
    /// frame's slot (`frame_index % frames_in_flight`).
    pub fn draw(&mut self, target_size: (u32, u32)) -> RenderResult<FrameToken> {
        let update = self.pending.take().ok_or(RenderError::FrameNotPrepared)?;
        let slot = (update.frame_index % self.slots.len() as u64) as usize;

        self.set_state(FrameState::WaitForSlot);
        let backend = &self.backend;
        let acquired = self.slots.acquire(slot, update.frame_index, self.config.slot_timeout, || backend.poll());
        let (token, completion) = match acquired {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(FrameState::Idle);
                return Err(e);
            }
        };

        // An error drops `completion`, which releases the slot.
        let result = self.run_frame(&update, slot, target_size).and_then(|()| {
            self.set_state(FrameState::Release);
            self.backend.submit(completion)
        });
        if let Err(e) = result {
            log::error!("frame {} failed: {e}", update.frame_index);
            self.set_state(FrameState::Idle);
            return Err(e);
        }
        Ok(token)
    }

    fn run_frame(&mut self, update: &FrameUpdate, slot: usize, target_size: (u32, u32)) -> RenderResult<()> {
        self.backend.ensure_view(target_size.0, target_size.1)?;
        let counts = SceneCounts { nodes: self.bvh.node_count(), triangles: self.bvh.triangle_count() };
        let uniforms = FrameUniforms::build(
            &self.config,
            &self.layout,
            counts,
            &update.camera,
            &update.light,
            target_size,
            update.frame_index,
            self.backend.specular_enabled(),
        );
        let random = random_block(self.config.random_seed, update.frame_index);
        self.backend.begin_frame(slot, &uniforms, &random)?;

        let batches = self.active_batches(target_size);
        for stage in Stage::ORDER {
            self.set_state(FrameState::Running(stage));
            self.backend.encode(stage, &batches)?;
        }
        Ok(())
    }

    /// The empty field skips the probe batch; a zero-area target skips the view batch.
    fn active_batches(&self, (width, height): (u32, u32)) -> Vec<Batch> {
        let mut batches = Vec::with_capacity(2);
        if !self.layout.is_empty() {
            batches.push(Batch::Probes);
        }
        if u64::from(width) * u64::from(height) > 0 {
            batches.push(Batch::View);
        }
        batches
    }

    fn set_state(&mut self, state: FrameState) {
        log::trace!("frame state {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn small_config() -> ProbeliteConfig {
        ProbeliteConfig {
            probe_grid: [2, 2, 2],
            probe_resolution: 4,
            shadow_probe_resolution: 4,
            radiance_probe_resolution: 4,
            ..Default::default()
        }
    }

    fn quad(y: f32, half: f32) -> SceneGeometry {
        let p = [
            Vec3::new(-half, y, -half),
            Vec3::new(half, y, -half),
            Vec3::new(half, y, half),
            Vec3::new(-half, y, -half),
            Vec3::new(half, y, half),
            Vec3::new(-half, y, half),
        ];
        SceneGeometry::new(p.to_vec(), vec![Vec3::Y; 6], vec![Vec3::splat(0.8); 6]).unwrap()
    }

    #[test]
    fn draw_without_update_is_rejected() {
        let mut renderer = Renderer::new_cpu(small_config()).unwrap();
        assert!(matches!(renderer.draw((4, 4)), Err(RenderError::FrameNotPrepared)));
        assert_eq!(renderer.state(), FrameState::Idle);
    }

    #[test]
    fn same_layout_reload_keeps_probe_state() {
        let config = ProbeliteConfig {
            grid_bounds: crate::config::GridBounds::Explicit { center: Vec3::ZERO, extent: Vec3::splat(4.0) },
            blend_factor: 1.0,
            ..small_config()
        };
        let mut renderer = Renderer::new_cpu(config).unwrap();
        renderer.set_scene(quad(-1.0, 1.0)).unwrap();
        renderer.update(&Camera::default(), &Light::default(), 0);
        renderer.draw((0, 0)).unwrap();
        let before = renderer.published().unwrap().textures;

        renderer.set_scene(quad(-1.5, 1.0)).unwrap();
        let after = renderer.published().unwrap().textures;
        assert_eq!(before, after);
        assert_eq!(renderer.bvh().triangle_count(), 2);
    }

    #[test]
    fn fitted_grid_reallocates_when_bounds_change() {
        let mut renderer = Renderer::new_cpu(small_config()).unwrap();
        assert!(renderer.layout().is_empty());
        renderer.set_scene(quad(0.0, 1.0)).unwrap();
        assert!(!renderer.layout().is_empty());
        let first = *renderer.layout();
        renderer.set_scene(quad(0.0, 2.0)).unwrap();
        assert_ne!(first, *renderer.layout());
    }
}
