//! End-to-end frames on the CPU backend, plus orchestration checks against a scripted backend.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3};
use parking_lot::Mutex;
use probelite_renderer::ray::Batch;
use probelite_renderer::uniforms::{FrameUniforms, RANDOM_COUNT};
use probelite_renderer::{
    Bvh, ComputeBackend, CpuRenderer, FrameCompletion, FrameState, GridBounds, IrradianceField, ProbeTexture,
    ProbeliteConfig, RenderError, RenderResult, Renderer, SceneGeometry, Stage,
};
use render_api::{Camera, Light};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn probe_config() -> ProbeliteConfig {
    ProbeliteConfig {
        probe_grid: [2, 2, 2],
        probe_resolution: 8,
        shadow_probe_resolution: 8,
        radiance_probe_resolution: 8,
        grid_bounds: GridBounds::Explicit { center: Vec3::ZERO, extent: Vec3::ONE },
        ..Default::default()
    }
}

fn downward_light() -> Light {
    Light::Directional { direction: [0.0, -1.0, 0.0], color: [1.0, 1.0, 1.0] }
}

fn horizontal_quad(y: f32, half: f32) -> [Vec3; 6] {
    [
        Vec3::new(-half, y, -half),
        Vec3::new(half, y, -half),
        Vec3::new(half, y, half),
        Vec3::new(-half, y, -half),
        Vec3::new(half, y, half),
        Vec3::new(-half, y, half),
    ]
}

fn scene(positions: Vec<Vec3>) -> SceneGeometry {
    let n = positions.len();
    SceneGeometry::new(positions, vec![Vec3::Y; n], vec![Vec3::splat(0.7); n]).unwrap()
}

fn run_frames(renderer: &mut CpuRenderer, frames: u64, target: (u32, u32)) {
    for frame in 0..frames {
        renderer.update(&Camera::default(), &downward_light(), frame);
        let token = renderer.draw(target).unwrap();
        token.wait(Duration::from_secs(1)).unwrap();
    }
}

fn max_occlusion(renderer: &CpuRenderer) -> f32 {
    let published = renderer.published().unwrap();
    published.textures.depth.as_slice().iter().map(|t| t.z).fold(0.0, f32::max)
}

#[test]
fn empty_scene_publishes_default_textures() {
    init_logger();
    let ambient = Vec3::new(0.1, 0.2, 0.3);
    let config = ProbeliteConfig { ambient_default: ambient, ..Default::default() };
    let sky = config.sky_color;
    let mut renderer = CpuRenderer::new_cpu(config).unwrap();
    assert!(renderer.layout().is_empty());

    run_frames(&mut renderer, 2, (3, 2));

    let published = renderer.published().unwrap();
    for texture in ProbeTexture::ALL {
        let layout = published.textures.layout_of(texture).unwrap();
        assert_eq!((layout.width(), layout.height()), (1, 1), "{}", texture.label());
    }
    assert_eq!(published.textures.ambient_faces(0), [ambient; 6]);
    assert_eq!(published.textures.radiance.as_slice(), &[ambient.extend(1.0)]);
    assert_eq!(published.view.pixels.len(), 6);
    assert!(published.view.pixels.iter().all(|&p| p == sky.extend(0.0)));
}

#[test]
fn unoccluded_triangle_converges_to_zero_occlusion() {
    init_logger();
    let config = ProbeliteConfig { blend_factor: 1.0, ..probe_config() };
    let mut renderer = CpuRenderer::new_cpu(config).unwrap();
    let triangle = vec![Vec3::new(-10.0, -2.0, -5.0), Vec3::new(10.0, -2.0, -5.0), Vec3::new(0.0, -2.0, 10.0)];
    renderer.set_scene(scene(triangle)).unwrap();

    run_frames(&mut renderer, 3, (0, 0));

    assert!(max_occlusion(&renderer) < 1e-3);
    // Rays that reached the lit triangle carried direct light into the ambient cube.
    let published = renderer.published().unwrap();
    let down_face = published.textures.ambient_faces(0)[4];
    assert!(down_face.x > 0.0, "{down_face}");
}

#[test]
fn fitted_flat_triangle_gets_distinct_probes_and_no_occlusion() {
    init_logger();
    let config = ProbeliteConfig { grid_bounds: GridBounds::FitScene { margin: 1.05 }, blend_factor: 1.0, ..probe_config() };
    let mut renderer = CpuRenderer::new_cpu(config).unwrap();
    let triangle = vec![Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0)];
    renderer.set_scene(scene(triangle)).unwrap();

    let grid = renderer.layout().grid;
    assert!(grid.extent.y > 0.0, "{}", grid.extent);
    let positions: Vec<Vec3> = (0..grid.probe_count()).map(|p| grid.position_of(p)).collect();
    for (a, pa) in positions.iter().enumerate() {
        assert!(pa.y.abs() > 1e-3, "probe {a} sits on the surface");
        for pb in &positions[a + 1..] {
            assert!(pa.distance(*pb) > 1e-3);
        }
    }

    run_frames(&mut renderer, 3, (0, 0));
    assert!(max_occlusion(&renderer) < 1e-3);
}

#[test]
fn oversized_grid_fails_construction() {
    let config = ProbeliteConfig { probe_grid: [64, 64, 64], probe_resolution: 256, ..probe_config() };
    assert!(config.validate().is_ok());
    assert!(matches!(CpuRenderer::new_cpu(config), Err(RenderError::ResourceExhausted(_))));
}

#[test]
fn roof_over_floor_is_occluded() {
    init_logger();
    let config = ProbeliteConfig { blend_factor: 1.0, ..probe_config() };
    let mut renderer = CpuRenderer::new_cpu(config).unwrap();
    let mut positions = horizontal_quad(-1.0, 10.0).to_vec();
    positions.extend(horizontal_quad(1.0, 10.0));
    renderer.set_scene(scene(positions)).unwrap();

    run_frames(&mut renderer, 3, (0, 0));

    assert!(max_occlusion(&renderer) > 0.5);
}

#[test]
fn zero_blend_keeps_accumulated_maps() {
    init_logger();
    let config = ProbeliteConfig { blend_factor: 0.0, ambient_default: Vec3::splat(0.05), ..probe_config() };
    let mut renderer = CpuRenderer::new_cpu(config.clone()).unwrap();
    renderer.set_scene(scene(horizontal_quad(-0.8, 3.0).to_vec())).unwrap();
    let initial = IrradianceField::allocate(*renderer.layout(), config.ambient_default, true).unwrap();

    run_frames(&mut renderer, 2, (4, 4));

    let published = renderer.published().unwrap();
    assert_eq!(published.textures.ambient, initial.textures.ambient);
    assert_eq!(published.textures.radiance, initial.textures.radiance);
    assert_eq!(published.textures.specular, initial.textures.specular);
    assert_eq!(published.textures.depth, initial.textures.depth);
}

#[test]
fn frames_are_reproducible_for_a_seed() {
    let build = || {
        let mut renderer = CpuRenderer::new_cpu(probe_config()).unwrap();
        renderer.set_scene(scene(horizontal_quad(-0.8, 3.0).to_vec())).unwrap();
        run_frames(&mut renderer, 2, (4, 3));
        renderer.published().unwrap()
    };
    let (a, b) = (build(), build());
    assert_eq!(a.textures, b.textures);
    assert_eq!(a.view, b.view);
}

#[test]
fn bvh_rebuild_matches_scene() {
    let mut renderer = CpuRenderer::new_cpu(probe_config()).unwrap();
    renderer.set_scene(scene(horizontal_quad(0.0, 1.0).to_vec())).unwrap();
    assert_eq!(renderer.bvh().triangle_count(), 2);
    renderer.set_scene(SceneGeometry::empty()).unwrap();
    assert!(renderer.bvh().is_empty());
}

/// Records calls and hands completions to the test instead of firing them.
#[derive(Default)]
struct Script {
    calls: Vec<String>,
    pending: Vec<FrameCompletion>,
}

struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ComputeBackend for ScriptedBackend {
    type Published = ();

    fn upload_scene(&mut self, _scene: &SceneGeometry, _bvh: &Bvh) -> RenderResult<()> {
        self.script.lock().calls.push("upload_scene".into());
        Ok(())
    }

    fn allocate_field(&mut self, _field: IrradianceField) -> RenderResult<()> {
        self.script.lock().calls.push("allocate_field".into());
        Ok(())
    }

    fn specular_enabled(&self) -> bool {
        true
    }

    fn ensure_view(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.script.lock().calls.push(format!("ensure_view {width}x{height}"));
        Ok(())
    }

    fn begin_frame(&mut self, slot: usize, uniforms: &FrameUniforms, _random: &[Vec2; RANDOM_COUNT]) -> RenderResult<()> {
        self.script.lock().calls.push(format!("begin_frame {} slot {slot}", uniforms.frame_index));
        Ok(())
    }

    fn encode(&mut self, stage: Stage, batches: &[Batch]) -> RenderResult<()> {
        self.script.lock().calls.push(format!("{} {batches:?}", stage.label()));
        Ok(())
    }

    fn submit(&mut self, completion: FrameCompletion) -> RenderResult<()> {
        let mut script = self.script.lock();
        script.calls.push(format!("submit slot {}", completion.slot()));
        script.pending.push(completion);
        Ok(())
    }

    fn poll(&self) {}

    fn published(&self) -> Self::Published {}
}

fn scripted(slot_timeout: Duration) -> (Renderer<ScriptedBackend>, Arc<Mutex<Script>>) {
    let script = Arc::new(Mutex::new(Script::default()));
    let config = ProbeliteConfig { slot_timeout, ..probe_config() };
    let renderer = Renderer::new(ScriptedBackend { script: script.clone() }, config).unwrap();
    script.lock().calls.clear();
    (renderer, script)
}

#[test]
fn stages_run_in_dependency_order() {
    let (mut renderer, script) = scripted(Duration::from_secs(1));
    renderer.update(&Camera::default(), &Light::default(), 7);
    let token = renderer.draw((4, 2)).unwrap();
    assert_eq!(token.frame_index(), 7);
    assert_eq!(token.slot(), 1);
    assert_eq!(renderer.state(), FrameState::Release);

    let mut expected = vec!["ensure_view 4x2".to_string(), "begin_frame 7 slot 1".to_string()];
    expected.extend(Stage::ORDER.iter().map(|s| format!("{} {:?}", s.label(), [Batch::Probes, Batch::View])));
    expected.push("submit slot 1".to_string());
    assert_eq!(script.lock().calls, expected);
}

#[test]
fn zero_area_target_skips_the_view_batch() {
    let (mut renderer, script) = scripted(Duration::from_secs(1));
    renderer.update(&Camera::default(), &Light::default(), 0);
    renderer.draw((0, 16)).unwrap();
    let calls = &script.lock().calls;
    assert!(calls.contains(&format!("shade {:?}", [Batch::Probes])));
}

#[test]
fn fourth_frame_waits_for_slot_zero() {
    let (mut renderer, script) = scripted(Duration::from_secs(2));
    for frame in 0..3 {
        renderer.update(&Camera::default(), &Light::default(), frame);
        renderer.draw((0, 0)).unwrap();
    }
    assert_eq!(script.lock().pending.len(), 3);

    let releaser = {
        let script = script.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            let first = script.lock().pending.remove(0);
            assert_eq!(first.slot(), 0);
            first.complete();
        })
    };
    let start = Instant::now();
    renderer.update(&Camera::default(), &Light::default(), 3);
    let token = renderer.draw((0, 0)).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(token.slot(), 0);
    releaser.join().unwrap();
}

#[test]
fn starved_slot_times_out() {
    let (mut renderer, _script) = scripted(Duration::from_millis(30));
    for frame in 0..3 {
        renderer.update(&Camera::default(), &Light::default(), frame);
        renderer.draw((0, 0)).unwrap();
    }
    renderer.update(&Camera::default(), &Light::default(), 3);
    let err = renderer.draw((0, 0)).unwrap_err();
    assert!(matches!(err, RenderError::Timeout { .. }));
    assert_eq!(renderer.state(), FrameState::Idle);
}

#[test]
fn draw_needs_a_fresh_update() {
    let (mut renderer, _script) = scripted(Duration::from_secs(1));
    renderer.update(&Camera::default(), &Light::default(), 0);
    renderer.draw((0, 0)).unwrap();
    assert!(matches!(renderer.draw((0, 0)), Err(RenderError::FrameNotPrepared)));
}

#[test]
fn completed_frames_free_their_slot() {
    let (mut renderer, script) = scripted(Duration::from_millis(30));
    renderer.update(&Camera::default(), &Light::default(), 0);
    let token = renderer.draw((0, 0)).unwrap();
    assert!(!token.is_complete());
    let completion = script.lock().pending.pop().unwrap();
    completion.complete();
    token.wait(Duration::from_millis(10)).unwrap();
    // Frame 3 reuses slot 0.
    renderer.update(&Camera::default(), &Light::default(), 3);
    renderer.draw((0, 0)).unwrap();
}
