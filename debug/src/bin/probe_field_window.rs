//! Backend-agnostic window: depends only on render-api + ProbeliteWindowBackend, the host never
//! touches wgpu. Shows the traced view of a lit box room while the probe field converges.
//! Run: cargo run -p debug --bin probe_field_window

use std::time::Instant;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use render_api::{ExtractedMeshes, ExtractedView, RenderBackendWindow};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowId;

struct App {
    window: Option<winit::window::Window>,
    /// Renders through render-api's RenderBackendWindow; holds no wgpu types.
    backend: Option<Box<dyn RenderBackendWindow>>,
    size: (u32, u32),
    scene: ExtractedMeshes,
    started: Instant,
}

impl App {
    fn new() -> Self {
        Self { window: None, backend: None, size: (800, 600), scene: debug::box_room(), started: Instant::now() }
    }

    fn view(&self) -> ExtractedView {
        let angle = (self.started.elapsed().as_secs_f32() * 0.2).sin() * 0.6;
        ExtractedView {
            camera: debug::orbit_camera(angle, glam::Vec3::new(0.0, 1.3, 0.0), 5.5),
            viewport_size: self.size,
            light: Some(debug::ceiling_light()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default()
            .with_title("Probelite probe field")
            .with_inner_size(winit::dpi::LogicalSize::new(800, 600));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => {
                log::error!("create window: {e}");
                event_loop.exit();
                return;
            }
        };
        let phys = window.inner_size();
        self.size = (phys.width, phys.height);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(physical) => {
                self.size = (physical.width.max(1), physical.height.max(1));
                if let Some(ref w) = self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(window) = &self.window else { return };
                self.size = {
                    let phys = window.inner_size();
                    (phys.width.max(1), phys.height.max(1))
                };
                if self.backend.is_none() {
                    match probelite_bridge::ProbeliteWindowBackend::from_window(window, Default::default()) {
                        Ok(mut backend) => {
                            backend.prepare(&self.scene);
                            self.backend = Some(backend);
                        }
                        Err(e) => {
                            log::error!("ProbeliteWindowBackend::from_window failed: {e}");
                            event_loop.exit();
                            return;
                        }
                    }
                }
                let (raw_window, raw_display) = match (window.window_handle(), window.display_handle()) {
                    (Ok(wh), Ok(dh)) => (wh.as_raw(), dh.as_raw()),
                    _ => return,
                };
                let view = self.view();
                let Some(backend) = &mut self.backend else { return };
                backend.prepare(&self.scene);
                if let Err(e) = backend.render_frame_to_window(&view, raw_window, raw_display) {
                    log::warn!("frame skipped: {e}");
                }
                window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), String> {
    env_logger::init();
    let event_loop = winit::event_loop::EventLoop::new().map_err(|e| e.to_string())?;
    let mut app = App::new();
    event_loop.run_app(&mut app).map_err(|e| e.to_string())?;
    Ok(())
}
