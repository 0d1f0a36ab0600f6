//! Host loop: use render_api types and ProbelitePlugin as RenderBackend (prepare + render_frame).
//! Run: cargo run -p debug --bin plugin_loop [-- --cpu] [frames]

use std::time::Instant;

use probelite_bridge::ProbelitePlugin;
use probelite_renderer::ProbeliteConfig;
use render_api::{ExtractedView, RenderBackend};

fn main() -> Result<(), String> {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cpu = args.iter().any(|a| a == "--cpu");
    let frames: u64 = args.iter().find_map(|a| a.parse().ok()).unwrap_or(16);

    let config = ProbeliteConfig { probe_grid: [6, 4, 6], ..Default::default() };
    let mut backend: Box<dyn RenderBackend> = if cpu {
        Box::new(ProbelitePlugin::new_cpu(config)?)
    } else {
        let (device, queue) = pollster::block_on(request_device())?;
        Box::new(ProbelitePlugin::new_with_config(device, queue, config)?)
    };

    let extracted = debug::box_room();
    let start = Instant::now();
    backend.prepare(&extracted);
    log::info!("prepare: {:?}", start.elapsed());

    for frame in 0..frames {
        let view = ExtractedView {
            camera: debug::orbit_camera(frame as f32 * 0.05, glam::Vec3::new(0.0, 1.2, 0.0), 5.0),
            viewport_size: (320, 240),
            light: Some(debug::ceiling_light()),
        };
        let t = Instant::now();
        backend.render_frame(&view)?;
        log::info!("frame {frame}: {:?}", t.elapsed());
    }
    println!(
        "Probelite plugin_loop ({}): {frames} frames in {:?}",
        if cpu { "cpu" } else { "wgpu" },
        start.elapsed()
    );
    Ok(())
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), String> {
    let instance = wgpu::Instance::default();
    let adapter = probelite_renderer::request_adapter(&instance, None).await.map_err(|e| e.to_string())?;
    probelite_renderer::request_device(&adapter).await.map_err(|e| e.to_string())
}
