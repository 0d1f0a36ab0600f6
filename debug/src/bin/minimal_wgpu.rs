//! Minimal wgpu init (no window). Verifies probelite-renderer pipelines build on this device.

fn main() {
    env_logger::init();
    pollster::block_on(async {
        let instance = wgpu::Instance::default();
        let adapter = probelite_renderer::request_adapter(&instance, None).await.expect("No adapter");
        let (device, queue) = probelite_renderer::request_device(&adapter).await.expect("No device");
        let renderer = probelite_renderer::GpuRenderer::new_wgpu(device, queue, Default::default())
            .expect("Renderer::new_wgpu");
        println!("Probelite minimal_wgpu: OK ({} probes)", renderer.layout().grid.probe_count());
    });
}
