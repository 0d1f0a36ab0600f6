//! Probelite plugin: implements RenderBackend for the host.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use render_api::{ExtractedMesh, ExtractedMeshes, ExtractedView, RenderBackend};
use probelite_renderer::{
    ComputeBackend, CpuBackend, FrameToken, ProbeliteConfig, RenderResult, Renderer, SceneGeometry, WgpuBackend,
};

use crate::flatten::{flatten_mesh, FlattenedMesh};

/// Flattened world-space triangles of one entity, keyed by what produced them.
struct CachedMesh {
    fingerprint: u64,
    flat: FlattenedMesh,
}

/// Hash of everything that changes a mesh's world-space triangles.
fn fingerprint(mesh: &ExtractedMesh) -> u64 {
    let mut h = DefaultHasher::new();
    mesh.vertex_data.hash(&mut h);
    mesh.index_data.hash(&mut h);
    for v in mesh.transform.iter().chain(&mesh.base_color) {
        v.to_bits().hash(&mut h);
    }
    h.finish()
}

/// Meshes that contribute triangles to the flattened scene.
fn is_drawable(mesh: &ExtractedMesh) -> bool {
    mesh.visible && !mesh.vertex_data.is_empty() && !mesh.index_data.is_empty()
}

/// Probelite plugin: owns the renderer and a per-entity geometry cache; implements RenderBackend.
/// The BVH is rebuilt only on frames where the flattened scene actually changed.
pub struct ProbelitePlugin<B: ComputeBackend = WgpuBackend> {
    renderer: Renderer<B>,
    /// Cache by entity_id, ordered so the flattened scene is stable between runs.
    mesh_cache: BTreeMap<u64, CachedMesh>,
    frame_index: u64,
    last_token: Option<FrameToken>,
}

impl ProbelitePlugin<WgpuBackend> {
    /// Create with wgpu device and queue (default config).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, String> {
        Self::new_with_config(device, queue, ProbeliteConfig::default())
    }

    /// Create with config (probe grid, resolutions, blend, tone mapping).
    pub fn new_with_config(device: wgpu::Device, queue: wgpu::Queue, config: ProbeliteConfig) -> Result<Self, String> {
        let renderer = Renderer::new_wgpu(device, queue, config).map_err(|e| e.to_string())?;
        Ok(Self::with_renderer(renderer))
    }

    /// Access device/queue if the host needs them (e.g. for swapchain).
    pub fn device(&self) -> &wgpu::Device {
        self.renderer.device()
    }
    pub fn queue(&self) -> &wgpu::Queue {
        self.renderer.queue()
    }

    /// Render one frame and present the traced view to the swapchain (tone-mapped). Use this
    /// when displaying in a window.
    pub fn render_frame_to_swapchain(
        &mut self,
        view: &ExtractedView,
        swapchain_view: &wgpu::TextureView,
    ) -> Result<(), String> {
        self.render_frame(view)?;
        self.renderer
            .present_to(swapchain_view, view.viewport_size)
            .map_err(|e| e.to_string())
    }
}

impl ProbelitePlugin<CpuBackend> {
    /// Host-only plugin; probe updates run on the rayon pool.
    pub fn new_cpu(config: ProbeliteConfig) -> Result<Self, String> {
        let renderer = Renderer::new_cpu(config).map_err(|e| e.to_string())?;
        Ok(Self::with_renderer(renderer))
    }
}

impl<B: ComputeBackend> ProbelitePlugin<B> {
    pub fn with_renderer(renderer: Renderer<B>) -> Self {
        Self { renderer, mesh_cache: BTreeMap::new(), frame_index: 0, last_token: None }
    }

    pub fn renderer(&self) -> &Renderer<B> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer<B> {
        &mut self.renderer
    }

    /// Frames submitted so far; the next frame uses this index.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Token of the most recently submitted frame.
    pub fn last_token(&self) -> Option<&FrameToken> {
        self.last_token.as_ref()
    }

    /// Updates the cache from `extracted`; returns whether any entity changed.
    fn sync_cache(&mut self, extracted: &HashMap<u64, ExtractedMesh>) -> bool {
        let before = self.mesh_cache.len();
        self.mesh_cache
            .retain(|id, _| extracted.get(id).is_some_and(is_drawable));
        let mut changed = self.mesh_cache.len() != before;

        for (&entity_id, mesh) in extracted {
            if !is_drawable(mesh) {
                continue;
            }
            let fingerprint = fingerprint(mesh);
            if self.mesh_cache.get(&entity_id).is_some_and(|c| c.fingerprint == fingerprint) {
                continue;
            }
            self.mesh_cache.insert(entity_id, CachedMesh { fingerprint, flat: flatten_mesh(mesh) });
            changed = true;
        }
        changed
    }

    fn scene(&self) -> RenderResult<SceneGeometry> {
        let mut flat = FlattenedMesh::default();
        for cached in self.mesh_cache.values() {
            flat.append(&cached.flat);
        }
        SceneGeometry::new(flat.positions, flat.normals, flat.colors)
    }
}

impl<B: ComputeBackend + Send> RenderBackend for ProbelitePlugin<B> {
    fn prepare(&mut self, extracted: &ExtractedMeshes) {
        if !self.sync_cache(&extracted.meshes) {
            return;
        }
        let result = self.scene().and_then(|scene| self.renderer.set_scene(scene));
        if let Err(e) = result {
            // Forget the cache so the next prepare rebuilds instead of seeing no change.
            self.mesh_cache.clear();
            log::error!("probelite prepare: scene rebuild failed, retrying next prepare: {e}");
        }
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        let light = view.light.unwrap_or_default();
        self.renderer.update(&view.camera, &light, self.frame_index);
        let token = self.renderer.draw(view.viewport_size).map_err(|e| e.to_string())?;
        self.frame_index += 1;
        self.last_token = Some(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn triangle(entity_id: u64, y: f32) -> ExtractedMesh {
        let vertices: [[f32; 6]; 3] = [
            [-1.0, y, -1.0, 0.0, 1.0, 0.0],
            [1.0, y, -1.0, 0.0, 1.0, 0.0],
            [0.0, y, 1.0, 0.0, 1.0, 0.0],
        ];
        ExtractedMesh {
            entity_id,
            vertex_data: bytemuck::cast_slice(&vertices).to_vec(),
            index_data: bytemuck::cast_slice(&[0u32, 1, 2]).to_vec(),
            transform: glam::Mat4::IDENTITY.to_cols_array(),
            base_color: [0.8, 0.8, 0.8],
            visible: true,
        }
    }

    fn small_config() -> ProbeliteConfig {
        ProbeliteConfig {
            probe_grid: [2, 2, 2],
            probe_resolution: 4,
            shadow_probe_resolution: 4,
            radiance_probe_resolution: 4,
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_meshes_do_not_rebuild() {
        let mut plugin = ProbelitePlugin::new_cpu(small_config()).unwrap();
        let mut extracted = ExtractedMeshes::default();
        extracted.meshes.insert(1, triangle(1, 0.0));
        extracted.meshes.insert(2, triangle(2, 1.0));
        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().scene().triangle_count(), 2);
        assert!(!plugin.sync_cache(&extracted.meshes));

        extracted.meshes.get_mut(&2).unwrap().visible = false;
        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().scene().triangle_count(), 1);
    }

    #[test]
    fn non_finite_entity_does_not_hide_the_others() {
        let mut plugin = ProbelitePlugin::new_cpu(small_config()).unwrap();
        let mut extracted = ExtractedMeshes::default();
        extracted.meshes.insert(1, triangle(1, 0.0));
        let mut broken = triangle(2, 1.0);
        broken.transform[13] = f32::NAN;
        extracted.meshes.insert(2, broken);
        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().scene().triangle_count(), 1);
        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().scene().triangle_count(), 1);
    }

    #[test]
    fn failed_rebuild_is_retried() {
        let mut plugin = ProbelitePlugin::new_cpu(small_config()).unwrap();
        let mut extracted = ExtractedMeshes::default();
        extracted.meshes.insert(1, triangle(1, 0.0));
        plugin.prepare(&extracted);

        // A cached entry with mismatched attributes makes the next rebuild fail once.
        let stale = triangle(9, 2.0);
        let bad = FlattenedMesh { positions: vec![glam::Vec3::ZERO; 3], ..Default::default() };
        plugin.mesh_cache.insert(9, CachedMesh { fingerprint: fingerprint(&stale), flat: bad });
        extracted.meshes.insert(9, stale);
        extracted.meshes.insert(3, triangle(3, 1.0));
        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().scene().triangle_count(), 1);
        assert!(plugin.mesh_cache.is_empty());

        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().scene().triangle_count(), 3);
    }

    #[test]
    fn emptied_vertex_data_drops_cached_triangles() {
        let mut plugin = ProbelitePlugin::new_cpu(small_config()).unwrap();
        let mut extracted = ExtractedMeshes::default();
        extracted.meshes.insert(1, triangle(1, 0.0));
        extracted.meshes.insert(2, triangle(2, 1.0));
        plugin.prepare(&extracted);
        extracted.meshes.get_mut(&2).unwrap().vertex_data.clear();
        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().scene().triangle_count(), 1);
    }

    #[test]
    fn render_frame_advances_frames() {
        let mut plugin = ProbelitePlugin::new_cpu(small_config()).unwrap();
        let mut extracted = ExtractedMeshes::default();
        extracted.meshes.insert(7, triangle(7, -0.5));
        plugin.prepare(&extracted);
        assert_eq!(plugin.renderer().bvh().triangle_count(), 1);

        let view = ExtractedView { viewport_size: (8, 6), ..Default::default() };
        for _ in 0..4 {
            plugin.render_frame(&view).unwrap();
        }
        assert_eq!(plugin.frame_index(), 4);
        plugin.last_token().unwrap().wait(Duration::from_secs(1)).unwrap();
        let published = plugin.renderer().published().unwrap();
        assert_eq!(published.view.pixels.len(), 48);
    }
}
