//! Offline bake: load an OBJ, converge a probe field on the CPU backend and write the radiance
//! atlas and the traced view as PNGs.
//! Run from repo root: cargo run -p debug --bin bake_obj -- model.obj [out_dir] [frames]

use std::path::{Path, PathBuf};
use std::time::Duration;

use glam::{Vec3, Vec4};
use probelite_renderer::{tone_map, Atlas, CpuRenderer, ProbeliteConfig, SceneGeometry, ToneMapping};
use render_api::Light;

const VIEW_SIZE: (u32, u32) = (480, 360);

fn load_obj_scene(obj_path: &Path) -> Result<SceneGeometry, String> {
    let (models, materials) =
        tobj::load_obj(obj_path, &tobj::GPU_LOAD_OPTIONS).map_err(|e| format!("load_obj: {e:?}"))?;
    let materials = materials.unwrap_or_default();

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut colors = Vec::new();
    for model in models {
        let mesh = model.mesh;
        let color = mesh
            .material_id
            .and_then(|id| materials.get(id))
            .and_then(|m| m.diffuse)
            .map_or(Vec3::splat(0.8), |d| Vec3::new(d[0] as f32, d[1] as f32, d[2] as f32));
        let vertex = |data: &[f32], i: u32| {
            let i = i as usize * 3;
            data.get(i..i + 3).map(|v| Vec3::new(v[0], v[1], v[2]))
        };
        for tri in mesh.indices.chunks_exact(3) {
            let Some(p) = tri.iter().map(|&i| vertex(&mesh.positions, i)).collect::<Option<Vec<_>>>() else {
                continue;
            };
            let face = (p[1] - p[0]).cross(p[2] - p[0]).normalize_or_zero();
            for (k, &i) in tri.iter().enumerate() {
                positions.push(p[k]);
                normals.push(vertex(&mesh.normals, i).unwrap_or(face));
                colors.push(color);
            }
        }
    }
    SceneGeometry::new(positions, normals, colors).map_err(|e| e.to_string())
}

fn save_rgba(path: &Path, width: u32, height: u32, pixels: impl Iterator<Item = Vec3>) -> Result<(), String> {
    let bytes: Vec<u8> = pixels
        .flat_map(|c| {
            let c = c.clamp(Vec3::ZERO, Vec3::ONE).powf(1.0 / 2.2) * 255.0;
            [c.x as u8, c.y as u8, c.z as u8, 255]
        })
        .collect();
    let img = image::RgbaImage::from_raw(width, height, bytes).ok_or("pixel buffer size mismatch")?;
    img.save(path).map_err(|e| e.to_string())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn save_atlas(path: &Path, atlas: &Atlas<Vec4>, config: &ProbeliteConfig) -> Result<(), String> {
    let layout = atlas.layout();
    let texels = atlas.as_slice().iter().map(|t| tone_map(t.truncate(), config.tone_mapping, config.exposure));
    save_rgba(path, layout.width(), layout.height(), texels)
}

fn main() -> Result<(), String> {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let obj_path = PathBuf::from(args.next().ok_or("usage: bake_obj <model.obj> [out_dir] [frames]")?);
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "bake_out".to_string()));
    let frames: u64 = args.next().and_then(|f| f.parse().ok()).unwrap_or(64);
    std::fs::create_dir_all(&out_dir).map_err(|e| e.to_string())?;

    let scene = load_obj_scene(&obj_path)?;
    let bounds = scene.bounds();
    if !bounds.is_valid() {
        return Err(format!("{} has no triangles", obj_path.display()));
    }
    println!("{}: {} triangles", obj_path.display(), scene.triangle_count());

    let config = ProbeliteConfig { blend_factor: 0.1, tone_mapping: ToneMapping::Reinhard, ..Default::default() };
    let mut renderer = CpuRenderer::new_cpu(config.clone()).map_err(|e| e.to_string())?;
    renderer.set_scene(scene).map_err(|e| e.to_string())?;

    let center = bounds.center();
    let radius = bounds.extent().length().max(1e-3);
    let camera = debug::orbit_camera(0.6, center, radius * 1.4);
    let light = Light::Directional { direction: [0.3, -0.8, 0.5], color: [3.0, 3.0, 3.0] };
    for frame in 0..frames {
        renderer.update(&camera, &light, frame);
        let token = renderer.draw(VIEW_SIZE).map_err(|e| e.to_string())?;
        token.wait(Duration::from_secs(30)).map_err(|e| e.to_string())?;
    }

    let published = renderer.published().ok_or("nothing published")?;
    save_atlas(&out_dir.join("radiance.png"), &published.textures.radiance, &config)?;
    if let Some(specular) = &published.textures.specular {
        save_atlas(&out_dir.join("specular.png"), specular, &config)?;
    }
    let view = &published.view;
    let pixels = view.pixels.iter().map(|p| tone_map(p.truncate(), config.tone_mapping, config.exposure));
    save_rgba(&out_dir.join("view.png"), view.width, view.height, pixels)?;
    Ok(())
}
