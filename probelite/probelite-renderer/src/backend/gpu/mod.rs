//! wgpu backend: each stage is one compute pass, recorded in order into a single
//! command encoder per frame. Probe maps live in storage buffers while accumulating;
//! `Publish` copies them into the sampleable textures consumers see.

pub mod pipelines;
pub mod resources;

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

pub use pipelines::Pipelines;
pub use resources::{ResourceArena, ResourceHandle, ResourceId};

use super::{ComputeBackend, Stage};
use crate::accel::Bvh;
use crate::config::ProbeliteConfig;
use crate::error::{RenderError, RenderResult};
use crate::field::{FieldLayout, IrradianceField};
use crate::present::PresentPass;
use crate::ray::{Batch, Intersection, Ray};
use crate::scene::SceneGeometry;
use crate::sync::FrameCompletion;
use crate::textures::{ProbeTexture, TextureSet};
use crate::uniforms::{BatchUniform, FrameUniforms, RANDOM_COUNT, RANDOM_STRIDE, UNIFORM_STRIDE};
use pipelines::{dispatch_linear, StagePipeline};

/// Per-vertex shading attributes as the shade stage reads them.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct VertexAttributes {
    normal: Vec4,
    color: Vec4,
}

struct SceneBuffers {
    nodes: ResourceId,
    tri_indices: ResourceId,
    positions: ResourceId,
    attributes: ResourceId,
}

/// Ray working set of one batch.
struct BatchBuffers {
    count: u32,
    rays: ResourceId,
    hits: ResourceId,
    samples: ResourceId,
    shadow_rays: ResourceId,
    shadow_hits: ResourceId,
    /// Probe batch only; the view batch binds the shared placeholder.
    new_shadow: Option<ResourceId>,
}

impl BatchBuffers {
    fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        [self.rays, self.hits, self.samples, self.shadow_rays, self.shadow_hits]
            .into_iter()
            .chain(self.new_shadow)
    }
}

struct FieldBuffers {
    layout: FieldLayout,
    directions: ResourceId,
    /// Red, green and blue planes back to back.
    ambient: ResourceId,
    radiance: ResourceId,
    specular: Option<ResourceId>,
    depth: ResourceId,
    octahedral: ResourceId,
    textures: TextureSet<ResourceId>,
    probes: Option<BatchBuffers>,
}

impl FieldBuffers {
    fn ids(&self) -> Vec<ResourceId> {
        let mut ids = vec![self.directions, self.ambient, self.radiance, self.depth, self.octahedral];
        ids.extend(self.specular);
        ids.extend(self.textures.iter().map(|(_, &id)| id));
        if let Some(probes) = &self.probes {
            ids.extend(probes.ids());
        }
        ids
    }
}

/// Latest published maps. Contents are valid once `frame_index`'s token has completed.
#[derive(Clone, Debug)]
pub struct GpuPublished {
    pub frame_index: u32,
    pub textures: TextureSet<ResourceId>,
    /// Traced view samples (`rgba32f`, row-major) and their size.
    pub view_samples: Option<ResourceId>,
    pub view_size: (u32, u32),
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: Pipelines,
    present_pass: PresentPass,
    arena: ResourceArena,
    frame_ring: wgpu::Buffer,
    batch_uniforms: wgpu::Buffer,
    random_ring: wgpu::Buffer,
    frame_group: wgpu::BindGroup,
    /// 16-byte buffer bound wherever a stage has nothing to read or write.
    placeholder: ResourceId,
    /// 1×1 target for the specular publish when the map was dropped.
    placeholder_texture: ResourceId,
    scene: Option<SceneBuffers>,
    field: Option<FieldBuffers>,
    view: Option<BatchBuffers>,
    view_size: (u32, u32),
    slot: usize,
    frame_index: u32,
    encoder: Option<wgpu::CommandEncoder>,
    published: Option<GpuPublished>,
}

/// High-performance adapter, optionally compatible with `surface`.
pub async fn request_adapter(instance: &wgpu::Instance, compatible_surface: Option<&wgpu::Surface<'_>>) -> RenderResult<wgpu::Adapter> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| RenderError::device("no suitable adapter"))?;
    let info = adapter.get_info();
    log::info!("probelite adapter: {} ({:?})", info.name, info.backend);
    Ok(adapter)
}

/// Requests a device with the adapter's full limits, so large probe grids fit.
pub async fn request_device(adapter: &wgpu::Adapter) -> RenderResult<(wgpu::Device, wgpu::Queue)> {
    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("probelite_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )
        .await
        .map_err(RenderError::device)
}

fn uniform_binding(buffer: &wgpu::Buffer, size: u64) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding { buffer, offset: 0, size: NonZeroU64::new(size) })
}

fn uniform_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn batch_offset(batch: Batch) -> u32 {
    match batch {
        Batch::Probes => 0,
        Batch::View => UNIFORM_STRIDE as u32,
    }
}

fn pop_allocation_scope(device: &wgpu::Device, what: &str) -> RenderResult<()> {
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(RenderError::exhausted(format!("{what}: {err}"))),
        None => Ok(()),
    }
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, config: &ProbeliteConfig) -> RenderResult<Self> {
        let pipelines = Pipelines::new(&device)?;
        let present_pass = PresentPass::new(&device, config.swapchain_format, config.tone_mapping, config.exposure)?;
        let slots = config.frames_in_flight as u64;
        let frame_ring = uniform_buffer(&device, "probe_frame_uniforms", slots * UNIFORM_STRIDE);
        let batch_uniforms = uniform_buffer(&device, "probe_batch_uniforms", 2 * UNIFORM_STRIDE);
        let random_ring = uniform_buffer(&device, "probe_random", slots * RANDOM_STRIDE);
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("probe_frame_bind_group"),
            layout: &pipelines.frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_binding(&frame_ring, std::mem::size_of::<FrameUniforms>() as u64),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform_binding(&batch_uniforms, std::mem::size_of::<BatchUniform>() as u64),
                },
                wgpu::BindGroupEntry { binding: 2, resource: uniform_binding(&random_ring, RANDOM_STRIDE) },
            ],
        });
        let mut arena = ResourceArena::default();
        let placeholder = arena.storage(&device, "probe_placeholder", 16);
        let placeholder_texture = arena.probe_texture(&device, "probe_placeholder_texture", 1, 1, ProbeTexture::Specular.format());
        Ok(Self {
            device,
            queue,
            pipelines,
            present_pass,
            arena,
            frame_ring,
            batch_uniforms,
            random_ring,
            frame_group,
            placeholder,
            placeholder_texture,
            scene: None,
            field: None,
            view: None,
            view_size: (0, 0),
            slot: 0,
            frame_index: 0,
            encoder: None,
            published: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn arena(&self) -> &ResourceArena {
        &self.arena
    }

    /// Published texture for `texture`, if the field holds it.
    pub fn texture(&self, texture: ProbeTexture) -> Option<&wgpu::Texture> {
        let id = *self.field.as_ref()?.textures.get(texture)?;
        self.arena.texture(id)
    }

    /// Blits the traced view into `output_view` through the tone-mapping present pass and submits.
    pub fn present_to(&self, output_view: &wgpu::TextureView, target_size: (u32, u32)) -> RenderResult<()> {
        let (samples, view_size) = match &self.view {
            Some(view) => (view.samples, self.view_size),
            None => (self.placeholder, (0, 0)),
        };
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("probelite_present") });
        self.present_pass.encode(
            &mut encoder,
            &self.device,
            &self.queue,
            self.arena.buffer(samples)?,
            view_size,
            output_view,
            target_size,
        );
        self.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn check_buffer(&self, what: &str, bytes: u64) -> RenderResult<()> {
        let limits = self.device.limits();
        let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if bytes > max {
            return Err(RenderError::exhausted(format!("{what}: {bytes} bytes exceeds the device limit of {max}")));
        }
        Ok(())
    }

    fn release(&mut self, ids: impl IntoIterator<Item = ResourceId>) {
        for id in ids {
            self.arena.remove(id);
        }
    }

    fn allocate_batch(&mut self, label: &str, count: u32, with_shadow: bool) -> RenderResult<BatchBuffers> {
        let n = u64::from(count);
        let ray_bytes = n * std::mem::size_of::<Ray>() as u64;
        let hit_bytes = n * std::mem::size_of::<Intersection>() as u64;
        let sample_bytes = n * std::mem::size_of::<Vec4>() as u64;
        self.check_buffer(&format!("{label} rays"), ray_bytes)?;

        let device = &self.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let batch = BatchBuffers {
            count,
            rays: self.arena.storage(device, &format!("{label}_rays"), ray_bytes),
            hits: self.arena.storage(device, &format!("{label}_hits"), hit_bytes),
            samples: self.arena.storage(device, &format!("{label}_samples"), sample_bytes),
            shadow_rays: self.arena.storage(device, &format!("{label}_shadow_rays"), ray_bytes),
            shadow_hits: self.arena.storage(device, &format!("{label}_shadow_hits"), hit_bytes),
            new_shadow: with_shadow.then(|| self.arena.storage(device, &format!("{label}_new_shadow"), sample_bytes)),
        };
        if let Err(e) = pop_allocation_scope(device, label) {
            let ids: Vec<_> = batch.ids().collect();
            self.release(ids);
            return Err(e);
        }
        Ok(batch)
    }

    fn upload_field(&mut self, field: &IrradianceField, specular: bool) -> RenderResult<FieldBuffers> {
        let layout = field.layout;
        let maps = &field.textures;
        for texture in ProbeTexture::ALL {
            let Some(atlas) = maps.layout_of(texture) else { continue };
            let max = self.device.limits().max_texture_dimension_2d;
            if atlas.width() > max || atlas.height() > max {
                return Err(RenderError::exhausted(format!(
                    "{} atlas {}x{} exceeds the device limit of {max}",
                    texture.label(),
                    atlas.width(),
                    atlas.height()
                )));
            }
            let bytes = atlas.texel_count() as u64 * 16;
            self.check_buffer(texture.label(), bytes)?;
        }

        let directions: Vec<Vec4> = field.directions.iter().map(|d| d.extend(0.0)).collect();
        let ambient: Vec<f32> = maps.ambient.iter().flat_map(|a| a.as_slice().iter().copied()).collect();

        let device = &self.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let mut textures = TextureSet::default();
        for texture in ProbeTexture::ALL {
            if texture == ProbeTexture::Specular && !specular {
                continue;
            }
            let Some(atlas) = maps.layout_of(texture) else { continue };
            let id = self.arena.probe_texture(device, texture.label(), atlas.width(), atlas.height(), texture.format());
            textures.insert(texture, id);
        }
        let mut buffers = FieldBuffers {
            layout,
            directions: self.arena.storage_init(device, "probe_directions", bytemuck::cast_slice(&directions)),
            ambient: self.arena.storage_init(device, "probe_ambient", bytemuck::cast_slice(&ambient)),
            radiance: self.arena.storage_init(device, "probe_radiance", bytemuck::cast_slice(maps.radiance.as_slice())),
            specular: match (&maps.specular, specular) {
                (Some(atlas), true) => {
                    Some(self.arena.storage_init(device, "probe_specular", bytemuck::cast_slice(atlas.as_slice())))
                }
                _ => None,
            },
            depth: self.arena.storage_init(device, "probe_depth", bytemuck::cast_slice(maps.depth.as_slice())),
            octahedral: self.arena.storage_init(device, "probe_octahedral", bytemuck::cast_slice(maps.octahedral.as_slice())),
            textures,
            probes: None,
        };
        if let Err(e) = pop_allocation_scope(device, "probe field") {
            let ids = buffers.ids();
            self.release(ids);
            return Err(e);
        }

        let ray_count = layout.probe_ray_count();
        if ray_count > 0 {
            match self.allocate_batch("probe", ray_count, true) {
                Ok(probes) => buffers.probes = Some(probes),
                Err(e) => {
                    let ids = buffers.ids();
                    self.release(ids);
                    return Err(e);
                }
            }
        }

        // Published textures start out holding the initial defaults.
        for (texture, &id) in buffers.textures.iter() {
            let Some(atlas) = maps.layout_of(texture) else { continue };
            let Some(target) = self.arena.texture(id) else { continue };
            let (bytes, texel_size): (&[u8], u32) = match (maps.scalar(texture), maps.vector(texture)) {
                (Some(s), _) => (bytemuck::cast_slice(s), 4),
                (None, Some(v)) => (bytemuck::cast_slice(v), 16),
                (None, None) => continue,
            };
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: target,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(atlas.width() * texel_size),
                    rows_per_image: Some(atlas.height()),
                },
                wgpu::Extent3d { width: atlas.width(), height: atlas.height(), depth_or_array_layers: 1 },
            );
        }
        Ok(buffers)
    }

    fn storage_group(&self, stage: &StagePipeline, label: &str, ids: &[ResourceId]) -> RenderResult<wgpu::BindGroup> {
        let buffers = ids.iter().map(|&id| self.arena.buffer(id)).collect::<RenderResult<Vec<_>>>()?;
        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry { binding: i as u32, resource: buffer.as_entire_binding() })
            .collect();
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &stage.layout,
            entries: &entries,
        }))
    }

    /// Like `storage_group`, followed by one storage texture view per `textures` entry.
    fn publish_group(
        &self,
        stage: &StagePipeline,
        label: &str,
        buffers: &[ResourceId],
        textures: &[ResourceId],
    ) -> RenderResult<wgpu::BindGroup> {
        let buffers = buffers.iter().map(|&id| self.arena.buffer(id)).collect::<RenderResult<Vec<_>>>()?;
        let views = textures.iter().map(|&id| self.arena.texture_view(id)).collect::<RenderResult<Vec<_>>>()?;
        let mut entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry { binding: i as u32, resource: buffer.as_entire_binding() })
            .collect();
        let first = entries.len() as u32;
        entries.extend(views.iter().enumerate().map(|(i, view)| wgpu::BindGroupEntry {
            binding: first + i as u32,
            resource: wgpu::BindingResource::TextureView(view),
        }));
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &stage.layout,
            entries: &entries,
        }))
    }

    fn frame_offsets(&self, batch: Batch) -> [u32; 3] {
        [
            (self.slot as u64 * UNIFORM_STRIDE) as u32,
            batch_offset(batch),
            (self.slot as u64 * RANDOM_STRIDE) as u32,
        ]
    }

    fn record(&self, encoder: &mut wgpu::CommandEncoder, stage: Stage, batches: &[Batch]) -> RenderResult<()> {
        let field = self.field.as_ref().ok_or_else(|| RenderError::device("wgpu backend: no probe field allocated"))?;
        if stage == Stage::Publish {
            return self.record_publish(encoder, field);
        }
        let scene = self.scene.as_ref().ok_or_else(|| RenderError::device("wgpu backend: no scene uploaded"))?;
        let p = &self.pipelines;
        for &batch in batches {
            let buffers = match batch {
                Batch::Probes => field.probes.as_ref(),
                Batch::View => self.view.as_ref(),
            };
            let Some(b) = buffers else { continue };
            if stage.is_accumulation() && batch != Batch::Probes {
                continue;
            }

            // Groups are built before the pass so it only borrows the encoder.
            let mut work: Vec<(&wgpu::ComputePipeline, wgpu::BindGroup, u32)> = Vec::with_capacity(2);
            match stage {
                Stage::GenerateRays => {
                    let entry = if batch == Batch::Probes { 0 } else { 1 };
                    let group = self.storage_group(&p.raygen, "raygen_group", &[field.directions, b.rays])?;
                    work.push((p.raygen.pipeline(entry), group, b.count));
                }
                Stage::IntersectPrimary => {
                    let ids = [scene.nodes, scene.tri_indices, scene.positions, b.rays, b.hits];
                    work.push((p.intersect.pipeline(0), self.storage_group(&p.intersect, "intersect_group", &ids)?, b.count));
                }
                Stage::Shade => {
                    let ids = [b.rays, b.hits, scene.attributes, field.radiance, field.depth, b.samples, b.shadow_rays];
                    work.push((p.shade.pipeline(0), self.storage_group(&p.shade, "shade_group", &ids)?, b.count));
                }
                Stage::IntersectShadow => {
                    let ids = [scene.nodes, scene.tri_indices, scene.positions, b.shadow_rays, b.shadow_hits];
                    work.push((p.intersect.pipeline(1), self.storage_group(&p.intersect, "intersect_group", &ids)?, b.count));
                }
                Stage::ResolveShadow => {
                    let new_shadow = b.new_shadow.unwrap_or(self.placeholder);
                    let ids = [b.shadow_rays, b.shadow_hits, b.samples, new_shadow];
                    work.push((p.resolve.pipeline(0), self.storage_group(&p.resolve, "resolve_group", &ids)?, b.count));
                    if batch == Batch::Probes {
                        let ids = [b.rays, new_shadow, field.octahedral];
                        let count = field.layout.atlas_layout(ProbeTexture::Octahedral).texel_count() as u32;
                        work.push((p.filter.pipeline(0), self.storage_group(&p.filter, "filter_group", &ids)?, count));
                    }
                }
                Stage::AccumulateAmbient => {
                    let ids = [b.rays, b.samples, field.ambient];
                    let count = field.layout.atlas_layout(ProbeTexture::AmbientRed).texel_count() as u32;
                    let group = self.storage_group(&p.accumulate_ambient, "accumulate_ambient_group", &ids)?;
                    work.push((p.accumulate_ambient.pipeline(0), group, count));
                }
                Stage::AccumulateRadiance => {
                    let specular = field.specular.unwrap_or(self.placeholder);
                    let ids = [b.rays, b.samples, field.ambient, field.radiance, specular];
                    let count = field.layout.atlas_layout(ProbeTexture::Radiance).texel_count() as u32;
                    let group = self.storage_group(&p.accumulate_radiance, "accumulate_radiance_group", &ids)?;
                    work.push((p.accumulate_radiance.pipeline(0), group, count));
                }
                Stage::AccumulateShadow => {
                    let ids = [field.octahedral, field.depth];
                    let count = field.layout.atlas_layout(ProbeTexture::Depth).texel_count() as u32;
                    let group = self.storage_group(&p.accumulate_shadow, "accumulate_shadow_group", &ids)?;
                    work.push((p.accumulate_shadow.pipeline(0), group, count));
                }
                Stage::Publish => {}
            }

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(stage.label()),
                timestamp_writes: None,
            });
            pass.set_bind_group(0, &self.frame_group, &self.frame_offsets(batch));
            for (pipeline, group, count) in &work {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(1, group, &[]);
                dispatch_linear(&mut pass, *count);
            }
        }
        Ok(())
    }

    fn record_publish(&self, encoder: &mut wgpu::CommandEncoder, field: &FieldBuffers) -> RenderResult<()> {
        let p = &self.pipelines;
        let texture = |t: ProbeTexture| {
            field
                .textures
                .get(t)
                .copied()
                .ok_or_else(|| RenderError::device(format!("wgpu backend: {} texture missing", t.label())))
        };
        let ambient_group = self.publish_group(
            &p.publish_ambient,
            "publish_ambient_group",
            &[field.ambient],
            &[texture(ProbeTexture::AmbientRed)?, texture(ProbeTexture::AmbientGreen)?, texture(ProbeTexture::AmbientBlue)?],
        )?;
        let specular_target = field.textures.get(ProbeTexture::Specular).copied().unwrap_or(self.placeholder_texture);
        let maps_group = self.publish_group(
            &p.publish_maps,
            "publish_maps_group",
            &[field.radiance, field.specular.unwrap_or(self.placeholder), field.depth, field.octahedral],
            &[
                texture(ProbeTexture::Radiance)?,
                specular_target,
                texture(ProbeTexture::Depth)?,
                texture(ProbeTexture::Octahedral)?,
            ],
        )?;
        let ambient_count = field.layout.atlas_layout(ProbeTexture::AmbientRed).texel_count() as u32;
        let maps_count = field
            .layout
            .atlas_layout(ProbeTexture::Radiance)
            .texel_count()
            .max(field.layout.atlas_layout(ProbeTexture::Depth).texel_count()) as u32;

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(Stage::Publish.label()),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &self.frame_group, &self.frame_offsets(Batch::Probes));
        pass.set_pipeline(p.publish_ambient.pipeline(0));
        pass.set_bind_group(1, &ambient_group, &[]);
        dispatch_linear(&mut pass, ambient_count);
        pass.set_pipeline(p.publish_maps.pipeline(0));
        pass.set_bind_group(1, &maps_group, &[]);
        dispatch_linear(&mut pass, maps_count);
        Ok(())
    }
}

impl ComputeBackend for WgpuBackend {
    type Published = Option<GpuPublished>;

    fn upload_scene(&mut self, scene: &SceneGeometry, bvh: &Bvh) -> RenderResult<()> {
        let positions: Vec<Vec4> = scene.positions().iter().map(|p| p.extend(1.0)).collect();
        let attributes: Vec<VertexAttributes> = scene
            .normals()
            .iter()
            .zip(scene.colors())
            .map(|(n, c)| VertexAttributes { normal: n.extend(0.0), color: c.extend(1.0) })
            .collect();
        self.check_buffer("bvh nodes", std::mem::size_of_val(bvh.nodes.as_slice()) as u64)?;
        self.check_buffer("scene positions", std::mem::size_of_val(positions.as_slice()) as u64)?;
        self.check_buffer("scene attributes", std::mem::size_of_val(attributes.as_slice()) as u64)?;

        let device = &self.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffers = SceneBuffers {
            nodes: self.arena.storage_init(device, "bvh_nodes", bytemuck::cast_slice(&bvh.nodes)),
            tri_indices: self.arena.storage_init(device, "bvh_tri_indices", bytemuck::cast_slice(&bvh.tri_indices)),
            positions: self.arena.storage_init(device, "scene_positions", bytemuck::cast_slice(&positions)),
            attributes: self.arena.storage_init(device, "scene_attributes", bytemuck::cast_slice(&attributes)),
        };
        let new_ids = [buffers.nodes, buffers.tri_indices, buffers.positions, buffers.attributes];
        if let Err(e) = pop_allocation_scope(device, "scene upload") {
            self.release(new_ids);
            return Err(e);
        }
        if let Some(old) = self.scene.replace(buffers) {
            self.release([old.nodes, old.tri_indices, old.positions, old.attributes]);
        }
        log::info!(
            "wgpu scene upload: {} triangles, {} bvh nodes",
            scene.triangle_count(),
            bvh.nodes.len()
        );
        Ok(())
    }

    fn allocate_field(&mut self, field: IrradianceField) -> RenderResult<()> {
        if let Some(old) = self.field.take() {
            let ids = old.ids();
            self.release(ids);
        }
        let want_specular = field.textures.specular.is_some();
        let buffers = match self.upload_field(&field, want_specular) {
            Err(RenderError::ResourceExhausted(reason)) if want_specular => {
                log::warn!("probe field allocation failed ({reason}); retrying without the specular map");
                self.upload_field(&field, false)?
            }
            other => other?,
        };
        self.published = Some(GpuPublished {
            frame_index: 0,
            textures: buffers.textures,
            view_samples: self.view.as_ref().map(|v| v.samples),
            view_size: self.view_size,
        });
        self.field = Some(buffers);
        Ok(())
    }

    fn specular_enabled(&self) -> bool {
        self.field.as_ref().is_some_and(|f| f.specular.is_some())
    }

    fn ensure_view(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if self.view_size == (width, height) {
            return Ok(());
        }
        if let Some(old) = self.view.take() {
            let ids: Vec<_> = old.ids().collect();
            self.release(ids);
        }
        self.view_size = (0, 0);
        let count = width
            .checked_mul(height)
            .ok_or_else(|| RenderError::exhausted(format!("view of {width}x{height} pixels")))?;
        if count > 0 {
            self.view = Some(self.allocate_batch("view", count, false)?);
        }
        self.view_size = (width, height);
        Ok(())
    }

    fn begin_frame(&mut self, slot: usize, uniforms: &FrameUniforms, random: &[Vec2; RANDOM_COUNT]) -> RenderResult<()> {
        self.slot = slot;
        self.frame_index = uniforms.frame_index;
        self.queue.write_buffer(&self.frame_ring, slot as u64 * UNIFORM_STRIDE, bytemuck::bytes_of(uniforms));
        self.queue.write_buffer(&self.random_ring, slot as u64 * RANDOM_STRIDE, bytemuck::cast_slice(random));

        let probes = BatchUniform {
            kind: Batch::Probes.kind(),
            ray_count: self.field.as_ref().and_then(|f| f.probes.as_ref()).map_or(0, |b| b.count),
            width: 0,
            height: 0,
        };
        let view = BatchUniform {
            kind: Batch::View.kind(),
            ray_count: self.view.as_ref().map_or(0, |b| b.count),
            width: self.view_size.0,
            height: self.view_size.1,
        };
        self.queue.write_buffer(&self.batch_uniforms, 0, bytemuck::bytes_of(&probes));
        self.queue.write_buffer(&self.batch_uniforms, UNIFORM_STRIDE, bytemuck::bytes_of(&view));

        self.encoder = Some(self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("probelite_frame"),
        }));
        Ok(())
    }

    fn encode(&mut self, stage: Stage, batches: &[Batch]) -> RenderResult<()> {
        let mut encoder = self.encoder.take().ok_or(RenderError::FrameNotPrepared)?;
        let result = self.record(&mut encoder, stage, batches);
        self.encoder = Some(encoder);
        result?;
        if stage == Stage::Publish {
            if let Some(field) = &self.field {
                self.published = Some(GpuPublished {
                    frame_index: self.frame_index,
                    textures: field.textures,
                    view_samples: self.view.as_ref().map(|v| v.samples),
                    view_size: self.view_size,
                });
            }
        }
        Ok(())
    }

    fn submit(&mut self, completion: FrameCompletion) -> RenderResult<()> {
        let encoder = self.encoder.take().ok_or(RenderError::FrameNotPrepared)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.submit([encoder.finish()]);
        self.queue.on_submitted_work_done(move || completion.complete());
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("frame {} submission failed: {err}", self.frame_index);
            return Err(RenderError::device(err));
        }
        Ok(())
    }

    fn poll(&self) {
        self.device.poll(wgpu::Maintain::Poll);
    }

    fn published(&self) -> Self::Published {
        self.published.clone()
    }
}
