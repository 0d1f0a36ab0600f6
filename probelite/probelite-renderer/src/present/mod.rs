//! Present pass: traced view samples (linear rgba32f storage buffer), exposure, tone map,
//! fullscreen triangle into the swapchain.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use wgpu::CommandEncoder;

use crate::config::ToneMapping;
use crate::error::{RenderError, RenderResult};

const PRESENT_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/present.wgsl"));

/// Uniform: view and target sizes, tone_mode (0 = Reinhard, 1 = None), exposure.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct PresentUniform {
    view_width: u32,
    view_height: u32,
    target_width: u32,
    target_height: u32,
    tone_mode: u32,
    exposure: f32,
    _pad: [u32; 2],
}

fn tone_mode_u32(tone_mapping: ToneMapping) -> u32 {
    match tone_mapping {
        ToneMapping::Reinhard => 0,
        ToneMapping::None => 1,
    }
}

/// Host-side equivalent of the present shader, for CPU-traced images.
pub fn tone_map(color: Vec3, tone_mapping: ToneMapping, exposure: f32) -> Vec3 {
    let c = color * exposure;
    let c = match tone_mapping {
        ToneMapping::Reinhard => c / (Vec3::ONE + c),
        ToneMapping::None => c,
    };
    c.clamp(Vec3::ZERO, Vec3::ONE)
}

pub struct PresentPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    tone_mapping: ToneMapping,
    exposure: f32,
    uniform_buf: wgpu::Buffer,
}

impl PresentPass {
    pub fn new(
        device: &wgpu::Device,
        output_format: wgpu::TextureFormat,
        tone_mapping: ToneMapping,
        exposure: f32,
    ) -> RenderResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("present_shader"),
            source: wgpu::ShaderSource::Wgsl(PRESENT_SHADER.into()),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("present_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(std::mem::size_of::<PresentUniform>() as u64),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("present_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("present_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let uniform_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("present_uniform"),
            size: std::mem::size_of::<PresentUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            log::error!("present pipeline creation failed: {err}");
            return Err(RenderError::pipeline(err));
        }
        Ok(Self {
            pipeline,
            bind_group_layout,
            tone_mapping,
            exposure,
            uniform_buf,
        })
    }

    pub fn tone_mapping(&self) -> ToneMapping {
        self.tone_mapping
    }

    /// Records the blit of `view_samples` (`view_size` pixels, row-major) into `output_view`.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        view_samples: &wgpu::Buffer,
        view_size: (u32, u32),
        output_view: &wgpu::TextureView,
        target_size: (u32, u32),
    ) {
        let uniform = PresentUniform {
            view_width: view_size.0,
            view_height: view_size.1,
            target_width: target_size.0,
            target_height: target_size.1,
            tone_mode: tone_mode_u32(self.tone_mapping),
            exposure: self.exposure,
            _pad: [0; 2],
        };
        queue.write_buffer(&self.uniform_buf, 0, bytemuck::bytes_of(&uniform));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("present_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: view_samples.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.uniform_buf.as_entire_binding(),
                },
            ],
        });
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("present_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(&self.pipeline);
        rp.set_bind_group(0, &bind_group, &[]);
        rp.draw(0..3, 0..1);
    }
}
