//! Compute pipelines for every stage, with explicit bind group layouts.
//!
//! Group 0 is shared: frame uniforms, batch header and random buffer, all with dynamic
//! offsets. Group 1 holds the stage's storage buffers (and publish targets).

use std::num::NonZeroU64;

use crate::error::{RenderError, RenderResult};
use crate::textures::ProbeTexture;
use crate::uniforms::{BatchUniform, FrameUniforms, RANDOM_STRIDE};

const COMMON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/common.wgsl"));
const RAYGEN: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/raygen.wgsl"));
const INTERSECT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/intersect.wgsl"));
const SHADE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shade.wgsl"));
const SHADOW_RESOLVE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shadow_resolve.wgsl"));
const VARIANCE_FILTER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/variance_filter.wgsl"));
const ACCUMULATE_AMBIENT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/accumulate_ambient.wgsl"));
const ACCUMULATE_RADIANCE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/accumulate_radiance.wgsl"));
const ACCUMULATE_SHADOW: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/accumulate_shadow.wgsl"));
const PUBLISH_AMBIENT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/publish_ambient.wgsl"));
const PUBLISH_MAPS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/publish_maps.wgsl"));

pub const WORKGROUP_SIZE: u32 = 64;
const MAX_GROUPS_X: u32 = 65_535;

/// Storage buffer access in a group-1 layout.
#[derive(Clone, Copy)]
enum Access {
    Read,
    ReadWrite,
}

use Access::{Read, ReadWrite};

pub struct StagePipeline {
    pub layout: wgpu::BindGroupLayout,
    pub pipelines: Vec<wgpu::ComputePipeline>,
}

impl StagePipeline {
    pub fn pipeline(&self, entry: usize) -> &wgpu::ComputePipeline {
        &self.pipelines[entry]
    }
}

pub struct Pipelines {
    pub frame_layout: wgpu::BindGroupLayout,
    /// Entries: probe rays, camera rays.
    pub raygen: StagePipeline,
    /// Entries: nearest, any.
    pub intersect: StagePipeline,
    pub shade: StagePipeline,
    pub resolve: StagePipeline,
    pub filter: StagePipeline,
    pub accumulate_ambient: StagePipeline,
    pub accumulate_radiance: StagePipeline,
    pub accumulate_shadow: StagePipeline,
    pub publish_ambient: StagePipeline,
    pub publish_maps: StagePipeline,
}

impl Pipelines {
    pub fn new(device: &wgpu::Device) -> RenderResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let frame_layout = frame_layout(device);
        let build = |label: &str, source: &str, layout: wgpu::BindGroupLayout, entries: &[&str]| {
            stage_pipeline(device, &frame_layout, label, source, layout, entries)
        };
        let raygen = build(
            "raygen",
            RAYGEN,
            storage_layout(device, "raygen", &[Read, ReadWrite]),
            &["probe_rays", "camera_rays"],
        );
        let intersect = build(
            "intersect",
            INTERSECT,
            storage_layout(device, "intersect", &[Read, Read, Read, Read, ReadWrite]),
            &["intersect_nearest", "intersect_any"],
        );
        let shade = build(
            "shade",
            SHADE,
            storage_layout(device, "shade", &[Read, Read, Read, Read, Read, ReadWrite, ReadWrite]),
            &["shade"],
        );
        let resolve = build(
            "shadow_resolve",
            SHADOW_RESOLVE,
            storage_layout(device, "shadow_resolve", &[Read, Read, ReadWrite, ReadWrite]),
            &["resolve_samples"],
        );
        let filter = build(
            "variance_filter",
            VARIANCE_FILTER,
            storage_layout(device, "variance_filter", &[Read, Read, ReadWrite]),
            &["filter_variance"],
        );
        let accumulate_ambient = build(
            "accumulate_ambient",
            ACCUMULATE_AMBIENT,
            storage_layout(device, "accumulate_ambient", &[Read, Read, ReadWrite]),
            &["accumulate_ambient"],
        );
        let accumulate_radiance = build(
            "accumulate_radiance",
            ACCUMULATE_RADIANCE,
            storage_layout(device, "accumulate_radiance", &[Read, Read, Read, ReadWrite, ReadWrite]),
            &["accumulate_radiance"],
        );
        let accumulate_shadow = build(
            "accumulate_shadow",
            ACCUMULATE_SHADOW,
            storage_layout(device, "accumulate_shadow", &[Read, ReadWrite]),
            &["accumulate_shadow"],
        );
        let publish_ambient = build(
            "publish_ambient",
            PUBLISH_AMBIENT,
            publish_layout(device, "publish_ambient", 1, &[ProbeTexture::AmbientRed.format(); 3]),
            &["publish_ambient"],
        );
        let publish_maps = build(
            "publish_maps",
            PUBLISH_MAPS,
            publish_layout(device, "publish_maps", 4, &[ProbeTexture::Radiance.format(); 4]),
            &["publish_maps"],
        );
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            log::error!("probe pipeline creation failed: {err}");
            return Err(RenderError::pipeline(err));
        }
        Ok(Self {
            frame_layout,
            raygen,
            intersect,
            shade,
            resolve,
            filter,
            accumulate_ambient,
            accumulate_radiance,
            accumulate_shadow,
            publish_ambient,
            publish_maps,
        })
    }
}

/// `(x, y)` workgroup counts covering `count` invocations; shaders fold them back with `linear_index`.
pub fn dispatch_linear(pass: &mut wgpu::ComputePass<'_>, count: u32) {
    if count == 0 {
        return;
    }
    let groups = count.div_ceil(WORKGROUP_SIZE);
    let x = groups.min(MAX_GROUPS_X);
    pass.dispatch_workgroups(x, groups.div_ceil(x), 1);
}

fn frame_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let uniform = |binding: u32, size: u64| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(size),
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("probe_frame_bind_group_layout"),
        entries: &[
            uniform(0, std::mem::size_of::<FrameUniforms>() as u64),
            uniform(1, std::mem::size_of::<BatchUniform>() as u64),
            uniform(2, RANDOM_STRIDE),
        ],
    })
}

fn storage_entry(binding: u32, access: Access, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: matches!(access, Read) },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_layout(device: &wgpu::Device, label: &str, access: &[Access]) -> wgpu::BindGroupLayout {
    let entries: Vec<_> = access
        .iter()
        .enumerate()
        .map(|(i, &a)| storage_entry(i as u32, a, wgpu::ShaderStages::COMPUTE))
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{label}_bind_group_layout")),
        entries: &entries,
    })
}

/// `buffers` read-only storage buffers followed by one write-only storage texture per format.
fn publish_layout(device: &wgpu::Device, label: &str, buffers: u32, formats: &[wgpu::TextureFormat]) -> wgpu::BindGroupLayout {
    let mut entries: Vec<_> = (0..buffers).map(|i| storage_entry(i, Read, wgpu::ShaderStages::COMPUTE)).collect();
    entries.extend(formats.iter().enumerate().map(|(i, &format)| wgpu::BindGroupLayoutEntry {
        binding: buffers + i as u32,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }));
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{label}_bind_group_layout")),
        entries: &entries,
    })
}

fn stage_pipeline(
    device: &wgpu::Device,
    frame_layout: &wgpu::BindGroupLayout,
    label: &str,
    source: &str,
    layout: wgpu::BindGroupLayout,
    entries: &[&str],
) -> StagePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{label}_shader")),
        source: wgpu::ShaderSource::Wgsl(format!("{COMMON}\n{source}").into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{label}_pipeline_layout")),
        bind_group_layouts: &[frame_layout, &layout],
        push_constant_ranges: &[],
    });
    let pipelines = entries
        .iter()
        .map(|&entry| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        })
        .collect();
    StagePipeline { layout, pipelines }
}
