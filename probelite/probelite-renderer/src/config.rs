//! Probelite configuration: probe grid layout, tracing resolutions, accumulation tuning, present.

use std::time::Duration;

use glam::Vec3;

use crate::error::{RenderError, RenderResult};

/// Tone mapping mode for present pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToneMapping {
    #[default]
    Reinhard,
    /// No tone mapping (clamp).
    None,
}

/// How the probe volume is placed in the world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GridBounds {
    /// Fit the volume to the scene's vertex bounds, scaled by `margin` around its centre.
    FitScene { margin: f32 },
    /// Fixed volume independent of geometry.
    Explicit { center: Vec3, extent: Vec3 },
}

impl Default for GridBounds {
    fn default() -> Self {
        GridBounds::FitScene { margin: 1.05 }
    }
}

/// Probelite renderer and bridge configuration.
///
/// Everything here is fixed for the lifetime of a renderer; changing the grid
/// layout means building a new renderer or reloading the scene.
#[derive(Clone, Debug)]
pub struct ProbeliteConfig {
    /// Probes along x, y, z.
    pub probe_grid: [u32; 3],
    /// Rays per probe per frame are `probe_resolution²` (one per octahedral texel).
    pub probe_resolution: u32,
    /// Octahedral tile size of the depth / variance maps.
    pub shadow_probe_resolution: u32,
    /// Octahedral tile size of the radiance and specular maps.
    pub radiance_probe_resolution: u32,
    pub grid_bounds: GridBounds,
    /// Weight of the newest frame in every temporal blend: `old * (1 - b) + new * b`.
    pub blend_factor: f32,
    /// Offset of shadow-ray origins along the surface normal.
    pub normal_bias: f32,
    /// Distance subtracted before the Chebyshev visibility test.
    pub depth_bias: f32,
    /// Cosine exponent of the depth filter lobe.
    pub variance_sharpness: f32,
    /// Cosine exponent of the specular gather lobe.
    pub specular_sharpness: f32,
    /// Variance floor for Chebyshev's inequality.
    pub min_variance: f32,
    /// Scale applied to probe irradiance when shading ray hits.
    pub indirect_intensity: f32,
    /// Radiance returned by rays that leave the scene.
    pub sky_color: Vec3,
    /// Initial value of every radiance-like texel.
    pub ambient_default: Vec3,
    /// Stratify probe rays inside their octahedral texel using the random buffer.
    pub jitter_rays: bool,
    /// Seed mixed with the frame index to fill the per-frame random buffer.
    pub random_seed: u64,
    /// In-flight frame slots (uniform ring length).
    pub frames_in_flight: usize,
    /// Longest time `draw` waits for a frame slot before failing with `Timeout`.
    pub slot_timeout: Duration,
    /// Maintain the specular map; dropped automatically when allocation fails.
    pub specular_enabled: bool,
    /// Tone mapping for present pass.
    pub tone_mapping: ToneMapping,
    pub exposure: f32,
    /// Swapchain texture format for present (e.g. Rgba8Unorm or Bgra8Unorm).
    pub swapchain_format: wgpu::TextureFormat,
}

impl Default for ProbeliteConfig {
    fn default() -> Self {
        Self {
            probe_grid: [12, 8, 10],
            probe_resolution: 16,
            shadow_probe_resolution: 24,
            radiance_probe_resolution: 16,
            grid_bounds: GridBounds::default(),
            blend_factor: 0.03,
            normal_bias: 0.01,
            depth_bias: 0.05,
            variance_sharpness: 50.0,
            specular_sharpness: 32.0,
            min_variance: 1.0e-4,
            indirect_intensity: 1.0,
            sky_color: Vec3::new(0.25, 0.3, 0.4),
            ambient_default: Vec3::ZERO,
            jitter_rays: true,
            random_seed: 0x5eed,
            frames_in_flight: 3,
            slot_timeout: Duration::from_secs(2),
            specular_enabled: true,
            tone_mapping: ToneMapping::default(),
            exposure: 1.0,
            swapchain_format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

impl ProbeliteConfig {
    pub fn validate(&self) -> RenderResult<()> {
        if self.probe_grid.iter().any(|&d| d == 0) {
            return Err(RenderError::InvalidConfig(format!(
                "probe_grid must be at least 1 in every axis, got {:?}",
                self.probe_grid
            )));
        }
        for (name, value) in [
            ("probe_resolution", self.probe_resolution),
            ("shadow_probe_resolution", self.shadow_probe_resolution),
            ("radiance_probe_resolution", self.radiance_probe_resolution),
        ] {
            if value == 0 {
                return Err(RenderError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if !(0.0..=1.0).contains(&self.blend_factor) {
            return Err(RenderError::InvalidConfig(format!(
                "blend_factor must be in [0, 1], got {}",
                self.blend_factor
            )));
        }
        let scalars = [
            self.normal_bias,
            self.depth_bias,
            self.variance_sharpness,
            self.specular_sharpness,
            self.min_variance,
            self.indirect_intensity,
            self.exposure,
        ];
        if scalars.iter().any(|v| !v.is_finite()) || !self.sky_color.is_finite() || !self.ambient_default.is_finite() {
            return Err(RenderError::InvalidConfig("tuning values must be finite".to_string()));
        }
        if self.frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig("frames_in_flight must be > 0".to_string()));
        }
        if let GridBounds::FitScene { margin } = self.grid_bounds {
            if !(margin.is_finite() && margin > 0.0) {
                return Err(RenderError::InvalidConfig(format!("grid margin must be > 0, got {margin}")));
            }
        }
        Ok(())
    }

    /// Rays traced per probe each frame.
    pub fn rays_per_probe(&self) -> u32 {
        self.probe_resolution * self.probe_resolution
    }
}
