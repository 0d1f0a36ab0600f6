//! Irradiance field: grid layout plus the persistent probe maps.

use glam::{Vec3, Vec4};

use crate::config::{GridBounds, ProbeliteConfig};
use crate::accel::Aabb;
use crate::error::{RenderError, RenderResult};
use crate::octahedral;
use crate::probe_grid::{Atlas, AtlasLayout, ProbeGrid};
use crate::textures::ProbeTexture;

/// Ambient-cube tile: faces `+x +y +z` on the first row, `-x -y -z` on the second.
pub const AMBIENT_TILE: (u32, u32) = (3, 2);

/// Everything that decides atlas sizes. Persistent state survives a scene reload
/// only while this stays equal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldLayout {
    pub grid: ProbeGrid,
    pub probe_resolution: u32,
    pub shadow_resolution: u32,
    pub radiance_resolution: u32,
}

impl FieldLayout {
    pub fn from_config(grid: ProbeGrid, config: &ProbeliteConfig) -> Self {
        Self {
            grid,
            probe_resolution: config.probe_resolution,
            shadow_resolution: config.shadow_probe_resolution,
            radiance_resolution: config.radiance_probe_resolution,
        }
    }

    /// Places the grid from the configured bounds mode and the scene's vertex box.
    pub fn for_scene(bounds: &Aabb, config: &ProbeliteConfig) -> RenderResult<Self> {
        let grid = match config.grid_bounds {
            GridBounds::FitScene { margin } => ProbeGrid::fit(bounds, config.probe_grid, margin)?,
            GridBounds::Explicit { center, extent } => ProbeGrid::new(config.probe_grid, center, extent)?,
        };
        let layout = Self::from_config(grid, config);
        layout.check_sizes()?;
        Ok(layout)
    }

    /// Every ray buffer and atlas must be addressable with `u32` indices.
    fn check_sizes(&self) -> RenderResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let d = self.grid.dims;
        let res = self.probe_resolution;
        checked_product("probe rays", &[d.x, d.y, d.z, res, res])?;
        for texture in ProbeTexture::ALL {
            let (w, h) = self.tile_size(texture);
            checked_product(texture.label(), &[d.x, d.y, w, d.z, h])?;
        }
        Ok(())
    }

    fn tile_size(&self, texture: ProbeTexture) -> (u32, u32) {
        match texture {
            ProbeTexture::AmbientRed | ProbeTexture::AmbientGreen | ProbeTexture::AmbientBlue => AMBIENT_TILE,
            ProbeTexture::Radiance | ProbeTexture::Specular => (self.radiance_resolution, self.radiance_resolution),
            ProbeTexture::Depth | ProbeTexture::Octahedral => (self.shadow_resolution, self.shadow_resolution),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn rays_per_probe(&self) -> u32 {
        self.probe_resolution * self.probe_resolution
    }

    pub fn probe_ray_count(&self) -> u32 {
        self.grid.probe_count() * self.rays_per_probe()
    }

    pub fn atlas_layout(&self, texture: ProbeTexture) -> AtlasLayout {
        let (w, h) = self.tile_size(texture);
        AtlasLayout::for_grid(&self.grid, w, h)
    }
}

fn checked_product(what: &str, factors: &[u32]) -> RenderResult<u32> {
    factors
        .iter()
        .try_fold(1u32, |acc, &f| acc.checked_mul(f))
        .ok_or_else(|| RenderError::exhausted(format!("{what}: {factors:?} exceeds u32 range")))
}

/// Six ambient-cube faces of `probe`, ordered `+x +y +z -x -y -z`. The empty field's
/// single texel stands in for every face.
pub fn ambient_faces(ambient: &[Atlas<f32>; 3], probe: u32) -> [Vec3; 6] {
    let layout = *ambient[0].layout();
    std::array::from_fn(|f| {
        let tx = (f as u32 % AMBIENT_TILE.0).min(layout.tile_width - 1);
        let ty = (f as u32 / AMBIENT_TILE.0).min(layout.tile_height - 1);
        Vec3::new(ambient[0].get(probe, tx, ty), ambient[1].get(probe, tx, ty), ambient[2].get(probe, tx, ty))
    })
}

/// Host copy of every probe map.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeTextures {
    pub ambient: [Atlas<f32>; 3],
    pub radiance: Atlas<Vec4>,
    /// Dropped when the specular map is disabled or could not be allocated.
    pub specular: Option<Atlas<Vec4>>,
    pub depth: Atlas<Vec4>,
    pub octahedral: Atlas<Vec4>,
}

impl ProbeTextures {
    /// Radiance-like maps start at `ambient_default`; variance maps start fully visible at
    /// the maximum ray distance.
    pub fn allocate(layout: &FieldLayout, ambient_default: Vec3, specular: bool) -> RenderResult<Self> {
        let far = layout.grid.max_ray_distance();
        let depth_default = Vec4::new(far, far * far, 0.0, 1.0);
        let radiance_default = ambient_default.extend(1.0);
        let ambient_layout = layout.atlas_layout(ProbeTexture::AmbientRed);
        Ok(Self {
            ambient: [
                Atlas::filled(ambient_layout, ambient_default.x)?,
                Atlas::filled(ambient_layout, ambient_default.y)?,
                Atlas::filled(ambient_layout, ambient_default.z)?,
            ],
            radiance: Atlas::filled(layout.atlas_layout(ProbeTexture::Radiance), radiance_default)?,
            specular: if specular {
                Some(Atlas::filled(layout.atlas_layout(ProbeTexture::Specular), radiance_default)?)
            } else {
                None
            },
            depth: Atlas::filled(layout.atlas_layout(ProbeTexture::Depth), depth_default)?,
            octahedral: Atlas::filled(layout.atlas_layout(ProbeTexture::Octahedral), depth_default)?,
        })
    }

    pub fn ambient_faces(&self, probe: u32) -> [Vec3; 6] {
        ambient_faces(&self.ambient, probe)
    }

    /// Texels of a scalar map, or `None` for vector maps.
    pub fn scalar(&self, texture: ProbeTexture) -> Option<&[f32]> {
        match texture {
            ProbeTexture::AmbientRed => Some(self.ambient[0].as_slice()),
            ProbeTexture::AmbientGreen => Some(self.ambient[1].as_slice()),
            ProbeTexture::AmbientBlue => Some(self.ambient[2].as_slice()),
            _ => None,
        }
    }

    /// Texels of an `rgba` map, or `None` for scalar maps and a dropped specular map.
    pub fn vector(&self, texture: ProbeTexture) -> Option<&[Vec4]> {
        match texture {
            ProbeTexture::Radiance => Some(self.radiance.as_slice()),
            ProbeTexture::Specular => self.specular.as_ref().map(Atlas::as_slice),
            ProbeTexture::Depth => Some(self.depth.as_slice()),
            ProbeTexture::Octahedral => Some(self.octahedral.as_slice()),
            _ => None,
        }
    }

    pub fn layout_of(&self, texture: ProbeTexture) -> Option<&AtlasLayout> {
        match texture {
            ProbeTexture::AmbientRed => Some(self.ambient[0].layout()),
            ProbeTexture::AmbientGreen => Some(self.ambient[1].layout()),
            ProbeTexture::AmbientBlue => Some(self.ambient[2].layout()),
            ProbeTexture::Radiance => Some(self.radiance.layout()),
            ProbeTexture::Specular => self.specular.as_ref().map(Atlas::layout),
            ProbeTexture::Depth => Some(self.depth.layout()),
            ProbeTexture::Octahedral => Some(self.octahedral.layout()),
        }
    }
}

/// Allocated field: layout, initial maps and the probe-ray direction table.
#[derive(Clone, Debug)]
pub struct IrradianceField {
    pub layout: FieldLayout,
    pub textures: ProbeTextures,
    /// `probe_resolution²` texel-centre directions, indexed `x + y * res`.
    pub directions: Vec<Vec3>,
}

impl IrradianceField {
    pub fn allocate(layout: FieldLayout, ambient_default: Vec3, specular: bool) -> RenderResult<Self> {
        let textures = ProbeTextures::allocate(&layout, ambient_default, specular)?;
        let directions = octahedral::direction_table(layout.probe_resolution);
        log::info!(
            "probe field: {} probes ({:?}), atlases radiance {}x{}, depth {}x{}, specular {}",
            layout.grid.probe_count(),
            layout.grid.dims.to_array(),
            textures.radiance.layout().width(),
            textures.radiance.layout().height(),
            textures.depth.layout().width(),
            textures.depth.layout().height(),
            if specular { "on" } else { "off" },
        );
        Ok(Self { layout, textures, directions })
    }

    pub fn probe_position(&self, i: u32, j: u32, k: u32) -> Vec3 {
        self.layout.grid.probe_position(i, j, k)
    }

    pub fn textures(&self) -> &ProbeTextures {
        &self.textures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layout_allocates_single_texel_defaults() {
        let config = ProbeliteConfig { ambient_default: Vec3::new(0.1, 0.2, 0.3), ..Default::default() };
        let layout = FieldLayout::for_scene(&Aabb::EMPTY, &config).unwrap();
        assert!(layout.is_empty());
        let field = IrradianceField::allocate(layout, config.ambient_default, true).unwrap();
        for t in ProbeTexture::ALL {
            let l = field.textures.layout_of(t).unwrap();
            assert_eq!((l.width(), l.height()), (1, 1));
        }
        assert_eq!(field.textures.ambient_faces(0)[0], Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(field.textures.radiance.as_slice(), &[Vec4::new(0.1, 0.2, 0.3, 1.0)]);
    }

    #[test]
    fn oversized_layout_is_resource_exhausted() {
        let config = ProbeliteConfig {
            probe_grid: [64, 64, 64],
            probe_resolution: 256,
            grid_bounds: GridBounds::Explicit { center: Vec3::ZERO, extent: Vec3::splat(10.0) },
            ..Default::default()
        };
        config.validate().unwrap();
        let err = FieldLayout::for_scene(&Aabb::EMPTY, &config).unwrap_err();
        assert!(matches!(err, RenderError::ResourceExhausted(_)), "{err}");

        let wide_atlas = ProbeliteConfig {
            probe_grid: [4096, 4096, 1],
            probe_resolution: 1,
            ..config
        };
        let err = FieldLayout::for_scene(&Aabb::EMPTY, &wide_atlas).unwrap_err();
        assert!(matches!(err, RenderError::ResourceExhausted(_)), "{err}");
    }

    #[test]
    fn atlas_sizes_follow_grid_and_resolutions() {
        let config = ProbeliteConfig { probe_grid: [4, 2, 3], ..Default::default() };
        let grid = ProbeGrid::new(config.probe_grid, Vec3::ZERO, Vec3::ONE).unwrap();
        let layout = FieldLayout::from_config(grid, &config);
        let depth = layout.atlas_layout(ProbeTexture::Depth);
        assert_eq!((depth.width(), depth.height()), (8 * 24, 3 * 24));
        let ambient = layout.atlas_layout(ProbeTexture::AmbientBlue);
        assert_eq!((ambient.width(), ambient.height()), (8 * 3, 3 * 2));
        assert_eq!(layout.probe_ray_count(), 24 * 256);
    }
}
