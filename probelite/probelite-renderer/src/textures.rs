//! Semantic slots of the published probe texture set.

/// One of the maps a probe field publishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeTexture {
    AmbientRed,
    AmbientGreen,
    AmbientBlue,
    Radiance,
    Specular,
    /// Persistent variance map `(mean, mean², occlusion, 1)`.
    Depth,
    /// This frame's filtered variance samples, same texel layout as `Depth`.
    Octahedral,
}

impl ProbeTexture {
    pub const COUNT: usize = 7;

    pub const ALL: [ProbeTexture; Self::COUNT] = [
        ProbeTexture::AmbientRed,
        ProbeTexture::AmbientGreen,
        ProbeTexture::AmbientBlue,
        ProbeTexture::Radiance,
        ProbeTexture::Specular,
        ProbeTexture::Depth,
        ProbeTexture::Octahedral,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            ProbeTexture::AmbientRed => "probe_ambient_r",
            ProbeTexture::AmbientGreen => "probe_ambient_g",
            ProbeTexture::AmbientBlue => "probe_ambient_b",
            ProbeTexture::Radiance => "probe_radiance",
            ProbeTexture::Specular => "probe_specular",
            ProbeTexture::Depth => "probe_depth",
            ProbeTexture::Octahedral => "probe_octahedral",
        }
    }

    pub fn is_ambient(self) -> bool {
        matches!(self, ProbeTexture::AmbientRed | ProbeTexture::AmbientGreen | ProbeTexture::AmbientBlue)
    }

    pub fn format(self) -> wgpu::TextureFormat {
        if self.is_ambient() {
            wgpu::TextureFormat::R32Float
        } else {
            wgpu::TextureFormat::Rgba32Float
        }
    }
}

/// Fixed-size bundle addressed by `ProbeTexture`; a slot is `None` when the map is not maintained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSet<T> {
    slots: [Option<T>; ProbeTexture::COUNT],
}

impl<T> Default for TextureSet<T> {
    fn default() -> Self {
        Self { slots: std::array::from_fn(|_| None) }
    }
}

impl<T> TextureSet<T> {
    pub fn insert(&mut self, texture: ProbeTexture, value: T) {
        self.slots[texture.index()] = Some(value);
    }

    pub fn get(&self, texture: ProbeTexture) -> Option<&T> {
        self.slots[texture.index()].as_ref()
    }

    pub fn remove(&mut self, texture: ProbeTexture) -> Option<T> {
        self.slots[texture.index()].take()
    }

    pub fn contains(&self, texture: ProbeTexture) -> bool {
        self.slots[texture.index()].is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProbeTexture, &T)> {
        ProbeTexture::ALL.into_iter().filter_map(move |t| self.get(t).map(|v| (t, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_indexed_by_slot() {
        let mut set = TextureSet::default();
        set.insert(ProbeTexture::Depth, 5usize);
        set.insert(ProbeTexture::AmbientRed, 1);
        assert_eq!(set.get(ProbeTexture::Depth), Some(&5));
        assert!(!set.contains(ProbeTexture::Specular));
        let order: Vec<_> = set.iter().map(|(t, _)| t).collect();
        assert_eq!(order, vec![ProbeTexture::AmbientRed, ProbeTexture::Depth]);
    }
}
