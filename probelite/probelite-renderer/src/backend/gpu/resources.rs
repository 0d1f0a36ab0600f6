//! GPU resource arena: every buffer and probe texture the backend owns, addressed by `ResourceId`.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub usize);

pub enum ResourceHandle {
    Buffer(wgpu::Buffer),
    Texture { texture: wgpu::Texture, view: wgpu::TextureView },
}

impl ResourceHandle {
    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        match self {
            ResourceHandle::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<&wgpu::Texture> {
        match self {
            ResourceHandle::Texture { texture, .. } => Some(texture),
            _ => None,
        }
    }

    pub fn texture_view(&self) -> Option<&wgpu::TextureView> {
        match self {
            ResourceHandle::Texture { view, .. } => Some(view),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct ResourceArena {
    resources: HashMap<ResourceId, ResourceHandle>,
    next_id: usize,
}

impl ResourceArena {
    pub fn insert(&mut self, handle: ResourceHandle) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        self.resources.insert(id, handle);
        id
    }

    /// Drops the resource; wgpu frees it once in-flight work no longer references it.
    pub fn remove(&mut self, id: ResourceId) {
        self.resources.remove(&id);
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceHandle> {
        self.resources.get(&id)
    }

    pub fn buffer(&self, id: ResourceId) -> RenderResult<&wgpu::Buffer> {
        self.get(id)
            .and_then(ResourceHandle::buffer)
            .ok_or_else(|| RenderError::device(format!("resource {id:?} is not a live buffer")))
    }

    pub fn texture(&self, id: ResourceId) -> Option<&wgpu::Texture> {
        self.get(id).and_then(ResourceHandle::texture)
    }

    pub fn texture_view(&self, id: ResourceId) -> RenderResult<&wgpu::TextureView> {
        self.get(id)
            .and_then(ResourceHandle::texture_view)
            .ok_or_else(|| RenderError::device(format!("resource {id:?} is not a live texture")))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Storage buffer holding `contents`; empty input gets one zeroed 16-byte element so it can be bound.
    pub fn storage_init(&mut self, device: &wgpu::Device, label: &str, contents: &[u8]) -> ResourceId {
        let padding = [0u8; 16];
        let contents = if contents.is_empty() { &padding[..] } else { contents };
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        });
        self.insert(ResourceHandle::Buffer(buffer))
    }

    /// Uninitialized storage buffer of `size` bytes (at least 16).
    pub fn storage(&mut self, device: &wgpu::Device, label: &str, size: u64) -> ResourceId {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.max(16),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        self.insert(ResourceHandle::Buffer(buffer))
    }

    /// 2D texture writable from compute and sampleable by consumers.
    pub fn probe_texture(&mut self, device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> ResourceId {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());
        self.insert(ResourceHandle::Texture { texture, view })
    }
}
