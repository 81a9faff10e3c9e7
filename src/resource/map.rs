//! CPU access to host-visible resources.
//!
//! Mapping dispatches on the kind of resource. A buffer maps as a whole. A texture maps one subresource at a time,
//! where `subresource = array_layer * mip_levels + mip_level`. Texture contents are laid out tightly packed: every
//! array layer holds its full mip chain, one mip level after another.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;

use crate::{ByteSize, Error, Resource};
use crate::resource::{ResourceDescription, TextureDescription};

/// How a mapped resource may be accessed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
}

impl MapMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, MapMode::Read)
    }
}

/// Memory layout of one texture subresource inside the texture's host-visible storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubresourceLayout {
    pub offset: u64,
    pub size: u64,
    pub row_pitch: u64,
    pub depth_pitch: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MapState {
    /// Number of live read-only views.
    Shared(u32),
    Exclusive,
}

/// Live mappings of a resource, per subresource. Any number of read-only views may coexist, a writable view
/// excludes every other view of the same subresource.
#[derive(Debug, Default)]
pub struct MappedRegions {
    regions: Mutex<HashMap<u32, MapState>>,
}

impl MappedRegions {
    /// Whether any view of `subresource` is alive.
    pub fn is_mapped(&self, subresource: u32) -> bool {
        self.lock().contains_key(&subresource)
    }

    fn acquire(&self, name: impl FnOnce() -> String, subresource: u32, mode: MapMode) -> Result<()> {
        let mut regions = self.lock();
        match (regions.get(&subresource).copied(), mode.is_writable()) {
            (None, true) => {
                regions.insert(subresource, MapState::Exclusive);
            }
            (None, false) => {
                regions.insert(subresource, MapState::Shared(1));
            }
            (Some(MapState::Shared(count)), false) => {
                regions.insert(subresource, MapState::Shared(count + 1));
            }
            _ => {
                return Err(Error::AlreadyMapped {
                    name: name(),
                    subresource,
                }
                .into())
            }
        }
        Ok(())
    }

    fn release(&self, subresource: u32) {
        let mut regions = self.lock();
        match regions.get(&subresource).copied() {
            Some(MapState::Shared(count)) if count > 1 => {
                regions.insert(subresource, MapState::Shared(count - 1));
            }
            _ => {
                regions.remove(&subresource);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, MapState>> {
        self.regions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Extent of a mip level. Never smaller than one texel in any dimension.
pub fn mip_dimensions(texture: &TextureDescription, mip_level: u32) -> (u32, u32, u32) {
    let shrink = |extent: u32| extent.checked_shr(mip_level).unwrap_or(0).max(1);
    (shrink(texture.width), shrink(texture.height), shrink(texture.depth))
}

fn mip_layout(texture: &TextureDescription, mip_level: u32) -> Result<(u64, u64, u64)> {
    let texel = texture.format.byte_size().ok_or(Error::UnsupportedFormat(texture.format))? as u64;
    let (width, height, depth) = mip_dimensions(texture, mip_level);
    let row_pitch = width as u64 * texel;
    let depth_pitch = row_pitch * height as u64;
    Ok((row_pitch, depth_pitch, depth_pitch * depth as u64))
}

/// Layout of a single texture subresource.
/// # Errors
/// - Fails with [`Error::UnsupportedFormat`] for formats without a fixed texel size.
/// - Fails with [`Error::InvalidSubresource`] if the mip level or array layer is out of range.
pub fn subresource_layout(texture: &TextureDescription, mip_level: u32, array_layer: u32) -> Result<SubresourceLayout> {
    if mip_level >= texture.mip_levels || array_layer >= texture.array_layers {
        return Err(Error::InvalidSubresource {
            name: String::new(),
            subresource: array_layer * texture.mip_levels + mip_level,
        }
        .into());
    }

    let mut layer_size = 0;
    let mut mip_offset = 0;
    for level in 0..texture.mip_levels {
        let (_, _, size) = mip_layout(texture, level)?;
        if level == mip_level {
            mip_offset = layer_size;
        }
        layer_size += size;
    }
    let (row_pitch, depth_pitch, size) = mip_layout(texture, mip_level)?;
    Ok(SubresourceLayout {
        offset: array_layer as u64 * layer_size + mip_offset,
        size,
        row_pitch,
        depth_pitch,
    })
}

/// Total size in bytes of the host-visible storage a resource needs.
pub fn storage_size(description: &ResourceDescription) -> Result<u64> {
    match description {
        ResourceDescription::Buffer(buffer) => Ok(buffer.size),
        ResourceDescription::Texture(texture) => {
            let mut layer_size = 0;
            for level in 0..texture.mip_levels {
                layer_size += mip_layout(texture, level)?.2;
            }
            Ok(layer_size * texture.array_layers as u64)
        }
    }
}

/// A mapped view of a resource. The resource is retained for as long as the view lives, dropping the view unmaps it.
#[derive(Debug)]
pub struct MappedResource {
    resource: Resource,
    mode: MapMode,
    data: NonNull<u8>,
    size: u64,
    subresource: u32,
    row_pitch: u64,
    depth_pitch: u64,
}

// SAFETY: The pointer refers to host-visible storage owned by the backend, which stays alive while the
// resource is retained by this view.
unsafe impl Send for MappedResource {}

impl MappedResource {
    /// Map a resource. It must be realized, host visible and not disposed. Writable views are exclusive per
    /// subresource.
    pub(crate) fn new(resource: &Resource, mode: MapMode, subresource: u32) -> Result<Self> {
        let description = *resource.description();
        if !description.memory().is_host_visible() {
            return Err(Error::Unmappable(resource.name()).into());
        }
        if subresource >= description.subresource_count() {
            return Err(Error::InvalidSubresource {
                name: resource.name(),
                subresource,
            }
            .into());
        }

        let native = resource.ensure_realized()?;
        let base = resource
            .backend()
            .contents(native)
            .map_err(|e| Error::backend("contents", format!("resource `{}`", resource.name()), e))?;

        let (offset, size, row_pitch, depth_pitch) = match &description {
            ResourceDescription::Buffer(buffer) => (0, buffer.size, buffer.size, buffer.size),
            ResourceDescription::Texture(texture) => {
                let layout = subresource_layout(texture, subresource % texture.mip_levels, subresource / texture.mip_levels)?;
                (layout.offset, layout.size, layout.row_pitch, layout.depth_pitch)
            }
        };

        resource.mappings().acquire(|| resource.name(), subresource, mode)?;
        if let Err(e) = resource.retain() {
            resource.mappings().release(subresource);
            return Err(e);
        }
        // SAFETY: `offset` lies within the storage of `storage_size()` bytes the backend allocated for this resource.
        let data = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset as usize)) };
        Ok(Self {
            resource: resource.clone(),
            mode,
            data,
            size,
            subresource,
            row_pitch,
            depth_pitch,
        })
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn subresource(&self) -> u32 {
        self.subresource
    }

    /// Bytes between two rows of texels. Equal to the size for buffers.
    pub fn row_pitch(&self) -> u64 {
        self.row_pitch
    }

    /// Bytes between two depth slices. Equal to the size for buffers.
    pub fn depth_pitch(&self) -> u64 {
        self.depth_pitch
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.data
    }

    /// The mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `data` points to `size` bytes of backend storage kept alive by the retained resource.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.size as usize) }
    }

    /// The mapped bytes, for writing.
    /// # Errors
    /// Fails with [`Error::ReadOnlyMapping`] if the resource was mapped with [`MapMode::Read`].
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if !self.mode.is_writable() {
            return Err(Error::ReadOnlyMapping(self.resource.name()).into());
        }
        // SAFETY: see `as_slice()`. A writable view is the only view of its subresource, and the exclusive borrow of
        // `self` prevents aliasing through this view.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.size as usize) })
    }
}

impl Drop for MappedResource {
    fn drop(&mut self) {
        self.resource.mappings().release(self.subresource);
        if let Err(e) = self.resource.release() {
            error!("Failed to unmap resource: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::MemoryType;

    fn texture(mip_levels: u32, array_layers: u32) -> TextureDescription {
        TextureDescription {
            width: 8,
            height: 4,
            depth: 1,
            mip_levels,
            array_layers,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED,
            memory: MemoryType::CpuToGpu,
        }
    }

    #[test]
    fn mip_chain_layout() {
        let tex = texture(3, 2);
        // 8x4, 4x2, 2x1 at 4 bytes per texel: 128 + 32 + 8 bytes per layer.
        let layout = subresource_layout(&tex, 1, 0).unwrap();
        assert_eq!(layout, SubresourceLayout { offset: 128, size: 32, row_pitch: 16, depth_pitch: 32 });
        let layout = subresource_layout(&tex, 2, 1).unwrap();
        assert_eq!(layout.offset, 168 + 160);
        assert_eq!(layout.row_pitch, 8);
        assert_eq!(storage_size(&ResourceDescription::Texture(tex)).unwrap(), 336);
    }

    #[test]
    fn mip_dimensions_clamp_to_one() {
        let tex = texture(1, 1);
        assert_eq!(mip_dimensions(&tex, 5), (1, 1, 1));
        assert_eq!(mip_dimensions(&tex, 32), (1, 1, 1));
        assert_eq!(mip_dimensions(&tex, 40), (1, 1, 1));
    }

    #[test]
    fn long_mip_chains_do_not_overflow_the_shift() {
        let tex = TextureDescription {
            width: 1,
            height: 1,
            ..texture(34, 1)
        };
        let layout = subresource_layout(&tex, 33, 0).unwrap();
        assert_eq!(layout, SubresourceLayout { offset: 33 * 4, size: 4, row_pitch: 4, depth_pitch: 4 });
        assert_eq!(storage_size(&ResourceDescription::Texture(tex)).unwrap(), 34 * 4);
    }

    #[test]
    fn writable_views_are_exclusive() {
        let regions = MappedRegions::default();
        regions.acquire(String::new, 0, MapMode::Read).unwrap();
        regions.acquire(String::new, 0, MapMode::Read).unwrap();
        assert!(regions.acquire(String::new, 0, MapMode::Write).is_err());
        regions.acquire(String::new, 1, MapMode::ReadWrite).unwrap();
        assert!(regions.acquire(String::new, 1, MapMode::Read).is_err());

        regions.release(0);
        assert!(regions.is_mapped(0));
        regions.release(0);
        assert!(!regions.is_mapped(0));
        regions.acquire(String::new, 0, MapMode::Write).unwrap();
    }

    #[test]
    fn out_of_range_subresource() {
        let tex = texture(2, 1);
        assert!(subresource_layout(&tex, 2, 0).is_err());
        assert!(subresource_layout(&tex, 0, 1).is_err());
    }
}
