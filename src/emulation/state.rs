//! Resource sets and per-slot binding state.

use std::sync::Arc;

use anyhow::Result;

use crate::{Error, Resource};
use crate::core::backend::NativeSampler;
use crate::pipeline::layout::{ResourceKind, ResourceLayout};
use crate::resource::ResourceDescription;

/// A resource that can be placed in a [`ResourceSet`].
#[derive(Debug, Clone)]
pub enum BindableResource {
    /// A whole buffer.
    Buffer(Resource),
    /// A byte range of a buffer.
    BufferRange { buffer: Resource, offset: u64, size: u64 },
    Texture(Resource),
    Sampler(NativeSampler),
}

impl BindableResource {
    /// The tracked resource behind this binding, if any.
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            BindableResource::Buffer(buffer) => Some(buffer),
            BindableResource::BufferRange {
                buffer, ..
            } => Some(buffer),
            BindableResource::Texture(texture) => Some(texture),
            BindableResource::Sampler(_) => None,
        }
    }

    fn matches(&self, kind: ResourceKind) -> bool {
        match self {
            BindableResource::Buffer(buffer)
            | BindableResource::BufferRange {
                buffer, ..
            } => kind.is_buffer() && buffer.description().is_buffer(),
            BindableResource::Texture(texture) => kind.is_texture() && texture.description().is_texture(),
            BindableResource::Sampler(_) => kind == ResourceKind::Sampler,
        }
    }

    /// Resolve a buffer binding to `(buffer, offset, size)`, with the dynamic offset applied.
    pub(crate) fn buffer_range(&self, dynamic_offset: u64) -> Option<(&Resource, u64, u64)> {
        match self {
            BindableResource::Buffer(buffer) => {
                let ResourceDescription::Buffer(description) = buffer.description() else {
                    return None;
                };
                Some((buffer, dynamic_offset, description.size))
            }
            BindableResource::BufferRange {
                buffer,
                offset,
                size,
            } => Some((buffer, offset.saturating_add(dynamic_offset), *size)),
            _ => None,
        }
    }

    /// Resolve a buffer binding for the layout element `name`, rejecting ranges that leave the buffer.
    pub(crate) fn checked_buffer_range(&self, dynamic_offset: u64, name: &str, kind: ResourceKind) -> Result<(&Resource, u64, u64)> {
        let (buffer, offset, size) = self
            .buffer_range(dynamic_offset)
            .ok_or_else(|| Error::ResourceKindMismatch {
                name: name.to_owned(),
                kind,
            })?;
        check_buffer_range(buffer, offset, size)?;
        Ok((buffer, offset, size))
    }
}

/// Check that `size` bytes at `offset` lie within `buffer`.
/// # Errors
/// - Fails with [`Error::NotABuffer`] if `buffer` is a texture.
/// - Fails with [`Error::BufferRangeOutOfBounds`] if the range leaves the buffer.
pub(crate) fn check_buffer_range(buffer: &Resource, offset: u64, size: u64) -> Result<()> {
    let ResourceDescription::Buffer(description) = buffer.description() else {
        return Err(Error::NotABuffer(buffer.name()).into());
    };
    let in_bounds = offset
        .checked_add(size)
        .map_or(false, |end| end <= description.size);
    if !in_bounds {
        return Err(Error::BufferRangeOutOfBounds {
            name: buffer.name(),
            offset,
            range: size,
            size: description.size,
        }
        .into());
    }
    Ok(())
}

#[derive(Debug)]
struct ResourceSetInner {
    layout: ResourceLayout,
    resources: Vec<BindableResource>,
}

/// A bundle of resources matching a [`ResourceLayout`]. Cheap to clone, clones compare equal through
/// [`ResourceSet::same_as`].
#[derive(Debug, Clone)]
pub struct ResourceSet {
    inner: Arc<ResourceSetInner>,
}

impl ResourceSet {
    /// Create a resource set.
    /// # Errors
    /// - Fails with [`Error::ResourceCountMismatch`] if the number of resources differs from the layout.
    /// - Fails with [`Error::ResourceKindMismatch`] if a resource does not match the kind of its layout element.
    /// - Fails with [`Error::BufferRangeOutOfBounds`] if a buffer range leaves its buffer.
    pub fn new(layout: ResourceLayout, resources: impl Into<Vec<BindableResource>>) -> Result<Self> {
        let resources = resources.into();
        if resources.len() != layout.elements.len() {
            return Err(Error::ResourceCountMismatch {
                expected: layout.elements.len(),
                actual: resources.len(),
            }
            .into());
        }
        for (element, resource) in layout.elements.iter().zip(&resources) {
            if !resource.matches(element.kind) {
                return Err(Error::ResourceKindMismatch {
                    name: element.name.clone(),
                    kind: element.kind,
                }
                .into());
            }
            if element.kind.is_buffer() {
                resource.checked_buffer_range(0, &element.name, element.kind)?;
            }
        }
        Ok(Self {
            inner: Arc::new(ResourceSetInner {
                layout,
                resources,
            }),
        })
    }

    pub fn layout(&self) -> &ResourceLayout {
        &self.inner.layout
    }

    pub fn resources(&self) -> &[BindableResource] {
        &self.inner.resources
    }

    /// Whether two handles refer to the same resource set.
    pub fn same_as(&self, other: &ResourceSet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Binding state of one resource set slot.
///
/// A slot is dirty when its native bindings must be re-issued before the next draw or dispatch. The flag is cleared
/// only together with the native rebind.
#[derive(Debug, Clone, Default)]
pub struct BindingSlotState {
    pub(crate) set: Option<ResourceSet>,
    pub(crate) dynamic_offsets: Vec<u32>,
    pub(crate) dirty: bool,
}

impl BindingSlotState {
    pub fn set(&self) -> Option<&ResourceSet> {
        self.set.as_ref()
    }

    pub fn dynamic_offsets(&self) -> &[u32] {
        &self.dynamic_offsets
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether this slot already holds `set` with exactly these dynamic offsets.
    pub(crate) fn holds(&self, set: &ResourceSet, dynamic_offsets: &[u32]) -> bool {
        self.set.as_ref().map_or(false, |current| current.same_as(set)) && self.dynamic_offsets == dynamic_offsets
    }
}
