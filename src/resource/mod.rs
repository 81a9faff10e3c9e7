//! Tracked GPU resources.
//!
//! A [`Resource`] is a buffer or texture shared between the device that created it and every command buffer that
//! references it. Its native object is created lazily (see [`realize`]) and destroyed at most once, after the owner
//! requested disposal and every holder released it (see [`lifetime`] and [`disposal`]).
//!
//! # Example
//! ```
//! use deimos::prelude::*;
//! # fn run(device: Device) -> anyhow::Result<()> {
//! let buffer = device.create_buffer(
//!     "uniforms",
//!     BufferDescription {
//!         size: 256,
//!         usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
//!         memory: MemoryType::CpuToGpu,
//!     },
//! );
//! // Nothing is allocated until first use.
//! assert!(!buffer.is_realized());
//! device.ensure_realized(&buffer)?;
//! // Destroyed once no command buffer references it anymore.
//! device.request_disposal(&buffer)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use ash::vk;

use crate::Error;
use crate::core::backend::{NativeResource, ResourceBackend};
use crate::resource::disposal::DisposalQueue;
use crate::resource::lifetime::Lifetime;
use crate::resource::map::MappedRegions;
use crate::resource::realize::Realization;

pub mod disposal;
pub mod lifetime;
pub mod map;
pub mod realize;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// The memory type of a resource indicates where it should live.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryType {
    /// GPU only accessible memory. Cannot be mapped.
    GpuOnly,
    /// Memory useful for uploading data to the GPU and for constant buffers.
    CpuToGpu,
    /// Memory useful for CPU readback of data.
    GpuToCpu,
}

impl MemoryType {
    /// Whether resources in this memory can be mapped.
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryType::GpuOnly)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescription {
    /// Size in bytes.
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub memory: MemoryType,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescription {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub memory: MemoryType,
}

/// Everything a backend needs to allocate a native object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceDescription {
    Buffer(BufferDescription),
    Texture(TextureDescription),
}

impl ResourceDescription {
    pub fn memory(&self) -> MemoryType {
        match self {
            ResourceDescription::Buffer(buffer) => buffer.memory,
            ResourceDescription::Texture(texture) => texture.memory,
        }
    }

    /// Number of separately mappable subresources. Buffers have exactly one.
    pub fn subresource_count(&self) -> u32 {
        match self {
            ResourceDescription::Buffer(_) => 1,
            ResourceDescription::Texture(texture) => texture.mip_levels * texture.array_layers,
        }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, ResourceDescription::Buffer(_))
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceDescription::Texture(_))
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ResourceInner {
    id: u64,
    description: ResourceDescription,
    lifetime: Lifetime,
    realization: Arc<Realization>,
    mappings: MappedRegions,
    #[derivative(Debug = "ignore")]
    backend: Arc<dyn ResourceBackend>,
}

/// A tracked buffer or texture. Internal state is wrapped in an `Arc`, so this is cheap to clone and all clones
/// refer to the same resource.
#[derive(Debug, Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    /// Create an unrealized resource. Once disposable, its native object (if any) is handed to `disposal`.
    pub(crate) fn new(name: impl Into<String>, description: ResourceDescription, backend: Arc<dyn ResourceBackend>, disposal: Arc<DisposalQueue>) -> Self {
        let realization = Arc::new(Realization::new(name));
        let on_dispose = {
            let realization = realization.clone();
            move || {
                if let Some(native) = realization.retire() {
                    disposal.push(native, realization.label());
                }
            }
        };
        let id = NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "log-objects")]
        trace!("Created new resource #{id} `{}` ({description:?})", realization.label());
        Self {
            inner: Arc::new(ResourceInner {
                id,
                description,
                lifetime: Lifetime::new(on_dispose),
                realization,
                mappings: MappedRegions::default(),
                backend,
            }),
        }
    }

    /// Process-unique identifier of this resource.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> String {
        self.inner.realization.label()
    }

    /// Set the debug name. The native object picks it up on its next realization access.
    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.realization.set_label(name)
    }

    pub fn description(&self) -> &ResourceDescription {
        &self.inner.description
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.inner.lifetime
    }

    pub fn realization(&self) -> &Realization {
        &self.inner.realization
    }

    /// Live CPU mappings of this resource.
    pub fn mappings(&self) -> &MappedRegions {
        &self.inner.mappings
    }

    pub fn is_realized(&self) -> bool {
        self.inner.realization.is_created()
    }

    /// Whether two handles refer to the same resource.
    pub fn same_as(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add a holder to the resource.
    /// # Errors
    /// Fails with [`Error::ResourceDisposed`] once disposal was requested.
    pub fn retain(&self) -> Result<()> {
        self.inner.lifetime.retain(&self.name())
    }

    /// Remove a holder from the resource. May dispose it.
    /// # Errors
    /// Fails with [`Error::UnbalancedRelease`] if there is no holder left.
    pub fn release(&self) -> Result<()> {
        self.inner.lifetime.release(&self.name())
    }

    /// Request disposal. Returns `true` if the resource was disposed right away.
    /// # Errors
    /// Fails with [`Error::ResourceDisposed`] if disposal was already requested.
    pub fn request_disposal(&self) -> Result<bool> {
        self.inner.lifetime.request_disposal(&self.name())
    }

    /// Realize the native object if that did not happen yet.
    /// # Errors
    /// - Fails with [`Error::ResourceDisposed`] if disposal was requested.
    /// - Fails with [`Error::Backend`] if allocation fails.
    pub fn ensure_realized(&self) -> Result<NativeResource> {
        self.check_alive()?;
        let inner = &self.inner;
        inner
            .realization
            .ensure_created(inner.backend.as_ref(), || inner.backend.allocate(&inner.description))
    }

    /// The native object.
    /// # Errors
    /// - Fails with [`Error::ResourceDisposed`] if disposal was requested.
    /// - Fails with [`Error::ResourceNotCreated`] if the resource was never realized.
    pub fn native(&self) -> Result<NativeResource> {
        self.check_alive()?;
        self.inner
            .realization
            .native()
            .ok_or_else(|| Error::ResourceNotCreated(self.name()).into())
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ResourceBackend> {
        &self.inner.backend
    }

    fn check_alive(&self) -> Result<()> {
        if self.inner.lifetime.is_dispose_requested() {
            Err(Error::ResourceDisposed(self.name()).into())
        } else {
            Ok(())
        }
    }
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        if self.lifetime.force_dispose() {
            debug!("Resource `{}` dropped without a disposal request, disposing it now", self.realization.label());
        }
        #[cfg(feature = "log-objects")]
        trace!("Destroying resource #{}", self.id);
    }
}
