//! Exposes the deimos error type

use ash::vk;
use thiserror::Error;

use crate::pipeline::layout::ResourceKind;

/// Broad classification of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller did something that is not allowed, such as using a disposed resource or
    /// issuing an operation the active backend cannot perform. Fix the calling code.
    Usage,
    /// A native allocation, submission or state call failed. These are generally not transient
    /// within a session and are never retried.
    Backend,
}

/// Error type that deimos can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Tried to use a resource after disposal was requested for it.
    #[error("Resource `{0}` has already been disposed.")]
    ResourceDisposed(String),
    /// Tried to access the native object of a resource that was never realized.
    #[error("Resource `{0}` has not been created yet.")]
    ResourceNotCreated(String),
    /// `release()` was called more often than `retain()`.
    #[error("Unbalanced release on resource `{0}`: no outstanding references.")]
    UnbalancedRelease(String),
    /// A uniform buffer range is smaller than the block the shader declares.
    #[error("Not enough data in uniform buffer `{name}` (slot {slot}, element {element}). Shader expects at least {expected} bytes, but the bound range only contains {actual} bytes.")]
    UndersizedUniformBuffer {
        name: String,
        slot: u32,
        element: u32,
        expected: u64,
        actual: u64,
    },
    /// The operation cannot be performed by the active backend.
    #[error("`{operation}` is not supported by the {backend} backend.")]
    Unsupported { operation: &'static str, backend: String },
    /// Format has no translation or size information.
    #[error("Format {0:?} is not supported here.")]
    UnsupportedFormat(vk::Format),
    /// Draw or dispatch without a pipeline bound.
    #[error("No pipeline bound. Bind a pipeline before issuing draws or dispatches.")]
    NoPipelineBound,
    /// The bound pipeline declares a resource set slot that has nothing bound to it.
    #[error("No resource set bound to slot {0}.")]
    NoResourceSet(u32),
    /// The bound pipeline declares a vertex layout that has no vertex buffer bound.
    #[error("No vertex buffer bound to slot {0}.")]
    NoVertexBuffer(u32),
    /// Indexed draw without an index buffer.
    #[error("No index buffer bound.")]
    NoIndexBuffer,
    /// The number of dynamic offsets does not match the resource layout.
    #[error("Resource set at slot {slot} expects {expected} dynamic offsets, but {actual} were given.")]
    DynamicOffsetMismatch { slot: u32, expected: usize, actual: usize },
    /// A buffer operation was given a texture.
    #[error("Resource `{0}` is not a buffer.")]
    NotABuffer(String),
    /// A buffer range extends past the end of its buffer.
    #[error("Range of {range} bytes at offset {offset} exceeds the {size} bytes of buffer `{name}`.")]
    BufferRangeOutOfBounds { name: String, offset: u64, range: u64, size: u64 },
    /// A resource set was created with a different number of resources than its layout declares.
    #[error("Resource set has {actual} resources, but its layout declares {expected} elements.")]
    ResourceCountMismatch { expected: usize, actual: usize },
    /// A bound resource does not match the kind declared in the layout.
    #[error("Resource bound to element `{name}` does not match its declared kind {kind:?}.")]
    ResourceKindMismatch { name: String, kind: ResourceKind },
    /// Multi-fence wait with no fences.
    #[error("Empty fence set passed to a multi-fence wait.")]
    EmptyFenceSet,
    /// Batch submission with no command buffers.
    #[error("Empty submit batch.")]
    EmptyBatch,
    /// Subresource index out of range.
    #[error("Invalid subresource {subresource} for resource `{name}`.")]
    InvalidSubresource { name: String, subresource: u32 },
    /// Resource does not live in host-visible memory.
    #[error("Resource `{0}` is not host visible and cannot be mapped.")]
    Unmappable(String),
    /// The subresource is already mapped in a way that conflicts with the requested mapping.
    #[error("Subresource {subresource} of resource `{name}` is already mapped.")]
    AlreadyMapped { name: String, subresource: u32 },
    /// Tried to write through a read-only mapping.
    #[error("Resource `{0}` is mapped for reading only.")]
    ReadOnlyMapping(String),
    /// A backend call failed.
    #[error("Backend error in `{operation}` ({context}): {message}")]
    Backend {
        operation: &'static str,
        context: String,
        message: String,
    },
    /// An emulated-backend state call reported an error code.
    #[error("Native call `{operation}` failed with error code {code:#06x}.")]
    NativeCall { operation: &'static str, code: u32 },
    /// A submission failed part-way, the device can no longer be used.
    #[error("Device lost.")]
    DeviceLost,
}

impl Error {
    /// Classify this error as a usage error or a backend error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Backend { .. } | Error::NativeCall { .. } | Error::DeviceLost => ErrorKind::Backend,
            _ => ErrorKind::Usage,
        }
    }

    /// Wrap a failed backend call with the operation and object it was performed on.
    pub(crate) fn backend(operation: &'static str, context: impl Into<String>, err: anyhow::Error) -> Self {
        Error::Backend {
            operation,
            context: context.into(),
            message: format!("{err:#}"),
        }
    }
}

