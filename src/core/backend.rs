//! Interfaces consumed from backend collaborators.
//!
//! A backend is split over three traits, matching the three execution models deimos reconciles:
//!
//! - [`SubmissionBackend`] owns native command queues. Completion of a native command buffer is
//!   reported asynchronously, possibly from a driver thread, through a [`CompletionHandler`].
//! - [`ResourceBackend`] allocates and destroys native buffers and textures. Some backends can only
//!   do this on the context that owns the device, which is why deimos realizes resources lazily.
//! - [`StateBackend`] is a GL-style state machine for backends without native pipeline state objects or
//!   bind groups. It is driven exclusively by the [`BindingStateEmulator`](crate::BindingStateEmulator).

use std::ffi::c_void;
use std::fmt::{Debug, Formatter};
use std::ptr::NonNull;
use std::sync::Arc;

use anyhow::Result;

use crate::command_buffer::LogicalCommandBuffer;
use crate::resource::ResourceDescription;

/// Opaque handle of a native in-flight command buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeCommandBuffer(pub u64);

/// Opaque handle of a realized native buffer or texture.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeResource(pub u64);

/// Opaque handle of a native sampler object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeSampler(pub u64);

/// Opaque handle of a linked native shader program on an emulated backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeProgram(pub u64);

/// Execution status of a native command buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    Pending,
    Completed,
}

/// How a backend delivers completion notifications.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompletionMode {
    /// The backend can store and call an arbitrary closure.
    Closure,
    /// The backend can only call a plain function pointer together with an opaque block value.
    /// Deimos resolves the block back to its owning tracker through a scoped registry.
    Static,
}

/// Signature of a statically registered completion trampoline. The first argument is the opaque
/// block value the handler was registered with, the second the raw native command buffer.
pub type CompletionTrampoline = extern "C" fn(block: *const c_void, native: u64);

/// A completion notification target, registered with a native command buffer before it is committed.
#[derive(Clone)]
pub enum CompletionHandler {
    Closure(Arc<dyn Fn(NativeCommandBuffer) + Send + Sync>),
    Static {
        invoke: CompletionTrampoline,
        block: usize,
    },
}

impl CompletionHandler {
    /// Deliver a completion notification. Backends call this from whatever thread observes completion.
    pub fn invoke(&self, native: NativeCommandBuffer) {
        match self {
            CompletionHandler::Closure(f) => f(native),
            CompletionHandler::Static {
                invoke,
                block,
            } => invoke(*block as *const c_void, native.0),
        }
    }
}

impl Debug for CompletionHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionHandler::Closure(_) => write!(f, "CompletionHandler::Closure"),
            CompletionHandler::Static {
                block, ..
            } => write!(f, "CompletionHandler::Static(block = {block:#x})"),
        }
    }
}

/// Capability switches of a backend. Operations that depend on a missing capability report
/// [`Error::Unsupported`](crate::Error::Unsupported) instead of being emulated.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BackendFeatures {
    /// Compute programs can be activated and dispatched.
    pub compute_shader: bool,
    /// Shader storage buffers can be bound.
    pub structured_buffer: bool,
}

/// Queue-level backend interface.
///
/// A submission goes through three steps: [`prepare`](Self::prepare) turns a logical command buffer into a
/// native handle, [`add_completed_handler`](Self::add_completed_handler) registers the completion notification
/// and [`commit`](Self::commit) hands the native buffer to the GPU. The native handle starts with one
/// reference owned by the in-flight submission, which deimos gives back with [`release`](Self::release) once
/// completion has been processed.
pub trait SubmissionBackend: Send + Sync {
    /// Human readable backend name, used in logs and errors.
    fn name(&self) -> &str;
    /// How this backend calls completion handlers.
    fn completion_mode(&self) -> CompletionMode;
    /// Capabilities of this backend.
    fn features(&self) -> BackendFeatures {
        BackendFeatures::default()
    }
    /// Produce the native command buffer for a logical one. Nothing is executed yet.
    fn prepare(&self, cmd: &LogicalCommandBuffer) -> Result<NativeCommandBuffer>;
    /// Register a completion notification. Must be called before [`commit`](Self::commit).
    fn add_completed_handler(&self, native: NativeCommandBuffer, handler: CompletionHandler) -> Result<()>;
    /// Submit the native command buffer for execution.
    fn commit(&self, native: NativeCommandBuffer) -> Result<()>;
    /// Current execution status.
    fn status(&self, native: NativeCommandBuffer) -> NativeStatus;
    /// Block until the native command buffer has completed.
    fn wait_until_completed(&self, native: NativeCommandBuffer);
    /// Add a reference to the native handle.
    fn retain(&self, native: NativeCommandBuffer);
    /// Drop a reference to the native handle.
    fn release(&self, native: NativeCommandBuffer);
}

/// Resource allocation interface. Called only from the context that owns the device when the backend
/// requires it, see [`Realization`](crate::resource::realize::Realization).
pub trait ResourceBackend: Send + Sync {
    /// Allocate a native object for the given description.
    fn allocate(&self, description: &ResourceDescription) -> Result<NativeResource>;
    /// Destroy a native object. Called at most once per allocated object.
    fn destroy(&self, native: NativeResource) -> Result<()>;
    /// Attach a debug label to a native object.
    fn set_label(&self, _native: NativeResource, _label: &str) -> Result<()> {
        Ok(())
    }
    /// Pointer to the host-visible contents of a native object. The pointer must stay valid until the
    /// object is destroyed.
    fn contents(&self, native: NativeResource) -> Result<NonNull<u8>>;
}

/// GL-style state machine of an emulated backend. All enumerations are the constants from
/// [`emulation::gl`](crate::emulation::gl).
///
/// State calls do not return errors themselves. Instead, [`error`](Self::error) is polled after every
/// group of calls, mirroring how such APIs report failures.
pub trait StateBackend {
    /// Human readable backend name, used in errors.
    fn name(&self) -> &str {
        "emulated"
    }
    /// Pop the oldest pending error code, if any.
    fn error(&mut self) -> Option<u32>;

    fn enable(&mut self, cap: u32);
    fn disable(&mut self, cap: u32);
    fn blend_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    fn blend_func_separate(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32);
    fn blend_equation_separate(&mut self, rgb: u32, alpha: u32);
    fn depth_func(&mut self, func: u32);
    fn depth_mask(&mut self, write: bool);
    fn stencil_func_separate(&mut self, face: u32, func: u32, reference: i32, mask: u32);
    fn stencil_mask(&mut self, mask: u32);
    fn cull_face(&mut self, mode: u32);
    fn front_face(&mut self, mode: u32);
    fn use_program(&mut self, program: NativeProgram);

    fn uniform_block_binding(&mut self, program: NativeProgram, block: u32, binding: u32);
    fn shader_storage_block_binding(&mut self, program: NativeProgram, block: u32, binding: u32);
    fn bind_buffer_range(&mut self, target: u32, index: u32, buffer: NativeResource, offset: u64, size: u64);
    fn bind_buffer(&mut self, target: u32, buffer: NativeResource);
    fn unbind_buffer(&mut self, target: u32);
    /// Write `data` at `offset` into the buffer bound to `target`.
    fn buffer_sub_data(&mut self, target: u32, offset: u64, data: &[u8]);
    fn copy_buffer_sub_data(&mut self, read_target: u32, write_target: u32, read_offset: u64, write_offset: u64, size: u64);
    fn set_texture(&mut self, unit: u32, texture: NativeResource);
    fn set_sampler(&mut self, unit: u32, sampler: NativeSampler);
    fn uniform_1i(&mut self, location: i32, value: i32);

    fn enable_vertex_attrib_array(&mut self, index: u32);
    fn vertex_attrib_pointer(&mut self, index: u32, size: u32, ty: u32, normalized: bool, stride: u32, offset: u64);
    fn vertex_attrib_i_pointer(&mut self, index: u32, size: u32, ty: u32, stride: u32, offset: u64);
    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32);

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn depth_range(&mut self, near: f32, far: f32);
    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32);

    fn draw_arrays(&mut self, mode: u32, first: i32, count: i32);
    fn draw_arrays_instanced(&mut self, mode: u32, first: i32, count: i32, instances: i32);
    fn draw_elements(&mut self, mode: u32, count: i32, ty: u32, offset: u64);
    fn draw_elements_instanced(&mut self, mode: u32, count: i32, ty: u32, offset: u64, instances: i32);
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
}
