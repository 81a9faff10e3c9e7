//! Cross-backend GPU command submission and resource lifetime engine
//!
//! Deimos sits between a renderer and a native graphics backend. It keeps every resource alive for exactly as long
//! as the host or an in-flight command buffer needs it, realizes native objects lazily on the context that owns the
//! device, dispatches GPU completion notifications exactly once, and emulates pipeline state objects and bind groups
//! on state-machine style backends.
//!
//! To get started, import the prelude
//! ```
//! use deimos::prelude::*;
//! ```
//!
//! # Example
//!
//! A [`Device`] is created on top of a backend. The [`HeadlessBackend`] runs entirely on the host.
//! ```
//! use std::sync::Arc;
//! use deimos::prelude::*;
//! # fn run() -> anyhow::Result<()> {
//! let backend = Arc::new(HeadlessBackend::new().with_delivery(Delivery::Immediate));
//! let device = Device::new(backend, DeviceBuilder::new().name("demo").build())?;
//!
//! let buffer = device.create_buffer(
//!     "staging",
//!     BufferDescription {
//!         size: 1024,
//!         usage: vk::BufferUsageFlags::TRANSFER_SRC,
//!         memory: MemoryType::CpuToGpu,
//!     },
//! );
//! let mut cmd = device.begin_commands("upload");
//! cmd.reference(&buffer)?;
//!
//! let fence = device.create_fence(false);
//! device.submit(cmd, Some(&fence))?;
//! device.wait_for_fence(&fence, INFINITE_TIMEOUT);
//!
//! device.request_disposal(&buffer)?;
//! device.flush_disposals()?;
//! # Ok(())
//! # }
//! ```
//! For further example code, check out the following modules
//! - [`sync`] for fences, multi-fence waits and the submission tracker.
//! - [`resource`] for tracked resources, their lifetime, deferred realization and mapping.
//! - [`command_buffer`] for logical command buffers.
//! - [`pipeline`] for pipeline descriptions.
//! - [`emulation`] for binding state emulation on backends without pipeline state objects.
//! - [`backend`] for the backends shipped with deimos.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod backend;
pub mod command_buffer;
pub mod core;
pub mod emulation;
pub mod pipeline;
pub mod resource;
pub mod sync;
pub mod util;
