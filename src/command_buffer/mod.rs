//! Logical command buffers and their submission handles.
//!
//! A [`LogicalCommandBuffer`] is what the application records into and submits. It moves through the states
//! [`Recorded`](CommandBufferStatus::Recorded), [`Submitted`](CommandBufferStatus::Submitted) and
//! [`Completed`](CommandBufferStatus::Completed). Every resource the recording touches is referenced by the buffer,
//! which keeps it from being destroyed until the GPU is done with it. References are released exactly once: when the
//! buffer completes, or when it is dropped without ever having been submitted.
//!
//! Submitting a buffer hands its ownership to the [`CommandBufferTracker`](crate::CommandBufferTracker) and returns a
//! [`CommandBufferHandle`], which can be used to observe its status afterwards.
//!
//! # Example
//! ```
//! # use deimos::prelude::*;
//! # fn run(device: Device, buffer: Resource) -> anyhow::Result<()> {
//! let mut cmd = device.begin_commands("upload");
//! cmd.reference(&buffer)?;
//! cmd.on_complete(|| println!("upload done"));
//! let handle = device.submit(cmd, None)?;
//! device.wait_for_idle();
//! assert!(handle.is_completed());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use anyhow::Result;

use crate::Resource;
use crate::core::backend::NativeCommandBuffer;

static NEXT_COMMAND_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a logical command buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandBufferStatus {
    Recorded = 0,
    Submitted = 1,
    Completed = 2,
}

impl CommandBufferStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => CommandBufferStatus::Recorded,
            1 => CommandBufferStatus::Submitted,
            _ => CommandBufferStatus::Completed,
        }
    }
}

type CompletionCallback = Box<dyn FnOnce() + Send>;

/// A recording that can be submitted for execution. See the [module level documentation](self).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct LogicalCommandBuffer {
    id: u64,
    label: String,
    status: Arc<AtomicU8>,
    resources: Vec<Resource>,
    #[derivative(Debug = "ignore")]
    on_complete: Vec<CompletionCallback>,
    native: Option<NativeCommandBuffer>,
    order: Option<u64>,
}

impl LogicalCommandBuffer {
    /// Start a new, empty recording.
    pub fn new(label: impl Into<String>) -> Self {
        let id = NEXT_COMMAND_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        #[cfg(feature = "log-objects")]
        trace!("Created new command buffer #{id} `{label}`");
        Self {
            id,
            label,
            status: Arc::new(AtomicU8::new(CommandBufferStatus::Recorded as u8)),
            resources: vec![],
            on_complete: vec![],
            native: None,
            order: None,
        }
    }

    /// Process-unique identifier of this command buffer.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> CommandBufferStatus {
        CommandBufferStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Reference a resource for the lifetime of this command buffer. Referencing the same resource twice is a no-op.
    /// # Errors
    /// Fails with [`Error::ResourceDisposed`](crate::Error::ResourceDisposed) if disposal of the resource was requested.
    pub fn reference(&mut self, resource: &Resource) -> Result<()> {
        if self.resources.iter().any(|r| r.same_as(resource)) {
            return Ok(());
        }
        resource.retain()?;
        self.resources.push(resource.clone());
        Ok(())
    }

    /// Resources currently referenced by this command buffer.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Register a callback to run once the command buffer has completed. Callbacks run on whichever thread delivers
    /// the completion, after the referenced resources have been released.
    pub fn on_complete(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_complete.push(Box::new(f));
    }

    /// Native handle this buffer was submitted as, once submitted.
    pub fn native(&self) -> Option<NativeCommandBuffer> {
        self.native
    }

    /// Submission handle, once submitted.
    pub fn handle(&self) -> Option<CommandBufferHandle> {
        Some(CommandBufferHandle {
            native: self.native?,
            order: self.order?,
            status: self.status.clone(),
        })
    }

    pub(crate) fn mark_submitted(&mut self, native: NativeCommandBuffer, order: u64) -> CommandBufferHandle {
        self.native = Some(native);
        self.order = Some(order);
        self.status.store(CommandBufferStatus::Submitted as u8, Ordering::Release);
        CommandBufferHandle {
            native,
            order,
            status: self.status.clone(),
        }
    }

    /// Completion notification: releases every referenced resource, runs the completion callbacks and marks the
    /// buffer completed.
    pub(crate) fn complete(mut self) {
        self.release_resources();
        std::mem::take(&mut self.on_complete)
            .into_iter()
            .for_each(|f| f());
        self.status.store(CommandBufferStatus::Completed as u8, Ordering::Release);
    }

    fn release_resources(&mut self) {
        for resource in self.resources.drain(..) {
            if let Err(e) = resource.release() {
                error!("Command buffer `{}` failed to release resource: {e:#}", self.label);
            }
        }
    }
}

impl Drop for LogicalCommandBuffer {
    fn drop(&mut self) {
        self.release_resources();
        #[cfg(feature = "log-objects")]
        trace!("Destroying command buffer #{}", self.id);
    }
}

/// Handle to a submitted command buffer.
#[derive(Debug, Clone)]
pub struct CommandBufferHandle {
    native: NativeCommandBuffer,
    order: u64,
    status: Arc<AtomicU8>,
}

impl CommandBufferHandle {
    /// The native in-flight handle. Buffers submitted in one batch report their own native handle here.
    pub fn native(&self) -> NativeCommandBuffer {
        self.native
    }

    /// Position in submission order, unique per device.
    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn status(&self) -> CommandBufferStatus {
        CommandBufferStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub fn is_completed(&self) -> bool {
        self.status() == CommandBufferStatus::Completed
    }
}
