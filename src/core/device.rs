//! The [`Device`] ties a backend to the submission tracker, the fence synchronizer and the disposal queue.

use std::sync::Arc;

use anyhow::Result;

use crate::{
    BindingStateEmulator, BufferDescription, CommandBufferHandle, CommandBufferTracker, DisposalQueue, Fence, FenceSync,
    LogicalCommandBuffer, MapMode, MappedResource, Resource, ResourceDescription, TextureDescription,
};
use crate::core::backend::{BackendFeatures, NativeResource, ResourceBackend, StateBackend, SubmissionBackend};
use crate::core::settings::DeviceSettings;

#[derive(Derivative)]
#[derivative(Debug)]
struct DeviceInner {
    name: String,
    #[derivative(Debug = "ignore")]
    resources: Arc<dyn ResourceBackend>,
    tracker: CommandBufferTracker,
    fences: FenceSync,
    disposal: Arc<DisposalQueue>,
    features: BackendFeatures,
}

/// Entry point for everything that talks to a backend. Internal state is wrapped in an `Arc<DeviceInner>`, so this
/// is safe to clone.
///
/// Dropping the last clone waits for all in-flight command buffers, drops whatever the backend never completed and
/// then flushes the disposal queue.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a device on top of a backend that handles both submission and resource allocation.
    pub fn new<B: SubmissionBackend + ResourceBackend + 'static>(backend: Arc<B>, settings: DeviceSettings) -> Result<Self> {
        let features = settings
            .features
            .unwrap_or_else(|| SubmissionBackend::features(backend.as_ref()));
        info!(
            "Creating device `{}` on backend `{}` (completion mode: {:?}, disposal: {:?})",
            settings.name,
            SubmissionBackend::name(backend.as_ref()),
            backend.completion_mode(),
            settings.disposal
        );
        info!("Backend features: {features:?}");

        let resources: Arc<dyn ResourceBackend> = backend.clone();
        let submission: Arc<dyn SubmissionBackend> = backend;
        let disposal = Arc::new(DisposalQueue::new(resources.clone(), settings.disposal));
        Ok(Device {
            inner: Arc::new(DeviceInner {
                name: settings.name,
                resources,
                tracker: CommandBufferTracker::new(submission),
                fences: FenceSync::new(),
                disposal,
                features,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Capabilities the emulator may rely on.
    pub fn features(&self) -> BackendFeatures {
        self.inner.features
    }

    pub fn tracker(&self) -> &CommandBufferTracker {
        &self.inner.tracker
    }

    pub fn fence_sync(&self) -> &FenceSync {
        &self.inner.fences
    }

    /// Create a buffer. No native object exists until it is realized.
    pub fn create_buffer(&self, name: impl Into<String>, description: BufferDescription) -> Resource {
        self.create_resource(name, ResourceDescription::Buffer(description))
    }

    /// Create a texture. No native object exists until it is realized.
    pub fn create_texture(&self, name: impl Into<String>, description: TextureDescription) -> Resource {
        self.create_resource(name, ResourceDescription::Texture(description))
    }

    pub fn create_resource(&self, name: impl Into<String>, description: ResourceDescription) -> Resource {
        Resource::new(name, description, self.inner.resources.clone(), self.inner.disposal.clone())
    }

    pub fn create_fence(&self, signaled: bool) -> Fence {
        Fence::new(signaled)
    }

    /// Start recording a new logical command buffer.
    pub fn begin_commands(&self, label: impl Into<String>) -> LogicalCommandBuffer {
        LogicalCommandBuffer::new(label)
    }

    /// Start recording a new logical command buffer against an emulated backend state machine.
    pub fn executor<'c, C: StateBackend>(&self, ctx: &'c mut C, label: impl Into<String>) -> BindingStateEmulator<'c, C> {
        BindingStateEmulator::new(ctx, self, LogicalCommandBuffer::new(label))
    }

    /// Submit a command buffer. The fence, if any, is signalled once it completes.
    /// # Errors
    /// - Fails with [`Error::DeviceLost`](crate::Error::DeviceLost) after an earlier batch failed part-way.
    /// - Fails with [`Error::Backend`](crate::Error::Backend) if the backend rejects the submission.
    ///
    /// # Example
    /// ```
    /// # use deimos::prelude::*;
    /// # fn run(device: Device, buffer: Resource) -> anyhow::Result<()> {
    /// let fence = device.create_fence(false);
    /// let mut cmd = device.begin_commands("upload");
    /// cmd.reference(&buffer)?;
    /// cmd.on_complete(|| println!("upload done"));
    /// device.submit(cmd, Some(&fence))?;
    /// device.wait_for_fence(&fence, deimos::INFINITE_TIMEOUT);
    /// # Ok(())
    /// # }
    /// ```
    pub fn submit(&self, cmd: LogicalCommandBuffer, fence: Option<&Fence>) -> Result<CommandBufferHandle> {
        self.inner.tracker.submit(cmd, fence)
    }

    /// Submit several command buffers as one batch. The fence, if any, is signalled once all of them completed.
    pub fn submit_batch(&self, cmds: Vec<LogicalCommandBuffer>, fence: Option<&Fence>) -> Result<Vec<CommandBufferHandle>> {
        self.inner.tracker.submit_batch(cmds, fence)
    }

    /// Block until every command buffer submitted so far has completed.
    pub fn wait_for_idle(&self) {
        self.inner.tracker.wait_for_idle()
    }

    /// Wait for a single fence. Returns `false` on timeout.
    pub fn wait_for_fence(&self, fence: &Fence, timeout_ns: u64) -> bool {
        self.inner.fences.wait_one(fence, timeout_ns)
    }

    /// Wait for any or all of a set of fences. Returns `false` on timeout.
    /// # Errors
    /// Fails with [`Error::EmptyFenceSet`](crate::Error::EmptyFenceSet) if `fences` is empty.
    pub fn wait_for_fences(&self, fences: &[&Fence], wait_all: bool, timeout_ns: u64) -> Result<bool> {
        self.inner.fences.wait(fences, wait_all, timeout_ns)
    }

    pub fn reset_fence(&self, fence: &Fence) {
        self.inner.fences.reset(fence)
    }

    pub fn signal_fence(&self, fence: &Fence) {
        self.inner.fences.signal(fence)
    }

    pub fn retain_resource(&self, resource: &Resource) -> Result<()> {
        resource.retain()
    }

    pub fn release_resource(&self, resource: &Resource) -> Result<()> {
        resource.release()
    }

    /// Request disposal of a resource. Returns `true` if it was disposed right away, `false` if some holder still
    /// references it.
    pub fn request_disposal(&self, resource: &Resource) -> Result<bool> {
        resource.request_disposal()
    }

    /// Create the native object of a resource if that did not happen yet. Call this on the context that owns the
    /// device if the backend requires it.
    pub fn ensure_realized(&self, resource: &Resource) -> Result<NativeResource> {
        resource.ensure_realized()
    }

    /// Map a subresource of a host-visible resource. The resource stays alive until the returned guard is dropped.
    /// # Errors
    /// - Fails with [`Error::Unmappable`](crate::Error::Unmappable) for GPU-only resources.
    /// - Fails with [`Error::InvalidSubresource`](crate::Error::InvalidSubresource) for an out of range subresource.
    /// - Fails with [`Error::AlreadyMapped`](crate::Error::AlreadyMapped) if a writable view of the subresource is
    ///   alive, or if a writable view is requested while any view is alive.
    pub fn map(&self, resource: &Resource, mode: MapMode, subresource: u32) -> Result<MappedResource> {
        MappedResource::new(resource, mode, subresource)
    }

    /// Destroy every queued native object. Returns the number of objects destroyed.
    pub fn flush_disposals(&self) -> Result<usize> {
        let count = self.inner.disposal.flush()?;
        if count > 0 {
            debug!("Device `{}` destroyed {count} native objects", self.inner.name);
        }
        Ok(count)
    }

    /// Number of native objects waiting for [`flush_disposals`](Self::flush_disposals).
    pub fn pending_disposals(&self) -> usize {
        self.inner.disposal.pending()
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.tracker.wait_for_idle();
        let abandoned = self.tracker.abandon();
        if abandoned > 0 {
            warn!("Device `{}` dropped with {abandoned} command buffers still in flight", self.name);
        }
        if let Err(err) = self.disposal.flush() {
            error!("Failed to destroy queued native objects of device `{}`: {err}", self.name);
        }
    }
}

static_assertions::assert_impl_all!(Device: Send, Sync);
