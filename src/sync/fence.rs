use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use crate::sync::event::ResetEvent;

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct FenceInner {
    id: u64,
    event: ResetEvent,
}

/// Host-visible synchronization object, signaled when the GPU work it was submitted with has completed.
///
/// A fence pairs a signaled flag with a waitable [`ResetEvent`]. Once signaled it stays signaled until it is
/// reset through [`Device::reset_fence`](crate::Device::reset_fence), and any number of waiters may observe the
/// same signal. Fences are cheap to clone, all clones refer to the same object.
///
/// Fences can also be awaited:
/// ```
/// # use deimos::prelude::*;
/// # async fn run(device: Device, cmd: LogicalCommandBuffer) -> anyhow::Result<()> {
/// let fence = device.create_fence(false);
/// device.submit(cmd, Some(&fence))?;
/// fence.clone().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    /// Create a new fence, possibly in the signaled status.
    pub fn new(signaled: bool) -> Self {
        let id = NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "log-objects")]
        trace!("Created new fence #{id} (signaled = {signaled})");
        Self {
            inner: Arc::new(FenceInner {
                id,
                event: ResetEvent::new(signaled),
            }),
        }
    }

    /// Process-unique identifier of this fence.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the fence is currently signaled.
    pub fn is_signaled(&self) -> bool {
        self.inner.event.is_set()
    }

    /// Block until the fence is signaled. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.inner.event.wait(timeout)
    }

    pub(crate) fn event(&self) -> &ResetEvent {
        &self.inner.event
    }

    /// Signal the fence. Returns `true` if it was not signaled before.
    pub(crate) fn set(&self) -> bool {
        self.inner.event.set()
    }

    pub(crate) fn reset(&self) {
        self.inner.event.reset()
    }

    /// Whether two fence handles refer to the same fence object.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Unpin for Fence {}

impl std::future::Future for Fence {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.event.register_waker(ctx.waker()) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(feature = "log-objects")]
impl Drop for FenceInner {
    fn drop(&mut self) {
        trace!("Destroying fence #{}", self.id);
    }
}
