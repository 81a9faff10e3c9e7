//! The sync module provides host-side synchronization with the GPU.
//!
//! - The [`fence`] module provides the [`Fence`](crate::Fence) type, used for CPU-GPU sync,
//! as well as an implementation for [`Future`](std::future::Future) for it.
//! - The [`event`] module holds the manual-reset event that fences are built on.
//! - [`fence_sync`] implements single and multi-fence waits, backed by the pooled wait-handle arrays in [`wait_pool`].
//! - The [`tracker`] module is the submission ledger, which dispatches completion notifications
//! exactly once per native command buffer.
//! - [`trampoline`] routes completion notifications of backends without closure support back to their tracker.

pub mod event;
pub mod fence;
pub mod fence_sync;
pub mod tracker;
pub mod trampoline;
pub mod wait_pool;
