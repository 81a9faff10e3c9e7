//! The submission ledger.
//!
//! The [`CommandBufferTracker`] records which logical command buffers and which fence belong to every native
//! in-flight command buffer, and dispatches completion exactly once when the backend reports it. A single mutex
//! guards submission, lookup and completion, so a completion can never race ahead of the submission that
//! registers it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::Result;
use multimap::MultiMap;

use crate::{CommandBufferHandle, Error, Fence, LogicalCommandBuffer};
use crate::core::backend::{CompletionHandler, CompletionMode, NativeCommandBuffer, NativeStatus, SubmissionBackend};
use crate::sync::trampoline::{on_command_buffer_completed_static, Registration};

#[derive(Debug, Default)]
struct Ledger {
    /// Logical buffers keyed by the native handle that carries their completion notification.
    submitted: MultiMap<NativeCommandBuffer, LogicalCommandBuffer>,
    fences: HashMap<NativeCommandBuffer, Fence>,
    /// Earlier native handles of a batch, released together with the final handle.
    batches: HashMap<NativeCommandBuffer, Vec<NativeCommandBuffer>>,
    latest: Option<NativeCommandBuffer>,
    next_order: u64,
    lost: bool,
}

impl Ledger {
    fn next_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    /// Empty the ledger, returning the logical buffers and every native handle they were submitted under.
    fn drain(&mut self) -> (Vec<LogicalCommandBuffer>, Vec<NativeCommandBuffer>) {
        let submitted = std::mem::take(&mut self.submitted);
        let mut batches = std::mem::take(&mut self.batches);
        self.fences.clear();
        self.latest = None;

        let mut buffers = vec![];
        let mut natives = vec![];
        for (native, cmds) in submitted {
            buffers.extend(cmds);
            natives.extend(batches.remove(&native).unwrap_or_default());
            natives.push(native);
        }
        (buffers, natives)
    }

    /// Undo the registration of a submission that never reached the GPU.
    fn rollback(&mut self, native: NativeCommandBuffer, previous_latest: Option<NativeCommandBuffer>) -> Vec<LogicalCommandBuffer> {
        self.fences.remove(&native);
        self.batches.remove(&native);
        if self.latest == Some(native) {
            self.latest = previous_latest;
        }
        self.submitted.remove(&native).unwrap_or_default()
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct TrackerInner {
    #[derivative(Debug = "ignore")]
    backend: Arc<dyn SubmissionBackend>,
    ledger: Mutex<Ledger>,
    handler: CompletionHandler,
    registration: Option<Registration>,
}

/// Tracks in-flight submissions and dispatches their completion. See the [module level documentation](self).
/// Cloning is cheap, all clones share the same ledger.
#[derive(Debug, Clone)]
pub struct CommandBufferTracker {
    inner: Arc<TrackerInner>,
}

impl CommandBufferTracker {
    /// Create a tracker for a backend. For backends in [`CompletionMode::Static`], this registers the tracker with
    /// the trampoline registry for as long as it lives.
    pub fn new(backend: Arc<dyn SubmissionBackend>) -> Self {
        let mode = backend.completion_mode();
        let inner = Arc::new_cyclic(|weak: &Weak<TrackerInner>| {
            let (handler, registration) = match mode {
                CompletionMode::Closure => {
                    let weak = weak.clone();
                    let handler = CompletionHandler::Closure(Arc::new(move |native| {
                        if let Some(tracker) = weak.upgrade() {
                            tracker.on_completed(native);
                        }
                    }));
                    (handler, None)
                }
                CompletionMode::Static => {
                    let registration = Registration::register(weak.clone());
                    let handler = CompletionHandler::Static {
                        invoke: on_command_buffer_completed_static,
                        block: registration.block(),
                    };
                    (handler, Some(registration))
                }
            };
            TrackerInner {
                backend,
                ledger: Mutex::new(Ledger::default()),
                handler,
                registration,
            }
        });
        Self {
            inner,
        }
    }

    /// Submit a single logical command buffer. If a fence is given, it is signaled once the buffer completes.
    /// # Errors
    /// - Fails with [`Error::DeviceLost`] if an earlier batch failed part-way.
    /// - Fails with [`Error::Backend`] if the backend cannot prepare or commit the buffer. Nothing stays
    ///   registered in that case.
    pub fn submit(&self, cmd: LogicalCommandBuffer, fence: Option<&Fence>) -> Result<CommandBufferHandle> {
        self.inner.submit(cmd, fence)
    }

    /// Submit several logical command buffers as one batch. Every buffer in the batch is recorded under the
    /// native handle of the last one, which alone carries the completion notification and the fence.
    /// # Errors
    /// - Fails with [`Error::EmptyBatch`] if `cmds` is empty.
    /// - Fails with [`Error::Backend`] if nothing was committed yet when the backend failed.
    /// - Fails with [`Error::DeviceLost`] if part of the batch was already committed. The tracker refuses all
    ///   further submissions after that.
    pub fn submit_batch(&self, cmds: Vec<LogicalCommandBuffer>, fence: Option<&Fence>) -> Result<Vec<CommandBufferHandle>> {
        self.inner.submit_batch(cmds, fence)
    }

    /// Dispatch the completion of a native command buffer. Backends normally reach this through the registered
    /// [`CompletionHandler`]. Unknown handles are ignored.
    pub fn on_completed(&self, native: NativeCommandBuffer) {
        self.inner.on_completed(native)
    }

    /// Block until the most recently submitted native command buffer has completed. Does nothing if there is none.
    pub fn wait_for_idle(&self) {
        self.inner.wait_for_idle()
    }

    /// Forget every submission that has not completed yet. Their logical buffers are dropped without running
    /// completion callbacks, which releases their resource references, and their fences stay unsignaled. Later
    /// completion notifications for them are ignored. Returns the number of logical buffers dropped.
    pub fn abandon(&self) -> usize {
        self.inner.abandon()
    }

    /// Number of native handles that still await their completion notification.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().submitted.keys().count()
    }

    /// The most recently submitted native handle that has not completed yet.
    pub fn latest(&self) -> Option<NativeCommandBuffer> {
        self.inner.lock().latest
    }

    /// Whether a partially failed batch left the device unusable.
    pub fn is_lost(&self) -> bool {
        self.inner.lock().lost
    }

    /// Opaque trampoline block value of this tracker, if it uses static completion delivery.
    pub fn trampoline_block(&self) -> Option<usize> {
        self.inner.registration.as_ref().map(Registration::block)
    }
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        // Every ledger mutation completes before user code runs, so a poisoned ledger is still consistent.
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prepare(&self, cmd: &LogicalCommandBuffer) -> Result<NativeCommandBuffer> {
        self.backend
            .prepare(cmd)
            .map_err(|e| Error::backend("prepare", format!("command buffer `{}`", cmd.label()), e).into())
    }

    fn submit(&self, mut cmd: LogicalCommandBuffer, fence: Option<&Fence>) -> Result<CommandBufferHandle> {
        if self.lock().lost {
            return Err(Error::DeviceLost.into());
        }

        let native = self.prepare(&cmd)?;
        let label = cmd.label().to_owned();

        let (handle, previous_latest) = {
            let mut ledger = self.lock();
            let order = ledger.next_order();
            let handle = cmd.mark_submitted(native, order);
            ledger.submitted.insert(native, cmd);
            if let Some(fence) = fence {
                ledger.fences.insert(native, fence.clone());
            }
            let previous_latest = ledger.latest.replace(native);
            if let Err(e) = self.backend.add_completed_handler(native, self.handler.clone()) {
                let rolled_back = ledger.rollback(native, previous_latest);
                drop(ledger);
                drop(rolled_back);
                self.backend.release(native);
                return Err(Error::backend("add_completed_handler", format!("command buffer `{label}`"), e).into());
            }
            (handle, previous_latest)
        };

        if let Err(e) = self.backend.commit(native) {
            let rolled_back = self.lock().rollback(native, previous_latest);
            drop(rolled_back);
            self.backend.release(native);
            return Err(Error::backend("commit", format!("command buffer `{label}`"), e).into());
        }

        debug!("Submitted command buffer `{label}` as native {:#x} (order {})", native.0, handle.order());
        Ok(handle)
    }

    fn submit_batch(&self, cmds: Vec<LogicalCommandBuffer>, fence: Option<&Fence>) -> Result<Vec<CommandBufferHandle>> {
        if cmds.is_empty() {
            return Err(Error::EmptyBatch.into());
        }
        if self.lock().lost {
            return Err(Error::DeviceLost.into());
        }

        // Prepare everything up front so a failure here leaves nothing committed.
        let mut natives = Vec::with_capacity(cmds.len());
        for cmd in &cmds {
            match self.prepare(cmd) {
                Ok(native) => natives.push(native),
                Err(e) => {
                    natives.into_iter().for_each(|native| self.backend.release(native));
                    return Err(e);
                }
            }
        }

        let count = cmds.len();
        let (earlier, last) = natives.split_at(count - 1);
        let last = last[0];

        let (handles, previous_latest) = {
            let mut ledger = self.lock();
            let mut handles = Vec::with_capacity(count);
            for (mut cmd, native) in cmds.into_iter().zip(natives.iter().copied()) {
                let order = ledger.next_order();
                handles.push(cmd.mark_submitted(native, order));
                ledger.submitted.insert(last, cmd);
            }
            if let Some(fence) = fence {
                ledger.fences.insert(last, fence.clone());
            }
            if !earlier.is_empty() {
                ledger.batches.insert(last, earlier.to_vec());
            }
            let previous_latest = ledger.latest.replace(last);
            if let Err(e) = self.backend.add_completed_handler(last, self.handler.clone()) {
                let rolled_back = ledger.rollback(last, previous_latest);
                drop(ledger);
                drop(rolled_back);
                natives.iter().for_each(|native| self.backend.release(*native));
                return Err(Error::backend("add_completed_handler", format!("batch of {count} command buffers"), e).into());
            }
            (handles, previous_latest)
        };

        for (index, native) in natives.iter().enumerate() {
            if let Err(e) = self.backend.commit(*native) {
                if index == 0 {
                    let rolled_back = self.lock().rollback(last, previous_latest);
                    drop(rolled_back);
                    natives.iter().for_each(|native| self.backend.release(*native));
                    return Err(Error::backend("commit", format!("batch of {count} command buffers"), e).into());
                }
                self.lock().lost = true;
                warn!("Batch submission failed after {index} of {count} command buffers were committed, device lost: {e:#}");
                return Err(Error::DeviceLost.into());
            }
        }

        debug!("Submitted batch of {count} command buffers under native {:#x}", last.0);
        Ok(handles)
    }

    pub(crate) fn on_completed(&self, native: NativeCommandBuffer) {
        let (buffers, fence, earlier) = {
            let mut ledger = self.lock();
            let Some(buffers) = ledger.submitted.remove(&native) else {
                trace!("Ignoring completion for unknown native command buffer {:#x}", native.0);
                return;
            };
            let fence = ledger.fences.remove(&native);
            let earlier = ledger.batches.remove(&native).unwrap_or_default();
            if ledger.latest == Some(native) {
                ledger.latest = None;
            }
            (buffers, fence, earlier)
        };

        trace!("Native command buffer {:#x} completed ({} logical buffers)", native.0, buffers.len());
        // Callbacks may submit, the ledger lock must not be held here.
        buffers.into_iter().for_each(LogicalCommandBuffer::complete);
        if let Some(fence) = fence {
            fence.set();
        }
        earlier.into_iter().for_each(|native| self.backend.release(native));
        self.backend.release(native);
    }

    fn abandon(&self) -> usize {
        let (buffers, natives) = self.lock().drain();
        let count = buffers.len();
        drop(buffers);
        natives.into_iter().for_each(|native| self.backend.release(native));
        count
    }

    fn wait_for_idle(&self) {
        let latest = {
            let ledger = self.lock();
            let Some(latest) = ledger.latest else {
                return;
            };
            self.backend.retain(latest);
            latest
        };
        if self.backend.status(latest) == NativeStatus::Pending {
            self.backend.wait_until_completed(latest);
        }
        self.backend.release(latest);
    }
}
