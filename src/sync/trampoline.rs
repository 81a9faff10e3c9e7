//! Completion delivery for backends that cannot store closures.
//!
//! Such backends accept a plain function pointer plus one opaque pointer-sized value. Every tracker that
//! runs on such a backend holds a [`Registration`], which maps a unique block value to the tracker in a
//! global registry. The single static dispatcher [`on_command_buffer_completed_static`] resolves the block back
//! to its tracker and forwards the notification. Dropping the registration removes the entry again, so the
//! registry never outlives the trackers it points to.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

use crate::core::backend::NativeCommandBuffer;
use crate::sync::tracker::TrackerInner;

static REGISTRY: Lazy<Mutex<HashMap<usize, Weak<TrackerInner>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

// Zero is never handed out, so a null block can never resolve to a tracker.
static NEXT_BLOCK: AtomicUsize = AtomicUsize::new(1);

/// Scoped registry entry of one tracker. The entry lives exactly as long as this value.
#[derive(Debug)]
pub struct Registration {
    block: usize,
}

impl Registration {
    pub(crate) fn register(tracker: Weak<TrackerInner>) -> Self {
        let block = NEXT_BLOCK.fetch_add(1, Ordering::Relaxed);
        REGISTRY
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(block, tracker);
        #[cfg(feature = "log-objects")]
        trace!("Registered completion trampoline block {block:#x}");
        Self {
            block,
        }
    }

    /// The opaque block value passed to the backend together with the static dispatcher.
    pub fn block(&self) -> usize {
        self.block
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        REGISTRY
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.block);
        #[cfg(feature = "log-objects")]
        trace!("Removed completion trampoline block {:#x}", self.block);
    }
}

/// Number of trackers currently reachable through the trampoline registry.
pub fn registered_trackers() -> usize {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner()).len()
}

/// The static completion dispatcher handed to backends running in [`CompletionMode::Static`](crate::CompletionMode::Static).
pub extern "C" fn on_command_buffer_completed_static(block: *const c_void, native: u64) {
    // Resolve under the registry lock, dispatch outside of it.
    let tracker = REGISTRY
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&(block as usize))
        .and_then(Weak::upgrade);
    match tracker {
        Some(tracker) => tracker.on_completed(NativeCommandBuffer(native)),
        None => trace!("Completion for native command buffer {native:#x} arrived for unregistered block {:#x}", block as usize),
    }
}
