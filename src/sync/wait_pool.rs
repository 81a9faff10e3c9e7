//! Pool of reusable wait-handle arrays for multi-fence waits.
//!
//! Every multi-fence wait needs an array of wait handles with one entry per fence, plus a wake-up slot
//! registered on each of them. Those are pooled here, keyed by array length. The pool grows on demand and
//! arrays are handed back after each wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::Fence;
use crate::sync::event::WaitSlot;

/// A pooled wait-handle array.
#[derive(Debug)]
pub(crate) struct WaitSet {
    pub handles: Vec<Option<Fence>>,
    pub slot: Arc<WaitSlot>,
}

impl WaitSet {
    fn new(length: usize) -> Self {
        Self {
            handles: vec![None; length],
            slot: Arc::new(WaitSlot::default()),
        }
    }

    /// Called right before the set is released back to the pool, drops the fence references so the pool
    /// never keeps fences alive.
    fn on_release(&mut self) {
        self.handles.iter_mut().for_each(|handle| *handle = None);
    }
}

/// Process-local pool of [`WaitSet`]s, keyed by length.
#[derive(Debug, Default)]
pub struct WaitHandlePool {
    sets: Mutex<HashMap<usize, Vec<WaitSet>>>,
}

impl WaitHandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grab a set of the given length from the pool. If there is none left, this allocates a new one.
    pub(crate) fn acquire(&self, length: usize) -> WaitSet {
        let pooled = self
            .sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&length)
            .and_then(|sets| sets.pop());
        pooled.unwrap_or_else(|| WaitSet::new(length))
    }

    /// Release a set back into the pool.
    pub(crate) fn release(&self, mut set: WaitSet) {
        set.on_release();
        self.sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(set.handles.len())
            .or_default()
            .push(set);
    }

    /// Number of idle sets of the given length currently held by the pool.
    pub fn pooled(&self, length: usize) -> usize {
        self.sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&length)
            .map_or(0, Vec::len)
    }
}
