//! Manual-reset events, the waitable primitive behind every [`Fence`](crate::Fence).
//!
//! An event stays signaled until it is explicitly reset, and any number of threads or tasks can observe
//! the same signal. Besides waiting on a single event, a thread can wait on a whole set of events with
//! all-of or any-of semantics through a [`WaitSlot`] registered on each of them.

use std::sync::{Arc, Condvar, Mutex};
use std::task::Waker;
use std::time::{Duration, Instant};

/// Wake-up channel for a thread waiting on several events at once.
///
/// Lock order is always slot first, then event. Signalling releases the event lock before touching
/// any slot, so the two can never deadlock.
#[derive(Debug, Default)]
pub(crate) struct WaitSlot {
    lock: Mutex<()>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct EventState {
    signaled: bool,
    slots: Vec<Arc<WaitSlot>>,
    wakers: Vec<Waker>,
}

/// A manual-reset event.
#[derive(Debug, Default)]
pub struct ResetEvent {
    state: Mutex<EventState>,
    cond: Condvar,
}

/// Blocks on `cond` until `deadline`, or forever if there is none. Returns the guard and whether the
/// deadline has passed.
fn wait_until<'a, T>(cond: &Condvar, guard: std::sync::MutexGuard<'a, T>, deadline: Option<Instant>) -> (std::sync::MutexGuard<'a, T>, bool) {
    match deadline {
        None => (cond.wait(guard).unwrap_or_else(|e| e.into_inner()), false),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return (guard, true);
            }
            let (guard, _) = cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            (guard, Instant::now() >= deadline)
        }
    }
}

impl ResetEvent {
    /// Create a new event, possibly in the signaled state.
    pub fn new(signaled: bool) -> Self {
        Self {
            state: Mutex::new(EventState {
                signaled,
                ..Default::default()
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current signal state.
    pub fn is_set(&self) -> bool {
        self.lock().signaled
    }

    /// Signal the event, waking every waiter. Returns `true` if the event was not signaled before.
    pub fn set(&self) -> bool {
        let (was_set, slots, wakers) = {
            let mut state = self.lock();
            let was_set = state.signaled;
            state.signaled = true;
            (was_set, state.slots.clone(), std::mem::take(&mut state.wakers))
        };
        self.cond.notify_all();
        for slot in slots {
            let _guard = slot.lock.lock().unwrap_or_else(|e| e.into_inner());
            slot.cond.notify_all();
        }
        wakers.into_iter().for_each(Waker::wake);
        !was_set
    }

    /// Clear the signal state.
    pub fn reset(&self) {
        self.lock().signaled = false;
    }

    /// Wait for this event. `timeout` of `None` waits forever. Returns whether the event was signaled.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.signaled {
                return true;
            }
            let (guard, expired) = wait_until(&self.cond, state, deadline);
            state = guard;
            if expired {
                return state.signaled;
            }
        }
    }

    /// Register a waker to be woken on the next signal.
    /// Returns `true` if the event is already signaled, in which case nothing is registered.
    pub(crate) fn register_waker(&self, waker: &Waker) -> bool {
        let mut state = self.lock();
        if state.signaled {
            return true;
        }
        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
        false
    }

    fn add_slot(&self, slot: &Arc<WaitSlot>) {
        self.lock().slots.push(slot.clone());
    }

    fn remove_slot(&self, slot: &Arc<WaitSlot>) {
        let mut state = self.lock();
        if let Some(index) = state.slots.iter().position(|s| Arc::ptr_eq(s, slot)) {
            state.slots.swap_remove(index);
        }
    }
}

/// Wait on several events at once. With `wait_all`, returns `true` once every event is signaled at the same
/// time. Otherwise returns `true` once any of them is. Returns `false` if the timeout expires first.
pub(crate) fn wait_many(events: &[&ResetEvent], slot: &Arc<WaitSlot>, wait_all: bool, timeout: Option<Duration>) -> bool {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let ready = |events: &[&ResetEvent]| {
        if wait_all {
            events.iter().all(|event| event.is_set())
        } else {
            events.iter().any(|event| event.is_set())
        }
    };

    events.iter().for_each(|event| event.add_slot(slot));
    let result = {
        let mut guard = slot.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if ready(events) {
                break true;
            }
            let (next, expired) = wait_until(&slot.cond, guard, deadline);
            guard = next;
            if expired {
                break ready(events);
            }
        }
    };
    events.iter().for_each(|event| event.remove_slot(slot));
    result
}
