//! Fence waits, signals and resets.

use std::time::Duration;

use anyhow::Result;
use futures::future::{join_all, select_all};

use crate::{Error, Fence};
use crate::sync::event::{self, ResetEvent};
use crate::sync::wait_pool::WaitHandlePool;

/// Timeout value meaning "wait forever".
pub const INFINITE_TIMEOUT: u64 = u64::MAX;

/// Convert a nanosecond timeout to the millisecond granularity of the native wait. [`INFINITE_TIMEOUT`] maps to
/// `None`, every other value is truncated to whole milliseconds and saturated at `i32::MAX`.
pub fn native_timeout(timeout_ns: u64) -> Option<Duration> {
    if timeout_ns == INFINITE_TIMEOUT {
        None
    } else {
        let millis = (timeout_ns / 1_000_000).min(i32::MAX as u64);
        Some(Duration::from_millis(millis))
    }
}

/// Waits on, signals and resets [`Fence`]s. Multi-fence waits draw their wait-handle arrays from a shared
/// [`WaitHandlePool`].
///
/// Signal and reset of a single fence are not ordered against waits on that same fence: the caller must not
/// reset a fence while also waiting on it.
#[derive(Debug, Default)]
pub struct FenceSync {
    pool: WaitHandlePool,
}

impl FenceSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the wait-handle pool.
    pub fn pool(&self) -> &WaitHandlePool {
        &self.pool
    }

    /// Wait on a single fence.
    pub fn wait_one(&self, fence: &Fence, timeout_ns: u64) -> bool {
        let signaled = fence.wait(native_timeout(timeout_ns));
        if !signaled {
            debug!("Wait on fence #{} timed out after {timeout_ns} ns", fence.id());
        }
        signaled
    }

    /// Wait on a set of fences. With `wait_all`, returns `true` iff every fence is signaled within the timeout.
    /// Otherwise returns `true` iff at least one of them is.
    /// # Errors
    /// Fails if `fences` is empty.
    pub fn wait(&self, fences: &[&Fence], wait_all: bool, timeout_ns: u64) -> Result<bool> {
        if fences.is_empty() {
            return Err(Error::EmptyFenceSet.into());
        }

        let mut set = self.pool.acquire(fences.len());
        for (handle, fence) in set.handles.iter_mut().zip(fences) {
            *handle = Some((*fence).clone());
        }

        let events = set
            .handles
            .iter()
            .flatten()
            .map(Fence::event)
            .collect::<Vec<&ResetEvent>>();
        let result = event::wait_many(&events, &set.slot, wait_all, native_timeout(timeout_ns));
        drop(events);

        self.pool.release(set);
        if !result {
            debug!(
                "Wait on {} fences (wait_all = {wait_all}) timed out after {timeout_ns} ns",
                fences.len()
            );
        }
        Ok(result)
    }

    /// Await a set of fences without blocking a thread. Resolves once every fence is signaled, or with
    /// `wait_all == false`, once any of them is.
    /// # Errors
    /// Fails if `fences` is empty.
    pub async fn wait_async(&self, fences: &[&Fence], wait_all: bool) -> Result<()> {
        if fences.is_empty() {
            return Err(Error::EmptyFenceSet.into());
        }
        let fences = fences.iter().map(|fence| (*fence).clone()).collect::<Vec<_>>();
        if wait_all {
            join_all(fences).await;
        } else {
            select_all(fences).await;
        }
        Ok(())
    }

    /// Signal a fence, waking all of its waiters.
    pub fn signal(&self, fence: &Fence) {
        fence.set();
    }

    /// Reset a fence to the unsignaled status.
    pub fn reset(&self, fence: &Fence) {
        fence.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_conversion() {
        assert_eq!(native_timeout(INFINITE_TIMEOUT), None);
        assert_eq!(native_timeout(0), Some(Duration::ZERO));
        assert_eq!(native_timeout(999_999), Some(Duration::ZERO));
        assert_eq!(native_timeout(5_000_000), Some(Duration::from_millis(5)));
        assert_eq!(
            native_timeout(u64::MAX - 1),
            Some(Duration::from_millis(i32::MAX as u64))
        );
    }
}
