//! Reference-counted disposal of tracked resources.
//!
//! A [`Lifetime`] counts the holders of a resource besides its owner (command buffers that reference it, mapped
//! views, explicit [`retain`](Lifetime::retain) calls) and owns a one-shot disposal callback. The callback fires
//! exactly once, as soon as the owner has requested disposal and no holder is left. Reference count changes and
//! the disposal check happen under the same lock, so a release on a completion thread can never race with a
//! retain or disposal request on an application thread.

use std::sync::{Mutex, MutexGuard};

use anyhow::Result;

use crate::Error;

type DisposeCallback = Box<dyn FnOnce() + Send>;

#[derive(Derivative, Default)]
#[derivative(Debug)]
struct LifetimeState {
    refs: u32,
    dispose_requested: bool,
    disposed: bool,
    #[derivative(Debug = "ignore")]
    on_dispose: Option<DisposeCallback>,
}

impl LifetimeState {
    /// Takes the disposal callback if the resource just became disposable.
    fn take_if_disposable(&mut self) -> Option<DisposeCallback> {
        if self.dispose_requested && self.refs == 0 && !self.disposed {
            self.disposed = true;
            self.on_dispose.take()
        } else {
            None
        }
    }
}

/// Reference count and disposal state of a tracked resource. See the [module level documentation](self).
#[derive(Debug)]
pub struct Lifetime {
    state: Mutex<LifetimeState>,
}

impl Lifetime {
    /// Create a lifetime with no extra holders. `on_dispose` runs once the resource becomes disposable.
    pub fn new(on_dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            state: Mutex::new(LifetimeState {
                on_dispose: Some(Box::new(on_dispose)),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifetimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a holder.
    /// # Errors
    /// Fails with [`Error::ResourceDisposed`] once disposal was requested.
    pub fn retain(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.dispose_requested {
            return Err(Error::ResourceDisposed(name.to_owned()).into());
        }
        state.refs += 1;
        Ok(())
    }

    /// Remove a holder. If this was the last holder and disposal was requested, the resource is disposed
    /// on the calling thread.
    /// # Errors
    /// Fails with [`Error::UnbalancedRelease`] if there is no holder left to remove.
    pub fn release(&self, name: &str) -> Result<()> {
        let callback = {
            let mut state = self.lock();
            if state.refs == 0 {
                return Err(Error::UnbalancedRelease(name.to_owned()).into());
            }
            state.refs -= 1;
            state.take_if_disposable()
        };
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }

    /// Mark the resource for disposal. Returns `true` if it was disposed right away, `false` if disposal was
    /// deferred until the last holder releases it.
    /// # Errors
    /// Fails with [`Error::ResourceDisposed`] if disposal was already requested.
    pub fn request_disposal(&self, name: &str) -> Result<bool> {
        let callback = {
            let mut state = self.lock();
            if state.dispose_requested {
                return Err(Error::ResourceDisposed(name.to_owned()).into());
            }
            state.dispose_requested = true;
            state.take_if_disposable()
        };
        Ok(match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        })
    }

    /// Run the disposal callback if it has not run yet, regardless of outstanding holders. Used when the last
    /// handle to a resource disappears without an explicit disposal request.
    pub(crate) fn force_dispose(&self) -> bool {
        let callback = {
            let mut state = self.lock();
            if state.disposed {
                return false;
            }
            state.dispose_requested = true;
            state.disposed = true;
            state.on_dispose.take()
        };
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Number of holders besides the owner.
    pub fn ref_count(&self) -> u32 {
        self.lock().refs
    }

    /// Whether disposal has been requested.
    pub fn is_dispose_requested(&self) -> bool {
        self.lock().dispose_requested
    }

    /// Whether the disposal callback has run.
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}
