//! Queue of native objects waiting for destruction.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::Error;
use crate::core::backend::{NativeResource, ResourceBackend};

/// When native objects are destroyed once their resource becomes disposable.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DisposalPolicy {
    /// Queue the native object. It is destroyed by the next [`Device::flush_disposals()`](crate::Device::flush_disposals),
    /// which should run on the context that owns the device.
    #[default]
    Deferred,
    /// Destroy the native object right away, on whichever thread made the resource disposable.
    Immediate,
}

#[derive(Debug)]
struct Item {
    native: NativeResource,
    label: String,
}

/// Destroys native objects according to a [`DisposalPolicy`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DisposalQueue {
    policy: DisposalPolicy,
    #[derivative(Debug = "ignore")]
    backend: Arc<dyn ResourceBackend>,
    items: Mutex<Vec<Item>>,
}

impl DisposalQueue {
    pub fn new(backend: Arc<dyn ResourceBackend>, policy: DisposalPolicy) -> Self {
        Self {
            policy,
            backend,
            items: Mutex::new(vec![]),
        }
    }

    pub fn policy(&self) -> DisposalPolicy {
        self.policy
    }

    /// Pushes a native object onto the queue, or destroys it right away with [`DisposalPolicy::Immediate`].
    /// Immediate destruction runs on completion threads too, so failures are logged instead of returned.
    pub fn push(&self, native: NativeResource, label: impl Into<String>) {
        let label = label.into();
        match self.policy {
            DisposalPolicy::Deferred => {
                self.items
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(Item {
                        native,
                        label,
                    });
            }
            DisposalPolicy::Immediate => {
                if let Err(e) = self.destroy(native, &label) {
                    error!("{e:#}");
                }
            }
        }
    }

    fn destroy(&self, native: NativeResource, label: &str) -> Result<()> {
        #[cfg(feature = "log-objects")]
        trace!("Destroying native resource {:#x} (`{label}`)", native.0);
        self.backend
            .destroy(native)
            .map_err(|e| Error::backend("destroy", format!("resource `{label}`"), e).into())
    }

    /// Destroy every queued native object. Returns how many were destroyed.
    /// # Errors
    /// Every queued object is destroyed even if some fail. The first failure is returned, the failed objects are not
    /// queued again.
    pub fn flush(&self) -> Result<usize> {
        let items = std::mem::take(&mut *self.items.lock().unwrap_or_else(|e| e.into_inner()));
        if items.is_empty() {
            return Ok(0);
        }

        let mut destroyed = 0;
        let mut first_error = None;
        for item in items {
            match self.destroy(item.native, &item.label) {
                Ok(()) => destroyed += 1,
                Err(e) => {
                    error!("{e:#}");
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!("Flushed disposal queue, destroyed {destroyed} native resources");
        match first_error {
            Some(e) => Err(e),
            None => Ok(destroyed),
        }
    }

    /// Number of native objects waiting for [`flush`](Self::flush).
    pub fn pending(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
