//! Deferred realization of native resources.
//!
//! Some backends can only allocate GPU objects on the context that owns the device, while command recording may
//! happen anywhere and be replayed later. Resources are therefore created lazily: the native object is allocated on
//! the first call to [`Realization::ensure_created`], which happens on first actual use on the owning context.

use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;

use crate::Error;
use crate::core::backend::{NativeResource, ResourceBackend};

/// Realization state of one resource.
///
/// The created flag is read without locking on the fast path. The allocation itself runs under a per-resource lock
/// that only guards the allocation path, so concurrent callers on the same unrealized resource allocate exactly once
/// and all observe the same native object.
#[derive(Debug)]
pub struct Realization {
    created: AtomicBool,
    raw: AtomicU64,
    /// Guards allocation. Holds whether the native object has been retired by disposal.
    alloc_lock: Mutex<bool>,
    label: Mutex<String>,
    label_dirty: AtomicBool,
}

impl Realization {
    /// New unrealized state. A non-empty `label` is applied to the native object once it exists.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            created: AtomicBool::new(false),
            raw: AtomicU64::new(0),
            alloc_lock: Mutex::new(false),
            label_dirty: AtomicBool::new(!label.is_empty()),
            label: Mutex::new(label),
        }
    }

    fn alloc_lock(&self) -> MutexGuard<'_, bool> {
        self.alloc_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the native object has been allocated.
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// The native object, if it has been allocated.
    pub fn native(&self) -> Option<NativeResource> {
        self.is_created().then(|| NativeResource(self.raw.load(Ordering::Relaxed)))
    }

    /// Allocate the native object through `allocate` unless that already happened, then apply a pending debug label.
    /// # Errors
    /// - Fails with [`Error::ResourceDisposed`] if the resource was disposed before it was realized.
    /// - Fails with [`Error::Backend`] if the allocation or labelling call fails. The next call tries again.
    pub fn ensure_created(&self, backend: &dyn ResourceBackend, allocate: impl FnOnce() -> Result<NativeResource>) -> Result<NativeResource> {
        let native = match self.native() {
            Some(native) => native,
            None => {
                let retired = self.alloc_lock();
                if *retired {
                    return Err(Error::ResourceDisposed(self.label()).into());
                }
                // Another caller may have won the race while we waited for the lock.
                match self.native() {
                    Some(native) => native,
                    None => {
                        let native = allocate().map_err(|e| Error::backend("allocate", format!("resource `{}`", self.label()), e))?;
                        self.raw.store(native.0, Ordering::Relaxed);
                        self.created.store(true, Ordering::Release);
                        #[cfg(feature = "log-objects")]
                        trace!("Realized resource `{}` as native {:#x}", self.label(), native.0);
                        native
                    }
                }
            }
        };
        self.apply_label(backend, native)?;
        Ok(native)
    }

    /// Retire the native object for destruction. Returns it if it was ever allocated. After this, the resource can
    /// no longer be realized.
    pub(crate) fn retire(&self) -> Option<NativeResource> {
        let mut retired = self.alloc_lock();
        if *retired {
            return None;
        }
        *retired = true;
        let native = self.native();
        self.created.store(false, Ordering::Release);
        native
    }

    /// Current debug label.
    pub fn label(&self) -> String {
        self.label.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Change the debug label. The native object is relabelled on its next realization access.
    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.lock().unwrap_or_else(|e| e.into_inner()) = label.into();
        self.label_dirty.store(true, Ordering::Release);
    }

    fn apply_label(&self, backend: &dyn ResourceBackend, native: NativeResource) -> Result<()> {
        if !self.label_dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let label = self.label();
        backend.set_label(native, &label).map_err(|e| {
            self.label_dirty.store(true, Ordering::Release);
            Error::backend("set_label", format!("resource `{label}`"), e).into()
        })
    }
}
