//! Exposes the structs needed to store device creation parameters.

use crate::core::backend::BackendFeatures;
use crate::resource::disposal::DisposalPolicy;

/// Device creation parameters. Build these with a [`DeviceBuilder`].
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Device label used in logs and errors.
    pub name: String,
    /// When native objects of disposable resources are destroyed.
    pub disposal: DisposalPolicy,
    /// Capability switches consulted by the emulator. `None` uses what the backend reports.
    pub features: Option<BackendFeatures>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceBuilder::new().build()
    }
}

/// Builder for [`DeviceSettings`].
/// # Example
/// ```
/// # use deimos::prelude::*;
/// let settings = DeviceBuilder::new()
///     .name("renderer")
///     .disposal(DisposalPolicy::Immediate)
///     .features(BackendFeatures {
///         compute_shader: true,
///         structured_buffer: false,
///     })
///     .build();
/// assert_eq!(settings.disposal, DisposalPolicy::Immediate);
/// ```
#[derive(Debug)]
pub struct DeviceBuilder {
    inner: DeviceSettings,
}

impl DeviceBuilder {
    /// Create a new device builder with default settings.
    pub fn new() -> Self {
        DeviceBuilder {
            inner: DeviceSettings {
                name: String::from("device"),
                disposal: DisposalPolicy::default(),
                features: None,
            },
        }
    }

    /// Sets the device label.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    /// Sets the disposal policy. See [`DisposalPolicy`].
    pub fn disposal(mut self, policy: DisposalPolicy) -> Self {
        self.inner.disposal = policy;
        self
    }

    /// Override the capabilities reported by the backend.
    pub fn features(mut self, features: BackendFeatures) -> Self {
        self.inner.features = Some(features);
        self
    }

    /// Build the resulting device settings.
    pub fn build(self) -> DeviceSettings {
        self.inner
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
