//! The core module holds the device, the interfaces it consumes from backends, and the crate error type.

pub mod backend;
pub mod device;
pub mod error;
pub mod settings;
