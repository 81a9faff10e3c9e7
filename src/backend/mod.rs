//! Backend implementations shipped with deimos.
//!
//! - [`headless`] runs entirely on the host. It simulates command buffer completion and keeps resources in host
//!   memory, which makes it suitable for tests and tooling.

pub mod headless;
