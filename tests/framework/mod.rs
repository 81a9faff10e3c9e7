#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;

use deimos::{BufferDescription, Device, DeviceBuilder, HeadlessBackend, MemoryType, Resource, vk};

#[derive(Clone, Debug)]
pub struct Context {
    pub device: Device,
    pub backend: Arc<HeadlessBackend>,
}

/// Creates a headless deimos context with manual completion delivery, ready for automated tests
pub fn make_context() -> Result<Context> {
    make_context_with_backend(HeadlessBackend::new())
}

/// Create a headless deimos context on a preconfigured backend
pub fn make_context_with_backend(backend: HeadlessBackend) -> Result<Context> {
    make_context_with_settings(backend, |builder| builder)
}

pub fn make_context_with_settings<F: FnOnce(DeviceBuilder) -> DeviceBuilder>(backend: HeadlessBackend, callback: F) -> Result<Context> {
    let _ = pretty_env_logger::try_init();
    let backend = Arc::new(backend);
    let settings = callback(DeviceBuilder::new().name("deimos test framework")).build();
    let device = Device::new(backend.clone(), settings)?;
    Ok(Context {
        device,
        backend,
    })
}

/// A host-visible buffer of `size` bytes.
pub fn host_buffer(context: &Context, name: &str, size: u64) -> Resource {
    context.device.create_buffer(
        name,
        BufferDescription {
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
            memory: MemoryType::CpuToGpu,
        },
    )
}
