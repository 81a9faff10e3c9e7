pub use ash::vk;

pub use crate::core::backend::*;
pub use crate::core::device::Device;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::settings::*;

pub use crate::sync::fence::Fence;
pub use crate::sync::fence_sync::*;
pub use crate::sync::tracker::CommandBufferTracker;
pub use crate::sync::trampoline::Registration;
pub use crate::sync::wait_pool::WaitHandlePool;

pub use crate::resource::{BufferDescription, MemoryType, Resource, ResourceDescription, TextureDescription};
pub use crate::resource::disposal::{DisposalPolicy, DisposalQueue};
pub use crate::resource::lifetime::Lifetime;
pub use crate::resource::map::{MapMode, MappedResource};
pub use crate::resource::realize::Realization;

pub use crate::command_buffer::{CommandBufferHandle, CommandBufferStatus, LogicalCommandBuffer};

pub use crate::pipeline::{
    BlendAttachment, BlendState, DepthStencilState, Pipeline, ProgramBindings, RasterizerState, StorageBinding, TextureBinding,
    UniformBinding,
};
pub use crate::pipeline::builder::PipelineBuilder;
pub use crate::pipeline::layout::{ResourceKind, ResourceLayout, ResourceLayoutElement, VertexElement, VertexLayout};

pub use crate::emulation::BindingStateEmulator;
pub use crate::emulation::state::{BindableResource, BindingSlotState, ResourceSet};

pub use crate::backend::headless::{Delivery, HeadlessBackend, RecordingContext, StateCall};

pub use crate::util::byte_size::ByteSize;
