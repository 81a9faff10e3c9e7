//! Resource and vertex layouts of a pipeline.

use ash::vk;

use crate::ByteSize;

/// Kind of a resource set element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    StructuredBufferReadOnly,
    StructuredBufferReadWrite,
    TextureReadOnly,
    TextureReadWrite,
    Sampler,
}

impl ResourceKind {
    pub fn is_buffer(&self) -> bool {
        matches!(
            self,
            ResourceKind::UniformBuffer | ResourceKind::StructuredBufferReadOnly | ResourceKind::StructuredBufferReadWrite
        )
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceKind::TextureReadOnly | ResourceKind::TextureReadWrite)
    }
}

/// One element of a [`ResourceLayout`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLayoutElement {
    pub name: String,
    pub kind: ResourceKind,
    pub stages: vk::ShaderStageFlags,
    /// Buffer elements only: the bound range is offset by a dynamic offset given at bind time.
    pub dynamic: bool,
    /// Not used by the pipeline. Skipped when binding.
    pub unused: bool,
}

impl ResourceLayoutElement {
    pub fn new(name: impl Into<String>, kind: ResourceKind, stages: vk::ShaderStageFlags) -> Self {
        Self {
            name: name.into(),
            kind,
            stages,
            dynamic: false,
            unused: false,
        }
    }

    /// Mark this element as taking a dynamic offset.
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Mark this element as unused by the pipeline.
    pub fn unused(mut self) -> Self {
        self.unused = true;
        self
    }
}

/// The declared layout of one resource set slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceLayout {
    pub elements: Vec<ResourceLayoutElement>,
}

impl ResourceLayout {
    pub fn new(elements: impl Into<Vec<ResourceLayoutElement>>) -> Self {
        Self {
            elements: elements.into(),
        }
    }

    /// Number of dynamic offsets a resource set of this layout must be bound with.
    pub fn dynamic_offset_count(&self) -> usize {
        self.elements.iter().filter(|e| e.dynamic).count()
    }
}

/// One attribute of a [`VertexLayout`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub name: String,
    pub format: vk::Format,
    /// Explicit byte offset inside the vertex. Defaults to the end of the previous element.
    pub offset: Option<u32>,
}

impl VertexElement {
    pub fn new(name: impl Into<String>, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            format,
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Layout of one vertex buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    /// Zero advances per vertex, anything else per that many instances.
    pub instance_step_rate: u32,
    pub elements: Vec<VertexElement>,
}

impl VertexLayout {
    /// A per-vertex layout with its stride computed from the element formats.
    pub fn new(elements: impl Into<Vec<VertexElement>>) -> Self {
        let elements: Vec<VertexElement> = elements.into();
        let mut running = 0;
        let mut stride = 0;
        for element in &elements {
            let start = element.offset.unwrap_or(running);
            running = start + element.format.byte_size().unwrap_or(0) as u32;
            stride = stride.max(running);
        }
        Self {
            stride,
            instance_step_rate: 0,
            elements,
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn per_instance(mut self, step_rate: u32) -> Self {
        self.instance_step_rate = step_rate;
        self
    }
}
