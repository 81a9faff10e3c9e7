//! Pipeline descriptions for emulated backends.
//!
//! A [`Pipeline`] bundles everything the [`BindingStateEmulator`](crate::BindingStateEmulator) re-issues on activation:
//! fixed-function state ([`BlendState`], [`DepthStencilState`], [`RasterizerState`], topology), the linked native program,
//! the declared resource and vertex layouts, and the binding information reflected from the program. Reflection itself
//! is not performed here, it is supplied through the [`PipelineBuilder`](crate::PipelineBuilder).
//!
//! # Example
//! ```
//! use deimos::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("sprites")
//!     .program(NativeProgram(1))
//!     .resource_layout(ResourceLayout::new([
//!         ResourceLayoutElement::new("camera", ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
//!         ResourceLayoutElement::new("atlas", ResourceKind::TextureReadOnly, vk::ShaderStageFlags::FRAGMENT),
//!         ResourceLayoutElement::new("atlas_sampler", ResourceKind::Sampler, vk::ShaderStageFlags::FRAGMENT),
//!     ]))
//!     .vertex_layout(VertexLayout::new([
//!         VertexElement::new("position", vk::Format::R32G32_SFLOAT),
//!         VertexElement::new("uv", vk::Format::R32G32_SFLOAT),
//!     ]))
//!     // Reflected from the program
//!     .uniform_block(0, 0, 0, 64)
//!     .texture_unit(0, 1, 0, 3)
//!     .sampler_units(0, 2, [0])
//!     .blend_attachment_none()
//!     .cull_mask(vk::CullModeFlags::NONE)
//!     .build();
//! assert_eq!(pipeline.resource_layouts().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;

use crate::core::backend::NativeProgram;
use crate::pipeline::layout::{ResourceLayout, VertexLayout};

pub mod builder;
pub mod layout;

/// Blend mode of one color target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendAttachment {
    pub enabled: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
}

impl BlendAttachment {
    /// Blending disabled, the source overwrites the target.
    pub fn none() -> Self {
        Self {
            enabled: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
        }
    }

    /// Classic alpha blending.
    pub fn alpha() -> Self {
        Self {
            enabled: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::SRC_ALPHA,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            alpha_op: vk::BlendOp::ADD,
        }
    }
}

impl Default for BlendAttachment {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlendState {
    pub constant: [f32; 4],
    pub alpha_to_coverage: bool,
    /// Emulated backends only honour the first attachment.
    pub attachments: Vec<BlendAttachment>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,
    pub stencil_front: vk::CompareOp,
    pub stencil_back: vk::CompareOp,
    pub stencil_reference: u32,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            stencil_test: false,
            stencil_front: vk::CompareOp::ALWAYS,
            stencil_back: vk::CompareOp::ALWAYS,
            stencil_reference: 0,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RasterizerState {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub scissor_test: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            scissor_test: false,
        }
    }
}

/// Reflected uniform block of a resource set element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UniformBinding {
    /// Index of the uniform block inside the program.
    pub block_location: u32,
    /// Size of the uniform block the program declares, in bytes.
    pub block_size: u64,
}

/// Reflected texture unit of a resource set element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub unit: u32,
    /// Location of the sampler uniform that selects the unit.
    pub uniform_location: i32,
}

/// Reflected shader storage block of a resource set element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StorageBinding {
    pub block_location: u32,
}

/// Binding information reflected from a linked program, keyed by `(slot, element)`.
#[derive(Debug, Clone, Default)]
pub struct ProgramBindings {
    pub uniforms: HashMap<(u32, u32), UniformBinding>,
    pub textures: HashMap<(u32, u32), TextureBinding>,
    pub samplers: HashMap<(u32, u32), Vec<u32>>,
    pub storage: HashMap<(u32, u32), StorageBinding>,
}

impl ProgramBindings {
    /// Number of uniform blocks bound from a resource set slot.
    pub fn uniform_count(&self, slot: u32) -> u32 {
        self.uniforms.keys().filter(|(s, _)| *s == slot).count() as u32
    }

    /// Number of shader storage blocks bound from a resource set slot.
    pub fn storage_count(&self, slot: u32) -> u32 {
        self.storage.keys().filter(|(s, _)| *s == slot).count() as u32
    }
}

#[derive(Debug)]
pub(crate) struct PipelineInner {
    pub name: String,
    pub program: NativeProgram,
    pub is_compute: bool,
    pub blend: BlendState,
    pub depth_stencil: DepthStencilState,
    pub rasterizer: RasterizerState,
    pub topology: vk::PrimitiveTopology,
    pub resource_layouts: Vec<ResourceLayout>,
    pub vertex_layouts: Vec<VertexLayout>,
    /// Attribute location for every vertex element across all layouts, in declaration order. `None` for
    /// attributes the program does not use.
    pub vertex_attribute_locations: Vec<Option<u32>>,
    pub bindings: ProgramBindings,
}

/// An immutable pipeline description. Cheap to clone, clones compare equal through [`Pipeline::same_as`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub(crate) inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn program(&self) -> NativeProgram {
        self.inner.program
    }

    pub fn is_compute(&self) -> bool {
        self.inner.is_compute
    }

    pub fn blend_state(&self) -> &BlendState {
        &self.inner.blend
    }

    pub fn depth_stencil_state(&self) -> &DepthStencilState {
        &self.inner.depth_stencil
    }

    pub fn rasterizer_state(&self) -> &RasterizerState {
        &self.inner.rasterizer
    }

    pub fn topology(&self) -> vk::PrimitiveTopology {
        self.inner.topology
    }

    pub fn resource_layouts(&self) -> &[ResourceLayout] {
        &self.inner.resource_layouts
    }

    pub fn vertex_layouts(&self) -> &[VertexLayout] {
        &self.inner.vertex_layouts
    }

    pub fn vertex_attribute_locations(&self) -> &[Option<u32>] {
        &self.inner.vertex_attribute_locations
    }

    pub fn bindings(&self) -> &ProgramBindings {
        &self.inner.bindings
    }

    /// Whether two handles refer to the same pipeline object.
    pub fn same_as(&self, other: &Pipeline) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
