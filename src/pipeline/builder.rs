//! The pipeline builder is used to easily create pipelines correctly.

use std::collections::HashSet;
use std::sync::Arc;

use ash::vk;

use crate::core::backend::NativeProgram;
use crate::pipeline::{
    BlendAttachment, BlendState, DepthStencilState, Pipeline, PipelineInner, ProgramBindings, RasterizerState, StorageBinding,
    TextureBinding, UniformBinding,
};
use crate::pipeline::layout::{ResourceLayout, VertexLayout};

/// Used to facilitate creating a pipeline. For an example, please check the [`pipeline`](crate::pipeline) module
/// level documentation.
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    program: NativeProgram,
    is_compute: bool,
    blend: BlendState,
    depth_stencil: DepthStencilState,
    rasterizer: RasterizerState,
    topology: vk::PrimitiveTopology,
    resource_layouts: Vec<ResourceLayout>,
    vertex_layouts: Vec<VertexLayout>,
    unused_attributes: HashSet<usize>,
    attribute_locations: Vec<(usize, u32)>,
    bindings: ProgramBindings,
}

impl PipelineBuilder {
    /// Create a new empty graphics pipeline with default settings for everything.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: NativeProgram(0),
            is_compute: false,
            blend: BlendState::default(),
            depth_stencil: DepthStencilState::default(),
            rasterizer: RasterizerState::default(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            resource_layouts: vec![],
            vertex_layouts: vec![],
            unused_attributes: HashSet::new(),
            attribute_locations: vec![],
            bindings: ProgramBindings::default(),
        }
    }

    /// Create a new compute pipeline. Only the program, resource layouts and their bindings are used.
    pub fn compute(name: impl Into<String>) -> Self {
        Self {
            is_compute: true,
            ..Self::new(name)
        }
    }

    /// Set the linked native program.
    pub fn program(mut self, program: NativeProgram) -> Self {
        self.program = program;
        self
    }

    /// Set the blend constant.
    pub fn blend_constant(mut self, constant: [f32; 4]) -> Self {
        self.blend.constant = constant;
        self
    }

    /// Toggle alpha to coverage.
    pub fn alpha_to_coverage(mut self, enable: bool) -> Self {
        self.blend.alpha_to_coverage = enable;
        self
    }

    /// Add a blend attachment.
    pub fn blend_attachment(mut self, attachment: BlendAttachment) -> Self {
        self.blend.attachments.push(attachment);
        self
    }

    /// Add a blend attachment, but with no blending enabled.
    pub fn blend_attachment_none(self) -> Self {
        self.blend_attachment(BlendAttachment::none())
    }

    /// Set depth testing mode.
    pub fn depth_test(mut self, enable: bool) -> Self {
        self.depth_stencil.depth_test = enable;
        self
    }

    /// Set depth write mode.
    pub fn depth_write(mut self, enable: bool) -> Self {
        self.depth_stencil.depth_write = enable;
        self
    }

    /// Set the depth compare operation.
    pub fn depth_op(mut self, op: vk::CompareOp) -> Self {
        self.depth_stencil.depth_compare = op;
        self
    }

    /// Configure all depth state in one call.
    pub fn depth(self, test: bool, write: bool, op: vk::CompareOp) -> Self {
        self.depth_test(test).depth_write(write).depth_op(op)
    }

    /// Enable stencil testing with the given compare operations for front and back faces.
    pub fn stencil(mut self, front: vk::CompareOp, back: vk::CompareOp, reference: u32) -> Self {
        self.depth_stencil.stencil_test = true;
        self.depth_stencil.stencil_front = front;
        self.depth_stencil.stencil_back = back;
        self.depth_stencil.stencil_reference = reference;
        self
    }

    /// Set the stencil read and write masks.
    pub fn stencil_masks(mut self, read: u32, write: u32) -> Self {
        self.depth_stencil.stencil_read_mask = read;
        self.depth_stencil.stencil_write_mask = write;
        self
    }

    /// Set the face culling mask.
    pub fn cull_mask(mut self, cull: vk::CullModeFlags) -> Self {
        self.rasterizer.cull_mode = cull;
        self
    }

    /// Set the front face.
    pub fn front_face(mut self, face: vk::FrontFace) -> Self {
        self.rasterizer.front_face = face;
        self
    }

    /// Toggle the scissor test.
    pub fn scissor_test(mut self, enable: bool) -> Self {
        self.rasterizer.scissor_test = enable;
        self
    }

    /// Set the primitive topology.
    pub fn primitive_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Add the layout of the next resource set slot.
    pub fn resource_layout(mut self, layout: ResourceLayout) -> Self {
        self.resource_layouts.push(layout);
        self
    }

    /// Add the layout of the next vertex buffer slot.
    pub fn vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layouts.push(layout);
        self
    }

    /// Override the attribute location of a vertex element. `attribute` counts elements across all vertex layouts in
    /// declaration order. By default, that index is also the location.
    pub fn vertex_attribute_location(mut self, attribute: usize, location: u32) -> Self {
        self.attribute_locations.push((attribute, location));
        self
    }

    /// Mark a vertex element as unused by the program. Its bytes still count towards the vertex layout.
    pub fn vertex_attribute_unused(mut self, attribute: usize) -> Self {
        self.unused_attributes.insert(attribute);
        self
    }

    /// Reflected uniform block bound from element `element` of slot `slot`.
    pub fn uniform_block(mut self, slot: u32, element: u32, block_location: u32, block_size: u64) -> Self {
        self.bindings.uniforms.insert(
            (slot, element),
            UniformBinding {
                block_location,
                block_size,
            },
        );
        self
    }

    /// Reflected texture unit and sampler uniform location of a texture element.
    pub fn texture_unit(mut self, slot: u32, element: u32, unit: u32, uniform_location: i32) -> Self {
        self.bindings.textures.insert(
            (slot, element),
            TextureBinding {
                unit,
                uniform_location,
            },
        );
        self
    }

    /// Reflected texture units a sampler element applies to.
    pub fn sampler_units(mut self, slot: u32, element: u32, units: impl Into<Vec<u32>>) -> Self {
        self.bindings.samplers.insert((slot, element), units.into());
        self
    }

    /// Reflected shader storage block of a structured buffer element.
    pub fn storage_block(mut self, slot: u32, element: u32, block_location: u32) -> Self {
        self.bindings.storage.insert(
            (slot, element),
            StorageBinding {
                block_location,
            },
        );
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> Pipeline {
        let attribute_count = self.vertex_layouts.iter().map(|layout| layout.elements.len()).sum::<usize>();
        let mut vertex_attribute_locations = (0..attribute_count)
            .map(|attribute| Some(attribute as u32))
            .collect::<Vec<_>>();
        for (attribute, location) in &self.attribute_locations {
            if let Some(slot) = vertex_attribute_locations.get_mut(*attribute) {
                *slot = Some(*location);
            }
        }
        for attribute in &self.unused_attributes {
            if let Some(slot) = vertex_attribute_locations.get_mut(*attribute) {
                *slot = None;
            }
        }

        let mut blend = self.blend;
        if blend.attachments.is_empty() {
            blend.attachments.push(BlendAttachment::none());
        }

        Pipeline {
            inner: Arc::new(PipelineInner {
                name: self.name,
                program: self.program,
                is_compute: self.is_compute,
                blend,
                depth_stencil: self.depth_stencil,
                rasterizer: self.rasterizer,
                topology: self.topology,
                resource_layouts: self.resource_layouts,
                vertex_layouts: self.vertex_layouts,
                vertex_attribute_locations,
                bindings: self.bindings,
            }),
        }
    }

    /// Obtain the pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }
}
