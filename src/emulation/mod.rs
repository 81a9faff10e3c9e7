//! Binding state emulation for backends without pipeline state objects or bind groups.
//!
//! On such backends every piece of pipeline state is an individual state-setting call, and resources are bound one by
//! one to numbered binding points. The [`BindingStateEmulator`] records a [`LogicalCommandBuffer`] against a
//! [`StateBackend`] and decides which native calls are needed:
//!
//! - Binding a pipeline re-issues its complete fixed-function state and marks every resource set slot dirty, since the
//!   previous program's binding layout may be incompatible.
//! - Binding a resource set only records it. Before each draw or dispatch, every dirty slot is resolved and rebound,
//!   then marked clean.
//! - Vertex attribute pointers are re-issued only after the vertex buffers or the pipeline changed, and per-attribute
//!   divisors only when their value actually changed.
//!
//! Operations the backend cannot perform report [`Error::Unsupported`] instead of being emulated.
//!
//! # Example
//! ```
//! use deimos::prelude::*;
//! # fn run(device: Device, ctx: &mut RecordingContext, pipeline: Pipeline, set: ResourceSet, vertices: Resource) -> anyhow::Result<()> {
//! let mut executor = device.executor(ctx, "frame");
//! executor.bind_pipeline(&pipeline)?;
//! executor.bind_resource_set(0, &set, &[])?;
//! executor.set_vertex_buffer(0, &vertices, 0)?;
//! executor.draw(3, 1, 0, 0)?;
//! let cmd = executor.finish();
//! device.submit(cmd, None)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use anyhow::Result;
use ash::vk;

use crate::{ByteSize, Device, Error, LogicalCommandBuffer, Pipeline, Resource};
use crate::core::backend::{BackendFeatures, NativeResource, NativeSampler, StateBackend};
use crate::emulation::state::{check_buffer_range, BindableResource, BindingSlotState, ResourceSet};
use crate::pipeline::layout::ResourceKind;
use crate::resource::ResourceDescription;

pub mod gl;
pub mod state;
pub mod translate;

/// A native binding resolved from a resource set element, issued only once the whole slot resolved.
#[derive(Debug)]
enum NativeBinding {
    Uniform { block: u32, index: u32, buffer: NativeResource, offset: u64, size: u64 },
    Storage { block: u32, index: u32, buffer: NativeResource, offset: u64, size: u64 },
    Texture { unit: u32, uniform_location: i32, texture: NativeResource },
    Sampler { units: Vec<u32>, sampler: NativeSampler },
}

#[derive(Debug, Clone)]
struct VertexBufferBinding {
    buffer: Resource,
    offset: u64,
}

#[derive(Debug, Clone)]
struct IndexBufferBinding {
    buffer: Resource,
    ty: u32,
    index_size: u64,
    offset: u64,
}

/// Records a [`LogicalCommandBuffer`] against an emulated backend. See the [module level documentation](self).
///
/// The emulator owns its binding state exclusively. It must not be shared between concurrent recordings.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct BindingStateEmulator<'c, C: StateBackend> {
    #[derivative(Debug = "ignore")]
    ctx: &'c mut C,
    features: BackendFeatures,
    cmd: LogicalCommandBuffer,

    graphics_pipeline: Option<Pipeline>,
    compute_pipeline: Option<Pipeline>,
    /// Whether the graphics program is the active one. Dispatching activates the compute program.
    graphics_active: bool,
    compute_active: bool,
    graphics_slots: Vec<BindingSlotState>,
    compute_slots: Vec<BindingSlotState>,

    primitive: u32,
    vertex_buffers: Vec<Option<VertexBufferBinding>>,
    vertex_dirty: bool,
    /// Last divisor issued per attribute location.
    divisors: HashMap<u32, u32>,
    index_buffer: Option<IndexBufferBinding>,

    viewports: HashMap<u32, vk::Viewport>,
    render_area: vk::Extent2D,
}

impl<'c, C: StateBackend> BindingStateEmulator<'c, C> {
    /// Start recording into `cmd` against the state machine `ctx`.
    pub fn new(ctx: &'c mut C, device: &Device, cmd: LogicalCommandBuffer) -> Self {
        Self {
            ctx,
            features: device.features(),
            cmd,
            graphics_pipeline: None,
            compute_pipeline: None,
            graphics_active: false,
            compute_active: false,
            graphics_slots: vec![],
            compute_slots: vec![],
            primitive: gl::TRIANGLES,
            vertex_buffers: vec![],
            vertex_dirty: false,
            divisors: HashMap::new(),
            index_buffer: None,
            viewports: HashMap::new(),
            render_area: vk::Extent2D::default(),
        }
    }

    /// Finish recording and obtain the command buffer, ready for submission.
    pub fn finish(self) -> LogicalCommandBuffer {
        self.cmd
    }

    /// The command buffer being recorded.
    pub fn command_buffer(&self) -> &LogicalCommandBuffer {
        &self.cmd
    }

    /// The backend state machine being driven.
    pub fn context(&self) -> &C {
        &*self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut *self.ctx
    }

    pub fn features(&self) -> BackendFeatures {
        self.features
    }

    /// Binding state of a graphics resource set slot.
    pub fn slot(&self, slot: u32) -> Option<&BindingSlotState> {
        self.graphics_slots.get(slot as usize)
    }

    /// Binding state of a compute resource set slot.
    pub fn compute_slot(&self, slot: u32) -> Option<&BindingSlotState> {
        self.compute_slots.get(slot as usize)
    }

    /// Indices of the graphics slots that will be rebound before the next draw.
    pub fn dirty_slots(&self) -> Vec<u32> {
        self.graphics_slots
            .iter()
            .enumerate()
            .filter(|(_, state)| state.dirty)
            .map(|(slot, _)| slot as u32)
            .collect()
    }

    fn unsupported(&self, operation: &'static str) -> anyhow::Error {
        Error::Unsupported {
            operation,
            backend: self.ctx.name().to_owned(),
        }
        .into()
    }

    /// Poll the backend for an error raised by the last call group.
    fn check(&mut self, operation: &'static str) -> Result<()> {
        match self.ctx.error() {
            Some(code) => Err(Error::NativeCall {
                operation,
                code,
            }
            .into()),
            None => Ok(()),
        }
    }

    fn translate<T, U>(&self, value: T, operation: &'static str, f: impl FnOnce(T) -> Option<U>) -> Result<U> {
        f(value).ok_or_else(|| self.unsupported(operation))
    }

    /// Bind a graphics or compute pipeline. Binding the pipeline that is already bound does nothing.
    /// # Errors
    /// - Fails with [`Error::Unsupported`] for compute pipelines if the backend has no compute support, or if the
    ///   pipeline uses state the backend cannot express.
    /// - Fails with [`Error::NativeCall`] if a state call reports an error.
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) -> Result<()> {
        if pipeline.is_compute() {
            if !self.features.compute_shader {
                return Err(self.unsupported("bind_pipeline (compute)"));
            }
            if self
                .compute_pipeline
                .as_ref()
                .map_or(false, |current| current.same_as(pipeline))
            {
                return Ok(());
            }
            self.compute_pipeline = Some(pipeline.clone());
            self.compute_active = false;
            mark_all_dirty(&mut self.compute_slots, pipeline.resource_layouts().len());
            Ok(())
        } else {
            if self
                .graphics_pipeline
                .as_ref()
                .map_or(false, |current| current.same_as(pipeline))
            {
                return Ok(());
            }
            self.graphics_pipeline = Some(pipeline.clone());
            self.activate_graphics_pipeline()
        }
    }

    /// Re-issue the complete fixed-function state of the bound graphics pipeline.
    fn activate_graphics_pipeline(&mut self) -> Result<()> {
        let pipeline = self.graphics_pipeline.clone().ok_or(Error::NoPipelineBound)?;
        let primitive = self.translate(pipeline.topology(), "primitive topology", translate::primitive_topology)?;
        self.graphics_active = true;
        self.compute_active = false;
        mark_all_dirty(&mut self.graphics_slots, pipeline.resource_layouts().len());
        self.vertex_dirty = true;

        // Blend state
        let blend = pipeline.blend_state();
        let [r, g, b, a] = blend.constant;
        self.ctx.blend_color(r, g, b, a);
        self.check("blend_color")?;
        self.toggle(gl::SAMPLE_ALPHA_TO_COVERAGE, blend.alpha_to_coverage)?;

        let attachment = blend.attachments.first().copied().unwrap_or_default();
        self.toggle(gl::BLEND, attachment.enabled)?;
        if attachment.enabled {
            let src_color = self.translate(attachment.src_color, "blend factor", translate::blend_factor)?;
            let dst_color = self.translate(attachment.dst_color, "blend factor", translate::blend_factor)?;
            let src_alpha = self.translate(attachment.src_alpha, "blend factor", translate::blend_factor)?;
            let dst_alpha = self.translate(attachment.dst_alpha, "blend factor", translate::blend_factor)?;
            self.ctx.blend_func_separate(src_color, dst_color, src_alpha, dst_alpha);
            self.check("blend_func_separate")?;
            let color_op = self.translate(attachment.color_op, "blend op", translate::blend_op)?;
            let alpha_op = self.translate(attachment.alpha_op, "blend op", translate::blend_op)?;
            self.ctx.blend_equation_separate(color_op, alpha_op);
            self.check("blend_equation_separate")?;
        }

        // Depth stencil state
        let depth_stencil = *pipeline.depth_stencil_state();
        self.toggle(gl::DEPTH_TEST, depth_stencil.depth_test)?;
        if depth_stencil.depth_test {
            let func = self.translate(depth_stencil.depth_compare, "depth compare op", translate::compare_op)?;
            self.ctx.depth_func(func);
            self.check("depth_func")?;
        }
        self.ctx.depth_mask(depth_stencil.depth_write);
        self.check("depth_mask")?;

        self.toggle(gl::STENCIL_TEST, depth_stencil.stencil_test)?;
        if depth_stencil.stencil_test {
            let front = self.translate(depth_stencil.stencil_front, "stencil compare op", translate::compare_op)?;
            let back = self.translate(depth_stencil.stencil_back, "stencil compare op", translate::compare_op)?;
            let reference = depth_stencil.stencil_reference as i32;
            self.ctx.stencil_func_separate(gl::FRONT, front, reference, depth_stencil.stencil_read_mask);
            self.check("stencil_func_separate")?;
            self.ctx.stencil_func_separate(gl::BACK, back, reference, depth_stencil.stencil_read_mask);
            self.check("stencil_func_separate")?;
            self.ctx.stencil_mask(depth_stencil.stencil_write_mask);
            self.check("stencil_mask")?;
        }

        // Rasterizer state
        let rasterizer = *pipeline.rasterizer_state();
        match translate::cull_face(rasterizer.cull_mode) {
            Some(face) => {
                self.toggle(gl::CULL_FACE, true)?;
                self.ctx.cull_face(face);
                self.check("cull_face")?;
            }
            None => self.toggle(gl::CULL_FACE, false)?,
        }
        self.toggle(gl::SCISSOR_TEST, rasterizer.scissor_test)?;
        let front_face = self.translate(rasterizer.front_face, "front face", translate::front_face)?;
        self.ctx.front_face(front_face);
        self.check("front_face")?;

        self.primitive = primitive;
        self.ctx.use_program(pipeline.program());
        self.check("use_program")
    }

    fn toggle(&mut self, cap: u32, enable: bool) -> Result<()> {
        if enable {
            self.ctx.enable(cap);
            self.check("enable")
        } else {
            self.ctx.disable(cap);
            self.check("disable")
        }
    }

    /// Bind a resource set to a graphics slot. The native bindings are issued before the next draw. Binding the set
    /// and dynamic offsets the slot already holds does nothing.
    /// # Errors
    /// - Fails with [`Error::DynamicOffsetMismatch`] if the number of dynamic offsets does not match the set's layout.
    /// - Fails with [`Error::ResourceDisposed`] if a resource in the set was disposed.
    pub fn bind_resource_set(&mut self, slot: u32, set: &ResourceSet, dynamic_offsets: &[u32]) -> Result<()> {
        self.bind_set(false, slot, set, dynamic_offsets)
    }

    /// Bind a resource set to a compute slot. See [`bind_resource_set`](Self::bind_resource_set).
    pub fn bind_compute_resource_set(&mut self, slot: u32, set: &ResourceSet, dynamic_offsets: &[u32]) -> Result<()> {
        self.bind_set(true, slot, set, dynamic_offsets)
    }

    fn bind_set(&mut self, compute: bool, slot: u32, set: &ResourceSet, dynamic_offsets: &[u32]) -> Result<()> {
        let expected = set.layout().dynamic_offset_count();
        if dynamic_offsets.len() != expected {
            return Err(Error::DynamicOffsetMismatch {
                slot,
                expected,
                actual: dynamic_offsets.len(),
            }
            .into());
        }

        let slots = if compute { &self.compute_slots } else { &self.graphics_slots };
        if slots
            .get(slot as usize)
            .map_or(false, |state| state.holds(set, dynamic_offsets))
        {
            return Ok(());
        }

        for resource in set.resources().iter().filter_map(BindableResource::resource) {
            self.cmd.reference(resource)?;
        }

        let slots = if compute { &mut self.compute_slots } else { &mut self.graphics_slots };
        if slots.len() <= slot as usize {
            slots.resize_with(slot as usize + 1, BindingSlotState::default);
        }
        slots[slot as usize] = BindingSlotState {
            set: Some(set.clone()),
            dynamic_offsets: dynamic_offsets.to_vec(),
            dirty: true,
        };
        Ok(())
    }

    /// Resolve and rebind every dirty slot the pipeline declares, leaving no slot dirty.
    fn flush_resource_sets(&mut self, compute: bool) -> Result<()> {
        let pipeline = if compute { self.compute_pipeline.clone() } else { self.graphics_pipeline.clone() };
        let pipeline = pipeline.ok_or(Error::NoPipelineBound)?;

        for slot in 0..pipeline.resource_layouts().len() as u32 {
            let slots = if compute { &self.compute_slots } else { &self.graphics_slots };
            let state = slots.get(slot as usize).cloned().unwrap_or_default();
            if !state.dirty {
                continue;
            }
            let set = state.set.as_ref().ok_or(Error::NoResourceSet(slot))?;

            // Resolve everything first, so a failing element leaves no partial native state behind.
            let bindings = self.resolve_slot(&pipeline, slot, set, &state.dynamic_offsets)?;
            for binding in bindings {
                self.issue(&pipeline, binding)?;
            }

            let slots = if compute { &mut self.compute_slots } else { &mut self.graphics_slots };
            slots[slot as usize].dirty = false;
        }

        // Slots the pipeline does not declare have nothing to rebind. A later pipeline that declares them marks them
        // dirty again on activation.
        let slots = if compute { &mut self.compute_slots } else { &mut self.graphics_slots };
        slots
            .iter_mut()
            .skip(pipeline.resource_layouts().len())
            .for_each(|state| state.dirty = false);
        Ok(())
    }

    fn resolve_slot(&self, pipeline: &Pipeline, slot: u32, set: &ResourceSet, dynamic_offsets: &[u32]) -> Result<Vec<NativeBinding>> {
        let reflection = pipeline.bindings();
        let declared = pipeline.resource_layouts().get(slot as usize);
        let uniform_base = (0..slot).map(|s| reflection.uniform_count(s)).sum::<u32>();
        let storage_base = (0..slot).map(|s| reflection.storage_count(s)).sum::<u32>();

        let mut bindings = vec![];
        let mut uniform_offset = 0;
        let mut storage_offset = 0;
        let mut dynamic_index = 0;
        for (index, (element, resource)) in set.layout().elements.iter().zip(set.resources()).enumerate() {
            let key = (slot, index as u32);
            let unused = declared
                .and_then(|layout| layout.elements.get(index))
                .map_or(element.unused, |declared| declared.unused);
            if unused {
                continue;
            }

            let mut dynamic_offset = 0;
            if element.dynamic {
                dynamic_offset = dynamic_offsets.get(dynamic_index).copied().unwrap_or(0) as u64;
                dynamic_index += 1;
            }

            match element.kind {
                ResourceKind::UniformBuffer => {
                    let Some(uniform) = reflection.uniforms.get(&key) else {
                        continue;
                    };
                    let (buffer, offset, size) = resource.checked_buffer_range(dynamic_offset, &element.name, element.kind)?;
                    if size < uniform.block_size {
                        return Err(Error::UndersizedUniformBuffer {
                            name: element.name.clone(),
                            slot,
                            element: index as u32,
                            expected: uniform.block_size,
                            actual: size,
                        }
                        .into());
                    }
                    bindings.push(NativeBinding::Uniform {
                        block: uniform.block_location,
                        index: uniform_base + uniform_offset,
                        buffer: buffer.ensure_realized()?,
                        offset,
                        size,
                    });
                    uniform_offset += 1;
                }
                ResourceKind::StructuredBufferReadOnly | ResourceKind::StructuredBufferReadWrite => {
                    if !self.features.structured_buffer {
                        return Err(self.unsupported("structured buffer binding"));
                    }
                    let Some(storage) = reflection.storage.get(&key) else {
                        continue;
                    };
                    let (buffer, offset, size) = resource.checked_buffer_range(dynamic_offset, &element.name, element.kind)?;
                    bindings.push(NativeBinding::Storage {
                        block: storage.block_location,
                        index: storage_base + storage_offset,
                        buffer: buffer.ensure_realized()?,
                        offset,
                        size,
                    });
                    storage_offset += 1;
                }
                ResourceKind::TextureReadOnly => {
                    let Some(texture) = reflection.textures.get(&key) else {
                        continue;
                    };
                    let BindableResource::Texture(resource) = resource else {
                        return Err(Error::ResourceKindMismatch {
                            name: element.name.clone(),
                            kind: element.kind,
                        }
                        .into());
                    };
                    bindings.push(NativeBinding::Texture {
                        unit: texture.unit,
                        uniform_location: texture.uniform_location,
                        texture: resource.ensure_realized()?,
                    });
                }
                ResourceKind::TextureReadWrite => {
                    return Err(self.unsupported("read-write texture binding"));
                }
                ResourceKind::Sampler => {
                    let Some(units) = reflection.samplers.get(&key) else {
                        continue;
                    };
                    let BindableResource::Sampler(sampler) = resource else {
                        return Err(Error::ResourceKindMismatch {
                            name: element.name.clone(),
                            kind: element.kind,
                        }
                        .into());
                    };
                    bindings.push(NativeBinding::Sampler {
                        units: units.clone(),
                        sampler: *sampler,
                    });
                }
            }
        }
        Ok(bindings)
    }

    fn issue(&mut self, pipeline: &Pipeline, binding: NativeBinding) -> Result<()> {
        match binding {
            NativeBinding::Uniform {
                block,
                index,
                buffer,
                offset,
                size,
            } => {
                self.ctx.uniform_block_binding(pipeline.program(), block, index);
                self.check("uniform_block_binding")?;
                self.ctx.bind_buffer_range(gl::UNIFORM_BUFFER, index, buffer, offset, size);
                self.check("bind_buffer_range")
            }
            NativeBinding::Storage {
                block,
                index,
                buffer,
                offset,
                size,
            } => {
                self.ctx.shader_storage_block_binding(pipeline.program(), block, index);
                self.check("shader_storage_block_binding")?;
                self.ctx.bind_buffer_range(gl::SHADER_STORAGE_BUFFER, index, buffer, offset, size);
                self.check("bind_buffer_range")
            }
            NativeBinding::Texture {
                unit,
                uniform_location,
                texture,
            } => {
                self.ctx.set_texture(unit, texture);
                self.ctx.uniform_1i(uniform_location, unit as i32);
                self.check("uniform_1i")
            }
            NativeBinding::Sampler {
                units,
                sampler,
            } => {
                for unit in units {
                    self.ctx.set_sampler(unit, sampler);
                }
                self.check("set_sampler")
            }
        }
    }

    /// Re-issue vertex attribute state if the vertex buffers or the pipeline changed since the last draw.
    fn flush_vertex_layouts(&mut self) -> Result<()> {
        if !self.vertex_dirty {
            return Ok(());
        }
        let pipeline = self.graphics_pipeline.clone().ok_or(Error::NoPipelineBound)?;
        let locations = pipeline.vertex_attribute_locations();

        let mut attribute = 0;
        for (index, layout) in pipeline.vertex_layouts().iter().enumerate() {
            let binding = self
                .vertex_buffers
                .get(index)
                .cloned()
                .flatten()
                .ok_or(Error::NoVertexBuffer(index as u32))?;
            let native = binding.buffer.ensure_realized()?;
            self.ctx.bind_buffer(gl::ARRAY_BUFFER, native);
            self.check("bind_buffer")?;

            let mut running = 0u64;
            for element in &layout.elements {
                let size = element.format.byte_size().ok_or(Error::UnsupportedFormat(element.format))? as u64;
                let start = element.offset.map_or(running, u64::from);
                running = start + size;

                let location = locations.get(attribute).copied().flatten();
                attribute += 1;
                let Some(location) = location else {
                    continue;
                };

                let format = translate::vertex_attrib(element.format).ok_or(Error::UnsupportedFormat(element.format))?;
                self.ctx.enable_vertex_attrib_array(location);
                self.check("enable_vertex_attrib_array")?;
                if format.integer && !format.normalized {
                    self.ctx
                        .vertex_attrib_i_pointer(location, format.size, format.ty, layout.stride, start + binding.offset);
                    self.check("vertex_attrib_i_pointer")?;
                } else {
                    self.ctx.vertex_attrib_pointer(
                        location,
                        format.size,
                        format.ty,
                        format.normalized,
                        layout.stride,
                        start + binding.offset,
                    );
                    self.check("vertex_attrib_pointer")?;
                }

                let step_rate = layout.instance_step_rate;
                if self.divisors.get(&location).copied().unwrap_or(0) != step_rate {
                    self.ctx.vertex_attrib_divisor(location, step_rate);
                    self.check("vertex_attrib_divisor")?;
                    self.divisors.insert(location, step_rate);
                }
            }
        }
        self.vertex_dirty = false;
        Ok(())
    }

    fn pre_draw(&mut self) -> Result<()> {
        if self.graphics_pipeline.is_none() {
            return Err(Error::NoPipelineBound.into());
        }
        if !self.graphics_active {
            self.activate_graphics_pipeline()?;
        }
        self.flush_resource_sets(false)?;
        self.flush_vertex_layouts()
    }

    /// Bind a vertex buffer to a vertex layout slot.
    /// # Errors
    /// Fails with [`Error::ResourceDisposed`] if the buffer was disposed.
    pub fn set_vertex_buffer(&mut self, index: u32, buffer: &Resource, offset: u64) -> Result<()> {
        self.cmd.reference(buffer)?;
        let index = index as usize;
        if self.vertex_buffers.len() <= index {
            self.vertex_buffers.resize(index + 1, None);
        }
        self.vertex_buffers[index] = Some(VertexBufferBinding {
            buffer: buffer.clone(),
            offset,
        });
        self.vertex_dirty = true;
        Ok(())
    }

    /// Bind the index buffer.
    /// # Errors
    /// - Fails with [`Error::Unsupported`] for index types other than 16 and 32 bit.
    /// - Fails with [`Error::ResourceDisposed`] if the buffer was disposed.
    pub fn set_index_buffer(&mut self, buffer: &Resource, ty: vk::IndexType, offset: u64) -> Result<()> {
        let (ty, index_size) = self.translate(ty, "index type", translate::index_type)?;
        self.cmd.reference(buffer)?;
        let native = buffer.ensure_realized()?;
        self.ctx.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, native);
        self.check("bind_buffer")?;
        self.index_buffer = Some(IndexBufferBinding {
            buffer: buffer.clone(),
            ty,
            index_size,
            offset,
        });
        Ok(())
    }

    /// Set a viewport. Only viewport 0 reaches the backend.
    pub fn set_viewport(&mut self, index: u32, viewport: vk::Viewport) -> Result<()> {
        self.viewports.insert(index, viewport);
        if index == 0 {
            self.ctx
                .viewport(viewport.x as i32, viewport.y as i32, viewport.width as i32, viewport.height as i32);
            self.check("viewport")?;
            self.ctx.depth_range(viewport.min_depth, viewport.max_depth);
            self.check("depth_range")?;
        }
        Ok(())
    }

    /// The viewport last set at `index`.
    pub fn viewport(&self, index: u32) -> Option<vk::Viewport> {
        self.viewports.get(&index).copied()
    }

    /// Set the size of the render target. Scissor rectangles are flipped against its height.
    pub fn set_render_area(&mut self, extent: vk::Extent2D) {
        self.render_area = extent;
    }

    /// Set a scissor rectangle. Only scissor 0 reaches the backend, its origin is flipped to bottom-left.
    pub fn set_scissor(&mut self, index: u32, scissor: vk::Rect2D) -> Result<()> {
        if index == 0 {
            let height = scissor.extent.height as i32;
            let y = self.render_area.height as i32 - height - scissor.offset.y;
            self.ctx
                .scissor(scissor.offset.x, y, scissor.extent.width as i32, height);
            self.check("scissor")?;
        }
        Ok(())
    }

    /// Draw non-indexed primitives.
    /// # Errors
    /// - Fails with [`Error::Unsupported`] for a nonzero first instance.
    /// - Fails with [`Error::NoPipelineBound`], [`Error::NoResourceSet`] or [`Error::NoVertexBuffer`] if required
    ///   state is missing.
    /// - Fails with [`Error::UndersizedUniformBuffer`] if a bound uniform range is smaller than its block.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        if first_instance != 0 {
            return Err(self.unsupported("draw with a first instance"));
        }
        self.pre_draw()?;
        if instance_count == 1 {
            self.ctx.draw_arrays(self.primitive, first_vertex as i32, vertex_count as i32);
            self.check("draw_arrays")
        } else {
            self.ctx
                .draw_arrays_instanced(self.primitive, first_vertex as i32, vertex_count as i32, instance_count as i32);
            self.check("draw_arrays_instanced")
        }
    }

    /// Draw indexed primitives. See [`draw`](Self::draw) for the failure modes.
    /// # Errors
    /// Additionally fails with [`Error::NoIndexBuffer`] without an index buffer, and with [`Error::Unsupported`] for a
    /// nonzero vertex offset.
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) -> Result<()> {
        if vertex_offset != 0 {
            return Err(self.unsupported("draw_indexed with a vertex offset"));
        }
        if first_instance != 0 {
            return Err(self.unsupported("draw_indexed with a first instance"));
        }
        let index = self.index_buffer.clone().ok_or(Error::NoIndexBuffer)?;
        self.pre_draw()?;

        let offset = first_index as u64 * index.index_size + index.offset;
        if instance_count == 1 {
            self.ctx.draw_elements(self.primitive, index_count as i32, index.ty, offset);
            self.check("draw_elements")
        } else {
            self.ctx
                .draw_elements_instanced(self.primitive, index_count as i32, index.ty, offset, instance_count as i32);
            self.check("draw_elements_instanced")
        }
    }

    /// Dispatch compute work groups.
    /// # Errors
    /// - Fails with [`Error::Unsupported`] if the backend has no compute support.
    /// - Fails with [`Error::NoPipelineBound`] without a compute pipeline.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if !self.features.compute_shader {
            return Err(self.unsupported("dispatch"));
        }
        let pipeline = self.compute_pipeline.clone().ok_or(Error::NoPipelineBound)?;
        if !self.compute_active {
            self.ctx.use_program(pipeline.program());
            self.check("use_program")?;
            self.compute_active = true;
            self.graphics_active = false;
        }
        self.flush_resource_sets(true)?;
        self.ctx.dispatch_compute(x, y, z);
        self.check("dispatch_compute")
    }

    /// Write `data` into `buffer` at `offset`.
    /// # Errors
    /// - Fails with [`Error::NotABuffer`] or [`Error::BufferRangeOutOfBounds`] if the destination is not a buffer
    ///   range.
    /// - Fails with [`Error::ResourceDisposed`] if the buffer was disposed.
    pub fn update_buffer(&mut self, buffer: &Resource, offset: u64, data: &[u8]) -> Result<()> {
        check_buffer_range(buffer, offset, data.len() as u64)?;
        self.cmd.reference(buffer)?;
        let native = buffer.ensure_realized()?;

        // Index buffers may only ever be bound as element arrays.
        let is_index = matches!(
            buffer.description(),
            ResourceDescription::Buffer(description) if description.usage.contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        let target = if is_index { gl::ELEMENT_ARRAY_BUFFER } else { gl::COPY_WRITE_BUFFER };
        self.ctx.bind_buffer(target, native);
        self.check("bind_buffer")?;
        self.ctx.buffer_sub_data(target, offset, data);
        self.check("buffer_sub_data")?;
        self.ctx.unbind_buffer(target);
        self.check("unbind_buffer")?;

        if is_index {
            if let Some(index) = self.index_buffer.clone() {
                let native = index.buffer.ensure_realized()?;
                self.ctx.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, native);
                self.check("bind_buffer")?;
            }
        }
        Ok(())
    }

    /// Copy `size` bytes between two buffers.
    /// # Errors
    /// - Fails with [`Error::NotABuffer`] or [`Error::BufferRangeOutOfBounds`] if either side is not a buffer range.
    /// - Fails with [`Error::ResourceDisposed`] if either buffer was disposed.
    pub fn copy_buffer(&mut self, source: &Resource, source_offset: u64, destination: &Resource, destination_offset: u64, size: u64) -> Result<()> {
        check_buffer_range(source, source_offset, size)?;
        check_buffer_range(destination, destination_offset, size)?;
        self.cmd.reference(source)?;
        self.cmd.reference(destination)?;
        let source = source.ensure_realized()?;
        let destination = destination.ensure_realized()?;

        self.ctx.bind_buffer(gl::COPY_READ_BUFFER, source);
        self.check("bind_buffer")?;
        self.ctx.bind_buffer(gl::COPY_WRITE_BUFFER, destination);
        self.check("bind_buffer")?;
        self.ctx
            .copy_buffer_sub_data(gl::COPY_READ_BUFFER, gl::COPY_WRITE_BUFFER, source_offset, destination_offset, size);
        self.check("copy_buffer_sub_data")
    }

    /// Not available on emulated backends.
    pub fn clear_color_target(&mut self, _index: u32, _color: [f32; 4]) -> Result<()> {
        Err(self.unsupported("clear_color_target"))
    }

    /// Not available on emulated backends.
    pub fn clear_depth_stencil(&mut self, _depth: f32, _stencil: u8) -> Result<()> {
        Err(self.unsupported("clear_depth_stencil"))
    }

    /// Not available on emulated backends.
    pub fn draw_indirect(&mut self, _buffer: &Resource, _offset: u64, _draw_count: u32, _stride: u32) -> Result<()> {
        Err(self.unsupported("draw_indirect"))
    }

    /// Not available on emulated backends.
    pub fn draw_indexed_indirect(&mut self, _buffer: &Resource, _offset: u64, _draw_count: u32, _stride: u32) -> Result<()> {
        Err(self.unsupported("draw_indexed_indirect"))
    }

    /// Not available on emulated backends.
    pub fn dispatch_indirect(&mut self, _buffer: &Resource, _offset: u64) -> Result<()> {
        Err(self.unsupported("dispatch_indirect"))
    }

    /// Not available on emulated backends.
    pub fn texture_barrier(&mut self, _texture: &Resource) -> Result<()> {
        Err(self.unsupported("texture_barrier"))
    }
}

fn mark_all_dirty(slots: &mut Vec<BindingSlotState>, count: usize) {
    if slots.len() < count {
        slots.resize_with(count, BindingSlotState::default);
    }
    slots.iter_mut().for_each(|state| state.dirty = true);
}
