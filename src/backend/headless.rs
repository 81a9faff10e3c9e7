//! An in-process backend without a GPU.
//!
//! [`HeadlessBackend`] implements [`SubmissionBackend`] and [`ResourceBackend`] on host memory. Command buffers do
//! nothing, only their completion is simulated, according to a [`Delivery`] model. Failures can be injected into
//! every backend call. [`RecordingContext`] implements [`StateBackend`] by recording every call.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::LogicalCommandBuffer;
use crate::core::backend::*;
use crate::resource::map::storage_size;
use crate::resource::ResourceDescription;

/// When a committed command buffer completes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Only when the test calls [`HeadlessBackend::complete`], or when the host blocks on a buffer. Blocking completes
    /// every buffer committed up to and including that one.
    Manual,
    /// Synchronously, from inside `commit`.
    Immediate,
    /// From a separate thread, after the given latency.
    Threaded(Duration),
}

#[derive(Debug)]
struct NativeBuffer {
    label: String,
    refs: u32,
    committed: bool,
    /// Handlers were invoked. Status reports completion only from then on.
    delivered: bool,
}

#[derive(Debug)]
struct Storage {
    label: String,
    memory: Box<[u8]>,
}

#[derive(Debug, Default)]
struct Failures {
    prepare_at: Option<usize>,
    commit_at: Option<usize>,
    handler_registration: bool,
    allocation: bool,
    destruction: bool,
}

#[derive(Debug, Default)]
struct State {
    next_native: u64,
    buffers: HashMap<NativeCommandBuffer, NativeBuffer>,
    /// Registered completion handlers. Kept after completion so duplicates can be delivered.
    handlers: HashMap<NativeCommandBuffer, Vec<CompletionHandler>>,
    committed: Vec<NativeCommandBuffer>,
    prepared_count: usize,
    commit_count: usize,
    released_count: usize,

    resources: HashMap<NativeResource, Storage>,
    allocations: usize,
    destroyed: Vec<NativeResource>,
    failures: Failures,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    delivered: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn complete(&self, native: NativeCommandBuffer) -> bool {
        let handlers = {
            let mut state = self.lock();
            let Some(buffer) = state.buffers.get_mut(&native) else {
                return false;
            };
            if !buffer.committed || buffer.delivered {
                return false;
            }
            state.handlers.get(&native).cloned().unwrap_or_default()
        };
        // Handlers may call back into the backend, e.g. to release the native buffer.
        handlers.iter().for_each(|handler| handler.invoke(native));

        let mut state = self.lock();
        if let Some(buffer) = state.buffers.get_mut(&native) {
            buffer.delivered = true;
        }
        state.committed.retain(|committed| *committed != native);
        self.delivered.notify_all();
        true
    }
}

/// Submission and resource backend on host memory. See the [module level documentation](self).
#[derive(Debug)]
pub struct HeadlessBackend {
    mode: CompletionMode,
    delivery: Delivery,
    features: BackendFeatures,
    shared: Arc<Shared>,
}

impl HeadlessBackend {
    /// Backend with closure completion handlers and manual delivery, supporting every feature.
    pub fn new() -> Self {
        Self {
            mode: CompletionMode::Closure,
            delivery: Delivery::Manual,
            features: BackendFeatures {
                compute_shader: true,
                structured_buffer: true,
            },
            shared: Arc::default(),
        }
    }

    pub fn with_completion_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_features(mut self, features: BackendFeatures) -> Self {
        self.features = features;
        self
    }

    /// Complete a committed command buffer and deliver its handlers on the calling thread. Returns `false` if the
    /// buffer is unknown, not committed yet or already completed.
    pub fn complete(&self, native: NativeCommandBuffer) -> bool {
        self.shared.complete(native)
    }

    /// Complete every committed command buffer in commit order. Returns how many were completed.
    pub fn complete_all(&self) -> usize {
        let committed = self.shared.lock().committed.clone();
        committed
            .into_iter()
            .filter(|native| self.shared.complete(*native))
            .count()
    }

    /// Deliver the handlers of a native command buffer once more, as a misbehaving driver would.
    pub fn deliver_duplicate(&self, native: NativeCommandBuffer) {
        let handlers = self.shared.lock().handlers.get(&native).cloned().unwrap_or_default();
        handlers.iter().for_each(|handler| handler.invoke(native));
    }

    /// Committed native command buffers that did not complete yet, in commit order.
    pub fn pending(&self) -> Vec<NativeCommandBuffer> {
        self.shared.lock().committed.clone()
    }

    /// Native command buffers that still hold a reference.
    pub fn live_command_buffers(&self) -> usize {
        self.shared.lock().buffers.len()
    }

    /// Label of the logical buffer a native command buffer was prepared from.
    pub fn command_buffer_label(&self, native: NativeCommandBuffer) -> Option<String> {
        self.shared.lock().buffers.get(&native).map(|buffer| buffer.label.clone())
    }

    pub fn prepared_count(&self) -> usize {
        self.shared.lock().prepared_count
    }

    pub fn commit_count(&self) -> usize {
        self.shared.lock().commit_count
    }

    /// Number of native command buffers whose last reference was released.
    pub fn released_count(&self) -> usize {
        self.shared.lock().released_count
    }

    /// Number of native resources allocated so far.
    pub fn allocations(&self) -> usize {
        self.shared.lock().allocations
    }

    /// Native resources destroyed so far, in destruction order.
    pub fn destroyed(&self) -> Vec<NativeResource> {
        self.shared.lock().destroyed.clone()
    }

    /// Number of native resources currently allocated.
    pub fn live_resources(&self) -> usize {
        self.shared.lock().resources.len()
    }

    /// Debug label of a native resource.
    pub fn label(&self, native: NativeResource) -> Option<String> {
        self.shared.lock().resources.get(&native).map(|storage| storage.label.clone())
    }

    /// Copy of the host memory backing a native resource.
    pub fn read(&self, native: NativeResource) -> Option<Vec<u8>> {
        self.shared.lock().resources.get(&native).map(|storage| storage.memory.to_vec())
    }

    /// Fail the `index`-th call to `prepare`, counting from zero over the lifetime of the backend.
    pub fn fail_prepare_at(&self, index: usize) {
        self.shared.lock().failures.prepare_at = Some(index);
    }

    /// Fail the `index`-th call to `commit`, counting from zero over the lifetime of the backend.
    pub fn fail_commit_at(&self, index: usize) {
        self.shared.lock().failures.commit_at = Some(index);
    }

    pub fn fail_handler_registration(&self, fail: bool) {
        self.shared.lock().failures.handler_registration = fail;
    }

    pub fn fail_allocation(&self, fail: bool) {
        self.shared.lock().failures.allocation = fail;
    }

    pub fn fail_destruction(&self, fail: bool) {
        self.shared.lock().failures.destruction = fail;
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    fn features(&self) -> BackendFeatures {
        self.features
    }

    fn prepare(&self, cmd: &LogicalCommandBuffer) -> Result<NativeCommandBuffer> {
        let mut state = self.shared.lock();
        let index = state.prepared_count;
        state.prepared_count += 1;
        if state.failures.prepare_at == Some(index) {
            bail!("injected prepare failure");
        }
        state.next_native += 1;
        let native = NativeCommandBuffer(0x1000 + state.next_native);
        state.buffers.insert(
            native,
            NativeBuffer {
                label: cmd.label().to_owned(),
                refs: 1,
                committed: false,
                delivered: false,
            },
        );
        Ok(native)
    }

    fn add_completed_handler(&self, native: NativeCommandBuffer, handler: CompletionHandler) -> Result<()> {
        let mut state = self.shared.lock();
        if state.failures.handler_registration {
            bail!("injected handler registration failure");
        }
        if !state.buffers.contains_key(&native) {
            bail!("unknown native command buffer {:#x}", native.0);
        }
        state.handlers.entry(native).or_default().push(handler);
        Ok(())
    }

    fn commit(&self, native: NativeCommandBuffer) -> Result<()> {
        {
            let mut state = self.shared.lock();
            let index = state.commit_count;
            state.commit_count += 1;
            if state.failures.commit_at == Some(index) {
                bail!("injected commit failure");
            }
            let buffer = state
                .buffers
                .get_mut(&native)
                .ok_or_else(|| anyhow!("unknown native command buffer {:#x}", native.0))?;
            if buffer.committed {
                bail!("native command buffer {:#x} committed twice", native.0);
            }
            buffer.committed = true;
            state.committed.push(native);
        }

        match self.delivery {
            Delivery::Manual => {}
            Delivery::Immediate => {
                self.shared.complete(native);
            }
            Delivery::Threaded(latency) => {
                let shared = self.shared.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(latency);
                    shared.complete(native);
                });
            }
        }
        Ok(())
    }

    fn status(&self, native: NativeCommandBuffer) -> NativeStatus {
        match self.shared.lock().buffers.get(&native) {
            Some(buffer) if !buffer.delivered => NativeStatus::Pending,
            _ => NativeStatus::Completed,
        }
    }

    fn wait_until_completed(&self, native: NativeCommandBuffer) {
        // Without a delivery thread, nothing else would ever finish the buffer. The queue executes in order, so
        // everything committed before it finishes first.
        if self.delivery == Delivery::Manual {
            let committed = self.shared.lock().committed.clone();
            if let Some(position) = committed.iter().position(|committed| *committed == native) {
                committed[..=position].iter().for_each(|earlier| {
                    self.shared.complete(*earlier);
                });
            }
        }
        let mut state = self.shared.lock();
        while state
            .buffers
            .get(&native)
            .map_or(false, |buffer| buffer.committed && !buffer.delivered)
        {
            state = self
                .shared
                .delivered
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn retain(&self, native: NativeCommandBuffer) {
        if let Some(buffer) = self.shared.lock().buffers.get_mut(&native) {
            buffer.refs += 1;
        }
    }

    fn release(&self, native: NativeCommandBuffer) {
        let mut state = self.shared.lock();
        let Some(buffer) = state.buffers.get_mut(&native) else {
            return;
        };
        buffer.refs -= 1;
        if buffer.refs == 0 {
            state.buffers.remove(&native);
            state.committed.retain(|committed| *committed != native);
            state.released_count += 1;
            self.shared.delivered.notify_all();
        }
    }
}

impl ResourceBackend for HeadlessBackend {
    fn allocate(&self, description: &ResourceDescription) -> Result<NativeResource> {
        let size = storage_size(description)?;
        let mut state = self.shared.lock();
        if state.failures.allocation {
            bail!("injected allocation failure");
        }
        state.allocations += 1;
        let native = NativeResource(0x10_0000 + state.allocations as u64);
        state.resources.insert(
            native,
            Storage {
                label: String::new(),
                memory: vec![0; size as usize].into_boxed_slice(),
            },
        );
        Ok(native)
    }

    fn destroy(&self, native: NativeResource) -> Result<()> {
        let mut state = self.shared.lock();
        if state.failures.destruction {
            bail!("injected destruction failure");
        }
        state
            .resources
            .remove(&native)
            .ok_or_else(|| anyhow!("native resource {:#x} destroyed twice", native.0))?;
        state.destroyed.push(native);
        Ok(())
    }

    fn set_label(&self, native: NativeResource, label: &str) -> Result<()> {
        let mut state = self.shared.lock();
        let storage = state
            .resources
            .get_mut(&native)
            .ok_or_else(|| anyhow!("unknown native resource {:#x}", native.0))?;
        storage.label = label.to_owned();
        Ok(())
    }

    fn contents(&self, native: NativeResource) -> Result<NonNull<u8>> {
        let mut state = self.shared.lock();
        let storage = state
            .resources
            .get_mut(&native)
            .ok_or_else(|| anyhow!("unknown native resource {:#x}", native.0))?;
        // The boxed slice never moves while the resource lives.
        NonNull::new(storage.memory.as_mut_ptr()).ok_or_else(|| anyhow!("null contents"))
    }
}

/// A recorded [`StateBackend`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum StateCall {
    Enable(u32),
    Disable(u32),
    BlendColor([f32; 4]),
    BlendFuncSeparate { src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32 },
    BlendEquationSeparate { rgb: u32, alpha: u32 },
    DepthFunc(u32),
    DepthMask(bool),
    StencilFuncSeparate { face: u32, func: u32, reference: i32, mask: u32 },
    StencilMask(u32),
    CullFace(u32),
    FrontFace(u32),
    UseProgram(NativeProgram),
    UniformBlockBinding { program: NativeProgram, block: u32, binding: u32 },
    ShaderStorageBlockBinding { program: NativeProgram, block: u32, binding: u32 },
    BindBufferRange { target: u32, index: u32, buffer: NativeResource, offset: u64, size: u64 },
    BindBuffer { target: u32, buffer: NativeResource },
    UnbindBuffer(u32),
    BufferSubData { target: u32, offset: u64, data: Vec<u8> },
    CopyBufferSubData { read_target: u32, write_target: u32, read_offset: u64, write_offset: u64, size: u64 },
    SetTexture { unit: u32, texture: NativeResource },
    SetSampler { unit: u32, sampler: NativeSampler },
    Uniform1i { location: i32, value: i32 },
    EnableVertexAttribArray(u32),
    VertexAttribPointer { index: u32, size: u32, ty: u32, normalized: bool, stride: u32, offset: u64 },
    VertexAttribIPointer { index: u32, size: u32, ty: u32, stride: u32, offset: u64 },
    VertexAttribDivisor { index: u32, divisor: u32 },
    Viewport { x: i32, y: i32, width: i32, height: i32 },
    DepthRange { near: f32, far: f32 },
    Scissor { x: i32, y: i32, width: i32, height: i32 },
    DrawArrays { mode: u32, first: i32, count: i32 },
    DrawArraysInstanced { mode: u32, first: i32, count: i32, instances: i32 },
    DrawElements { mode: u32, count: i32, ty: u32, offset: u64 },
    DrawElementsInstanced { mode: u32, count: i32, ty: u32, offset: u64, instances: i32 },
    DispatchCompute { x: u32, y: u32, z: u32 },
}

impl StateCall {
    /// Whether this call is a draw or dispatch.
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            StateCall::DrawArrays { .. }
                | StateCall::DrawArraysInstanced { .. }
                | StateCall::DrawElements { .. }
                | StateCall::DrawElementsInstanced { .. }
                | StateCall::DispatchCompute { .. }
        )
    }
}

/// A [`StateBackend`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingContext {
    calls: Vec<StateCall>,
    errors: VecDeque<u32>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> &[StateCall] {
        &self.calls
    }

    /// Take the recorded calls, leaving the record empty.
    pub fn take_calls(&mut self) -> Vec<StateCall> {
        std::mem::take(&mut self.calls)
    }

    /// Make the next error poll report `code`.
    pub fn inject_error(&mut self, code: u32) {
        self.errors.push_back(code);
    }

    fn record(&mut self, call: StateCall) {
        self.calls.push(call);
    }
}

impl StateBackend for RecordingContext {
    fn name(&self) -> &str {
        "recording"
    }

    fn error(&mut self) -> Option<u32> {
        self.errors.pop_front()
    }

    fn enable(&mut self, cap: u32) {
        self.record(StateCall::Enable(cap));
    }

    fn disable(&mut self, cap: u32) {
        self.record(StateCall::Disable(cap));
    }

    fn blend_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.record(StateCall::BlendColor([r, g, b, a]));
    }

    fn blend_func_separate(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) {
        self.record(StateCall::BlendFuncSeparate {
            src_rgb,
            dst_rgb,
            src_alpha,
            dst_alpha,
        });
    }

    fn blend_equation_separate(&mut self, rgb: u32, alpha: u32) {
        self.record(StateCall::BlendEquationSeparate {
            rgb,
            alpha,
        });
    }

    fn depth_func(&mut self, func: u32) {
        self.record(StateCall::DepthFunc(func));
    }

    fn depth_mask(&mut self, write: bool) {
        self.record(StateCall::DepthMask(write));
    }

    fn stencil_func_separate(&mut self, face: u32, func: u32, reference: i32, mask: u32) {
        self.record(StateCall::StencilFuncSeparate {
            face,
            func,
            reference,
            mask,
        });
    }

    fn stencil_mask(&mut self, mask: u32) {
        self.record(StateCall::StencilMask(mask));
    }

    fn cull_face(&mut self, mode: u32) {
        self.record(StateCall::CullFace(mode));
    }

    fn front_face(&mut self, mode: u32) {
        self.record(StateCall::FrontFace(mode));
    }

    fn use_program(&mut self, program: NativeProgram) {
        self.record(StateCall::UseProgram(program));
    }

    fn uniform_block_binding(&mut self, program: NativeProgram, block: u32, binding: u32) {
        self.record(StateCall::UniformBlockBinding {
            program,
            block,
            binding,
        });
    }

    fn shader_storage_block_binding(&mut self, program: NativeProgram, block: u32, binding: u32) {
        self.record(StateCall::ShaderStorageBlockBinding {
            program,
            block,
            binding,
        });
    }

    fn bind_buffer_range(&mut self, target: u32, index: u32, buffer: NativeResource, offset: u64, size: u64) {
        self.record(StateCall::BindBufferRange {
            target,
            index,
            buffer,
            offset,
            size,
        });
    }

    fn bind_buffer(&mut self, target: u32, buffer: NativeResource) {
        self.record(StateCall::BindBuffer {
            target,
            buffer,
        });
    }

    fn unbind_buffer(&mut self, target: u32) {
        self.record(StateCall::UnbindBuffer(target));
    }

    fn buffer_sub_data(&mut self, target: u32, offset: u64, data: &[u8]) {
        self.record(StateCall::BufferSubData {
            target,
            offset,
            data: data.to_vec(),
        });
    }

    fn copy_buffer_sub_data(&mut self, read_target: u32, write_target: u32, read_offset: u64, write_offset: u64, size: u64) {
        self.record(StateCall::CopyBufferSubData {
            read_target,
            write_target,
            read_offset,
            write_offset,
            size,
        });
    }

    fn set_texture(&mut self, unit: u32, texture: NativeResource) {
        self.record(StateCall::SetTexture {
            unit,
            texture,
        });
    }

    fn set_sampler(&mut self, unit: u32, sampler: NativeSampler) {
        self.record(StateCall::SetSampler {
            unit,
            sampler,
        });
    }

    fn uniform_1i(&mut self, location: i32, value: i32) {
        self.record(StateCall::Uniform1i {
            location,
            value,
        });
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        self.record(StateCall::EnableVertexAttribArray(index));
    }

    fn vertex_attrib_pointer(&mut self, index: u32, size: u32, ty: u32, normalized: bool, stride: u32, offset: u64) {
        self.record(StateCall::VertexAttribPointer {
            index,
            size,
            ty,
            normalized,
            stride,
            offset,
        });
    }

    fn vertex_attrib_i_pointer(&mut self, index: u32, size: u32, ty: u32, stride: u32, offset: u64) {
        self.record(StateCall::VertexAttribIPointer {
            index,
            size,
            ty,
            stride,
            offset,
        });
    }

    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32) {
        self.record(StateCall::VertexAttribDivisor {
            index,
            divisor,
        });
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.record(StateCall::Viewport {
            x,
            y,
            width,
            height,
        });
    }

    fn depth_range(&mut self, near: f32, far: f32) {
        self.record(StateCall::DepthRange {
            near,
            far,
        });
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.record(StateCall::Scissor {
            x,
            y,
            width,
            height,
        });
    }

    fn draw_arrays(&mut self, mode: u32, first: i32, count: i32) {
        self.record(StateCall::DrawArrays {
            mode,
            first,
            count,
        });
    }

    fn draw_arrays_instanced(&mut self, mode: u32, first: i32, count: i32, instances: i32) {
        self.record(StateCall::DrawArraysInstanced {
            mode,
            first,
            count,
            instances,
        });
    }

    fn draw_elements(&mut self, mode: u32, count: i32, ty: u32, offset: u64) {
        self.record(StateCall::DrawElements {
            mode,
            count,
            ty,
            offset,
        });
    }

    fn draw_elements_instanced(&mut self, mode: u32, count: i32, ty: u32, offset: u64, instances: i32) {
        self.record(StateCall::DrawElementsInstanced {
            mode,
            count,
            ty,
            offset,
            instances,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record(StateCall::DispatchCompute {
            x,
            y,
            z,
        });
    }
}
