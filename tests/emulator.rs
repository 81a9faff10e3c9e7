use anyhow::Result;

use deimos::emulation::gl;
use deimos::prelude::*;

mod framework;

const PROGRAM: NativeProgram = NativeProgram(7);
const SAMPLER: NativeSampler = NativeSampler(3);

fn sprite_layout() -> ResourceLayout {
    ResourceLayout::new([
        ResourceLayoutElement::new("camera", ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
        ResourceLayoutElement::new("atlas", ResourceKind::TextureReadOnly, vk::ShaderStageFlags::FRAGMENT),
        ResourceLayoutElement::new("atlas_sampler", ResourceKind::Sampler, vk::ShaderStageFlags::FRAGMENT),
    ])
}

fn sprite_pipeline() -> Pipeline {
    PipelineBuilder::new("sprites")
        .program(PROGRAM)
        .resource_layout(sprite_layout())
        .vertex_layout(VertexLayout::new([
            VertexElement::new("position", vk::Format::R32G32_SFLOAT),
            VertexElement::new("uv", vk::Format::R32G32_SFLOAT),
        ]))
        .uniform_block(0, 0, 0, 64)
        .texture_unit(0, 1, 2, 5)
        .sampler_units(0, 2, [2, 4])
        .build()
}

fn texture(context: &framework::Context, name: &str) -> Resource {
    context.device.create_texture(
        name,
        TextureDescription {
            width: 4,
            height: 4,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED,
            memory: MemoryType::GpuOnly,
        },
    )
}

fn sprite_set(context: &framework::Context, uniform_size: u64) -> Result<(ResourceSet, Resource, Resource)> {
    let camera = framework::host_buffer(context, "camera", uniform_size);
    let atlas = texture(context, "atlas");
    let set = ResourceSet::new(
        sprite_layout(),
        [
            BindableResource::Buffer(camera.clone()),
            BindableResource::Texture(atlas.clone()),
            BindableResource::Sampler(SAMPLER),
        ],
    )?;
    Ok((set, camera, atlas))
}

fn draws(ctx: &RecordingContext) -> usize {
    ctx.calls().iter().filter(|call| call.is_draw()).count()
}

fn is_usage(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Error>().map_or(false, |err| err.kind() == ErrorKind::Usage)
}

#[test]
pub fn activation_issues_every_state_call() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let pipeline = PipelineBuilder::new("blended")
        .program(PROGRAM)
        .blend_constant([0.5, 0.25, 0.0, 1.0])
        .blend_attachment(BlendAttachment::alpha())
        .depth(true, true, vk::CompareOp::LESS)
        .stencil(vk::CompareOp::EQUAL, vk::CompareOp::ALWAYS, 1)
        .stencil_masks(0x0f, 0xf0)
        .cull_mask(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .scissor_test(true)
        .build();

    let mut executor = context.device.executor(&mut ctx, "activation");
    executor.bind_pipeline(&pipeline)?;
    drop(executor);

    assert_eq!(
        ctx.calls(),
        &[
            StateCall::BlendColor([0.5, 0.25, 0.0, 1.0]),
            StateCall::Disable(gl::SAMPLE_ALPHA_TO_COVERAGE),
            StateCall::Enable(gl::BLEND),
            StateCall::BlendFuncSeparate {
                src_rgb: gl::SRC_ALPHA,
                dst_rgb: gl::ONE_MINUS_SRC_ALPHA,
                src_alpha: gl::SRC_ALPHA,
                dst_alpha: gl::ONE_MINUS_SRC_ALPHA,
            },
            StateCall::BlendEquationSeparate {
                rgb: gl::FUNC_ADD,
                alpha: gl::FUNC_ADD,
            },
            StateCall::Enable(gl::DEPTH_TEST),
            StateCall::DepthFunc(gl::LESS),
            StateCall::DepthMask(true),
            StateCall::Enable(gl::STENCIL_TEST),
            StateCall::StencilFuncSeparate {
                face: gl::FRONT,
                func: gl::EQUAL,
                reference: 1,
                mask: 0x0f,
            },
            StateCall::StencilFuncSeparate {
                face: gl::BACK,
                func: gl::ALWAYS,
                reference: 1,
                mask: 0x0f,
            },
            StateCall::StencilMask(0xf0),
            StateCall::Disable(gl::CULL_FACE),
            StateCall::Enable(gl::SCISSOR_TEST),
            StateCall::FrontFace(gl::CCW),
            StateCall::UseProgram(PROGRAM),
        ]
    );
    Ok(())
}

#[test]
pub fn rebinding_same_pipeline_is_noop() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let pipeline = sprite_pipeline();

    let mut executor = context.device.executor(&mut ctx, "rebind");
    executor.bind_pipeline(&pipeline)?;
    let issued = executor.context().calls().len();
    executor.bind_pipeline(&pipeline.clone())?;
    assert_eq!(executor.context().calls().len(), issued);

    // An equal but distinct pipeline object is activated again.
    executor.bind_pipeline(&sprite_pipeline())?;
    assert_eq!(executor.context().calls().len(), 2 * issued);
    Ok(())
}

#[test]
pub fn activation_marks_slots_dirty_and_draw_cleans_them() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let (set, _camera, _atlas) = sprite_set(&context, 64)?;
    let vertices = framework::host_buffer(&context, "vertices", 256);

    let mut executor = context.device.executor(&mut ctx, "dirty");
    executor.bind_resource_set(0, &set, &[])?;
    executor.set_vertex_buffer(0, &vertices, 0)?;
    executor.bind_pipeline(&sprite_pipeline())?;
    assert_eq!(executor.dirty_slots(), vec![0]);

    executor.draw(6, 1, 0, 0)?;
    assert!(executor.dirty_slots().is_empty(), "No slot may stay dirty after a draw.");
    assert!(!executor.slot(0).map_or(true, BindingSlotState::is_dirty));

    // A second pipeline activation dirties every slot again.
    executor.bind_pipeline(&sprite_pipeline())?;
    assert_eq!(executor.dirty_slots(), vec![0]);
    executor.draw(6, 1, 0, 0)?;
    assert!(executor.dirty_slots().is_empty());
    Ok(())
}

#[test]
pub fn draw_binds_uniforms_textures_and_samplers() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let (set, camera, atlas) = sprite_set(&context, 64)?;
    let vertices = framework::host_buffer(&context, "vertices", 256);

    let mut executor = context.device.executor(&mut ctx, "bind");
    executor.bind_pipeline(&sprite_pipeline())?;
    executor.bind_resource_set(0, &set, &[])?;
    executor.set_vertex_buffer(0, &vertices, 0)?;
    executor.context_mut().take_calls();
    executor.draw(6, 1, 0, 0)?;
    let cmd = executor.finish();

    let camera = camera.native()?;
    let atlas = atlas.native()?;
    let vertices = vertices.native()?;
    assert_eq!(
        ctx.calls(),
        &[
            StateCall::UniformBlockBinding {
                program: PROGRAM,
                block: 0,
                binding: 0,
            },
            StateCall::BindBufferRange {
                target: gl::UNIFORM_BUFFER,
                index: 0,
                buffer: camera,
                offset: 0,
                size: 64,
            },
            StateCall::SetTexture {
                unit: 2,
                texture: atlas,
            },
            StateCall::Uniform1i {
                location: 5,
                value: 2,
            },
            StateCall::SetSampler {
                unit: 2,
                sampler: SAMPLER,
            },
            StateCall::SetSampler {
                unit: 4,
                sampler: SAMPLER,
            },
            StateCall::BindBuffer {
                target: gl::ARRAY_BUFFER,
                buffer: vertices,
            },
            StateCall::EnableVertexAttribArray(0),
            StateCall::VertexAttribPointer {
                index: 0,
                size: 2,
                ty: gl::FLOAT,
                normalized: false,
                stride: 16,
                offset: 0,
            },
            StateCall::EnableVertexAttribArray(1),
            StateCall::VertexAttribPointer {
                index: 1,
                size: 2,
                ty: gl::FLOAT,
                normalized: false,
                stride: 16,
                offset: 8,
            },
            StateCall::DrawArrays {
                mode: gl::TRIANGLES,
                first: 0,
                count: 6,
            },
        ]
    );
    assert_eq!(cmd.resources().len(), 3, "Every bound resource should be referenced by the command buffer.");
    Ok(())
}

#[test]
pub fn undersized_uniform_buffer_is_rejected_without_binding() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let (set, _camera, _atlas) = sprite_set(&context, 32)?;
    let vertices = framework::host_buffer(&context, "vertices", 256);

    let mut executor = context.device.executor(&mut ctx, "undersized");
    executor.bind_pipeline(&sprite_pipeline())?;
    executor.bind_resource_set(0, &set, &[])?;
    executor.set_vertex_buffer(0, &vertices, 0)?;
    executor.context_mut().take_calls();

    let err = executor.draw(6, 1, 0, 0).expect_err("A 32 byte range cannot back a 64 byte block.");
    assert!(is_usage(&err));
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::UndersizedUniformBuffer {
            slot: 0,
            element: 0,
            expected: 64,
            actual: 32,
            ..
        })
    ));
    assert!(executor.context().calls().is_empty(), "No native call may be issued.");
    assert_eq!(executor.dirty_slots(), vec![0], "The slot stays dirty.");
    Ok(())
}

#[test]
pub fn uniform_binding_index_offsets_by_lower_slots() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let two_uniforms = ResourceLayout::new([
        ResourceLayoutElement::new("frame", ResourceKind::UniformBuffer, vk::ShaderStageFlags::ALL_GRAPHICS),
        ResourceLayoutElement::new("camera", ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
    ]);
    let one_uniform = ResourceLayout::new([ResourceLayoutElement::new(
        "object",
        ResourceKind::UniformBuffer,
        vk::ShaderStageFlags::VERTEX,
    )]);
    let pipeline = PipelineBuilder::new("offsets")
        .program(PROGRAM)
        .resource_layout(two_uniforms.clone())
        .resource_layout(one_uniform.clone())
        .uniform_block(0, 0, 0, 16)
        .uniform_block(0, 1, 1, 16)
        .uniform_block(1, 0, 2, 16)
        .build();

    let frame = framework::host_buffer(&context, "frame", 16);
    let camera = framework::host_buffer(&context, "camera", 16);
    let object = framework::host_buffer(&context, "object", 16);
    let lower = ResourceSet::new(two_uniforms, [BindableResource::Buffer(frame), BindableResource::Buffer(camera)])?;
    let upper = ResourceSet::new(one_uniform, [BindableResource::Buffer(object.clone())])?;

    let mut executor = context.device.executor(&mut ctx, "offsets");
    executor.bind_pipeline(&pipeline)?;
    executor.bind_resource_set(0, &lower, &[])?;
    executor.bind_resource_set(1, &upper, &[])?;
    executor.draw(3, 1, 0, 0)?;
    drop(executor);

    let object = object.native()?;
    assert!(ctx.calls().contains(&StateCall::UniformBlockBinding {
        program: PROGRAM,
        block: 2,
        binding: 2,
    }));
    assert!(ctx.calls().contains(&StateCall::BindBufferRange {
        target: gl::UNIFORM_BUFFER,
        index: 2,
        buffer: object,
        offset: 0,
        size: 16,
    }));
    Ok(())
}

#[test]
pub fn dynamic_offsets_shift_the_bound_range() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let layout = ResourceLayout::new([
        ResourceLayoutElement::new("objects", ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX).dynamic()
    ]);
    let pipeline = PipelineBuilder::new("dynamic")
        .program(PROGRAM)
        .resource_layout(layout.clone())
        .uniform_block(0, 0, 0, 64)
        .build();
    let objects = framework::host_buffer(&context, "objects", 1024);
    let set = ResourceSet::new(
        layout,
        [BindableResource::BufferRange {
            buffer: objects.clone(),
            offset: 0,
            size: 64,
        }],
    )?;

    let mut executor = context.device.executor(&mut ctx, "dynamic");
    executor.bind_pipeline(&pipeline)?;
    let err = executor
        .bind_resource_set(0, &set, &[])
        .expect_err("A dynamic element needs an offset.");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::DynamicOffsetMismatch {
            slot: 0,
            expected: 1,
            actual: 0,
        })
    ));

    executor.bind_resource_set(0, &set, &[256])?;
    executor.draw(3, 1, 0, 0)?;
    // Same set and offsets: nothing to rebind.
    executor.bind_resource_set(0, &set, &[256])?;
    assert!(executor.dirty_slots().is_empty());
    // New offset: rebind.
    executor.bind_resource_set(0, &set, &[512])?;
    assert_eq!(executor.dirty_slots(), vec![0]);
    executor.draw(3, 1, 0, 0)?;
    drop(executor);

    let objects = objects.native()?;
    let ranges = ctx
        .calls()
        .iter()
        .filter_map(|call| match call {
            StateCall::BindBufferRange {
                buffer,
                offset,
                size,
                ..
            } if *buffer == objects => Some((*offset, *size)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(ranges, vec![(256, 64), (512, 64)]);
    Ok(())
}

#[test]
pub fn unused_elements_are_skipped() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let declared = ResourceLayout::new([
        ResourceLayoutElement::new("debug", ResourceKind::UniformBuffer, vk::ShaderStageFlags::FRAGMENT).unused(),
        ResourceLayoutElement::new("camera", ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
    ]);
    let pipeline = PipelineBuilder::new("unused")
        .program(PROGRAM)
        .resource_layout(declared.clone())
        .uniform_block(0, 0, 0, 16)
        .uniform_block(0, 1, 1, 16)
        .build();
    let debug = framework::host_buffer(&context, "debug", 16);
    let camera = framework::host_buffer(&context, "camera", 16);
    let set = ResourceSet::new(declared, [BindableResource::Buffer(debug.clone()), BindableResource::Buffer(camera)])?;

    let mut executor = context.device.executor(&mut ctx, "unused");
    executor.bind_pipeline(&pipeline)?;
    executor.bind_resource_set(0, &set, &[])?;
    executor.draw(3, 1, 0, 0)?;
    drop(executor);

    assert!(!debug.is_realized(), "An unused element is never bound, so never realized.");
    let bound = ctx
        .calls()
        .iter()
        .filter(|call| matches!(call, StateCall::BindBufferRange { .. }))
        .count();
    assert_eq!(bound, 1);
    Ok(())
}

#[test]
pub fn vertex_offsets_and_divisors() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let pipeline = PipelineBuilder::new("instanced")
        .program(PROGRAM)
        .vertex_layout(VertexLayout::new([
            VertexElement::new("position", vk::Format::R32G32B32_SFLOAT),
            VertexElement::new("color", vk::Format::R8G8B8A8_UNORM).with_offset(16),
            VertexElement::new("material", vk::Format::R32_UINT),
        ]))
        .vertex_layout(VertexLayout::new([VertexElement::new("transform", vk::Format::R32G32B32A32_SFLOAT)]).per_instance(1))
        .vertex_attribute_unused(1)
        .build();
    let vertices = framework::host_buffer(&context, "vertices", 1024);
    let instances = framework::host_buffer(&context, "instances", 1024);

    let mut executor = context.device.executor(&mut ctx, "instanced");
    executor.bind_pipeline(&pipeline)?;
    executor.set_vertex_buffer(0, &vertices, 0)?;
    executor.set_vertex_buffer(1, &instances, 128)?;
    executor.context_mut().take_calls();
    executor.draw(3, 10, 0, 0)?;
    let first = executor.context_mut().take_calls();

    // Position at 0, the unused color still occupies 16..20, material follows at 20.
    assert!(first.contains(&StateCall::VertexAttribPointer {
        index: 0,
        size: 3,
        ty: gl::FLOAT,
        normalized: false,
        stride: 24,
        offset: 0,
    }));
    assert!(!first.contains(&StateCall::EnableVertexAttribArray(1)));
    assert!(first.contains(&StateCall::VertexAttribIPointer {
        index: 2,
        size: 1,
        ty: gl::UNSIGNED_INT,
        stride: 24,
        offset: 20,
    }));
    assert!(first.contains(&StateCall::VertexAttribPointer {
        index: 3,
        size: 4,
        ty: gl::FLOAT,
        normalized: false,
        stride: 16,
        offset: 128,
    }));
    assert!(first.contains(&StateCall::VertexAttribDivisor {
        index: 3,
        divisor: 1,
    }));
    assert!(first.contains(&StateCall::DrawArraysInstanced {
        mode: gl::TRIANGLES,
        first: 0,
        count: 3,
        instances: 10,
    }));

    // Vertex state unchanged: nothing is re-issued.
    executor.draw(3, 10, 0, 0)?;
    assert_eq!(executor.context_mut().take_calls().len(), 1);

    // New vertex buffer: pointers are re-issued, the unchanged divisor is not.
    executor.set_vertex_buffer(1, &instances, 0)?;
    executor.draw(3, 10, 0, 0)?;
    let second = executor.context_mut().take_calls();
    assert!(second
        .iter()
        .any(|call| matches!(call, StateCall::VertexAttribPointer { index: 3, offset: 0, .. })));
    assert!(!second
        .iter()
        .any(|call| matches!(call, StateCall::VertexAttribDivisor { .. })));
    Ok(())
}

#[test]
pub fn indexed_draws() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let pipeline = PipelineBuilder::new("indexed")
        .program(PROGRAM)
        .primitive_topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
        .build();
    let indices = framework::host_buffer(&context, "indices", 256);

    let mut executor = context.device.executor(&mut ctx, "indexed");
    executor.bind_pipeline(&pipeline)?;
    let err = executor.draw_indexed(6, 1, 0, 0, 0).expect_err("No index buffer bound.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoIndexBuffer)));

    executor.set_index_buffer(&indices, vk::IndexType::UINT16, 32)?;
    executor.draw_indexed(6, 1, 4, 0, 0)?;
    executor.draw_indexed(6, 2, 0, 0, 0)?;
    drop(executor);

    let indices = indices.native()?;
    let calls = ctx.calls();
    assert!(calls.contains(&StateCall::BindBuffer {
        target: gl::ELEMENT_ARRAY_BUFFER,
        buffer: indices,
    }));
    assert!(calls.contains(&StateCall::DrawElements {
        mode: gl::TRIANGLE_STRIP,
        count: 6,
        ty: gl::UNSIGNED_SHORT,
        offset: 40,
    }));
    assert!(calls.contains(&StateCall::DrawElementsInstanced {
        mode: gl::TRIANGLE_STRIP,
        count: 6,
        ty: gl::UNSIGNED_SHORT,
        offset: 32,
        instances: 2,
    }));
    Ok(())
}

#[test]
pub fn missing_state_is_reported() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let mut executor = context.device.executor(&mut ctx, "missing");

    let err = executor.draw(3, 1, 0, 0).expect_err("No pipeline bound.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoPipelineBound)));

    executor.bind_pipeline(&sprite_pipeline())?;
    let err = executor.draw(3, 1, 0, 0).expect_err("No resource set bound.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoResourceSet(0))));

    let (set, _camera, _atlas) = sprite_set(&context, 64)?;
    executor.bind_resource_set(0, &set, &[])?;
    let err = executor.draw(3, 1, 0, 0).expect_err("No vertex buffer bound.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoVertexBuffer(0))));
    assert!(is_usage(&err));
    drop(executor);
    assert_eq!(draws(&ctx), 0);
    Ok(())
}

#[test]
pub fn unsupported_operations_are_reported() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let buffer = framework::host_buffer(&context, "args", 64);
    let atlas = texture(&context, "atlas");

    let mut executor = context.device.executor(&mut ctx, "unsupported");
    executor.bind_pipeline(&PipelineBuilder::new("empty").program(PROGRAM).build())?;
    executor.set_index_buffer(&buffer, vk::IndexType::UINT32, 0)?;

    let failures = [
        executor.draw_indirect(&buffer, 0, 1, 16),
        executor.draw_indexed_indirect(&buffer, 0, 1, 20),
        executor.dispatch_indirect(&buffer, 0),
        executor.texture_barrier(&atlas),
        executor.draw(3, 1, 0, 1),
        executor.draw_indexed(3, 1, 0, -2, 0),
        executor.set_index_buffer(&buffer, vk::IndexType::UINT8_EXT, 0),
    ];
    for result in failures {
        let err = result.expect_err("Should be unsupported.");
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unsupported { backend, .. }) if backend == "recording"));
        assert!(is_usage(&err));
    }
    drop(executor);
    assert_eq!(draws(&ctx), 0);
    Ok(())
}

#[test]
pub fn read_write_textures_are_unsupported() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let layout = ResourceLayout::new([ResourceLayoutElement::new(
        "target",
        ResourceKind::TextureReadWrite,
        vk::ShaderStageFlags::FRAGMENT,
    )]);
    let pipeline = PipelineBuilder::new("storage image")
        .program(PROGRAM)
        .resource_layout(layout.clone())
        .build();
    let set = ResourceSet::new(layout, [BindableResource::Texture(texture(&context, "target"))])?;

    let mut executor = context.device.executor(&mut ctx, "rw");
    executor.bind_pipeline(&pipeline)?;
    executor.bind_resource_set(0, &set, &[])?;
    let err = executor.draw(3, 1, 0, 0).expect_err("Read-write textures cannot be emulated.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unsupported { .. })));
    Ok(())
}

#[test]
pub fn compute_requires_feature() -> Result<()> {
    let backend = HeadlessBackend::new().with_features(BackendFeatures::default());
    let context = framework::make_context_with_backend(backend)?;
    let mut ctx = RecordingContext::new();
    let pipeline = PipelineBuilder::compute("cull").program(PROGRAM).build();

    let mut executor = context.device.executor(&mut ctx, "compute");
    let err = executor.bind_pipeline(&pipeline).expect_err("Compute is not available.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unsupported { .. })));
    let err = executor.dispatch(1, 1, 1).expect_err("Compute is not available.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unsupported { .. })));
    Ok(())
}

#[test]
pub fn dispatch_binds_storage_buffers() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let layout = ResourceLayout::new([
        ResourceLayoutElement::new("input", ResourceKind::StructuredBufferReadOnly, vk::ShaderStageFlags::COMPUTE),
        ResourceLayoutElement::new("output", ResourceKind::StructuredBufferReadWrite, vk::ShaderStageFlags::COMPUTE),
    ]);
    let pipeline = PipelineBuilder::compute("cull")
        .program(PROGRAM)
        .resource_layout(layout.clone())
        .storage_block(0, 0, 0)
        .storage_block(0, 1, 1)
        .build();
    let input = framework::host_buffer(&context, "input", 128);
    let output = framework::host_buffer(&context, "output", 128);
    let set = ResourceSet::new(layout, [BindableResource::Buffer(input), BindableResource::Buffer(output.clone())])?;

    let mut executor = context.device.executor(&mut ctx, "compute");
    executor.bind_pipeline(&pipeline)?;
    executor.bind_compute_resource_set(0, &set, &[])?;
    executor.dispatch(8, 4, 1)?;
    assert!(!executor.compute_slot(0).map_or(true, BindingSlotState::is_dirty));
    drop(executor);

    let output = output.native()?;
    let calls = ctx.calls();
    assert_eq!(calls.first(), Some(&StateCall::UseProgram(PROGRAM)));
    assert!(calls.contains(&StateCall::ShaderStorageBlockBinding {
        program: PROGRAM,
        block: 1,
        binding: 1,
    }));
    assert!(calls.contains(&StateCall::BindBufferRange {
        target: gl::SHADER_STORAGE_BUFFER,
        index: 1,
        buffer: output,
        offset: 0,
        size: 128,
    }));
    assert_eq!(calls.last(), Some(&StateCall::DispatchCompute { x: 8, y: 4, z: 1 }));
    Ok(())
}

#[test]
pub fn structured_buffers_require_feature() -> Result<()> {
    let backend = HeadlessBackend::new().with_features(BackendFeatures {
        compute_shader: true,
        structured_buffer: false,
    });
    let context = framework::make_context_with_backend(backend)?;
    let mut ctx = RecordingContext::new();
    let layout = ResourceLayout::new([ResourceLayoutElement::new(
        "particles",
        ResourceKind::StructuredBufferReadOnly,
        vk::ShaderStageFlags::VERTEX,
    )]);
    let pipeline = PipelineBuilder::new("particles")
        .program(PROGRAM)
        .resource_layout(layout.clone())
        .storage_block(0, 0, 0)
        .build();
    let set = ResourceSet::new(layout, [BindableResource::Buffer(framework::host_buffer(&context, "particles", 64))])?;

    let mut executor = context.device.executor(&mut ctx, "particles");
    executor.bind_pipeline(&pipeline)?;
    executor.bind_resource_set(0, &set, &[])?;
    let err = executor.draw(3, 1, 0, 0).expect_err("Structured buffers are not available.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unsupported { .. })));
    Ok(())
}

#[test]
pub fn native_error_codes_surface() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    ctx.inject_error(gl::INVALID_ENUM);

    let mut executor = context.device.executor(&mut ctx, "errors");
    let err = executor
        .bind_pipeline(&sprite_pipeline())
        .expect_err("The injected error should surface.");
    let err = err.downcast_ref::<Error>().expect("Should be a deimos error.");
    assert!(matches!(err, Error::NativeCall { operation: "blend_color", code: gl::INVALID_ENUM }));
    assert_eq!(err.kind(), ErrorKind::Backend);
    Ok(())
}

#[test]
pub fn viewport_and_flipped_scissor() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();

    let mut executor = context.device.executor(&mut ctx, "viewport");
    executor.set_render_area(vk::Extent2D { width: 800, height: 600 });
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: 800.0,
        height: 600.0,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    executor.set_viewport(0, viewport)?;
    executor.set_viewport(1, viewport)?;
    executor.set_scissor(
        0,
        vk::Rect2D {
            offset: vk::Offset2D { x: 10, y: 20 },
            extent: vk::Extent2D { width: 100, height: 50 },
        },
    )?;
    assert_eq!(executor.viewport(1).map(|viewport| viewport.width), Some(800.0));
    drop(executor);

    assert_eq!(
        ctx.calls(),
        &[
            StateCall::Viewport { x: 0, y: 0, width: 800, height: 600 },
            StateCall::DepthRange { near: 0.0, far: 1.0 },
            StateCall::Scissor { x: 10, y: 530, width: 100, height: 50 },
        ]
    );
    Ok(())
}

#[test]
pub fn recorded_resources_live_until_completion() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let (set, camera, _atlas) = sprite_set(&context, 64)?;
    let vertices = framework::host_buffer(&context, "vertices", 256);

    let mut executor = context.device.executor(&mut ctx, "frame");
    executor.bind_pipeline(&sprite_pipeline())?;
    executor.bind_resource_set(0, &set, &[])?;
    executor.set_vertex_buffer(0, &vertices, 0)?;
    executor.draw(6, 1, 0, 0)?;
    let handle = context.device.submit(executor.finish(), None)?;

    assert!(!context.device.request_disposal(&camera)?, "The camera buffer is still in use.");
    context.backend.complete(handle.native());
    assert_eq!(camera.lifetime().ref_count(), 0);
    assert_eq!(context.device.flush_disposals()?, 1);
    Ok(())
}

fn single_uniform_layout() -> ResourceLayout {
    ResourceLayout::new([ResourceLayoutElement::new(
        "object",
        ResourceKind::UniformBuffer,
        vk::ShaderStageFlags::VERTEX,
    )])
}

#[test]
pub fn switching_to_fewer_slots_leaves_nothing_dirty() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let two_slots = PipelineBuilder::new("two slots")
        .program(PROGRAM)
        .resource_layout(single_uniform_layout())
        .resource_layout(single_uniform_layout())
        .uniform_block(0, 0, 0, 16)
        .uniform_block(1, 0, 1, 16)
        .build();
    let one_slot = PipelineBuilder::new("one slot")
        .program(NativeProgram(8))
        .resource_layout(single_uniform_layout())
        .uniform_block(0, 0, 0, 16)
        .build();

    let first = framework::host_buffer(&context, "first", 16);
    let second = framework::host_buffer(&context, "second", 16);
    let lower = ResourceSet::new(single_uniform_layout(), [BindableResource::Buffer(first)])?;
    let upper = ResourceSet::new(single_uniform_layout(), [BindableResource::Buffer(second.clone())])?;

    let mut executor = context.device.executor(&mut ctx, "switch");
    executor.bind_pipeline(&two_slots)?;
    executor.bind_resource_set(0, &lower, &[])?;
    executor.bind_resource_set(1, &upper, &[])?;
    executor.draw(3, 1, 0, 0)?;

    executor.bind_pipeline(&one_slot)?;
    assert_eq!(executor.dirty_slots(), vec![0, 1]);
    executor.draw(3, 1, 0, 0)?;
    assert!(executor.dirty_slots().is_empty(), "No slot may stay dirty across a draw.");

    // Switching back rebinds the slot the smaller pipeline ignored.
    executor.bind_pipeline(&two_slots)?;
    assert_eq!(executor.dirty_slots(), vec![0, 1]);
    executor.context_mut().take_calls();
    executor.draw(3, 1, 0, 0)?;
    let second = second.native()?;
    assert!(executor.context().calls().contains(&StateCall::BindBufferRange {
        target: gl::UNIFORM_BUFFER,
        index: 1,
        buffer: second,
        offset: 0,
        size: 16,
    }));
    assert!(executor.dirty_slots().is_empty());
    Ok(())
}

#[test]
pub fn buffer_ranges_must_stay_inside_their_buffer() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let objects = framework::host_buffer(&context, "objects", 128);

    let err = ResourceSet::new(
        single_uniform_layout(),
        [BindableResource::BufferRange {
            buffer: objects.clone(),
            offset: 96,
            size: 64,
        }],
    )
    .expect_err("The range ends past the buffer.");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::BufferRangeOutOfBounds {
            offset: 96,
            range: 64,
            size: 128,
            ..
        })
    ));
    assert!(is_usage(&err));

    let layout = ResourceLayout::new([
        ResourceLayoutElement::new("objects", ResourceKind::UniformBuffer, vk::ShaderStageFlags::VERTEX).dynamic()
    ]);
    let pipeline = PipelineBuilder::new("dynamic")
        .program(PROGRAM)
        .resource_layout(layout.clone())
        .uniform_block(0, 0, 0, 64)
        .build();
    let set = ResourceSet::new(
        layout,
        [BindableResource::BufferRange {
            buffer: objects,
            offset: 0,
            size: 64,
        }],
    )?;

    let mut executor = context.device.executor(&mut ctx, "dynamic");
    executor.bind_pipeline(&pipeline)?;
    executor.bind_resource_set(0, &set, &[96])?;
    let err = executor.draw(3, 1, 0, 0).expect_err("The dynamic offset moves the range past the buffer.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BufferRangeOutOfBounds { offset: 96, .. })));
    assert_eq!(executor.dirty_slots(), vec![0]);

    executor.bind_resource_set(0, &set, &[64])?;
    executor.draw(3, 1, 0, 0)?;
    drop(executor);
    assert!(!ctx
        .calls()
        .iter()
        .any(|call| matches!(call, StateCall::BindBufferRange { offset: 96, .. })));
    assert_eq!(draws(&ctx), 1);
    Ok(())
}

#[test]
pub fn update_buffer_writes_through_the_copy_target() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let uniforms = framework::host_buffer(&context, "uniforms", 16);

    let mut executor = context.device.executor(&mut ctx, "upload");
    executor.update_buffer(&uniforms, 4, &[1, 2, 3, 4])?;
    let err = executor
        .update_buffer(&uniforms, 14, &[0; 4])
        .expect_err("The write ends past the buffer.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BufferRangeOutOfBounds { .. })));
    let cmd = executor.finish();
    assert_eq!(cmd.resources().len(), 1, "The updated buffer should be referenced by the command buffer.");

    let native = uniforms.native()?;
    assert_eq!(
        ctx.calls(),
        &[
            StateCall::BindBuffer { target: gl::COPY_WRITE_BUFFER, buffer: native },
            StateCall::BufferSubData { target: gl::COPY_WRITE_BUFFER, offset: 4, data: vec![1, 2, 3, 4] },
            StateCall::UnbindBuffer(gl::COPY_WRITE_BUFFER),
        ]
    );
    Ok(())
}

#[test]
pub fn update_index_buffer_restores_the_index_binding() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let indices = context.device.create_buffer(
        "indices",
        BufferDescription {
            size: 64,
            usage: vk::BufferUsageFlags::INDEX_BUFFER,
            memory: MemoryType::CpuToGpu,
        },
    );

    let mut executor = context.device.executor(&mut ctx, "indices");
    executor.set_index_buffer(&indices, vk::IndexType::UINT16, 0)?;
    executor.update_buffer(&indices, 0, &[0, 0, 1, 0, 2, 0])?;
    drop(executor);

    let native = indices.native()?;
    assert_eq!(
        &ctx.calls()[1..],
        &[
            StateCall::BindBuffer { target: gl::ELEMENT_ARRAY_BUFFER, buffer: native },
            StateCall::BufferSubData { target: gl::ELEMENT_ARRAY_BUFFER, offset: 0, data: vec![0, 0, 1, 0, 2, 0] },
            StateCall::UnbindBuffer(gl::ELEMENT_ARRAY_BUFFER),
            StateCall::BindBuffer { target: gl::ELEMENT_ARRAY_BUFFER, buffer: native },
        ]
    );
    Ok(())
}

#[test]
pub fn copy_buffer_binds_both_copy_targets() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let staging = framework::host_buffer(&context, "staging", 64);
    let target = framework::host_buffer(&context, "target", 32);

    let mut executor = context.device.executor(&mut ctx, "copy");
    executor.copy_buffer(&staging, 16, &target, 8, 24)?;
    let err = executor
        .copy_buffer(&staging, 0, &target, 16, 24)
        .expect_err("The destination range ends past the buffer.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BufferRangeOutOfBounds { size: 32, .. })));
    let atlas = texture(&context, "atlas");
    let err = executor
        .copy_buffer(&atlas, 0, &target, 0, 4)
        .expect_err("Textures are not buffers.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotABuffer(name)) if name == "atlas"));
    let cmd = executor.finish();
    assert_eq!(cmd.resources().len(), 2);

    assert_eq!(
        ctx.calls(),
        &[
            StateCall::BindBuffer { target: gl::COPY_READ_BUFFER, buffer: staging.native()? },
            StateCall::BindBuffer { target: gl::COPY_WRITE_BUFFER, buffer: target.native()? },
            StateCall::CopyBufferSubData {
                read_target: gl::COPY_READ_BUFFER,
                write_target: gl::COPY_WRITE_BUFFER,
                read_offset: 16,
                write_offset: 8,
                size: 24,
            },
        ]
    );
    Ok(())
}

#[test]
pub fn clears_are_unsupported() -> Result<()> {
    let context = framework::make_context()?;
    let mut ctx = RecordingContext::new();
    let mut executor = context.device.executor(&mut ctx, "clears");
    let err = executor
        .clear_color_target(0, [0.0, 0.0, 0.0, 1.0])
        .expect_err("Clears are not emulated.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unsupported { operation: "clear_color_target", .. })));
    assert!(executor.clear_depth_stencil(1.0, 0).is_err());
    drop(executor);
    assert!(ctx.calls().is_empty());
    Ok(())
}
