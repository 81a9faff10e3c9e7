use anyhow::Result;

use deimos::{Error, ErrorKind, MapMode, MemoryType, TextureDescription, vk};

mod framework;

fn host_texture(mip_levels: u32, array_layers: u32, memory: MemoryType) -> TextureDescription {
    TextureDescription {
        width: 8,
        height: 4,
        depth: 1,
        mip_levels,
        array_layers,
        format: vk::Format::R8G8B8A8_UNORM,
        usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
        memory,
    }
}

#[test]
pub fn buffer_writes_reach_storage() -> Result<()> {
    let context = framework::make_context()?;
    let buffer = framework::host_buffer(&context, "staging", 16);

    {
        let mut view = context.device.map(&buffer, MapMode::Write, 0)?;
        assert_eq!(view.size(), 16);
        assert_eq!(view.row_pitch(), 16);
        view.as_mut_slice()?.copy_from_slice(&[7u8; 16]);
    }

    let native = buffer.native()?;
    assert_eq!(context.backend.read(native), Some(vec![7u8; 16]));

    let view = context.device.map(&buffer, MapMode::Read, 0)?;
    assert!(view.as_slice().iter().all(|byte| *byte == 7));
    Ok(())
}

#[test]
pub fn texture_subresources_are_tightly_packed() -> Result<()> {
    let context = framework::make_context()?;
    let texture = context
        .device
        .create_texture("atlas", host_texture(2, 2, MemoryType::CpuToGpu));

    // Layer 1, mip 1: past the first layer's 128 + 32 bytes.
    let mut view = context.device.map(&texture, MapMode::ReadWrite, 3)?;
    assert_eq!(view.subresource(), 3);
    assert_eq!(view.size(), 32);
    assert_eq!(view.row_pitch(), 16);
    assert_eq!(view.depth_pitch(), 32);
    view.as_mut_slice()?.fill(0xab);
    drop(view);

    let contents = context
        .backend
        .read(texture.native()?)
        .expect("Texture storage should exist once mapped.");
    assert_eq!(contents.len(), 320);
    assert!(contents[..288].iter().all(|byte| *byte == 0));
    assert!(contents[288..].iter().all(|byte| *byte == 0xab));
    Ok(())
}

#[test]
pub fn gpu_only_resources_are_unmappable() -> Result<()> {
    let context = framework::make_context()?;
    let texture = context
        .device
        .create_texture("render target", host_texture(1, 1, MemoryType::GpuOnly));
    let err = context
        .device
        .map(&texture, MapMode::Read, 0)
        .expect_err("GPU-only memory cannot be mapped.");
    let err = err.downcast_ref::<Error>().expect("Should be a deimos error.");
    assert!(matches!(err, Error::Unmappable(name) if name == "render target"));
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(!texture.is_realized(), "A failed map should not allocate.");
    Ok(())
}

#[test]
pub fn out_of_range_subresource_is_rejected() -> Result<()> {
    let context = framework::make_context()?;
    let texture = context
        .device
        .create_texture("atlas", host_texture(2, 1, MemoryType::CpuToGpu));
    let err = context
        .device
        .map(&texture, MapMode::Read, 2)
        .expect_err("Only two subresources exist.");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::InvalidSubresource { subresource: 2, .. })
    ));

    let buffer = framework::host_buffer(&context, "buffer", 16);
    assert!(context.device.map(&buffer, MapMode::Read, 1).is_err(), "Buffers only have one subresource.");
    Ok(())
}

#[test]
pub fn read_mapping_refuses_writes() -> Result<()> {
    let context = framework::make_context()?;
    let buffer = framework::host_buffer(&context, "readback", 16);
    let mut view = context.device.map(&buffer, MapMode::Read, 0)?;
    let err = view.as_mut_slice().expect_err("Read mappings are not writable.");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ReadOnlyMapping(_))));
    Ok(())
}

#[test]
pub fn mapping_keeps_resource_alive() -> Result<()> {
    let context = framework::make_context()?;
    let buffer = framework::host_buffer(&context, "mapped", 16);
    let view = context.device.map(&buffer, MapMode::Read, 0)?;
    assert_eq!(buffer.lifetime().ref_count(), 1);

    assert!(!context.device.request_disposal(&buffer)?, "Disposal must wait for the mapping.");
    assert_eq!(context.device.flush_disposals()?, 0);

    drop(view);
    assert_eq!(context.device.flush_disposals()?, 1);
    assert_eq!(context.backend.live_resources(), 0);
    Ok(())
}

#[test]
pub fn writable_mappings_are_exclusive() -> Result<()> {
    let context = framework::make_context()?;
    let buffer = framework::host_buffer(&context, "shared", 16);

    let writer = context.device.map(&buffer, MapMode::Write, 0)?;
    let err = context
        .device
        .map(&buffer, MapMode::Write, 0)
        .expect_err("A second writable view would alias the first.");
    let err = err.downcast_ref::<Error>().expect("Should be a deimos error.");
    assert!(matches!(err, Error::AlreadyMapped { name, subresource: 0 } if name == "shared"));
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(context.device.map(&buffer, MapMode::Read, 0).is_err(), "Readers must wait for the writer.");
    assert_eq!(buffer.lifetime().ref_count(), 1, "Rejected mappings hold no reference.");

    drop(writer);
    assert!(!buffer.mappings().is_mapped(0));
    let first = context.device.map(&buffer, MapMode::Read, 0)?;
    let second = context.device.map(&buffer, MapMode::Read, 0)?;
    assert!(context.device.map(&buffer, MapMode::ReadWrite, 0).is_err());
    assert_eq!(first.as_slice(), second.as_slice());
    drop((first, second));
    context.device.map(&buffer, MapMode::ReadWrite, 0)?;
    Ok(())
}

#[test]
pub fn texture_subresources_map_independently() -> Result<()> {
    let context = framework::make_context()?;
    let texture = context
        .device
        .create_texture("atlas", host_texture(2, 1, MemoryType::CpuToGpu));
    let mut base = context.device.map(&texture, MapMode::Write, 0)?;
    let mut mip = context.device.map(&texture, MapMode::Write, 1)?;
    base.as_mut_slice()?.fill(1);
    mip.as_mut_slice()?.fill(2);
    assert!(context.device.map(&texture, MapMode::Read, 1).is_err());
    Ok(())
}

#[test]
pub fn long_mip_chains_map() -> Result<()> {
    let context = framework::make_context()?;
    let texture = context.device.create_texture(
        "tall",
        TextureDescription {
            width: 1,
            height: 1,
            ..host_texture(34, 1, MemoryType::CpuToGpu)
        },
    );
    let view = context.device.map(&texture, MapMode::Read, 33)?;
    assert_eq!(view.size(), 4);
    assert_eq!(view.row_pitch(), 4);
    Ok(())
}
