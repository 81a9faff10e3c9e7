//! Size and component information of [`vk::Format`]s.

use std::mem::size_of;

use ash::vk;

pub trait ByteSize {
    /// Size of one element in bytes, or `None` for formats without a fixed element size.
    fn byte_size(&self) -> Option<usize>;
}

impl ByteSize for vk::Format {
    fn byte_size(&self) -> Option<usize> {
        let size = match *self {
            vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT | vk::Format::R8_SINT => 1,
            vk::Format::R8G8_UNORM | vk::Format::R8G8_SNORM | vk::Format::R8G8_UINT | vk::Format::R8G8_SINT => 2,
            vk::Format::R8G8B8_UNORM => 3,
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SNORM
            | vk::Format::R8G8B8A8_UINT
            | vk::Format::R8G8B8A8_SINT
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB => 4,
            vk::Format::R16_UNORM | vk::Format::R16_SNORM | vk::Format::R16_UINT | vk::Format::R16_SINT | vk::Format::R16_SFLOAT => 2,
            vk::Format::R16G16_UNORM | vk::Format::R16G16_SNORM | vk::Format::R16G16_UINT | vk::Format::R16G16_SINT | vk::Format::R16G16_SFLOAT => 4,
            vk::Format::R16G16B16A16_UNORM
            | vk::Format::R16G16B16A16_SNORM
            | vk::Format::R16G16B16A16_UINT
            | vk::Format::R16G16B16A16_SINT
            | vk::Format::R16G16B16A16_SFLOAT => 8,
            vk::Format::R32_UINT | vk::Format::R32_SINT | vk::Format::R32_SFLOAT => size_of::<f32>(),
            vk::Format::R32G32_UINT | vk::Format::R32G32_SINT | vk::Format::R32G32_SFLOAT => 2 * size_of::<f32>(),
            vk::Format::R32G32B32_UINT | vk::Format::R32G32B32_SINT | vk::Format::R32G32B32_SFLOAT => 3 * size_of::<f32>(),
            vk::Format::R32G32B32A32_UINT | vk::Format::R32G32B32A32_SINT | vk::Format::R32G32B32A32_SFLOAT => 4 * size_of::<f32>(),
            vk::Format::A2B10G10R10_UNORM_PACK32 | vk::Format::B10G11R11_UFLOAT_PACK32 => 4,
            vk::Format::D16_UNORM => 2,
            vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT | vk::Format::X8_D24_UNORM_PACK32 => 4,
            vk::Format::D32_SFLOAT_S8_UINT => 8,
            _ => return None,
        };
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(vk::Format::R8G8B8A8_UNORM.byte_size(), Some(4));
        assert_eq!(vk::Format::R32G32B32_SFLOAT.byte_size(), Some(12));
        assert_eq!(vk::Format::R16G16_SINT.byte_size(), Some(4));
        assert_eq!(vk::Format::BC1_RGB_UNORM_BLOCK.byte_size(), None);
    }
}
