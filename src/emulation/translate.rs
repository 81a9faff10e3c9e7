//! Translation of abstract descriptor enumerations to GL enumerations.
//!
//! Every function returns `None` for values the emulated backend has no equivalent for.

use ash::vk;

use crate::emulation::gl;

/// How a vertex format is fed to the vertex attribute pointer calls.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribFormat {
    /// Component count.
    pub size: u32,
    pub ty: u32,
    pub normalized: bool,
    /// Integer formats without normalization use the integer attribute path.
    pub integer: bool,
}

pub fn blend_factor(factor: vk::BlendFactor) -> Option<u32> {
    Some(match factor {
        vk::BlendFactor::ZERO => gl::ZERO,
        vk::BlendFactor::ONE => gl::ONE,
        vk::BlendFactor::SRC_COLOR => gl::SRC_COLOR,
        vk::BlendFactor::ONE_MINUS_SRC_COLOR => gl::ONE_MINUS_SRC_COLOR,
        vk::BlendFactor::DST_COLOR => gl::DST_COLOR,
        vk::BlendFactor::ONE_MINUS_DST_COLOR => gl::ONE_MINUS_DST_COLOR,
        vk::BlendFactor::SRC_ALPHA => gl::SRC_ALPHA,
        vk::BlendFactor::ONE_MINUS_SRC_ALPHA => gl::ONE_MINUS_SRC_ALPHA,
        vk::BlendFactor::DST_ALPHA => gl::DST_ALPHA,
        vk::BlendFactor::ONE_MINUS_DST_ALPHA => gl::ONE_MINUS_DST_ALPHA,
        vk::BlendFactor::CONSTANT_COLOR => gl::CONSTANT_COLOR,
        vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR => gl::ONE_MINUS_CONSTANT_COLOR,
        vk::BlendFactor::CONSTANT_ALPHA => gl::CONSTANT_ALPHA,
        vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA => gl::ONE_MINUS_CONSTANT_ALPHA,
        vk::BlendFactor::SRC_ALPHA_SATURATE => gl::SRC_ALPHA_SATURATE,
        _ => return None,
    })
}

pub fn blend_op(op: vk::BlendOp) -> Option<u32> {
    Some(match op {
        vk::BlendOp::ADD => gl::FUNC_ADD,
        vk::BlendOp::SUBTRACT => gl::FUNC_SUBTRACT,
        vk::BlendOp::REVERSE_SUBTRACT => gl::FUNC_REVERSE_SUBTRACT,
        vk::BlendOp::MIN => gl::MIN,
        vk::BlendOp::MAX => gl::MAX,
        _ => return None,
    })
}

pub fn compare_op(op: vk::CompareOp) -> Option<u32> {
    Some(match op {
        vk::CompareOp::NEVER => gl::NEVER,
        vk::CompareOp::LESS => gl::LESS,
        vk::CompareOp::EQUAL => gl::EQUAL,
        vk::CompareOp::LESS_OR_EQUAL => gl::LEQUAL,
        vk::CompareOp::GREATER => gl::GREATER,
        vk::CompareOp::NOT_EQUAL => gl::NOTEQUAL,
        vk::CompareOp::GREATER_OR_EQUAL => gl::GEQUAL,
        vk::CompareOp::ALWAYS => gl::ALWAYS,
        _ => return None,
    })
}

/// Culled face. `None` for [`vk::CullModeFlags::NONE`], which disables culling instead.
pub fn cull_face(mode: vk::CullModeFlags) -> Option<u32> {
    match mode {
        vk::CullModeFlags::FRONT => Some(gl::FRONT),
        vk::CullModeFlags::BACK => Some(gl::BACK),
        vk::CullModeFlags::FRONT_AND_BACK => Some(gl::FRONT_AND_BACK),
        _ => None,
    }
}

pub fn front_face(face: vk::FrontFace) -> Option<u32> {
    match face {
        vk::FrontFace::CLOCKWISE => Some(gl::CW),
        vk::FrontFace::COUNTER_CLOCKWISE => Some(gl::CCW),
        _ => None,
    }
}

pub fn primitive_topology(topology: vk::PrimitiveTopology) -> Option<u32> {
    Some(match topology {
        vk::PrimitiveTopology::POINT_LIST => gl::POINTS,
        vk::PrimitiveTopology::LINE_LIST => gl::LINES,
        vk::PrimitiveTopology::LINE_STRIP => gl::LINE_STRIP,
        vk::PrimitiveTopology::TRIANGLE_LIST => gl::TRIANGLES,
        vk::PrimitiveTopology::TRIANGLE_STRIP => gl::TRIANGLE_STRIP,
        vk::PrimitiveTopology::TRIANGLE_FAN => gl::TRIANGLE_FAN,
        _ => return None,
    })
}

/// Index element type and its size in bytes.
pub fn index_type(ty: vk::IndexType) -> Option<(u32, u64)> {
    match ty {
        vk::IndexType::UINT16 => Some((gl::UNSIGNED_SHORT, 2)),
        vk::IndexType::UINT32 => Some((gl::UNSIGNED_INT, 4)),
        _ => None,
    }
}

pub fn vertex_attrib(format: vk::Format) -> Option<VertexAttribFormat> {
    let (size, ty, normalized, integer) = match format {
        vk::Format::R32_SFLOAT => (1, gl::FLOAT, false, false),
        vk::Format::R32G32_SFLOAT => (2, gl::FLOAT, false, false),
        vk::Format::R32G32B32_SFLOAT => (3, gl::FLOAT, false, false),
        vk::Format::R32G32B32A32_SFLOAT => (4, gl::FLOAT, false, false),
        vk::Format::R16G16_SFLOAT => (2, gl::HALF_FLOAT, false, false),
        vk::Format::R16G16B16A16_SFLOAT => (4, gl::HALF_FLOAT, false, false),
        vk::Format::R32_UINT => (1, gl::UNSIGNED_INT, false, true),
        vk::Format::R32G32_UINT => (2, gl::UNSIGNED_INT, false, true),
        vk::Format::R32G32B32_UINT => (3, gl::UNSIGNED_INT, false, true),
        vk::Format::R32G32B32A32_UINT => (4, gl::UNSIGNED_INT, false, true),
        vk::Format::R32_SINT => (1, gl::INT, false, true),
        vk::Format::R32G32_SINT => (2, gl::INT, false, true),
        vk::Format::R32G32B32_SINT => (3, gl::INT, false, true),
        vk::Format::R32G32B32A32_SINT => (4, gl::INT, false, true),
        vk::Format::R16G16_UNORM => (2, gl::UNSIGNED_SHORT, true, true),
        vk::Format::R16G16B16A16_UNORM => (4, gl::UNSIGNED_SHORT, true, true),
        vk::Format::R16G16_SNORM => (2, gl::SHORT, true, true),
        vk::Format::R16G16B16A16_SNORM => (4, gl::SHORT, true, true),
        vk::Format::R16G16_UINT => (2, gl::UNSIGNED_SHORT, false, true),
        vk::Format::R16G16B16A16_UINT => (4, gl::UNSIGNED_SHORT, false, true),
        vk::Format::R16G16_SINT => (2, gl::SHORT, false, true),
        vk::Format::R16G16B16A16_SINT => (4, gl::SHORT, false, true),
        vk::Format::R8G8_UNORM => (2, gl::UNSIGNED_BYTE, true, true),
        vk::Format::R8G8B8A8_UNORM => (4, gl::UNSIGNED_BYTE, true, true),
        vk::Format::R8G8_SNORM => (2, gl::BYTE, true, true),
        vk::Format::R8G8B8A8_SNORM => (4, gl::BYTE, true, true),
        vk::Format::R8G8_UINT => (2, gl::UNSIGNED_BYTE, false, true),
        vk::Format::R8G8B8A8_UINT => (4, gl::UNSIGNED_BYTE, false, true),
        vk::Format::R8G8_SINT => (2, gl::BYTE, false, true),
        vk::Format::R8G8B8A8_SINT => (4, gl::BYTE, false, true),
        vk::Format::A2B10G10R10_UNORM_PACK32 => (4, gl::UNSIGNED_INT_2_10_10_10_REV, true, true),
        _ => return None,
    };
    Some(VertexAttribFormat {
        size,
        ty,
        normalized,
        integer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_formats_take_the_integer_path_only_when_unnormalized() {
        let uint = vertex_attrib(vk::Format::R32G32_UINT).unwrap();
        assert!(uint.integer && !uint.normalized);
        let unorm = vertex_attrib(vk::Format::R8G8B8A8_UNORM).unwrap();
        assert!(unorm.integer && unorm.normalized);
        let float = vertex_attrib(vk::Format::R32G32B32_SFLOAT).unwrap();
        assert_eq!((float.size, float.ty, float.integer), (3, gl::FLOAT, false));
    }

    #[test]
    fn unknown_values() {
        assert_eq!(cull_face(vk::CullModeFlags::NONE), None);
        assert_eq!(primitive_topology(vk::PrimitiveTopology::PATCH_LIST), None);
        assert_eq!(index_type(vk::IndexType::NONE_KHR), None);
        assert_eq!(compare_op(vk::CompareOp::LESS_OR_EQUAL), Some(gl::LEQUAL));
    }
}
