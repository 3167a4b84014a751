use ash::vk;

use crate::gpu::driver::types::{AccessFlags, Format, IndexType, Layout, StageFlags, SubresourceRange};
use crate::gpu::error::{GPUError, Result};
use crate::gpu::shader::{DescriptorType, ShaderStageFlags};
use crate::gpu::structs::*;

impl From<Filter> for vk::Filter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl From<BlendFactor> for vk::BlendFactor {
    fn from(op: BlendFactor) -> Self {
        match op {
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::InvDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::BlendFactor => vk::BlendFactor::CONSTANT_ALPHA,
        }
    }
}

impl From<BlendOp> for vk::BlendOp {
    fn from(op: BlendOp) -> Self {
        match op {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::InvSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

impl From<WriteMask> for vk::ColorComponentFlags {
    fn from(mask: WriteMask) -> Self {
        let mut flags = vk::ColorComponentFlags::empty();
        if mask.r {
            flags |= vk::ColorComponentFlags::R;
        }
        if mask.g {
            flags |= vk::ColorComponentFlags::G;
        }
        if mask.b {
            flags |= vk::ColorComponentFlags::B;
        }
        if mask.a {
            flags |= vk::ColorComponentFlags::A;
        }
        flags
    }
}

impl From<ColorBlendState> for vk::PipelineColorBlendAttachmentState {
    fn from(state: ColorBlendState) -> Self {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(state.write_mask.into())
            .src_color_blend_factor(state.src_blend.into())
            .dst_color_blend_factor(state.dst_blend.into())
            .src_alpha_blend_factor(state.src_alpha_blend.into())
            .dst_alpha_blend_factor(state.dst_alpha_blend.into())
            .color_blend_op(state.blend_op.into())
            .alpha_blend_op(state.alpha_blend_op.into())
            .blend_enable(state.enable)
            .build()
    }
}

impl From<LoadOp> for vk::AttachmentLoadOp {
    fn from(op: LoadOp) -> Self {
        match op {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl From<StoreOp> for vk::AttachmentStoreOp {
    fn from(op: StoreOp) -> Self {
        match op {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

impl From<SampleCount> for vk::SampleCountFlags {
    fn from(samples: SampleCount) -> Self {
        match samples {
            SampleCount::S1 => vk::SampleCountFlags::TYPE_1,
            SampleCount::S2 => vk::SampleCountFlags::TYPE_2,
            SampleCount::S4 => vk::SampleCountFlags::TYPE_4,
            SampleCount::S8 => vk::SampleCountFlags::TYPE_8,
        }
    }
}

impl From<Topology> for vk::PrimitiveTopology {
    fn from(topology: Topology) -> Self {
        match topology {
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Topology::PatchList => vk::PrimitiveTopology::PATCH_LIST,
        }
    }
}

impl From<CullMode> for vk::CullModeFlags {
    fn from(mode: CullMode) -> Self {
        match mode {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Back => vk::CullModeFlags::BACK,
            CullMode::Front => vk::CullModeFlags::FRONT,
        }
    }
}

impl From<VertexOrdering> for vk::FrontFace {
    fn from(ordering: VertexOrdering) -> Self {
        match ordering {
            VertexOrdering::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            VertexOrdering::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

impl From<PolygonMode> for vk::PolygonMode {
    fn from(mode: PolygonMode) -> Self {
        match mode {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
            PolygonMode::Point => vk::PolygonMode::POINT,
        }
    }
}

impl From<CompareOp> for vk::CompareOp {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl From<StencilOp> for vk::StencilOp {
    fn from(op: StencilOp) -> Self {
        match op {
            StencilOp::Keep => vk::StencilOp::KEEP,
            StencilOp::Zero => vk::StencilOp::ZERO,
            StencilOp::Replace => vk::StencilOp::REPLACE,
            StencilOp::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
            StencilOp::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
            StencilOp::Invert => vk::StencilOp::INVERT,
            StencilOp::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
            StencilOp::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

impl From<VertexRate> for vk::VertexInputRate {
    fn from(rate: VertexRate) -> Self {
        match rate {
            VertexRate::Vertex => vk::VertexInputRate::VERTEX,
            VertexRate::Instance => vk::VertexInputRate::INSTANCE,
        }
    }
}

impl From<Format> for vk::Format {
    fn from(format: Format) -> Self {
        match format {
            Format::Unknown => vk::Format::UNDEFINED,
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::R8Uint => vk::Format::R8_UINT,
            Format::R8Sint => vk::Format::R8_SINT,
            Format::RG8Unorm => vk::Format::R8G8_UNORM,
            Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::RGBA8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::BGRA8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::R16Float => vk::Format::R16_SFLOAT,
            Format::RGBA16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::R32Uint => vk::Format::R32_UINT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::RG32Float => vk::Format::R32G32_SFLOAT,
            Format::RGB32Float => vk::Format::R32G32B32_SFLOAT,
            Format::RGBA32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::RGBA32Uint => vk::Format::R32G32B32A32_UINT,
            Format::D16 => vk::Format::D16_UNORM,
            Format::D32 => vk::Format::D32_SFLOAT,
            Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
            Format::D32S8 => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }
}

impl From<IndexType> for vk::IndexType {
    fn from(ty: IndexType) -> Self {
        match ty {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

impl From<DescriptorType> for vk::DescriptorType {
    fn from(ty: DescriptorType) -> Self {
        match ty {
            DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
            DescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorType::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

impl From<Rect2D> for vk::Rect2D {
    fn from(rect: Rect2D) -> Self {
        vk::Rect2D {
            offset: vk::Offset2D { x: rect.x, y: rect.y },
            extent: vk::Extent2D {
                width: rect.w,
                height: rect.h,
            },
        }
    }
}

impl From<Viewport> for vk::Viewport {
    fn from(viewport: Viewport) -> Self {
        vk::Viewport {
            x: viewport.area.x,
            y: viewport.area.y,
            width: viewport.area.w,
            height: viewport.area.h,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        }
    }
}

impl From<ClearValue> for vk::ClearValue {
    fn from(value: ClearValue) -> Self {
        match value {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::IntColor(int32) => vk::ClearValue {
                color: vk::ClearColorValue { int32 },
            },
            ClearValue::UintColor(uint32) => vk::ClearValue {
                color: vk::ClearColorValue { uint32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

impl From<ShaderStageFlags> for vk::ShaderStageFlags {
    fn from(stages: ShaderStageFlags) -> Self {
        const MAP: [(ShaderStageFlags, vk::ShaderStageFlags); 14] = [
            (ShaderStageFlags::VERTEX, vk::ShaderStageFlags::VERTEX),
            (ShaderStageFlags::TESS_CONTROL, vk::ShaderStageFlags::TESSELLATION_CONTROL),
            (ShaderStageFlags::TESS_EVAL, vk::ShaderStageFlags::TESSELLATION_EVALUATION),
            (ShaderStageFlags::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
            (ShaderStageFlags::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
            (ShaderStageFlags::TASK, vk::ShaderStageFlags::TASK_NV),
            (ShaderStageFlags::MESH, vk::ShaderStageFlags::MESH_NV),
            (ShaderStageFlags::COMPUTE, vk::ShaderStageFlags::COMPUTE),
            (ShaderStageFlags::RAYGEN, vk::ShaderStageFlags::RAYGEN_KHR),
            (ShaderStageFlags::MISS, vk::ShaderStageFlags::MISS_KHR),
            (ShaderStageFlags::CLOSEST_HIT, vk::ShaderStageFlags::CLOSEST_HIT_KHR),
            (ShaderStageFlags::ANY_HIT, vk::ShaderStageFlags::ANY_HIT_KHR),
            (ShaderStageFlags::INTERSECTION, vk::ShaderStageFlags::INTERSECTION_KHR),
            (ShaderStageFlags::CALLABLE, vk::ShaderStageFlags::CALLABLE_KHR),
        ];
        MAP.iter()
            .filter(|(ours, _)| stages.contains(*ours))
            .fold(vk::ShaderStageFlags::empty(), |acc, (_, vk)| acc | *vk)
    }
}

impl From<StageFlags> for vk::PipelineStageFlags2 {
    fn from(stages: StageFlags) -> Self {
        const MAP: [(StageFlags, vk::PipelineStageFlags2); 16] = [
            (StageFlags::TOP_OF_PIPE, vk::PipelineStageFlags2::TOP_OF_PIPE),
            (StageFlags::DRAW_INDIRECT, vk::PipelineStageFlags2::DRAW_INDIRECT),
            (StageFlags::VERTEX_INPUT, vk::PipelineStageFlags2::VERTEX_INPUT),
            (StageFlags::VERTEX_SHADER, vk::PipelineStageFlags2::VERTEX_SHADER),
            (StageFlags::TASK_SHADER, vk::PipelineStageFlags2::TASK_SHADER_NV),
            (StageFlags::MESH_SHADER, vk::PipelineStageFlags2::MESH_SHADER_NV),
            (StageFlags::FRAGMENT_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
            (StageFlags::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS),
            (StageFlags::LATE_FRAGMENT_TESTS, vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS),
            (StageFlags::COLOR_ATTACHMENT_OUTPUT, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
            (StageFlags::COMPUTE_SHADER, vk::PipelineStageFlags2::COMPUTE_SHADER),
            (StageFlags::RAY_TRACING_SHADER, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR),
            (StageFlags::TRANSFER, vk::PipelineStageFlags2::TRANSFER),
            (StageFlags::HOST, vk::PipelineStageFlags2::HOST),
            (StageFlags::BOTTOM_OF_PIPE, vk::PipelineStageFlags2::BOTTOM_OF_PIPE),
            (StageFlags::ALL_COMMANDS, vk::PipelineStageFlags2::ALL_COMMANDS),
        ];
        MAP.iter()
            .filter(|(ours, _)| stages.contains(*ours))
            .fold(vk::PipelineStageFlags2::NONE, |acc, (_, vk)| acc | *vk)
    }
}

impl From<AccessFlags> for vk::AccessFlags2 {
    fn from(access: AccessFlags) -> Self {
        const MAP: [(AccessFlags, vk::AccessFlags2); 15] = [
            (AccessFlags::INDIRECT_COMMAND_READ, vk::AccessFlags2::INDIRECT_COMMAND_READ),
            (AccessFlags::INDEX_READ, vk::AccessFlags2::INDEX_READ),
            (AccessFlags::VERTEX_ATTRIBUTE_READ, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ),
            (AccessFlags::UNIFORM_READ, vk::AccessFlags2::UNIFORM_READ),
            (AccessFlags::SHADER_READ, vk::AccessFlags2::SHADER_READ),
            (AccessFlags::SHADER_WRITE, vk::AccessFlags2::SHADER_WRITE),
            (AccessFlags::COLOR_ATTACHMENT_READ, vk::AccessFlags2::COLOR_ATTACHMENT_READ),
            (AccessFlags::COLOR_ATTACHMENT_WRITE, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
            (
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            ),
            (
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            (AccessFlags::TRANSFER_READ, vk::AccessFlags2::TRANSFER_READ),
            (AccessFlags::TRANSFER_WRITE, vk::AccessFlags2::TRANSFER_WRITE),
            (AccessFlags::HOST_READ, vk::AccessFlags2::HOST_READ),
            (AccessFlags::HOST_WRITE, vk::AccessFlags2::HOST_WRITE),
            (
                AccessFlags::ACCELERATION_STRUCTURE_READ,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
            ),
        ];
        MAP.iter()
            .filter(|(ours, _)| access.contains(*ours))
            .fold(vk::AccessFlags2::NONE, |acc, (_, vk)| acc | *vk)
    }
}

/// Native layout for an image transition. `Undefined` is only valid as the
/// old layout.
pub fn image_layout(layout: Layout, is_new: bool) -> Result<vk::ImageLayout> {
    Ok(match layout {
        Layout::Undefined if is_new => return Err(GPUError::UnsupportedTransition(layout)),
        Layout::Undefined => vk::ImageLayout::UNDEFINED,
        Layout::General => vk::ImageLayout::GENERAL,
        Layout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        Layout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        Layout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        Layout::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        Layout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        Layout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        Layout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    })
}

pub fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn subresource_range(range: SubresourceRange, format: Format) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(format),
        base_mip_level: range.base_mip,
        level_count: range.level_count,
        base_array_layer: range.base_layer,
        layer_count: range.layer_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_access_bits_translate() {
        let stages: vk::PipelineStageFlags2 =
            (StageFlags::COMPUTE_SHADER | StageFlags::TRANSFER).into();
        assert_eq!(
            stages,
            vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER
        );
        let access: vk::AccessFlags2 = AccessFlags::SHADER_WRITE.into();
        assert_eq!(access, vk::AccessFlags2::SHADER_WRITE);
    }

    #[test]
    fn undefined_is_not_a_destination() {
        assert!(image_layout(Layout::Undefined, false).is_ok());
        assert!(matches!(
            image_layout(Layout::Undefined, true),
            Err(GPUError::UnsupportedTransition(Layout::Undefined))
        ));
    }
}
