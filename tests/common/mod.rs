#![allow(dead_code)]

use std::sync::Arc;

use keel::gpu::driver::types::{Buffer, Format, Image, VersionedHandle};
use keel::gpu::null::{NullDevice, RecordedCommand, RecordingSink};
use keel::gpu::resources::{BufferResource, BufferUsage, TextureResource, TextureUsage};
use keel::gpu::shader::{DescriptorType, SetLayout, Shader, ShaderBinding, ShaderStageFlags};
use keel::gpu::{DeviceContext, EncoderConfig};
use keel::Handle;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context() -> DeviceContext<NullDevice> {
    init_logging();
    DeviceContext::create(NullDevice::new(), EncoderConfig::default())
}

pub fn context_with(config: EncoderConfig) -> DeviceContext<NullDevice> {
    init_logging();
    DeviceContext::create(NullDevice::new(), config)
}

pub fn color_target(id: u64) -> TextureResource {
    TextureResource::new(
        VersionedHandle::new(id, 0),
        Handle::<Image>::new(id as u32, 1),
        Format::RGBA8Unorm,
        [128, 128, 1],
        TextureUsage::COLOR_TARGET | TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
    )
}

pub fn depth_target(id: u64) -> TextureResource {
    TextureResource::new(
        VersionedHandle::new(id, 0),
        Handle::<Image>::new(id as u32, 1),
        Format::D32,
        [128, 128, 1],
        TextureUsage::DEPTH_TARGET,
    )
}

pub fn texture(id: u64, extent: [u32; 2]) -> TextureResource {
    TextureResource::new(
        VersionedHandle::new(id, 0),
        Handle::<Image>::new(id as u32, 1),
        Format::RGBA8Srgb,
        [extent[0], extent[1], 1],
        TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST | TextureUsage::TRANSFER_SRC,
    )
}

pub fn buffer(id: u64, size: u64, usage: BufferUsage) -> BufferResource {
    BufferResource::new(
        VersionedHandle::new(id, 0),
        Handle::<Buffer>::new(id as u32, 1),
        size,
        usage,
    )
}

/// Vertex/fragment shader sampling `albedo` from set 0.
pub fn textured_shader(id: u64) -> Arc<Shader> {
    Arc::new(
        Shader::new(
            VersionedHandle::new(id, 0),
            "textured",
            ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
        )
        .unwrap()
        .with_sets(vec![SetLayout {
            layout_id: 0x10,
            bindings: vec![ShaderBinding::new(
                "albedo",
                0,
                DescriptorType::SampledImage,
                ShaderStageFlags::FRAGMENT,
            )],
        }])
        .unwrap(),
    )
}

/// Compute shader writing the `particles` storage buffer.
pub fn particle_shader(id: u64) -> Arc<Shader> {
    Arc::new(
        Shader::new(VersionedHandle::new(id, 0), "particles", ShaderStageFlags::COMPUTE)
            .unwrap()
            .with_group_size([64, 1, 1])
            .with_sets(vec![SetLayout {
                layout_id: 0x20,
                bindings: vec![ShaderBinding::new(
                    "particles",
                    0,
                    DescriptorType::StorageBuffer,
                    ShaderStageFlags::COMPUTE,
                )
                .writable()],
            }])
            .unwrap(),
    )
}

pub fn is_begin(cmd: &RecordedCommand) -> bool {
    matches!(cmd, RecordedCommand::BeginRendering(_))
}

pub fn is_end(cmd: &RecordedCommand) -> bool {
    matches!(cmd, RecordedCommand::EndRendering)
}

pub fn is_barrier(cmd: &RecordedCommand) -> bool {
    matches!(cmd, RecordedCommand::PipelineBarrier(_))
}

pub fn is_bind_pipeline(cmd: &RecordedCommand) -> bool {
    matches!(cmd, RecordedCommand::BindPipeline(_))
}

pub fn passes(sink: &RecordingSink) -> usize {
    sink.count(is_begin)
}
