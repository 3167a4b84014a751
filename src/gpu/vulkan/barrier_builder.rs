use ash::vk;
use smallvec::SmallVec;

use super::conversions::{image_layout, subresource_range};
use crate::gpu::driver::command::{BarrierBatch, BufferBarrier, ImageBarrier, MemoryBarrier};
use crate::gpu::driver::types::{Format, QueueOwner, QueueType, VersionedHandle};
use crate::gpu::error::{GPUError, Result};

/// Resolves tracked handles to the native objects a backend created for them.
pub trait ResourceLookup {
    fn image(&self, image: VersionedHandle) -> Option<(vk::Image, Format)>;
    fn buffer(&self, buffer: VersionedHandle) -> Option<vk::Buffer>;
    fn queue_family(&self, queue: QueueType) -> u32;
}

/// Accumulates the native form of one or more [`BarrierBatch`]es and records
/// them with a single `vkCmdPipelineBarrier2`.
pub struct BarrierBuilder<'a, R: ResourceLookup> {
    lookup: &'a R,
    memory: SmallVec<[vk::MemoryBarrier2; 4]>,
    images: SmallVec<[vk::ImageMemoryBarrier2; 8]>,
    buffers: SmallVec<[vk::BufferMemoryBarrier2; 4]>,
}

impl<'a, R: ResourceLookup> BarrierBuilder<'a, R> {
    pub fn new(lookup: &'a R) -> Self {
        Self {
            lookup,
            memory: SmallVec::new(),
            images: SmallVec::new(),
            buffers: SmallVec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.images.is_empty() && self.buffers.is_empty()
    }

    pub fn batch(&mut self, batch: &BarrierBatch) -> Result<()> {
        for barrier in &batch.memory {
            self.memory(barrier);
        }
        for barrier in &batch.buffers {
            self.buffer(barrier)?;
        }
        for barrier in &batch.images {
            self.image(barrier)?;
        }
        Ok(())
    }

    pub fn memory(&mut self, barrier: &MemoryBarrier) {
        self.memory.push(vk::MemoryBarrier2 {
            src_stage_mask: barrier.src.stages.into(),
            src_access_mask: barrier.src.access.into(),
            dst_stage_mask: barrier.dst.stages.into(),
            dst_access_mask: barrier.dst.access.into(),
            ..Default::default()
        });
    }

    pub fn buffer(&mut self, barrier: &BufferBarrier) -> Result<()> {
        let raw = self
            .lookup
            .buffer(barrier.buffer)
            .ok_or_else(|| GPUError::Backend(format!("unknown buffer {:?}", barrier.buffer)))?;
        let (src_family, dst_family) = self.families(barrier.src_queue, barrier.dst_queue);
        self.buffers.push(vk::BufferMemoryBarrier2 {
            src_stage_mask: barrier.src.stages.into(),
            src_access_mask: barrier.src.access.into(),
            dst_stage_mask: barrier.dst.stages.into(),
            dst_access_mask: barrier.dst.access.into(),
            src_queue_family_index: src_family,
            dst_queue_family_index: dst_family,
            buffer: raw,
            offset: barrier.range.offset,
            size: barrier.range.size,
            ..Default::default()
        });
        Ok(())
    }

    pub fn image(&mut self, barrier: &ImageBarrier) -> Result<()> {
        let (raw, format) = self
            .lookup
            .image(barrier.image)
            .ok_or_else(|| GPUError::Backend(format!("unknown image {:?}", barrier.image)))?;
        let (src_family, dst_family) = self.families(barrier.src_queue, barrier.dst_queue);
        self.images.push(vk::ImageMemoryBarrier2 {
            src_stage_mask: barrier.src.stages.into(),
            src_access_mask: barrier.src.access.into(),
            dst_stage_mask: barrier.dst.stages.into(),
            dst_access_mask: barrier.dst.access.into(),
            old_layout: image_layout(barrier.old_layout, false)?,
            new_layout: image_layout(barrier.new_layout, true)?,
            src_queue_family_index: src_family,
            dst_queue_family_index: dst_family,
            image: raw,
            subresource_range: subresource_range(barrier.range, format),
            ..Default::default()
        });
        Ok(())
    }

    fn families(&self, src: QueueOwner, dst: QueueOwner) -> (u32, u32) {
        match (src, dst) {
            (QueueOwner::Exclusive(from), QueueOwner::Exclusive(to)) if from != to => {
                (self.lookup.queue_family(from), self.lookup.queue_family(to))
            }
            _ => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        }
    }

    /// # Safety
    /// `cmd` must be in the recording state on `device`.
    pub unsafe fn emit(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        let deps = vk::DependencyInfo::builder()
            .memory_barriers(&self.memory)
            .image_memory_barriers(&self.images)
            .buffer_memory_barriers(&self.buffers)
            .build();
        device.cmd_pipeline_barrier2(cmd, &deps);
        self.memory.clear();
        self.images.clear();
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::state::AccessScope;
    use crate::gpu::driver::types::{AccessFlags, BufferRange, Layout, StageFlags, SubresourceRange};
    use ash::vk::Handle;

    struct Lookup;

    impl ResourceLookup for Lookup {
        fn image(&self, image: VersionedHandle) -> Option<(vk::Image, Format)> {
            (image.id.0 == 1).then(|| (vk::Image::from_raw(0x10), Format::D24S8))
        }

        fn buffer(&self, buffer: VersionedHandle) -> Option<vk::Buffer> {
            (buffer.id.0 == 2).then(|| vk::Buffer::from_raw(0x20))
        }

        fn queue_family(&self, queue: QueueType) -> u32 {
            queue as u32
        }
    }

    fn scope(stages: StageFlags, access: AccessFlags) -> AccessScope {
        AccessScope::new(stages, access)
    }

    #[test]
    fn depth_image_gets_both_aspects() {
        let mut builder = BarrierBuilder::new(&Lookup);
        builder
            .image(&ImageBarrier {
                image: VersionedHandle::new(1, 0),
                range: SubresourceRange::default(),
                src: scope(StageFlags::TOP_OF_PIPE, AccessFlags::empty()),
                dst: scope(
                    StageFlags::EARLY_FRAGMENT_TESTS,
                    AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ),
                old_layout: Layout::Undefined,
                new_layout: Layout::DepthStencilAttachment,
                src_queue: QueueOwner::Shared,
                dst_queue: QueueOwner::Shared,
            })
            .unwrap();
        let barrier = builder.images[0];
        assert_eq!(
            barrier.subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn ownership_transfer_names_both_families() {
        let mut builder = BarrierBuilder::new(&Lookup);
        builder
            .buffer(&BufferBarrier {
                buffer: VersionedHandle::new(2, 0),
                range: BufferRange::new(0, 256),
                src: scope(StageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE),
                dst: scope(StageFlags::COMPUTE_SHADER, AccessFlags::SHADER_READ),
                src_queue: QueueOwner::Exclusive(QueueType::Transfer),
                dst_queue: QueueOwner::Exclusive(QueueType::Compute),
            })
            .unwrap();
        let barrier = builder.buffers[0];
        assert_eq!(barrier.src_queue_family_index, QueueType::Transfer as u32);
        assert_eq!(barrier.dst_queue_family_index, QueueType::Compute as u32);
    }

    #[test]
    fn unknown_handles_are_reported() {
        let mut builder = BarrierBuilder::new(&Lookup);
        let err = builder.buffer(&BufferBarrier {
            buffer: VersionedHandle::new(9, 0),
            range: BufferRange::new(0, 4),
            src: scope(StageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE),
            dst: scope(StageFlags::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ),
            src_queue: QueueOwner::Shared,
            dst_queue: QueueOwner::Shared,
        });
        assert!(err.is_err());
        assert!(builder.is_empty());
    }
}
