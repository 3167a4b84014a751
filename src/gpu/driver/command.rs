use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;

use crate::gpu::shader::{PipelineKind, ShaderStageFlags};
use crate::gpu::structs::{ClearValue, Filter, LoadOp, Rect2D, StoreOp, Viewport};

use super::state::AccessScope;
use super::types::{
    Buffer, BufferRange, DescriptorSet, Format, Handle, Image, IndexType, Layout, Pipeline,
    QueueOwner, StageFlags, SubresourceRange, VersionedHandle,
};

//===----------------------------------------------------------------------===//
// Barriers
//===----------------------------------------------------------------------===//

/// Global memory dependency; used for buffers that stay on one queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MemoryBarrier {
    pub src: AccessScope,
    pub dst: AccessScope,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferBarrier {
    pub buffer: VersionedHandle,
    pub range: BufferRange,
    pub src: AccessScope,
    pub dst: AccessScope,
    pub src_queue: QueueOwner,
    pub dst_queue: QueueOwner,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ImageBarrier {
    pub image: VersionedHandle,
    pub range: SubresourceRange,
    pub src: AccessScope,
    pub dst: AccessScope,
    pub old_layout: Layout,
    pub new_layout: Layout,
    pub src_queue: QueueOwner,
    pub dst_queue: QueueOwner,
}

impl ImageBarrier {
    fn same_transition(&self, other: &ImageBarrier) -> bool {
        self.image == other.image
            && self.src == other.src
            && self.dst == other.dst
            && self.old_layout == other.old_layout
            && self.new_layout == other.new_layout
            && self.src_queue == other.src_queue
            && self.dst_queue == other.dst_queue
    }
}

/// Every transition needed before the next command, emitted as one
/// pipeline barrier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarrierBatch {
    pub memory: SmallVec<[MemoryBarrier; 4]>,
    pub buffers: SmallVec<[BufferBarrier; 4]>,
    pub images: SmallVec<[ImageBarrier; 8]>,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.buffers.is_empty() && self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.memory.len() + self.buffers.len() + self.images.len()
    }

    pub fn clear(&mut self) {
        self.memory.clear();
        self.buffers.clear();
        self.images.clear();
    }

    /// Adds a memory dependency, folding it into an existing one with the
    /// same source or destination scope.
    pub fn push_memory(&mut self, barrier: MemoryBarrier) {
        if let Some(existing) = self
            .memory
            .iter_mut()
            .find(|m| m.src == barrier.src || m.dst == barrier.dst)
        {
            existing.src = existing.src | barrier.src;
            existing.dst = existing.dst | barrier.dst;
            return;
        }
        self.memory.push(barrier);
    }

    /// Adds an image barrier, merging it with one for an adjacent range of
    /// the same image that performs the same transition.
    pub fn push_image(&mut self, barrier: ImageBarrier) {
        for existing in self.images.iter_mut() {
            if !existing.same_transition(&barrier) {
                continue;
            }
            if let Some(merged) = merge_ranges(&existing.range, &barrier.range) {
                existing.range = merged;
                return;
            }
        }
        self.images.push(barrier);
    }

    pub fn src_stages(&self) -> StageFlags {
        self.scopes().fold(StageFlags::empty(), |acc, (src, _)| acc | src.stages)
    }

    pub fn dst_stages(&self) -> StageFlags {
        self.scopes().fold(StageFlags::empty(), |acc, (_, dst)| acc | dst.stages)
    }

    /// True when the batch may be recorded without leaving a render pass:
    /// memory dependencies between graphics stages only.
    pub fn fits_in_render_pass(&self) -> bool {
        self.buffers.is_empty()
            && self.images.is_empty()
            && StageFlags::RENDER_PASS_ELIGIBLE.contains(self.src_stages() | self.dst_stages())
    }

    fn scopes(&self) -> impl Iterator<Item = (AccessScope, AccessScope)> + '_ {
        self.memory
            .iter()
            .map(|m| (m.src, m.dst))
            .chain(self.buffers.iter().map(|b| (b.src, b.dst)))
            .chain(self.images.iter().map(|i| (i.src, i.dst)))
    }
}

fn merge_ranges(a: &SubresourceRange, b: &SubresourceRange) -> Option<SubresourceRange> {
    if a.base_layer == b.base_layer && a.layer_count == b.layer_count {
        if a.mip_end() == b.base_mip {
            return Some(SubresourceRange::new(a.base_mip, a.level_count + b.level_count, a.base_layer, a.layer_count));
        }
        if b.mip_end() == a.base_mip {
            return Some(SubresourceRange::new(b.base_mip, a.level_count + b.level_count, a.base_layer, a.layer_count));
        }
    }
    if a.base_mip == b.base_mip && a.level_count == b.level_count {
        if a.layer_end() == b.base_layer {
            return Some(SubresourceRange::new(a.base_mip, a.level_count, a.base_layer, a.layer_count + b.layer_count));
        }
        if b.layer_end() == a.base_layer {
            return Some(SubresourceRange::new(a.base_mip, a.level_count, b.base_layer, a.layer_count + b.layer_count));
        }
    }
    None
}

//===----------------------------------------------------------------------===//
// Command definitions
//===----------------------------------------------------------------------===//

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attachment {
    pub image: Handle<Image>,
    pub resource: VersionedHandle,
    pub range: SubresourceRange,
    pub format: Format,
    pub layout: Layout,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear: ClearValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BeginRendering {
    pub area: Rect2D,
    pub colors: SmallVec<[Attachment; 8]>,
    pub depth: Option<Attachment>,
    pub view_mask: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindPipeline {
    pub pipeline: Handle<Pipeline>,
    pub kind: PipelineKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindDescriptorSet {
    pub kind: PipelineKind,
    pub set: u32,
    pub descriptor_set: Handle<DescriptorSet>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindVertexBuffers {
    pub first_binding: u32,
    /// Buffer and byte offset per consecutive binding slot.
    pub buffers: SmallVec<[(Handle<Buffer>, u64); 4]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindIndexBuffer {
    pub buffer: Handle<Buffer>,
    pub offset: u64,
    pub index_type: IndexType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushConstants {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub data: SmallVec<[u8; 128]>,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct Draw {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawIndirect {
    pub buffer: Handle<Buffer>,
    pub offset: u64,
    pub draw_count: u32,
    pub stride: u32,
    pub indexed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawIndirectCount {
    pub buffer: Handle<Buffer>,
    pub offset: u64,
    pub count_buffer: Handle<Buffer>,
    pub count_offset: u64,
    pub max_draw_count: u32,
    pub stride: u32,
    pub indexed: bool,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct DrawMeshTasks {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawMeshTasksIndirect {
    pub buffer: Handle<Buffer>,
    pub offset: u64,
    pub draw_count: u32,
    pub stride: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct Dispatch {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchIndirect {
    pub buffer: Handle<Buffer>,
    pub offset: u64,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct TraceRays {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyBuffer {
    pub src: Handle<Buffer>,
    pub dst: Handle<Buffer>,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateBuffer {
    pub dst: Handle<Buffer>,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyBufferImage {
    pub src: Handle<Buffer>,
    pub dst: Handle<Image>,
    pub src_offset: u64,
    pub range: SubresourceRange,
    pub extent: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlitImage {
    pub src: Handle<Image>,
    pub dst: Handle<Image>,
    pub src_range: SubresourceRange,
    pub dst_range: SubresourceRange,
    pub src_region: Rect2D,
    pub dst_region: Rect2D,
    pub filter: Filter,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearImage {
    pub image: Handle<Image>,
    pub range: SubresourceRange,
    pub value: ClearValue,
    pub depth: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DebugMarkerBegin {
    pub name: String,
    pub color: [f32; 4],
}

//===----------------------------------------------------------------------===//
// Sink
//===----------------------------------------------------------------------===//

/// Native command buffer the encoder records into. One implementation per
/// backend; the null backend records commands for inspection.
pub trait CommandSink {
    fn begin_rendering(&mut self, cmd: &BeginRendering);
    fn end_rendering(&mut self);
    fn bind_pipeline(&mut self, cmd: &BindPipeline);
    fn bind_descriptor_set(&mut self, cmd: &BindDescriptorSet);
    fn bind_vertex_buffers(&mut self, cmd: &BindVertexBuffers);
    fn bind_index_buffer(&mut self, cmd: &BindIndexBuffer);
    fn set_viewports(&mut self, viewports: &[Viewport]);
    fn set_scissors(&mut self, scissors: &[Rect2D]);
    fn push_constants(&mut self, cmd: &PushConstants);
    fn draw(&mut self, cmd: &Draw);
    fn draw_indexed(&mut self, cmd: &DrawIndexed);
    fn draw_indirect(&mut self, cmd: &DrawIndirect);
    fn draw_indirect_count(&mut self, cmd: &DrawIndirectCount);
    fn draw_mesh_tasks(&mut self, cmd: &DrawMeshTasks);
    fn draw_mesh_tasks_indirect(&mut self, cmd: &DrawMeshTasksIndirect);
    fn dispatch(&mut self, cmd: &Dispatch);
    fn dispatch_indirect(&mut self, cmd: &DispatchIndirect);
    fn trace_rays(&mut self, cmd: &TraceRays);
    fn pipeline_barrier(&mut self, batch: &BarrierBatch);
    fn copy_buffer(&mut self, cmd: &CopyBuffer);
    fn update_buffer(&mut self, cmd: &UpdateBuffer);
    fn copy_buffer_to_image(&mut self, cmd: &CopyBufferImage);
    fn blit_image(&mut self, cmd: &BlitImage);
    fn clear_image(&mut self, cmd: &ClearImage);
    fn debug_marker_begin(&mut self, cmd: &DebugMarkerBegin);
    fn debug_marker_end(&mut self);
}

//===----------------------------------------------------------------------===//
// Tests
//===----------------------------------------------------------------------===//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::types::AccessFlags;

    fn scope(stages: StageFlags, access: AccessFlags) -> AccessScope {
        AccessScope::new(stages, access)
    }

    #[test]
    fn memory_barriers_fold_by_scope() {
        let mut batch = BarrierBatch::default();
        let write = scope(StageFlags::COMPUTE_SHADER, AccessFlags::SHADER_WRITE);
        batch.push_memory(MemoryBarrier {
            src: write,
            dst: scope(StageFlags::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ),
        });
        batch.push_memory(MemoryBarrier {
            src: write,
            dst: scope(StageFlags::DRAW_INDIRECT, AccessFlags::INDIRECT_COMMAND_READ),
        });
        assert_eq!(batch.memory.len(), 1);
        assert_eq!(
            batch.dst_stages(),
            StageFlags::VERTEX_INPUT | StageFlags::DRAW_INDIRECT
        );
    }

    #[test]
    fn layer_ranges_merge() {
        let a = SubresourceRange::new(0, 1, 0, 2);
        let b = SubresourceRange::new(0, 1, 2, 3);
        assert_eq!(merge_ranges(&a, &b), Some(SubresourceRange::new(0, 1, 0, 5)));
        assert_eq!(merge_ranges(&a, &SubresourceRange::new(1, 1, 3, 1)), None);
    }

    #[test]
    fn compute_dependency_does_not_fit_in_render_pass() {
        let mut batch = BarrierBatch::default();
        batch.push_memory(MemoryBarrier {
            src: scope(StageFlags::COLOR_ATTACHMENT_OUTPUT, AccessFlags::COLOR_ATTACHMENT_WRITE),
            dst: scope(StageFlags::FRAGMENT_SHADER, AccessFlags::SHADER_READ),
        });
        assert!(batch.fits_in_render_pass());

        batch.push_memory(MemoryBarrier {
            src: scope(StageFlags::COMPUTE_SHADER, AccessFlags::SHADER_WRITE),
            dst: scope(StageFlags::VERTEX_SHADER, AccessFlags::SHADER_READ),
        });
        assert!(!batch.fits_in_render_pass());
    }
}
