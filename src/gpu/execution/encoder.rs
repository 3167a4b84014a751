use std::sync::Arc;

use log::{debug, trace, warn};
use smallvec::SmallVec;

use crate::gpu::context::DeviceContext;
use crate::gpu::driver::command::*;
use crate::gpu::driver::state::{AccessRecord, RecordOptions};
use crate::gpu::driver::types::{
    AccessFlags, BufferRange, IndexType, Layout, QueueOwner, QueueType, ResourceRange, StageFlags,
};
use crate::gpu::error::{GPUError, Result};
use crate::gpu::fence::FenceRef;
use crate::gpu::resources::{
    BufferResource, IndexBinding, SamplerResource, TextureResource, TextureView, VertexStream,
};
use crate::gpu::shader::{PipelineKind, Shader, ShaderStageFlags};
use crate::gpu::structs::*;
use crate::gpu::Backend;

use super::{DirtyFlags, RenderState};

/// Largest inline buffer update a command buffer accepts.
pub const MAX_UPDATE_BUFFER_SIZE: usize = 65536;

/// Counters for one recorded command buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EncoderStats {
    pub render_passes: u64,
    pub barrier_batches: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub transfers: u64,
}

/// Records one command buffer.
///
/// State setters only touch the [`RenderState`]; native work happens at
/// draw, dispatch and transfer time, where pending hazards are resolved
/// into a single barrier batch and the render pass is opened or closed as
/// the command requires.
pub struct CommandEncoder<'a, B: Backend, S: CommandSink> {
    ctx: &'a mut DeviceContext<B>,
    sink: S,
    queue: QueueType,
    fence: FenceRef,
    state: RenderState,
    barriers: BarrierBatch,
    in_render_pass: bool,
    debug_depth: u32,
    stats: EncoderStats,
}

impl<'a, B: Backend, S: CommandSink> CommandEncoder<'a, B, S> {
    pub fn new(ctx: &'a mut DeviceContext<B>, sink: S, queue: QueueType) -> Self {
        let fence = ctx.timeline(queue).current();
        trace!("encoding {:?} command buffer, fence {}", queue, fence.value());
        Self {
            ctx,
            sink,
            queue,
            fence,
            state: RenderState::new(queue),
            barriers: Default::default(),
            in_render_pass: false,
            debug_depth: 0,
            stats: Default::default(),
        }
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Fence the command buffer signals once it retires.
    pub fn fence(&self) -> &FenceRef {
        &self.fence
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn context(&self) -> &DeviceContext<B> {
        &*self.ctx
    }

    pub fn in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    //===------------------------------------------------------------------===//
    // State
    //===------------------------------------------------------------------===//

    pub fn set_shader(&mut self, shader: &Arc<Shader>) {
        self.state.set_shader(shader);
    }

    pub fn set_vertex_streams(&mut self, streams: &[VertexStream]) -> Result<()> {
        self.state.set_vertex_streams(streams)
    }

    pub fn set_index_buffer(&mut self, buffer: &BufferResource, offset: u64, index_type: IndexType) {
        self.state.set_index_buffer(Some(IndexBinding {
            buffer: *buffer,
            offset,
            index_type,
        }));
    }

    pub fn clear_index_buffer(&mut self) {
        self.state.set_index_buffer(None);
    }

    pub fn set_render_target(&mut self, colors: &[TextureView], depth: Option<TextureView>) -> Result<()> {
        self.state.set_render_target(colors, depth)
    }

    pub fn set_view_mask(&mut self, view_mask: u32) {
        self.state.set_view_mask(view_mask);
    }

    pub fn clear_color(&mut self, index: usize, value: ClearValue) -> Result<()> {
        self.state.clear_color(index, value)
    }

    pub fn clear_depth(&mut self, depth: f32, stencil: u32) -> Result<()> {
        self.state.clear_depth(depth, stencil)
    }

    pub fn discard_color(&mut self, index: usize) -> Result<()> {
        self.state.discard_color(index)
    }

    pub fn discard_depth(&mut self) -> Result<()> {
        self.state.discard_depth()
    }

    pub fn set_blending(&mut self, blend: BlendState) {
        self.state.set_blending(blend);
    }

    pub fn set_rasterization(&mut self, raster: RasterizationState) {
        self.state.set_rasterization(raster);
    }

    pub fn set_depth_stencil(&mut self, depth_stencil: DepthStencilState) {
        self.state.set_depth_stencil(depth_stencil);
    }

    pub fn set_multisampling(&mut self, multisample: MultisampleState) {
        self.state.set_multisampling(multisample);
    }

    pub fn set_topology(&mut self, topology: Topology) {
        self.state.set_topology(topology);
    }

    pub fn set_primitive_restart(&mut self, enable: bool) {
        self.state.set_primitive_restart(enable);
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) -> Result<()> {
        self.state.set_viewports(viewports)
    }

    pub fn set_scissors(&mut self, scissors: &[Rect2D]) -> Result<()> {
        self.state.set_scissors(scissors)
    }

    pub fn set_push_constants(&mut self, offset: u32, data: &[u8]) {
        self.state.set_push_constants(offset, data);
    }

    /// Binds `texture` under `name` for this command buffer only, shadowing
    /// the context-wide value.
    pub fn set_texture(&mut self, name: &str, texture: &TextureResource) {
        self.state.locals_mut().set_texture(name, texture);
    }

    pub fn set_texture_view(&mut self, name: &str, view: TextureView) {
        self.state.locals_mut().set_texture_view(name, view);
    }

    pub fn set_buffer(&mut self, name: &str, buffer: &BufferResource) {
        self.state.locals_mut().set_buffer(name, buffer);
    }

    pub fn set_buffer_range(&mut self, name: &str, buffer: &BufferResource, range: BufferRange) {
        self.state.locals_mut().set_buffer_range(name, buffer, range);
    }

    pub fn set_sampler(&mut self, name: &str, sampler: &SamplerResource) {
        self.state.locals_mut().set_sampler(name, sampler);
    }

    //===------------------------------------------------------------------===//
    // Draws
    //===------------------------------------------------------------------===//

    pub fn draw(&mut self, cmd: Draw) -> Result<()> {
        self.prepare_raster(PipelineKind::Graphics)?;
        self.sink.draw(&cmd);
        self.stats.draws += 1;
        Ok(())
    }

    pub fn draw_indexed(&mut self, cmd: DrawIndexed) -> Result<()> {
        if self.state.index_buffer().is_none() {
            return Err(GPUError::InvalidOperation("indexed draw without an index buffer"));
        }
        self.prepare_raster(PipelineKind::Graphics)?;
        self.sink.draw_indexed(&cmd);
        self.stats.draws += 1;
        Ok(())
    }

    pub fn draw_indirect(&mut self, args: &BufferResource, offset: u64, draw_count: u32, stride: u32) -> Result<()> {
        self.indirect_draw(args, offset, draw_count, stride, false)
    }

    pub fn draw_indexed_indirect(
        &mut self,
        args: &BufferResource,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        if self.state.index_buffer().is_none() {
            return Err(GPUError::InvalidOperation("indexed draw without an index buffer"));
        }
        self.indirect_draw(args, offset, draw_count, stride, true)
    }

    fn indirect_draw(
        &mut self,
        args: &BufferResource,
        offset: u64,
        draw_count: u32,
        stride: u32,
        indexed: bool,
    ) -> Result<()> {
        self.record_indirect(args, offset);
        self.prepare_raster(PipelineKind::Graphics)?;
        self.sink.draw_indirect(&DrawIndirect {
            buffer: args.native,
            offset,
            draw_count,
            stride,
            indexed,
        });
        self.stats.draws += 1;
        Ok(())
    }

    /// Draw whose count is read from `count` on the GPU, capped at
    /// `max_draw_count`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_indirect_count(
        &mut self,
        args: &BufferResource,
        offset: u64,
        count: &BufferResource,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
        indexed: bool,
    ) -> Result<()> {
        if indexed && self.state.index_buffer().is_none() {
            return Err(GPUError::InvalidOperation("indexed draw without an index buffer"));
        }
        self.record_indirect(args, offset);
        self.record_indirect(count, count_offset);
        self.prepare_raster(PipelineKind::Graphics)?;
        self.sink.draw_indirect_count(&DrawIndirectCount {
            buffer: args.native,
            offset,
            count_buffer: count.native,
            count_offset,
            max_draw_count,
            stride,
            indexed,
        });
        self.stats.draws += 1;
        Ok(())
    }

    pub fn draw_mesh_tasks(&mut self, cmd: DrawMeshTasks) -> Result<()> {
        self.prepare_raster(PipelineKind::Mesh)?;
        self.sink.draw_mesh_tasks(&cmd);
        self.stats.draws += 1;
        Ok(())
    }

    pub fn draw_mesh_tasks_indirect(
        &mut self,
        args: &BufferResource,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.record_indirect(args, offset);
        self.prepare_raster(PipelineKind::Mesh)?;
        self.sink.draw_mesh_tasks_indirect(&DrawMeshTasksIndirect {
            buffer: args.native,
            offset,
            draw_count,
            stride,
        });
        self.stats.draws += 1;
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Compute and ray tracing
    //===------------------------------------------------------------------===//

    pub fn dispatch(&mut self, cmd: Dispatch) -> Result<()> {
        self.prepare_outside_pass(PipelineKind::Compute)?;
        self.sink.dispatch(&cmd);
        self.stats.dispatches += 1;
        Ok(())
    }

    pub fn dispatch_indirect(&mut self, args: &BufferResource, offset: u64) -> Result<()> {
        self.end_render_pass();
        self.record_indirect(args, offset);
        self.prepare_outside_pass(PipelineKind::Compute)?;
        self.sink.dispatch_indirect(&DispatchIndirect {
            buffer: args.native,
            offset,
        });
        self.stats.dispatches += 1;
        Ok(())
    }

    pub fn dispatch_rays(&mut self, cmd: TraceRays) -> Result<()> {
        self.prepare_outside_pass(PipelineKind::RayTracing)?;
        self.sink.trace_rays(&cmd);
        self.stats.dispatches += 1;
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Transfers
    //===------------------------------------------------------------------===//

    pub fn copy_buffer(
        &mut self,
        src: &BufferResource,
        dst: &BufferResource,
        src_offset: u64,
        dst_offset: u64,
        amount: u64,
    ) -> Result<()> {
        if src_offset + amount > src.size || dst_offset + amount > dst.size {
            return Err(GPUError::InvalidOperation("buffer copy out of bounds"));
        }
        self.end_render_pass();
        self.record_transfer_buffer(src, BufferRange::new(src_offset, amount), false);
        self.record_transfer_buffer(dst, BufferRange::new(dst_offset, amount), true);
        self.flush_barriers();
        self.sink.copy_buffer(&CopyBuffer {
            src: src.native,
            dst: dst.native,
            src_offset,
            dst_offset,
            amount,
        });
        self.stats.transfers += 1;
        Ok(())
    }

    /// Inline update of a small buffer region.
    pub fn update_buffer(&mut self, dst: &BufferResource, offset: u64, data: &[u8]) -> Result<()> {
        if data.len() > MAX_UPDATE_BUFFER_SIZE {
            return Err(GPUError::LimitExceeded {
                what: "inline buffer update bytes",
                limit: MAX_UPDATE_BUFFER_SIZE,
                requested: data.len(),
            });
        }
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(GPUError::InvalidOperation("buffer update not 4-byte aligned"));
        }
        if offset + data.len() as u64 > dst.size {
            return Err(GPUError::InvalidOperation("buffer update out of bounds"));
        }
        self.end_render_pass();
        self.record_transfer_buffer(dst, BufferRange::new(offset, data.len() as u64), true);
        self.flush_barriers();
        self.sink.update_buffer(&UpdateBuffer {
            dst: dst.native,
            offset,
            data: data.to_vec(),
        });
        self.stats.transfers += 1;
        Ok(())
    }

    /// Copies texel data staged in `src` into the base mip of `dst`.
    pub fn upload_texture(&mut self, src: &BufferResource, src_offset: u64, dst: TextureView) -> Result<()> {
        self.end_render_pass();
        let whole = dst.range == dst.texture.full_range();
        self.record_transfer_buffer(src, BufferRange::new(src_offset, src.size.saturating_sub(src_offset)), false);
        self.record_transfer_image(&dst, true, whole);
        self.flush_barriers();
        let mip = dst.range.base_mip;
        self.sink.copy_buffer_to_image(&CopyBufferImage {
            src: src.native,
            dst: dst.texture.native,
            src_offset,
            range: dst.range,
            extent: [
                (dst.texture.extent[0] >> mip).max(1),
                (dst.texture.extent[1] >> mip).max(1),
                (dst.texture.extent[2] >> mip).max(1),
            ],
        });
        self.stats.transfers += 1;
        Ok(())
    }

    /// Scaled copy between the base mips of two views.
    pub fn blit(&mut self, src: TextureView, dst: TextureView, filter: Filter) -> Result<()> {
        if src.texture.handle.id == dst.texture.handle.id
            && ResourceRange::Image(src.range).overlaps(&ResourceRange::Image(dst.range))
        {
            return Err(GPUError::InvalidOperation("blit source and destination overlap"));
        }
        self.end_render_pass();
        self.record_transfer_image(&src, false, false);
        self.record_transfer_image(&dst, true, false);
        self.flush_barriers();
        self.sink.blit_image(&BlitImage {
            src: src.texture.native,
            dst: dst.texture.native,
            src_range: src.range,
            dst_range: dst.range,
            src_region: mip_rect(&src),
            dst_region: mip_rect(&dst),
            filter,
        });
        self.stats.transfers += 1;
        Ok(())
    }

    /// Clears a texture outside any render pass.
    pub fn clear(&mut self, texture: TextureView, value: ClearValue) -> Result<()> {
        let depth = texture.texture.format.is_depth();
        if depth != matches!(value, ClearValue::DepthStencil { .. }) {
            return Err(GPUError::InvalidOperation("clear value does not match texture format"));
        }
        self.end_render_pass();
        self.record_transfer_image(&texture, true, true);
        self.flush_barriers();
        self.sink.clear_image(&ClearImage {
            image: texture.texture.native,
            range: texture.range,
            value,
            depth,
        });
        self.stats.transfers += 1;
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Debug scopes
    //===------------------------------------------------------------------===//

    pub fn begin_debug_scope(&mut self, name: &str, color: [f32; 4]) {
        self.sink.debug_marker_begin(&DebugMarkerBegin {
            name: name.to_string(),
            color,
        });
        self.debug_depth += 1;
    }

    pub fn end_debug_scope(&mut self) -> Result<()> {
        if self.debug_depth == 0 {
            return Err(GPUError::InvalidOperation("no debug scope to end"));
        }
        self.debug_depth -= 1;
        self.sink.debug_marker_end();
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Completion
    //===------------------------------------------------------------------===//

    /// Closes the command buffer. Returns the sink to submit, the fence that
    /// submission signals and the recording stats.
    pub fn finish(mut self) -> (S, FenceRef, EncoderStats) {
        self.end_render_pass();
        if self.debug_depth > 0 {
            warn!("closing {} unbalanced debug scopes", self.debug_depth);
            for _ in 0..self.debug_depth {
                self.sink.debug_marker_end();
            }
        }
        if self.ctx.tracker.has_pending() {
            debug!("dropping barriers recorded after the last command");
        }
        self.ctx.tracker.clear_barriers();

        let fence = self.ctx.timeline_mut(self.queue).advance();
        debug!(
            "finished {:?} command buffer: fence {}, {} draws, {} dispatches, {} passes, {} barrier batches",
            self.queue,
            fence.value(),
            self.stats.draws,
            self.stats.dispatches,
            self.stats.render_passes,
            self.stats.barrier_batches
        );
        (self.sink, fence, self.stats)
    }

    //===------------------------------------------------------------------===//
    // Internals
    //===------------------------------------------------------------------===//

    fn owner(&self) -> QueueOwner {
        QueueOwner::Exclusive(self.queue)
    }

    fn check_kind(&self, expected: PipelineKind) -> Result<()> {
        match self.state.kind() {
            None => Err(GPUError::NoShaderBound),
            Some(kind) if kind == expected => Ok(()),
            Some(_) => Err(GPUError::InvalidOperation(match expected {
                PipelineKind::Graphics => "draw needs a graphics shader",
                PipelineKind::Mesh => "mesh draw needs a mesh shader",
                PipelineKind::Compute => "dispatch needs a compute shader",
                PipelineKind::RayTracing => "ray dispatch needs a ray tracing shader",
            })),
        }
    }

    /// Validates state for a draw, then makes sure a render pass is open
    /// with every pending hazard resolved.
    fn prepare_raster(&mut self, kind: PipelineKind) -> Result<()> {
        self.check_kind(kind)?;
        let dirty = self.state.validate_pipeline(self.ctx, &self.fence)?;

        if dirty.contains(DirtyFlags::RENDER_TARGET) {
            self.end_render_pass();
        }
        if self.in_render_pass && self.ctx.tracker.has_pending() {
            self.ctx.tracker.resolve(&mut self.barriers);
            if !self.barriers.fits_in_render_pass() {
                trace!("barrier batch not allowed inside the pass, reopening");
                self.end_render_pass();
            }
            self.emit_barriers();
        }
        if !self.in_render_pass {
            self.begin_render_pass()?;
        }

        self.apply(dirty, kind);
        Ok(())
    }

    fn prepare_outside_pass(&mut self, kind: PipelineKind) -> Result<()> {
        self.check_kind(kind)?;
        self.end_render_pass();
        let dirty = self.state.validate_pipeline(self.ctx, &self.fence)?;
        self.flush_barriers();
        self.apply(dirty, kind);
        Ok(())
    }

    fn begin_render_pass(&mut self) -> Result<()> {
        self.state.record_target_accesses(&mut self.ctx.tracker);
        self.flush_barriers();

        let info = self
            .state
            .begin_info()
            .ok_or(GPUError::InvalidOperation("rasterizing without a render target"))?;
        self.sink.begin_rendering(&info);
        self.in_render_pass = true;
        self.stats.render_passes += 1;
        self.state.consume_load_ops();
        trace!(
            "began render pass {}x{} ({} color)",
            info.area.w,
            info.area.h,
            info.colors.len()
        );

        if self.state.viewports().is_empty() {
            self.sink.set_viewports(&[Viewport::from_rect(info.area)]);
        }
        if self.state.scissors().is_empty() {
            self.sink.set_scissors(&[info.area]);
        }
        Ok(())
    }

    fn end_render_pass(&mut self) {
        if self.in_render_pass {
            self.sink.end_rendering();
            self.in_render_pass = false;
        }
    }

    fn flush_barriers(&mut self) {
        if self.ctx.tracker.resolve(&mut self.barriers) {
            self.emit_barriers();
        }
    }

    fn emit_barriers(&mut self) {
        if self.barriers.is_empty() {
            return;
        }
        self.sink.pipeline_barrier(&self.barriers);
        self.stats.barrier_batches += 1;
        self.barriers.clear();
    }

    /// Binds whatever `dirty` says changed.
    fn apply(&mut self, dirty: DirtyFlags, kind: PipelineKind) {
        if dirty.contains(DirtyFlags::PIPELINE) {
            if let Some(pipeline) = self.state.pipeline() {
                self.sink.bind_pipeline(&BindPipeline { pipeline, kind });
            }
        }

        for set in 0..MAX_DESCRIPTOR_SETS {
            if !dirty.contains(DirtyFlags::descriptor_set(set)) {
                continue;
            }
            if let Some(descriptor_set) = self.state.descriptor_set(set) {
                self.sink.bind_descriptor_set(&BindDescriptorSet {
                    kind,
                    set: set as u32,
                    descriptor_set,
                });
            }
        }

        if kind == PipelineKind::Graphics {
            if dirty.contains(DirtyFlags::VERTEX_BUFFERS) && !self.state.vertex_buffers().is_empty() {
                let buffers: SmallVec<[_; 4]> = self
                    .state
                    .vertex_buffers()
                    .iter()
                    .map(|(buffer, offset)| (buffer.native, *offset))
                    .collect();
                self.sink.bind_vertex_buffers(&BindVertexBuffers {
                    first_binding: 0,
                    buffers,
                });
            }
            if dirty.contains(DirtyFlags::INDEX_BUFFER) {
                if let Some(index) = self.state.index_buffer() {
                    self.sink.bind_index_buffer(&BindIndexBuffer {
                        buffer: index.buffer.native,
                        offset: index.offset,
                        index_type: index.index_type,
                    });
                }
            }
        }

        if kind.rasterizes() {
            if dirty.contains(DirtyFlags::VIEWPORT) && !self.state.viewports().is_empty() {
                self.sink.set_viewports(self.state.viewports());
            }
            if dirty.contains(DirtyFlags::SCISSOR) && !self.state.scissors().is_empty() {
                self.sink.set_scissors(self.state.scissors());
            }
        }

        if dirty.contains(DirtyFlags::PUSH_CONSTANTS) {
            let (offset, data) = self.state.push_constants();
            if !data.is_empty() {
                let stages = self
                    .state
                    .shader()
                    .map(|s| s.push_constant_stages())
                    .filter(|s| !s.is_empty())
                    .unwrap_or(ShaderStageFlags::all());
                self.sink.push_constants(&PushConstants {
                    stages,
                    offset,
                    data: SmallVec::from_slice(data),
                });
            }
        }
    }

    fn record_indirect(&mut self, args: &BufferResource, offset: u64) {
        let owner = self.owner();
        if !args.tracking.is_empty() {
            self.ctx.tracker.register(args.handle, args.tracking);
        }
        self.ctx.tracker.record(
            args.handle,
            ResourceRange::Buffer(BufferRange::new(offset, args.size.saturating_sub(offset))),
            AccessRecord::buffer(StageFlags::DRAW_INDIRECT, AccessFlags::INDIRECT_COMMAND_READ, owner),
            RecordOptions::default(),
        );
    }

    fn record_transfer_buffer(&mut self, buffer: &BufferResource, range: BufferRange, write: bool) {
        let owner = self.owner();
        let access = if write {
            AccessFlags::TRANSFER_WRITE
        } else {
            AccessFlags::TRANSFER_READ
        };
        if !buffer.tracking.is_empty() {
            self.ctx.tracker.register(buffer.handle, buffer.tracking);
        }
        self.ctx.tracker.record(
            buffer.handle,
            ResourceRange::Buffer(range),
            AccessRecord::buffer(StageFlags::TRANSFER, access, owner),
            RecordOptions::default(),
        );
    }

    fn record_transfer_image(&mut self, view: &TextureView, write: bool, discard: bool) {
        let owner = self.owner();
        let (access, layout) = if write {
            (AccessFlags::TRANSFER_WRITE, Layout::TransferDst)
        } else {
            (AccessFlags::TRANSFER_READ, Layout::TransferSrc)
        };
        let texture = &view.texture;
        if !texture.tracking.is_empty() {
            self.ctx.tracker.register(texture.handle, texture.tracking);
        }
        self.ctx.tracker.record(
            texture.handle,
            ResourceRange::Image(view.range),
            AccessRecord::new(StageFlags::TRANSFER, access, layout, owner),
            RecordOptions { discard },
        );
    }
}

fn mip_rect(view: &TextureView) -> Rect2D {
    let mip = view.range.base_mip;
    Rect2D {
        x: 0,
        y: 0,
        w: (view.texture.extent[0] >> mip).max(1),
        h: (view.texture.extent[1] >> mip).max(1),
    }
}
