//! Backend that creates no GPU objects.
//!
//! [`NullDevice`] hands out pool handles and counts what it was asked to do;
//! [`RecordingSink`] keeps every encoded command so the encoder's output can
//! be inspected without a device.

use std::collections::HashMap;

use log::trace;

use crate::gpu::driver::command::*;
use crate::gpu::driver::types::{DescriptorSet, Handle, Pipeline};
use crate::gpu::error::{GPUError, Result};
use crate::gpu::execution::{DescriptorWrite, PipelineKey};
use crate::gpu::shader::{PipelineKind, SetLayout, Shader};
use crate::gpu::structs::{Rect2D, Viewport};
use crate::gpu::{Backend, DeviceSignature};
use crate::utils::Pool;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NullCounters {
    pub pipelines_created: u64,
    pub pipelines_destroyed: u64,
    pub sets_allocated: u64,
    pub sets_freed: u64,
    pub descriptor_writes: u64,
}

#[derive(Default)]
pub struct NullDevice {
    pipelines: Pool<Pipeline>,
    pipeline_kinds: HashMap<Handle<Pipeline>, PipelineKind>,
    sets: Pool<DescriptorSet>,
    set_contents: HashMap<Handle<DescriptorSet>, Vec<DescriptorWrite>>,
    signature: DeviceSignature,
    cache_blob: Vec<u8>,
    counters: NullCounters,
    fail_pipelines: bool,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            signature: DeviceSignature {
                vendor_id: 0xffff,
                device_id: 1,
                driver_version: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_signature(mut self, signature: DeviceSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Makes every following pipeline creation fail.
    pub fn fail_pipeline_creation(&mut self, fail: bool) {
        self.fail_pipelines = fail;
    }

    pub fn counters(&self) -> NullCounters {
        self.counters
    }

    pub fn descriptor_writes(&self) -> u64 {
        self.counters.descriptor_writes
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn live_descriptor_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn pipeline_kind(&self, pipeline: Handle<Pipeline>) -> Option<PipelineKind> {
        self.pipeline_kinds.get(&pipeline).copied()
    }

    /// Last writes applied to `set`.
    pub fn set_contents(&self, set: Handle<DescriptorSet>) -> Option<&[DescriptorWrite]> {
        self.set_contents.get(&set).map(|w| w.as_slice())
    }

    /// Bytes the next pipeline cache spill returns.
    pub fn set_cache_blob(&mut self, blob: Vec<u8>) {
        self.cache_blob = blob;
    }

    pub fn cache_blob(&self) -> &[u8] {
        &self.cache_blob
    }

    fn make_pipeline(&mut self, shader: &Shader, kind: PipelineKind) -> Result<Handle<Pipeline>> {
        if self.fail_pipelines {
            return Err(GPUError::Backend(format!(
                "pipeline creation disabled ('{}')",
                shader.name
            )));
        }
        let handle = self.pipelines.insert(Pipeline);
        self.pipeline_kinds.insert(handle, kind);
        self.counters.pipelines_created += 1;
        trace!("null {:?} pipeline {:?} for '{}'", kind, handle, shader.name);
        Ok(handle)
    }
}

impl Backend for NullDevice {
    fn create_graphics_pipeline(&mut self, shader: &Shader, _key: &PipelineKey) -> Result<Handle<Pipeline>> {
        self.make_pipeline(shader, PipelineKind::Graphics)
    }

    fn create_mesh_pipeline(&mut self, shader: &Shader, _key: &PipelineKey) -> Result<Handle<Pipeline>> {
        self.make_pipeline(shader, PipelineKind::Mesh)
    }

    fn create_compute_pipeline(&mut self, shader: &Shader) -> Result<Handle<Pipeline>> {
        self.make_pipeline(shader, PipelineKind::Compute)
    }

    fn create_ray_tracing_pipeline(&mut self, shader: &Shader) -> Result<Handle<Pipeline>> {
        self.make_pipeline(shader, PipelineKind::RayTracing)
    }

    fn destroy_pipeline(&mut self, pipeline: Handle<Pipeline>) {
        if self.pipelines.release(pipeline).is_some() {
            self.pipeline_kinds.remove(&pipeline);
            self.counters.pipelines_destroyed += 1;
        }
    }

    fn allocate_descriptor_set(&mut self, _layout: &SetLayout) -> Result<Handle<DescriptorSet>> {
        self.counters.sets_allocated += 1;
        Ok(self.sets.insert(DescriptorSet))
    }

    fn write_descriptor_set(&mut self, set: Handle<DescriptorSet>, writes: &[DescriptorWrite]) {
        self.counters.descriptor_writes += 1;
        self.set_contents.insert(set, writes.to_vec());
    }

    fn free_descriptor_set(&mut self, set: Handle<DescriptorSet>) {
        if self.sets.release(set).is_some() {
            self.set_contents.remove(&set);
            self.counters.sets_freed += 1;
        }
    }

    fn device_signature(&self) -> DeviceSignature {
        self.signature
    }

    fn pipeline_cache_data(&self) -> Vec<u8> {
        self.cache_blob.clone()
    }

    fn load_pipeline_cache_data(&mut self, data: &[u8]) {
        self.cache_blob = data.to_vec();
    }
}

/// A command as the encoder emitted it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRendering(BeginRendering),
    EndRendering,
    BindPipeline(BindPipeline),
    BindDescriptorSet(BindDescriptorSet),
    BindVertexBuffers(BindVertexBuffers),
    BindIndexBuffer(BindIndexBuffer),
    SetViewports(Vec<Viewport>),
    SetScissors(Vec<Rect2D>),
    PushConstants(PushConstants),
    Draw(Draw),
    DrawIndexed(DrawIndexed),
    DrawIndirect(DrawIndirect),
    DrawIndirectCount(DrawIndirectCount),
    DrawMeshTasks(DrawMeshTasks),
    DrawMeshTasksIndirect(DrawMeshTasksIndirect),
    Dispatch(Dispatch),
    DispatchIndirect(DispatchIndirect),
    TraceRays(TraceRays),
    PipelineBarrier(BarrierBatch),
    CopyBuffer(CopyBuffer),
    UpdateBuffer(UpdateBuffer),
    CopyBufferToImage(CopyBufferImage),
    BlitImage(BlitImage),
    ClearImage(ClearImage),
    DebugMarkerBegin(DebugMarkerBegin),
    DebugMarkerEnd,
}

impl RecordedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Draw(_)
                | RecordedCommand::DrawIndexed(_)
                | RecordedCommand::DrawIndirect(_)
                | RecordedCommand::DrawIndirectCount(_)
                | RecordedCommand::DrawMeshTasks(_)
                | RecordedCommand::DrawMeshTasksIndirect(_)
        )
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Dispatch(_)
                | RecordedCommand::DispatchIndirect(_)
                | RecordedCommand::TraceRays(_)
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub commands: Vec<RecordedCommand>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn count(&self, pred: impl Fn(&RecordedCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    pub fn position(&self, pred: impl Fn(&RecordedCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(pred)
    }

    pub fn barriers(&self) -> impl Iterator<Item = &BarrierBatch> {
        self.commands.iter().filter_map(|c| match c {
            RecordedCommand::PipelineBarrier(batch) => Some(batch),
            _ => None,
        })
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl CommandSink for RecordingSink {
    fn begin_rendering(&mut self, cmd: &BeginRendering) {
        self.commands.push(RecordedCommand::BeginRendering(cmd.clone()));
    }

    fn end_rendering(&mut self) {
        self.commands.push(RecordedCommand::EndRendering);
    }

    fn bind_pipeline(&mut self, cmd: &BindPipeline) {
        self.commands.push(RecordedCommand::BindPipeline(*cmd));
    }

    fn bind_descriptor_set(&mut self, cmd: &BindDescriptorSet) {
        self.commands.push(RecordedCommand::BindDescriptorSet(*cmd));
    }

    fn bind_vertex_buffers(&mut self, cmd: &BindVertexBuffers) {
        self.commands.push(RecordedCommand::BindVertexBuffers(cmd.clone()));
    }

    fn bind_index_buffer(&mut self, cmd: &BindIndexBuffer) {
        self.commands.push(RecordedCommand::BindIndexBuffer(*cmd));
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.commands.push(RecordedCommand::SetViewports(viewports.to_vec()));
    }

    fn set_scissors(&mut self, scissors: &[Rect2D]) {
        self.commands.push(RecordedCommand::SetScissors(scissors.to_vec()));
    }

    fn push_constants(&mut self, cmd: &PushConstants) {
        self.commands.push(RecordedCommand::PushConstants(cmd.clone()));
    }

    fn draw(&mut self, cmd: &Draw) {
        self.commands.push(RecordedCommand::Draw(*cmd));
    }

    fn draw_indexed(&mut self, cmd: &DrawIndexed) {
        self.commands.push(RecordedCommand::DrawIndexed(*cmd));
    }

    fn draw_indirect(&mut self, cmd: &DrawIndirect) {
        self.commands.push(RecordedCommand::DrawIndirect(*cmd));
    }

    fn draw_indirect_count(&mut self, cmd: &DrawIndirectCount) {
        self.commands.push(RecordedCommand::DrawIndirectCount(*cmd));
    }

    fn draw_mesh_tasks(&mut self, cmd: &DrawMeshTasks) {
        self.commands.push(RecordedCommand::DrawMeshTasks(*cmd));
    }

    fn draw_mesh_tasks_indirect(&mut self, cmd: &DrawMeshTasksIndirect) {
        self.commands.push(RecordedCommand::DrawMeshTasksIndirect(*cmd));
    }

    fn dispatch(&mut self, cmd: &Dispatch) {
        self.commands.push(RecordedCommand::Dispatch(*cmd));
    }

    fn dispatch_indirect(&mut self, cmd: &DispatchIndirect) {
        self.commands.push(RecordedCommand::DispatchIndirect(*cmd));
    }

    fn trace_rays(&mut self, cmd: &TraceRays) {
        self.commands.push(RecordedCommand::TraceRays(*cmd));
    }

    fn pipeline_barrier(&mut self, batch: &BarrierBatch) {
        self.commands.push(RecordedCommand::PipelineBarrier(batch.clone()));
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) {
        self.commands.push(RecordedCommand::CopyBuffer(*cmd));
    }

    fn update_buffer(&mut self, cmd: &UpdateBuffer) {
        self.commands.push(RecordedCommand::UpdateBuffer(cmd.clone()));
    }

    fn copy_buffer_to_image(&mut self, cmd: &CopyBufferImage) {
        self.commands.push(RecordedCommand::CopyBufferToImage(*cmd));
    }

    fn blit_image(&mut self, cmd: &BlitImage) {
        self.commands.push(RecordedCommand::BlitImage(*cmd));
    }

    fn clear_image(&mut self, cmd: &ClearImage) {
        self.commands.push(RecordedCommand::ClearImage(*cmd));
    }

    fn debug_marker_begin(&mut self, cmd: &DebugMarkerBegin) {
        self.commands.push(RecordedCommand::DebugMarkerBegin(cmd.clone()));
    }

    fn debug_marker_end(&mut self) {
        self.commands.push(RecordedCommand::DebugMarkerEnd);
    }
}
