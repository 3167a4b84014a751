use std::sync::Arc;

use log::{debug, trace, warn};
use smallvec::{smallvec, SmallVec};

use crate::gpu::context::DeviceContext;
use crate::gpu::driver::command::{Attachment, BeginRendering};
use crate::gpu::driver::state::{AccessRecord, RecordOptions, ResourceAccessTracker};
use crate::gpu::driver::types::{
    AccessFlags, BufferRange, DescriptorSet, Handle, Layout, Pipeline, QueueOwner, QueueType,
    ResourceRange, StageFlags,
};
use crate::gpu::error::{GPUError, Result};
use crate::gpu::fence::FenceRef;
use crate::gpu::resources::{
    BufferResource, BufferUsage, GlobalResourceState, IndexBinding, ResourceValue, TextureUsage,
    TextureView, VertexStream,
};
use crate::gpu::shader::{DescriptorType, PipelineKind, SetLayout, Shader, ShaderBinding};
use crate::gpu::structs::*;
use crate::gpu::Backend;

use super::descriptor_cache::{
    DescriptorBinding, DescriptorElement, DescriptorResource, DescriptorSetKey, DescriptorWrite,
};
use super::pipeline_cache::PipelineKey;
use super::DirtyFlags;

/// One attachment of the render target together with its load/store ops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetAttachment {
    pub view: TextureView,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear: ClearValue,
}

impl TargetAttachment {
    pub fn new(view: TextureView) -> Self {
        Self {
            view,
            load: LoadOp::Load,
            store: StoreOp::Store,
            clear: Default::default(),
        }
    }

    fn to_attachment(&self, layout: Layout) -> Attachment {
        Attachment {
            image: self.view.texture.native,
            resource: self.view.texture.handle,
            range: self.view.range,
            format: self.view.texture.format,
            layout,
            load: self.load,
            store: self.store,
            clear: self.clear,
        }
    }
}

/// Color and depth attachments rendered into by rasterizing pipelines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderTarget {
    pub colors: SmallVec<[TargetAttachment; MAX_COLOR_TARGETS]>,
    pub depth: Option<TargetAttachment>,
    pub view_mask: u32,
}

impl RenderTarget {
    pub fn new(colors: &[TextureView], depth: Option<TextureView>) -> Result<Self> {
        if colors.len() > MAX_COLOR_TARGETS {
            return Err(GPUError::LimitExceeded {
                what: "color targets",
                limit: MAX_COLOR_TARGETS,
                requested: colors.len(),
            });
        }
        Ok(Self {
            colors: colors.iter().map(|v| TargetAttachment::new(*v)).collect(),
            depth: depth.map(TargetAttachment::new),
            view_mask: 0,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.depth.is_none()
    }

    fn same_views(&self, colors: &[TextureView], depth: Option<&TextureView>) -> bool {
        self.colors.len() == colors.len()
            && self.colors.iter().zip(colors).all(|(a, v)| a.view == *v)
            && self.depth.as_ref().map(|d| &d.view) == depth
    }

    pub fn signature(&self) -> RenderTargetSignature {
        let first = self.colors.first().or(self.depth.as_ref());
        RenderTargetSignature {
            color_formats: self.colors.iter().map(|c| c.view.texture.format).collect(),
            depth_format: self
                .depth
                .as_ref()
                .map(|d| d.view.texture.format)
                .unwrap_or_default(),
            samples: first.map(|a| a.view.texture.samples).unwrap_or_default(),
            view_mask: self.view_mask,
        }
    }

    /// Area of the first attachment at its base mip.
    pub fn area(&self) -> Rect2D {
        match self.colors.first().or(self.depth.as_ref()) {
            Some(a) => {
                let mip = a.view.range.base_mip;
                Rect2D {
                    x: 0,
                    y: 0,
                    w: (a.view.texture.extent[0] >> mip).max(1),
                    h: (a.view.texture.extent[1] >> mip).max(1),
                }
            }
            None => Default::default(),
        }
    }

    fn attachments_mut(&mut self) -> impl Iterator<Item = &mut TargetAttachment> {
        self.colors.iter_mut().chain(self.depth.iter_mut())
    }
}

/// Encoder-side copy of every piece of pipeline-affecting state, plus the
/// dirty bits saying what has to be reapplied before the next draw or
/// dispatch.
pub struct RenderState {
    queue: QueueType,
    dirty: DirtyFlags,
    shader: Option<Arc<Shader>>,
    key: PipelineKey,
    pipeline: Option<Handle<Pipeline>>,

    target: RenderTarget,
    bound_target: Option<RenderTarget>,

    streams: SmallVec<[VertexStream; 4]>,
    vertex_buffers: SmallVec<[(BufferResource, u64); 4]>,
    index: Option<IndexBinding>,

    viewports: SmallVec<[Viewport; 1]>,
    scissors: SmallVec<[Rect2D; 1]>,
    push_offset: u32,
    push_data: SmallVec<[u8; 128]>,

    locals: GlobalResourceState,
    set_keys: [DescriptorSetKey; MAX_DESCRIPTOR_SETS],
    set_values: [SmallVec<[ResourceValue; 8]>; MAX_DESCRIPTOR_SETS],
    sets: [Option<Handle<DescriptorSet>>; MAX_DESCRIPTOR_SETS],
}

impl RenderState {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            dirty: DirtyFlags::all(),
            shader: None,
            key: PipelineKey::default(),
            pipeline: None,
            target: Default::default(),
            bound_target: None,
            streams: SmallVec::new(),
            vertex_buffers: SmallVec::new(),
            index: None,
            viewports: SmallVec::new(),
            scissors: SmallVec::new(),
            push_offset: 0,
            push_data: SmallVec::new(),
            locals: GlobalResourceState::new(),
            set_keys: Default::default(),
            set_values: Default::default(),
            sets: Default::default(),
        }
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn shader(&self) -> Option<&Arc<Shader>> {
        self.shader.as_ref()
    }

    pub fn kind(&self) -> Option<PipelineKind> {
        self.shader.as_ref().map(|s| s.kind)
    }

    pub fn key(&self) -> &PipelineKey {
        &self.key
    }

    pub fn pipeline(&self) -> Option<Handle<Pipeline>> {
        self.pipeline
    }

    pub fn descriptor_set(&self, index: usize) -> Option<Handle<DescriptorSet>> {
        self.sets.get(index).copied().flatten()
    }

    pub fn vertex_buffers(&self) -> &[(BufferResource, u64)] {
        &self.vertex_buffers
    }

    pub fn index_buffer(&self) -> Option<&IndexBinding> {
        self.index.as_ref()
    }

    pub fn viewports(&self) -> &[Viewport] {
        &self.viewports
    }

    pub fn scissors(&self) -> &[Rect2D] {
        &self.scissors
    }

    pub fn push_constants(&self) -> (u32, &[u8]) {
        (self.push_offset, &self.push_data)
    }

    pub fn render_target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn locals(&self) -> &GlobalResourceState {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut GlobalResourceState {
        &mut self.locals
    }

    //===------------------------------------------------------------------===//
    // Setters. Each one only marks what actually changed.
    //===------------------------------------------------------------------===//

    pub fn set_shader(&mut self, shader: &Arc<Shader>) {
        if self.shader.as_ref().map(|s| s.handle) == Some(shader.handle) {
            return;
        }
        trace!("shader -> '{}' ({:?})", shader.name, shader.kind);
        self.shader = Some(shader.clone());
        self.key.shader = shader.handle;
        self.key.kind = shader.kind;
        self.dirty |= DirtyFlags::SHADER | DirtyFlags::PIPELINE;
    }

    pub fn set_vertex_streams(&mut self, streams: &[VertexStream]) -> Result<()> {
        if streams.len() > MAX_VERTEX_STREAMS {
            return Err(GPUError::LimitExceeded {
                what: "vertex streams",
                limit: MAX_VERTEX_STREAMS,
                requested: streams.len(),
            });
        }
        if self.streams.as_slice() != streams {
            self.streams = streams.iter().cloned().collect();
            self.dirty |= DirtyFlags::VERTEX_BUFFERS;
        }
        Ok(())
    }

    pub fn set_index_buffer(&mut self, index: Option<IndexBinding>) {
        if self.index != index {
            self.index = index;
            self.dirty |= DirtyFlags::INDEX_BUFFER;
        }
    }

    /// Binds new attachments. Load ops reset to `Load` whenever the views
    /// change.
    pub fn set_render_target(&mut self, colors: &[TextureView], depth: Option<TextureView>) -> Result<()> {
        if self.target.same_views(colors, depth.as_ref()) {
            return Ok(());
        }
        let view_mask = self.target.view_mask;
        self.target = RenderTarget::new(colors, depth)?;
        self.target.view_mask = view_mask;
        self.dirty |= DirtyFlags::RENDER_TARGET;
        Ok(())
    }

    pub fn set_view_mask(&mut self, view_mask: u32) {
        if self.target.view_mask != view_mask {
            self.target.view_mask = view_mask;
            self.dirty |= DirtyFlags::RENDER_TARGET;
        }
    }

    pub fn clear_color(&mut self, index: usize, value: ClearValue) -> Result<()> {
        let attachment = self
            .target
            .colors
            .get_mut(index)
            .ok_or(GPUError::InvalidOperation("clearing an unbound color target"))?;
        Self::set_load(attachment, LoadOp::Clear, value, &mut self.dirty);
        Ok(())
    }

    pub fn clear_depth(&mut self, depth: f32, stencil: u32) -> Result<()> {
        let attachment = self
            .target
            .depth
            .as_mut()
            .ok_or(GPUError::InvalidOperation("clearing an unbound depth target"))?;
        Self::set_load(
            attachment,
            LoadOp::Clear,
            ClearValue::DepthStencil { depth, stencil },
            &mut self.dirty,
        );
        Ok(())
    }

    /// Previous contents of the color target are not needed.
    pub fn discard_color(&mut self, index: usize) -> Result<()> {
        let attachment = self
            .target
            .colors
            .get_mut(index)
            .ok_or(GPUError::InvalidOperation("discarding an unbound color target"))?;
        let clear = attachment.clear;
        Self::set_load(attachment, LoadOp::DontCare, clear, &mut self.dirty);
        Ok(())
    }

    pub fn discard_depth(&mut self) -> Result<()> {
        let attachment = self
            .target
            .depth
            .as_mut()
            .ok_or(GPUError::InvalidOperation("discarding an unbound depth target"))?;
        let clear = attachment.clear;
        Self::set_load(attachment, LoadOp::DontCare, clear, &mut self.dirty);
        Ok(())
    }

    fn set_load(attachment: &mut TargetAttachment, load: LoadOp, clear: ClearValue, dirty: &mut DirtyFlags) {
        if attachment.load != load || attachment.clear != clear {
            attachment.load = load;
            attachment.clear = clear;
            *dirty |= DirtyFlags::RENDER_TARGET;
        }
    }

    pub fn set_blending(&mut self, blend: BlendState) {
        if self.key.blend != blend {
            self.key.blend = blend;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_rasterization(&mut self, raster: RasterizationState) {
        if self.key.raster != raster {
            self.key.raster = raster;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_depth_stencil(&mut self, depth_stencil: DepthStencilState) {
        if self.key.depth_stencil != depth_stencil {
            self.key.depth_stencil = depth_stencil;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_multisampling(&mut self, multisample: MultisampleState) {
        if self.key.multisample != multisample {
            self.key.multisample = multisample;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_topology(&mut self, topology: Topology) {
        if self.key.topology != topology {
            self.key.topology = topology;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_primitive_restart(&mut self, enable: bool) {
        if self.key.primitive_restart != enable {
            self.key.primitive_restart = enable;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) -> Result<()> {
        if viewports.len() > MAX_VIEWPORTS {
            return Err(GPUError::LimitExceeded {
                what: "viewports",
                limit: MAX_VIEWPORTS,
                requested: viewports.len(),
            });
        }
        if self.viewports.as_slice() != viewports {
            self.viewports = viewports.iter().copied().collect();
            self.dirty |= DirtyFlags::VIEWPORT;
        }
        Ok(())
    }

    pub fn set_scissors(&mut self, scissors: &[Rect2D]) -> Result<()> {
        if scissors.len() > MAX_VIEWPORTS {
            return Err(GPUError::LimitExceeded {
                what: "scissors",
                limit: MAX_VIEWPORTS,
                requested: scissors.len(),
            });
        }
        if self.scissors.as_slice() != scissors {
            self.scissors = scissors.iter().copied().collect();
            self.dirty |= DirtyFlags::SCISSOR;
        }
        Ok(())
    }

    pub fn set_push_constants(&mut self, offset: u32, data: &[u8]) {
        if self.push_offset != offset || self.push_data.as_slice() != data {
            self.push_offset = offset;
            self.push_data = SmallVec::from_slice(data);
            self.dirty |= DirtyFlags::PUSH_CONSTANTS;
        }
    }

    //===------------------------------------------------------------------===//
    // Render pass bookkeeping used by the encoder.
    //===------------------------------------------------------------------===//

    /// Records attachment accesses of the bound render target. Clearing or
    /// discarding loads let the tracker skip preserving old contents.
    pub fn record_target_accesses(&self, tracker: &mut ResourceAccessTracker) {
        let target = match &self.bound_target {
            Some(t) => t,
            None => return,
        };
        let owner = QueueOwner::Exclusive(self.queue);
        for color in &target.colors {
            let next = AccessRecord::new(
                StageFlags::COLOR_ATTACHMENT_OUTPUT,
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE,
                Layout::ColorAttachment,
                owner,
            );
            Self::record_attachment(tracker, color, next);
        }
        if let Some(depth) = &target.depth {
            let next = AccessRecord::new(
                StageFlags::EARLY_FRAGMENT_TESTS | StageFlags::LATE_FRAGMENT_TESTS,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                Layout::DepthStencilAttachment,
                owner,
            );
            Self::record_attachment(tracker, depth, next);
        }
    }

    fn record_attachment(tracker: &mut ResourceAccessTracker, attachment: &TargetAttachment, next: AccessRecord) {
        let texture = &attachment.view.texture;
        if !texture.tracking.is_empty() {
            tracker.register(texture.handle, texture.tracking);
        }
        let options = RecordOptions {
            discard: attachment.load != LoadOp::Load,
        };
        tracker.record(
            texture.handle,
            ResourceRange::Image(attachment.view.range),
            next,
            options,
        );
    }

    /// Description of the render pass for the validated render target.
    pub fn begin_info(&self) -> Option<BeginRendering> {
        let target = self.bound_target.as_ref()?;
        Some(BeginRendering {
            area: target.area(),
            colors: target
                .colors
                .iter()
                .map(|c| c.to_attachment(Layout::ColorAttachment))
                .collect(),
            depth: target
                .depth
                .as_ref()
                .map(|d| d.to_attachment(Layout::DepthStencilAttachment)),
            view_mask: target.view_mask,
        })
    }

    /// Once a pass has begun, reopening it must keep what was rendered.
    pub fn consume_load_ops(&mut self) {
        for attachment in self.target.attachments_mut() {
            attachment.load = LoadOp::Load;
        }
        if let Some(bound) = self.bound_target.as_mut() {
            for attachment in bound.attachments_mut() {
                attachment.load = LoadOp::Load;
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Validation
    //===------------------------------------------------------------------===//

    /// Brings every native object the next draw or dispatch needs up to
    /// date and returns the dirty bits the encoder must apply. Bits that do
    /// not apply to the bound pipeline kind stay pending.
    pub fn validate_pipeline<B: Backend>(
        &mut self,
        ctx: &mut DeviceContext<B>,
        fence: &FenceRef,
    ) -> Result<DirtyFlags> {
        let shader = self.shader.clone().ok_or(GPUError::NoShaderBound)?;
        let kind = shader.kind;

        let target_changed = kind.rasterizes() && self.validate_render_target()?;
        if kind == PipelineKind::Graphics
            && self.dirty.intersects(DirtyFlags::SHADER | DirtyFlags::VERTEX_BUFFERS)
        {
            self.validate_vertex_input(&shader, ctx.config.warn_on_partial_vertex_input)?;
        }
        self.validate_descriptor_sets(ctx, &shader, fence)?;
        if target_changed {
            self.bind_render_target(&mut ctx.tracker);
        }
        self.record_resource_accesses(&mut ctx.tracker, &shader);

        if self.dirty.contains(DirtyFlags::PIPELINE) {
            let key = self.key.normalized();
            let pipeline = ctx
                .pipelines
                .get_or_create(&mut ctx.backend, &shader, &key, fence)?;
            self.pipeline = Some(pipeline);
            if !self.push_data.is_empty() {
                self.dirty |= DirtyFlags::PUSH_CONSTANTS;
            }
        }

        let applicable = match kind {
            PipelineKind::Graphics => DirtyFlags::all(),
            PipelineKind::Mesh => !(DirtyFlags::VERTEX_BUFFERS | DirtyFlags::INDEX_BUFFER),
            PipelineKind::Compute | PipelineKind::RayTracing => !DirtyFlags::RASTER_ONLY,
        };
        let mut snapshot = self.dirty & applicable;
        self.dirty &= !applicable;

        let in_use = DirtyFlags::descriptor_sets(shader.set_count());
        if snapshot.contains(DirtyFlags::PIPELINE) {
            snapshot |= in_use;
        }
        snapshot &= !(DirtyFlags::DESCRIPTOR_SETS - in_use);
        trace!("validated '{}': {:?}", shader.name, snapshot);
        Ok(snapshot)
    }

    /// Returns whether the pending target differs from the bound one. The
    /// target is only bound by [`Self::bind_render_target`] once the rest of
    /// validation succeeded, so a failed draw leaves the bit set.
    fn validate_render_target(&mut self) -> Result<bool> {
        if !self.dirty.contains(DirtyFlags::RENDER_TARGET) {
            return Ok(false);
        }
        if self.bound_target.as_ref() == Some(&self.target) {
            self.dirty.remove(DirtyFlags::RENDER_TARGET);
            return Ok(false);
        }
        if self.target.is_empty() {
            return Err(GPUError::InvalidOperation(
                "rasterizing without a render target",
            ));
        }
        Ok(true)
    }

    fn bind_render_target(&mut self, tracker: &mut ResourceAccessTracker) {
        self.bound_target = Some(self.target.clone());
        self.record_target_accesses(tracker);

        let signature = self.target.signature();
        if signature != self.key.targets {
            debug!("render target signature changed: {:?}", signature);
            self.key.targets = signature;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    /// Matches the shader's inputs to stream elements by name and builds the
    /// compact vertex layout. Streams sharing a buffer, stride and rate are
    /// folded into one binding slot.
    fn validate_vertex_input(&mut self, shader: &Shader, warn_partial: bool) -> Result<()> {
        let mut layout = VertexInputLayout::default();
        let mut buffers: SmallVec<[(BufferResource, u64); 4]> = SmallVec::new();
        let mut slot_of: SmallVec<[Option<(u32, u64)>; 8]> = smallvec![None; self.streams.len()];
        let mut matched = 0;

        for input in &shader.vertex_inputs {
            let found = self.streams.iter().enumerate().find_map(|(i, stream)| {
                stream
                    .elements
                    .iter()
                    .find(|e| e.name == input.name)
                    .map(|e| (i, e))
            });
            let (stream_index, element) = match found {
                Some(found) => found,
                None => continue,
            };
            let stream = &self.streams[stream_index];
            let buffer = stream.buffer.ok_or(GPUError::NullVertexBuffer { slot: stream_index })?;

            let (binding, base) = match slot_of[stream_index] {
                Some(slot) => slot,
                None => {
                    let merged = layout
                        .bindings
                        .iter()
                        .zip(buffers.iter())
                        .find(|(b, (buf, base))| {
                            buf.handle == buffer.handle
                                && b.stride == stream.stride
                                && b.rate == stream.rate
                                && stream.offset >= *base
                                && stream.offset - *base < stream.stride as u64
                        })
                        .map(|(b, (_, base))| (b.binding, *base));
                    let slot = match merged {
                        Some(slot) => slot,
                        None => {
                            let binding = layout.bindings.len() as u32;
                            layout.bindings.push(VertexBinding {
                                binding,
                                stride: stream.stride,
                                rate: stream.rate,
                            });
                            buffers.push((buffer, stream.offset));
                            (binding, stream.offset)
                        }
                    };
                    slot_of[stream_index] = Some(slot);
                    slot
                }
            };

            layout.attributes.push(VertexAttribute {
                location: input.location,
                binding,
                format: element.format,
                offset: element.offset + (stream.offset - base) as u32,
            });
            matched += 1;
        }

        if matched < shader.vertex_inputs.len() && warn_partial {
            warn!(
                "shader '{}' reads {} vertex inputs but only {} are bound",
                shader.name,
                shader.vertex_inputs.len(),
                matched
            );
        }

        if layout != self.key.vertex_input {
            self.key.vertex_input = layout;
            self.dirty |= DirtyFlags::PIPELINE;
        }
        if buffers != self.vertex_buffers {
            self.vertex_buffers = buffers;
            self.dirty |= DirtyFlags::VERTEX_BUFFERS;
        } else {
            self.dirty.remove(DirtyFlags::VERTEX_BUFFERS);
        }
        Ok(())
    }

    /// Rebuilds the key of every set the shader uses from the local and
    /// global resource tables, fetching a new set for each key that changed.
    fn validate_descriptor_sets<B: Backend>(
        &mut self,
        ctx: &mut DeviceContext<B>,
        shader: &Shader,
        fence: &FenceRef,
    ) -> Result<()> {
        for (index, layout) in shader.sets.iter().enumerate() {
            let bit = DirtyFlags::descriptor_set(index);
            let key = &mut self.set_keys[index];
            if key.layout_id != layout.layout_id {
                *key = DescriptorSetKey::new(layout.layout_id);
                self.dirty |= bit;
            }

            let mut values: SmallVec<[ResourceValue; 8]> = SmallVec::new();
            for (slot, binding) in layout.bindings.iter().enumerate() {
                let value = self
                    .locals
                    .get(&binding.name)
                    .or_else(|| ctx.globals.get(&binding.name))
                    .ok_or_else(|| GPUError::MissingResourceBinding {
                        set: index as u32,
                        binding: binding.binding,
                        name: binding.name.clone(),
                    })?;
                check_binding(binding, value)?;
                let described = describe_binding(binding, value);
                match key.bindings.get_mut(slot) {
                    Some(existing) if *existing == described => {}
                    Some(existing) => {
                        *existing = described;
                        self.dirty |= bit;
                    }
                    None => {
                        key.bindings.push(described);
                        self.dirty |= bit;
                    }
                }
                values.push(value.clone());
            }
            if key.bindings.len() > layout.bindings.len() {
                key.bindings.truncate(layout.bindings.len());
                self.dirty |= bit;
            }
            if self.sets[index].is_none() {
                self.dirty |= bit;
            }

            if self.dirty.contains(bit) {
                let set = ctx.descriptors.get_or_create(
                    &mut ctx.backend,
                    layout,
                    key,
                    fence,
                    || build_writes(layout, &values),
                )?;
                self.sets[index] = Some(set);
            }
            self.set_values[index] = values;
        }
        Ok(())
    }

    fn record_resource_accesses(&self, tracker: &mut ResourceAccessTracker, shader: &Shader) {
        let owner = QueueOwner::Exclusive(self.queue);
        for (layout, values) in shader.sets.iter().zip(self.set_values.iter()) {
            for (binding, value) in layout.bindings.iter().zip(values.iter()) {
                let (stages, access, image_layout) = binding_access(binding, shader.kind);
                if access.is_empty() {
                    continue;
                }
                for (handle, range, tracking) in value.tracked_elements() {
                    if !tracking.is_empty() {
                        tracker.register(handle, tracking);
                    }
                    let next = match range {
                        ResourceRange::Image(_) => AccessRecord::new(stages, access, image_layout, owner),
                        ResourceRange::Buffer(_) => AccessRecord::buffer(stages, access, owner),
                    };
                    tracker.record(handle, range, next, RecordOptions::default());
                }
            }
        }

        if shader.kind != PipelineKind::Graphics {
            return;
        }
        for (buffer, offset) in &self.vertex_buffers {
            Self::record_buffer(
                tracker,
                buffer,
                *offset,
                AccessRecord::buffer(StageFlags::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ, owner),
            );
        }
        if let Some(index) = &self.index {
            Self::record_buffer(
                tracker,
                &index.buffer,
                index.offset,
                AccessRecord::buffer(StageFlags::VERTEX_INPUT, AccessFlags::INDEX_READ, owner),
            );
        }
    }

    fn record_buffer(tracker: &mut ResourceAccessTracker, buffer: &BufferResource, offset: u64, next: AccessRecord) {
        if !buffer.tracking.is_empty() {
            tracker.register(buffer.handle, buffer.tracking);
        }
        let range = BufferRange::new(offset, buffer.size.saturating_sub(offset));
        tracker.record(
            buffer.handle,
            ResourceRange::Buffer(range),
            next,
            RecordOptions::default(),
        );
    }
}

fn check_binding(binding: &ShaderBinding, value: &ResourceValue) -> Result<()> {
    let mismatch = || GPUError::ResourceTypeMismatch {
        name: binding.name.clone(),
        expected: binding.ty,
    };
    let storage_textures = |views: &[TextureView]| {
        views
            .iter()
            .all(|v| v.texture.usage.contains(TextureUsage::STORAGE))
    };

    let type_ok = match (binding.ty, value) {
        (DescriptorType::SampledImage, ResourceValue::Texture(_))
        | (DescriptorType::SampledImage, ResourceValue::TextureArray(_)) => true,
        (DescriptorType::StorageImage, ResourceValue::Texture(v)) => storage_textures(&[*v]),
        (DescriptorType::StorageImage, ResourceValue::TextureArray(v)) => storage_textures(v),
        (DescriptorType::UniformBuffer, ResourceValue::Buffer(_))
        | (DescriptorType::UniformBuffer, ResourceValue::BufferArray(_)) => true,
        (DescriptorType::StorageBuffer, ResourceValue::Buffer(b)) => {
            b.buffer.usage.contains(BufferUsage::STORAGE)
        }
        (DescriptorType::StorageBuffer, ResourceValue::BufferArray(v)) => {
            v.iter().all(|b| b.buffer.usage.contains(BufferUsage::STORAGE))
        }
        (DescriptorType::Sampler, ResourceValue::Sampler(_)) => true,
        (DescriptorType::AccelerationStructure, ResourceValue::AccelerationStructure(_)) => true,
        _ => false,
    };
    if !type_ok {
        return Err(mismatch());
    }

    let count = value.element_count();
    if !binding.is_array && count != 1 {
        return Err(mismatch());
    }
    if count > binding.count as usize {
        return Err(GPUError::LimitExceeded {
            what: "descriptor array elements",
            limit: binding.count as usize,
            requested: count,
        });
    }
    Ok(())
}

fn describe_binding(binding: &ShaderBinding, value: &ResourceValue) -> DescriptorBinding {
    DescriptorBinding {
        binding: binding.binding,
        ty: binding.ty,
        count: value.element_count() as u32,
        is_array: binding.is_array,
        elements: value
            .identities()
            .into_iter()
            .zip(value.ranges())
            .map(|(resource, range)| DescriptorElement { resource, range })
            .collect(),
    }
}

fn image_layout(ty: DescriptorType) -> Layout {
    match ty {
        DescriptorType::StorageImage => Layout::General,
        _ => Layout::ShaderReadOnly,
    }
}

fn build_writes(layout: &SetLayout, values: &[ResourceValue]) -> Vec<DescriptorWrite> {
    layout
        .bindings
        .iter()
        .zip(values)
        .map(|(binding, value)| {
            let resources = match value {
                ResourceValue::Texture(v) => smallvec![DescriptorResource::Image {
                    image: v.texture.native,
                    range: v.range,
                    layout: image_layout(binding.ty),
                }],
                ResourceValue::TextureArray(views) => views
                    .iter()
                    .map(|v| DescriptorResource::Image {
                        image: v.texture.native,
                        range: v.range,
                        layout: image_layout(binding.ty),
                    })
                    .collect(),
                ResourceValue::Buffer(b) => smallvec![DescriptorResource::Buffer {
                    buffer: b.buffer.native,
                    range: b.range,
                }],
                ResourceValue::BufferArray(views) => views
                    .iter()
                    .map(|b| DescriptorResource::Buffer {
                        buffer: b.buffer.native,
                        range: b.range,
                    })
                    .collect(),
                ResourceValue::Sampler(s) => smallvec![DescriptorResource::Sampler(s.native)],
                ResourceValue::AccelerationStructure(a) => {
                    smallvec![DescriptorResource::AccelerationStructure(a.native)]
                }
            };
            DescriptorWrite {
                binding: binding.binding,
                ty: binding.ty,
                first_element: 0,
                resources,
            }
        })
        .collect()
}

/// Stages, access and image layout a shader binding is used with.
fn binding_access(binding: &ShaderBinding, kind: PipelineKind) -> (StageFlags, AccessFlags, Layout) {
    let mut stages = binding.stages.pipeline_stages();
    if stages.is_empty() {
        stages = match kind {
            PipelineKind::Graphics => StageFlags::VERTEX_SHADER | StageFlags::FRAGMENT_SHADER,
            PipelineKind::Mesh => StageFlags::MESH_SHADER | StageFlags::FRAGMENT_SHADER,
            PipelineKind::Compute => StageFlags::COMPUTE_SHADER,
            PipelineKind::RayTracing => StageFlags::RAY_TRACING_SHADER,
        };
    }
    let write = if binding.writes {
        AccessFlags::SHADER_WRITE
    } else {
        AccessFlags::empty()
    };
    let access = match binding.ty {
        DescriptorType::UniformBuffer => AccessFlags::UNIFORM_READ,
        DescriptorType::StorageBuffer | DescriptorType::StorageImage => AccessFlags::SHADER_READ | write,
        DescriptorType::SampledImage => AccessFlags::SHADER_READ,
        DescriptorType::AccelerationStructure => AccessFlags::ACCELERATION_STRUCTURE_READ,
        DescriptorType::Sampler => AccessFlags::empty(),
    };
    (stages, access, image_layout(binding.ty))
}
