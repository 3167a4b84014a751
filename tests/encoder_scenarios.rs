mod common;

use std::sync::Arc;

use common::*;
use keel::gpu::driver::command::{Dispatch, Draw, DrawIndexed};
use keel::gpu::driver::types::{Format, Layout, StageFlags, VersionedHandle};
use keel::gpu::null::{RecordedCommand, RecordingSink};
use keel::gpu::resources::{BufferUsage, VertexElement, VertexStream};
use keel::gpu::shader::{PipelineKind, Shader, ShaderStageFlags};
use keel::gpu::{
    BlendState, ClearValue, ColorBlendState, CullMode, DepthStencilState, Filter, GPUError, LoadOp,
    MultisampleState, RasterizationState, Viewport,
};
use keel::{Handle, IndexType, QueueType};

fn triangle() -> Draw {
    Draw {
        vertex_count: 3,
        instance_count: 1,
        ..Default::default()
    }
}

fn one_group() -> Dispatch {
    Dispatch { x: 1, y: 1, z: 1 }
}

#[test]
fn redrawing_into_the_same_target_reuses_pass_and_pipeline() {
    let mut ctx = context();
    let albedo = texture(10, [64, 64]);
    ctx.globals_mut().set_texture("albedo", &albedo);
    let shader = textured_shader(1);
    let target = color_target(2);

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&shader);
    enc.set_render_target(&[target.view()], None).unwrap();
    enc.draw(triangle()).unwrap();

    enc.set_shader(&shader);
    enc.set_render_target(&[target.view()], None).unwrap();
    enc.draw(triangle()).unwrap();
    let (sink, _, stats) = enc.finish();

    assert_eq!(stats.render_passes, 1);
    assert_eq!(stats.draws, 2);
    assert_eq!(passes(&sink), 1);
    assert_eq!(sink.count(is_bind_pipeline), 1);
    assert_eq!(sink.count(is_barrier), 1);
    assert_eq!(ctx.pipeline_cache().stats().misses, 1);
    assert_eq!(ctx.pipeline_cache().stats().hits, 0);
    assert_eq!(ctx.descriptor_cache().stats().writes, 1);
}

#[test]
fn swapping_to_a_same_format_target_keeps_the_pipeline() {
    let mut ctx = context();
    let albedo = texture(10, [64, 64]);
    ctx.globals_mut().set_texture("albedo", &albedo);
    let shader = textured_shader(1);

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&shader);
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    enc.draw(triangle()).unwrap();
    enc.set_render_target(&[color_target(3).view()], None).unwrap();
    enc.draw(triangle()).unwrap();
    let (sink, _, _) = enc.finish();

    assert_eq!(passes(&sink), 2);
    assert_eq!(sink.count(is_bind_pipeline), 1);
    assert_eq!(ctx.pipeline_cache().stats().misses, 1);
}

#[test]
fn restating_fixed_function_state_binds_nothing_new() {
    let mut ctx = context();
    ctx.globals_mut().set_texture("albedo", &texture(10, [64, 64]));
    let shader = textured_shader(1);
    let blend = BlendState::uniform(ColorBlendState::alpha_blended());
    let raster = RasterizationState {
        culling: CullMode::None,
        ..Default::default()
    };
    let depth = DepthStencilState {
        depth_test: true,
        ..Default::default()
    };
    let msaa = MultisampleState {
        alpha_to_coverage: true,
        ..Default::default()
    };

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&shader);
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    for _ in 0..2 {
        enc.set_blending(blend);
        enc.set_rasterization(raster);
        enc.set_depth_stencil(depth);
        enc.set_multisampling(msaa);
        enc.draw(triangle()).unwrap();
    }
    let first = enc.state().pipeline();

    enc.set_blending(BlendState::default());
    enc.draw(triangle()).unwrap();
    let second = enc.state().pipeline();
    let (sink, _, _) = enc.finish();

    assert_ne!(first, second);
    assert_eq!(sink.count(is_bind_pipeline), 2);
    assert_eq!(ctx.pipeline_cache().stats().misses, 2);
    assert_eq!(ctx.pipeline_cache().stats().hits, 0);
}

#[test]
fn resized_texture_rewrites_its_set_and_transitions_new_storage() {
    let mut ctx = context();
    let shader = textured_shader(1);
    let target = color_target(2);
    let albedo = texture(10, [64, 64]);

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&shader);
    enc.set_render_target(&[target.view()], None).unwrap();
    enc.set_texture("albedo", &albedo);
    enc.draw(triangle()).unwrap();

    let resized = albedo.resized(Handle::new(99, 1), [128, 128, 1]);
    assert_eq!(resized.handle, VersionedHandle::new(10, 1));
    enc.set_texture("albedo", &resized);
    enc.draw(triangle()).unwrap();
    let (sink, _, stats) = enc.finish();

    assert_eq!(ctx.descriptor_cache().stats().misses, 2);
    assert_eq!(ctx.descriptor_cache().stats().writes, 2);
    assert_eq!(ctx.backend().descriptor_writes(), 2);
    assert_eq!(ctx.pipeline_cache().stats().misses, 1);

    let barrier_at = sink
        .position(|c| match c {
            RecordedCommand::PipelineBarrier(batch) => batch.images.iter().any(|b| b.image == resized.handle),
            _ => false,
        })
        .expect("no barrier for the resized texture");
    let batch = match &sink.commands[barrier_at] {
        RecordedCommand::PipelineBarrier(batch) => batch,
        _ => unreachable!(),
    };
    let image = batch.images.iter().find(|b| b.image == resized.handle).unwrap();
    assert_eq!(image.old_layout, Layout::Undefined);
    assert_eq!(image.new_layout, Layout::ShaderReadOnly);

    // The image barrier is illegal inside the pass, so it gets reopened.
    assert_eq!(stats.render_passes, 2);
    let end_at = sink.position(is_end).unwrap();
    assert!(end_at < barrier_at);
    assert!(sink.commands[barrier_at..].iter().any(is_begin));
    assert!(sink.commands[barrier_at..]
        .iter()
        .any(|c| matches!(c, RecordedCommand::BindDescriptorSet(_))));
}

#[test]
fn dispatch_after_draw_closes_the_pass_first() {
    let mut ctx = context();
    let particles = buffer(20, 4096, BufferUsage::VERTEX | BufferUsage::STORAGE);
    ctx.globals_mut().set_buffer("particles", &particles);

    let draw_shader = Arc::new(
        Shader::new(
            VersionedHandle::new(3, 0),
            "points",
            ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
        )
        .unwrap()
        .with_vertex_inputs(&[("position", Format::RGBA32Float)])
        .unwrap(),
    );
    let sim_shader = particle_shader(4);

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&draw_shader);
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    enc.set_vertex_streams(&[VertexStream::new(
        &particles,
        16,
        &[VertexElement::new("position", Format::RGBA32Float, 0)],
    )])
    .unwrap();
    enc.draw(triangle()).unwrap();
    assert!(enc.in_render_pass());

    enc.set_shader(&sim_shader);
    enc.dispatch(one_group()).unwrap();
    assert!(!enc.in_render_pass());
    let (sink, _, _) = enc.finish();

    let end_at = sink.position(is_end).unwrap();
    let dispatch_at = sink.position(|c| matches!(c, RecordedCommand::Dispatch(_))).unwrap();
    let compute_bind_at = sink
        .position(|c| matches!(c, RecordedCommand::BindPipeline(b) if b.kind == PipelineKind::Compute))
        .unwrap();
    let war_at = sink
        .position(|c| match c {
            RecordedCommand::PipelineBarrier(batch) => batch.dst_stages().contains(StageFlags::COMPUTE_SHADER),
            _ => false,
        })
        .expect("write after vertex read needs a barrier");

    assert!(end_at < war_at);
    assert!(war_at < compute_bind_at);
    assert!(compute_bind_at < dispatch_at);
    assert_eq!(sink.count(is_end), 1);
}

#[test]
fn indirect_arguments_wait_for_the_writer() {
    let mut ctx = context();
    let args = buffer(30, 256, BufferUsage::INDIRECT | BufferUsage::STORAGE);
    ctx.globals_mut().set_buffer("particles", &args);
    ctx.globals_mut().set_texture("albedo", &texture(10, [16, 16]));

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&particle_shader(4));
    enc.dispatch(one_group()).unwrap();

    enc.set_shader(&textured_shader(1));
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    enc.draw_indirect(&args, 0, 1, 16).unwrap();
    let (sink, _, stats) = enc.finish();

    let indirect_at = sink
        .position(|c| matches!(c, RecordedCommand::DrawIndirect(_)))
        .unwrap();
    let barrier_at = sink
        .position(|c| match c {
            RecordedCommand::PipelineBarrier(batch) => batch
                .memory
                .iter()
                .any(|m| m.src.stages.contains(StageFlags::COMPUTE_SHADER)
                    && m.dst.stages.contains(StageFlags::DRAW_INDIRECT)),
            _ => false,
        })
        .expect("indirect read must wait for the compute write");
    assert!(barrier_at < sink.position(is_begin).unwrap());
    assert!(barrier_at < indirect_at);
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.dispatches, 1);
}

#[test]
fn default_viewport_covers_the_target() {
    let mut ctx = context();
    ctx.globals_mut().set_texture("albedo", &texture(10, [16, 16]));

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&textured_shader(1));
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    enc.draw(triangle()).unwrap();
    let (sink, _, _) = enc.finish();

    let viewports = sink
        .commands
        .iter()
        .find_map(|c| match c {
            RecordedCommand::SetViewports(v) => Some(v.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(viewports.len(), 1);
    assert_eq!(viewports[0].area.w, 128.0);
    assert_eq!(viewports[0].area.h, 128.0);
}

#[test]
fn explicit_viewports_are_applied_once() {
    let mut ctx = context();
    ctx.globals_mut().set_texture("albedo", &texture(10, [16, 16]));

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&textured_shader(1));
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    enc.set_viewports(&[Viewport::default()]).unwrap();
    enc.draw(triangle()).unwrap();
    enc.set_viewports(&[Viewport::default()]).unwrap();
    enc.draw(triangle()).unwrap();
    let (sink, _, _) = enc.finish();

    assert_eq!(sink.count(|c| matches!(c, RecordedCommand::SetViewports(_))), 1);
}

#[test]
fn cleared_target_loads_after_reopen() {
    let mut ctx = context();
    let albedo = texture(10, [16, 16]);
    let shader = textured_shader(1);
    let target = color_target(2);
    let depth = depth_target(3);

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&shader);
    enc.set_texture("albedo", &albedo);
    enc.set_render_target(&[target.view()], Some(depth.view())).unwrap();
    enc.clear_color(0, ClearValue::Color([0.0, 0.0, 0.0, 1.0])).unwrap();
    enc.clear_depth(1.0, 0).unwrap();
    enc.draw(triangle()).unwrap();

    // A freshly written texture forces the pass to close and reopen.
    enc.set_texture("albedo", &albedo.resized(Handle::new(98, 1), [16, 16, 1]));
    enc.draw(triangle()).unwrap();
    let (sink, _, _) = enc.finish();

    let begins: Vec<_> = sink
        .commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRendering(info) => Some(info.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(begins.len(), 2);
    assert_eq!(begins[0].colors[0].load, LoadOp::Clear);
    assert_eq!(begins[0].depth.unwrap().load, LoadOp::Clear);
    assert_eq!(begins[1].colors[0].load, LoadOp::Load);
    assert_eq!(begins[1].depth.unwrap().load, LoadOp::Load);
}

#[test]
fn indexed_draw_binds_the_index_buffer() {
    let mut ctx = context();
    ctx.globals_mut().set_texture("albedo", &texture(10, [16, 16]));
    let indices = buffer(40, 1024, BufferUsage::INDEX);

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&textured_shader(1));
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    let missing = enc.draw_indexed(DrawIndexed {
        index_count: 3,
        instance_count: 1,
        ..Default::default()
    });
    assert!(matches!(missing, Err(GPUError::InvalidOperation(_))));

    enc.set_index_buffer(&indices, 0, IndexType::U16);
    enc.draw_indexed(DrawIndexed {
        index_count: 3,
        instance_count: 1,
        ..Default::default()
    })
    .unwrap();
    let (sink, _, _) = enc.finish();

    assert_eq!(sink.count(|c| matches!(c, RecordedCommand::BindIndexBuffer(_))), 1);
    assert_eq!(sink.count(|c| matches!(c, RecordedCommand::DrawIndexed(_))), 1);
}

#[test]
fn precondition_violations_fail_fast() {
    let mut ctx = context();
    ctx.globals_mut().set_texture("albedo", &texture(10, [16, 16]));

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    assert!(matches!(enc.draw(triangle()), Err(GPUError::NoShaderBound)));

    enc.set_shader(&textured_shader(1));
    assert!(matches!(enc.draw(triangle()), Err(GPUError::InvalidOperation(_))));
    assert!(matches!(enc.dispatch(one_group()), Err(GPUError::InvalidOperation(_))));

    enc.set_shader(&particle_shader(4));
    let missing = enc.dispatch(one_group());
    assert!(matches!(missing, Err(GPUError::MissingResourceBinding { set: 0, binding: 0, .. })));
    let (sink, _, stats) = enc.finish();
    assert_eq!(stats.draws + stats.dispatches, 0);
    assert!(!sink.commands.iter().any(|c| c.is_draw() || c.is_dispatch()));
}

#[test]
fn debug_scopes_must_balance() {
    let mut ctx = context();
    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    assert!(enc.end_debug_scope().is_err());

    enc.begin_debug_scope("frame", [1.0, 1.0, 1.0, 1.0]);
    enc.begin_debug_scope("shadows", [0.5, 0.5, 0.5, 1.0]);
    enc.end_debug_scope().unwrap();
    let (sink, _, _) = enc.finish();

    let begins = sink.count(|c| matches!(c, RecordedCommand::DebugMarkerBegin(_)));
    let ends = sink.count(|c| matches!(c, RecordedCommand::DebugMarkerEnd));
    assert_eq!(begins, 2);
    assert_eq!(ends, 2);
}

#[test]
fn transfers_close_the_pass_and_validate_arguments() {
    let mut ctx = context();
    ctx.globals_mut().set_texture("albedo", &texture(10, [16, 16]));
    let staging = buffer(50, 4096, BufferUsage::TRANSFER_SRC);
    let dst = buffer(51, 4096, BufferUsage::TRANSFER_DST | BufferUsage::VERTEX);
    let image = texture(11, [32, 32]);

    let mut enc = ctx.encoder(RecordingSink::new(), QueueType::Graphics);
    enc.set_shader(&textured_shader(1));
    enc.set_render_target(&[color_target(2).view()], None).unwrap();
    enc.draw(triangle()).unwrap();

    enc.copy_buffer(&staging, &dst, 0, 0, 1024).unwrap();
    assert!(!enc.in_render_pass());
    assert!(enc.copy_buffer(&staging, &dst, 4000, 0, 1024).is_err());

    assert!(matches!(
        enc.update_buffer(&dst, 2, &[0u8; 8]),
        Err(GPUError::InvalidOperation(_))
    ));
    assert!(matches!(
        enc.update_buffer(&dst, 0, &vec![0u8; 65540]),
        Err(GPUError::LimitExceeded { .. })
    ));
    enc.update_buffer(&dst, 16, &[1u8; 64]).unwrap();

    enc.upload_texture(&staging, 0, image.view()).unwrap();
    assert!(enc.blit(image.view(), image.view(), Filter::Linear).is_err());
    enc.blit(image.view(), color_target(2).view(), Filter::Linear).unwrap();
    assert!(enc
        .clear(image.view(), ClearValue::DepthStencil { depth: 1.0, stencil: 0 })
        .is_err());
    enc.clear(image.view(), ClearValue::Color([0.0; 4])).unwrap();
    let (sink, _, stats) = enc.finish();

    assert_eq!(stats.transfers, 5);
    assert_eq!(sink.count(is_end), 1);

    // The upload writes the image, so the blit reading it needs a barrier.
    let upload_at = sink
        .position(|c| matches!(c, RecordedCommand::CopyBufferToImage(_)))
        .unwrap();
    let blit_at = sink.position(|c| matches!(c, RecordedCommand::BlitImage(_))).unwrap();
    assert!(sink.commands[upload_at..blit_at].iter().any(is_barrier));
}

#[test]
fn finish_hands_out_the_encoder_fence() {
    let mut ctx = context();
    let enc = ctx.encoder(RecordingSink::new(), QueueType::Compute);
    let expected = enc.fence().value();
    let (_, fence, _) = enc.finish();
    assert_eq!(fence.value(), expected);
    assert_eq!(ctx.timeline(QueueType::Compute).last_submitted(), expected);
    assert!(!fence.is_signaled());
    ctx.signal(QueueType::Compute, expected);
    assert!(fence.is_signaled());
}
