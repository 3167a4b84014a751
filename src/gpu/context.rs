use log::{debug, info, warn};

use super::config::EncoderConfig;
use super::driver::command::CommandSink;
use super::driver::state::ResourceAccessTracker;
use super::driver::types::QueueType;
use super::error::Result;
use super::execution::{CommandEncoder, DescriptorSetCache, PipelineCache};
use super::fence::Timeline;
use super::resources::GlobalResourceState;
use super::Backend;

/// Objects pruned by one [`DeviceContext::end_frame`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub pipelines: usize,
    pub descriptor_sets: usize,
}

/// Owns the backend plus everything shared by the command buffers recorded
/// against it: the caches, the access tracker, the global resource table
/// and one timeline per queue.
pub struct DeviceContext<B: Backend> {
    pub(crate) backend: B,
    pub(crate) config: EncoderConfig,
    pub(crate) pipelines: PipelineCache,
    pub(crate) descriptors: DescriptorSetCache,
    pub(crate) tracker: ResourceAccessTracker,
    pub(crate) globals: GlobalResourceState,
    timelines: [Timeline; 3],
    frame: u64,
}

fn queue_index(queue: QueueType) -> usize {
    match queue {
        QueueType::Graphics => 0,
        QueueType::Compute => 1,
        QueueType::Transfer => 2,
    }
}

impl<B: Backend> DeviceContext<B> {
    /// Wraps `backend`, seeding its pipeline cache from the configured blob.
    pub fn create(mut backend: B, config: EncoderConfig) -> Self {
        if let Some(path) = &config.pipeline_cache_path {
            PipelineCache::load_native_cache(&mut backend, path);
        }
        info!(
            "device context created (pipeline prune delay {}, descriptor prune delay {})",
            config.pipeline_prune_delay, config.descriptor_prune_delay
        );
        Self {
            pipelines: PipelineCache::new(config.pipeline_prune_delay),
            descriptors: DescriptorSetCache::new(config.descriptor_prune_delay),
            tracker: ResourceAccessTracker::new(),
            globals: GlobalResourceState::new(),
            timelines: [Timeline::new(), Timeline::new(), Timeline::new()],
            frame: 0,
            backend,
            config,
        }
    }

    /// Releases every cached object and spills the native pipeline cache.
    /// The device must be idle. Hands the backend back to the caller.
    pub fn destroy(mut self) -> Result<B> {
        for timeline in &self.timelines {
            if timeline.completed() < timeline.last_submitted() {
                warn!(
                    "destroying context with work in flight ({} of {} retired)",
                    timeline.completed(),
                    timeline.last_submitted()
                );
            }
        }

        let saved = match &self.config.pipeline_cache_path {
            Some(path) => PipelineCache::save_native_cache(&self.backend, path),
            None => Ok(()),
        };
        self.pipelines.destroy_all(&mut self.backend);
        self.descriptors.destroy_all(&mut self.backend);
        self.tracker.reset();
        debug!("device context destroyed after {} frames", self.frame);
        saved.map(|_| self.backend)
    }

    /// Starts recording a command buffer for `queue` into `sink`.
    pub fn encoder<S: CommandSink>(&mut self, sink: S, queue: QueueType) -> CommandEncoder<'_, B, S> {
        CommandEncoder::new(self, sink, queue)
    }

    /// Ages both caches by one tick, evicting what went unused long enough
    /// and whose last command buffer has retired.
    pub fn end_frame(&mut self) -> PruneReport {
        self.frame += 1;
        let report = PruneReport {
            pipelines: self.pipelines.prune(&mut self.backend),
            descriptor_sets: self.descriptors.prune(),
        };
        if report.pipelines + report.descriptor_sets > 0 {
            debug!(
                "frame {}: pruned {} pipelines, {} descriptor sets",
                self.frame, report.pipelines, report.descriptor_sets
            );
        }
        report
    }

    /// Publishes that `queue` retired every submission up to `value`.
    pub fn signal(&self, queue: QueueType, value: u64) {
        self.timeline(queue).signal(value);
    }

    pub fn timeline(&self, queue: QueueType) -> &Timeline {
        &self.timelines[queue_index(queue)]
    }

    pub fn timeline_mut(&mut self, queue: QueueType) -> &mut Timeline {
        &mut self.timelines[queue_index(queue)]
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Resource table every encoder falls back to.
    pub fn globals(&self) -> &GlobalResourceState {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalResourceState {
        &mut self.globals
    }

    pub fn tracker(&self) -> &ResourceAccessTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ResourceAccessTracker {
        &mut self.tracker
    }

    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn descriptor_cache(&self) -> &DescriptorSetCache {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::{NullDevice, RecordingSink};

    #[test]
    fn encoders_take_consecutive_fences() {
        let mut ctx = DeviceContext::create(NullDevice::new(), EncoderConfig::default());
        let (_, first, _) = ctx.encoder(RecordingSink::new(), QueueType::Graphics).finish();
        let (_, second, _) = ctx.encoder(RecordingSink::new(), QueueType::Graphics).finish();
        assert_eq!(second.value(), first.value() + 1);
        assert!(!first.is_signaled());

        ctx.signal(QueueType::Graphics, first.value());
        assert!(first.is_signaled());
        assert!(!second.is_signaled());
    }
}
