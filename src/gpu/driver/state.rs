use std::collections::HashMap;

use bitflags::bitflags;
use log::{debug, trace};

use super::command::{BarrierBatch, BufferBarrier, ImageBarrier, MemoryBarrier};
use super::types::{
    AccessFlags, Layout, QueueOwner, ResourceId, ResourceRange, StageFlags, VersionedHandle,
};

/// Pipeline stages paired with the memory accesses they perform.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct AccessScope {
    pub stages: StageFlags,
    pub access: AccessFlags,
}

impl AccessScope {
    pub fn new(stages: StageFlags, access: AccessFlags) -> Self {
        Self { stages, access }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.access.is_empty()
    }
}

impl std::ops::BitOr for AccessScope {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            stages: self.stages | rhs.stages,
            access: self.access | rhs.access,
        }
    }
}

/// Last known state of one resource sub-range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct AccessRecord {
    pub stages: StageFlags,
    pub access: AccessFlags,
    pub queue: QueueOwner,
    pub layout: Layout,
}

impl AccessRecord {
    pub fn new(stages: StageFlags, access: AccessFlags, layout: Layout, queue: QueueOwner) -> Self {
        Self {
            stages,
            access,
            queue,
            layout,
        }
    }

    pub fn buffer(stages: StageFlags, access: AccessFlags, queue: QueueOwner) -> Self {
        Self::new(stages, access, Layout::Undefined, queue)
    }

    pub fn scope(&self) -> AccessScope {
        AccessScope::new(self.stages, self.access)
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TrackingFlags: u8 {
        /// Read-only forever or synchronized externally; never tracked.
        const UNTRACKED  = 1 << 0;
        /// Created for concurrent queue access, ownership transfers are skipped.
        const CONCURRENT = 1 << 1;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RecordOptions {
    /// Previous contents are not needed, transitions start from `Undefined`.
    pub discard: bool,
}

impl RecordOptions {
    pub fn discard() -> Self {
        Self { discard: true }
    }
}

/// One transition waiting for the next [`ResourceAccessTracker::resolve`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transition {
    pub resource: VersionedHandle,
    pub range: ResourceRange,
    pub src: AccessScope,
    pub dst: AccessScope,
    pub old_layout: Layout,
    pub new_layout: Layout,
    pub src_queue: QueueOwner,
    pub dst_queue: QueueOwner,
}

impl Transition {
    fn transfers_ownership(&self) -> bool {
        self.src_queue.transfers_to(self.dst_queue)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
struct RangeState {
    last: AccessRecord,
    /// Most recent write (or layout transition) still to be made visible.
    write: AccessScope,
    /// Stages that read since `write` and already see it.
    reads: StageFlags,
}

impl RangeState {
    /// Moves this range to `next`, returning the barrier scopes if one is
    /// needed.
    fn apply(
        &mut self,
        next: AccessRecord,
        options: RecordOptions,
    ) -> Option<(AccessScope, Layout, QueueOwner)> {
        let prev = self.last;
        if prev == next {
            return None;
        }

        let old_layout = if options.discard {
            Layout::Undefined
        } else {
            prev.layout
        };
        let layout_change = prev.layout != next.layout;
        let transfer = prev.queue.transfers_to(next.queue);
        let dst = next.scope();

        let src = if layout_change || transfer || next.access.is_write() {
            let src = if self.reads.is_empty() {
                self.write
            } else {
                // Write-after-read only has to wait for the readers.
                AccessScope::new(self.reads, AccessFlags::empty())
            };
            (!src.is_empty() || layout_change || transfer).then_some(src)
        } else if self.write.is_empty() || self.reads.contains(next.stages) {
            None
        } else {
            Some(self.write)
        };

        if next.access.is_write() {
            self.write = dst;
            self.reads = StageFlags::empty();
        } else if layout_change || transfer {
            self.write = AccessScope::new(next.stages, AccessFlags::empty());
            self.reads = next.stages;
        } else {
            self.reads |= next.stages;
        }
        self.last = next;

        src.map(|src| (src, old_layout, prev.queue))
    }
}

#[derive(Debug, Clone)]
struct RangeEntry {
    range: ResourceRange,
    state: RangeState,
    seq: u64,
}

#[derive(Debug, Clone)]
struct TrackedResource {
    version: u32,
    flags: TrackingFlags,
    entries: Vec<RangeEntry>,
}

impl TrackedResource {
    fn new(version: u32, flags: TrackingFlags) -> Self {
        Self {
            version,
            flags,
            entries: Vec::new(),
        }
    }
}

/// Records the last access to every tracked resource sub-range and produces
/// the barriers needed to make the next access safe.
///
/// One tracker exists per device. Records outlive command buffers, pending
/// transitions do not (see [`ResourceAccessTracker::clear_barriers`]).
#[derive(Default)]
pub struct ResourceAccessTracker {
    resources: HashMap<ResourceId, TrackedResource>,
    pending: Vec<Transition>,
    seq: u64,
}

impl ResourceAccessTracker {
    pub fn new() -> Self {
        Default::default()
    }

    /// Declares tracking flags for a resource. Resources that are never
    /// registered are tracked with exclusive queue ownership.
    pub fn register(&mut self, handle: VersionedHandle, flags: TrackingFlags) {
        let res = self
            .resources
            .entry(handle.id)
            .or_insert_with(|| TrackedResource::new(handle.version, flags));
        res.flags = flags;
        if res.version != handle.version {
            res.version = handle.version;
            res.entries.clear();
        }
    }

    /// Drops every record of `id`, e.g. when the resource is destroyed.
    pub fn forget(&mut self, id: ResourceId) {
        self.resources.remove(&id);
        self.pending.retain(|t| t.resource.id != id);
    }

    pub fn is_tracked(&self, id: ResourceId) -> bool {
        self.resources
            .get(&id)
            .map_or(true, |r| !r.flags.contains(TrackingFlags::UNTRACKED))
    }

    /// Stores `next` as the current state of `range` and returns the state it
    /// replaces. Any transition needed in between is queued for
    /// [`ResourceAccessTracker::resolve`].
    pub fn record(
        &mut self,
        handle: VersionedHandle,
        range: ResourceRange,
        next: AccessRecord,
        options: RecordOptions,
    ) -> AccessRecord {
        self.seq += 1;
        let seq = self.seq;

        let res = self
            .resources
            .entry(handle.id)
            .or_insert_with(|| TrackedResource::new(handle.version, TrackingFlags::empty()));

        if res.flags.contains(TrackingFlags::UNTRACKED) || range.is_empty() {
            return next;
        }

        if res.version != handle.version {
            debug!(
                "{:?} recreated (v{} -> v{}), dropping its access records",
                handle.id, res.version, handle.version
            );
            res.version = handle.version;
            res.entries.clear();
            self.pending
                .retain(|t| t.resource.id != handle.id || t.resource.version == handle.version);
        }

        let mut next = next;
        if res.flags.contains(TrackingFlags::CONCURRENT) {
            next.queue = QueueOwner::Shared;
        }

        // Split every overlapping record into the part the access covers and
        // the parts it leaves alone.
        let mut previous: Option<(u64, AccessRecord)> = None;
        let mut kept = Vec::with_capacity(res.entries.len() + 4);
        let mut touched = Vec::new();
        for entry in res.entries.drain(..) {
            let cut = match entry.range.intersection(&range) {
                Some(cut) => cut,
                None => {
                    kept.push(entry);
                    continue;
                }
            };

            if previous.map_or(true, |(s, _)| entry.seq > s) {
                previous = Some((entry.seq, entry.state.last));
            }
            for rest in entry.range.subtract(&cut) {
                kept.push(RangeEntry {
                    range: rest,
                    ..entry.clone()
                });
            }
            touched.push(RangeEntry { range: cut, ..entry });
        }

        let mut uncovered = vec![range];
        for entry in &touched {
            uncovered = uncovered
                .into_iter()
                .flat_map(|u| u.subtract(&entry.range))
                .collect();
        }
        touched.extend(uncovered.into_iter().map(|r| RangeEntry {
            range: r,
            state: RangeState::default(),
            seq,
        }));

        for entry in &mut touched {
            if let Some((src, old_layout, src_queue)) = entry.state.apply(next, options) {
                let transition = Transition {
                    resource: handle,
                    range: entry.range,
                    src,
                    dst: next.scope(),
                    old_layout,
                    new_layout: next.layout,
                    src_queue,
                    dst_queue: next.queue,
                };
                trace!("queued {:?}", transition);
                push_pending(&mut self.pending, transition);
            }
            entry.seq = seq;
        }

        // Pieces that ended up in the same state collapse back into one.
        if touched.windows(2).all(|w| w[0].state == w[1].state) {
            if let Some(first) = touched.first() {
                let state = first.state;
                touched = vec![RangeEntry { range, state, seq }];
            }
        }
        kept.extend(touched);
        res.entries = kept;

        previous.map(|(_, r)| r).unwrap_or_default()
    }

    /// Last recorded state overlapping `range`, without touching it. Returns
    /// `None` for untracked or never-recorded resources.
    pub fn retrieve(&self, handle: VersionedHandle, range: ResourceRange) -> Option<AccessRecord> {
        let res = self.resources.get(&handle.id)?;
        if res.flags.contains(TrackingFlags::UNTRACKED) || res.version != handle.version {
            return None;
        }
        res.entries
            .iter()
            .filter(|e| e.range.overlaps(&range))
            .max_by_key(|e| e.seq)
            .map(|e| e.state.last)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Moves every pending transition into `out` as one coalesced batch.
    /// Returns false when nothing was pending.
    pub fn resolve(&mut self, out: &mut BarrierBatch) -> bool {
        out.clear();
        if self.pending.is_empty() {
            return false;
        }

        for t in self.pending.drain(..) {
            match t.range {
                ResourceRange::Buffer(_) if !t.transfers_ownership() => {
                    out.push_memory(MemoryBarrier {
                        src: t.src,
                        dst: t.dst,
                    });
                }
                ResourceRange::Buffer(range) => out.buffers.push(BufferBarrier {
                    buffer: t.resource,
                    range,
                    src: t.src,
                    dst: t.dst,
                    src_queue: t.src_queue,
                    dst_queue: t.dst_queue,
                }),
                ResourceRange::Image(range) => out.push_image(ImageBarrier {
                    image: t.resource,
                    range,
                    src: t.src,
                    dst: t.dst,
                    old_layout: t.old_layout,
                    new_layout: t.new_layout,
                    src_queue: t.src_queue,
                    dst_queue: t.dst_queue,
                }),
            }
        }

        trace!(
            "resolved barrier batch: {} memory, {} buffer, {} image",
            out.memory.len(),
            out.buffers.len(),
            out.images.len()
        );
        !out.is_empty()
    }

    /// Drops pending transitions, keeping the recorded states.
    pub fn clear_barriers(&mut self) {
        self.pending.clear();
    }

    pub fn reset(&mut self) {
        self.resources.clear();
        self.pending.clear();
    }
}

fn push_pending(pending: &mut Vec<Transition>, t: Transition) {
    // Accesses to overlapping ranges before one resolve chain into a single
    // transition per piece, from the first source to the union of
    // destinations. No two pending transitions of a resource overlap.
    let mut uncovered = vec![t.range];
    let mut merged = Vec::with_capacity(pending.len() + 2);
    for p in pending.drain(..) {
        let cut = match p.range.intersection(&t.range) {
            Some(cut) if p.resource == t.resource => cut,
            _ => {
                merged.push(p);
                continue;
            }
        };
        for rest in p.range.subtract(&cut) {
            merged.push(Transition { range: rest, ..p });
        }
        merged.push(Transition {
            range: cut,
            dst: p.dst | t.dst,
            new_layout: t.new_layout,
            dst_queue: t.dst_queue,
            ..p
        });
        uncovered = uncovered
            .into_iter()
            .flat_map(|u| u.subtract(&cut))
            .collect();
    }
    merged.extend(uncovered.into_iter().map(|range| Transition { range, ..t }));
    *pending = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::types::{BufferRange, QueueType, SubresourceRange};

    fn sampled() -> AccessRecord {
        AccessRecord::new(
            StageFlags::FRAGMENT_SHADER,
            AccessFlags::SHADER_READ,
            Layout::ShaderReadOnly,
            QueueOwner::Exclusive(QueueType::Graphics),
        )
    }

    fn color_write() -> AccessRecord {
        AccessRecord::new(
            StageFlags::COLOR_ATTACHMENT_OUTPUT,
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            Layout::ColorAttachment,
            QueueOwner::Exclusive(QueueType::Graphics),
        )
    }

    fn mip(level: u32) -> ResourceRange {
        ResourceRange::Image(SubresourceRange::new(level, 1, 0, 1))
    }

    #[test]
    fn same_access_twice_is_idempotent() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(1, 0);
        let mut batch = BarrierBatch::default();

        tracker.record(tex, mip(0), sampled(), RecordOptions::default());
        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.images[0].old_layout, Layout::Undefined);

        let prev = tracker.record(tex, mip(0), sampled(), RecordOptions::default());
        assert_eq!(prev, sampled());
        assert!(!tracker.resolve(&mut batch));
    }

    #[test]
    fn write_then_read_needs_barrier() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(1, 0);
        let mut batch = BarrierBatch::default();

        tracker.record(tex, mip(0), color_write(), RecordOptions::default());
        tracker.resolve(&mut batch);
        tracker.record(tex, mip(0), sampled(), RecordOptions::default());
        assert!(tracker.resolve(&mut batch));

        let barrier = batch.images[0];
        assert_eq!(barrier.src.access, AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(barrier.old_layout, Layout::ColorAttachment);
        assert_eq!(barrier.new_layout, Layout::ShaderReadOnly);
    }

    #[test]
    fn mips_are_tracked_independently() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(3, 0);
        let whole = ResourceRange::Image(SubresourceRange::new(0, 2, 0, 1));
        let mut batch = BarrierBatch::default();

        tracker.record(tex, whole, sampled(), RecordOptions::default());
        tracker.resolve(&mut batch);

        let prev = tracker.record(tex, mip(1), color_write(), RecordOptions::default());
        assert_eq!(prev, sampled());
        assert_eq!(tracker.retrieve(tex, mip(0)), Some(sampled()));
        assert_eq!(tracker.retrieve(tex, mip(1)), Some(color_write()));

        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.images.len(), 1);
        assert_eq!(batch.images[0].range, SubresourceRange::new(1, 1, 0, 1));
    }

    #[test]
    fn adjacent_image_ranges_merge_in_one_batch() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(4, 0);
        let mut batch = BarrierBatch::default();

        tracker.record(tex, mip(0), sampled(), RecordOptions::default());
        tracker.record(tex, mip(1), sampled(), RecordOptions::default());
        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.images.len(), 1);
        assert_eq!(batch.images[0].range, SubresourceRange::new(0, 2, 0, 1));
    }

    #[test]
    fn overlapping_pending_transitions_never_overlap_in_the_batch() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(11, 0);
        let whole = ResourceRange::Image(SubresourceRange::new(0, 2, 0, 1));
        let mut batch = BarrierBatch::default();

        tracker.record(tex, whole, color_write(), RecordOptions::default());
        tracker.record(tex, mip(0), sampled(), RecordOptions::default());
        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.images.len(), 2);

        let (a, b) = (batch.images[0], batch.images[1]);
        assert!(!ResourceRange::Image(a.range).overlaps(&ResourceRange::Image(b.range)));

        let find = |level| {
            batch
                .images
                .iter()
                .find(|i| i.range == SubresourceRange::new(level, 1, 0, 1))
                .copied()
        };
        let base = find(0).expect("mip 0 barrier");
        assert_eq!(base.old_layout, Layout::Undefined);
        assert_eq!(base.new_layout, Layout::ShaderReadOnly);
        assert!(base.dst.stages.contains(StageFlags::FRAGMENT_SHADER | StageFlags::COLOR_ATTACHMENT_OUTPUT));

        let rest = find(1).expect("mip 1 barrier");
        assert_eq!(rest.old_layout, Layout::Undefined);
        assert_eq!(rest.new_layout, Layout::ColorAttachment);
    }

    #[test]
    fn buffer_transitions_coalesce_into_memory_barriers() {
        let mut tracker = ResourceAccessTracker::new();
        let gfx = QueueOwner::Exclusive(QueueType::Graphics);
        let write = AccessRecord::buffer(StageFlags::COMPUTE_SHADER, AccessFlags::SHADER_WRITE, gfx);
        let read = AccessRecord::buffer(StageFlags::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ, gfx);
        let mut batch = BarrierBatch::default();

        for id in 0..3 {
            let buf = VersionedHandle::new(10 + id, 0);
            let range = ResourceRange::Buffer(BufferRange::new(0, 256));
            tracker.record(buf, range, write, RecordOptions::default());
        }
        // First writes to fresh buffers need nothing.
        assert!(!tracker.resolve(&mut batch));

        for id in 0..3 {
            let buf = VersionedHandle::new(10 + id, 0);
            let range = ResourceRange::Buffer(BufferRange::new(0, 256));
            tracker.record(buf, range, read, RecordOptions::default());
        }
        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.memory.len(), 1);
        assert!(batch.buffers.is_empty());
    }

    #[test]
    fn queue_change_emits_ownership_transfer() {
        let mut tracker = ResourceAccessTracker::new();
        let buf = VersionedHandle::new(7, 0);
        let range = ResourceRange::Buffer(BufferRange::new(0, 64));
        let mut batch = BarrierBatch::default();

        let gfx_read = AccessRecord::buffer(
            StageFlags::VERTEX_SHADER,
            AccessFlags::SHADER_READ,
            QueueOwner::Exclusive(QueueType::Graphics),
        );
        let compute_read = AccessRecord::buffer(
            StageFlags::COMPUTE_SHADER,
            AccessFlags::SHADER_READ,
            QueueOwner::Exclusive(QueueType::Compute),
        );
        tracker.record(buf, range, gfx_read, RecordOptions::default());
        tracker.record(buf, range, compute_read, RecordOptions::default());
        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.buffers.len(), 1);
        assert_eq!(batch.buffers[0].dst_queue, QueueOwner::Exclusive(QueueType::Compute));
    }

    #[test]
    fn concurrent_resources_never_transfer() {
        let mut tracker = ResourceAccessTracker::new();
        let buf = VersionedHandle::new(8, 0);
        tracker.register(buf, TrackingFlags::CONCURRENT);
        let range = ResourceRange::Buffer(BufferRange::new(0, 64));
        let mut batch = BarrierBatch::default();

        let read = |q| {
            AccessRecord::buffer(
                StageFlags::COMPUTE_SHADER,
                AccessFlags::SHADER_READ,
                QueueOwner::Exclusive(q),
            )
        };
        tracker.record(buf, range, read(QueueType::Graphics), RecordOptions::default());
        tracker.record(buf, range, read(QueueType::Compute), RecordOptions::default());
        assert!(!tracker.resolve(&mut batch));
    }

    #[test]
    fn untracked_resources_skip_everything() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(9, 0);
        tracker.register(tex, TrackingFlags::UNTRACKED);
        assert!(!tracker.is_tracked(tex.id));

        tracker.record(tex, mip(0), color_write(), RecordOptions::default());
        assert!(!tracker.has_pending());
        assert_eq!(tracker.retrieve(tex, mip(0)), None);
    }

    #[test]
    fn new_version_starts_from_undefined() {
        let mut tracker = ResourceAccessTracker::new();
        let v1 = VersionedHandle::new(5, 1);
        let mut batch = BarrierBatch::default();

        tracker.record(v1, mip(0), sampled(), RecordOptions::default());
        tracker.resolve(&mut batch);

        let v2 = v1.next_version();
        let prev = tracker.record(v2, mip(0), sampled(), RecordOptions::default());
        assert_eq!(prev, AccessRecord::default());
        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.images[0].image, v2);
        assert_eq!(batch.images[0].old_layout, Layout::Undefined);
    }

    #[test]
    fn discard_transitions_from_undefined() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(6, 0);
        let mut batch = BarrierBatch::default();

        tracker.record(tex, mip(0), sampled(), RecordOptions::default());
        tracker.resolve(&mut batch);
        tracker.record(tex, mip(0), color_write(), RecordOptions::discard());
        assert!(tracker.resolve(&mut batch));
        assert_eq!(batch.images[0].old_layout, Layout::Undefined);
        // Write-after-read waits on the reader only.
        assert_eq!(batch.images[0].src.stages, StageFlags::FRAGMENT_SHADER);
        assert!(batch.images[0].src.access.is_empty());
    }

    #[test]
    fn clear_barriers_keeps_records() {
        let mut tracker = ResourceAccessTracker::new();
        let tex = VersionedHandle::new(2, 0);
        tracker.record(tex, mip(0), color_write(), RecordOptions::default());
        assert!(tracker.has_pending());
        tracker.clear_barriers();
        assert!(!tracker.has_pending());
        assert_eq!(tracker.retrieve(tex, mip(0)), Some(color_write()));
    }
}
