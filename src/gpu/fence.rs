//! CPU-side view of GPU progress.
//!
//! Every queue owns a [`Timeline`]. Each submitted command buffer takes the
//! next invocation index of that timeline and the backend publishes the last
//! retired index through [`Timeline::signal`]. A [`FenceRef`] captures the
//! shared counter and the index it must reach, so "is this done?" is a plain
//! load and compare.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

#[derive(Debug, Default)]
pub struct Timeline {
    completed: Arc<AtomicU64>,
    next: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicU64::new(0)),
            next: 1,
        }
    }

    /// Fence for the next piece of work submitted on this timeline.
    pub fn current(&self) -> FenceRef {
        FenceRef {
            counter: Some(self.completed.clone()),
            value: self.next.max(1),
        }
    }

    /// Closes the current invocation and returns its fence.
    pub fn advance(&mut self) -> FenceRef {
        let fence = self.current();
        self.next = fence.value + 1;
        fence
    }

    /// Marks every invocation up to `value` as retired.
    pub fn signal(&self, value: u64) {
        self.completed.fetch_max(value, Ordering::AcqRel);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Fence of the most recently closed invocation.
    pub fn last_submitted(&self) -> u64 {
        self.next.saturating_sub(1)
    }
}

/// Point on a [`Timeline`]. The default fence is always signaled.
#[derive(Debug, Clone, Default)]
pub struct FenceRef {
    counter: Option<Arc<AtomicU64>>,
    value: u64,
}

impl FenceRef {
    pub fn signaled() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_signaled(&self) -> bool {
        match &self.counter {
            Some(counter) => counter.load(Ordering::Acquire) >= self.value,
            None => true,
        }
    }

    /// Spins until signaled or `timeout` passes. Returns whether the fence
    /// signaled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while !self.is_signaled() {
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::yield_now();
        }
        true
    }

    /// Whether both fences count on the same timeline. Signaled defaults
    /// belong to no timeline.
    pub fn same_timeline(&self, other: &FenceRef) -> bool {
        match (&self.counter, &other.counter) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn is_unbound(&self) -> bool {
        self.counter.is_none()
    }

    /// The later of two fences on the same timeline.
    pub fn later(self, other: FenceRef) -> FenceRef {
        match (&self.counter, &other.counter) {
            (None, _) => other,
            (_, None) => self,
            _ if other.value > self.value => other,
            _ => self,
        }
    }
}

impl PartialEq for FenceRef {
    fn eq(&self, other: &Self) -> bool {
        let same_counter = match (&self.counter, &other.counter) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_counter && self.value == other.value
    }
}

impl Eq for FenceRef {}

/// Latest fence per timeline that an object was used under. An object shared
/// by command buffers on several queues is retired only when every one of
/// them has.
#[derive(Debug, Clone, Default)]
pub struct FenceSet {
    fences: SmallVec<[FenceRef; 3]>,
}

impl FenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `fence`, replacing an earlier fence of the same timeline.
    pub fn stamp(&mut self, fence: &FenceRef) {
        if fence.is_unbound() {
            return;
        }
        match self.fences.iter_mut().find(|f| f.same_timeline(fence)) {
            Some(slot) => *slot = slot.clone().later(fence.clone()),
            None => self.fences.push(fence.clone()),
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.fences.iter().all(FenceRef::is_signaled)
    }

    /// First fence still pending, if any.
    pub fn pending(&self) -> Option<&FenceRef> {
        self.fences.iter().find(|f| !f.is_signaled())
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}

impl From<&FenceRef> for FenceSet {
    fn from(fence: &FenceRef) -> Self {
        let mut set = Self::new();
        set.stamp(fence);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_signals_when_counter_reaches_value() {
        let mut timeline = Timeline::new();
        let first = timeline.advance();
        let second = timeline.advance();
        assert_eq!(second.value(), first.value() + 1);
        assert!(!first.is_signaled());

        timeline.signal(first.value());
        assert!(first.is_signaled());
        assert!(!second.is_signaled());

        timeline.signal(second.value());
        assert!(second.is_signaled());
        assert_eq!(timeline.completed(), 2);
    }

    #[test]
    fn signal_never_moves_backwards() {
        let timeline = Timeline::new();
        timeline.signal(5);
        timeline.signal(3);
        assert_eq!(timeline.completed(), 5);
    }

    #[test]
    fn default_fence_is_signaled() {
        assert!(FenceRef::signaled().is_signaled());
        assert!(FenceRef::default().wait(Duration::from_millis(0)));
    }

    #[test]
    fn fence_set_keeps_one_fence_per_timeline() {
        let mut graphics = Timeline::new();
        let mut compute = Timeline::new();
        let g1 = graphics.advance();
        let g2 = graphics.advance();
        let c1 = compute.advance();

        let mut set = FenceSet::from(&g2);
        set.stamp(&g1);
        set.stamp(&c1);
        set.stamp(&FenceRef::signaled());
        assert_eq!(set.len(), 2);

        compute.signal(c1.value());
        graphics.signal(g1.value());
        assert!(!set.is_signaled(), "g2 is still pending");
        assert_eq!(set.pending().map(FenceRef::value), Some(g2.value()));

        graphics.signal(g2.value());
        assert!(set.is_signaled());
        assert!(set.pending().is_none());
    }

    #[test]
    fn wait_times_out_on_pending_fence() {
        let timeline = Timeline::new();
        let fence = timeline.current();
        assert!(!fence.wait(Duration::from_millis(1)));
    }
}
