use std::collections::{HashMap, VecDeque};

use log::debug;
use smallvec::SmallVec;

use crate::gpu::driver::types::{
    AccelerationStructure, Buffer, BufferRange, DescriptorSet, Handle, Image, Layout, ResourceRange,
    Sampler, SubresourceRange, VersionedHandle,
};
use crate::gpu::error::Result;
use crate::gpu::fence::{FenceRef, FenceSet};
use crate::gpu::shader::{DescriptorType, SetLayout};
use crate::gpu::Backend;

use super::CacheStats;

/// ----- Keys used by the cache -------------------------------------------------

/// One bound resource: identity, version and the viewed sub-range.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorElement {
    pub resource: VersionedHandle,
    pub range: Option<ResourceRange>,
}

#[derive(Hash, Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub is_array: bool,
    pub elements: SmallVec<[DescriptorElement; 1]>,
}

/// Ordered bindings of one descriptor set. Two keys built independently from
/// the same resources compare equal.
#[derive(Hash, Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorSetKey {
    pub layout_id: u64,
    pub bindings: SmallVec<[DescriptorBinding; 8]>,
}

impl DescriptorSetKey {
    pub fn new(layout_id: u64) -> Self {
        Self {
            layout_id,
            bindings: SmallVec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// ----- Writes handed to the backend -------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Image {
        image: Handle<Image>,
        range: SubresourceRange,
        layout: Layout,
    },
    Buffer {
        buffer: Handle<Buffer>,
        range: BufferRange,
    },
    Sampler(Handle<Sampler>),
    AccelerationStructure(Handle<AccelerationStructure>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub ty: DescriptorType,
    pub first_element: u32,
    pub resources: SmallVec<[DescriptorResource; 1]>,
}

/// ----- DescriptorSetCache -------------------------------------------------------

struct SetEntry {
    set: Handle<DescriptorSet>,
    last_used: u64,
    fences: FenceSet,
}

/// Written descriptor sets keyed by their bound resources. Evicted sets go
/// back to a per-layout free list and are rewritten on reuse.
pub struct DescriptorSetCache {
    entries: HashMap<DescriptorSetKey, SetEntry>,
    free: HashMap<u64, VecDeque<Handle<DescriptorSet>>>,
    tick: u64,
    prune_delay: u64,
    stats: CacheStats,
}

impl DescriptorSetCache {
    pub fn new(prune_delay: u64) -> Self {
        Self {
            entries: HashMap::new(),
            free: HashMap::new(),
            tick: 0,
            prune_delay,
            stats: Default::default(),
        }
    }

    /// Returns the set for `key`. On a miss a set is allocated (or recycled)
    /// and filled with the writes `build_writes` produces; on a hit nothing is
    /// written. `fence` is added to the fences of every queue that used it.
    pub fn get_or_create<B, F>(
        &mut self,
        backend: &mut B,
        layout: &SetLayout,
        key: &DescriptorSetKey,
        fence: &FenceRef,
        build_writes: F,
    ) -> Result<Handle<DescriptorSet>>
    where
        B: Backend + ?Sized,
        F: FnOnce() -> Vec<DescriptorWrite>,
    {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = self.tick;
            entry.fences.stamp(fence);
            self.stats.hits += 1;
            return Ok(entry.set);
        }

        self.stats.misses += 1;
        let recycled = self
            .free
            .get_mut(&key.layout_id)
            .and_then(|list| list.pop_front());
        let set = match recycled {
            Some(set) => set,
            None => {
                self.stats.created += 1;
                backend.allocate_descriptor_set(layout)?
            }
        };

        let writes = build_writes();
        backend.write_descriptor_set(set, &writes);
        self.stats.writes += 1;
        debug!(
            "wrote descriptor set {:?} (layout {:#x}, {} bindings)",
            set,
            key.layout_id,
            writes.len()
        );

        self.entries.insert(
            key.clone(),
            SetEntry {
                set,
                last_used: self.tick,
                fences: FenceSet::from(fence),
            },
        );
        Ok(set)
    }

    /// Advances the tick and retires sets unused for longer than the prune
    /// delay once all of their fences have signaled. Returns how many were
    /// retired.
    pub fn prune(&mut self) -> usize {
        self.tick += 1;
        let tick = self.tick;
        let delay = self.prune_delay;

        let mut retired = Vec::new();
        self.entries.retain(|key, entry| {
            let keep = entry.last_used + delay >= tick || !entry.fences.is_signaled();
            if !keep {
                retired.push((key.layout_id, entry.set));
            }
            keep
        });

        let count = retired.len();
        for (layout_id, set) in retired {
            self.free.entry(layout_id).or_default().push_back(set);
        }
        if count > 0 {
            debug!("retired {} descriptor sets", count);
        }
        self.stats.destroyed += count as u64;
        count
    }

    /// Frees every set, cached or recycled. Only valid once the device is idle.
    pub fn destroy_all<B: Backend + ?Sized>(&mut self, backend: &mut B) {
        for (_, entry) in self.entries.drain() {
            backend.free_descriptor_set(entry.set);
        }
        for (_, list) in self.free.drain() {
            for set in list {
                backend.free_descriptor_set(set);
            }
        }
    }

    pub fn contains(&self, key: &DescriptorSetKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.free.values().map(|l| l.len()).sum()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
