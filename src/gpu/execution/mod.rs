use bitflags::bitflags;

pub mod descriptor_cache;
pub mod encoder;
pub mod pipeline_cache;
pub mod render_state;

pub use descriptor_cache::*;
pub use encoder::*;
pub use pipeline_cache::*;
pub use render_state::*;

bitflags! {
    /// Encoder state that changed since it was last applied to the command
    /// buffer.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u32 {
        const RENDER_TARGET    = 1 << 0;
        const PIPELINE         = 1 << 1;
        const SHADER           = 1 << 2;
        const VERTEX_BUFFERS   = 1 << 3;
        const INDEX_BUFFER     = 1 << 4;
        const VIEWPORT         = 1 << 5;
        const SCISSOR          = 1 << 6;
        const PUSH_CONSTANTS   = 1 << 7;
        const DESCRIPTOR_SET_0 = 1 << 8;
        const DESCRIPTOR_SET_1 = 1 << 9;
        const DESCRIPTOR_SET_2 = 1 << 10;
        const DESCRIPTOR_SET_3 = 1 << 11;
    }
}

impl DirtyFlags {
    pub const DESCRIPTOR_SETS: DirtyFlags = DirtyFlags::from_bits_truncate(
        DirtyFlags::DESCRIPTOR_SET_0.bits()
            | DirtyFlags::DESCRIPTOR_SET_1.bits()
            | DirtyFlags::DESCRIPTOR_SET_2.bits()
            | DirtyFlags::DESCRIPTOR_SET_3.bits(),
    );

    /// Bits that only mean something to rasterizing pipelines.
    pub const RASTER_ONLY: DirtyFlags = DirtyFlags::from_bits_truncate(
        DirtyFlags::RENDER_TARGET.bits()
            | DirtyFlags::VERTEX_BUFFERS.bits()
            | DirtyFlags::INDEX_BUFFER.bits()
            | DirtyFlags::VIEWPORT.bits()
            | DirtyFlags::SCISSOR.bits(),
    );

    pub fn descriptor_set(index: usize) -> DirtyFlags {
        DirtyFlags::from_bits_truncate(DirtyFlags::DESCRIPTOR_SET_0.bits() << index)
    }

    /// Bits for sets `0..count`.
    pub fn descriptor_sets(count: usize) -> DirtyFlags {
        (0..count).fold(DirtyFlags::empty(), |acc, i| acc | Self::descriptor_set(i))
    }
}

/// Counters kept by the pipeline and descriptor-set caches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Native objects created (descriptor sets recycled from the free list
    /// are not counted).
    pub created: u64,
    pub destroyed: u64,
    /// Descriptor set write batches issued.
    pub writes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_bits_follow_index() {
        assert_eq!(DirtyFlags::descriptor_set(2), DirtyFlags::DESCRIPTOR_SET_2);
        assert_eq!(
            DirtyFlags::descriptor_sets(2),
            DirtyFlags::DESCRIPTOR_SET_0 | DirtyFlags::DESCRIPTOR_SET_1
        );
        assert_eq!(DirtyFlags::descriptor_set(4), DirtyFlags::empty());
    }
}
