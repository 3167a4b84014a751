use bitflags::bitflags;
use std::fmt;

pub use crate::utils::handle::Handle;

#[cfg(feature = "keel-serde")]
use serde::{Deserialize, Serialize};

/// Native buffer object owned by the backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Buffer;

/// Native image object owned by the backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Image;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Sampler;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AccelerationStructure;

/// Native, compiled per-stage shader module.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShaderModule;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Pipeline;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSet;

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    R8Uint,
    R8Sint,
    RG8Unorm,
    RGBA8Unorm,
    RGBA8Srgb,
    BGRA8Unorm,
    BGRA8Srgb,
    R16Float,
    RGBA16Float,
    R32Uint,
    R32Float,
    RG32Float,
    RGB32Float,
    RGBA32Float,
    RGBA32Uint,
    D16,
    D32,
    D24S8,
    D32S8,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D16 | Format::D32 | Format::D24S8 | Format::D32S8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24S8 | Format::D32S8)
    }

    /// Size of one texel or one vertex element in bytes.
    pub fn size_bytes(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm | Format::R8Uint | Format::R8Sint => 1,
            Format::RG8Unorm | Format::R16Float | Format::D16 => 2,
            Format::RGBA8Unorm
            | Format::RGBA8Srgb
            | Format::BGRA8Unorm
            | Format::BGRA8Srgb
            | Format::R32Uint
            | Format::R32Float
            | Format::D32
            | Format::D24S8 => 4,
            Format::RGBA16Float | Format::RG32Float | Format::D32S8 => 8,
            Format::RGB32Float => 12,
            Format::RGBA32Float | Format::RGBA32Uint => 16,
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub fn size_bytes(self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Transfer,
}

/// Queue family a tracked resource currently belongs to.
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueueOwner {
    /// Concurrent-access resource, no ownership transfers are ever needed.
    #[default]
    Shared,
    Exclusive(QueueType),
}

impl QueueOwner {
    /// True when moving from `self` to `next` needs an ownership transfer.
    pub fn transfers_to(self, next: QueueOwner) -> bool {
        match (self, next) {
            (QueueOwner::Exclusive(a), QueueOwner::Exclusive(b)) => a != b,
            _ => false,
        }
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageFlags: u32 {
        const TOP_OF_PIPE             = 1 << 0;
        const DRAW_INDIRECT           = 1 << 1;
        const VERTEX_INPUT            = 1 << 2;
        const VERTEX_SHADER           = 1 << 3;
        const TASK_SHADER             = 1 << 4;
        const MESH_SHADER             = 1 << 5;
        const FRAGMENT_SHADER         = 1 << 6;
        const EARLY_FRAGMENT_TESTS    = 1 << 7;
        const LATE_FRAGMENT_TESTS     = 1 << 8;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 9;
        const COMPUTE_SHADER          = 1 << 10;
        const RAY_TRACING_SHADER      = 1 << 11;
        const TRANSFER                = 1 << 12;
        const HOST                    = 1 << 13;
        const BOTTOM_OF_PIPE          = 1 << 14;
        const ALL_COMMANDS            = 1 << 15;
    }
}

impl StageFlags {
    /// Stages that may be waited on by a barrier recorded inside a render
    /// pass.
    pub const RENDER_PASS_ELIGIBLE: StageFlags = StageFlags::from_bits_truncate(
        StageFlags::DRAW_INDIRECT.bits()
            | StageFlags::VERTEX_INPUT.bits()
            | StageFlags::VERTEX_SHADER.bits()
            | StageFlags::TASK_SHADER.bits()
            | StageFlags::MESH_SHADER.bits()
            | StageFlags::FRAGMENT_SHADER.bits()
            | StageFlags::EARLY_FRAGMENT_TESTS.bits()
            | StageFlags::LATE_FRAGMENT_TESTS.bits()
            | StageFlags::COLOR_ATTACHMENT_OUTPUT.bits(),
    );
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ          = 1 << 0;
        const INDEX_READ                     = 1 << 1;
        const VERTEX_ATTRIBUTE_READ          = 1 << 2;
        const UNIFORM_READ                   = 1 << 3;
        const SHADER_READ                    = 1 << 4;
        const SHADER_WRITE                   = 1 << 5;
        const COLOR_ATTACHMENT_READ          = 1 << 6;
        const COLOR_ATTACHMENT_WRITE         = 1 << 7;
        const DEPTH_STENCIL_ATTACHMENT_READ  = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 9;
        const TRANSFER_READ                  = 1 << 10;
        const TRANSFER_WRITE                 = 1 << 11;
        const HOST_READ                      = 1 << 12;
        const HOST_WRITE                     = 1 << 13;
        const ACCELERATION_STRUCTURE_READ    = 1 << 14;
    }
}

impl AccessFlags {
    pub const WRITES: AccessFlags = AccessFlags::from_bits_truncate(
        AccessFlags::SHADER_WRITE.bits()
            | AccessFlags::COLOR_ATTACHMENT_WRITE.bits()
            | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.bits()
            | AccessFlags::TRANSFER_WRITE.bits()
            | AccessFlags::HOST_WRITE.bits(),
    );

    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITES)
    }
}

/// Backend-agnostic image layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    #[default]
    Undefined,
    General,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub level_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self {
            base_mip: 0,
            level_count: 1,
            base_layer: 0,
            layer_count: 1,
        }
    }
}

impl SubresourceRange {
    pub fn new(base_mip: u32, level_count: u32, base_layer: u32, layer_count: u32) -> Self {
        Self {
            base_mip,
            level_count,
            base_layer,
            layer_count,
        }
    }

    pub fn mip_end(&self) -> u32 {
        self.base_mip + self.level_count
    }

    pub fn layer_end(&self) -> u32 {
        self.base_layer + self.layer_count
    }

    pub fn is_empty(&self) -> bool {
        self.level_count == 0 || self.layer_count == 0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Part of a resource an access applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRange {
    Buffer(BufferRange),
    Image(SubresourceRange),
}

impl ResourceRange {
    pub fn is_empty(&self) -> bool {
        match self {
            ResourceRange::Buffer(b) => b.size == 0,
            ResourceRange::Image(i) => i.is_empty(),
        }
    }

    pub fn overlaps(&self, other: &ResourceRange) -> bool {
        self.intersection(other).is_some()
    }

    pub fn contains(&self, other: &ResourceRange) -> bool {
        self.intersection(other).as_ref() == Some(other)
    }

    pub fn intersection(&self, other: &ResourceRange) -> Option<ResourceRange> {
        match (self, other) {
            (ResourceRange::Buffer(a), ResourceRange::Buffer(b)) => {
                let start = a.offset.max(b.offset);
                let end = a.end().min(b.end());
                (start < end).then(|| ResourceRange::Buffer(BufferRange::new(start, end - start)))
            }
            (ResourceRange::Image(a), ResourceRange::Image(b)) => {
                let mip0 = a.base_mip.max(b.base_mip);
                let mip1 = a.mip_end().min(b.mip_end());
                let layer0 = a.base_layer.max(b.base_layer);
                let layer1 = a.layer_end().min(b.layer_end());
                (mip0 < mip1 && layer0 < layer1).then(|| {
                    ResourceRange::Image(SubresourceRange::new(
                        mip0,
                        mip1 - mip0,
                        layer0,
                        layer1 - layer0,
                    ))
                })
            }
            _ => None,
        }
    }

    /// Parts of `self` not covered by `other`. At most two pieces for buffers
    /// and four for images.
    pub fn subtract(&self, other: &ResourceRange) -> Vec<ResourceRange> {
        let cut = match self.intersection(other) {
            Some(cut) => cut,
            None => return vec![*self],
        };

        let mut out = Vec::new();
        match (self, cut) {
            (ResourceRange::Buffer(a), ResourceRange::Buffer(c)) => {
                if c.offset > a.offset {
                    out.push(ResourceRange::Buffer(BufferRange::new(a.offset, c.offset - a.offset)));
                }
                if c.end() < a.end() {
                    out.push(ResourceRange::Buffer(BufferRange::new(c.end(), a.end() - c.end())));
                }
            }
            (ResourceRange::Image(a), ResourceRange::Image(c)) => {
                // Mip bands below and above the cut span every layer, the
                // remaining layer slices only span the cut's mips.
                if c.base_mip > a.base_mip {
                    out.push(ResourceRange::Image(SubresourceRange::new(
                        a.base_mip,
                        c.base_mip - a.base_mip,
                        a.base_layer,
                        a.layer_count,
                    )));
                }
                if c.mip_end() < a.mip_end() {
                    out.push(ResourceRange::Image(SubresourceRange::new(
                        c.mip_end(),
                        a.mip_end() - c.mip_end(),
                        a.base_layer,
                        a.layer_count,
                    )));
                }
                if c.base_layer > a.base_layer {
                    out.push(ResourceRange::Image(SubresourceRange::new(
                        c.base_mip,
                        c.level_count,
                        a.base_layer,
                        c.base_layer - a.base_layer,
                    )));
                }
                if c.layer_end() < a.layer_end() {
                    out.push(ResourceRange::Image(SubresourceRange::new(
                        c.base_mip,
                        c.level_count,
                        c.layer_end(),
                        a.layer_end() - c.layer_end(),
                    )));
                }
            }
            _ => out.push(*self),
        }
        out
    }
}

/// Stable identity of a logical resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceId(pub u64);

/// Identity plus a version that is bumped every time the resource's backing
/// storage is recreated (resize, reallocation). Caches compare both so a
/// recreated resource never aliases its stale entries.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct VersionedHandle {
    pub id: ResourceId,
    pub version: u32,
}

impl VersionedHandle {
    pub fn new(id: u64, version: u32) -> Self {
        Self {
            id: ResourceId(id),
            version,
        }
    }

    pub fn next_version(&self) -> Self {
        Self {
            id: self.id,
            version: self.version + 1,
        }
    }
}

impl fmt::Debug for VersionedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Res({}.v{})", self.id.0, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_subtract_splits_around_cut() {
        let whole = ResourceRange::Buffer(BufferRange::new(0, 100));
        let cut = ResourceRange::Buffer(BufferRange::new(40, 20));
        let rest = whole.subtract(&cut);
        assert_eq!(
            rest,
            vec![
                ResourceRange::Buffer(BufferRange::new(0, 40)),
                ResourceRange::Buffer(BufferRange::new(60, 40)),
            ]
        );
    }

    #[test]
    fn image_subtract_covers_remainder_exactly() {
        let whole = ResourceRange::Image(SubresourceRange::new(0, 4, 0, 6));
        let cut = ResourceRange::Image(SubresourceRange::new(1, 2, 2, 2));
        let rest = whole.subtract(&cut);

        let texels = |r: &ResourceRange| match r {
            ResourceRange::Image(i) => i.level_count * i.layer_count,
            _ => 0,
        };
        let covered: u32 = rest.iter().map(texels).sum();
        assert_eq!(covered + texels(&cut), texels(&whole));
        assert!(rest.iter().all(|r| !r.overlaps(&cut)));
    }

    #[test]
    fn disjoint_mips_do_not_overlap() {
        let a = ResourceRange::Image(SubresourceRange::new(0, 1, 0, 1));
        let b = ResourceRange::Image(SubresourceRange::new(1, 1, 0, 1));
        assert!(!a.overlaps(&b));
        assert!(ResourceRange::Image(SubresourceRange::new(0, 2, 0, 1)).contains(&b));
    }

    #[test]
    fn ownership_transfer_only_between_exclusive_queues() {
        let gfx = QueueOwner::Exclusive(QueueType::Graphics);
        let compute = QueueOwner::Exclusive(QueueType::Compute);
        assert!(gfx.transfers_to(compute));
        assert!(!gfx.transfers_to(gfx));
        assert!(!QueueOwner::Shared.transfers_to(compute));
    }
}
