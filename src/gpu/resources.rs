use std::collections::HashMap;

use bitflags::bitflags;
use smallvec::SmallVec;

use super::driver::state::TrackingFlags;
use super::driver::types::{
    AccelerationStructure, Buffer, BufferRange, Format, Handle, Image, IndexType, ResourceRange, Sampler,
    SubresourceRange, VersionedHandle,
};
use super::structs::{SampleCount, VertexRate};

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX       = 1 << 0;
        const INDEX        = 1 << 1;
        const UNIFORM      = 1 << 2;
        const STORAGE      = 1 << 3;
        const INDIRECT     = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED      = 1 << 0;
        const STORAGE      = 1 << 1;
        const COLOR_TARGET = 1 << 2;
        const DEPTH_TARGET = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

/// Buffer as seen by the encoder: identity, native handle and shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferResource {
    pub handle: VersionedHandle,
    pub native: Handle<Buffer>,
    pub size: u64,
    pub usage: BufferUsage,
    pub tracking: TrackingFlags,
}

impl BufferResource {
    pub fn new(handle: VersionedHandle, native: Handle<Buffer>, size: u64, usage: BufferUsage) -> Self {
        Self {
            handle,
            native,
            size,
            usage,
            tracking: TrackingFlags::empty(),
        }
    }

    pub fn with_tracking(mut self, tracking: TrackingFlags) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn whole(&self) -> BufferRange {
        BufferRange::new(0, self.size)
    }

    /// Backing storage was replaced, e.g. by a grow.
    pub fn reallocated(&self, native: Handle<Buffer>, size: u64) -> Self {
        Self {
            handle: self.handle.next_version(),
            native,
            size,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureResource {
    pub handle: VersionedHandle,
    pub native: Handle<Image>,
    pub format: Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: SampleCount,
    pub usage: TextureUsage,
    pub tracking: TrackingFlags,
}

impl TextureResource {
    pub fn new(
        handle: VersionedHandle,
        native: Handle<Image>,
        format: Format,
        extent: [u32; 3],
        usage: TextureUsage,
    ) -> Self {
        Self {
            handle,
            native,
            format,
            extent,
            mip_levels: 1,
            array_layers: 1,
            samples: SampleCount::S1,
            usage,
            tracking: TrackingFlags::empty(),
        }
    }

    pub fn with_mips(mut self, mip_levels: u32, array_layers: u32) -> Self {
        self.mip_levels = mip_levels;
        self.array_layers = array_layers;
        self
    }

    pub fn with_samples(mut self, samples: SampleCount) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_tracking(mut self, tracking: TrackingFlags) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange::new(0, self.mip_levels, 0, self.array_layers)
    }

    /// The texture was recreated at a new size. Same identity, new version.
    pub fn resized(&self, native: Handle<Image>, extent: [u32; 3]) -> Self {
        Self {
            handle: self.handle.next_version(),
            native,
            extent,
            ..*self
        }
    }

    pub fn view(&self) -> TextureView {
        TextureView {
            texture: *self,
            range: self.full_range(),
        }
    }

    pub fn mip_view(&self, mip: u32) -> TextureView {
        TextureView {
            texture: *self,
            range: SubresourceRange::new(mip, 1, 0, self.array_layers),
        }
    }
}

/// A texture scoped to a sub-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureView {
    pub texture: TextureResource,
    pub range: SubresourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferView {
    pub buffer: BufferResource,
    pub range: BufferRange,
}

impl From<BufferResource> for BufferView {
    fn from(buffer: BufferResource) -> Self {
        Self {
            buffer,
            range: buffer.whole(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerResource {
    pub handle: VersionedHandle,
    pub native: Handle<Sampler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccelerationStructureResource {
    pub handle: VersionedHandle,
    pub native: Handle<AccelerationStructure>,
}

/// Current value of a name-addressed shader resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Texture(TextureView),
    TextureArray(SmallVec<[TextureView; 4]>),
    Buffer(BufferView),
    BufferArray(SmallVec<[BufferView; 4]>),
    Sampler(SamplerResource),
    AccelerationStructure(AccelerationStructureResource),
}

impl ResourceValue {
    pub fn element_count(&self) -> usize {
        match self {
            ResourceValue::TextureArray(v) => v.len(),
            ResourceValue::BufferArray(v) => v.len(),
            _ => 1,
        }
    }

    /// Identity of every element, in binding order.
    pub fn identities(&self) -> SmallVec<[VersionedHandle; 4]> {
        match self {
            ResourceValue::Texture(t) => smallvec::smallvec![t.texture.handle],
            ResourceValue::TextureArray(v) => v.iter().map(|t| t.texture.handle).collect(),
            ResourceValue::Buffer(b) => smallvec::smallvec![b.buffer.handle],
            ResourceValue::BufferArray(v) => v.iter().map(|b| b.buffer.handle).collect(),
            ResourceValue::Sampler(s) => smallvec::smallvec![s.handle],
            ResourceValue::AccelerationStructure(a) => smallvec::smallvec![a.handle],
        }
    }

    /// Sub-range of every element, in binding order. Samplers and
    /// acceleration structures carry none.
    pub fn ranges(&self) -> SmallVec<[Option<ResourceRange>; 4]> {
        match self {
            ResourceValue::Texture(t) => smallvec::smallvec![Some(ResourceRange::Image(t.range))],
            ResourceValue::TextureArray(v) => {
                v.iter().map(|t| Some(ResourceRange::Image(t.range))).collect()
            }
            ResourceValue::Buffer(b) => smallvec::smallvec![Some(ResourceRange::Buffer(b.range))],
            ResourceValue::BufferArray(v) => {
                v.iter().map(|b| Some(ResourceRange::Buffer(b.range))).collect()
            }
            _ => smallvec::smallvec![None],
        }
    }

    /// Elements whose accesses go through the tracker.
    pub fn tracked_elements(&self) -> SmallVec<[(VersionedHandle, ResourceRange, TrackingFlags); 4]> {
        match self {
            ResourceValue::Texture(t) => smallvec::smallvec![(
                t.texture.handle,
                ResourceRange::Image(t.range),
                t.texture.tracking
            )],
            ResourceValue::TextureArray(v) => v
                .iter()
                .map(|t| (t.texture.handle, ResourceRange::Image(t.range), t.texture.tracking))
                .collect(),
            ResourceValue::Buffer(b) => smallvec::smallvec![(
                b.buffer.handle,
                ResourceRange::Buffer(b.range),
                b.buffer.tracking
            )],
            ResourceValue::BufferArray(v) => v
                .iter()
                .map(|b| (b.buffer.handle, ResourceRange::Buffer(b.range), b.buffer.tracking))
                .collect(),
            _ => SmallVec::new(),
        }
    }
}

/// Name to value table the descriptor sets are filled from.
#[derive(Debug, Clone, Default)]
pub struct GlobalResourceState {
    values: HashMap<String, ResourceValue>,
}

impl GlobalResourceState {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores `value` under `name`. Returns true when the stored value changed.
    pub fn set(&mut self, name: &str, value: ResourceValue) -> bool {
        match self.values.get_mut(name) {
            Some(existing) if *existing == value => false,
            Some(existing) => {
                *existing = value;
                true
            }
            None => {
                self.values.insert(name.to_string(), value);
                true
            }
        }
    }

    pub fn set_texture(&mut self, name: &str, texture: &TextureResource) -> bool {
        self.set(name, ResourceValue::Texture(texture.view()))
    }

    pub fn set_texture_view(&mut self, name: &str, view: TextureView) -> bool {
        self.set(name, ResourceValue::Texture(view))
    }

    pub fn set_texture_array(&mut self, name: &str, textures: &[TextureResource]) -> bool {
        self.set(
            name,
            ResourceValue::TextureArray(textures.iter().map(|t| t.view()).collect()),
        )
    }

    pub fn set_buffer(&mut self, name: &str, buffer: &BufferResource) -> bool {
        self.set(name, ResourceValue::Buffer((*buffer).into()))
    }

    pub fn set_buffer_range(&mut self, name: &str, buffer: &BufferResource, range: BufferRange) -> bool {
        self.set(
            name,
            ResourceValue::Buffer(BufferView {
                buffer: *buffer,
                range,
            }),
        )
    }

    pub fn set_sampler(&mut self, name: &str, sampler: &SamplerResource) -> bool {
        self.set(name, ResourceValue::Sampler(*sampler))
    }

    pub fn set_acceleration_structure(
        &mut self,
        name: &str,
        tlas: &AccelerationStructureResource,
    ) -> bool {
        self.set(name, ResourceValue::AccelerationStructure(*tlas))
    }

    pub fn get(&self, name: &str) -> Option<&ResourceValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ResourceValue> {
        self.values.remove(name)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One named element inside a vertex stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub name: String,
    pub format: Format,
    pub offset: u32,
}

impl VertexElement {
    pub fn new(name: &str, format: Format, offset: u32) -> Self {
        Self {
            name: name.to_string(),
            format,
            offset,
        }
    }
}

/// A vertex buffer bound at one stream slot, with the elements it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexStream {
    pub buffer: Option<BufferResource>,
    pub offset: u64,
    pub stride: u32,
    pub rate: VertexRate,
    pub elements: SmallVec<[VertexElement; 4]>,
}

impl VertexStream {
    pub fn new(buffer: &BufferResource, stride: u32, elements: &[VertexElement]) -> Self {
        Self {
            buffer: Some(*buffer),
            offset: 0,
            stride,
            rate: VertexRate::Vertex,
            elements: elements.iter().cloned().collect(),
        }
    }

    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn per_instance(mut self) -> Self {
        self.rate = VertexRate::Instance;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBinding {
    pub buffer: BufferResource,
    pub offset: u64,
    pub index_type: IndexType,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture() -> TextureResource {
        TextureResource::new(
            VersionedHandle::new(1, 0),
            Handle::new(0, 1),
            Format::RGBA8Unorm,
            [64, 64, 1],
            TextureUsage::SAMPLED,
        )
    }

    #[test]
    fn setting_same_value_reports_no_change() {
        let mut globals = GlobalResourceState::new();
        let tex = texture();
        assert!(globals.set_texture("albedo", &tex));
        assert!(!globals.set_texture("albedo", &tex));

        let resized = tex.resized(Handle::new(1, 1), [128, 128, 1]);
        assert!(globals.set_texture("albedo", &resized));
        assert_eq!(
            globals.get("albedo").map(|v| v.identities()[0]),
            Some(resized.handle)
        );
    }

    #[test]
    fn resize_bumps_version_only() {
        let tex = texture();
        let resized = tex.resized(Handle::new(1, 1), [128, 128, 1]);
        assert_eq!(resized.handle.id, tex.handle.id);
        assert_eq!(resized.handle.version, tex.handle.version + 1);
    }
}
