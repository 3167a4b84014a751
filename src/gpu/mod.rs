use bytemuck::{Pod, Zeroable};

use driver::types::{DescriptorSet, Handle, Pipeline};
use execution::descriptor_cache::DescriptorWrite;
use execution::pipeline_cache::PipelineKey;
use shader::{SetLayout, Shader};

/// Defines the interface that rendering backends must implement.
///
/// A backend owns the native device and creates the objects the caches hand
/// out. Exactly one backend is chosen when the [`context::DeviceContext`] is
/// created; the encoder reaches it through that context only.
///
/// # Examples
/// ```ignore
/// use keel::gpu::{Backend, context::DeviceContext};
/// fn init<B: Backend>(backend: B) -> DeviceContext<B> {
///     DeviceContext::create(backend, Default::default())
/// }
/// ```
pub trait Backend {
    /// Compiles a vertex/fragment pipeline from the fixed-function state in
    /// `key`.
    fn create_graphics_pipeline(&mut self, shader: &Shader, key: &PipelineKey) -> Result<Handle<Pipeline>>;
    fn create_mesh_pipeline(&mut self, shader: &Shader, key: &PipelineKey) -> Result<Handle<Pipeline>>;
    fn create_compute_pipeline(&mut self, shader: &Shader) -> Result<Handle<Pipeline>>;
    fn create_ray_tracing_pipeline(&mut self, shader: &Shader) -> Result<Handle<Pipeline>>;
    fn destroy_pipeline(&mut self, pipeline: Handle<Pipeline>);

    fn allocate_descriptor_set(&mut self, layout: &SetLayout) -> Result<Handle<DescriptorSet>>;
    fn write_descriptor_set(&mut self, set: Handle<DescriptorSet>, writes: &[DescriptorWrite]);
    fn free_descriptor_set(&mut self, set: Handle<DescriptorSet>);

    /// Identifies the device and driver a pipeline cache blob was built by.
    fn device_signature(&self) -> DeviceSignature;
    /// Opaque native pipeline cache contents.
    fn pipeline_cache_data(&self) -> Vec<u8>;
    fn load_pipeline_cache_data(&mut self, data: &[u8]);
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DeviceSignature {
    pub vendor_id: u32,
    pub device_id: u32,
    pub driver_version: u32,
    pub reserved: u32,
    pub cache_uuid: [u8; 16],
}

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod execution;
pub mod fence;
pub mod null;
pub mod resources;
pub mod shader;
pub mod structs;
#[cfg(feature = "keel-vulkan")]
pub mod vulkan;

pub use config::EncoderConfig;
pub use context::DeviceContext;
pub use error::{GPUError, Result};
pub use execution::{CommandEncoder, DirtyFlags, RenderState};
pub use fence::{FenceRef, FenceSet, Timeline};
pub use structs::*;
