use bitflags::bitflags;
use smallvec::SmallVec;

use super::driver::types::{Format, Handle, ShaderModule, StageFlags, VersionedHandle};
use super::error::{GPUError, Result};
use super::structs::{MAX_DESCRIPTOR_SETS, MAX_VERTEX_ATTRIBUTES};

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX       = 1 << 0;
        const TESS_CONTROL = 1 << 1;
        const TESS_EVAL    = 1 << 2;
        const GEOMETRY     = 1 << 3;
        const FRAGMENT     = 1 << 4;
        const TASK         = 1 << 5;
        const MESH         = 1 << 6;
        const COMPUTE      = 1 << 7;
        const RAYGEN       = 1 << 8;
        const MISS         = 1 << 9;
        const CLOSEST_HIT  = 1 << 10;
        const ANY_HIT      = 1 << 11;
        const INTERSECTION = 1 << 12;
        const CALLABLE     = 1 << 13;
    }
}

impl ShaderStageFlags {
    pub const PRE_RASTER: ShaderStageFlags = ShaderStageFlags::from_bits_truncate(
        ShaderStageFlags::VERTEX.bits()
            | ShaderStageFlags::TESS_CONTROL.bits()
            | ShaderStageFlags::TESS_EVAL.bits()
            | ShaderStageFlags::GEOMETRY.bits(),
    );
    pub const MESHLET: ShaderStageFlags = ShaderStageFlags::from_bits_truncate(
        ShaderStageFlags::TASK.bits() | ShaderStageFlags::MESH.bits(),
    );
    pub const RAY_TRACING: ShaderStageFlags = ShaderStageFlags::from_bits_truncate(
        ShaderStageFlags::RAYGEN.bits()
            | ShaderStageFlags::MISS.bits()
            | ShaderStageFlags::CLOSEST_HIT.bits()
            | ShaderStageFlags::ANY_HIT.bits()
            | ShaderStageFlags::INTERSECTION.bits()
            | ShaderStageFlags::CALLABLE.bits(),
    );

    /// Pipeline stages that execute these shader stages.
    pub fn pipeline_stages(self) -> StageFlags {
        let mut out = StageFlags::empty();
        if self.intersects(Self::PRE_RASTER) {
            out |= StageFlags::VERTEX_SHADER;
        }
        if self.contains(Self::TASK) {
            out |= StageFlags::TASK_SHADER;
        }
        if self.contains(Self::MESH) {
            out |= StageFlags::MESH_SHADER;
        }
        if self.contains(Self::FRAGMENT) {
            out |= StageFlags::FRAGMENT_SHADER;
        }
        if self.contains(Self::COMPUTE) {
            out |= StageFlags::COMPUTE_SHADER;
        }
        if self.intersects(Self::RAY_TRACING) {
            out |= StageFlags::RAY_TRACING_SHADER;
        }
        out
    }
}

/// Pipeline family a shader compiles into, derived from its stages.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Mesh,
    Compute,
    RayTracing,
}

impl PipelineKind {
    pub fn classify(stages: ShaderStageFlags) -> Result<Self> {
        let raster = stages.intersects(ShaderStageFlags::PRE_RASTER);
        let mesh = stages.intersects(ShaderStageFlags::MESHLET);
        let compute = stages.contains(ShaderStageFlags::COMPUTE);
        let rt = stages.intersects(ShaderStageFlags::RAY_TRACING);

        match (raster, mesh, compute, rt) {
            (true, false, false, false) => Ok(PipelineKind::Graphics),
            (false, true, false, false) if stages.contains(ShaderStageFlags::MESH) => {
                Ok(PipelineKind::Mesh)
            }
            (false, false, true, false) if stages == ShaderStageFlags::COMPUTE => {
                Ok(PipelineKind::Compute)
            }
            (false, false, false, true) if stages.contains(ShaderStageFlags::RAYGEN) => {
                Ok(PipelineKind::RayTracing)
            }
            _ => Err(GPUError::UnsupportedShaderStages(stages)),
        }
    }

    /// Graphics and mesh pipelines render into a render target.
    pub fn rasterizes(self) -> bool {
        matches!(self, PipelineKind::Graphics | PipelineKind::Mesh)
    }
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    Sampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    AccelerationStructure,
}

impl DescriptorType {
    pub fn is_image(self) -> bool {
        matches!(self, DescriptorType::SampledImage | DescriptorType::StorageImage)
    }

    pub fn is_buffer(self) -> bool {
        matches!(self, DescriptorType::UniformBuffer | DescriptorType::StorageBuffer)
    }
}

/// One resource declared by a shader inside a descriptor set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderBinding {
    /// Name the value is looked up by in the resource tables.
    pub name: String,
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub is_array: bool,
    pub stages: ShaderStageFlags,
    /// The shader writes through this binding.
    pub writes: bool,
}

impl ShaderBinding {
    pub fn new(name: &str, binding: u32, ty: DescriptorType, stages: ShaderStageFlags) -> Self {
        Self {
            name: name.to_string(),
            binding,
            ty,
            count: 1,
            is_array: false,
            stages,
            writes: false,
        }
    }

    pub fn array(mut self, count: u32) -> Self {
        self.count = count;
        self.is_array = true;
        self
    }

    pub fn writable(mut self) -> Self {
        self.writes = true;
        self
    }
}

/// Resource layout of one descriptor set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SetLayout {
    /// Identity of the native set layout object.
    pub layout_id: u64,
    pub bindings: Vec<ShaderBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderVertexInput {
    pub name: String,
    pub location: u32,
    pub format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderGroupTable {
    pub raygen: u32,
    pub miss: u32,
    pub hit: u32,
    pub callable: u32,
}

/// Compiled shader program as handed over by the shader compiler.
#[derive(Debug, Clone)]
pub struct Shader {
    pub handle: VersionedHandle,
    pub name: String,
    pub stages: ShaderStageFlags,
    pub kind: PipelineKind,
    pub modules: SmallVec<[(ShaderStageFlags, Handle<ShaderModule>); 2]>,
    pub vertex_inputs: Vec<ShaderVertexInput>,
    pub push_constants: Vec<PushConstantRange>,
    pub sets: Vec<SetLayout>,
    pub group_size: [u32; 3],
    pub groups: ShaderGroupTable,
}

impl Shader {
    pub fn new(handle: VersionedHandle, name: &str, stages: ShaderStageFlags) -> Result<Self> {
        Ok(Self {
            handle,
            name: name.to_string(),
            stages,
            kind: PipelineKind::classify(stages)?,
            modules: SmallVec::new(),
            vertex_inputs: Vec::new(),
            push_constants: Vec::new(),
            sets: Vec::new(),
            group_size: [1, 1, 1],
            groups: Default::default(),
        })
    }

    pub fn with_module(mut self, stage: ShaderStageFlags, module: Handle<ShaderModule>) -> Self {
        self.modules.push((stage, module));
        self
    }

    pub fn with_vertex_inputs(mut self, inputs: &[(&str, Format)]) -> Result<Self> {
        if inputs.len() > MAX_VERTEX_ATTRIBUTES {
            return Err(GPUError::LimitExceeded {
                what: "vertex attributes",
                limit: MAX_VERTEX_ATTRIBUTES,
                requested: inputs.len(),
            });
        }
        self.vertex_inputs = inputs
            .iter()
            .enumerate()
            .map(|(location, (name, format))| ShaderVertexInput {
                name: name.to_string(),
                location: location as u32,
                format: *format,
            })
            .collect();
        Ok(self)
    }

    pub fn with_sets(mut self, sets: Vec<SetLayout>) -> Result<Self> {
        if sets.len() > MAX_DESCRIPTOR_SETS {
            return Err(GPUError::LimitExceeded {
                what: "descriptor sets",
                limit: MAX_DESCRIPTOR_SETS,
                requested: sets.len(),
            });
        }
        self.sets = sets;
        Ok(self)
    }

    pub fn with_push_constants(mut self, range: PushConstantRange) -> Self {
        self.push_constants.push(range);
        self
    }

    pub fn with_group_size(mut self, group_size: [u32; 3]) -> Self {
        self.group_size = group_size;
        self
    }

    pub fn with_groups(mut self, groups: ShaderGroupTable) -> Self {
        self.groups = groups;
        self
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn push_constant_stages(&self) -> ShaderStageFlags {
        self.push_constants
            .iter()
            .fold(ShaderStageFlags::empty(), |acc, r| acc | r.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_classify_into_pipeline_kinds() {
        let gfx = ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT;
        assert_eq!(PipelineKind::classify(gfx).ok(), Some(PipelineKind::Graphics));
        let mesh = ShaderStageFlags::TASK | ShaderStageFlags::MESH | ShaderStageFlags::FRAGMENT;
        assert_eq!(PipelineKind::classify(mesh).ok(), Some(PipelineKind::Mesh));
        assert_eq!(
            PipelineKind::classify(ShaderStageFlags::COMPUTE).ok(),
            Some(PipelineKind::Compute)
        );
        let rt = ShaderStageFlags::RAYGEN | ShaderStageFlags::MISS | ShaderStageFlags::CLOSEST_HIT;
        assert_eq!(PipelineKind::classify(rt).ok(), Some(PipelineKind::RayTracing));
    }

    #[test]
    fn mixed_stages_are_rejected() {
        let mixed = ShaderStageFlags::VERTEX | ShaderStageFlags::COMPUTE;
        assert!(matches!(
            PipelineKind::classify(mixed),
            Err(GPUError::UnsupportedShaderStages(_))
        ));
        assert!(PipelineKind::classify(ShaderStageFlags::FRAGMENT).is_err());
    }

    #[test]
    fn too_many_sets_is_a_limit_error() {
        let shader = Shader::new(VersionedHandle::new(1, 0), "cs", ShaderStageFlags::COMPUTE)
            .and_then(|s| s.with_sets(vec![SetLayout::default(); MAX_DESCRIPTOR_SETS + 1]));
        assert!(matches!(shader, Err(GPUError::LimitExceeded { .. })));
    }
}
