use std::fmt;

use super::driver::types::Layout;
use super::shader::{DescriptorType, ShaderStageFlags};

#[cfg(feature = "keel-vulkan")]
#[derive(Debug)]
pub struct VulkanError {
    res: ash::vk::Result,
}

#[cfg(feature = "keel-vulkan")]
impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vulkan Error: {}", self.res)
    }
}

#[derive(Debug)]
pub enum GPUError {
    /// A pipeline was validated before any shader was set.
    NoShaderBound,
    /// A vertex stream required by the shader was bound to a null buffer.
    NullVertexBuffer { slot: usize },
    LimitExceeded {
        what: &'static str,
        limit: usize,
        requested: usize,
    },
    /// The shader declares a resource no resource table supplies.
    MissingResourceBinding { set: u32, binding: u32, name: String },
    ResourceTypeMismatch {
        name: String,
        expected: DescriptorType,
    },
    UnsupportedTransition(Layout),
    UnsupportedShaderStages(ShaderStageFlags),
    InvalidOperation(&'static str),
    Backend(String),
    PipelineCacheIo(String),
    #[cfg(feature = "keel-vulkan")]
    VulkanError(VulkanError),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

impl fmt::Display for GPUError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GPUError::NoShaderBound => write!(f, "No shader bound"),
            GPUError::NullVertexBuffer { slot } => {
                write!(f, "Vertex stream {} is bound to a null buffer", slot)
            }
            GPUError::LimitExceeded {
                what,
                limit,
                requested,
            } => write!(f, "Too many {}: {} requested, limit is {}", what, requested, limit),
            GPUError::MissingResourceBinding { set, binding, name } => write!(
                f,
                "Missing resource '{}' for set {} binding {}",
                name, set, binding
            ),
            GPUError::ResourceTypeMismatch { name, expected } => {
                write!(f, "Resource '{}' is not a {:?}", name, expected)
            }
            GPUError::UnsupportedTransition(layout) => {
                write!(f, "Unsupported transition to {:?}", layout)
            }
            GPUError::UnsupportedShaderStages(stages) => {
                write!(f, "Unsupported shader stage combination {:?}", stages)
            }
            GPUError::InvalidOperation(what) => write!(f, "Invalid operation: {}", what),
            GPUError::Backend(msg) => write!(f, "Backend error: {}", msg),
            GPUError::PipelineCacheIo(msg) => write!(f, "Pipeline cache: {}", msg),
            #[cfg(feature = "keel-vulkan")]
            GPUError::VulkanError(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for GPUError {}

#[cfg(feature = "keel-vulkan")]
impl From<ash::vk::Result> for GPUError {
    fn from(res: ash::vk::Result) -> Self {
        GPUError::VulkanError(VulkanError { res })
    }
}

impl From<std::io::Error> for GPUError {
    fn from(err: std::io::Error) -> Self {
        GPUError::PipelineCacheIo(err.to_string())
    }
}
