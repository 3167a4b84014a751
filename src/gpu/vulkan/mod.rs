//! Vulkan translation of the neutral encoder types.
//!
//! Only the pieces every Vulkan [`Backend`](crate::gpu::Backend) and
//! [`CommandSink`](crate::gpu::driver::command::CommandSink) need live here:
//! enum/flag conversions and the batched barrier emitter.

pub mod barrier_builder;
pub mod conversions;

pub use barrier_builder::*;
pub use conversions::*;
