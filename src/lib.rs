pub mod gpu;
pub mod utils;

pub use gpu::driver::types::{Handle, IndexType, QueueType};
pub use gpu::*;
