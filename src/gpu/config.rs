use std::path::PathBuf;

#[cfg(feature = "keel-serde")]
use serde::{Deserialize, Serialize};

/// Tunables for the encoder and its caches.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "keel-serde", serde(default))]
pub struct EncoderConfig {
    /// Ticks a pipeline may go unused before it is evicted.
    pub pipeline_prune_delay: u64,
    /// Ticks a descriptor set may go unused before it is freed.
    pub descriptor_prune_delay: u64,
    /// Where the native pipeline cache blob is loaded from and spilled to.
    pub pipeline_cache_path: Option<PathBuf>,
    pub warn_on_partial_vertex_input: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            pipeline_prune_delay: 600,
            descriptor_prune_delay: 8,
            pipeline_cache_path: None,
            warn_on_partial_vertex_input: true,
        }
    }
}

#[cfg(feature = "keel-serde")]
mod serde_support {
    use std::fs;
    use std::path::Path;

    use anyhow::{Context as _, Result};

    use super::EncoderConfig;

    impl EncoderConfig {
        pub fn from_yaml(yaml: &str) -> Result<Self> {
            serde_yaml::from_str(yaml).context("parsing encoder config YAML")
        }

        pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let contents = fs::read_to_string(path)
                .with_context(|| format!("loading encoder config file '{}'", path.display()))?;
            Self::from_yaml(&contents)
        }
    }

}
