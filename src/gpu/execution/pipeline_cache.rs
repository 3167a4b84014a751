use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context as _};
use bytemuck::{Pod, Zeroable};
use log::{debug, info, warn};

use crate::gpu::driver::types::{Handle, Pipeline, VersionedHandle};
use crate::gpu::error::Result;
use crate::gpu::fence::{FenceRef, FenceSet};
use crate::gpu::shader::{PipelineKind, Shader};
use crate::gpu::structs::{
    BlendState, DepthStencilState, MultisampleState, RasterizationState, RenderTargetSignature,
    Topology, VertexInputLayout,
};
use crate::gpu::{Backend, DeviceSignature};

use super::CacheStats;

/// Everything a native pipeline object is compiled from.
///
/// Compute and ray-tracing keys carry default fixed-function state (see
/// [`PipelineKey::normalized`]) so unrelated graphics state never splits
/// their cache entries.
#[derive(Hash, Debug, Clone, PartialEq, Eq)]
pub struct PipelineKey {
    pub shader: VersionedHandle,
    pub kind: PipelineKind,
    pub blend: BlendState,
    pub raster: RasterizationState,
    pub depth_stencil: DepthStencilState,
    pub multisample: MultisampleState,
    pub primitive_restart: bool,
    pub topology: Topology,
    pub vertex_input: VertexInputLayout,
    /// Target formats plus the view mask, which decide render-pass
    /// compatibility.
    pub targets: RenderTargetSignature,
}

impl PipelineKey {
    pub fn new(shader: &Shader) -> Self {
        Self {
            shader: shader.handle,
            kind: shader.kind,
            blend: Default::default(),
            raster: Default::default(),
            depth_stencil: Default::default(),
            multisample: Default::default(),
            primitive_restart: false,
            topology: Default::default(),
            vertex_input: Default::default(),
            targets: Default::default(),
        }
    }

    /// Drops state the pipeline kind does not consume.
    pub fn normalized(&self) -> Self {
        match self.kind {
            PipelineKind::Graphics => self.clone(),
            PipelineKind::Mesh => Self {
                vertex_input: Default::default(),
                primitive_restart: false,
                topology: Default::default(),
                ..self.clone()
            },
            PipelineKind::Compute | PipelineKind::RayTracing => Self {
                shader: self.shader,
                kind: self.kind,
                ..Default::default()
            },
        }
    }
}

impl Default for PipelineKey {
    fn default() -> Self {
        Self {
            shader: Default::default(),
            kind: PipelineKind::Graphics,
            blend: Default::default(),
            raster: Default::default(),
            depth_stencil: Default::default(),
            multisample: Default::default(),
            primitive_restart: false,
            topology: Default::default(),
            vertex_input: Default::default(),
            targets: Default::default(),
        }
    }
}

struct PipelineEntry {
    pipeline: Handle<Pipeline>,
    last_used: u64,
    fences: FenceSet,
}

/// Lazily compiled pipelines keyed by [`PipelineKey`], evicted after going
/// unused for `prune_delay` ticks.
pub struct PipelineCache {
    entries: HashMap<PipelineKey, PipelineEntry>,
    tick: u64,
    prune_delay: u64,
    stats: CacheStats,
}

impl PipelineCache {
    pub fn new(prune_delay: u64) -> Self {
        Self {
            entries: HashMap::new(),
            tick: 0,
            prune_delay,
            stats: Default::default(),
        }
    }

    /// Returns the pipeline for `key`, compiling it on a miss. `fence` marks
    /// the command buffer that is about to use it and joins the fences of
    /// earlier users on other queues.
    pub fn get_or_create<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        shader: &Shader,
        key: &PipelineKey,
        fence: &FenceRef,
    ) -> Result<Handle<Pipeline>> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = self.tick;
            entry.fences.stamp(fence);
            self.stats.hits += 1;
            return Ok(entry.pipeline);
        }

        self.stats.misses += 1;
        let pipeline = match key.kind {
            PipelineKind::Graphics => backend.create_graphics_pipeline(shader, key)?,
            PipelineKind::Mesh => backend.create_mesh_pipeline(shader, key)?,
            PipelineKind::Compute => backend.create_compute_pipeline(shader)?,
            PipelineKind::RayTracing => backend.create_ray_tracing_pipeline(shader)?,
        };
        self.stats.created += 1;
        debug!(
            "compiled {:?} pipeline {:?} for shader '{}' ({} cached)",
            key.kind,
            pipeline,
            shader.name,
            self.entries.len() + 1
        );

        self.entries.insert(
            key.clone(),
            PipelineEntry {
                pipeline,
                last_used: self.tick,
                fences: FenceSet::from(fence),
            },
        );
        Ok(pipeline)
    }

    /// Advances the tick and destroys pipelines unused for longer than the
    /// prune delay once every queue that used them has retired that work.
    /// Returns how many were destroyed.
    pub fn prune<B: Backend + ?Sized>(&mut self, backend: &mut B) -> usize {
        self.tick += 1;
        let tick = self.tick;
        let delay = self.prune_delay;

        let mut destroyed = 0;
        self.entries.retain(|key, entry| {
            if entry.last_used + delay >= tick {
                return true;
            }
            if let Some(pending) = entry.fences.pending() {
                debug!(
                    "keeping stale {:?} pipeline for {:?}, fence {} still pending",
                    key.kind,
                    key.shader,
                    pending.value()
                );
                return true;
            }
            backend.destroy_pipeline(entry.pipeline);
            destroyed += 1;
            false
        });

        if destroyed > 0 {
            debug!("pruned {} pipelines", destroyed);
        }
        self.stats.destroyed += destroyed as u64;
        destroyed
    }

    /// Destroys every pipeline. Only valid once the device is idle.
    pub fn destroy_all<B: Backend + ?Sized>(&mut self, backend: &mut B) {
        for (_, entry) in self.entries.drain() {
            backend.destroy_pipeline(entry.pipeline);
            self.stats.destroyed += 1;
        }
    }

    pub fn contains(&self, key: &PipelineKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Seeds the backend with a blob spilled by a previous run. A missing,
    /// stale or corrupt blob is discarded.
    pub fn load_native_cache<B: Backend + ?Sized>(backend: &mut B, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match read_blob(path, &backend.device_signature()) {
            Ok(data) => {
                info!("loaded {} byte pipeline cache from {}", data.len(), path.display());
                backend.load_pipeline_cache_data(&data);
                true
            }
            Err(err) => {
                warn!("discarding pipeline cache {}: {:#}", path.display(), err);
                false
            }
        }
    }

    pub fn save_native_cache<B: Backend + ?Sized>(backend: &B, path: &Path) -> Result<()> {
        let data = backend.pipeline_cache_data();
        write_blob(path, &backend.device_signature(), &data)?;
        debug!("spilled {} byte pipeline cache to {}", data.len(), path.display());
        Ok(())
    }
}

//===----------------------------------------------------------------------===//
// On-disk blob
//===----------------------------------------------------------------------===//

const BLOB_MAGIC: u32 = u32::from_le_bytes(*b"KPLC");
const BLOB_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlobHeader {
    magic: u32,
    version: u32,
    data_len: u32,
    reserved: u32,
    checksum: u64,
    device: DeviceSignature,
}

fn fnv1a(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn write_blob(path: &Path, device: &DeviceSignature, data: &[u8]) -> Result<()> {
    let header = BlobHeader {
        magic: BLOB_MAGIC,
        version: BLOB_VERSION,
        data_len: data.len() as u32,
        reserved: 0,
        checksum: fnv1a(data),
        device: *device,
    };
    let mut bytes = Vec::with_capacity(std::mem::size_of::<BlobHeader>() + data.len());
    bytes.extend_from_slice(bytemuck::bytes_of(&header));
    bytes.extend_from_slice(data);

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

fn read_blob(path: &Path, device: &DeviceSignature) -> anyhow::Result<Vec<u8>> {
    let bytes =
        fs::read(path).with_context(|| format!("reading pipeline cache '{}'", path.display()))?;
    let header_len = std::mem::size_of::<BlobHeader>();
    if bytes.len() < header_len {
        bail!("file is shorter than the header");
    }

    let header: BlobHeader = bytemuck::pod_read_unaligned(&bytes[..header_len]);
    if header.magic != BLOB_MAGIC {
        bail!("bad magic {:#x}", header.magic);
    }
    if header.version != BLOB_VERSION {
        bail!("blob version {} (expected {})", header.version, BLOB_VERSION);
    }
    if header.device != *device {
        bail!("built for a different device or driver");
    }

    let data = &bytes[header_len..];
    if data.len() != header.data_len as usize {
        bail!("truncated: {} of {} bytes", data.len(), header.data_len);
    }
    if fnv1a(data) != header.checksum {
        bail!("checksum mismatch");
    }
    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("keel-{}-{}.bin", name, std::process::id()))
    }

    #[test]
    fn blob_round_trips_for_same_device() {
        let path = temp_path("blob-ok");
        let device = DeviceSignature {
            vendor_id: 0x10de,
            device_id: 7,
            ..Default::default()
        };
        write_blob(&path, &device, b"native cache bytes").unwrap();
        assert_eq!(read_blob(&path, &device).unwrap(), b"native cache bytes");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn blob_from_other_driver_is_rejected() {
        let path = temp_path("blob-driver");
        let device = DeviceSignature {
            driver_version: 1,
            ..Default::default()
        };
        write_blob(&path, &device, &[1, 2, 3]).unwrap();
        let newer = DeviceSignature {
            driver_version: 2,
            ..device
        };
        assert!(read_blob(&path, &newer).is_err());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_blob_is_rejected() {
        let path = temp_path("blob-corrupt");
        let device = DeviceSignature::default();
        write_blob(&path, &device, &[9; 32]).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        assert!(read_blob(&path, &device).is_err());
        let _ = fs::remove_file(&path);
    }
}
