//! Container configuration
//!
//! All tunables are explicit and passed into constructors; there is no
//! process-wide mutable state. Defaults match what existing container
//! files in the field were written with.

use crate::chunk::CompressionMethod;

/// Default uncompressed payload size a chunk grows to before the
/// pipeline seals and compresses it.
pub const DEFAULT_CHUNK_SIZE: u32 = 128 * 1024;

/// Default number of records resident in the pipeline queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default number of records between restore points. The effective
/// on-disk spacing is `interval + 1` records; see [`crate::index`].
pub const DEFAULT_RESTORE_POINT_INTERVAL: u32 = 1000;

/// Configuration for reading and writing trace containers.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Compression method applied to sealed chunks.
    pub compression_method: CompressionMethod,

    /// Compression level (0 = store, 1 = fastest, 9 = best). Ignored
    /// when `compression_method` is `None`.
    pub compression_level: u32,

    /// Uncompressed bytes a chunk accumulates before being sealed.
    pub chunk_size: u32,

    /// Upper bound on decompressed bytes resident in the virtual stream
    /// window. Writers block when the window is full. `None` disables
    /// the bound.
    pub max_resident_bytes: Option<usize>,

    /// Capacity of the record queue between the caller and the codec
    /// stage.
    pub queue_capacity: usize,

    /// Records between restore points (effective spacing is one more).
    pub restore_point_interval: u32,

    /// Write the restore point trailer on close.
    pub write_restore_points: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            compression_method: CompressionMethod::Deflate,
            compression_level: 6,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_resident_bytes: Some(16 * 1024 * 1024),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            restore_point_interval: DEFAULT_RESTORE_POINT_INTERVAL,
            write_restore_points: true,
        }
    }
}

impl ContainerConfig {
    /// Config that stores chunks uncompressed.
    pub fn uncompressed() -> Self {
        ContainerConfig {
            compression_method: CompressionMethod::None,
            compression_level: 0,
            ..Default::default()
        }
    }

    /// Config tuned for smallest output.
    pub fn best_compression() -> Self {
        ContainerConfig {
            compression_level: 9,
            ..Default::default()
        }
    }
}
