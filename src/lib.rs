//! Tracebin Container Format
//!
//! A chunked, compressed, randomly-seekable container for bus-trace event
//! logs: heterogeneous versioned binary records packed into
//! zlib-compressed chunks, streamed through a bounded producer/consumer
//! pipeline, and indexed by sparse restore points for approximate seeking.
//!
//! ## Features
//!
//! - **Resynchronizing record framing** — readers relocate the next valid
//!   record signature after corruption instead of giving up
//! - **Deflate chunk compression** with strict declared-size verification
//! - **Rolling-window virtual stream** so codecs never see chunk
//!   boundaries
//! - **Bounded pipeline** — reading, decompression and decoding overlap
//!   across threads with flow control
//! - **Sparse restore points** for approximate random access without a
//!   full scan
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Statistics block (144 bytes)                │
//! │  - Magic "LOGG", sizes, record count        │
//! ├─────────────────────────────────────────────┤
//! │ Chunk records ("LOBJ" framed, type 10)      │
//! │  - deflate payload = run of records         │
//! │  - each record: header, payload, pad        │
//! ├─────────────────────────────────────────────┤
//! │ Restore point trailer (optional)            │
//! │  - total size, interval, 24-byte entries    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use tracebin::{ContainerConfig, Record, RecordHeader, TraceFile};
//!
//! # fn main() -> tracebin::Result<()> {
//! let mut out = TraceFile::create("capture.tbc", ContainerConfig::default())?;
//! out.write(Record::new(RecordHeader::basic(86, 0, 1_000), vec![0x42; 8]))?;
//! out.close()?;
//!
//! let input = TraceFile::open("capture.tbc", ContainerConfig::default())?;
//! while let Some(record) = input.read()? {
//!     println!("type {} at {}", record.header.record_type, record.timestamp());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Payload interpretation is out of scope: records travel as raw bytes,
//! and a [`CodecRegistry`] maps `(record_type, header_version)` pairs to
//! caller-supplied codecs.

pub mod chunk;
pub mod config;
pub mod container;
pub mod error;
pub mod index;
pub mod queue;
pub mod record;
pub mod statistics;
pub mod stream;
pub mod virtual_stream;

// Re-export commonly used types
pub use chunk::{Chunk, CompressionMethod};
pub use config::ContainerConfig;
pub use container::TraceFile;
pub use error::{Result, TracebinError};
pub use index::{RestorePoint, SparseIndex, SparseIndexBuilder};
pub use queue::BoundedQueue;
pub use record::{
    CodecRegistry, HeaderExtension, Record, RecordCodec, RecordHeader, CHUNK_RECORD_TYPE,
    RECORD_SIGNATURE,
};
pub use statistics::{BrokenDownTime, FileStatistics};
pub use stream::{ByteStream, MemoryStream, RawFile};
pub use virtual_stream::VirtualStream;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
