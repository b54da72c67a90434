use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracebinError {
    #[error("Invalid magic number in statistics block")]
    InvalidMagic,

    #[error("Unsupported statistics block size: {0}")]
    UnsupportedStatisticsSize(u32),

    #[error("End of stream: no record signature found before physical end")]
    EndOfStream,

    #[error("Corrupt chunk: declared {declared} uncompressed bytes, got {actual}")]
    CorruptChunk { declared: u32, actual: u32 },

    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    #[error("Operation cancelled: structure was aborted")]
    Cancelled,

    #[error("Record header too small: object size {object_size} < header size {header_size}")]
    TruncatedRecord { object_size: u32, header_size: u16 },

    #[error("Unexpected record type {found} (expected {expected})")]
    UnexpectedRecordType { expected: u32, found: u32 },

    #[error("Restore point trailer is malformed: {0}")]
    CorruptIndex(String),

    #[error("Container is not open for {0}")]
    WrongMode(&'static str),

    #[error("Pipeline worker failed: {0}")]
    PipelineFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TracebinError>;
