//! Compressed chunks
//!
//! A chunk holds a contiguous run of serialized records, deflated as one
//! block. On disk it is framed like any other record (type
//! [`CHUNK_RECORD_TYPE`]) so the resynchronizing header scan also finds
//! chunk boundaries after corruption.
//!
//! Decompression is strict: the destination is sized to the *declared*
//! uncompressed size and any deviation — inflate error, short output,
//! overlong output — fails with `CorruptChunk`. Truncated data is never
//! returned.

use crate::error::{Result, TracebinError};
use crate::record::{RecordHeader, CHUNK_RECORD_TYPE};
use crate::stream::ByteStream;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Write;

/// Bytes of the chunk-specific header inside the record payload.
pub const CHUNK_HEADER_SIZE: u32 = 16;

/// Compression applied to a chunk's payload.
///
/// Wire values are fixed by the container format; `1` was never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CompressionMethod {
    /// Bytes stored unchanged.
    None = 0,
    /// zlib-wrapped deflate.
    Deflate = 2,
}

impl CompressionMethod {
    /// Parse a wire value. Unknown methods are fatal: the payload cannot
    /// be interpreted.
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            2 => Ok(CompressionMethod::Deflate),
            other => Err(TracebinError::UnsupportedCompression(other)),
        }
    }
}

/// One compressed block of serialized records.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// How `compressed` is encoded.
    pub compression_method: CompressionMethod,

    /// Exact byte count `uncompress` must produce.
    pub uncompressed_size: u32,

    /// Encoded payload bytes.
    pub compressed: Vec<u8>,

    /// Offset of this chunk's framing header within the container file.
    /// Set when the chunk is read from or written to a stream.
    pub file_position: u64,
}

impl Chunk {
    /// Compress `data` into a new chunk.
    ///
    /// `level` follows zlib (0 store .. 9 best) and is ignored for
    /// `CompressionMethod::None`.
    pub fn compress(data: &[u8], method: CompressionMethod, level: u32) -> Result<Chunk> {
        let compressed = match method {
            CompressionMethod::None => data.to_vec(),
            CompressionMethod::Deflate => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2 + 64),
                    Compression::new(level.min(9)),
                );
                encoder.write_all(data)?;
                encoder.finish()?
            }
        };

        Ok(Chunk {
            compression_method: method,
            uncompressed_size: data.len() as u32,
            compressed,
            file_position: 0,
        })
    }

    /// Recover the original bytes.
    ///
    /// The output buffer is allocated to the declared size up front; an
    /// inflate failure or any length mismatch is `CorruptChunk`.
    pub fn uncompress(&self) -> Result<Vec<u8>> {
        let declared = self.uncompressed_size;
        match self.compression_method {
            CompressionMethod::None => {
                if self.compressed.len() as u32 != declared {
                    return Err(TracebinError::CorruptChunk {
                        declared,
                        actual: self.compressed.len() as u32,
                    });
                }
                Ok(self.compressed.clone())
            }
            CompressionMethod::Deflate => {
                let mut out = Vec::with_capacity(declared as usize);
                let mut inflater = Decompress::new(true);
                let status = inflater
                    .decompress_vec(&self.compressed, &mut out, FlushDecompress::Finish)
                    .map_err(|_| TracebinError::CorruptChunk {
                        declared,
                        actual: inflater.total_out() as u32,
                    })?;

                if status != Status::StreamEnd || out.len() as u32 != declared {
                    return Err(TracebinError::CorruptChunk {
                        declared,
                        actual: out.len() as u32,
                    });
                }
                Ok(out)
            }
        }
    }

    /// Total on-disk record size (framing header + chunk header + data),
    /// excluding padding.
    pub fn object_size(&self) -> u32 {
        crate::record::BASE_HEADER_SIZE as u32 + CHUNK_HEADER_SIZE + self.compressed.len() as u32
    }

    /// Write the framed chunk: record header, chunk header, compressed
    /// bytes, then `object_size % 4` null pad bytes.
    pub fn write(&mut self, stream: &dyn ByteStream) -> Result<()> {
        self.file_position = stream.tell_write();

        let header = RecordHeader::bare(
            CHUNK_RECORD_TYPE,
            CHUNK_HEADER_SIZE + self.compressed.len() as u32,
        );
        header.write(stream)?;

        let mut chunk_header = Vec::with_capacity(CHUNK_HEADER_SIZE as usize);
        chunk_header.extend_from_slice(&(self.compression_method as u16).to_le_bytes());
        chunk_header.extend_from_slice(&0u16.to_le_bytes());
        chunk_header.extend_from_slice(&0u32.to_le_bytes());
        chunk_header.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        chunk_header.extend_from_slice(&0u32.to_le_bytes());
        stream.write(&chunk_header)?;

        stream.write(&self.compressed)?;

        let pad = (header.object_size % 4) as usize;
        if pad > 0 {
            stream.write(&[0u8; 3][..pad])?;
        }
        Ok(())
    }

    /// Read the next framed chunk, resynchronizing on the record
    /// signature and skipping the trailing pad.
    pub fn read(stream: &dyn ByteStream) -> Result<Chunk> {
        let header = RecordHeader::read(stream)?;
        if header.record_type != CHUNK_RECORD_TYPE {
            return Err(TracebinError::UnexpectedRecordType {
                expected: CHUNK_RECORD_TYPE,
                found: header.record_type,
            });
        }
        Self::read_body(&header, stream)
    }

    /// Read the chunk body when the framing header has already been
    /// consumed from `stream`.
    pub(crate) fn read_body(header: &RecordHeader, stream: &dyn ByteStream) -> Result<Chunk> {
        let file_position = stream.tell_read() - header.header_size as u64;

        let payload_size = header.payload_size();
        if payload_size < CHUNK_HEADER_SIZE {
            return Err(TracebinError::TruncatedRecord {
                object_size: header.object_size,
                header_size: header.header_size,
            });
        }

        let mut chunk_header = [0u8; CHUNK_HEADER_SIZE as usize];
        stream.read_exact(&mut chunk_header)?;
        let method = u16::from_le_bytes([chunk_header[0], chunk_header[1]]);
        let uncompressed_size = u32::from_le_bytes([
            chunk_header[8],
            chunk_header[9],
            chunk_header[10],
            chunk_header[11],
        ]);

        let mut compressed = vec![0u8; (payload_size - CHUNK_HEADER_SIZE) as usize];
        stream.read_exact(&mut compressed)?;

        let pad = header.pad_size() as u64;
        if pad > 0 {
            stream.seek_read(stream.tell_read() + pad)?;
        }

        Ok(Chunk {
            compression_method: CompressionMethod::from_u16(method)?,
            uncompressed_size,
            compressed,
            file_position,
        })
    }
}
