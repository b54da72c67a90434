//! Record framing
//!
//! Every payload in the container — bus events and chunks alike — is
//! preceded by a small framing header that starts with the `LOBJ`
//! signature. Streams can carry garbage between records (aborted writes,
//! truncated chunks), so [`RecordHeader::read`] never assumes the next
//! four bytes are the signature: it scans forward, and a failed window's
//! trailing bytes are re-examined as a potential signature prefix so that
//! a magic value straddling two windows is still found.
//!
//! Header layouts evolved by appending fields. Each version is parsed as
//! far as this implementation knows the layout; whatever the declared
//! `header_size` adds beyond that is skipped, never an error.

use crate::error::{Result, TracebinError};
use crate::stream::ByteStream;
use std::collections::HashMap;

/// Record signature: "LOBJ" interpreted as a little-endian u32.
pub const RECORD_SIGNATURE: u32 = u32::from_le_bytes(*b"LOBJ");

/// Bytes of the version-independent header prefix.
pub const BASE_HEADER_SIZE: u16 = 16;

/// Record type reserved for compressed chunks.
pub const CHUNK_RECORD_TYPE: u32 = 10;

pub const HEADER_VERSION_BASIC: u16 = 1;
pub const HEADER_VERSION_EXTENDED: u16 = 2;
pub const HEADER_VERSION_VARIABLE: u16 = 3;

/// Version-dependent header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderExtension {
    /// Version 1: flags, client index and a nanosecond timestamp.
    Basic {
        flags: u32,
        client_index: u16,
        object_version: u16,
        timestamp: u64,
    },
    /// Version 2: adds a timestamp-status byte and the original
    /// (pre-resync) timestamp.
    Extended {
        flags: u32,
        timestamp_status: u8,
        object_version: u16,
        timestamp: u64,
        original_timestamp: u64,
    },
    /// Version 3: payload split point for records with a fixed part
    /// followed by dynamic data.
    Variable { static_size: u32 },
    /// Anything newer: base fields only, extension bytes skipped.
    Unknown,
}

impl HeaderExtension {
    /// Header size this implementation would write for the variant.
    fn known_size(&self) -> u16 {
        match self {
            HeaderExtension::Basic { .. } => 32,
            HeaderExtension::Extended { .. } => 40,
            HeaderExtension::Variable { .. } => 24,
            HeaderExtension::Unknown => BASE_HEADER_SIZE,
        }
    }
}

/// Framing header preceding every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Always [`RECORD_SIGNATURE`] after a successful read.
    pub signature: u32,

    /// Total header bytes on disk, extension included.
    pub header_size: u16,

    /// Selects the extension layout.
    pub header_version: u16,

    /// Total record bytes: header plus payload, excluding padding.
    pub object_size: u32,

    /// Record type, resolved by the external codec registry.
    pub record_type: u32,

    pub extension: HeaderExtension,
}

impl RecordHeader {
    /// Version-1 header for a payload of `payload_len` bytes.
    pub fn basic(record_type: u32, payload_len: u32, timestamp: u64) -> Self {
        let extension = HeaderExtension::Basic {
            flags: 0,
            client_index: 0,
            object_version: 0,
            timestamp,
        };
        RecordHeader {
            signature: RECORD_SIGNATURE,
            header_size: extension.known_size(),
            header_version: HEADER_VERSION_BASIC,
            object_size: extension.known_size() as u32 + payload_len,
            record_type,
            extension,
        }
    }

    /// Version-2 header carrying both timestamps.
    pub fn extended(
        record_type: u32,
        payload_len: u32,
        timestamp: u64,
        original_timestamp: u64,
    ) -> Self {
        let extension = HeaderExtension::Extended {
            flags: 0,
            timestamp_status: 0,
            object_version: 0,
            timestamp,
            original_timestamp,
        };
        RecordHeader {
            signature: RECORD_SIGNATURE,
            header_size: extension.known_size(),
            header_version: HEADER_VERSION_EXTENDED,
            object_size: extension.known_size() as u32 + payload_len,
            record_type,
            extension,
        }
    }

    /// Version-3 header with a payload split point.
    pub fn variable(record_type: u32, payload_len: u32, static_size: u32) -> Self {
        let extension = HeaderExtension::Variable { static_size };
        RecordHeader {
            signature: RECORD_SIGNATURE,
            header_size: extension.known_size(),
            header_version: HEADER_VERSION_VARIABLE,
            object_size: extension.known_size() as u32 + payload_len,
            record_type,
            extension,
        }
    }

    /// Bare 16-byte header, used for chunk framing.
    pub(crate) fn bare(record_type: u32, payload_len: u32) -> Self {
        RecordHeader {
            signature: RECORD_SIGNATURE,
            header_size: BASE_HEADER_SIZE,
            header_version: HEADER_VERSION_BASIC,
            object_size: BASE_HEADER_SIZE as u32 + payload_len,
            record_type,
            extension: HeaderExtension::Basic {
                flags: 0,
                client_index: 0,
                object_version: 0,
                timestamp: 0,
            },
        }
    }

    /// Payload bytes following this header.
    pub fn payload_size(&self) -> u32 {
        self.object_size - self.header_size as u32
    }

    /// Pad bytes after the payload. The historical rule is
    /// `object_size % 4`, not the distance to the next boundary; changing
    /// it would break every container already on disk.
    pub fn pad_size(&self) -> u32 {
        self.object_size % 4
    }

    /// Timestamp carried by the header, 0 when the variant has none.
    pub fn timestamp(&self) -> u64 {
        match self.extension {
            HeaderExtension::Basic { timestamp, .. } => timestamp,
            HeaderExtension::Extended { timestamp, .. } => timestamp,
            _ => 0,
        }
    }

    /// Read the next header, resynchronizing on the signature.
    ///
    /// Scans forward through arbitrary garbage. A window that fails the
    /// signature test is not discarded whole: its longest suffix that is
    /// a prefix of the signature is kept as the start of the next window,
    /// so signatures overlapping a failed read are found. Fails with
    /// `EndOfStream` when the physical end is reached without a match.
    pub fn read(stream: &dyn ByteStream) -> Result<RecordHeader> {
        let magic = RECORD_SIGNATURE.to_le_bytes();
        let mut window = [0u8; 4];

        stream.read_exact(&mut window)?;
        while window != magic {
            // Longest window suffix that could begin a signature; rewind
            // so the next window starts there.
            let keep = (1..4usize)
                .rev()
                .find(|&k| window[4 - k..] == magic[..k])
                .unwrap_or(0);
            if keep > 0 {
                stream.seek_read(stream.tell_read() - keep as u64)?;
            }
            stream.read_exact(&mut window)?;
        }

        let mut base = [0u8; 12];
        stream.read_exact(&mut base)?;
        let header_size = u16::from_le_bytes([base[0], base[1]]);
        let header_version = u16::from_le_bytes([base[2], base[3]]);
        let object_size = u32::from_le_bytes([base[4], base[5], base[6], base[7]]);
        let record_type = u32::from_le_bytes([base[8], base[9], base[10], base[11]]);

        if header_size < BASE_HEADER_SIZE || object_size < header_size as u32 {
            return Err(TracebinError::TruncatedRecord {
                object_size,
                header_size,
            });
        }

        let ext_len = (header_size - BASE_HEADER_SIZE) as usize;
        let mut ext = vec![0u8; ext_len];
        stream.read_exact(&mut ext)?;
        let extension = Self::parse_extension(header_version, &ext);

        Ok(RecordHeader {
            signature: RECORD_SIGNATURE,
            header_size,
            header_version,
            object_size,
            record_type,
            extension,
        })
    }

    /// Parse the extension fields that are actually present. Fields were
    /// appended version by version, so each is read only when it fits
    /// completely; everything past the known layout is ignored.
    fn parse_extension(version: u16, ext: &[u8]) -> HeaderExtension {
        let mut cursor = FieldCursor { bytes: ext, pos: 0 };
        match version {
            HEADER_VERSION_BASIC => HeaderExtension::Basic {
                flags: cursor.u32().unwrap_or(0),
                client_index: cursor.u16().unwrap_or(0),
                object_version: cursor.u16().unwrap_or(0),
                timestamp: cursor.u64().unwrap_or(0),
            },
            HEADER_VERSION_EXTENDED => {
                let flags = cursor.u32().unwrap_or(0);
                let timestamp_status = cursor.u8().unwrap_or(0);
                let _reserved = cursor.u8();
                HeaderExtension::Extended {
                    flags,
                    timestamp_status,
                    object_version: cursor.u16().unwrap_or(0),
                    timestamp: cursor.u64().unwrap_or(0),
                    original_timestamp: cursor.u64().unwrap_or(0),
                }
            }
            HEADER_VERSION_VARIABLE => HeaderExtension::Variable {
                static_size: cursor.u32().unwrap_or(0),
            },
            _ => HeaderExtension::Unknown,
        }
    }

    /// Write the header, emitting exactly `header_size` bytes.
    pub fn write(&self, stream: &dyn ByteStream) -> Result<()> {
        let mut bytes = Vec::with_capacity(self.header_size as usize);
        bytes.extend_from_slice(&RECORD_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&self.header_size.to_le_bytes());
        bytes.extend_from_slice(&self.header_version.to_le_bytes());
        bytes.extend_from_slice(&self.object_size.to_le_bytes());
        bytes.extend_from_slice(&self.record_type.to_le_bytes());

        match self.extension {
            HeaderExtension::Basic {
                flags,
                client_index,
                object_version,
                timestamp,
            } => {
                bytes.extend_from_slice(&flags.to_le_bytes());
                bytes.extend_from_slice(&client_index.to_le_bytes());
                bytes.extend_from_slice(&object_version.to_le_bytes());
                bytes.extend_from_slice(&timestamp.to_le_bytes());
            }
            HeaderExtension::Extended {
                flags,
                timestamp_status,
                object_version,
                timestamp,
                original_timestamp,
            } => {
                bytes.extend_from_slice(&flags.to_le_bytes());
                bytes.push(timestamp_status);
                bytes.push(0);
                bytes.extend_from_slice(&object_version.to_le_bytes());
                bytes.extend_from_slice(&timestamp.to_le_bytes());
                bytes.extend_from_slice(&original_timestamp.to_le_bytes());
            }
            HeaderExtension::Variable { static_size } => {
                bytes.extend_from_slice(&static_size.to_le_bytes());
                bytes.extend_from_slice(&[0u8; 4]);
            }
            HeaderExtension::Unknown => {}
        }

        // Honor a declared size that differs from the known layout.
        bytes.resize(self.header_size as usize, 0);
        stream.write(&bytes)
    }
}

/// Reads whole little-endian fields from an extension buffer, yielding
/// `None` once a field no longer fits.
struct FieldCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl FieldCursor<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        if self.pos + n > self.bytes.len() {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }
}

/// One framed record: header plus the raw, uninterpreted payload.
///
/// Payload decoding belongs to the external [`CodecRegistry`]; the engine
/// only moves bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl Record {
    /// Build a record, fixing up the header's object size to match the
    /// payload.
    pub fn new(mut header: RecordHeader, payload: Vec<u8>) -> Self {
        header.object_size = header.header_size as u32 + payload.len() as u32;
        Record { header, payload }
    }

    /// Read the next record: header (with resync), payload, pad skip.
    pub fn read(stream: &dyn ByteStream) -> Result<Record> {
        let header = RecordHeader::read(stream)?;
        let mut payload = vec![0u8; header.payload_size() as usize];
        stream.read_exact(&mut payload)?;

        let pad = header.pad_size() as u64;
        if pad > 0 {
            stream.seek_read(stream.tell_read() + pad)?;
        }

        Ok(Record { header, payload })
    }

    /// Write header, payload and pad bytes.
    pub fn write(&self, stream: &dyn ByteStream) -> Result<()> {
        self.header.write(stream)?;
        stream.write(&self.payload)?;

        let pad = self.header.pad_size() as usize;
        if pad > 0 {
            stream.write(&[0u8; 3][..pad])?;
        }
        Ok(())
    }

    /// Total bytes the record occupies on disk, pad included.
    pub fn encoded_len(&self) -> u64 {
        self.header.object_size as u64 + self.header.pad_size() as u64
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp()
    }
}

/// Payload codec for one `(record_type, header_version)` pair.
///
/// Implemented outside this crate, once per concrete event kind. `T` is
/// the consumer's decoded representation.
pub trait RecordCodec<T>: Send + Sync {
    fn decode(&self, header: &RecordHeader, payload: &[u8]) -> Result<T>;
    fn encode(&self, value: &T) -> Result<Vec<u8>>;
    /// Encoded payload size, used to fill `object_size` before writing.
    fn encoded_size(&self, value: &T) -> u32;
}

/// Dispatch table from `(record_type, header_version)` to codecs.
pub struct CodecRegistry<T> {
    codecs: HashMap<(u32, u16), Box<dyn RecordCodec<T>>>,
}

impl<T> CodecRegistry<T> {
    pub fn new() -> Self {
        CodecRegistry {
            codecs: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        record_type: u32,
        header_version: u16,
        codec: Box<dyn RecordCodec<T>>,
    ) {
        self.codecs.insert((record_type, header_version), codec);
    }

    pub fn lookup(&self, record_type: u32, header_version: u16) -> Option<&dyn RecordCodec<T>> {
        self.codecs
            .get(&(record_type, header_version))
            .map(|c| c.as_ref())
    }

    /// Decode a framed record, `None` when no codec is registered.
    pub fn decode(&self, record: &Record) -> Result<Option<T>> {
        match self.lookup(record.header.record_type, record.header.header_version) {
            Some(codec) => codec.decode(&record.header, &record.payload).map(Some),
            None => Ok(None),
        }
    }
}

impl<T> Default for CodecRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
