//! File-level statistics block
//!
//! The first 144 bytes of every container. Written once at creation with
//! placeholder counters, rewritten in place on close with the final sizes
//! and object count. Readers treat the counters as advisory: old writers
//! were known to leave them stale, so a mismatch is never fatal.

use crate::error::{Result, TracebinError};
use chrono::{Datelike, Local, Timelike};

pub const STATISTICS_MAGIC: u32 = u32::from_le_bytes(*b"LOGG");
pub const STATISTICS_SIZE: u32 = 144;

/// Encoded version of the writing library, packed decimal
/// (major * 1_000_000 + minor * 10_000 + build * 100 + patch).
pub const API_NUMBER: u32 = 3_080_200;

/// Wall-clock instant, broken down field by field the way the on-disk
/// format stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokenDownTime {
    pub year: u16,
    pub month: u16,
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub milliseconds: u16,
}

impl BrokenDownTime {
    /// Capture the current local time.
    pub fn now() -> Self {
        let now = Local::now();
        BrokenDownTime {
            year: now.year() as u16,
            month: now.month() as u16,
            day_of_week: now.weekday().num_days_from_sunday() as u16,
            day: now.day() as u16,
            hour: now.hour() as u16,
            minute: now.minute() as u16,
            second: now.second() as u16,
            milliseconds: (now.timestamp_subsec_millis() % 1000) as u16,
        }
    }

    fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        for (i, field) in [
            self.year,
            self.month,
            self.day_of_week,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.milliseconds,
        ]
        .iter()
        .enumerate()
        {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let field = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
        BrokenDownTime {
            year: field(0),
            month: field(1),
            day_of_week: field(2),
            day: field(3),
            hour: field(4),
            minute: field(5),
            second: field(6),
            milliseconds: field(7),
        }
    }
}

/// Container statistics block
///
/// Holds the declared/actual byte sizes, the record count and the
/// measurement time range, plus the offset of the restore point trailer
/// (0 when no trailer was written).
#[derive(Debug, Clone)]
pub struct FileStatistics {
    /// Magic number: "LOGG"
    pub signature: u32,

    /// Size of this block in bytes. Newer writers may use a larger block;
    /// readers skip the extra bytes.
    pub statistics_size: u32,

    /// Version of the writing library, packed decimal.
    pub api_number: u32,

    /// Identifier of the writing application (0 = unknown).
    pub application_id: u8,

    /// Compression level the container was written with.
    pub compression_level: u8,

    pub application_major: u8,
    pub application_minor: u8,

    /// Total size of the container file in bytes.
    pub file_size: u64,

    /// Total uncompressed payload size, chunk headers included.
    pub uncompressed_file_size: u64,

    /// Number of records in the container (chunks excluded).
    pub object_count: u32,

    pub application_build: u32,

    /// Wall-clock time the measurement started.
    pub measurement_start_time: BrokenDownTime,

    /// Wall-clock time of the last record.
    pub last_object_time: BrokenDownTime,

    /// File offset of the restore point trailer, 0 if absent.
    pub restore_points_offset: u64,

    /// Reserved for future extensions.
    pub reserved: [u8; 64],
}

impl FileStatistics {
    pub fn new() -> Self {
        FileStatistics {
            signature: STATISTICS_MAGIC,
            statistics_size: STATISTICS_SIZE,
            api_number: API_NUMBER,
            application_id: 0,
            compression_level: 6,
            application_major: 0,
            application_minor: 0,
            file_size: 0,
            uncompressed_file_size: 0,
            object_count: 0,
            application_build: 0,
            measurement_start_time: BrokenDownTime::default(),
            last_object_time: BrokenDownTime::default(),
            restore_points_offset: 0,
            reserved: [0; 64],
        }
    }

    /// Validate the signature and declared block size.
    pub fn validate(&self) -> Result<()> {
        if self.signature != STATISTICS_MAGIC {
            return Err(TracebinError::InvalidMagic);
        }
        if self.statistics_size < STATISTICS_SIZE {
            return Err(TracebinError::UnsupportedStatisticsSize(
                self.statistics_size,
            ));
        }
        Ok(())
    }

    /// Serialize to the fixed 144-byte on-disk layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(STATISTICS_SIZE as usize);

        bytes.extend_from_slice(&self.signature.to_le_bytes());
        bytes.extend_from_slice(&self.statistics_size.to_le_bytes());
        bytes.extend_from_slice(&self.api_number.to_le_bytes());
        bytes.push(self.application_id);
        bytes.push(self.compression_level);
        bytes.push(self.application_major);
        bytes.push(self.application_minor);
        bytes.extend_from_slice(&self.file_size.to_le_bytes());
        bytes.extend_from_slice(&self.uncompressed_file_size.to_le_bytes());
        bytes.extend_from_slice(&self.object_count.to_le_bytes());
        bytes.extend_from_slice(&self.application_build.to_le_bytes());
        bytes.extend_from_slice(&self.measurement_start_time.to_bytes());
        bytes.extend_from_slice(&self.last_object_time.to_bytes());
        bytes.extend_from_slice(&self.restore_points_offset.to_le_bytes());
        bytes.extend_from_slice(&self.reserved);

        debug_assert_eq!(bytes.len(), STATISTICS_SIZE as usize);
        bytes
    }

    /// Deserialize and validate from the start of a container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STATISTICS_SIZE as usize {
            return Err(TracebinError::EndOfStream);
        }

        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        let u64_at = |o: usize| {
            u64::from_le_bytes([
                bytes[o],
                bytes[o + 1],
                bytes[o + 2],
                bytes[o + 3],
                bytes[o + 4],
                bytes[o + 5],
                bytes[o + 6],
                bytes[o + 7],
            ])
        };

        let mut stats = FileStatistics::new();
        stats.signature = u32_at(0);
        stats.statistics_size = u32_at(4);
        stats.api_number = u32_at(8);
        stats.application_id = bytes[12];
        stats.compression_level = bytes[13];
        stats.application_major = bytes[14];
        stats.application_minor = bytes[15];
        stats.file_size = u64_at(16);
        stats.uncompressed_file_size = u64_at(24);
        stats.object_count = u32_at(32);
        stats.application_build = u32_at(36);
        stats.measurement_start_time = BrokenDownTime::from_bytes(&bytes[40..56]);
        stats.last_object_time = BrokenDownTime::from_bytes(&bytes[56..72]);
        stats.restore_points_offset = u64_at(72);
        stats.reserved.copy_from_slice(&bytes[80..144]);

        stats.validate()?;
        Ok(stats)
    }
}

impl Default for FileStatistics {
    fn default() -> Self {
        Self::new()
    }
}
