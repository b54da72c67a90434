//! Sparse restore-point index
//!
//! A periodic index of (timestamp, chunk file position, in-chunk offset)
//! triples, built while writing and serialized once as a trailer block.
//! A reader seeks by binary-searching the index, positioning the
//! container at the entry's chunk and scanning forward record by record —
//! which must land on exactly the record a scan from offset zero would
//! find.
//!
//! Spacing quirk: a point is captured every `interval + 1` records, not
//! every `interval`. Containers in the field were written that way, so
//! the spacing is part of the on-disk contract; the configured interval
//! is stored in the trailer so readers never have to guess.

use crate::error::{Result, TracebinError};
use crate::stream::ByteStream;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// On-disk size of one restore point.
pub const RESTORE_POINT_SIZE: u32 = 24;

/// Trailer prefix: total size + interval.
pub const TRAILER_HEADER_SIZE: u32 = 8;

/// One seekable position in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorePoint {
    /// Timestamp of the record this point lands on.
    pub timestamp: u64,

    /// File offset of the chunk's framing header.
    pub chunk_file_position: u64,

    /// Offset of the record inside the chunk's decompressed payload.
    pub offset_in_chunk: u32,

    pub reserved: u32,
}

impl RestorePoint {
    fn to_bytes(self) -> [u8; RESTORE_POINT_SIZE as usize] {
        let mut bytes = [0u8; RESTORE_POINT_SIZE as usize];
        bytes[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.chunk_file_position.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.offset_in_chunk.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.reserved.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
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
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        RestorePoint {
            timestamp: u64_at(0),
            chunk_file_position: u64_at(8),
            offset_in_chunk: u32_at(16),
            reserved: u32_at(20),
        }
    }
}

/// Immutable, ordered restore-point sequence.
///
/// Created once per container on finalize, consumed at open time, never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct SparseIndex {
    interval: u32,
    points: Vec<RestorePoint>,
}

impl SparseIndex {
    pub fn new(interval: u32, points: Vec<RestorePoint>) -> Self {
        SparseIndex { interval, points }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Records between consecutive points (the historical
    /// `interval + 1`).
    pub fn spacing(&self) -> u64 {
        self.interval as u64 + 1
    }

    pub fn points(&self) -> &[RestorePoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Last point whose timestamp is not after `target`.
    pub fn find_by_timestamp(&self, target: u64) -> Option<&RestorePoint> {
        let idx = self.points.partition_point(|p| p.timestamp <= target);
        if idx == 0 {
            None
        } else {
            Some(&self.points[idx - 1])
        }
    }

    /// Point covering `ordinal` plus the records still to skip forward.
    /// Entry `i` sits on record `i * spacing`.
    pub fn find_by_ordinal(&self, ordinal: u64) -> Option<(&RestorePoint, u64)> {
        if self.points.is_empty() {
            return None;
        }
        let idx = ((ordinal / self.spacing()) as usize).min(self.points.len() - 1);
        Some((&self.points[idx], ordinal - idx as u64 * self.spacing()))
    }

    /// Serialize the trailer block at the stream's write cursor.
    pub fn write(&self, stream: &dyn ByteStream) -> Result<()> {
        let total_size =
            TRAILER_HEADER_SIZE + self.points.len() as u32 * RESTORE_POINT_SIZE;
        let mut bytes = Vec::with_capacity(total_size as usize);
        bytes.extend_from_slice(&total_size.to_le_bytes());
        bytes.extend_from_slice(&self.interval.to_le_bytes());
        for point in &self.points {
            bytes.extend_from_slice(&point.to_bytes());
        }
        stream.write(&bytes)
    }

    /// Parse the trailer block at the stream's read cursor.
    pub fn read(stream: &dyn ByteStream) -> Result<SparseIndex> {
        let mut header = [0u8; TRAILER_HEADER_SIZE as usize];
        stream.read_exact(&mut header)?;
        let total_size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let interval = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if total_size < TRAILER_HEADER_SIZE
            || (total_size - TRAILER_HEADER_SIZE) % RESTORE_POINT_SIZE != 0
        {
            return Err(TracebinError::CorruptIndex(format!(
                "trailer size {} is not a whole number of entries",
                total_size
            )));
        }

        let count = (total_size - TRAILER_HEADER_SIZE) / RESTORE_POINT_SIZE;
        let mut body = vec![0u8; (count * RESTORE_POINT_SIZE) as usize];
        stream.read_exact(&mut body)?;

        let points: Vec<RestorePoint> = body
            .chunks_exact(RESTORE_POINT_SIZE as usize)
            .map(RestorePoint::from_bytes)
            .collect();

        for pair in points.windows(2) {
            if pair[1].timestamp < pair[0].timestamp
                || (pair[1].chunk_file_position, pair[1].offset_in_chunk)
                    <= (pair[0].chunk_file_position, pair[0].offset_in_chunk)
            {
                return Err(TracebinError::CorruptIndex(
                    "entries are not monotonically increasing".into(),
                ));
            }
        }

        Ok(SparseIndex { interval, points })
    }
}

struct PendingPoint {
    timestamp: u64,
    logical_offset: u64,
}

struct BuilderState {
    next_ordinal: u64,
    pending: VecDeque<PendingPoint>,
    points: Vec<RestorePoint>,
}

/// Incremental index construction across two pipeline stages.
///
/// The encode stage notes a record's timestamp and logical offset when
/// the ordinal hits the capture spacing; the deflate stage later learns
/// where each chunk landed in the file and finalizes the pending notes
/// that fall inside it.
pub struct SparseIndexBuilder {
    interval: u32,
    state: Mutex<BuilderState>,
}

impl SparseIndexBuilder {
    pub fn new(interval: u32) -> Self {
        SparseIndexBuilder {
            interval,
            state: Mutex::new(BuilderState {
                next_ordinal: 0,
                pending: VecDeque::new(),
                points: Vec::new(),
            }),
        }
    }

    fn spacing(&self) -> u64 {
        self.interval as u64 + 1
    }

    /// Called by the encode stage for every record, in order.
    pub fn note_record(&self, timestamp: u64, logical_offset: u64) {
        let mut state = self.state.lock();
        let ordinal = state.next_ordinal;
        state.next_ordinal += 1;
        if ordinal % self.spacing() == 0 {
            state.pending.push_back(PendingPoint {
                timestamp,
                logical_offset,
            });
        }
    }

    /// Called by the deflate stage once a chunk covering the logical
    /// range `[logical_start, logical_end)` has been written at
    /// `file_position`.
    pub fn finalize_chunk(&self, logical_start: u64, logical_end: u64, file_position: u64) {
        let mut state = self.state.lock();
        while state
            .pending
            .front()
            .map_or(false, |p| p.logical_offset < logical_end)
        {
            let pending = match state.pending.pop_front() {
                Some(pending) => pending,
                None => break,
            };
            if pending.logical_offset < logical_start {
                // A note behind the chunk means stages ran out of order.
                tracing::warn!(
                    offset = pending.logical_offset,
                    chunk_start = logical_start,
                    "restore point note precedes current chunk, dropped"
                );
                continue;
            }
            state.points.push(RestorePoint {
                timestamp: pending.timestamp,
                chunk_file_position: file_position,
                offset_in_chunk: (pending.logical_offset - logical_start) as u32,
                reserved: 0,
            });
        }
    }

    /// Records noted so far.
    pub fn ordinal(&self) -> u64 {
        self.state.lock().next_ordinal
    }

    pub fn build(self) -> SparseIndex {
        let state = self.state.into_inner();
        if !state.pending.is_empty() {
            tracing::warn!(
                count = state.pending.len(),
                "restore point notes never matched a chunk"
            );
        }
        SparseIndex::new(self.interval, state.points)
    }
}
