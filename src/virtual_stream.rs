//! Virtual uncompressed stream
//!
//! Presents the concatenated decompressed payloads of many chunks as one
//! logically contiguous, arbitrarily seekable byte range, so record
//! codecs never see chunk boundaries or compression. Only a rolling
//! window of chunks is resident: [`VirtualStream::drop_old_data`]
//! releases everything behind both cursors.
//!
//! The stream is a monitor: one mutex guards the cursors and the chunk
//! list, one condvar signals "data became available" (write, write-seek,
//! append, end declared), the other "space became available" (read,
//! read-seek, drop). No wait ever holds a second lock.

use crate::error::{Result, TracebinError};
use crate::stream::ByteStream;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct ResidentChunk {
    /// Logical offset of `data[0]`.
    start: u64,
    data: Vec<u8>,
    /// Container file position of the source chunk (read path only).
    source_position: u64,
}

impl ResidentChunk {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }
}

struct StreamState {
    chunks: VecDeque<ResidentChunk>,
    /// Logical offset where the next allocated/appended chunk starts.
    alloc_end: u64,
    read_pos: u64,
    write_pos: u64,
    /// Highest logical offset that holds written data.
    watermark: u64,
    /// Declared end of data; reads at or past it return EOF.
    logical_end: Option<u64>,
    max_resident: Option<usize>,
    chunk_size: u32,
    aborted: bool,
}

impl StreamState {
    /// Backlog a writer is charged for.
    fn unread(&self) -> u64 {
        self.watermark.saturating_sub(self.read_pos)
    }

    fn chunk_containing(&self, pos: u64) -> Option<&ResidentChunk> {
        self.chunks.iter().find(|c| c.start <= pos && pos < c.end())
    }

    /// Allocate zero-filled chunks until logical offset `end` is backed.
    fn grow_to(&mut self, end: u64) {
        while self.alloc_end < end {
            let start = self.alloc_end;
            self.chunks.push_back(ResidentChunk {
                start,
                data: vec![0; self.chunk_size as usize],
                source_position: 0,
            });
            self.alloc_end = start + self.chunk_size as u64;
        }
    }

    /// Copy resident bytes at `pos` into `buf`; gaps read as zeros.
    fn copy_out(&self, pos: u64, buf: &mut [u8]) {
        let mut filled = 0;
        while filled < buf.len() {
            let p = pos + filled as u64;
            if let Some(chunk) = self.chunk_containing(p) {
                let off = (p - chunk.start) as usize;
                let n = (chunk.data.len() - off).min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&chunk.data[off..off + n]);
                filled += n;
            } else {
                let next_start = self
                    .chunks
                    .iter()
                    .map(|c| c.start)
                    .filter(|&s| s > p)
                    .min();
                let n = match next_start {
                    Some(s) => ((s - p) as usize).min(buf.len() - filled),
                    None => buf.len() - filled,
                };
                buf[filled..filled + n].fill(0);
                filled += n;
            }
        }
    }

    /// Copy `buf` into resident chunks at `pos`. Bytes aimed at already
    /// released chunks cannot be stored and are skipped.
    fn copy_in(&mut self, pos: u64, buf: &[u8]) {
        self.grow_to(pos + buf.len() as u64);
        let mut done = 0;
        while done < buf.len() {
            let p = pos + done as u64;
            let slot = self
                .chunks
                .iter_mut()
                .find(|c| c.start <= p && p < c.end());
            match slot {
                Some(chunk) => {
                    let off = (p - chunk.start) as usize;
                    let n = (chunk.data.len() - off).min(buf.len() - done);
                    chunk.data[off..off + n].copy_from_slice(&buf[done..done + n]);
                    done += n;
                }
                None => {
                    tracing::warn!(pos = p, "write into released chunk window ignored");
                    let next_start = self
                        .chunks
                        .iter()
                        .map(|c| c.start)
                        .filter(|&s| s > p)
                        .min();
                    let n = match next_start {
                        Some(s) => ((s - p) as usize).min(buf.len() - done),
                        None => buf.len() - done,
                    };
                    done += n;
                }
            }
        }
    }
}

/// Logical contiguous byte stream over a rolling window of chunks.
pub struct VirtualStream {
    state: Mutex<StreamState>,
    data_available: Condvar,
    space_available: Condvar,
}

impl VirtualStream {
    /// `chunk_size` is the auto-grow granularity on the write path;
    /// `max_resident` bounds the unread backlog (writers block at it).
    pub fn new(chunk_size: u32, max_resident: Option<usize>) -> Self {
        VirtualStream {
            state: Mutex::new(StreamState {
                chunks: VecDeque::new(),
                alloc_end: 0,
                read_pos: 0,
                write_pos: 0,
                watermark: 0,
                logical_end: None,
                max_resident,
                chunk_size,
                aborted: false,
            }),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
        }
    }

    /// Append one decompressed chunk payload at the logical tail,
    /// remembering which container chunk it came from. Blocks while the
    /// unread backlog exceeds the resident bound.
    pub fn append_chunk(&self, payload: Vec<u8>, source_position: u64) -> Result<()> {
        let mut state = self.state.lock();
        while !state.aborted
            && state
                .max_resident
                .map_or(false, |max| state.unread() > max as u64)
        {
            self.space_available.wait(&mut state);
        }
        if state.aborted {
            return Err(TracebinError::Cancelled);
        }

        let start = state.alloc_end;
        let end = start + payload.len() as u64;
        state.chunks.push_back(ResidentChunk {
            start,
            data: payload,
            source_position,
        });
        state.alloc_end = end;
        state.watermark = state.watermark.max(end);
        state.write_pos = state.write_pos.max(end);
        drop(state);
        self.data_available.notify_all();
        Ok(())
    }

    /// Declare the final logical size; blocked readers wake and observe
    /// EOF once they reach it.
    pub fn set_logical_end(&self, pos: u64) {
        let mut state = self.state.lock();
        state.logical_end = Some(pos);
        drop(state);
        self.data_available.notify_all();
    }

    /// Release every chunk that lies entirely behind both cursors.
    pub fn drop_old_data(&self) {
        let mut state = self.state.lock();
        let keep_from = state.read_pos.min(state.write_pos);
        let mut dropped = 0usize;
        while let Some(front) = state.chunks.front() {
            if front.end() <= keep_from {
                dropped += front.data.len();
                state.chunks.pop_front();
            } else {
                break;
            }
        }
        drop(state);
        if dropped > 0 {
            tracing::trace!(bytes = dropped, "released old chunk window");
            self.space_available.notify_all();
        }
    }

    /// Wake every blocked reader and writer; all further blocking calls
    /// return `Cancelled`. Safe to call repeatedly, from any thread.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        drop(state);
        self.data_available.notify_all();
        self.space_available.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Container file position and in-chunk offset backing a logical
    /// offset (read path).
    pub fn source_of(&self, pos: u64) -> Option<(u64, u32)> {
        let state = self.state.lock();
        state
            .chunk_containing(pos)
            .map(|c| (c.source_position, (pos - c.start) as u32))
    }

    /// Resident chunk payload bytes (diagnostics, tests).
    pub fn resident_bytes(&self) -> usize {
        let state = self.state.lock();
        state.chunks.iter().map(|c| c.data.len()).sum()
    }
}

impl ByteStream for VirtualStream {
    /// Blocks until `buf.len()` bytes are readable, the declared end
    /// permits only a short read, or the stream is aborted. Returns 0 at
    /// the declared end.
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(TracebinError::Cancelled);
            }
            if let Some(end) = state.logical_end {
                if state.read_pos >= end {
                    return Ok(0);
                }
            }

            let avail = state.watermark.saturating_sub(state.read_pos);
            let complete = state
                .logical_end
                .map_or(false, |end| state.watermark >= end);
            if avail >= buf.len() as u64 || (complete && avail > 0) {
                break;
            }
            self.data_available.wait(&mut state);
        }

        let avail = state.watermark - state.read_pos;
        let n = (buf.len() as u64).min(avail) as usize;
        let pos = state.read_pos;
        state.copy_out(pos, &mut buf[..n]);
        state.read_pos += n as u64;
        drop(state);
        self.space_available.notify_all();
        Ok(n)
    }

    /// Never fails for lack of space — chunks grow on demand — but
    /// blocks while the unread backlog sits above the resident bound.
    fn write(&self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        while !state.aborted
            && state
                .max_resident
                .map_or(false, |max| state.unread() > max as u64)
        {
            self.space_available.wait(&mut state);
        }
        if state.aborted {
            return Err(TracebinError::Cancelled);
        }

        let pos = state.write_pos;
        state.copy_in(pos, buf);
        state.write_pos = pos + buf.len() as u64;
        state.watermark = state.watermark.max(state.write_pos);
        drop(state);
        self.data_available.notify_all();
        Ok(())
    }

    fn seek_read(&self, pos: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.read_pos = pos;
        drop(state);
        self.space_available.notify_all();
        Ok(())
    }

    fn seek_write(&self, pos: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.write_pos = pos;
        drop(state);
        self.data_available.notify_all();
        Ok(())
    }

    fn tell_read(&self) -> u64 {
        self.state.lock().read_pos
    }

    fn tell_write(&self) -> u64 {
        self.state.lock().write_pos
    }

    fn is_eof(&self) -> bool {
        let state = self.state.lock();
        state
            .logical_end
            .map_or(false, |end| state.read_pos >= end)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.state.lock().watermark)
    }
}
