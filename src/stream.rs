//! Byte-level storage backends
//!
//! [`ByteStream`] is the random-access byte source/sink contract the rest
//! of the engine is written against. [`RawFile`] is the OS-file backing;
//! it is shared by several pipeline threads and guards every call with a
//! single mutex. Consistency is per call only — callers that need
//! multi-call atomicity must serialize at a higher level.

use crate::error::{Result, TracebinError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random-access byte source/sink with independent read and write cursors.
pub trait ByteStream: Send + Sync {
    /// Read up to `buf.len()` bytes at the read cursor. Returns the number
    /// of bytes read; 0 means the physical end of data.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf` at the write cursor.
    fn write(&self, buf: &[u8]) -> Result<()>;

    /// Reposition the read cursor.
    fn seek_read(&self, pos: u64) -> Result<()>;

    /// Reposition the write cursor.
    fn seek_write(&self, pos: u64) -> Result<()>;

    /// Current read cursor.
    fn tell_read(&self) -> u64;

    /// Current write cursor.
    fn tell_write(&self) -> u64;

    /// True once a read has hit the physical end of data.
    fn is_eof(&self) -> bool;

    /// Total bytes currently stored.
    fn len(&self) -> Result<u64>;

    /// Read exactly `buf.len()` bytes or fail with `EndOfStream`.
    fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(TracebinError::EndOfStream);
            }
            filled += n;
        }
        Ok(())
    }
}

struct RawFileInner {
    file: File,
    read_pos: u64,
    write_pos: u64,
    eof: bool,
}

/// Disk-backed [`ByteStream`]
///
/// One mutex per file; each trait call locks, positions the OS cursor and
/// performs the transfer, so the file can be handed to the disk-I/O stages
/// of both pipelines without extra wrapping.
pub struct RawFile {
    inner: Mutex<RawFileInner>,
    path: PathBuf,
}

impl RawFile {
    /// Create (truncating) a container file for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(RawFile {
            inner: Mutex::new(RawFileInner {
                file,
                read_pos: 0,
                write_pos: 0,
                eof: false,
            }),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing container file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(RawFile {
            inner: Mutex::new(RawFileInner {
                file,
                read_pos: 0,
                write_pos: 0,
                eof: false,
            }),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush OS buffers to disk.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }
}

impl ByteStream for RawFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let pos = inner.read_pos;
        inner.file.seek(SeekFrom::Start(pos))?;
        let n = inner.file.read(buf)?;
        inner.read_pos += n as u64;
        if n == 0 && !buf.is_empty() {
            inner.eof = true;
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let pos = inner.write_pos;
        inner.file.seek(SeekFrom::Start(pos))?;
        inner.file.write_all(buf)?;
        inner.write_pos += buf.len() as u64;
        Ok(())
    }

    fn seek_read(&self, pos: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.read_pos = pos;
        inner.eof = false;
        Ok(())
    }

    fn seek_write(&self, pos: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.write_pos = pos;
        Ok(())
    }

    fn tell_read(&self) -> u64 {
        self.inner.lock().read_pos
    }

    fn tell_write(&self) -> u64 {
        self.inner.lock().write_pos
    }

    fn is_eof(&self) -> bool {
        self.inner.lock().eof
    }

    fn len(&self) -> Result<u64> {
        let inner = self.inner.lock();
        Ok(inner.file.metadata()?.len())
    }
}

struct MemoryInner {
    data: Vec<u8>,
    read_pos: u64,
    write_pos: u64,
    eof: bool,
}

/// In-memory [`ByteStream`] backed by a growable buffer.
///
/// Behaves like [`RawFile`] without touching the filesystem; writes past
/// the current end zero-fill the gap.
pub struct MemoryStream {
    inner: Mutex<MemoryInner>,
}

impl MemoryStream {
    pub fn new() -> Self {
        MemoryStream {
            inner: Mutex::new(MemoryInner {
                data: Vec::new(),
                read_pos: 0,
                write_pos: 0,
                eof: false,
            }),
        }
    }

    /// Seed the stream with existing container bytes.
    pub fn from_vec(data: Vec<u8>) -> Self {
        MemoryStream {
            inner: Mutex::new(MemoryInner {
                data,
                read_pos: 0,
                write_pos: 0,
                eof: false,
            }),
        }
    }

    /// Snapshot of the stored bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStream for MemoryStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let pos = inner.read_pos as usize;
        if pos >= inner.data.len() {
            if !buf.is_empty() {
                inner.eof = true;
            }
            return Ok(0);
        }
        let n = buf.len().min(inner.data.len() - pos);
        buf[..n].copy_from_slice(&inner.data[pos..pos + n]);
        inner.read_pos += n as u64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let pos = inner.write_pos as usize;
        let end = pos + buf.len();
        if inner.data.len() < end {
            inner.data.resize(end, 0);
        }
        inner.data[pos..end].copy_from_slice(buf);
        inner.write_pos = end as u64;
        Ok(())
    }

    fn seek_read(&self, pos: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.read_pos = pos;
        inner.eof = false;
        Ok(())
    }

    fn seek_write(&self, pos: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.write_pos = pos;
        Ok(())
    }

    fn tell_read(&self) -> u64 {
        self.inner.lock().read_pos
    }

    fn tell_write(&self) -> u64 {
        self.inner.lock().write_pos
    }

    fn is_eof(&self) -> bool {
        self.inner.lock().eof
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().data.len() as u64)
    }
}
