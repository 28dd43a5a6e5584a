//! The record store.
//!
//! A store owns a single file of length-prefixed frames. Appends are staged
//! in an in-memory buffer and handed to the file according to the configured
//! [`FlushPolicy`](crate::FlushPolicy); every read path flushes first so a
//! record is readable as soon as `append` returns.
//!
//! All operations take the same lock. Appends are therefore totally ordered
//! and the offset returned by the Nth append is the sum of the sizes of the
//! frames before it.

use crate::config::{StoreConfig, TailRecovery};
use crate::error::StoreError;
use crate::frame::{self, LEN_WIDTH};
use crate::scan;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// I/O statistics for a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Successful appends.
    pub appends: u64,
    /// Successful `read` and `read_at` calls.
    pub reads: u64,
    /// Frame bytes appended, including length prefixes.
    pub bytes_appended: u64,
    /// Bytes returned by reads.
    pub bytes_read: u64,
    /// Flushes that wrote buffered bytes to the file.
    pub flushes: u64,
    /// Fsync operations.
    pub syncs: u64,
}

/// Backing file operations used by the store.
pub(crate) trait StoreFile: Write + Send {
    /// Reads into `buf` starting at `offset` until `buf` is full or end of file.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn set_len(&mut self, len: u64) -> io::Result<()>;

    fn sync_data(&mut self) -> io::Result<()>;
}

impl StoreFile for File {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            match self.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(read)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// State guarded by the store lock. Dropped on close.
struct StoreInner {
    /// Opened in append mode: writes always land at the end of the file
    /// and positional reads never move the write position.
    file: Box<dyn StoreFile>,
    /// Frames accepted by `append` but not yet written to `file`.
    buf: BytesMut,
    /// Logical end of data, including buffered frames.
    size: u64,
    /// End of data already written to `file`.
    durable: u64,
    /// Start offset of every frame, ascending.
    frame_starts: Vec<u64>,
    /// Set when a failed write could not be cut back to `durable`. The file
    /// may hold stray bytes past `durable`, so nothing more is written.
    poisoned: bool,
}

impl StoreInner {
    /// Writes the pending buffer to the file.
    ///
    /// On failure the file is cut back to the last durable offset so no
    /// partial frame is left behind, and the buffer is kept for a retry.
    /// If the cut itself fails the store is poisoned.
    fn flush(&mut self) -> Result<bool, StoreError> {
        if self.poisoned {
            return Err(StoreError::Poisoned {
                offset: self.durable,
            });
        }
        if self.buf.is_empty() {
            return Ok(false);
        }

        if let Err(e) = self.file.write_all(&self.buf) {
            if let Err(trunc) = self.file.set_len(self.durable) {
                self.poisoned = true;
                tracing::error!(
                    "Failed to cut store back to offset {} after write error ({}): {}",
                    self.durable,
                    e,
                    trunc
                );
                return Err(StoreError::Poisoned {
                    offset: self.durable,
                });
            }
            return Err(e.into());
        }

        self.durable += self.buf.len() as u64;
        self.buf.clear();
        Ok(true)
    }

    fn is_frame_start(&self, offset: u64) -> bool {
        self.frame_starts.binary_search(&offset).is_ok()
    }
}

/// Returns the open, usable state behind the lock.
fn live(slot: &mut Option<StoreInner>) -> Result<&mut StoreInner, StoreError> {
    let inner = slot.as_mut().ok_or(StoreError::Closed)?;
    if inner.poisoned {
        return Err(StoreError::Poisoned {
            offset: inner.durable,
        });
    }
    Ok(inner)
}

/// Append-only record store over a single file.
///
/// The store keeps the start offset of every frame in memory (8 bytes per
/// record) so reads at an offset inside a frame are rejected, and `open`
/// reads every frame header to rebuild that index. Both costs grow linearly
/// with the number of records; callers bound them by rolling to a new store.
pub struct Store {
    path: PathBuf,
    config: StoreConfig,
    inner: Mutex<Option<StoreInner>>,
    /// Mirrors of the logical size and frame count, readable without the lock.
    size: AtomicU64,
    frames: AtomicU64,
    /// I/O statistics counters.
    stats_appends: AtomicU64,
    stats_reads: AtomicU64,
    stats_bytes_appended: AtomicU64,
    stats_bytes_read: AtomicU64,
    stats_flushes: AtomicU64,
    stats_syncs: AtomicU64,
}

impl Store {
    /// Opens or creates a store at `path` with the default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens or creates a store at `path`.
    ///
    /// The next append offset is the end of the last complete frame in the
    /// file. Trailing bytes that do not form a complete frame are handled
    /// according to `config.tail_recovery`, which by default refuses to open
    /// and leaves the file untouched.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::InvalidConfig)?;

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let layout = scan::frame_layout(&path)?;
        if let Some(torn) = layout.torn {
            match config.tail_recovery {
                TailRecovery::Fail => return Err(torn),
                TailRecovery::Truncate => {
                    file.set_len(layout.valid_len)?;
                    file.sync_all()?;
                    tracing::warn!(
                        "Truncated torn tail of store {} at offset {} (removed {} bytes)",
                        path.display(),
                        layout.valid_len,
                        layout.file_len - layout.valid_len
                    );
                }
            }
        }

        tracing::info!(
            "Opened store {}: {} frames, size={}",
            path.display(),
            layout.starts.len(),
            layout.valid_len
        );

        Ok(Self::from_parts(
            path,
            config,
            Box::new(file),
            layout.valid_len,
            layout.starts,
        ))
    }

    fn from_parts(
        path: PathBuf,
        config: StoreConfig,
        file: Box<dyn StoreFile>,
        size: u64,
        frame_starts: Vec<u64>,
    ) -> Self {
        let frames = frame_starts.len() as u64;
        Self {
            path,
            config,
            inner: Mutex::new(Some(StoreInner {
                file,
                buf: BytesMut::new(),
                size,
                durable: size,
                frame_starts,
                poisoned: false,
            })),
            size: AtomicU64::new(size),
            frames: AtomicU64::new(frames),
            stats_appends: AtomicU64::new(0),
            stats_reads: AtomicU64::new(0),
            stats_bytes_appended: AtomicU64::new(0),
            stats_bytes_read: AtomicU64::new(0),
            stats_flushes: AtomicU64::new(0),
            stats_syncs: AtomicU64::new(0),
        }
    }

    /// Flushes with the lock held.
    fn flush_locked(&self, inner: &mut StoreInner) -> Result<(), StoreError> {
        let pending = inner.buf.len();
        if inner.flush()? {
            self.stats_flushes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Flushed {} bytes to {}", pending, self.path.display());
        }
        Ok(())
    }

    /// Appends a record.
    ///
    /// Returns the number of bytes the frame occupies (`8 + payload.len()`)
    /// and the offset the frame starts at. The record may still be buffered
    /// when this returns. A failed append leaves the size unchanged.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64), StoreError> {
        let mut guard = self.inner.lock();
        let inner = live(&mut guard)?;

        let offset = inner.size;
        let mark = inner.buf.len();
        frame::encode_into(&mut inner.buf, payload);

        if self.config.flush_policy.should_flush(inner.buf.len()) {
            if let Err(e) = self.flush_locked(inner) {
                inner.buf.truncate(mark);
                return Err(e);
            }
        }

        let written = frame::frame_size(payload.len());
        inner.size += written;
        inner.frame_starts.push(offset);

        self.size.store(inner.size, Ordering::Release);
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.stats_appends.fetch_add(1, Ordering::Relaxed);
        self.stats_bytes_appended
            .fetch_add(written, Ordering::Relaxed);

        Ok((written, offset))
    }

    /// Reads the record whose frame starts at `offset`.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>, StoreError> {
        let mut guard = self.inner.lock();
        let inner = live(&mut guard)?;
        self.flush_locked(inner)?;

        let size = inner.size;
        let header_end = offset.checked_add(LEN_WIDTH as u64);
        if header_end.map_or(true, |end| end > size) || !inner.is_frame_start(offset) {
            return Err(StoreError::OutOfRange { offset, size });
        }

        let mut header = [0u8; LEN_WIDTH];
        let n = inner.file.read_at(&mut header, offset)?;
        if n < LEN_WIDTH {
            return Err(StoreError::CorruptFrame {
                offset,
                declared: LEN_WIDTH as u64,
                available: n as u64,
            });
        }

        let declared = frame::decode_len(header);
        let available = size - offset - LEN_WIDTH as u64;
        if declared > available {
            return Err(StoreError::CorruptFrame {
                offset,
                declared,
                available,
            });
        }

        let mut payload = vec![0u8; declared as usize];
        let n = inner.file.read_at(&mut payload, offset + LEN_WIDTH as u64)?;
        if (n as u64) < declared {
            return Err(StoreError::CorruptFrame {
                offset,
                declared,
                available: n as u64,
            });
        }

        self.stats_reads.fetch_add(1, Ordering::Relaxed);
        self.stats_bytes_read.fetch_add(declared, Ordering::Relaxed);
        Ok(payload)
    }

    /// Reads raw file bytes into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes read, which is less than `buf.len()` when
    /// the end of the file is reached and zero when `offset` is at or past it.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, StoreError> {
        let mut guard = self.inner.lock();
        let inner = live(&mut guard)?;
        self.flush_locked(inner)?;

        let n = inner.file.read_at(buf, offset)?;

        self.stats_reads.fetch_add(1, Ordering::Relaxed);
        self.stats_bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Writes buffered frames to the file.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let inner = live(&mut guard)?;
        self.flush_locked(inner)
    }

    /// Flushes and fsyncs the file data.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let inner = live(&mut guard)?;
        self.flush_locked(inner)?;
        inner.file.sync_data()?;
        self.stats_syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes buffered frames and releases the file.
    ///
    /// If the flush fails the store stays open so the caller can retry.
    /// Every operation after a successful close fails with `Closed`. A
    /// poisoned store cannot be closed; dropping it releases the file.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let inner = live(&mut guard)?;
        self.flush_locked(inner)?;
        if self.config.sync_on_close {
            inner.file.sync_data()?;
            self.stats_syncs.fetch_add(1, Ordering::Relaxed);
        }
        *guard = None;

        tracing::info!(
            "Closed store {}: size={}",
            self.path.display(),
            self.size.load(Ordering::Acquire)
        );
        Ok(())
    }

    /// Returns the store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the logical size, which is also the next append offset.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Returns the number of frames in the store.
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Returns the number of bytes waiting to be flushed.
    pub fn buffered_bytes(&self) -> usize {
        self.inner
            .lock()
            .as_ref()
            .map_or(0, |inner| inner.buf.len())
    }

    /// Returns whether the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Returns the current I/O statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            appends: self.stats_appends.load(Ordering::Relaxed),
            reads: self.stats_reads.load(Ordering::Relaxed),
            bytes_appended: self.stats_bytes_appended.load(Ordering::Relaxed),
            bytes_read: self.stats_bytes_read.load(Ordering::Relaxed),
            flushes: self.stats_flushes.load(Ordering::Relaxed),
            syncs: self.stats_syncs.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.get_mut().as_mut() {
            if let Err(e) = inner.flush() {
                tracing::warn!(
                    "Failed to flush store {} on drop: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
