//! # Store - Length-Prefixed Append File
//!
//! The payload half of a commit-log segment. Records are appended to a single
//! file and addressed by the byte **position** where their length prefix
//! begins. Positions are monotonically increasing and never reused.
//!
//! ## Binary Record Format
//!
//! ```text
//! [len: u64 BE][payload: len bytes]
//! ```
//!
//! No header, footer, padding or checksum. A store file is nothing but a
//! concatenation of these frames.
//!
//! ## Buffering
//!
//! Appends land in a `BufWriter` and are not guaranteed to be on disk when
//! [`Store::append`] returns. Every read path flushes the buffer first, so a
//! position handed out by `append` is always readable. [`Store::close`]
//! flushes and fsyncs; it must be called for buffered data to be durable.
//!
//! ## Failed Writes
//!
//! An append that fails partway may leave a torn frame in the buffer or in
//! the file. The store then refuses every further append with
//! [`StoreError::Failed`], since the next frame would no longer start at the
//! position `append` reports. Records appended before the failure stay
//! readable.
//!
//! ## Example
//!
//! ```rust,no_run
//! use store::Store;
//!
//! let store = Store::open("0.store").unwrap();
//! let (written, pos) = store.append(b"hello").unwrap();
//! assert_eq!(written, 13);
//! assert_eq!(store.read(pos).unwrap(), b"hello");
//! store.close().unwrap();
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, error};

/// Width of the length prefix in front of every record.
pub const LEN_WIDTH: u64 = 8;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The record at `position` (prefix or payload) extends past the end of
    /// the file.
    #[error("no complete record at position {position}")]
    EndOfData { position: u64 },

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// An earlier append failed at `position`; the store accepts no more
    /// appends.
    #[error("store rejected append after a failed write at position {position}")]
    Failed { position: u64 },
}

/// State guarded by the store lock.
struct Inner<F: Write> {
    writer: BufWriter<F>,
    /// Logical size: bytes on disk plus bytes still sitting in the buffer.
    size: u64,
    /// Position of the append that failed, if any.
    failed_at: Option<u64>,
}

/// Append-only, buffered, length-prefixed record file.
///
/// Every operation holds one `Mutex` for its full duration, so a `Store` can
/// be shared between threads (`Arc<Store>`) and concurrent appends are never
/// interleaved. Reads and writes contend on the same lock.
///
/// The backing handle defaults to a [`File`]; anything readable, writable
/// and seekable can stand in through [`Store::new`].
pub struct Store<F: Write = File> {
    path: PathBuf,
    inner: Mutex<Inner<F>>,
}

impl<F: Read + Write + Seek> std::fmt::Debug for Store<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("size", &self.size().ok())
            .finish()
    }
}

impl Store<File> {
    /// Opens (or creates) a store file in append mode.
    ///
    /// The logical size starts at the file's current length, so appends made
    /// after reopening continue where the previous instance stopped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Self::new(file, path)
    }

    /// Flushes the buffer, fsyncs, and closes the file.
    ///
    /// Consumes the store: a closed store cannot be used again. Any failure
    /// while flushing or syncing is returned, since it means buffered
    /// records may not be durable.
    pub fn close(self) -> Result<(), StoreError> {
        let inner = self
            .inner
            .into_inner()
            .map_err(|_| StoreError::LockPoisoned)?;

        let file = inner.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!(path = %self.path.display(), size = inner.size, "closed store");
        Ok(())
    }
}

impl<F: Read + Write + Seek> Store<F> {
    /// Wraps an already opened handle. Writes must go to the end of `file`
    /// (append mode for a real file); the logical size starts at its
    /// current length.
    pub fn new<P: Into<PathBuf>>(mut file: F, path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let size = file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), size, "opened store");

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                size,
                failed_at: None,
            }),
        })
    }

    /// Appends `payload` behind its big-endian length prefix.
    ///
    /// Returns `(written, position)`: the total bytes added
    /// (`LEN_WIDTH + payload.len()`) and the position the record starts at
    /// (the logical size before this call).
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] if the write fails. The store is marked failed.
    /// - [`StoreError::Failed`] for every append after such a failure.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64), StoreError> {
        let mut inner = self.lock()?;
        if let Some(position) = inner.failed_at {
            return Err(StoreError::Failed { position });
        }

        let position = inner.size;
        let result = inner
            .writer
            .write_u64::<BigEndian>(payload.len() as u64)
            .and_then(|()| inner.writer.write_all(payload));
        if let Err(e) = result {
            inner.failed_at = Some(position);
            error!(
                path = %self.path.display(),
                position,
                error = %e,
                "append failed, store no longer accepts writes"
            );
            return Err(StoreError::Io(e));
        }

        let written = LEN_WIDTH + payload.len() as u64;
        inner.size += written;
        Ok((written, position))
    }

    /// Returns the payload of the record whose length prefix starts at
    /// `position`.
    ///
    /// Bounds are checked against the file's real extent after flushing, so
    /// records appended through another handle on the same file are
    /// visible.
    ///
    /// # Errors
    ///
    /// - [`StoreError::EndOfData`] if the prefix or the payload it announces
    ///   runs past the end of the file.
    /// - [`StoreError::Io`] on any other I/O failure.
    pub fn read(&self, position: u64) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;

        let file = inner.writer.get_mut();
        let size = file.seek(SeekFrom::End(0))?;
        if position.saturating_add(LEN_WIDTH) > size {
            return Err(StoreError::EndOfData { position });
        }

        file.seek(SeekFrom::Start(position))?;
        let len = file
            .read_u64::<BigEndian>()
            .map_err(|e| end_of_data(e, position))?;

        // Payload must end inside the file before anything is allocated.
        let end = position
            .checked_add(LEN_WIDTH)
            .and_then(|p| p.checked_add(len));
        match end {
            Some(end) if end <= size => {}
            _ => return Err(StoreError::EndOfData { position }),
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)
            .map_err(|e| end_of_data(e, position))?;
        Ok(payload)
    }

    /// Reads raw bytes starting at `position` into `buf`.
    ///
    /// Follows the positional-reader contract: the buffer is filled
    /// completely unless end of file is reached first, in which case the
    /// short count is returned. `Ok(0)` means `position` is at or past the
    /// end. Callers that need whole frames (length prefix included) for a
    /// size-bounded reply use this instead of [`Store::read`].
    pub fn read_at(&self, buf: &mut [u8], position: u64) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;

        let file = inner.writer.get_mut();
        file.seek(SeekFrom::Start(position))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(filled)
    }

    /// Pushes buffered appends to the operating system (no fsync).
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;
        Ok(())
    }

    /// Returns the logical size in bytes, including buffered appends.
    pub fn size(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.size)
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<F>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Maps a short read to [`StoreError::EndOfData`]; other errors stay I/O errors.
fn end_of_data(e: io::Error, position: u64) -> StoreError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::EndOfData { position }
    } else {
        StoreError::Io(e)
    }
}

#[cfg(test)]
mod tests;
