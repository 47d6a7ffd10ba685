//! # Index - Memory-Mapped Offset Index
//!
//! Maps a record's **relative offset** within a segment to the byte position
//! of that record in the segment's store file. Lookups are O(1): entry *i*
//! lives at byte `i * ENTRY_WIDTH` and holds relative offset *i*.
//!
//! ## Binary Entry Format
//!
//! ```text
//! [relative_offset: u32 BE][store_position: u64 BE]
//! ```
//!
//! Entries are packed back to back with no header, padding or checksum.
//!
//! ## File Lifecycle
//!
//! ```text
//! open    logical size = on-disk size
//!         file extended to `max_index_bytes`, mapped read/write
//! write   encode into the mapping at the logical size, size += 12
//! close   msync mapping -> fsync file -> unmap -> truncate to logical size
//! ```
//!
//! Between open and close the on-disk file is larger than the data it holds.
//! Closing trims the pre-allocated slack so that the next open recovers the
//! exact logical size from the file length.
//!
//! ## Concurrency
//!
//! Single writer. [`Index::write`] takes `&mut self`; callers that need
//! concurrent appenders must serialise them externally. Writes are visible
//! to reads through the same mapping immediately.

use byteorder::{BigEndian, ByteOrder};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Width of the relative-offset field.
pub const OFFSET_WIDTH: u64 = 4;
/// Width of the store-position field.
pub const POSITION_WIDTH: u64 = 8;
/// Width of one packed index entry.
pub const ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// An underlying I/O error (open, extend, map, sync, truncate).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The index is empty, or the requested entry lies beyond the logical size.
    #[error("end of index")]
    EndOfData,

    /// The mapped capacity has no room for another entry.
    #[error("index full ({capacity} bytes)")]
    Full { capacity: u64 },

    /// The requested capacity cannot hold a single entry.
    #[error("index capacity {capacity} is smaller than one entry ({} bytes)", ENTRY_WIDTH)]
    InvalidCapacity { capacity: u64 },

    /// The existing file already holds more bytes than the requested
    /// capacity; mapping it would cut off committed entries.
    #[error("index file holds {size} bytes, more than capacity {capacity}")]
    Oversized { size: u64, capacity: u64 },
}

/// Selects an entry for [`Index::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The most recently written entry.
    Last,
    /// The entry with this ordinal (equal to its relative offset).
    Nth(u64),
}

impl From<u64> for Lookup {
    fn from(n: u64) -> Self {
        Lookup::Nth(n)
    }
}

/// A fixed-capacity, file-backed array of `(relative_offset, position)` pairs.
///
/// The mapping is owned exclusively by this instance and released on
/// [`close`](Index::close) or, failing that, on drop.
pub struct Index {
    file: File,
    path: PathBuf,
    /// `None` once torn down.
    mmap: Option<MmapMut>,
    /// Logical size in bytes (always `<= capacity`).
    size: u64,
    capacity: u64,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish()
    }
}

impl Index {
    /// Opens (or creates) the index file at `path` and maps `capacity` bytes.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidCapacity`] if `capacity < ENTRY_WIDTH`.
    /// - [`IndexError::Oversized`] if the file is already larger than
    ///   `capacity`.
    /// - [`IndexError::Io`] if the file cannot be opened, extended or mapped.
    pub fn open<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        if capacity < ENTRY_WIDTH {
            return Err(IndexError::InvalidCapacity { capacity });
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        Self::new(file, path, capacity)
    }

    /// Builds an index over an already-open read/write `file`.
    ///
    /// The file's current length becomes the logical size; the file is then
    /// extended to `capacity` and mapped in full. If mapping fails the file
    /// is shrunk back so no pre-allocated slack is left behind.
    pub fn new(file: File, path: PathBuf, capacity: u64) -> Result<Self, IndexError> {
        if capacity < ENTRY_WIDTH {
            return Err(IndexError::InvalidCapacity { capacity });
        }

        let size = file.metadata()?.len();
        if size > capacity {
            return Err(IndexError::Oversized { size, capacity });
        }

        file.set_len(capacity)?;

        // SAFETY: the file is open read/write and owned by this Index for as
        // long as the mapping lives. Nothing else in this process maps or
        // resizes it while the Index is open.
        let mmap = match unsafe { MmapMut::map_mut(&file) } {
            Ok(m) => m,
            Err(e) => {
                let _ = file.set_len(size);
                return Err(IndexError::Io(e));
            }
        };

        debug!(
            path = %path.display(),
            size,
            capacity,
            entries = size / ENTRY_WIDTH,
            "opened index"
        );

        Ok(Self {
            file,
            path,
            mmap: Some(mmap),
            size,
            capacity,
        })
    }

    /// Reads the `(relative_offset, position)` pair selected by `lookup`.
    ///
    /// # Errors
    ///
    /// [`IndexError::EndOfData`] if the index is empty or the entry's byte
    /// range extends past the logical size.
    pub fn read(&self, lookup: Lookup) -> Result<(u32, u64), IndexError> {
        if self.size == 0 {
            return Err(IndexError::EndOfData);
        }

        let ordinal = match lookup {
            Lookup::Last => (self.size / ENTRY_WIDTH)
                .checked_sub(1)
                .ok_or(IndexError::EndOfData)?,
            Lookup::Nth(n) => n,
        };

        let start = ordinal
            .checked_mul(ENTRY_WIDTH)
            .ok_or(IndexError::EndOfData)?;
        let entry = self.entry(start)?;

        let offset = BigEndian::read_u32(&entry[..OFFSET_WIDTH as usize]);
        let position = BigEndian::read_u64(&entry[OFFSET_WIDTH as usize..]);
        Ok((offset, position))
    }

    /// Appends `(offset, position)` at the logical end of the index.
    ///
    /// Only the mapping is touched; the kernel writes dirty pages back
    /// lazily. Call [`sync`](Index::sync) or [`close`](Index::close) for
    /// durability.
    ///
    /// # Errors
    ///
    /// [`IndexError::Full`] if another entry would exceed the capacity.
    pub fn write(&mut self, offset: u32, position: u64) -> Result<(), IndexError> {
        let start = self.size;
        let end = start + ENTRY_WIDTH;
        if end > self.capacity {
            return Err(IndexError::Full {
                capacity: self.capacity,
            });
        }

        let capacity = self.capacity;
        let slot = self
            .mmap
            .as_deref_mut()
            .and_then(|m| m.get_mut(start as usize..end as usize))
            .ok_or(IndexError::Full { capacity })?;

        BigEndian::write_u32(&mut slot[..OFFSET_WIDTH as usize], offset);
        BigEndian::write_u64(&mut slot[OFFSET_WIDTH as usize..], position);
        self.size = end;
        Ok(())
    }

    /// Flushes dirty mapped pages to the file (msync) without closing.
    pub fn sync(&self) -> Result<(), IndexError> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        Ok(())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.size / ENTRY_WIDTH
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Logical size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Mapped capacity in bytes (`max_index_bytes`).
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns `true` if no further entry fits.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.size + ENTRY_WIDTH > self.capacity
    }

    /// Syncs and compacts the index file, then closes it.
    ///
    /// Order: msync mapping, fsync file, unmap, truncate to the logical size.
    /// The file handle is closed when `self` is dropped at the end of this
    /// call. Every failure is returned.
    pub fn close(mut self) -> Result<(), IndexError> {
        self.teardown()?;
        debug!(path = %self.path.display(), size = self.size, "closed index");
        Ok(())
    }

    /// Bounds-checked view of the entry starting at byte `start`.
    ///
    /// Rejects any range that is not fully inside the logical size.
    fn entry(&self, start: u64) -> Result<&[u8], IndexError> {
        let end = start
            .checked_add(ENTRY_WIDTH)
            .ok_or(IndexError::EndOfData)?;
        if end > self.size {
            return Err(IndexError::EndOfData);
        }
        self.mmap
            .as_deref()
            .and_then(|m| m.get(start as usize..end as usize))
            .ok_or(IndexError::EndOfData)
    }

    /// Shared by `close` and `Drop`. Idempotent: the mapping is taken on the
    /// first call, so later calls do nothing.
    fn teardown(&mut self) -> Result<(), IndexError> {
        let Some(mmap) = self.mmap.take() else {
            return Ok(());
        };

        mmap.flush()?;
        self.file.sync_all()?;
        // Unmap before shrinking the file underneath it.
        drop(mmap);
        self.file.set_len(self.size)?;
        Ok(())
    }
}

/// Best-effort teardown on drop.
///
/// Runs the same msync/fsync/truncate sequence as [`Index::close`] when the
/// index was dropped without being closed (including early returns during
/// segment construction). Errors cannot propagate from `Drop`, so they are
/// logged.
impl Drop for Index {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(path = %self.path.display(), error = %e, "index teardown on drop failed");
        }
    }
}
