//! # Segment - Store + Index Unit of the Commit Log
//!
//! Binds one [`store::Store`] and one [`index::Index`] into a single
//! append/read unit covering a contiguous range of absolute offsets.
//!
//! ## Architecture
//!
//! ```text
//! append(payload)
//!   |
//!   v
//! ┌──────────────────────────────────────────────┐
//! │                   SEGMENT                    │
//! │                                              │
//! │ write.rs → Store.append → (position)         │
//! │              |                               │
//! │              v                               │
//! │            Index.write(next - base, position)│
//! │              |                               │
//! │              v                               │
//! │            next += 1                         │
//! │                                              │
//! │ read.rs  → offset - base → Index.read        │
//! │              → Store.read(position)          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                                |
//! |--------------|--------------------------------------------------------|
//! | [`lib.rs`]   | `Segment` struct, `open`, accessors, `close`, `Debug`  |
//! | [`recovery`] | next-offset recovery from the index tail, tail checks  |
//! | [`write`]    | `append()`                                             |
//! | [`read`]     | `read()`                                               |
//! | [`log`]      | `CommitLog` trait offered to the request layer         |
//! | [`error`]    | `SegmentError`                                         |
//!
//! ## Files
//!
//! Within the segment directory, `<base_offset>.store` and
//! `<base_offset>.index` (decimal base offset).
//!
//! ## Recovery
//!
//! The append cursor is rebuilt purely from the index tail: an empty index
//! means `next_offset = base_offset`, otherwise
//! `next_offset = base_offset + last_relative + 1`. The store is not scanned.
//! Store bytes written after the last indexed record (a crash between the
//! store append and the index write) are reported in the log but **not**
//! repaired.
//!
//! ## Lifecycle
//!
//! A segment is open from [`Segment::open`] until [`Segment::close`], which
//! consumes it. Resuming after close means opening it again, which re-runs
//! recovery.
mod error;
mod log;
mod read;
mod recovery;
mod write;

pub use config::SegmentConfig;
pub use error::SegmentError;
pub use log::CommitLog;

use index::Index;
use std::path::{Path, PathBuf};
use store::Store;
use tracing::{info, warn};

use recovery::TailState;

/// Extension of a segment's store file.
pub const STORE_EXTENSION: &str = "store";
/// Extension of a segment's index file.
pub const INDEX_EXTENSION: &str = "index";

/// Path of the store file for the segment at `base_offset` inside `dir`.
#[must_use]
pub fn store_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{base_offset}.{STORE_EXTENSION}"))
}

/// Path of the index file for the segment at `base_offset` inside `dir`.
#[must_use]
pub fn index_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{base_offset}.{INDEX_EXTENSION}"))
}

/// One store file plus one index file, covering absolute offsets
/// `[base_offset, next_offset)`.
///
/// # Write Path
///
/// 1. Reject the append if the index has no room (keeps store and index in
///    lockstep).
/// 2. Append the payload to the store, receiving its position.
/// 3. Write `(next_offset - base_offset, position)` to the index.
/// 4. Advance `next_offset`.
///
/// # Read Path
///
/// 1. Reject offsets outside `[base_offset, next_offset)`.
/// 2. Look the relative offset up in the index.
/// 3. Read the record at the returned position from the store.
///
/// Appends take `&mut self`, so the index always has a single writer;
/// reads take `&self` and may run concurrently.
pub struct Segment {
    pub(crate) store: Store,
    pub(crate) index: Index,
    pub(crate) base_offset: u64,
    pub(crate) next_offset: u64,
    pub(crate) config: SegmentConfig,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("base_offset", &self.base_offset)
            .field("next_offset", &self.next_offset)
            .field("store", &self.store)
            .field("index", &self.index)
            .field("max_store_bytes", &self.config.max_store_bytes)
            .field("max_index_bytes", &self.config.max_index_bytes)
            .finish()
    }
}

impl Segment {
    /// Opens (or creates) the segment at `base_offset` inside `dir`,
    /// recovering its append cursor from the index.
    ///
    /// # Steps
    ///
    /// 1. Validate `config`.
    /// 2. Open `<base>.store` in append mode.
    /// 3. Open `<base>.index`, pre-allocated and mapped to
    ///    `config.max_index_bytes`.
    /// 4. Recover `next_offset` from the last index entry.
    /// 5. Compare the store tail with the last indexed record and log any
    ///    mismatch.
    ///
    /// Anything opened before a failing step is released when this returns
    /// the error (the index also compacts its file on drop).
    pub fn open<P: AsRef<Path>>(
        dir: P,
        base_offset: u64,
        config: &SegmentConfig,
    ) -> Result<Self, SegmentError> {
        config.validate()?;
        let dir = dir.as_ref();

        let store = Store::open(store_path(dir, base_offset))?;
        let index = Index::open(index_path(dir, base_offset), config.max_index_bytes)?;

        let next_offset = recovery::recover_next_offset(&index, base_offset)?;

        match recovery::check_store_tail(&store, &index)? {
            TailState::Consistent => {}
            TailState::Unindexed(bytes) => warn!(
                base_offset,
                bytes,
                store = %store.path().display(),
                "store holds bytes past the last indexed record; they are left in place"
            ),
            TailState::Missing { position } => warn!(
                base_offset,
                position,
                store = %store.path().display(),
                "index references a record the store does not fully contain"
            ),
        }

        info!(
            base_offset,
            next_offset,
            entries = index.len(),
            "opened segment"
        );

        Ok(Self {
            store,
            index,
            base_offset,
            next_offset,
            config: *config,
        })
    }

    /// Opens the first segment of a log, based at `config.initial_offset`.
    pub fn open_initial<P: AsRef<Path>>(
        dir: P,
        config: &SegmentConfig,
    ) -> Result<Self, SegmentError> {
        Self::open(dir, config.initial_offset, config)
    }

    /// Absolute offset of the first record this segment may hold.
    #[must_use]
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Absolute offset the next appended record will receive.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Number of records in the segment.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.next_offset - self.base_offset
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next_offset == self.base_offset
    }

    /// Returns `true` if `offset` has been assigned to a record here.
    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.base_offset && offset < self.next_offset
    }

    /// Reports whether either configured bound has been reached.
    ///
    /// Informational only: nothing in the segment rotates, and only the
    /// index bound is ever enforced (as [`index::IndexError::Full`]).
    pub fn is_maxed(&self) -> Result<bool, SegmentError> {
        Ok(self.store.size()? >= self.config.max_store_bytes || self.index.is_full())
    }

    /// Path of the store file.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    /// Path of the index file.
    #[must_use]
    pub fn index_path(&self) -> &Path {
        self.index.path()
    }

    /// The configuration this segment was opened with.
    #[must_use]
    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Closes the index, then the store.
    ///
    /// Both are always attempted; if both fail the index error is returned.
    /// The segment is consumed, so a closed segment cannot be appended to or
    /// read from.
    pub fn close(self) -> Result<(), SegmentError> {
        let base_offset = self.base_offset;
        let next_offset = self.next_offset;

        let index_result = self.index.close();
        let store_result = self.store.close();
        index_result?;
        store_result?;

        info!(base_offset, next_offset, "closed segment");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
