use config::ConfigError;
use index::IndexError;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during segment operations.
///
/// Only [`SegmentError::OffsetOutOfRange`] is the caller's fault; a request
/// layer should answer it with a client error and everything else with a
/// server error. See [`SegmentError::is_out_of_range`].
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("index: {0}")]
    Index(#[from] IndexError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// The requested absolute offset has not been assigned by this segment.
    #[error("offset {offset} out of range [{base_offset}, {next_offset})")]
    OffsetOutOfRange {
        offset: u64,
        base_offset: u64,
        next_offset: u64,
    },

    /// The next offset is too far from the base offset to be stored as a
    /// 32-bit relative offset.
    #[error("offset {offset} cannot be stored relative to base offset {base_offset}")]
    RelativeOffsetOverflow { offset: u64, base_offset: u64 },

    /// An index entry's stored offset disagrees with its ordinal.
    #[error("index entry {ordinal} holds relative offset {found}")]
    Corrupt { ordinal: u64, found: u32 },
}

impl SegmentError {
    /// Returns `true` if the caller asked for an offset the segment does not
    /// hold (client fault), as opposed to a storage failure (server fault).
    #[must_use]
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, SegmentError::OffsetOutOfRange { .. })
    }

    /// Returns `true` if the index has no room for another record.
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, SegmentError::Index(IndexError::Full { .. }))
    }
}
