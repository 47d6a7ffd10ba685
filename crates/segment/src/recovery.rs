use index::{Index, IndexError, Lookup};
use store::{Store, LEN_WIDTH};
use tracing::debug;

use crate::SegmentError;

/// How the store's tail relates to the last record the index references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TailState {
    /// The store ends exactly where the last indexed record ends.
    Consistent,
    /// The store holds this many bytes after the last indexed record
    /// (crash between store append and index write).
    Unindexed(u64),
    /// The last indexed record at `position` is not fully in the store.
    Missing { position: u64 },
}

/// Rebuilds the append cursor from the index tail.
///
/// - Empty index -> `base_offset`.
/// - Last entry `(rel, _)` -> `base_offset + rel + 1`.
///
/// Any error other than end-of-data propagates.
pub(crate) fn recover_next_offset(index: &Index, base_offset: u64) -> Result<u64, SegmentError> {
    match index.read(Lookup::Last) {
        Ok((relative, _)) => {
            let next = base_offset
                .checked_add(u64::from(relative) + 1)
                .ok_or(SegmentError::RelativeOffsetOverflow {
                    offset: u64::MAX,
                    base_offset,
                })?;
            debug!(base_offset, relative, next, "recovered next offset from index tail");
            Ok(next)
        }
        Err(IndexError::EndOfData) => {
            debug!(base_offset, "empty index, starting at base offset");
            Ok(base_offset)
        }
        Err(e) => Err(e.into()),
    }
}

/// Compares the end of the last indexed record with the store's size.
///
/// Detection only. Unindexed bytes stay in the store and new appends land
/// after them; the index remains the source of truth for which offsets
/// exist.
pub(crate) fn check_store_tail(store: &Store, index: &Index) -> Result<TailState, SegmentError> {
    let store_size = store.size()?;

    let expected_end = match index.read(Lookup::Last) {
        Ok((_, position)) => {
            let mut prefix = [0u8; LEN_WIDTH as usize];
            if store.read_at(&mut prefix, position)? < prefix.len() {
                return Ok(TailState::Missing { position });
            }
            let len = u64::from_be_bytes(prefix);
            match position
                .checked_add(LEN_WIDTH)
                .and_then(|p| p.checked_add(len))
            {
                Some(end) if end <= store_size => end,
                _ => return Ok(TailState::Missing { position }),
            }
        }
        Err(IndexError::EndOfData) => 0,
        Err(e) => return Err(e.into()),
    };

    if store_size > expected_end {
        Ok(TailState::Unindexed(store_size - expected_end))
    } else {
        Ok(TailState::Consistent)
    }
}
