use index::Lookup;

use crate::{Segment, SegmentError};

impl Segment {
    /// Returns the payload stored at absolute `offset`.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::OffsetOutOfRange`] if `offset` is below the base
    ///   offset or has not been assigned yet.
    /// - [`SegmentError::Corrupt`] if the index entry's stored offset does
    ///   not match its position in the index.
    /// - Store or index I/O errors.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>, SegmentError> {
        if !self.contains(offset) {
            return Err(SegmentError::OffsetOutOfRange {
                offset,
                base_offset: self.base_offset,
                next_offset: self.next_offset,
            });
        }

        let relative = offset - self.base_offset;
        let (stored, position) = self.index.read(Lookup::Nth(relative))?;
        if u64::from(stored) != relative {
            return Err(SegmentError::Corrupt {
                ordinal: relative,
                found: stored,
            });
        }

        Ok(self.store.read(position)?)
    }
}
