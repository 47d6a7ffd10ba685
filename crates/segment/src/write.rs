use index::IndexError;

use crate::{Segment, SegmentError};

impl Segment {
    /// Appends `payload` and returns the absolute offset assigned to it.
    ///
    /// # Errors
    ///
    /// - `SegmentError::Index(IndexError::Full)` if the index has no room.
    ///   Checked before the store is touched, so a full segment never gains
    ///   store bytes the index does not reference.
    /// - [`SegmentError::RelativeOffsetOverflow`] if the offset does not fit
    ///   the 32-bit relative field.
    /// - Store or index I/O errors, unretried.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64, SegmentError> {
        let offset = self.next_offset;
        let relative = u32::try_from(offset - self.base_offset).map_err(|_| {
            SegmentError::RelativeOffsetOverflow {
                offset,
                base_offset: self.base_offset,
            }
        })?;

        if self.index.is_full() {
            return Err(IndexError::Full {
                capacity: self.index.capacity(),
            }
            .into());
        }

        let (_, position) = self.store.append(payload)?;
        self.index.write(relative, position)?;

        self.next_offset += 1;
        Ok(offset)
    }
}
