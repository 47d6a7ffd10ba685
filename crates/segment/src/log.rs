use crate::{Segment, SegmentError};

/// The append/read surface a request layer (or a multi-segment log built
/// on top) programs against.
///
/// A read of an offset the log has not assigned yet fails with an error for
/// which [`SegmentError::is_out_of_range`] is `true`, distinct from I/O
/// failures.
pub trait CommitLog {
    /// Appends `payload` and returns the absolute offset assigned to it.
    fn append(&mut self, payload: &[u8]) -> Result<u64, SegmentError>;

    /// Returns the payload stored at absolute `offset`.
    fn read(&self, offset: u64) -> Result<Vec<u8>, SegmentError>;
}

impl CommitLog for Segment {
    fn append(&mut self, payload: &[u8]) -> Result<u64, SegmentError> {
        Segment::append(self, payload)
    }

    fn read(&self, offset: u64) -> Result<Vec<u8>, SegmentError> {
        Segment::read(self, offset)
    }
}
