//! Temporal alignment of track data.
//!
//! Temporal fields of one track may disagree on their frame count (feature
//! hop vs. annotation frame rate rounding, trailing frames, ...). The valid
//! window of a track is the shortest temporal field; everything past it is
//! undefined for at least one field.

use crate::error::DataError;
use crate::track_data::{is_temporal, TrackData};
use anyhow::Result;

/// Computes the maximum valid duration, in frames, of a track data collection.
///
/// Static fields (rank <= 2) are ignored. For every temporal field the
/// frame count is `shape[1]`, and the valid duration is the minimum of those.
///
/// # Errors
/// [`DataError::NoTemporalData`] if no field has a time axis.
pub fn duration(data: &TrackData) -> Result<usize> {
    data.temporal_fields()
        .map(|(_, tensor)| tensor.size()[1] as usize)
        .min()
        .ok_or_else(|| DataError::NoTemporalData.into())
}

/// Restricts every temporal field to frames `[start, start + length)`.
///
/// Temporal fields become views into the source storage (no copy); static
/// fields are passed through as shallow clones. The caller guarantees
/// `start + length <= duration(data)`.
pub fn slice(data: &TrackData, start: usize, length: usize) -> TrackData {
    data.fields
        .iter()
        .map(|(name, tensor)| {
            let field = if is_temporal(tensor) {
                debug_assert!(
                    start + length <= tensor.size()[1] as usize,
                    "slice [{}, {}) out of range for field '{}'",
                    start,
                    start + length,
                    name
                );
                tensor.narrow(1, start as i64, length as i64)
            } else {
                tensor.shallow_clone()
            };
            (name.clone(), field)
        })
        .collect()
}
