use crate::track_data::TrackData;
use anyhow::Result;
use std::path::Path;

/// Extracts input features from a recording.
///
/// The output holds unbatched feature fields (no track axis), e.g.
/// `{"cqt/mag": [frames, bins, 1]}`. The extraction algorithm itself is up to
/// the implementation; the pipeline only passes `audio` through.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, audio: &Path) -> Result<TrackData>;
}

impl<F> FeatureExtractor for F
where
    F: Fn(&Path) -> Result<TrackData> + Send + Sync,
{
    fn extract(&self, audio: &Path) -> Result<TrackData> {
        self(audio)
    }
}
