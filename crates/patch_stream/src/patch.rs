use crate::align::{duration, slice};
use crate::error::DataError;
use crate::track_data::{Patch, TrackData};
use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::Rng;

/// Draws randomly positioned, fixed-duration patches from one track.
///
/// The sampler owns the track's full-length data for its whole lifetime and
/// yields exactly `n_samples` patches, lazily. Each patch starts at an offset
/// drawn uniformly from `[0, duration - n_duration)`, where `duration` is
/// computed once at construction. Temporal fields of a patch are views into
/// the track data; static fields are shared.
///
/// The sequence is not restartable: sampling again means building a new
/// sampler (and so rebuilding the track data).
///
/// # Example
/// ```ignore
/// let rng = StdRng::seed_from_u64(42);
/// let sampler = PatchSampler::new(track_data, 128, 16, rng)?;
/// for patch in sampler {
///     assert_eq!(patch.get("cqt/mag")?.size()[1], 16);
/// }
/// ```
#[derive(Debug)]
pub struct PatchSampler {
    data: TrackData,
    duration: usize,
    n_duration: usize,
    remaining: usize,
    rng: StdRng,
    last_offset: Option<usize>,
}

impl PatchSampler {
    /// # Errors
    /// - [`DataError::NoTemporalData`] if the track has no temporal field.
    /// - [`DataError::Range`] unless `duration > n_duration`.
    pub fn new(data: TrackData, n_samples: usize, n_duration: usize, rng: StdRng) -> Result<Self> {
        ensure!(n_duration > 0, "n_duration must be > 0");
        let duration = duration(&data)?;
        if duration <= n_duration {
            return Err(DataError::Range {
                duration,
                n_duration,
            }
            .into());
        }

        Ok(Self {
            data,
            duration,
            n_duration,
            remaining: n_samples,
            rng,
            last_offset: None,
        })
    }

    /// Valid duration of the underlying track, in frames.
    pub fn duration(&self) -> usize {
        self.duration
    }

    /// Start offset of the most recently yielded patch.
    pub fn last_offset(&self) -> Option<usize> {
        self.last_offset
    }

    /// Number of patches still to be drawn.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Iterator for PatchSampler {
    type Item = Patch;

    fn next(&mut self) -> Option<Patch> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let start = self.rng.random_range(0..self.duration - self.n_duration);
        self.last_offset = Some(start);
        Some(slice(&self.data, start, self.n_duration))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for PatchSampler {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::data_error;
    use rand::SeedableRng;
    use tch::{Device, Kind, Tensor};

    /// Temporal lengths 50, 30, 31 plus one static field: valid duration 30.
    fn make_track() -> TrackData {
        let kind = (Kind::Float, Device::Cpu);
        TrackData::from_single(
            "longest",
            Tensor::arange(50, kind).reshape(&[1, 50, 1, 1]),
        )
        .with_field("shortest", Tensor::arange(30, kind).reshape(&[1, 30, 1, 1]))
        .with_field("threedim", Tensor::arange(31, kind).reshape(&[1, 31, 1]))
        .with_field("flat", Tensor::ones(&[1, 10], kind))
    }

    #[test]
    fn test_patches_have_requested_duration() -> Result<()> {
        let sampler = PatchSampler::new(make_track(), 200, 16, StdRng::seed_from_u64(0))?;
        assert_eq!(sampler.duration(), 30);
        assert_eq!(sampler.len(), 200);

        let mut count = 0;
        for patch in sampler {
            assert_eq!(patch.get("longest")?.size(), &[1, 16, 1, 1]);
            assert_eq!(patch.get("shortest")?.size(), &[1, 16, 1, 1]);
            assert_eq!(patch.get("threedim")?.size(), &[1, 16, 1]);
            assert_eq!(patch.get("flat")?.size(), &[1, 10]);
            count += 1;
        }
        assert_eq!(count, 200);
        Ok(())
    }

    #[test]
    fn test_offsets_stay_in_range_and_fields_agree() -> Result<()> {
        let mut sampler = PatchSampler::new(make_track(), 500, 16, StdRng::seed_from_u64(7))?;
        let mut seen = std::collections::HashSet::new();

        while let Some(patch) = sampler.next() {
            let start = sampler.last_offset().unwrap();
            assert!(start < 30 - 16);
            seen.insert(start);

            // arange content: first frame of every temporal field is the offset
            assert_eq!(patch.get("longest")?.double_value(&[0, 0, 0, 0]), start as f64);
            assert_eq!(patch.get("shortest")?.double_value(&[0, 15, 0, 0]), (start + 15) as f64);
            assert_eq!(patch.get("threedim")?.double_value(&[0, 0, 0]), start as f64);
        }
        // 500 uniform draws over 14 offsets hit every one of them
        assert_eq!(seen.len(), 14);
        Ok(())
    }

    #[test]
    fn test_duration_too_long_is_range_error() {
        for n_duration in [30, 31] {
            let err = PatchSampler::new(make_track(), 4, n_duration, StdRng::seed_from_u64(0))
                .unwrap_err();
            match data_error(&err) {
                Some(DataError::Range {
                    duration,
                    n_duration: requested,
                }) => {
                    assert_eq!(*duration, 30);
                    assert_eq!(*requested, n_duration);
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[test]
    fn test_no_temporal_data_is_rejected() {
        let data = TrackData::from_single("flat", Tensor::ones(&[1, 10], (Kind::Float, Device::Cpu)));
        let err = PatchSampler::new(data, 4, 2, StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(data_error(&err), Some(DataError::NoTemporalData)));
    }

    #[test]
    fn test_same_seed_same_offsets() -> Result<()> {
        let offsets = |seed| -> Result<Vec<usize>> {
            let mut sampler = PatchSampler::new(make_track(), 20, 8, StdRng::seed_from_u64(seed))?;
            let mut out = Vec::new();
            while sampler.next().is_some() {
                out.push(sampler.last_offset().unwrap());
            }
            Ok(out)
        };
        assert_eq!(offsets(3)?, offsets(3)?);
        assert_ne!(offsets(3)?, offsets(4)?);
        Ok(())
    }
}
