use crate::annotation::{AnnotationLoader, AnnotationMapper, TaskTransformer};
use crate::cache::FeatureCache;
use crate::error::DataError;
use crate::extractor::FeatureExtractor;
use crate::track_data::TrackData;
use anyhow::Result;
use std::path::Path;
use tracing::warn;

/// Assembles the full-length data of one track: annotation targets plus
/// input features.
///
/// With a [`FeatureCache`], extraction is memoized under the audio path;
/// without one, features are extracted on every build.
///
/// # Example
/// ```ignore
/// let builder = TrackDataBuilder::new(&mapper, &transformers, &cqt).with_cache(&cache);
/// let data = builder.build(Path::new("a.wav"), Path::new("a.jams"))?;
/// ```
pub struct TrackDataBuilder<'p, L: AnnotationLoader> {
    mapper: &'p AnnotationMapper<L>,
    transformers: &'p [Box<dyn TaskTransformer<L::Document>>],
    extractor: &'p dyn FeatureExtractor,
    cache: Option<&'p FeatureCache>,
}

impl<'p, L: AnnotationLoader> TrackDataBuilder<'p, L> {
    pub fn new(
        mapper: &'p AnnotationMapper<L>,
        transformers: &'p [Box<dyn TaskTransformer<L::Document>>],
        extractor: &'p dyn FeatureExtractor,
    ) -> Self {
        Self {
            mapper,
            transformers,
            extractor,
            cache: None,
        }
    }

    /// Routes feature extraction through `cache`.
    pub fn with_cache(mut self, cache: &'p FeatureCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builds the track data for one `(audio, annotation)` pair.
    ///
    /// The field set is the union of transformer outputs and extractor
    /// outputs; every field has a singleton axis 0. Feature fields overwrite
    /// annotation fields of the same name.
    pub fn build(&self, audio: &Path, annotation: &Path) -> Result<TrackData> {
        let mut data = self.mapper.map(annotation, self.transformers)?;

        let extract = || -> Result<TrackData> {
            self.extractor
                .extract(audio)
                .map_err(|e| DataError::load_failure(audio, e).into())
        };
        let features = match self.cache {
            Some(cache) => cache.get_or_compute(&audio.to_string_lossy(), extract)?,
            None => extract()?,
        };

        for (name, value) in features.with_track_axis() {
            if data.insert(name.as_str(), value).is_some() {
                warn!(
                    field = %name,
                    audio = %audio.display(),
                    "feature field overwrote an annotation field"
                );
            }
        }
        Ok(data)
    }
}
