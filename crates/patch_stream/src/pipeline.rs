//! Pipeline assembly: from a manifest of tracks to streams of patches and
//! mini-batches.
//!
//! ```text
//!   SourceManifest ──▶ TrackSource (one per track, unopened)
//!                          │ open: TrackPipeline::build + PatchSampler
//!                          ▼
//!                    TrackMultiplexer ──▶ patches
//!                                            │ several streams
//!                                            ▼
//!                                     BatchMultiplexer ──▶ MiniBatch
//! ```

use crate::annotation::{AnnotationLoader, AnnotationMapper, TaskTransformer};
use crate::batch::{BatchMultiplexer, PatchStream};
use crate::builder::TrackDataBuilder;
use crate::cache::FeatureCache;
use crate::config::StreamConfig;
use crate::extractor::FeatureExtractor;
use crate::manifest::{SourceManifest, TrackEntry};
use crate::mux::{StreamSource, TrackMultiplexer};
use crate::patch::PatchSampler;
use crate::track_data::{Patch, TrackData};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::debug;

/// Everything needed to turn one [`TrackEntry`] into full-length track data.
pub struct TrackPipeline<L: AnnotationLoader> {
    mapper: AnnotationMapper<L>,
    transformers: Vec<Box<dyn TaskTransformer<L::Document>>>,
    extractor: Box<dyn FeatureExtractor>,
    cache: Option<Arc<FeatureCache>>,
}

impl<L: AnnotationLoader> TrackPipeline<L> {
    pub fn new(
        loader: L,
        transformers: Vec<Box<dyn TaskTransformer<L::Document>>>,
        extractor: impl FeatureExtractor + 'static,
    ) -> Self {
        Self {
            mapper: AnnotationMapper::new(loader),
            transformers,
            extractor: Box::new(extractor),
            cache: None,
        }
    }

    /// Memoizes feature extraction in `cache`, which may be shared with
    /// other pipelines.
    pub fn with_cache(mut self, cache: Arc<FeatureCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<FeatureCache>> {
        self.cache.as_ref()
    }

    /// Builds the full-length data of one track.
    pub fn build(&self, entry: &TrackEntry) -> Result<TrackData> {
        let builder = TrackDataBuilder::new(&self.mapper, &self.transformers, self.extractor.as_ref());
        let builder = match &self.cache {
            Some(cache) => builder.with_cache(cache),
            None => builder,
        };
        builder.build(&entry.audio, &entry.annotation)
    }
}

/// An unopened track: opening builds its data and starts sampling patches.
pub struct TrackSource<L: AnnotationLoader> {
    pub entry: TrackEntry,
    pub pipeline: Arc<TrackPipeline<L>>,
    pub n_per_track: usize,
    pub n_duration: usize,
}

impl<L: AnnotationLoader> StreamSource for TrackSource<L> {
    type Item = Patch;
    type Stream = std::iter::Map<PatchSampler, fn(Patch) -> Result<Patch>>;

    fn label(&self) -> String {
        self.entry.audio.display().to_string()
    }

    fn open(self, rng: StdRng) -> Result<Self::Stream> {
        let data = self.pipeline.build(&self.entry)?;
        let sampler = PatchSampler::new(data, self.n_per_track, self.n_duration, rng)
            .with_context(|| format!("Cannot sample patches from {}", self.entry.audio.display()))?;
        debug!(
            audio = %self.entry.audio.display(),
            duration = sampler.duration(),
            "track opened"
        );
        Ok(sampler.map(Ok as fn(Patch) -> Result<Patch>))
    }
}

/// Creates the patch stream of one manifest.
///
/// Draws `n_per_track` patches of `n_duration` frames from every track,
/// keeping at most `n_alive` tracks open, and stops after `n_samples`
/// patches if set. A `cache_uri` in `config` attaches a cache to `pipeline`
/// unless it already has one.
pub fn create_stream<L: AnnotationLoader>(
    manifest: SourceManifest,
    pipeline: TrackPipeline<L>,
    config: &StreamConfig,
) -> Result<TrackMultiplexer<TrackSource<L>>> {
    config.validate()?;

    let pipeline = match (&config.cache_uri, pipeline.cache.is_some()) {
        (Some(uri), false) => pipeline.with_cache(Arc::new(FeatureCache::open(uri)?)),
        _ => pipeline,
    };
    let pipeline = Arc::new(pipeline);

    let sources = manifest
        .into_iter()
        .map(|entry| TrackSource {
            entry,
            pipeline: pipeline.clone(),
            n_per_track: config.n_per_track,
            n_duration: config.n_duration,
        })
        .collect();

    let rng = StdRng::seed_from_u64(config.resolve_seed());
    let stream = TrackMultiplexer::new(sources, config.n_alive, rng)?
        .with_limit(config.n_samples)
        .with_error_policy(config.on_track_error);
    Ok(if config.shuffle_sources {
        stream.shuffle_sources()
    } else {
        stream
    })
}

/// Merges `streams` and groups their patches into mini-batches of
/// `n_batch` rows, stopping after `n_samples` patches if set.
pub fn mux_streams(streams: Vec<PatchStream>, config: &StreamConfig) -> Result<BatchMultiplexer> {
    config.validate()?;
    BatchMultiplexer::new(
        streams,
        config.n_samples,
        config.n_batch,
        config.partial_batch,
        config.resolve_seed(),
    )
}
