//! Configuration for patch streams.
//!
//! The `StreamConfig` struct stores the parameters that control how tracks
//! are sampled, multiplexed and batched.
//!
//! Example:
//! ```ignore
//! let config = StreamConfig::builder()
//!     .n_per_track(64)
//!     .n_duration(32)
//!     .n_alive(16)
//!     .n_batch(128)
//!     .cache_uri("file:///data/cache")
//!     .seed(42)
//!     .build();
//! config.validate()?;
//! ```
//!
//! # Memory considerations:
//! - `n_alive`: every active track keeps its full-length data resident, so
//!   memory grows linearly with this value.
//! - `n_per_track`: higher values amortize feature extraction over more
//!   patches but make consecutive batches more correlated.

use crate::batch::PartialBatch;
use crate::error::DataError;
use crate::mux::TrackErrorPolicy;
use anyhow::Result;

/// Configuration for [`create_stream`](crate::pipeline::create_stream) and
/// [`mux_streams`](crate::pipeline::mux_streams).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Patches drawn from each track before it is retired
    pub n_per_track: usize,
    /// Patch length in frames
    pub n_duration: usize,
    /// Maximum number of tracks held open at once
    pub n_alive: usize,
    /// Patches per mini-batch
    pub n_batch: usize,
    /// Total number of patches to emit (unbounded if not specified)
    pub n_samples: Option<usize>,
    /// Feature cache location (`memory://`, `file://<dir>` or a directory path).
    /// No caching if not specified.
    pub cache_uri: Option<String>,
    /// Random seed for reproducible streams (drawn from OS entropy if not specified)
    pub seed: Option<u64>,
    /// Whether a short final batch is emitted or dropped
    pub partial_batch: PartialBatch,
    /// What to do when a track cannot be opened
    pub on_track_error: TrackErrorPolicy,
    /// Whether to shuffle the order in which tracks are opened
    pub shuffle_sources: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            n_per_track: 128,
            n_duration: 16,
            n_alive: 32,
            n_batch: 64,
            n_samples: None,
            cache_uri: None,
            seed: None,
            partial_batch: PartialBatch::Drop,
            on_track_error: TrackErrorPolicy::Abort,
            shuffle_sources: false,
        }
    }
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Checks that every count is non-zero.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("n_per_track", self.n_per_track),
            ("n_duration", self.n_duration),
            ("n_alive", self.n_alive),
            ("n_batch", self.n_batch),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(DataError::Config(format!("{} must be > 0", name)).into());
            }
        }
        if self.n_samples == Some(0) {
            return Err(DataError::Config("n_samples must be > 0 when set".to_string()).into());
        }
        Ok(())
    }

    /// Returns the configured seed, or a fresh one from OS entropy.
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

/// Builder for StreamConfig with method chaining
#[derive(Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    pub fn n_per_track(mut self, n: usize) -> Self {
        self.config.n_per_track = n;
        self
    }

    /// Set the patch length in frames (must be shorter than every track)
    pub fn n_duration(mut self, frames: usize) -> Self {
        self.config.n_duration = frames;
        self
    }

    pub fn n_alive(mut self, n: usize) -> Self {
        self.config.n_alive = n;
        self
    }

    pub fn n_batch(mut self, n: usize) -> Self {
        self.config.n_batch = n;
        self
    }

    /// Cap the total number of patches
    pub fn n_samples(mut self, n: usize) -> Self {
        self.config.n_samples = Some(n);
        self
    }

    pub fn cache_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.cache_uri = Some(uri.into());
        self
    }

    /// Set the random seed for reproducible streams.
    ///
    /// When set, this seed controls:
    /// - Track order (if shuffle_sources = true)
    /// - Which active track each patch is drawn from
    /// - Patch offsets within each track
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn partial_batch(mut self, policy: PartialBatch) -> Self {
        self.config.partial_batch = policy;
        self
    }

    pub fn on_track_error(mut self, policy: TrackErrorPolicy) -> Self {
        self.config.on_track_error = policy;
        self
    }

    pub fn shuffle_sources(mut self, shuffle: bool) -> Self {
        self.config.shuffle_sources = shuffle;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> StreamConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::data_error;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.n_per_track, 128);
        assert_eq!(config.n_duration, 16);
        assert_eq!(config.n_alive, 32);
        assert_eq!(config.n_batch, 64);
        assert_eq!(config.n_samples, None);
        assert_eq!(config.partial_batch, PartialBatch::Drop);
        assert_eq!(config.on_track_error, TrackErrorPolicy::Abort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = StreamConfig::builder()
            .n_per_track(4)
            .n_alive(2)
            .n_samples(100)
            .seed(7)
            .cache_uri("memory://")
            .partial_batch(PartialBatch::Emit)
            .build();
        assert_eq!(config.n_per_track, 4);
        assert_eq!(config.n_alive, 2);
        assert_eq!(config.n_samples, Some(100));
        assert_eq!(config.resolve_seed(), 7);
        assert_eq!(config.cache_uri.as_deref(), Some("memory://"));
        assert_eq!(config.n_batch, 64);
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        for config in [
            StreamConfig::builder().n_alive(0).build(),
            StreamConfig::builder().n_duration(0).build(),
            StreamConfig::builder().n_samples(0).build(),
        ] {
            let err = config.validate().unwrap_err();
            assert!(matches!(data_error(&err), Some(DataError::Config(_))));
        }
    }
}
