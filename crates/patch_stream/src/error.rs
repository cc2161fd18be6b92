use std::path::PathBuf;
use thiserror::Error;

/// Failure conditions raised by the sampling pipeline.
///
/// Public operations return `anyhow::Result`; when a caller needs to react
/// to a specific condition (e.g. skip a track with no temporal data) it can
/// recover the kind with `err.downcast_ref::<DataError>()`.
#[derive(Error, Debug)]
pub enum DataError {
    /// An annotation or audio source could not be read.
    #[error("Failed to load '{}'", path.display())]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No field of the track has a temporal axis (rank > 2).
    #[error("No time-series data available")]
    NoTemporalData,

    /// The requested patch does not fit in the track's valid duration.
    #[error("Patch duration {n_duration} does not fit in track duration {duration}")]
    Range { duration: usize, n_duration: usize },

    /// A pluggable annotation transformer failed.
    #[error("Transformer '{name}' failed")]
    Transform {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The feature cache backing store failed or holds an unreadable entry.
    #[error("Feature cache error for key '{key}': {message}")]
    Cache { key: String, message: String },

    /// Invalid pipeline or store configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    pub fn load_failure(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        Self::LoadFailure {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn transform(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Transform {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn cache(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cache {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Returns the pipeline condition carried by `err`, if any.
///
/// Looks through the whole context chain, so errors wrapped with
/// `.context(...)` still resolve to their kind.
pub fn data_error(err: &anyhow::Error) -> Option<&DataError> {
    err.chain().find_map(|cause| cause.downcast_ref::<DataError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_data_error_survives_context() {
        let err: anyhow::Result<()> = Err(DataError::NoTemporalData.into());
        let err = err.context("while opening track 'a.wav'").unwrap_err();

        assert!(matches!(data_error(&err), Some(DataError::NoTemporalData)));
        assert!(err.to_string().contains("a.wav"));
    }

    #[test]
    fn test_transform_error_keeps_source() {
        let err = DataError::transform("beat", anyhow!("bad sample rate"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("bad sample rate"));
    }
}
