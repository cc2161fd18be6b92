//! Annotation-to-target mapping.
//!
//! An annotation document is loaded once per track, then every task
//! transformer turns it into named target tensors. Their outputs are merged
//! into one [`TrackData`], each field gaining the singleton track axis.

use crate::error::DataError;
use crate::track_data::TrackData;
use crate::transforms::Transform;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::warn;

/// Loads a structured annotation document from disk.
pub trait AnnotationLoader: Send + Sync {
    type Document;

    fn load(&self, path: &Path) -> Result<Self::Document>;
}

/// Loads any JSON annotation document (JAMS and similar) as a `serde_json::Value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAnnotationLoader;

impl AnnotationLoader for JsonAnnotationLoader {
    type Document = Value;

    fn load(&self, path: &Path) -> Result<Value> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}

/// A transformer from a borrowed annotation document `D` to target fields.
///
/// Blanket-implemented for every `for<'a> Transform<&'a D, TrackData>`, so
/// plain `Transform` impls (and `Chain`s of them) can be boxed directly.
pub trait TaskTransformer<D>: for<'a> Transform<&'a D, TrackData> {}

impl<D, T> TaskTransformer<D> for T where T: for<'a> Transform<&'a D, TrackData> {}

/// Applies a set of task transformers to annotation documents.
#[derive(Debug, Clone, Default)]
pub struct AnnotationMapper<L> {
    loader: L,
}

impl<L: AnnotationLoader> AnnotationMapper<L> {
    pub fn new(loader: L) -> Self {
        Self { loader }
    }

    /// Loads the document at `annotation` and maps it through `transformers`.
    ///
    /// # Errors
    /// - [`DataError::LoadFailure`] if the document cannot be loaded.
    /// - [`DataError::Transform`] if any transformer fails.
    pub fn map(
        &self,
        annotation: &Path,
        transformers: &[Box<dyn TaskTransformer<L::Document>>],
    ) -> Result<TrackData> {
        let doc = self
            .loader
            .load(annotation)
            .map_err(|e| DataError::load_failure(annotation, e))?;
        map_document(&doc, transformers)
    }
}

/// Maps an already-loaded document through `transformers`, in order.
///
/// If two transformers emit the same field name, the later one wins; each
/// overwrite is logged.
pub fn map_document<D>(
    doc: &D,
    transformers: &[Box<dyn TaskTransformer<D>>],
) -> Result<TrackData> {
    let mut output = TrackData::new();
    for task in transformers {
        let target = task
            .apply(doc)
            .map_err(|e| DataError::transform(task.name(), e))?;

        for (name, value) in target {
            if output.insert(name.as_str(), value.unsqueeze(0)).is_some() {
                warn!(field = %name, task = %task.name(), "annotation field overwritten");
            }
        }
    }
    Ok(output)
}
