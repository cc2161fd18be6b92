use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use tch::Tensor;

/// `TrackData` is the named tensor collection flowing through the pipeline.
///
/// It maps field names (e.g. `"cqt/mag"`, `"beat/target"`) to tensors. Once a
/// collection has been assembled for a track, every tensor carries a
/// singleton track axis at position 0, and:
/// - fields with rank > 2 are **temporal**: axis 1 indexes frames,
/// - fields with rank <= 2 are **static** and are never sliced.
///
/// Fields are kept in a `BTreeMap`, so iteration order is sorted by name and
/// does not depend on insertion history.
///
/// # Examples
/// - A track: `{"cqt/mag": [1, 900, 216, 1], "beat/target": [1, 900, 1], "key/global": [1, 24]}`
/// - A patch of that track: `{"cqt/mag": [1, 16, 216, 1], "beat/target": [1, 16, 1], "key/global": [1, 24]}`
#[derive(Debug, Default)]
pub struct TrackData {
    pub fields: BTreeMap<String, Tensor>,
}

/// A fixed-duration temporal window of a track.
///
/// A patch has exactly the field set of the track it was cut from.
pub type Patch = TrackData;

/// Creates a shallow clone: tensor storage is shared, not copied.
impl Clone for TrackData {
    fn clone(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.shallow_clone()))
            .collect();
        Self { fields }
    }
}

impl TrackData {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `TrackData` from a single `(field_name, tensor)` pair.
    ///
    /// Chain with [`with_field`](Self::with_field) to add more fields.
    pub fn from_single(name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            fields: BTreeMap::from([(name.into(), tensor)]),
        }
    }

    /// Adds or overwrites a field.
    pub fn with_field(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.fields.insert(name.into(), tensor);
        self
    }

    /// Inserts a field, returning the tensor it replaced, if any.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.fields.insert(name.into(), tensor)
    }

    /// Returns a reference to the tensor by field name.
    pub fn get(&self, field: &str) -> Result<&Tensor> {
        self.fields
            .get(field)
            .ok_or_else(|| anyhow!("Field '{}' not found", field))
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns an iterator over all field names, in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Returns an iterator over the fields that carry a time axis.
    pub fn temporal_fields(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.fields
            .iter()
            .filter(|(_, tensor)| is_temporal(tensor))
            .map(|(name, tensor)| (name.as_str(), tensor))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns a copy with a singleton axis prepended to every tensor.
    ///
    /// Used to turn raw transformer/extractor output (`[T, ...]`) into
    /// track-shaped fields (`[1, T, ...]`).
    pub fn with_track_axis(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.unsqueeze(0)))
            .collect();
        Self { fields }
    }
}

/// A tensor is temporal when its rank exceeds 2: axis 0 is the track axis,
/// axis 1 is time, and at least one more axis carries the frame content.
#[inline]
pub fn is_temporal(tensor: &Tensor) -> bool {
    tensor.dim() > 2
}

impl IntoIterator for TrackData {
    type Item = (String, Tensor);
    type IntoIter = std::collections::btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, Tensor)> for TrackData {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
