//! Get-or-compute feature cache.
//!
//! Feature extraction (e.g. a constant-Q transform over a whole recording)
//! is far more expensive than sampling patches from its output, so extracted
//! features are memoized per recording in a [`FeatureStore`].
//!
//! # Stores
//! ```text
//! memory://            -> MemoryStore     (process-local, for tests and one-off runs)
//! file:///data/cache   -> DirectoryStore  (one safetensors file per key)
//! /data/cache          -> DirectoryStore  (bare paths are treated as file://)
//! ```
//!
//! Entries are immutable once committed: the cache only ever writes a key
//! that is absent from the store.

use crate::error::DataError;
use crate::track_data::TrackData;
use anyhow::{anyhow, bail, Context, Result};
use bytemuck::pod_collect_to_vec;
use safetensors::{
    tensor::{Dtype, TensorView},
    SafeTensors,
};
use std::collections::HashMap;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tch::{Device, Kind, Tensor};
use tracing::debug;
use twox_hash::XxHash64;

/// Metadata entry holding the original key inside each stored file.
const KEY_METADATA: &str = "__key__";

/// A key-value persistence medium for extracted features.
///
/// Implementations are not required to be durable until [`sync`](Self::sync)
/// returns.
pub trait FeatureStore: Send {
    fn contains(&self, key: &str) -> Result<bool>;

    /// Returns the stored value, or `None` if `key` is absent.
    fn get(&self, key: &str) -> Result<Option<TrackData>>;

    fn set(&mut self, key: &str, value: &TrackData) -> Result<()>;

    /// Flushes every pending write to durable storage.
    fn sync(&mut self) -> Result<()>;

    /// Drops a write of `key` that has not been synced yet.
    ///
    /// Entries already committed are left untouched.
    fn discard(&mut self, key: &str);
}

// ============================================================================
/// Process-local store. Values are deep-copied on both `set` and `get`, so
/// in-place edits on either side never reach the stored entry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, TrackData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FeatureStore for MemoryStore {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<TrackData>> {
        Ok(self.entries.get(key).map(deep_copy))
    }

    fn set(&mut self, key: &str, value: &TrackData) -> Result<()> {
        self.entries.insert(key.to_string(), deep_copy(value));
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    // set commits immediately, so there is never anything pending
    fn discard(&mut self, _key: &str) {}
}

fn deep_copy(value: &TrackData) -> TrackData {
    value
        .fields
        .iter()
        .map(|(name, tensor)| (name.clone(), tensor.copy()))
        .collect()
}

// ============================================================================
/// Directory-backed store: one safetensors file per key.
///
/// File names are the hex xxhash64 of the key; the key itself is kept in the
/// file's metadata and checked on every read. Writes are buffered until
/// [`sync`](FeatureStore::sync), which writes each entry to a temp file,
/// fsyncs it, then renames it into place.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    pending: HashMap<String, Vec<u8>>,
}

impl DirectoryStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;
        Ok(Self {
            root,
            pending: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of entries written but not yet synced.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key.as_bytes());
        self.root.join(format!("{:016x}.safetensors", hasher.finish()))
    }
}

impl FeatureStore for DirectoryStore {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.pending.contains_key(key) || self.entry_path(key).is_file())
    }

    fn get(&self, key: &str) -> Result<Option<TrackData>> {
        if let Some(bytes) = self.pending.get(key) {
            return decode_entry(key, bytes).map(Some);
        }

        let path = self.entry_path(key);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to read cache entry {}", path.display()))?;
        decode_entry(key, &bytes).map(Some)
    }

    fn set(&mut self, key: &str, value: &TrackData) -> Result<()> {
        let bytes = encode_entry(key, value)?;
        self.pending.insert(key.to_string(), bytes);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let keys: Vec<String> = self.pending.keys().cloned().collect();
        for key in keys {
            let path = self.entry_path(&key);
            let tmp_path = path.with_extension("safetensors.tmp");
            let bytes = &self.pending[&key];

            let mut file = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(bytes)
                .and_then(|_| file.sync_all())
                .with_context(|| format!("Failed to write cache entry for '{}'", key))?;
            fs::rename(&tmp_path, &path)
                .with_context(|| format!("Failed to commit {}", path.display()))?;

            // Only committed entries leave the pending set
            self.pending.remove(&key);
        }
        Ok(())
    }

    fn discard(&mut self, key: &str) {
        self.pending.remove(key);
    }
}

/// Opens the store addressed by `uri`.
///
/// Supported forms: `memory://`, `file://<dir>`, or a bare directory path.
pub fn open_store(uri: &str) -> Result<Box<dyn FeatureStore>> {
    match uri.split_once("://") {
        Some(("memory", _)) => Ok(Box::new(MemoryStore::new())),
        Some(("file", path)) => Ok(Box::new(DirectoryStore::open(path)?)),
        Some((scheme, _)) => Err(DataError::Config(format!(
            "Unsupported cache scheme '{}' in '{}'",
            scheme, uri
        ))
        .into()),
        None => Ok(Box::new(DirectoryStore::open(uri)?)),
    }
}

// ============================================================================
/// Memoizes feature extraction per recording.
///
/// The store handle is owned by the cache and released when the cache is
/// dropped; callers that share one cache across many tracks wrap it in an
/// `Arc`.
pub struct FeatureCache {
    store: Mutex<Box<dyn FeatureStore>>,
}

impl FeatureCache {
    pub fn new(store: Box<dyn FeatureStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Opens a cache over the store addressed by `uri` (see [`open_store`]).
    pub fn open(uri: &str) -> Result<Self> {
        Ok(Self::new(open_store(uri)?))
    }

    /// Returns the cached value for `key`, computing and persisting it on a miss.
    ///
    /// On a miss, `compute` runs, its output is written and the store is
    /// synced before the value is returned. If `compute` fails nothing is
    /// written.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<TrackData>
    where
        F: FnOnce() -> Result<TrackData>,
    {
        let mut store = self
            .store
            .lock()
            .map_err(|_| DataError::cache(key, "store lock poisoned by an earlier panic"))?;

        if let Some(value) = store.get(key)? {
            debug!(key, "feature cache hit");
            return Ok(value);
        }

        debug!(key, "feature cache miss");
        let value = compute()?;
        if let Err(e) = store.set(key, &value).and_then(|_| store.sync()) {
            store.discard(key);
            return Err(e.context(format!("Failed to persist cache entry '{}'", key)));
        }
        Ok(value)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let store = self
            .store
            .lock()
            .map_err(|_| DataError::cache(key, "store lock poisoned by an earlier panic"))?;
        store.contains(key)
    }
}

impl std::fmt::Debug for FeatureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureCache").finish_non_exhaustive()
    }
}

/// Serializes a track's fields into safetensors bytes tagged with `key`.
fn encode_entry(key: &str, value: &TrackData) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(value.len());
    for (name, tensor) in &value.fields {
        let dtype = dtype_of(tensor.kind()).ok_or_else(|| {
            DataError::cache(
                key,
                format!("Unsupported kind {:?} for field '{}'", tensor.kind(), name),
            )
        })?;
        let tensor = tensor.to_device(Device::Cpu).contiguous();
        let numel = tensor.numel();
        let mut bytes = vec![0u8; numel * tensor.kind().elt_size_in_bytes()];
        tensor.f_copy_data_u8(&mut bytes, numel)?;
        let shape: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
        raw.push((name.as_str(), dtype, shape, bytes));
    }

    let views = raw
        .iter()
        .map(|(name, dtype, shape, bytes)| {
            TensorView::new(*dtype, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| DataError::cache(key, e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let metadata = Some(HashMap::from([(KEY_METADATA.to_string(), key.to_string())]));
    safetensors::serialize(views, &metadata).map_err(|e| DataError::cache(key, e.to_string()).into())
}

/// Parses safetensors bytes written by [`encode_entry`] for `key`.
fn decode_entry(key: &str, bytes: &[u8]) -> Result<TrackData> {
    let (_, metadata) =
        SafeTensors::read_metadata(bytes).map_err(|e| DataError::cache(key, e.to_string()))?;
    let stored_key = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(KEY_METADATA));
    if stored_key.map(String::as_str) != Some(key) {
        bail!(DataError::cache(
            key,
            format!("Entry belongs to a different key ({:?})", stored_key)
        ));
    }

    let safetensors =
        SafeTensors::deserialize(bytes).map_err(|e| DataError::cache(key, e.to_string()))?;
    safetensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            let tensor = tensor_from_view(&view)
                .with_context(|| format!("Failed to convert cached field '{}'", name))?;
            Ok::<_, anyhow::Error>((name, tensor))
        })
        .collect()
}

fn dtype_of(kind: Kind) -> Option<Dtype> {
    match kind {
        Kind::Uint8 => Some(Dtype::U8),
        Kind::Int8 => Some(Dtype::I8),
        Kind::Int16 => Some(Dtype::I16),
        Kind::Int => Some(Dtype::I32),
        Kind::Int64 => Some(Dtype::I64),
        Kind::Float => Some(Dtype::F32),
        Kind::Double => Some(Dtype::F64),
        _ => None,
    }
}

/// Converts a TensorView to a tch::Tensor.
/// Supported dtypes: U8, I8, I16, I32, I64, F32, F64.
fn tensor_from_view(view: &TensorView<'_>) -> Result<Tensor> {
    let shape: Vec<i64> = view.shape().iter().map(|&d| d as i64).collect();
    let raw = view.data();
    let tensor = match view.dtype() {
        Dtype::U8 => Tensor::from_slice(raw),
        Dtype::I8 => Tensor::from_slice(&pod_collect_to_vec::<u8, i8>(raw)),
        Dtype::I16 => Tensor::from_slice(&pod_collect_to_vec::<u8, i16>(raw)),
        Dtype::I32 => Tensor::from_slice(&pod_collect_to_vec::<u8, i32>(raw)),
        Dtype::I64 => Tensor::from_slice(&pod_collect_to_vec::<u8, i64>(raw)),
        Dtype::F32 => Tensor::from_slice(&pod_collect_to_vec::<u8, f32>(raw)),
        Dtype::F64 => Tensor::from_slice(&pod_collect_to_vec::<u8, f64>(raw)),
        other => {
            return Err(anyhow!(
                "Unsupported dtype '{:?}'. Supported dtypes: U8, I8, I16, I32, I64, F32, F64. \
                 Tensor shape: {:?}",
                other,
                shape
            ))
        }
    };
    Ok(tensor.reshape(&shape))
}
