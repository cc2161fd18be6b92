use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One recording and its annotation document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub audio: PathBuf,
    #[serde(alias = "jams")]
    pub annotation: PathBuf,
}

impl TrackEntry {
    pub fn new(audio: impl Into<PathBuf>, annotation: impl Into<PathBuf>) -> Self {
        Self {
            audio: audio.into(),
            annotation: annotation.into(),
        }
    }
}

/// An ordered list of tracks to stream from.
///
/// # Examples
/// A manifest file holds one JSON object per line:
/// ```text
/// {"audio": "audio/0001.wav", "annotation": "jams/0001.jams"}
/// {"audio": "audio/0002.wav", "jams": "jams/0002.jams"}
/// ```
/// ```ignore
/// let manifest = SourceManifest::from_jsonl("train.jsonl")?;
/// let stream = create_stream(manifest, pipeline, &config)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceManifest {
    entries: Vec<TrackEntry>,
}

impl SourceManifest {
    pub fn new(entries: Vec<TrackEntry>) -> Self {
        Self { entries }
    }

    /// Builds a manifest from parallel `(audio, annotation)` pairs.
    pub fn from_pairs<A, J>(pairs: impl IntoIterator<Item = (A, J)>) -> Self
    where
        A: Into<PathBuf>,
        J: Into<PathBuf>,
    {
        pairs
            .into_iter()
            .map(|(audio, annotation)| TrackEntry::new(audio, annotation))
            .collect()
    }

    /// Reads a JSONL manifest.
    ///
    /// Blank lines are skipped. Relative paths are kept as written.
    ///
    /// # Errors
    /// - Fails if the file cannot be opened or read.
    /// - Fails on the first line that is not a valid entry, naming the line
    ///   number (e.g., "Invalid manifest entry at line 3").
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TrackEntry = serde_json::from_str(&line).with_context(|| {
                format!(
                    "Invalid manifest entry at line {} of {}",
                    line_num + 1,
                    path.display()
                )
            })?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TrackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<TrackEntry> for SourceManifest {
    fn from_iter<I: IntoIterator<Item = TrackEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for SourceManifest {
    type Item = TrackEntry;
    type IntoIter = std::vec::IntoIter<TrackEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
