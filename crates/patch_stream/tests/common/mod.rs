#![allow(dead_code)]

use patch_stream::{
    JsonAnnotationLoader, SourceManifest, TrackData, TrackEntry, TrackPipeline, Transform,
};

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tch::{Device, Kind, Tensor};

/// Emits a per-frame target and a static key vector, both filled with the track id.
///
/// The target is two frames longer than the features, so the valid duration
/// of a track is always its feature length.
pub struct IdTarget;
impl Transform<&Value, TrackData> for IdTarget {
    fn apply(&self, doc: &Value) -> Result<TrackData> {
        let id = doc["id"].as_f64().ok_or_else(|| anyhow!("missing id"))?;
        let frames = doc["frames"].as_i64().ok_or_else(|| anyhow!("missing frames"))?;
        let kind = (Kind::Float, Device::Cpu);
        Ok(TrackData::from_single("beat/target", Tensor::full(&[frames + 2, 1], id, kind))
            .with_field("key/global", Tensor::full(&[24], id, kind)))
    }
}

/// Reads `"<id> <frames>"` from the audio file and emits `[frames, 6, 1]`
/// features filled with the id. Counts every call.
pub struct SyntheticExtractor {
    pub calls: Arc<AtomicUsize>,
}

impl patch_stream::FeatureExtractor for SyntheticExtractor {
    fn extract(&self, audio: &Path) -> Result<TrackData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = fs::read_to_string(audio)
            .with_context(|| format!("Failed to read {}", audio.display()))?;
        let mut parts = content.split_whitespace();
        let id: f64 = parts.next().ok_or_else(|| anyhow!("empty audio"))?.parse()?;
        let frames: i64 = parts.next().ok_or_else(|| anyhow!("no frames"))?.parse()?;
        Ok(TrackData::from_single(
            "cqt/mag",
            Tensor::full(&[frames, 6, 1], id, (Kind::Float, Device::Cpu)),
        ))
    }
}

/// Writes a fake recording and its annotation for track `id`.
pub fn write_track(dir: &Path, id: usize, frames: usize) -> Result<TrackEntry> {
    let audio = dir.join(format!("{:04}.wav", id));
    let jams = dir.join(format!("{:04}.jams", id));
    fs::write(&audio, format!("{} {}", id, frames))?;
    fs::write(&jams, json!({"id": id, "frames": frames}).to_string())?;
    Ok(TrackEntry::new(audio, jams))
}

/// Writes `n` tracks of `frames` frames each and returns their manifest.
pub fn write_tracks(dir: &Path, n: usize, frames: usize) -> Result<SourceManifest> {
    (0..n).map(|id| write_track(dir, id, frames)).collect()
}

pub fn make_pipeline(calls: &Arc<AtomicUsize>) -> TrackPipeline<JsonAnnotationLoader> {
    TrackPipeline::new(
        JsonAnnotationLoader,
        vec![Box::new(IdTarget)],
        SyntheticExtractor {
            calls: calls.clone(),
        },
    )
}

/// Track id of a patch, read from its static key field.
pub fn track_id(patch: &TrackData) -> Result<usize> {
    Ok(patch.get("key/global")?.double_value(&[0, 0]) as usize)
}

/// Counts streams that are currently materialized, from `open` until drop.
#[derive(Default)]
pub struct LiveGauge {
    pub current: AtomicUsize,
    pub peak: AtomicUsize,
}

/// Wraps a source so its opened stream is tracked by a [`LiveGauge`].
pub struct GaugedSource<S> {
    pub inner: S,
    pub gauge: Arc<LiveGauge>,
}

pub struct GaugedStream<I> {
    inner: I,
    gauge: Arc<LiveGauge>,
}

impl<S: patch_stream::StreamSource> patch_stream::StreamSource for GaugedSource<S> {
    type Item = S::Item;
    type Stream = GaugedStream<S::Stream>;

    fn label(&self) -> String {
        self.inner.label()
    }

    fn open(self, rng: rand::rngs::StdRng) -> Result<Self::Stream> {
        // counted before the track is built, so an overlap with a stream
        // that is still alive shows up in the peak
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        match self.inner.open(rng) {
            Ok(inner) => Ok(GaugedStream {
                inner,
                gauge: self.gauge,
            }),
            Err(e) => {
                self.gauge.current.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

impl<I: Iterator> Iterator for GaugedStream<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.inner.next()
    }
}

impl<I> Drop for GaugedStream<I> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
