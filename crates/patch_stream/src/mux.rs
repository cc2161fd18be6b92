//! Bounded-concurrency stream multiplexing.
//!
//! A [`TrackMultiplexer`] interleaves many lazily opened streams while
//! keeping at most `n_alive` of them open at once:
//!
//! ```text
//!   backlog (unopened sources)        active pool (<= n_alive slots)
//!   ┌────┬────┬────┬────┐             ┌────────┬────────┐
//!   │ s2 │ s3 │ s4 │ .. │ ──refill──▶ │ s0     │ s1     │ ──pick uniformly──▶ item
//!   └────┴────┴────┴────┘             └────────┴────────┘
//! ```
//!
//! At every step one active slot is chosen uniformly at random and its next
//! item is emitted. A slot whose stream is exhausted is refilled from the
//! backlog, or dropped from the pool once the backlog is empty. Sources are
//! opened (and so their track data is built) only when a slot needs them.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A not-yet-opened stream.
///
/// Opening consumes the source: each source contributes at most one stream
/// to a multiplexer.
pub trait StreamSource {
    type Item;
    type Stream: Iterator<Item = Result<Self::Item>>;

    /// Human-readable name used in logs and error context.
    fn label(&self) -> String;

    /// Opens the stream. `rng` is a generator dedicated to this stream.
    fn open(self, rng: StdRng) -> Result<Self::Stream>;
}

/// What a multiplexer does when a source fails to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackErrorPolicy {
    /// Yield the error and end the stream.
    #[default]
    Abort,
    /// Log the failure and open the next source instead.
    Skip,
}

/// An already-built stream, wrapped so it can be fed to a multiplexer.
pub struct ReadyStream<T> {
    label: String,
    stream: Box<dyn Iterator<Item = Result<T>> + Send>,
}

impl<T> ReadyStream<T> {
    pub fn new(label: impl Into<String>, stream: Box<dyn Iterator<Item = Result<T>> + Send>) -> Self {
        Self {
            label: label.into(),
            stream,
        }
    }
}

impl<T> StreamSource for ReadyStream<T> {
    type Item = T;
    type Stream = Box<dyn Iterator<Item = Result<T>> + Send>;

    fn label(&self) -> String {
        self.label.clone()
    }

    fn open(self, _rng: StdRng) -> Result<Self::Stream> {
        Ok(self.stream)
    }
}

struct ActiveStream<St> {
    label: String,
    stream: St,
    emitted: usize,
}

/// Interleaves streams opened from a list of sources, at most `n_alive` at a time.
///
/// Emits every item of every source (unless capped with
/// [`with_limit`](Self::with_limit)); the order is randomized per step.
/// An `Err` item from an active stream is yielded and ends the multiplexer.
pub struct TrackMultiplexer<S: StreamSource> {
    backlog: VecDeque<S>,
    active: Vec<ActiveStream<S::Stream>>,
    n_alive: usize,
    limit: Option<usize>,
    emitted: usize,
    opened: usize,
    skipped: usize,
    on_error: TrackErrorPolicy,
    rng: StdRng,
    done: bool,
}

impl<S: StreamSource> TrackMultiplexer<S> {
    /// Creates a multiplexer over `sources`, opened in the given order.
    pub fn new(sources: Vec<S>, n_alive: usize, rng: StdRng) -> Result<Self> {
        anyhow::ensure!(
            n_alive > 0,
            "n_alive must be > 0, but got n_alive={}",
            n_alive
        );
        Ok(Self {
            backlog: sources.into(),
            active: Vec::with_capacity(n_alive),
            n_alive,
            limit: None,
            emitted: 0,
            opened: 0,
            skipped: 0,
            on_error: TrackErrorPolicy::Abort,
            rng,
            done: false,
        })
    }

    /// Stops after `limit` items in total.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_error_policy(mut self, policy: TrackErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Shuffles the order in which sources will be opened.
    pub fn shuffle_sources(mut self) -> Self {
        self.backlog.make_contiguous().shuffle(&mut self.rng);
        self
    }

    /// Number of currently open streams (never more than `n_alive`).
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of sources not opened yet.
    pub fn remaining_sources(&self) -> usize {
        self.backlog.len()
    }

    /// Number of items emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Number of sources skipped under [`TrackErrorPolicy::Skip`].
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Opens the next usable source from the backlog.
    ///
    /// Returns `Ok(None)` once the backlog is empty.
    fn open_next(&mut self) -> Result<Option<ActiveStream<S::Stream>>> {
        while let Some(source) = self.backlog.pop_front() {
            let label = source.label();
            let rng = StdRng::from_rng(&mut self.rng);
            match source.open(rng) {
                Ok(stream) => {
                    self.opened += 1;
                    debug!(stream = %label, opened = self.opened, "stream activated");
                    return Ok(Some(ActiveStream {
                        label,
                        stream,
                        emitted: 0,
                    }));
                }
                Err(e) => match self.on_error {
                    TrackErrorPolicy::Abort => {
                        return Err(e.context(format!("Failed to open stream '{}'", label)))
                    }
                    TrackErrorPolicy::Skip => {
                        self.skipped += 1;
                        warn!(stream = %label, error = %format!("{:#}", e), "skipping stream");
                    }
                },
            }
        }
        Ok(None)
    }

    /// Tops the pool up to `n_alive` streams.
    fn fill(&mut self) -> Result<()> {
        while self.active.len() < self.n_alive {
            match self.open_next()? {
                Some(stream) => self.active.push(stream),
                None => break,
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: anyhow::Error) -> Option<Result<S::Item>> {
        self.done = true;
        self.active.clear();
        Some(Err(err))
    }
}

impl<S: StreamSource> Iterator for TrackMultiplexer<S> {
    type Item = Result<S::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            self.done = true;
            self.active.clear();
            return None;
        }

        if let Err(e) = self.fill() {
            return self.fail(e);
        }

        while !self.active.is_empty() {
            let slot = self.rng.random_range(0..self.active.len());
            let active = &mut self.active[slot];

            match active.stream.next() {
                Some(Ok(item)) => {
                    active.emitted += 1;
                    self.emitted += 1;
                    return Some(Ok(item));
                }
                Some(Err(e)) => {
                    let context = format!("Stream '{}' failed", active.label);
                    return self.fail(e.context(context));
                }
                None => {
                    debug!(stream = %active.label, emitted = active.emitted, "stream exhausted");
                    // release the exhausted stream before its replacement is built
                    drop(self.active.swap_remove(slot));
                    match self.open_next() {
                        Ok(Some(replacement)) => self.active.push(replacement),
                        Ok(None) => {}
                        Err(e) => return self.fail(e),
                    }
                }
            }
        }

        self.done = true;
        None
    }
}
