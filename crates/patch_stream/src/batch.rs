use crate::collator::{Collator, ConcatCollator};
use crate::minibatch::MiniBatch;
use crate::mux::{ReadyStream, TrackMultiplexer};
use crate::track_data::Patch;
use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// A boxed stream of patches, as produced by a pipeline or any other source.
pub type PatchStream = Box<dyn Iterator<Item = Result<Patch>> + Send>;

/// What happens to the last, short batch when the input runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartialBatch {
    /// Emit it with fewer than `n_batch` rows.
    Emit,
    /// Discard it, so every batch has exactly `n_batch` rows.
    #[default]
    Drop,
}

/// Merges several patch streams and groups the result into mini-batches.
///
/// All input streams are kept alive at once and scheduled exactly like a
/// [`TrackMultiplexer`]: each step pulls the next patch from a uniformly
/// chosen live stream. Every `n_batch` consecutive patches are collated into
/// one [`MiniBatch`].
///
/// The sequence ends once `n_samples` patches have been consumed (if set) or
/// every input is exhausted. With unbounded inputs and no cap it never ends.
///
/// # Example
/// ```ignore
/// let batches = BatchMultiplexer::new(vec![train_a, train_b], None, 64, PartialBatch::Drop, 0)?;
/// for batch in batches.take(1000) {
///     let batch = batch?.to_device(Device::cuda_if_available());
/// }
/// ```
pub struct BatchMultiplexer<C = ConcatCollator> {
    patches: TrackMultiplexer<ReadyStream<Patch>>,
    n_batch: usize,
    partial: PartialBatch,
    collator: C,
    done: bool,
}

impl BatchMultiplexer<ConcatCollator> {
    pub fn new(
        streams: Vec<PatchStream>,
        n_samples: Option<usize>,
        n_batch: usize,
        partial: PartialBatch,
        seed: u64,
    ) -> Result<Self> {
        ensure!(n_batch > 0, "n_batch must be > 0, but got n_batch={}", n_batch);

        let n_alive = streams.len().max(1);
        let sources = streams
            .into_iter()
            .enumerate()
            .map(|(i, stream)| ReadyStream::new(format!("stream-{}", i), stream))
            .collect();
        let patches = TrackMultiplexer::new(sources, n_alive, StdRng::seed_from_u64(seed))?
            .with_limit(n_samples);

        Ok(Self {
            patches,
            n_batch,
            partial,
            collator: ConcatCollator,
            done: false,
        })
    }
}

impl<C: Collator> BatchMultiplexer<C> {
    /// Replaces the collator used to assemble each batch.
    pub fn with_collator<D: Collator>(self, collator: D) -> BatchMultiplexer<D> {
        BatchMultiplexer {
            patches: self.patches,
            n_batch: self.n_batch,
            partial: self.partial,
            collator,
            done: self.done,
        }
    }

    pub fn n_batch(&self) -> usize {
        self.n_batch
    }

    /// Number of patches consumed from the inputs so far.
    pub fn patches_emitted(&self) -> usize {
        self.patches.emitted()
    }
}

impl<C: Collator> Iterator for BatchMultiplexer<C> {
    type Item = Result<MiniBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buffer = Vec::with_capacity(self.n_batch);
        while buffer.len() < self.n_batch {
            match self.patches.next() {
                Some(Ok(patch)) => buffer.push(patch),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if buffer.is_empty() {
            return None;
        }
        if buffer.len() < self.n_batch && self.partial == PartialBatch::Drop {
            debug!(rows = buffer.len(), n_batch = self.n_batch, "dropping partial batch");
            return None;
        }
        Some(self.collator.collate(&buffer))
    }
}
