use anyhow::{Context, Result};
use std::marker::PhantomData;

/// Defines the core `Transform` trait used for annotation-to-target conversion.
///
/// The `Transform<I, O>` trait represents a stateless operation converting an
/// input of type `I` into an output of type `O`. Task transformers are
/// `Transform<&Doc, TrackData>`: they read a parsed annotation document and
/// emit named target tensors (e.g. beat activations, chord labels).
///
/// Steps can be chained with `.then(...)` when the output of one transform
/// feeds the next (e.g. decode annotations, then re-frame them).
///
/// Note: `then()` works only when:
/// 1. **Types align**: `self: Transform<I, O>`, `next: Transform<O, M>`
/// 2. **Owned**: `Self::Sized` (no trait objects, must be concrete)
/// 3. **Thread-safe**: intermediate and output types must be `Send`
pub trait Transform<I, O>: Send + Sync {
    /// Applies the transformation to the input
    fn apply(&self, input: I) -> Result<O>;

    /// Name used in logs and error reports.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    #[inline]
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain {
            first: self,
            second: next,
            _marker: PhantomData,
        }
    }
}

/// A chain of two transforms (`A` -> `B`)
/// - `PhantomData<M>` enforces intermediate type alignment.
#[derive(Debug)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    /// Creates a new transform chain.
    /// Use [`Transform::then`] for better ergonomics; `Chain::new` is useful
    /// when pipelines are assembled from runtime configuration.
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        self.first
            .apply(input)
            .and_then(|mid| self.second.apply(mid))
            .with_context(|| {
                format!(
                    "Transform chain failed: {} → {}",
                    self.first.name(),
                    self.second.name()
                )
            })
    }

    fn name(&self) -> String {
        format!("{}+{}", self.first.name(), self.second.name())
    }
}
