use crate::collator::Collator;
use crate::track_data::Patch;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use tch::{Device, Tensor};

/// A group of patches concatenated for model input.
///
/// Holds a map from field names (e.g. `"cqt/mag"`, `"beat/target"`) to
/// batched tensors. Every tensor has shape `[batch_size, ...]`, where the
/// trailing dimensions are those of the individual patches.
///
/// # Examples
/// Given 64 patches, each with:
/// - `"cqt/mag"` -> shape `[1, 16, 216, 1]`
/// - `"key/global"` -> shape `[1, 24]`
///
/// the resulting `MiniBatch` contains:
/// - `"cqt/mag"` -> shape `[64, 16, 216, 1]`
/// - `"key/global"` -> shape `[64, 24]`
#[derive(Debug)]
pub struct MiniBatch {
    pub tensors: BTreeMap<String, Tensor>,
}

impl MiniBatch {
    /// Builds a `MiniBatch` from `patches` with the given [`Collator`].
    ///
    /// Example:
    /// let batch = MiniBatch::collate(&patches, ConcatCollator)?;
    pub fn collate(patches: &[Patch], collator: impl Collator) -> Result<Self> {
        collator.collate(patches)
    }

    /// Returns the number of rows in the batch.
    pub fn batch_size(&self) -> Result<i64> {
        self.tensors
            .values()
            .next()
            .map(|t| t.size()[0])
            .ok_or(anyhow!("Empty mini-batch"))
    }

    pub fn get(&self, field: &str) -> Result<&Tensor> {
        self.tensors
            .get(field)
            .ok_or_else(|| anyhow!("Field '{}' not found in mini-batch", field))
    }

    /// Returns an iterator over all field names in the batch, in sorted order.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Transfers all tensors to the target device (CPU/GPU)
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            tensors: self
                .tensors
                .iter()
                .map(|(name, tensor)| (name.clone(), tensor.to_device(device)))
                .collect(),
        }
    }
}
