use crate::minibatch::MiniBatch;
use crate::track_data::Patch;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use tch::Tensor;

/// A `Collator` defines how several [`Patch`]es are combined into a [`MiniBatch`].
pub trait Collator {
    fn collate(&self, patches: &[Patch]) -> Result<MiniBatch>;
}

/// A `Collator` that concatenates every field along axis 0.
///
/// Patches already carry a leading track axis (usually of size 1), so a batch
/// of `n` patches yields fields of shape `[n, ...]`. No padding is applied:
/// all patches must share the same field names and the same trailing shape
/// per field, otherwise an error is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatCollator;

impl Collator for ConcatCollator {
    fn collate(&self, patches: &[Patch]) -> Result<MiniBatch> {
        if patches.is_empty() {
            bail!("Cannot collate empty patch list");
        }

        // Validate field names
        let first_keys: BTreeSet<&str> = patches[0].field_names().collect();
        for (i, patch) in patches.iter().enumerate().skip(1) {
            let missing: Vec<&str> = first_keys
                .iter()
                .copied()
                .filter(|k| !patch.contains(k))
                .collect();
            let extra: Vec<&str> = patch
                .field_names()
                .filter(|k| !first_keys.contains(k))
                .collect();

            if !missing.is_empty() || !extra.is_empty() {
                bail!(
                    "Patch #{} has mismatched fields:\n -Missing: {:?}\n -Extra: {:?}",
                    i,
                    missing,
                    extra
                );
            }
        }

        let mut tensors = BTreeMap::new();
        for key in first_keys {
            let parts: Vec<&Tensor> = patches
                .iter()
                .map(|p| p.get(key))
                .collect::<Result<_>>()?;

            let reference = parts[0].size();
            if reference.is_empty() {
                bail!("Field '{}' is a scalar and has no axis to concatenate", key);
            }
            for (i, part) in parts.iter().enumerate().skip(1) {
                let shape = part.size();
                if shape.len() != reference.len() || shape[1..] != reference[1..] {
                    bail!(
                        "Shape mismatch in patch {} for field '{}': expected [_, {:?}], got {:?}",
                        i,
                        key,
                        &reference[1..],
                        shape
                    );
                }
            }

            tensors.insert(key.to_string(), Tensor::cat(&parts, 0));
        }
        Ok(MiniBatch { tensors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn patch(value: f64, frames: i64) -> Patch {
        let kind = (Kind::Float, Device::Cpu);
        Patch::from_single("input", Tensor::full(&[1, frames, 4, 1], value, kind))
            .with_field("target", Tensor::full(&[1, frames, 2], value, kind))
            .with_field("tempo", Tensor::full(&[1, 3], value, kind))
    }

    #[test]
    fn test_concat_along_track_axis() -> Result<()> {
        let patches = vec![patch(0.0, 16), patch(1.0, 16), patch(2.0, 16)];
        let batch = ConcatCollator.collate(&patches)?;

        assert_eq!(batch.batch_size()?, 3);
        assert_eq!(batch.get("input")?.size(), &[3, 16, 4, 1]);
        assert_eq!(batch.get("target")?.size(), &[3, 16, 2]);
        assert_eq!(batch.get("tempo")?.size(), &[3, 3]);

        // row order follows patch order
        for row in 0..3 {
            assert_eq!(batch.get("input")?.double_value(&[row, 5, 2, 0]), row as f64);
        }
        Ok(())
    }

    #[test]
    fn test_multi_row_patches_concatenate() -> Result<()> {
        let wide = Patch::from_single(
            "input",
            Tensor::zeros(&[4, 8], (Kind::Float, Device::Cpu)),
        );
        let narrow = Patch::from_single(
            "input",
            Tensor::zeros(&[1, 8], (Kind::Float, Device::Cpu)),
        );
        let batch = ConcatCollator.collate(&[wide, narrow])?;
        assert_eq!(batch.batch_size()?, 5);
        Ok(())
    }

    #[test]
    fn test_trailing_shape_mismatch() {
        let result = ConcatCollator.collate(&[patch(0.0, 16), patch(0.0, 15)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_field_mismatch() {
        let a = patch(0.0, 16);
        let b = patch(0.0, 16).with_field("extra", Tensor::zeros(&[1], (Kind::Float, Device::Cpu)));
        let err = ConcatCollator.collate(&[a, b]).unwrap_err();
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn test_empty_patch_list() {
        assert!(ConcatCollator.collate(&[]).is_err());
    }
}
