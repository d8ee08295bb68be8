use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use bincode::Options;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: u32 = 1;

/// Upper bound on a weights file, well above a full ResNet50 (~100MB of f32).
const MAX_FILE_BYTES: u64 = 1 << 30;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_FILE_BYTES)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub values: ArrayD<f32>,
}

/// Numeric parameters of a network, keyed by layer-qualified name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsFile {
    pub format_version: u32,
    pub tensors: Vec<NamedTensor>,
}

impl WeightsFile {
    pub fn collect<'a>(parameters: impl IntoIterator<Item = (String, ArrayViewD<'a, f32>)>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            tensors: parameters
                .into_iter()
                .map(|(name, values)| NamedTensor {
                    name,
                    values: values.to_owned(),
                })
                .collect(),
        }
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read weights file {}", path.display()))?;
        let file: Self = options()
            .deserialize(&bytes)
            .with_context(|| format!("{} is not a weights file", path.display()))?;
        anyhow::ensure!(
            file.format_version == FORMAT_VERSION,
            "unsupported weights format version {} (expected {FORMAT_VERSION})",
            file.format_version
        );
        Ok(file)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = options().serialize(self).context("failed to encode weights")?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write weights file {}", path.display()))
    }

    /// Copy every tensor into the matching parameter slot.
    ///
    /// Each slot must find a tensor with its exact name and shape. Tensors no slot
    /// asks for are ignored.
    pub fn assign<'a>(
        self,
        slots: impl IntoIterator<Item = (String, ArrayViewMutD<'a, f32>)>,
    ) -> anyhow::Result<usize> {
        let mut tensors: HashMap<_, _> = self
            .tensors
            .into_iter()
            .map(|tensor| (tensor.name, tensor.values))
            .collect();
        let mut assigned = 0;
        for (name, mut slot) in slots {
            let values = tensors
                .remove(&name)
                .with_context(|| format!("weights file has no tensor named {name}"))?;
            anyhow::ensure!(
                values.shape() == slot.shape(),
                "tensor {name} has shape {:?}, layer expects {:?}",
                values.shape(),
                slot.shape()
            );
            slot.assign(&values);
            assigned += 1;
        }
        if !tensors.is_empty() {
            tracing::warn!(unused = tensors.len(), "weights file has tensors the network does not use");
        }
        Ok(assigned)
    }
}
