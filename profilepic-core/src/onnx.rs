use std::{fmt::Debug, path::Path};

use anyhow::Context;
use profilepic_types::prelude::*;
use tract_onnx::prelude::*;

use crate::classifier::Classifier;

type Plan = TypedRunnableModel<TypedModel>;

/// A serialized ONNX graph, optimised for a fixed `[1, size, size, 3]` input.
pub struct OnnxClassifier {
    plan: Plan,
    size: u32,
}

impl OnnxClassifier {
    pub fn load(path: &Path, size: u32) -> anyhow::Result<Self> {
        let side = size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("{} is not a readable ONNX graph", path.display()))?
            .with_input_fact(0, f32::fact([1, side, side, ImageTensor::CHANNELS]).into())?
            .into_optimized()
            .context("failed to optimise ONNX graph")?
            .into_runnable()?;
        Ok(Self { plan, size })
    }
}

impl Classifier for OnnxClassifier {
    fn backend(&self) -> &'static str {
        "onnx"
    }

    fn input_size(&self) -> u32 {
        self.size
    }

    fn predict(&self, input: &ImageTensor) -> anyhow::Result<Probabilities> {
        let input = input.as_standard_layout();
        let values = input.as_slice().context("input tensor is not contiguous")?;
        let tensor = Tensor::from_shape::<f32>(input.shape(), values)?;
        let outputs = self.plan.run(tvec!(tensor.into()))?;
        let output = outputs.first().context("model produced no outputs")?;
        let probabilities: Vec<f32> = output.to_array_view::<f32>()?.iter().copied().collect();
        anyhow::ensure!(
            probabilities.len() == Label::COUNT,
            "model produced {} outputs, expected {}",
            probabilities.len(),
            Label::COUNT
        );
        Ok(probabilities.into())
    }
}

impl Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("input", &[1, self.size, self.size, 3])
            .field("nodes", &self.plan.model().nodes().len())
            .finish()
    }
}
