use std::fmt::Debug;

use anyhow::Context;
use profilepic_types::prelude::*;

/// A loaded model: a fixed-size image tensor in, one probability per [`Label`] out.
///
/// Implementations are immutable after loading and shared by every request.
pub trait Classifier: Send + Sync + Debug {
    /// Short name of the inference backend, for logs and the banner.
    fn backend(&self) -> &'static str;

    /// Side length of the square input the classifier was built for.
    fn input_size(&self) -> u32;

    fn predict(&self, input: &ImageTensor) -> anyhow::Result<Probabilities>;
}

/// Run `classifier` on `input` and turn its output into a [`Classification`].
pub fn classify(classifier: &dyn Classifier, input: &ImageTensor) -> anyhow::Result<Classification> {
    let size = classifier.input_size() as usize;
    anyhow::ensure!(
        input.is_single_rgb() && input.spatial_dim() == (size, size),
        "input tensor has shape {:?}, model expects [1, {size}, {size}, 3]",
        input.shape()
    );
    let probabilities = classifier.predict(input)?;
    tracing::debug!(backend = classifier.backend(), %probabilities, "prediction");
    Classification::from_probabilities(&probabilities).context("unexpected model output")
}
