use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    classifier::Classifier,
    network::{ResNet, ResNetConfig},
    onnx::OnnxClassifier,
};

/// Outcome of loading the model at startup. Never changes afterwards.
#[derive(Debug, Clone)]
pub enum ModelState {
    Loaded(Arc<dyn Classifier>),
    Unavailable(String),
}

impl ModelState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn classifier(&self) -> Option<&Arc<dyn Classifier>> {
        match self {
            Self::Loaded(classifier) => Some(classifier),
            Self::Unavailable(_) => None,
        }
    }

    /// `"loaded"` or `"not_loaded"`, as reported by the health endpoint.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Loaded(_) => "loaded",
            Self::Unavailable(_) => "not_loaded",
        }
    }
}

/// Where tier 2 looks for weights: `<stem>_weights.bin` next to an `.onnx` file, then the file itself.
pub fn weights_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    let is_onnx = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("onnx"));
    if let (true, Some(stem)) = (is_onnx, path.file_stem()) {
        let mut name = stem.to_os_string();
        name.push("_weights.bin");
        let sibling = path.with_file_name(name);
        if sibling.is_file() {
            candidates.push(sibling);
        }
    }
    candidates.push(path.to_path_buf());
    candidates
}

fn rebuild(path: &Path, architecture: ResNetConfig) -> anyhow::Result<ResNet> {
    let mut errors = Vec::new();
    for candidate in weights_candidates(path) {
        tracing::info!(path = %candidate.display(), "rebuilding architecture from weights");
        match ResNet::from_weights()
            .config(architecture.clone())
            .path(&candidate)
            .call()
        {
            Ok(network) => return Ok(network),
            Err(err) => {
                tracing::warn!(path = %candidate.display(), "weights not usable: {err:#}");
                errors.push(format!("{err:#}"));
            }
        }
    }
    anyhow::bail!(errors.join("; "))
}

/// Load the classifier at `path`, falling back to an in-process rebuild.
///
/// Failures are logged and reported as [`ModelState::Unavailable`]; this never errors.
#[bon::builder]
pub fn load_model(
    path: impl Into<PathBuf>,
    #[builder(default)] architecture: ResNetConfig,
) -> ModelState {
    let path = path.into();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "model file not found, running without a model");
        return ModelState::Unavailable(format!("model file not found at {}", path.display()));
    }

    tracing::info!(path = %path.display(), "loading model");
    let size = architecture.input_size as u32;
    let full = match OnnxClassifier::load(&path, size) {
        Ok(classifier) => {
            tracing::info!(?classifier, "model loaded");
            return ModelState::Loaded(Arc::new(classifier));
        }
        Err(err) => {
            tracing::warn!("full model load failed, trying weights only: {err:#}");
            err
        }
    };

    match rebuild(&path, architecture) {
        Ok(network) => {
            tracing::info!(?network, "model rebuilt from weights");
            ModelState::Loaded(Arc::new(network))
        }
        Err(err) => {
            tracing::error!("model could not be loaded: {err:#}");
            ModelState::Unavailable(format!(
                "full model load failed ({full:#}); weights load failed ({err:#})"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use image::{Rgb, RgbImage};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::{
        network::tests::tiny_config, onnx::tests::write_mean_softmax, preprocess::Preprocessor,
    };

    #[test]
    fn loads_onnx_graph_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = dir.path().join("profile.onnx");
        write_mean_softmax(&model, 224)?;
        // a usable sibling must not win over a loadable graph
        ResNet::untrained()
            .config(tiny_config())
            .call()
            .save_weights(&dir.path().join("profile_weights.bin"))?;

        let state = load_model().path(&model).call();
        assert_eq!(state.status(), "loaded");
        let classifier = state.classifier().context("expected a loaded model")?;
        assert_eq!(classifier.backend(), "onnx");

        let tensor = Preprocessor::default().tensor(&RgbImage::from_pixel(64, 48, Rgb([10, 200, 30])));
        let probabilities = classifier.predict(&tensor)?;
        assert_eq!(probabilities.len(), 3);
        assert!((probabilities.sum() - 1.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn missing_file_is_unavailable() {
        let state = load_model().path("/definitely/not/here.onnx").call();
        assert!(!state.is_loaded());
        assert_eq!(state.status(), "not_loaded");
        let ModelState::Unavailable(reason) = state else {
            panic!("expected an unavailable model");
        };
        assert!(reason.contains("not found"), "{reason}");
    }

    #[test]
    fn falls_back_to_sibling_weights() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = dir.path().join("profile.onnx");
        std::fs::write(&model, b"not an onnx graph")?;
        ResNet::untrained()
            .config(tiny_config())
            .call()
            .save_weights(&dir.path().join("profile_weights.bin"))?;

        let state = load_model().path(&model).architecture(tiny_config()).call();
        assert_eq!(state.status(), "loaded");
        assert_eq!(state.classifier().map(|c| c.backend()), Some("native"));
        Ok(())
    }

    #[test]
    fn weights_at_model_path_are_used() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = dir.path().join("profile.bin");
        ResNet::untrained().config(tiny_config()).call().save_weights(&model)?;
        let state = load_model().path(&model).architecture(tiny_config()).call();
        assert!(state.is_loaded());
        Ok(())
    }

    #[test]
    fn garbage_without_weights_is_unavailable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = dir.path().join("profile.onnx");
        std::fs::write(&model, b"not an onnx graph")?;
        let state = load_model().path(&model).architecture(tiny_config()).call();
        let ModelState::Unavailable(reason) = state else {
            panic!("expected an unavailable model");
        };
        assert!(reason.contains("full model load failed"), "{reason}");
        assert!(reason.contains("weights load failed"), "{reason}");
        Ok(())
    }

    #[rstest]
    #[case("model.onnx", &["model.onnx"])]
    #[case("model.ONNX", &["model.ONNX"])]
    #[case("model.bin", &["model.bin"])]
    fn candidates_without_sibling(#[case] file: &str, #[case] expected: &[&str]) -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let candidates: Vec<_> = weights_candidates(&dir.path().join(file))
            .into_iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(candidates, expected);
        Ok(())
    }

    #[test]
    fn sibling_is_tried_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("model_weights.bin"), b"")?;
        let candidates = weights_candidates(&dir.path().join("model.onnx"));
        assert_eq!(
            candidates,
            vec![dir.path().join("model_weights.bin"), dir.path().join("model.onnx")]
        );
        Ok(())
    }
}
