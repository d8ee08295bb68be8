use std::sync::Arc;

use bon::bon;
use profilepic_core::{loader::ModelState, preprocess::Preprocessor};
use profilepic_types::prelude::*;

/// Everything a request needs, built once at startup and never mutated.
#[derive(Debug)]
pub struct AppState {
    pub model: ModelState,
    pub preprocessor: Preprocessor,
}

pub type SharedState = Arc<AppState>;

#[bon]
impl AppState {
    #[builder]
    pub fn new(model: ModelState, #[builder(default)] normalization: Normalization) -> Self {
        let preprocessor = Preprocessor::builder()
            .normalization(normalization)
            .maybe_size(model.classifier().map(|classifier| classifier.input_size()))
            .build();
        Self { model, preprocessor }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use profilepic_core::{
        network::{ResNet, ResNetConfig, Stage},
        INPUT_SIZE,
    };
    use rstest::rstest;

    use super::*;

    fn tiny_network() -> ResNet {
        let config = ResNetConfig {
            input_size: 32,
            input_channels: 3,
            stem_width: 4,
            stages: vec![Stage { blocks: 1, width: 2 }],
            expansion: 4,
            head_units: 8,
            classes: 3,
        };
        ResNet::untrained().config(config).call()
    }

    #[rstest]
    fn preprocessor_follows_classifier_input() {
        let state = AppState::builder()
            .model(ModelState::Loaded(Arc::new(tiny_network())))
            .normalization(Normalization::Raw)
            .build();
        assert_eq!(state.preprocessor.size(), 32);
        assert_eq!(state.preprocessor.normalization(), Normalization::Raw);
    }

    #[rstest]
    fn unavailable_model_keeps_defaults() {
        let state = AppState::builder()
            .model(ModelState::Unavailable("missing".into()))
            .build();
        assert_eq!(state.preprocessor.size(), INPUT_SIZE);
        assert_eq!(state.preprocessor.normalization(), Normalization::Caffe);
    }
}
