use axum::{body::Bytes, extract::State, Json};
use profilepic_types::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::ClassifyError, state::SharedState};

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    #[serde(flatten)]
    pub classification: Classification,
    pub timestamp: String,
}

/// Classify a base64 (optionally data-URL) encoded image.
///
/// Decoding and the forward pass run on the blocking pool.
#[axum::debug_handler]
pub async fn classify(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<ClassifyResponse>, ClassifyError> {
    let request: ClassifyRequest = serde_json::from_slice(&body)?;
    let image = request.image.ok_or(ClassifyError::MissingImage)?;
    let model = state
        .model
        .classifier()
        .cloned()
        .ok_or(ClassifyError::ModelUnavailable)?;
    let preprocessor = state.preprocessor;
    tracing::debug!(bytes = image.len(), "classifying image");

    let classification = tokio::task::spawn_blocking(move || -> anyhow::Result<Classification> {
        let tensor = preprocessor.run(&image)?;
        profilepic_core::classifier::classify(model.as_ref(), &tensor)
    })
    .await
    .map_err(|err| ClassifyError::Internal(format!("classification task failed: {err}")))?
    .map_err(ClassifyError::Processing)?;

    tracing::info!(
        classification = %classification.classification,
        confidence = classification.confidence,
        "classified image"
    );
    Ok(Json(ClassifyResponse {
        classification,
        timestamp: timestamp(),
    }))
}
