use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use profilepic_types::prelude::*;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("No image data provided")]
    MissingImage,
    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error("Model not loaded")]
    ModelUnavailable,
    #[error("Error processing image: {0:#}")]
    Processing(anyhow::Error),
    #[error("{0}")]
    Internal(String),
}

impl ClassifyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingImage | Self::InvalidBody(_) | Self::Processing(_) => StatusCode::BAD_REQUEST,
            Self::ModelUnavailable | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub timestamp: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            classification: None,
            confidence: None,
            timestamp: timestamp(),
        }
    }
}

impl IntoResponse for ClassifyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }
        let mut body = ErrorBody::new(self.to_string());
        if let Self::ModelUnavailable = self {
            // clients fall back to this default instead of failing the upload
            body.classification = Some(Label::Human);
            body.confidence = Some(0.0);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ClassifyError::MissingImage, StatusCode::BAD_REQUEST)]
    #[case(ClassifyError::Processing(anyhow::anyhow!("bad bytes")), StatusCode::BAD_REQUEST)]
    #[case(ClassifyError::ModelUnavailable, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(ClassifyError::Internal("task panicked".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_status(#[case] error: ClassifyError, #[case] status: StatusCode) {
        assert_eq!(error.status(), status);
        assert_eq!(error.into_response().status(), status);
    }

    #[test]
    fn processing_message_keeps_cause_chain() {
        let error = ClassifyError::Processing(anyhow::anyhow!("invalid byte").context("bad base64"));
        assert_eq!(error.to_string(), "Error processing image: bad base64: invalid byte");
    }
}
