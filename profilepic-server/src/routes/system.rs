use axum::{extract::State, Json};
use profilepic_core::{weights::FORMAT_VERSION, VERSION};
use profilepic_types::prelude::*;
use serde::Serialize;

use crate::state::SharedState;

pub async fn banner(State(state): State<SharedState>) -> String {
    match state.model.classifier() {
        Some(classifier) => format!("profilepic is running! {classifier:?}"),
        None => format!("profilepic is running without a model! {:?}", state.model),
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub message: &'static str,
    pub tensorflow_version: &'static str,
    pub model_status: &'static str,
    pub timestamp: String,
}

/// Always healthy while the process serves requests; the model state is reported separately.
pub async fn health(State(state): State<SharedState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        message: "Backend API is running",
        tensorflow_version: VERSION,
        model_status: state.model.status(),
        timestamp: timestamp(),
    })
}

#[derive(Debug, Serialize)]
pub struct Versions {
    pub tensorflow_version: &'static str,
    pub keras_version: String,
    pub timestamp: String,
}

pub async fn version() -> Json<Versions> {
    Json(Versions {
        tensorflow_version: VERSION,
        keras_version: FORMAT_VERSION.to_string(),
        timestamp: timestamp(),
    })
}

#[derive(Debug, Serialize)]
pub struct Pong {
    pub response: &'static str,
    pub tensorflow_version: &'static str,
    pub timestamp: String,
}

pub async fn ping() -> Json<Pong> {
    Json(Pong {
        response: "pong",
        tensorflow_version: VERSION,
        timestamp: timestamp(),
    })
}
