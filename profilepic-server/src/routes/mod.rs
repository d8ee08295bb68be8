use std::any::Any;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{error::ErrorBody, state::SharedState};

pub mod classify;
pub mod system;

pub fn router(state: SharedState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(system::banner))
        .route("/health", get(system::health))
        .route("/tensorflow-version", get(system::version))
        .route("/ping", get(system::ping))
        .route("/classify", post(classify::classify))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!("handler panicked: {message}");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody::new(message))).into_response()
}
