mod error;
mod extract;
mod handlers;
mod middleware;
mod models;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::render::RenderPipeline;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use extract::RenderPayload;
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use models::{RenderBody, RenderQuery};

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: Arc<RenderPipeline>,
}

impl HttpState {
    pub fn new(pipeline: Arc<RenderPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Build the service router. Request bodies larger than `max_request_bytes`
/// are refused with `413` before any handler runs.
pub fn build_router(state: HttpState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/render", post(handlers::render))
        .route("/generate-diagram", post(handlers::generate_diagram))
        .route("/generate-diagram/", post(handlers::generate_diagram))
        .route("/example-diagram-data", get(handlers::example_diagram_data))
        .route("/_health", get(handlers::health))
        .route("/_health/engine", get(handlers::engine_health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
