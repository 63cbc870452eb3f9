use axum::{
    Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    application::{
        diagram,
        render::{RenderOutput, RenderRequest},
    },
    domain::diagram::DiagramData,
};

use super::{
    HttpState,
    error::ApiError,
    extract::RenderPayload,
    models::RenderQuery,
};

const ENGINE_VERSION_HEADER: HeaderName = HeaderName::from_static("x-engine-version");

pub async fn render(
    State(state): State<HttpState>,
    RenderPayload(request): RenderPayload,
) -> Result<Response, ApiError> {
    let output = state.pipeline.render(&request).await?;
    Ok(rendered(output, None))
}

pub async fn generate_diagram(
    State(state): State<HttpState>,
    query: Result<Query<RenderQuery>, QueryRejection>,
    payload: Result<Json<DiagramData>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;
    let Json(data) = payload.map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;

    let source = diagram::to_dot(&data)?;
    debug!(
        target = "infra::http::handlers",
        nodes = data.nodes.len(),
        connections = data.connections.len(),
        source_bytes = source.len(),
        "diagram converted to dot"
    );

    let request = query.apply(RenderRequest::new(source));
    let output = state.pipeline.render(&request).await?;
    let filename = format!("diagram.{}", output.format.as_str());
    Ok(rendered(output, Some(&filename)))
}

pub async fn example_diagram_data() -> Json<DiagramData> {
    Json(DiagramData::example())
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn engine_health(State(state): State<HttpState>) -> Result<Response, ApiError> {
    let version = state
        .pipeline
        .probe()
        .await
        .map_err(|err| ApiError::from(err).with_status(StatusCode::SERVICE_UNAVAILABLE))?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(value) = HeaderValue::from_str(&version) {
        response.headers_mut().insert(ENGINE_VERSION_HEADER, value);
    }
    Ok(response)
}

pub async fn not_found() -> ApiError {
    ApiError::not_found()
}

fn rendered(output: RenderOutput, filename: Option<&str>) -> Response {
    let mut response = ([(CONTENT_TYPE, output.content_type())], output.bytes).into_response();
    if let Some(filename) = filename {
        if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{filename}\"")) {
            response.headers_mut().insert(CONTENT_DISPOSITION, value);
        }
    }
    response
}
