//! Content-type driven extraction of render requests.

use axum::{
    Form, Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Query, Request},
    http::{StatusCode, header::CONTENT_TYPE},
};

use crate::application::render::RenderRequest;

use super::{
    error::ApiError,
    models::{RenderBody, RenderQuery},
};

/// A render request read from JSON, a form, a multipart upload or a raw DOT body.
///
/// Query parameters `format` and `layout` apply to every body type and fill in
/// whatever the body itself does not specify.
#[derive(Debug)]
pub struct RenderPayload(pub RenderRequest);

impl<S> FromRequest<S> for RenderPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<RenderQuery>::try_from_uri(req.uri())
            .map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;

        let request = match media_type(&req).as_str() {
            "application/json" => {
                let Json(body) = Json::<RenderBody>::from_request(req, state)
                    .await
                    .map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;
                RenderRequest::from(body)
            }
            "application/x-www-form-urlencoded" => {
                let Form(body) = Form::<RenderBody>::from_request(req, state)
                    .await
                    .map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;
                RenderRequest::from(body)
            }
            "multipart/form-data" => {
                let multipart = Multipart::from_request(req, state)
                    .await
                    .map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;
                read_multipart(multipart).await?
            }
            _ => {
                let bytes = Bytes::from_request(req, state)
                    .await
                    .map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;
                let source = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    ApiError::malformed(
                        StatusCode::BAD_REQUEST,
                        "graph source is not valid UTF-8",
                    )
                })?;
                RenderRequest::new(source)
            }
        };

        Ok(RenderPayload(query.apply(request)))
    }
}

fn media_type(req: &Request) -> String {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

async fn read_multipart(mut multipart: Multipart) -> Result<RenderRequest, ApiError> {
    let mut source = None;
    let mut format = None;
    let mut layout = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::malformed(err.status(), err.body_text()))?
    {
        let name = field.name().map(str::to_string);
        let text = field
            .text()
            .await
            .map_err(|err| ApiError::malformed(err.status(), err.body_text()))?;
        match name.as_deref() {
            Some("source" | "file" | "dot") => source = Some(text),
            Some("format") => format = Some(text),
            Some("layout") => layout = Some(text),
            _ => {}
        }
    }

    let source = source.ok_or_else(|| {
        ApiError::malformed(
            StatusCode::BAD_REQUEST,
            "multipart body has no `source` field",
        )
    })?;

    Ok(RenderRequest {
        source,
        format: format.filter(|value| !value.trim().is_empty()),
        layout: layout.filter(|value| !value.trim().is_empty()),
        budget: None,
    })
}
