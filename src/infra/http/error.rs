use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    application::{
        error::ErrorReport,
        render::{RenderError, RenderErrorKind},
    },
    domain::error::ValidationError,
};

const SOURCE: &str = "infra::http::error";
const RETRY_AFTER_SECS: u64 = 1;

pub mod codes {
    pub const VALIDATION: &str = "validation_error";
    pub const TIMEOUT: &str = "timeout";
    pub const ENGINE: &str = "engine_error";
    pub const RESOURCE_EXHAUSTED: &str = "resource_exhausted";
    pub const NOT_FOUND: &str = "not_found";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
    retry_after: Option<u64>,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        let message = message.into();
        let report = ErrorReport::from_message(SOURCE, status, format!("{code}: {message}"));
        Self {
            status,
            code,
            message,
            hint,
            retry_after: None,
            report,
        }
    }

    /// A request body that could not be read or decoded.
    pub fn malformed(status: StatusCode, detail: impl Into<String>) -> Self {
        let status = if status == StatusCode::PAYLOAD_TOO_LARGE {
            status
        } else {
            StatusCode::BAD_REQUEST
        };
        Self::new(
            status,
            codes::VALIDATION,
            ValidationError::malformed(detail).to_string(),
            None,
        )
    }

    pub fn not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "no such endpoint",
            None,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self.report.status = status;
        self
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        let (status, code, hint) = match err.kind() {
            RenderErrorKind::Validation => {
                let status = match &err {
                    RenderError::Validation(inner) if inner.is_oversized() => {
                        StatusCode::PAYLOAD_TOO_LARGE
                    }
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, codes::VALIDATION, None)
            }
            RenderErrorKind::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                codes::TIMEOUT,
                Some("Simplify the graph or pick a cheaper layout".to_string()),
            ),
            RenderErrorKind::Engine => (StatusCode::BAD_GATEWAY, codes::ENGINE, None),
            RenderErrorKind::ResourceExhausted => (
                StatusCode::SERVICE_UNAVAILABLE,
                codes::RESOURCE_EXHAUSTED,
                Some(format!("Retry after {RETRY_AFTER_SECS} seconds")),
            ),
        };

        let retry_after = (code == codes::RESOURCE_EXHAUSTED).then_some(RETRY_AFTER_SECS);
        let report = ErrorReport::from_error(SOURCE, status, &err);
        Self {
            status,
            code,
            message: err.detail(),
            hint,
            retry_after,
            report,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        RenderError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        // Picked up by the response logging middleware.
        self.report.attach(&mut response);
        response
    }
}
