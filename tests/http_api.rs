use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE, RETRY_AFTER},
    },
    response::Response,
};
use bytes::Bytes;
use dotserve::{
    application::render::{
        AdmissionPolicy, ConcurrencyLimiter, EngineError, EngineInput, PipelineConfig,
        RenderPipeline, Renderer, SemaphoreLimiter,
    },
    domain::budget::RenderBudget,
    infra::http::{HttpState, REQUEST_ID_HEADER, build_router},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const MAX_REQUEST_BYTES: usize = 64 * 1024;
const MAX_SOURCE_BYTES: usize = 16 * 1024;

#[derive(Clone, Copy)]
enum Mode {
    Echo,
    TimedOut,
    Crash,
}

struct FakeEngine(Mode);

#[async_trait]
impl Renderer for FakeEngine {
    async fn render(&self, input: &EngineInput) -> Result<Bytes, EngineError> {
        match self.0 {
            Mode::Echo => Ok(Bytes::from(format!(
                "{}|{}|{}",
                input.format,
                input.layout.map(|layout| layout.to_string()).unwrap_or_default(),
                input.source
            ))),
            Mode::TimedOut => Err(EngineError::TimedOut {
                after: input.deadline,
            }),
            Mode::Crash => Err(EngineError::Exit {
                code: 1,
                stderr: "Error: <stdin>: syntax error in line 1".to_string(),
            }),
        }
    }

    async fn probe(&self, _deadline: Duration) -> Result<String, EngineError> {
        match self.0 {
            Mode::Crash => Err(EngineError::Exit {
                code: 127,
                stderr: "dot: not found".to_string(),
            }),
            _ => Ok("dot - graphviz version 9.0.0".to_string()),
        }
    }
}

fn app_with(mode: Mode) -> (Router, Arc<RenderPipeline>) {
    let config = PipelineConfig {
        budget: RenderBudget {
            max_source_bytes: MAX_SOURCE_BYTES,
            max_nodes: 200,
            max_edges: 200,
        },
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(RenderPipeline::new(
        config,
        Arc::new(FakeEngine(mode)),
        Arc::new(SemaphoreLimiter::new(1, AdmissionPolicy::Reject)),
    ));
    let router = build_router(HttpState::new(pipeline.clone()), MAX_REQUEST_BYTES);
    (router, pipeline)
}

fn app() -> Router {
    app_with(Mode::Echo).0
}

fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, content_type)
        .body(body.into())
        .expect("request should build")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

async fn send(router: Router, request: Request<Body>) -> Response {
    router.oneshot(request).await.expect("router should respond")
}

async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
}

async fn error_body(response: Response) -> Value {
    assert_eq!(
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("application/json")
    );
    serde_json::from_slice(&body_bytes(response).await).expect("json error body")
}

fn content_type(response: &Response) -> &str {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn raw_dot_body_with_query_selectors() {
    let response = send(
        app(),
        post(
            "/render?format=svg&layout=neato",
            "text/vnd.graphviz",
            "digraph { a -> b }",
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/svg+xml");
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(&body_bytes(response).await[..], b"svg|neato|digraph { a -> b }");
}

#[tokio::test]
async fn json_body_uses_configured_default_format() {
    let response = send(
        app(),
        post(
            "/render",
            "application/json",
            json!({ "source": "digraph { a -> b }" }).to_string(),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/png");
}

#[tokio::test]
async fn form_body_is_accepted() {
    let response = send(
        app(),
        post(
            "/render",
            "application/x-www-form-urlencoded",
            "source=digraph+%7B+a+-%3E+b+%7D&format=pdf",
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "application/pdf");
    assert_eq!(&body_bytes(response).await[..], b"pdf||digraph { a -> b }");
}

#[tokio::test]
async fn blank_form_selectors_fall_back_to_query() {
    let response = send(
        app(),
        post(
            "/render?format=svg",
            "application/x-www-form-urlencoded",
            "source=digraph+%7B+a+%7D&format=&layout=",
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/svg+xml");
    assert_eq!(&body_bytes(response).await[..], b"svg||digraph { a }");
}

#[tokio::test]
async fn multipart_body_is_accepted() {
    let boundary = "dotserve-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"format\"\r\n\r\n\
         svg\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"source\"; filename=\"graph.dot\"\r\n\
         Content-Type: text/vnd.graphviz\r\n\r\n\
         graph {{ a -- b }}\r\n\
         --{boundary}--\r\n"
    );
    let response = send(
        app(),
        post(
            "/render",
            &format!("multipart/form-data; boundary={boundary}"),
            body,
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/svg+xml");
    assert_eq!(&body_bytes(response).await[..], b"svg||graph { a -- b }");
}

#[tokio::test]
async fn empty_source_is_a_bad_request() {
    let response = send(app(), post("/render", "text/plain", "")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn unsupported_format_is_a_bad_request() {
    let response = send(
        app(),
        post("/render?format=bmp", "text/plain", "digraph { a }"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("bmp")
    );
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let response = send(app(), post("/render", "application/json", "{\"source\":")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await["error"]["code"], "validation_error");
}

#[tokio::test]
async fn source_over_budget_is_payload_too_large() {
    let source = format!(
        "digraph {{ a -> b }} /* {} */",
        "x".repeat(MAX_SOURCE_BYTES)
    );
    let response = send(app(), post("/render", "text/plain", source)).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_body(response).await["error"]["code"], "validation_error");
}

#[tokio::test]
async fn body_over_request_limit_is_payload_too_large() {
    let source = "x".repeat(MAX_REQUEST_BYTES + 1);
    let response = send(app(), post("/render", "text/plain", source)).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_body(response).await["error"]["code"], "validation_error");
}

#[tokio::test]
async fn saturated_limiter_returns_retry_after() {
    let (router, pipeline) = app_with(Mode::Echo);
    let _held = pipeline.limiter().acquire().await.expect("hold the slot");

    let response = send(router, post("/render", "text/plain", "digraph { a }")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(RETRY_AFTER));
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "resource_exhausted");
    assert!(body["error"]["hint"].is_string());
}

#[tokio::test]
async fn engine_timeout_maps_to_gateway_timeout() {
    let (router, _) = app_with(Mode::TimedOut);
    let response = send(router, post("/render", "text/plain", "digraph { a }")).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_body(response).await["error"]["code"], "timeout");
}

#[tokio::test]
async fn engine_failure_maps_to_bad_gateway_with_stderr() {
    let (router, _) = app_with(Mode::Crash);
    let response = send(router, post("/render", "text/plain", "digraph {")).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "engine_error");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("syntax error")
    );
}

#[tokio::test]
async fn generate_diagram_renders_the_example_payload() {
    let example = send(app(), get("/example-diagram-data")).await;
    assert_eq!(example.status(), StatusCode::OK);
    let data: Value = serde_json::from_slice(&body_bytes(example).await).expect("json");
    assert!(data["nodes"].as_array().is_some_and(|nodes| !nodes.is_empty()));

    for uri in ["/generate-diagram", "/generate-diagram/"] {
        let response = send(app(), post(uri, "application/json", data.to_string())).await;

        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(content_type(&response), "image/png");
        assert_eq!(
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|value| value.to_str().ok()),
            Some("inline; filename=\"diagram.png\"")
        );
        let rendered = body_bytes(response).await;
        assert!(String::from_utf8_lossy(&rendered).contains("digraph"));
    }
}

#[tokio::test]
async fn generate_diagram_honours_format_query() {
    let payload = json!({
        "nodes": [
            { "id": "web", "name": "Web", "type": "server" },
            { "id": "db", "name": "DB", "type": "database" }
        ],
        "connections": [
            { "source_id": "web", "target_id": "db", "type": "network" }
        ]
    });
    let response = send(
        app(),
        post(
            "/generate-diagram?format=svg",
            "application/json",
            payload.to_string(),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/svg+xml");
}

#[tokio::test]
async fn generate_diagram_rejects_invalid_payloads() {
    let response = send(
        app(),
        post("/generate-diagram", "application/json", "{\"nodes\": 3}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await["error"]["code"], "validation_error");

    let empty_id = json!({ "nodes": [{ "id": "", "name": "x", "type": "server" }] });
    let response = send(
        app(),
        post("/generate-diagram", "application/json", empty_id.to_string()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoints() {
    let response = send(app(), get("/_health")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(app(), get("/_health/engine")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("x-engine-version")
            .and_then(|value| value.to_str().ok()),
        Some("dot - graphviz version 9.0.0")
    );

    let (router, _) = app_with(Mode::Crash);
    let response = send(router, get("/_health/engine")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_body(response).await["error"]["code"], "engine_error");
}

#[tokio::test]
async fn unknown_routes_return_json_not_found() {
    let response = send(app(), get("/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await["error"]["code"], "not_found");
}
