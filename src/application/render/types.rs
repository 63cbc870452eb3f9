use std::{io, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::{
    budget::RenderBudget,
    error::ValidationError,
    format::{Layout, OutputFormat},
};

use super::limiter::LimiterError;

/// Caller-supplied render parameters, prior to validation.
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub source: String,
    /// Format name (`svg`) or media type (`image/svg+xml`); the configured default when absent.
    pub format: Option<String>,
    pub layout: Option<String>,
    /// Optional per-request budget; it can only tighten the configured one.
    pub budget: Option<RenderBudget>,
}

impl RenderRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_budget(mut self, budget: RenderBudget) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Validated work item handed to a [`Renderer`].
#[derive(Debug, Clone)]
pub struct EngineInput {
    pub source: String,
    pub format: OutputFormat,
    pub layout: Option<Layout>,
    pub deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub bytes: Bytes,
    pub format: OutputFormat,
}

impl RenderOutput {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

pub type RenderResult = Result<RenderOutput, RenderError>;

/// Stable classification of render failures, shared with HTTP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderErrorKind {
    Validation,
    Timeout,
    Engine,
    ResourceExhausted,
}

impl RenderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderErrorKind::Validation => "validation_error",
            RenderErrorKind::Timeout => "timeout",
            RenderErrorKind::Engine => "engine_error",
            RenderErrorKind::ResourceExhausted => "resource_exhausted",
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("layout engine did not finish within {}ms", .limit.as_millis())]
    Timeout { limit: Duration },
    #[error("layout engine failed: {0}")]
    Engine(#[from] EngineError),
    #[error("render capacity exhausted: {0}")]
    ResourceExhausted(#[from] LimiterError),
}

impl RenderError {
    pub fn kind(&self) -> RenderErrorKind {
        match self {
            RenderError::Validation(_) => RenderErrorKind::Validation,
            RenderError::Timeout { .. } => RenderErrorKind::Timeout,
            RenderError::Engine(_) => RenderErrorKind::Engine,
            RenderError::ResourceExhausted(_) => RenderErrorKind::ResourceExhausted,
        }
    }

    /// Human-readable detail without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            RenderError::Validation(err) => err.to_string(),
            RenderError::Timeout { limit } => {
                format!("rendering exceeded the {}ms deadline", limit.as_millis())
            }
            RenderError::Engine(err) => err.to_string(),
            RenderError::ResourceExhausted(err) => err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("layout engine `{program}` is not installed: {error}")]
    NotFound { program: String, error: io::Error },
    #[error("failed to start layout engine: {0}")]
    Spawn(io::Error),
    #[error("failed to prepare job workspace: {0}")]
    Workspace(io::Error),
    #[error("engine i/o failed: {0}")]
    Io(io::Error),
    #[error("engine exited with status {code}: {stderr}")]
    Exit { code: i32, stderr: String },
    #[error("engine was killed by signal {signal}: {stderr}")]
    Signaled { signal: i32, stderr: String },
    #[error("engine output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
    #[error("engine exited successfully without producing output")]
    EmptyOutput,
    #[error("engine exceeded its {}ms deadline", .after.as_millis())]
    TimedOut { after: Duration },
    #[error("renderer panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// Short machine-friendly label used in logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Spawn(_) => "spawn",
            EngineError::Workspace(_) => "workspace",
            EngineError::Io(_) => "io",
            EngineError::Exit { .. } => "exit_status",
            EngineError::Signaled { .. } => "signaled",
            EngineError::OutputTooLarge { .. } => "output_too_large",
            EngineError::EmptyOutput => "empty_output",
            EngineError::TimedOut { .. } => "timed_out",
            EngineError::Panicked(_) => "panicked",
        }
    }
}

/// Capability that turns a validated graph into rendered bytes.
///
/// The production implementation drives the Graphviz binary; tests substitute
/// fakes that count invocations or misbehave on purpose.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, input: &EngineInput) -> Result<Bytes, EngineError>;

    /// Report the engine version, failing when the engine cannot run.
    async fn probe(&self, deadline: Duration) -> Result<String, EngineError>;
}
