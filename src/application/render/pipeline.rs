//! Validation, admission and supervision around a [`Renderer`].

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration, time::Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::domain::{
    budget::RenderBudget,
    error::ValidationError,
    format::{Layout, OutputFormat},
};

use super::{
    cache::RenderCache,
    limiter::ConcurrencyLimiter,
    types::{
        EngineError, EngineInput, RenderError, RenderOutput, RenderRequest, RenderResult, Renderer,
    },
};

pub(crate) const METRIC_RENDER_TOTAL: &str = "dotserve_render_total";
pub(crate) const METRIC_RENDER_MS: &str = "dotserve_render_ms";
pub(crate) const METRIC_RENDER_CACHE_HIT: &str = "dotserve_render_cache_hit_total";

const BACKSTOP_MARGIN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub budget: RenderBudget,
    /// Formats callers may request.
    pub formats: Vec<OutputFormat>,
    pub default_format: OutputFormat,
    /// Layouts callers may request. Requests without a layout use the engine default.
    pub layouts: Vec<Layout>,
    pub timeout: Duration,
    pub kill_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget: RenderBudget {
                max_source_bytes: 256 * 1024,
                max_nodes: 5_000,
                max_edges: 20_000,
            },
            formats: OutputFormat::ALL
                .into_iter()
                .filter(|format| *format != OutputFormat::Ps)
                .collect(),
            default_format: OutputFormat::Png,
            layouts: Layout::ALL.to_vec(),
            timeout: Duration::from_secs(10),
            kill_grace: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    /// Upper bound on how long the pipeline waits for a renderer, including
    /// the time a well-behaved renderer needs to terminate its engine.
    pub fn backstop(&self) -> Duration {
        self.timeout + self.kill_grace * 2 + BACKSTOP_MARGIN
    }
}

pub struct RenderPipeline {
    config: PipelineConfig,
    renderer: Arc<dyn Renderer>,
    limiter: Arc<dyn ConcurrencyLimiter>,
    cache: Option<RenderCache>,
}

impl RenderPipeline {
    pub fn new(
        config: PipelineConfig,
        renderer: Arc<dyn Renderer>,
        limiter: Arc<dyn ConcurrencyLimiter>,
    ) -> Self {
        Self {
            config,
            renderer,
            limiter,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<RenderCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn limiter(&self) -> &dyn ConcurrencyLimiter {
        self.limiter.as_ref()
    }

    /// Check a request against the configured limits without running anything.
    pub fn validate(&self, request: &RenderRequest) -> Result<EngineInput, ValidationError> {
        let budget = match request.budget {
            Some(requested) => self.config.budget.tighten(requested),
            None => self.config.budget,
        };
        budget.check(&request.source)?;

        let format = match selector(request.format.as_deref()) {
            None => self.config.default_format,
            Some(value) => {
                let format: OutputFormat = value.parse()?;
                if !self.config.formats.contains(&format) {
                    return Err(ValidationError::UnsupportedFormat(value.to_string()));
                }
                format
            }
        };

        let layout = match selector(request.layout.as_deref()) {
            None => None,
            Some(value) => {
                let layout: Layout = value.parse()?;
                if !self.config.layouts.contains(&layout) {
                    return Err(ValidationError::UnsupportedLayout(value.to_string()));
                }
                Some(layout)
            }
        };

        Ok(EngineInput {
            source: request.source.clone(),
            format,
            layout,
            deadline: self.config.timeout,
        })
    }

    pub async fn render(&self, request: &RenderRequest) -> RenderResult {
        let started_at = Instant::now();
        let outcome = self.execute(request).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        let result_label = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        counter!(METRIC_RENDER_TOTAL, "result" => result_label).increment(1);
        histogram!(METRIC_RENDER_MS).record(elapsed_ms as f64);

        match &outcome {
            Ok((output, cached)) => info!(
                target = "application::render::pipeline",
                op = "pipeline::render",
                result = "ok",
                format = %output.format,
                cached = *cached,
                elapsed_ms,
                source_bytes = request.source.len(),
                output_bytes = output.bytes.len(),
                "Graph rendered"
            ),
            Err(err) => warn!(
                target = "application::render::pipeline",
                op = "pipeline::render",
                result = "error",
                error_kind = err.kind().as_str(),
                elapsed_ms,
                source_bytes = request.source.len(),
                error = %err,
                "Graph render failed"
            ),
        }

        outcome.map(|(output, _)| output)
    }

    /// Run the engine's version check under the same limits as a render.
    pub async fn probe(&self) -> Result<String, RenderError> {
        let _permit = self.limiter.acquire().await?;
        let probed = tokio::time::timeout(
            self.config.backstop(),
            AssertUnwindSafe(self.renderer.probe(self.config.timeout)).catch_unwind(),
        )
        .await;

        match probed {
            Err(_) => Err(RenderError::Timeout {
                limit: self.config.timeout,
            }),
            Ok(Err(panic)) => Err(EngineError::Panicked(panic_message(panic.as_ref())).into()),
            Ok(Ok(result)) => result.map_err(|err| self.classify(err)),
        }
    }

    async fn execute(&self, request: &RenderRequest) -> Result<(RenderOutput, bool), RenderError> {
        let input = self.validate(request)?;

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| RenderCache::key(input.format, input.layout, &input.source));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(bytes) = cache.get(key) {
                counter!(METRIC_RENDER_CACHE_HIT).increment(1);
                return Ok((
                    RenderOutput {
                        bytes,
                        format: input.format,
                    },
                    true,
                ));
            }
        }

        let permit = self.limiter.acquire().await?;
        let rendered = tokio::time::timeout(
            self.config.backstop(),
            AssertUnwindSafe(self.renderer.render(&input)).catch_unwind(),
        )
        .await;
        drop(permit);

        let bytes = match rendered {
            Err(_) => {
                return Err(RenderError::Timeout {
                    limit: input.deadline,
                });
            }
            Ok(Err(panic)) => {
                return Err(EngineError::Panicked(panic_message(panic.as_ref())).into());
            }
            Ok(Ok(Err(err))) => return Err(self.classify(err)),
            Ok(Ok(Ok(bytes))) => bytes,
        };
        if bytes.is_empty() {
            return Err(EngineError::EmptyOutput.into());
        }

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, bytes.clone());
        }

        Ok((
            RenderOutput {
                bytes,
                format: input.format,
            },
            false,
        ))
    }

    fn classify(&self, err: EngineError) -> RenderError {
        match err {
            EngineError::TimedOut { .. } => RenderError::Timeout {
                limit: self.config.timeout,
            },
            other => RenderError::Engine(other),
        }
    }
}

fn selector(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
