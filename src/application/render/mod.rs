//! The render pipeline.
//!
//! A request is validated against the configured budget, admitted through the
//! concurrency limiter, and handed to a [`Renderer`]. The production renderer
//! ([`DotEngine`]) runs Graphviz as an isolated child process; every outcome,
//! including engine crashes, timeouts and renderer panics, comes back as a
//! [`RenderResult`].

mod cache;
mod capture;
mod engine;
mod limiter;
mod pipeline;
mod types;

pub use cache::RenderCache;
pub use engine::{DotEngine, EngineConfig};
pub use limiter::{
    AdmissionPolicy, ConcurrencyLimiter, LimiterError, RenderPermit, SemaphoreLimiter,
};
pub use pipeline::{PipelineConfig, RenderPipeline};
pub use types::{
    EngineError, EngineInput, RenderError, RenderErrorKind, RenderOutput, RenderRequest,
    RenderResult, Renderer,
};

pub(crate) use engine::METRIC_ENGINE_SPAWN_TOTAL;
pub(crate) use limiter::METRIC_RENDER_INFLIGHT;
pub(crate) use pipeline::{METRIC_RENDER_CACHE_HIT, METRIC_RENDER_MS, METRIC_RENDER_TOTAL};
