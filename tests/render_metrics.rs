use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use dotserve::{
    application::render::{
        AdmissionPolicy, DotEngine, EngineConfig, EngineError, EngineInput, PipelineConfig,
        RenderCache, RenderPipeline, RenderRequest, Renderer, SemaphoreLimiter,
    },
    infra::telemetry,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

struct Echo;

#[async_trait]
impl Renderer for Echo {
    async fn render(&self, input: &EngineInput) -> Result<Bytes, EngineError> {
        Ok(Bytes::from(input.source.clone()))
    }

    async fn probe(&self, _deadline: Duration) -> Result<String, EngineError> {
        Ok("echo".to_string())
    }
}

#[tokio::test]
async fn render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Pipeline: success, cache hit, validation failure.
    let pipeline = RenderPipeline::new(
        PipelineConfig::default(),
        Arc::new(Echo),
        Arc::new(SemaphoreLimiter::new(1, AdmissionPolicy::Reject)),
    )
    .with_cache(RenderCache::new(4, 1024));
    let request = RenderRequest::new("digraph { a -> b }");
    pipeline.render(&request).await.expect("rendered");
    pipeline.render(&request).await.expect("cached");
    assert!(pipeline.render(&RenderRequest::new("")).await.is_err());

    // Engine: a spawn failure still counts.
    let scratch = tempfile::tempdir().expect("temp dir");
    let engine = DotEngine::new(EngineConfig {
        program: scratch.path().join("missing-dot"),
        scratch_dir: scratch.path().to_path_buf(),
        ..EngineConfig::default()
    })
    .expect("engine");
    assert!(engine.probe(Duration::from_secs(1)).await.is_err());

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "dotserve_render_total",
        "dotserve_render_ms",
        "dotserve_render_inflight",
        "dotserve_render_cache_hit_total",
        "dotserve_engine_spawn_total",
    ];
    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let render_results: HashSet<String> = snapshot
        .iter()
        .filter(|(key, _, _, _)| key.key().name() == "dotserve_render_total")
        .flat_map(|(key, _, _, _)| {
            key.key()
                .labels()
                .filter(|label| label.key() == "result")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(render_results.contains("ok"));
    assert!(render_results.contains("validation_error"));

    let cache_hits = snapshot
        .into_iter()
        .find(|(key, _, _, _)| key.key().name() == "dotserve_render_cache_hit_total")
        .map(|(_, _, _, value)| value);
    assert_eq!(cache_hits, Some(DebugValue::Counter(1)));
}
