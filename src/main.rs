use std::{future::IntoFuture, path::Path, process, sync::Arc};

use dotserve::{
    application::{
        error::AppError,
        render::{
            DotEngine, EngineConfig, PipelineConfig, RenderCache, RenderError, RenderPipeline,
            RenderRequest, SemaphoreLimiter,
        },
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    signal,
    sync::watch,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) =
        config::load_with_cli().map_err(|err| InfraError::configuration(err.to_string()))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, *args).await,
    }
}

fn build_pipeline(settings: &config::Settings) -> Result<RenderPipeline, AppError> {
    let render = &settings.render;
    let engine = DotEngine::new(EngineConfig::from(render)).map_err(RenderError::from)?;
    let limiter = SemaphoreLimiter::new(render.concurrency.get() as usize, render.admission);
    let cache = RenderCache::new(render.cache_entries, render.cache_max_entry_bytes);

    info!(
        target = "dotserve::startup",
        engine = %render.engine_path.display(),
        concurrency = render.concurrency.get(),
        timeout_ms = render.timeout.as_millis() as u64,
        cache_entries = render.cache_entries,
        "render pipeline configured"
    );

    Ok(
        RenderPipeline::new(PipelineConfig::from(render), Arc::new(engine), Arc::new(limiter))
            .with_cache(cache),
    )
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pipeline = Arc::new(build_pipeline(&settings)?);
    let router = http::build_router(
        HttpState::new(pipeline),
        settings.server.max_request_bytes.get(),
    );

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "dotserve::startup",
        addr = %settings.server.addr,
        "listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let mut graceful_rx = stop_rx.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = graceful_rx.wait_for(|stop| *stop).await;
            info!(target = "dotserve::shutdown", "shutdown requested, draining");
        })
        .into_future();

    let drain = settings.server.graceful_shutdown;
    let mut deadline_rx = stop_rx;
    let deadline = async move {
        if deadline_rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(drain).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                target = "dotserve::shutdown",
                drain_secs = drain.as_secs(),
                "in-flight requests did not finish before the shutdown deadline"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(target = "dotserve::shutdown", error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "dotserve::shutdown", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let pipeline = build_pipeline(&settings)?;
    let source = read_source(&args.input).await?;

    let request = RenderRequest {
        source,
        format: args.format,
        layout: args.layout,
        budget: None,
    };
    let output = pipeline.render(&request).await?;

    info!(
        target = "dotserve::render",
        format = %output.format,
        bytes = output.bytes.len(),
        "graph rendered"
    );

    match args.output {
        Some(path) => tokio::fs::write(&path, &output.bytes)
            .await
            .map_err(InfraError::from)?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(&output.bytes)
                .await
                .map_err(InfraError::from)?;
            stdout.flush().await.map_err(InfraError::from)?;
        }
    }

    Ok(())
}

async fn read_source(input: &Path) -> Result<String, AppError> {
    if input == Path::new("-") {
        let mut source = String::new();
        tokio::io::stdin()
            .read_to_string(&mut source)
            .await
            .map_err(InfraError::from)?;
        return Ok(source);
    }

    tokio::fs::read_to_string(input)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))
}
