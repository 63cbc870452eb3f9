use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the dotserve binary.
#[derive(Debug, Parser)]
#[command(name = "dotserve", version, about = "Graphviz rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DOTSERVE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Render one graph through the same pipeline and limits the service uses.
    Render(Box<RenderArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Graph source file, or `-` for stdin.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Output format name or media type; defaults to `render.default_format`.
    #[arg(long, short = 'T', value_name = "FORMAT")]
    pub format: Option<String>,

    /// Layout algorithm (dot, neato, fdp, ...).
    #[arg(long, short = 'K', value_name = "LAYOUT")]
    pub layout: Option<String>,

    /// Write the rendered bytes here instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub render: RenderOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the layout engine executable.
    #[arg(long = "render-engine-path", value_name = "PATH")]
    pub engine_path: Option<PathBuf>,

    /// Override the per-render wall-clock deadline.
    #[arg(long = "render-timeout-ms", value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,

    /// Override the delay between SIGTERM and SIGKILL.
    #[arg(long = "render-kill-grace-ms", value_name = "MILLIS")]
    pub kill_grace_ms: Option<u64>,

    /// Override the maximum graph source size.
    #[arg(long = "render-max-source-bytes", value_name = "BYTES")]
    pub max_source_bytes: Option<u64>,

    /// Override the node estimate ceiling.
    #[arg(long = "render-max-nodes", value_name = "COUNT")]
    pub max_nodes: Option<u64>,

    /// Override the edge estimate ceiling.
    #[arg(long = "render-max-edges", value_name = "COUNT")]
    pub max_edges: Option<u64>,

    /// Override the maximum rendered output size.
    #[arg(long = "render-max-output-bytes", value_name = "BYTES")]
    pub max_output_bytes: Option<u64>,

    /// Override the number of engines allowed to run at once.
    #[arg(long = "render-concurrency", value_name = "COUNT")]
    pub concurrency: Option<u32>,

    /// Override the admission policy (queue|reject).
    #[arg(long = "render-admission", value_name = "POLICY")]
    pub admission: Option<String>,

    /// Override how long a queued render waits for a slot.
    #[arg(long = "render-queue-timeout-ms", value_name = "MILLIS")]
    pub queue_timeout_ms: Option<u64>,

    /// Override the parent directory for per-job scratch directories.
    #[arg(long = "render-scratch-dir", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// Override the render cache capacity; 0 disables the cache.
    #[arg(long = "render-cache-entries", value_name = "COUNT")]
    pub cache_entries: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum request body size in bytes.
    #[arg(long = "server-max-request-bytes", value_name = "BYTES")]
    pub server_max_request_bytes: Option<u64>,
}
