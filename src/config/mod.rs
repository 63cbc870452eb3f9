//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    application::render::{AdmissionPolicy, EngineConfig, PipelineConfig},
    domain::{
        budget::RenderBudget,
        format::{Layout, OutputFormat},
    },
};

mod cli;

pub use cli::{
    CliArgs, Command, LoggingOverrides, RenderArgs, RenderOverrides, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "dotserve";
const ENV_PREFIX: &str = "DOTSERVE";
const LIST_KEYS: [&str; 3] = ["render.formats", "render.layouts", "render.env_passthrough"];

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_ENGINE_PATH: &str = "dot";
const DEFAULT_FORMATS: [&str; 9] = [
    "svg", "png", "pdf", "jpeg", "gif", "webp", "json", "dot", "plain",
];
const DEFAULT_FORMAT: &str = "png";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KILL_GRACE_MS: u64 = 500;
const DEFAULT_MAX_SOURCE_BYTES: u64 = 256 * 1024;
const DEFAULT_MAX_NODES: u64 = 5_000;
const DEFAULT_MAX_EDGES: u64 = 20_000;
const DEFAULT_MAX_OUTPUT_BYTES: u64 = 32 * 1024 * 1024;
const DEFAULT_MAX_STDERR_BYTES: u64 = 16 * 1024;
const DEFAULT_CONCURRENCY: u32 = 4;
const DEFAULT_ADMISSION: &str = "queue";
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_ENV_PASSTHROUGH: [&str; 7] = [
    "PATH",
    "LANG",
    "LC_ALL",
    "FONTCONFIG_FILE",
    "FONTCONFIG_PATH",
    "GVBINDIR",
    "LD_LIBRARY_PATH",
];
const DEFAULT_CACHE_ENTRIES: u64 = 0;
const DEFAULT_CACHE_MAX_ENTRY_BYTES: u64 = 1024 * 1024;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub max_request_bytes: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub engine_path: PathBuf,
    pub formats: Vec<OutputFormat>,
    pub default_format: OutputFormat,
    pub layouts: Vec<Layout>,
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub max_source_bytes: NonZeroUsize,
    pub max_nodes: NonZeroUsize,
    pub max_edges: NonZeroUsize,
    pub max_output_bytes: NonZeroUsize,
    pub max_stderr_bytes: NonZeroUsize,
    pub concurrency: NonZeroU32,
    pub admission: AdmissionPolicy,
    pub scratch_dir: PathBuf,
    pub env_passthrough: Vec<String>,
    pub cache_entries: usize,
    pub cache_max_entry_bytes: usize,
}

impl RenderSettings {
    pub fn budget(&self) -> RenderBudget {
        RenderBudget {
            max_source_bytes: self.max_source_bytes.get(),
            max_nodes: self.max_nodes.get(),
            max_edges: self.max_edges.get(),
        }
    }
}

impl From<&RenderSettings> for PipelineConfig {
    fn from(settings: &RenderSettings) -> Self {
        PipelineConfig {
            budget: settings.budget(),
            formats: settings.formats.clone(),
            default_format: settings.default_format,
            layouts: settings.layouts.clone(),
            timeout: settings.timeout,
            kill_grace: settings.kill_grace,
        }
    }
}

impl From<&RenderSettings> for EngineConfig {
    fn from(settings: &RenderSettings) -> Self {
        EngineConfig {
            program: settings.engine_path.clone(),
            scratch_dir: settings.scratch_dir.clone(),
            kill_grace: settings.kill_grace,
            max_output_bytes: settings.max_output_bytes.get(),
            max_stderr_bytes: settings.max_stderr_bytes.get(),
            env_passthrough: settings.env_passthrough.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    let environment = LIST_KEYS.into_iter().fold(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(","),
        |environment, key| environment.with_list_parse_key(key),
    );
    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => {
            raw.apply_logging_overrides(&args.logging);
            raw.apply_render_overrides(&args.render);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.server_max_request_bytes {
            self.server.max_request_bytes = Some(limit);
        }

        self.apply_logging_overrides(&overrides.logging);
        self.apply_render_overrides(&overrides.render);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.engine_path.as_ref() {
            self.render.engine_path = Some(path.clone());
        }
        if let Some(value) = overrides.timeout_ms {
            self.render.timeout_ms = Some(value);
        }
        if let Some(value) = overrides.kill_grace_ms {
            self.render.kill_grace_ms = Some(value);
        }
        if let Some(value) = overrides.max_source_bytes {
            self.render.max_source_bytes = Some(value);
        }
        if let Some(value) = overrides.max_nodes {
            self.render.max_nodes = Some(value);
        }
        if let Some(value) = overrides.max_edges {
            self.render.max_edges = Some(value);
        }
        if let Some(value) = overrides.max_output_bytes {
            self.render.max_output_bytes = Some(value);
        }
        if let Some(value) = overrides.concurrency {
            self.render.concurrency = Some(value);
        }
        if let Some(value) = overrides.admission.as_ref() {
            self.render.admission = Some(value.clone());
        }
        if let Some(value) = overrides.queue_timeout_ms {
            self.render.queue_timeout_ms = Some(value);
        }
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.render.scratch_dir = Some(dir.clone());
        }
        if let Some(value) = overrides.cache_entries {
            self.render.cache_entries = Some(value);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;

        Ok(Self {
            server,
            logging,
            render,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let max_request_bytes = non_zero_usize(
        server.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
        "server.max_request_bytes",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_request_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let engine_path = render
        .engine_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_PATH));
    if engine_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.engine_path",
            "path must not be empty",
        ));
    }

    let formats: Vec<OutputFormat> = match render.formats {
        Some(names) => parse_list(names.as_slice(), "render.formats")?,
        None => parse_list(&DEFAULT_FORMATS[..], "render.formats")?,
    };
    if formats.is_empty() {
        return Err(LoadError::invalid(
            "render.formats",
            "at least one format must be enabled",
        ));
    }

    let default_format_name = render
        .default_format
        .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
    let default_format = OutputFormat::from_str(&default_format_name)
        .map_err(|err| LoadError::invalid("render.default_format", err.to_string()))?;
    if !formats.contains(&default_format) {
        return Err(LoadError::invalid(
            "render.default_format",
            format!("`{default_format}` is not listed in render.formats"),
        ));
    }

    let layouts: Vec<Layout> = match render.layouts {
        Some(names) => parse_list(names.as_slice(), "render.layouts")?,
        None => Layout::ALL.to_vec(),
    };
    if layouts.is_empty() {
        return Err(LoadError::invalid(
            "render.layouts",
            "at least one layout must be enabled",
        ));
    }

    let timeout_ms = render.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "render.timeout_ms",
            "must be greater than zero",
        ));
    }
    let kill_grace_ms = render.kill_grace_ms.unwrap_or(DEFAULT_KILL_GRACE_MS);

    let concurrency = non_zero_u32(
        render.concurrency.unwrap_or(DEFAULT_CONCURRENCY).into(),
        "render.concurrency",
    )?;

    let admission = match render
        .admission
        .as_deref()
        .unwrap_or(DEFAULT_ADMISSION)
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "queue" => {
            let queue_timeout_ms = render.queue_timeout_ms.unwrap_or(DEFAULT_QUEUE_TIMEOUT_MS);
            if queue_timeout_ms == 0 {
                return Err(LoadError::invalid(
                    "render.queue_timeout_ms",
                    "must be greater than zero",
                ));
            }
            AdmissionPolicy::Queue {
                max_wait: Duration::from_millis(queue_timeout_ms),
            }
        }
        "reject" => AdmissionPolicy::Reject,
        other => {
            return Err(LoadError::invalid(
                "render.admission",
                format!("expected `queue` or `reject`, got `{other}`"),
            ));
        }
    };

    let scratch_dir = render.scratch_dir.unwrap_or_else(std::env::temp_dir);
    if scratch_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.scratch_dir",
            "path must not be empty",
        ));
    }

    let env_passthrough = render
        .env_passthrough
        .unwrap_or_else(|| Vec::from(DEFAULT_ENV_PASSTHROUGH.map(str::to_string)))
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    Ok(RenderSettings {
        engine_path,
        formats,
        default_format,
        layouts,
        timeout: Duration::from_millis(timeout_ms),
        kill_grace: Duration::from_millis(kill_grace_ms),
        max_source_bytes: non_zero_usize(
            render.max_source_bytes.unwrap_or(DEFAULT_MAX_SOURCE_BYTES),
            "render.max_source_bytes",
        )?,
        max_nodes: non_zero_usize(
            render.max_nodes.unwrap_or(DEFAULT_MAX_NODES),
            "render.max_nodes",
        )?,
        max_edges: non_zero_usize(
            render.max_edges.unwrap_or(DEFAULT_MAX_EDGES),
            "render.max_edges",
        )?,
        max_output_bytes: non_zero_usize(
            render.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES),
            "render.max_output_bytes",
        )?,
        max_stderr_bytes: non_zero_usize(
            render.max_stderr_bytes.unwrap_or(DEFAULT_MAX_STDERR_BYTES),
            "render.max_stderr_bytes",
        )?,
        concurrency,
        admission,
        scratch_dir,
        env_passthrough,
        cache_entries: to_usize(
            render.cache_entries.unwrap_or(DEFAULT_CACHE_ENTRIES),
            "render.cache_entries",
        )?,
        cache_max_entry_bytes: to_usize(
            render
                .cache_max_entry_bytes
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRY_BYTES),
            "render.cache_max_entry_bytes",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    engine_path: Option<PathBuf>,
    formats: Option<Vec<String>>,
    default_format: Option<String>,
    layouts: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    kill_grace_ms: Option<u64>,
    max_source_bytes: Option<u64>,
    max_nodes: Option<u64>,
    max_edges: Option<u64>,
    max_output_bytes: Option<u64>,
    max_stderr_bytes: Option<u64>,
    concurrency: Option<u32>,
    admission: Option<String>,
    queue_timeout_ms: Option<u64>,
    scratch_dir: Option<PathBuf>,
    env_passthrough: Option<Vec<String>>,
    cache_entries: Option<u64>,
    cache_max_entry_bytes: Option<u64>,
}

/// Parse a list of names, dropping duplicates and blank entries.
fn parse_list<T, S>(names: &[S], key: &'static str) -> Result<Vec<T>, LoadError>
where
    T: FromStr + PartialEq,
    T::Err: std::fmt::Display,
    S: AsRef<str>,
{
    let mut parsed = Vec::with_capacity(names.len());
    for name in names.iter().map(AsRef::as_ref).map(str::trim) {
        if name.is_empty() {
            continue;
        }
        let value = T::from_str(name).map_err(|err| LoadError::invalid(key, err.to_string()))?;
        if !parsed.contains(&value) {
            parsed.push(value);
        }
    }
    Ok(parsed)
}

/// IP literals (IPv6 with or without brackets) or a host name resolved once at load.
fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let literal = host
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|err| format!("cannot resolve `{host}`: {err}"))?
        .next()
        .ok_or_else(|| format!("`{host}` did not resolve to any address"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(to_usize(value, key)?)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn to_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
