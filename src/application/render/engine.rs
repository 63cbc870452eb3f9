//! Graphviz process driver.
//!
//! Every render runs as its own [`RenderJob`]: a child process in a fresh
//! process group, with a private scratch directory as its working directory,
//! a cleared environment and bounded output buffers. The job owns the child
//! until it has been reaped. A finished job always kills what is left of its
//! group; dropping a job that is still running kills the whole group and hands
//! the child to a background reaper.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use tempfile::TempDir;
use tokio::{
    io::AsyncWriteExt,
    process::{Child, Command},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    capture::{CaptureError, Captured, Overflow, capture},
    types::{EngineError, EngineInput, Renderer},
};

pub(crate) const METRIC_ENGINE_SPAWN_TOTAL: &str = "dotserve_engine_spawn_total";

const SERVER_NAME: &str = "dotserve";
const PROBE_OUTPUT_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: PathBuf,
    /// Parent directory for per-job scratch directories.
    pub scratch_dir: PathBuf,
    pub kill_grace: Duration,
    pub max_output_bytes: usize,
    pub max_stderr_bytes: usize,
    /// Variables copied from the host environment into the child.
    pub env_passthrough: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dot"),
            scratch_dir: std::env::temp_dir(),
            kill_grace: Duration::from_millis(500),
            max_output_bytes: 32 * 1024 * 1024,
            max_stderr_bytes: 16 * 1024,
            env_passthrough: [
                "PATH",
                "LANG",
                "LC_ALL",
                "FONTCONFIG_FILE",
                "FONTCONFIG_PATH",
                "GVBINDIR",
                "LD_LIBRARY_PATH",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// [`Renderer`] backed by the Graphviz `dot` executable.
#[derive(Debug, Clone)]
pub struct DotEngine {
    config: EngineConfig,
}

impl DotEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.scratch_dir).map_err(EngineError::Workspace)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[async_trait]
impl Renderer for DotEngine {
    async fn render(&self, input: &EngineInput) -> Result<Bytes, EngineError> {
        let started_at = Instant::now();
        let mut args = vec![format!("-T{}", input.format.engine_arg())];
        if let Some(layout) = input.layout {
            args.push(format!("-K{layout}"));
        }

        let mut job = RenderJob::spawn(&self.config, &args, self.config.max_output_bytes)?;
        let job_id = job.id;
        let result = job
            .run(input.source.as_bytes(), input.deadline)
            .await
            .and_then(JobOutcome::into_output);

        match &result {
            Ok(bytes) => info!(
                target = "application::render::engine",
                op = "engine::render",
                result = "ok",
                job_id = %job_id,
                format = %input.format,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                output_bytes = bytes.len(),
                "Layout engine produced output"
            ),
            Err(err) => warn!(
                target = "application::render::engine",
                op = "engine::render",
                result = "error",
                job_id = %job_id,
                format = %input.format,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = err.code(),
                error = %err,
                "Layout engine invocation failed"
            ),
        }

        result
    }

    async fn probe(&self, deadline: Duration) -> Result<String, EngineError> {
        let mut job = RenderJob::spawn(&self.config, &["-V".to_string()], PROBE_OUTPUT_BYTES)?;
        let outcome = job.run(&[], deadline).await?;
        outcome.into_version()
    }
}

struct JobOutcome {
    status: ExitStatus,
    stdout: Captured,
    stderr: Captured,
}

impl JobOutcome {
    fn into_output(self) -> Result<Bytes, EngineError> {
        self.check_status()?;
        if self.stdout.bytes.is_empty() {
            return Err(EngineError::EmptyOutput);
        }
        Ok(Bytes::from(self.stdout.bytes))
    }

    /// Graphviz prints its version banner on stderr.
    fn into_version(self) -> Result<String, EngineError> {
        self.check_status()?;
        let banner = if self.stderr.bytes.is_empty() {
            self.stdout.lossy_text()
        } else {
            self.stderr.lossy_text()
        };
        Ok(banner.trim().to_string())
    }

    fn check_status(&self) -> Result<(), EngineError> {
        if self.status.success() {
            return Ok(());
        }
        let stderr = self.stderr.lossy_text();
        if let Some(code) = self.status.code() {
            return Err(EngineError::Exit { code, stderr });
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = self.status.signal() {
                return Err(EngineError::Signaled { signal, stderr });
            }
        }
        Err(EngineError::Exit { code: -1, stderr })
    }
}

/// One in-flight engine execution.
struct RenderJob {
    id: Uuid,
    child: Option<Child>,
    pid: Option<u32>,
    reaped: bool,
    workspace: Option<TempDir>,
    kill_grace: Duration,
    max_stdout: usize,
    max_stderr: usize,
}

impl RenderJob {
    fn spawn(
        config: &EngineConfig,
        args: &[String],
        max_stdout: usize,
    ) -> Result<Self, EngineError> {
        let id = Uuid::new_v4();
        let workspace = tempfile::Builder::new()
            .prefix(&format!("dotserve-{id}-"))
            .tempdir_in(&config.scratch_dir)
            .map_err(EngineError::Workspace)?;

        let mut command = Command::new(&config.program);
        command
            .args(args)
            .current_dir(workspace.path())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &config.env_passthrough {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        command
            .env("SERVER_NAME", SERVER_NAME)
            .env("GV_FILE_PATH", gv_file_path(workspace.path()));
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|err| {
            counter!(METRIC_ENGINE_SPAWN_TOTAL, "result" => "error").increment(1);
            if err.kind() == ErrorKind::NotFound {
                EngineError::NotFound {
                    program: config.program.display().to_string(),
                    error: err,
                }
            } else {
                EngineError::Spawn(err)
            }
        })?;
        counter!(METRIC_ENGINE_SPAWN_TOTAL, "result" => "ok").increment(1);

        let pid = child.id();
        debug!(
            target = "application::render::engine",
            op = "engine::spawn",
            job_id = %id,
            pid = pid.unwrap_or_default(),
            workspace = %workspace.path().display(),
            "Layout engine started"
        );

        Ok(Self {
            id,
            child: Some(child),
            pid,
            reaped: false,
            workspace: Some(workspace),
            kill_grace: config.kill_grace,
            max_stdout,
            max_stderr: config.max_stderr_bytes,
        })
    }

    async fn run(&mut self, input: &[u8], deadline: Duration) -> Result<JobOutcome, EngineError> {
        let result = match tokio::time::timeout(deadline, self.drive(input)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => {
                self.terminate().await;
                Err(err)
            }
            Err(_) => {
                self.terminate().await;
                Err(EngineError::TimedOut { after: deadline })
            }
        };
        // Anything the engine left running in the background shares its group.
        signal_group(self.pid, GroupSignal::Kill);
        result
    }

    async fn drive(&mut self, input: &[u8]) -> Result<JobOutcome, EngineError> {
        let (max_stdout, max_stderr) = (self.max_stdout, self.max_stderr);
        let child = self.child.as_mut().ok_or_else(|| missing("process handle"))?;
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let feed = async move {
            let written = stdin.write_all(input).await;
            drop(stdin);
            match written {
                // The engine may stop reading early, e.g. on a syntax error.
                Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other.map_err(EngineError::Io),
            }
        };
        let collect_stdout = async move {
            capture(stdout, max_stdout, Overflow::Fail)
                .await
                .map_err(capture_error)
        };
        let collect_stderr = async move {
            capture(stderr, max_stderr, Overflow::Truncate)
                .await
                .map_err(capture_error)
        };
        let ((), stdout, stderr) = tokio::try_join!(feed, collect_stdout, collect_stderr)?;

        let status = child.wait().await.map_err(EngineError::Io)?;
        self.reaped = true;

        Ok(JobOutcome {
            status,
            stdout,
            stderr,
        })
    }

    /// SIGTERM the group, give it `kill_grace` to exit, then SIGKILL and reap.
    async fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };

        signal_group(self.pid, GroupSignal::Terminate);
        if let Ok(Ok(status)) = tokio::time::timeout(self.kill_grace, child.wait()).await {
            self.reaped = true;
            debug!(
                target = "application::render::engine",
                op = "engine::terminate",
                job_id = %self.id,
                status = %status,
                "Layout engine exited after SIGTERM"
            );
            return;
        }

        signal_group(self.pid, GroupSignal::Kill);
        if let Err(err) = child.start_kill() {
            debug!(
                target = "application::render::engine",
                op = "engine::terminate",
                job_id = %self.id,
                error = %err,
                "start_kill on layout engine failed"
            );
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(_)) => self.reaped = true,
            Ok(Err(err)) => warn!(
                target = "application::render::engine",
                op = "engine::terminate",
                job_id = %self.id,
                error = %err,
                "Failed to reap killed layout engine"
            ),
            Err(_) => warn!(
                target = "application::render::engine",
                op = "engine::terminate",
                job_id = %self.id,
                "Killed layout engine did not exit within grace period"
            ),
        }
    }
}

impl Drop for RenderJob {
    fn drop(&mut self) {
        let workspace = self.workspace.take();
        let Some(mut child) = self.child.take() else {
            return;
        };
        if self.reaped {
            return;
        }

        signal_group(self.pid, GroupSignal::Kill);
        let _ = child.start_kill();

        let job_id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let status = child.wait().await;
                    debug!(
                        target = "application::render::engine",
                        op = "engine::reap",
                        job_id = %job_id,
                        reaped = status.is_ok(),
                        "Reaped abandoned layout engine"
                    );
                    drop(workspace);
                });
            }
            // No runtime left: `kill_on_drop` and tokio's orphan queue take over.
            Err(_) => drop(child),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: GroupSignal) {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(
            target = "application::render::engine",
            op = "engine::signal_group",
            pgid = pid,
            signal = signal.as_str(),
            error = %err,
            "Failed to signal layout engine process group"
        ),
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: GroupSignal) {}

/// Graphviz only resolves image and font references under this prefix.
fn gv_file_path(workspace: &Path) -> String {
    let mut path = workspace.display().to_string();
    if !path.ends_with(std::path::MAIN_SEPARATOR) {
        path.push(std::path::MAIN_SEPARATOR);
    }
    path
}

fn capture_error(err: CaptureError) -> EngineError {
    match err {
        CaptureError::Io(err) => EngineError::Io(err),
        CaptureError::Overflow { limit } => EngineError::OutputTooLarge { limit },
    }
}

fn missing(what: &str) -> EngineError {
    EngineError::Io(io::Error::other(format!("layout engine {what} is not available")))
}
