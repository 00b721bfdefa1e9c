//! Running external commands to completion.
//!
//! [`CommandRunner`] is the seam between the dispatcher and the operating
//! system: run a command, wait for it, hand back the exit code and captured
//! streams. [`ProcessRunner`] is the real implementation, built on
//! `tokio::process`. The wait for exit and the reads of both pipes sit under
//! one deadline and race the cancel token, so a background process that keeps
//! a pipe open cannot outlive the timeout or an interrupt.

use std::ffi::OsString;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tracing::debug;

use roll_core::CancelToken;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Why a command did not run to completion.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("executable not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    fn io(context: &'static str, source: io::Error) -> Self {
        RunError::Io { context, source }
    }
}

/// Runs a command to completion and reports how it ended.
pub trait CommandRunner {
    fn run(&self, command: &ExternalCommand) -> Result<ProcessOutput, RunError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &ExternalCommand) -> Result<ProcessOutput, RunError> {
        (**self).run(command)
    }
}

/// Runs commands as child processes.
///
/// Blocking callers are served from the ambient tokio runtime when there is
/// one (the pipeline runs on a `spawn_blocking` thread), otherwise from a
/// throwaway current-thread runtime.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl ProcessRunner {
    /// Create a runner without a timeout.
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            timeout: None,
            cancel,
        }
    }

    /// Kill and fail any command running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a command, killing it on timeout or cancellation.
    pub async fn run_async(&self, command: &ExternalCommand) -> Result<ProcessOutput, RunError> {
        let start = Instant::now();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => RunError::NotFound(command.program.clone()),
                _ => RunError::io("spawn failed", e),
            })?;

        debug!(pid = ?child.id(), program = %command.program.display(), "Spawned cleaner");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = {
            // Exit alone is not completion: the pipes must reach EOF too.
            let finish = async {
                tokio::try_join!(child.wait(), read_all(stdout), read_all(stderr))
                    .map_err(|e| RunError::io("wait failed", e))
            };
            let limited = async move {
                match self.timeout {
                    Some(limit) => tokio::time::timeout(limit, finish)
                        .await
                        .unwrap_or(Err(RunError::TimedOut(limit))),
                    None => finish.await,
                }
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(RunError::Cancelled),
                result = limited => result,
            }
        };

        match outcome {
            Ok((status, stdout, stderr)) => Ok(ProcessOutput {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                elapsed: start.elapsed(),
            }),
            Err(e) => {
                // Already-exited children make this a no-op.
                if let Err(kill_err) = child.kill().await {
                    debug!(error = %kill_err, "Kill after {} failed", e);
                }
                Err(e)
            }
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &ExternalCommand) -> Result<ProcessOutput, RunError> {
        block_on(self.run_async(command))
    }
}

fn block_on<F>(future: F) -> Result<ProcessOutput, RunError>
where
    F: Future<Output = Result<ProcessOutput, RunError>>,
{
    match Handle::try_current() {
        Ok(handle) => handle.block_on(future),
        Err(_) => Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RunError::io("runtime start failed", e))?
            .block_on(future),
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
