//! External tool invocation.
//!
//! Inspection tools run as subprocesses with a bounded timeout and a
//! bounded output buffer. A spawn failure (tool absent) is distinguished
//! from the tool running and reporting an error; the policy layer treats
//! the two very differently.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Cap on captured bytes per stream. Output past the cap is drained and
/// discarded so the child never blocks on a full pipe.
pub const MAX_CAPTURE_BYTES: usize = 2 * 1024 * 1024;

/// Poll interval while waiting on a child process.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Captured output of a completed tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code, when the platform reported one.
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Tool invocation failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The binary could not be spawned at all.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// The tool ran and exited non-zero.
    #[error("tool '{program}' failed (exit {exit_code:?}): {stderr}")]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The tool exceeded its deadline and was killed.
    #[error("tool '{0}' timed out after {1:?}")]
    TimedOut(String, Duration),

    /// Pipe or wait failure.
    #[error("tool '{0}' io error: {1}")]
    Io(String, String),
}

impl ToolError {
    /// True when the failure means the tool is absent rather than that it
    /// ran and rejected the input.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Subprocess seam. Tests substitute a scripted runner; production uses
/// [`SystemToolRunner`].
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, enforcing `timeout`. A non-zero exit is
    /// `ToolError::Failed`, not an `Ok` with a failing code.
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<ToolOutput, ToolError>;
}

/// Real subprocess runner.
#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<ToolOutput, ToolError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolError::NotFound(program.to_string())
                } else {
                    ToolError::Io(program.to_string(), e.to_string())
                }
            })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_reader = thread::spawn(move || capture(stdout_pipe));
        let stderr_reader = thread::spawn(move || capture(stderr_pipe));

        let deadline = Instant::now() + timeout;
        let exit_code = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status.code(),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ToolError::TimedOut(program.to_string(), timeout));
                    }
                    thread::sleep(WAIT_POLL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(ToolError::Io(program.to_string(), e.to_string()));
                }
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if exit_code != Some(0) {
            return Err(ToolError::Failed {
                program: program.to_string(),
                exit_code,
                stderr: truncate_line(&stderr),
            });
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Read a stream up to [`MAX_CAPTURE_BYTES`], then drain the rest.
fn capture<R: Read>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::with_capacity(8192);
    let _ = (&mut pipe)
        .take(MAX_CAPTURE_BYTES as u64)
        .read_to_end(&mut buf);
    let _ = std::io::copy(&mut pipe, &mut std::io::sink());
    String::from_utf8_lossy(&buf).into_owned()
}

/// First line of stderr, bounded, for embedding in error messages.
fn truncate_line(s: &str) -> String {
    let line = s.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(200).collect();
    if line.chars().count() > 200 {
        out.push('…');
    }
    out
}
