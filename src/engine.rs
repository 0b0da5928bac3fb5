use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::ProcessError;

/// Cap on captured bytes per stream. Anything past this is read and
/// discarded so the child never blocks on a full pipe.
const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Shared flag that stops dispatch of new jobs and terminates in-flight
/// engine processes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Captured result of one engine invocation.
#[derive(Debug)]
pub struct EngineOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Handle on the external media engine: resolved binary path plus the
/// per-invocation wall-clock budget.
#[derive(Debug, Clone)]
pub struct Engine {
    binary: PathBuf,
    timeout: Duration,
}

impl Engine {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Engine {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Probe the binary with `-version` before any job is scheduled.
    /// Returns the engine's version banner line.
    pub fn preflight(&self) -> Result<String, ProcessError> {
        let probe: [OsString; 1] = ["-version".into()];
        let out = self.run(&probe, &CancelToken::new())?;
        if !out.success() {
            return Err(ProcessError::EngineUnavailable(format!(
                "{} exited with {:?} on version probe",
                self.binary.display(),
                out.exit_code
            )));
        }
        Ok(out.stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Run the engine with a discrete argument list (no shell involved),
    /// capturing both streams until the process exits, the timeout fires,
    /// or the batch is cancelled. A timed-out or cancelled child is killed
    /// and reaped before this returns; no process outlives the call.
    pub fn run(&self, args: &[OsString], cancel: &CancelToken) -> Result<EngineOutput, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProcessError::EngineUnavailable(self.binary.display().to_string())
                } else {
                    ProcessError::SpawnFailure(e)
                }
            })?;

        let stdout_handle = spawn_capture(child.stdout.take());
        let stderr_handle = spawn_capture(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    reap(&mut child);
                    drain(stdout_handle, stderr_handle);
                    return Err(ProcessError::SpawnFailure(e));
                }
            }
            if cancel.is_cancelled() {
                reap(&mut child);
                drain(stdout_handle, stderr_handle);
                return Err(ProcessError::Cancelled);
            }
            if start.elapsed() > self.timeout {
                reap(&mut child);
                drain(stdout_handle, stderr_handle);
                return Err(ProcessError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let (stdout, stderr) = drain(stdout_handle, stderr_handle);
        Ok(EngineOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain(stdout: JoinHandle<String>, stderr: JoinHandle<String>) -> (String, String) {
    (
        stdout.join().unwrap_or_default(),
        stderr.join().unwrap_or_default(),
    )
}

/// Read a stream to EOF on its own thread, keeping at most
/// `MAX_CAPTURE_BYTES` and discarding the rest.
fn spawn_capture<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if buf.len() < MAX_CAPTURE_BYTES {
                            let take = n.min(MAX_CAPTURE_BYTES - buf.len());
                            buf.extend_from_slice(&chunk[..take]);
                        }
                    }
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
