//! go tool origin
//!
//! Runs the go toolchain to populate the module cache. Two modes:
//!
//! - `download`: `go mod download -json module@token`, which prints a JSON
//!   object with the resolved `Version` (or an `Error`).
//! - `get`: `go get -d module@token`, which only reports progress lines on
//!   stderr. Needs a `go.mod` in the working directory.
//!
//! Each run is bounded by a timeout; a run that exceeds it is killed.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::backends::origin::{Origin, OriginReport};
use crate::backends::progress;
use crate::core::error::{ProxyError, ProxyResult};
use crate::core::version::ModuleKey;

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginMode {
    #[default]
    Download,
    Get,
}

impl std::str::FromStr for OriginMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "download" => Ok(OriginMode::Download),
            "get" => Ok(OriginMode::Get),
            _ => Err(format!("Unknown origin mode: {} (expected download or get)", s)),
        }
    }
}

/// Settings for invoking the go tool
#[derive(Debug, Clone)]
pub struct GoOrigin {
    /// go binary name or path
    pub go: String,
    /// Directory the go tool runs in
    pub workdir: PathBuf,
    /// Exported as GOPATH when set
    pub gopath: Option<PathBuf>,
    pub mode: OriginMode,
}

/// Captured result of one go invocation
#[derive(Debug)]
struct RunOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Fields of `go mod download -json` we care about
#[derive(Debug, Deserialize)]
struct DownloadJson {
    #[serde(rename = "Version", default)]
    version: String,
    #[serde(rename = "Error", default)]
    error: String,
}

impl GoOrigin {
    /// Write a stub `go.mod` into the working directory if there is none.
    /// `go get` refuses to run outside a module.
    pub fn prepare_workdir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.workdir)?;
        let go_mod = self.workdir.join("go.mod");
        if !go_mod.exists() {
            std::fs::write(&go_mod, "module mod\n")?;
        }
        Ok(())
    }

    fn command(&self, target: &str) -> Command {
        let mut cmd = Command::new(&self.go);
        match self.mode {
            OriginMode::Download => {
                cmd.args(["mod", "download", "-json", target]);
            }
            OriginMode::Get => {
                cmd.args(["get", "-d", target]);
            }
        }
        cmd.current_dir(&self.workdir)
            .env("GO111MODULE", "on")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(gopath) = &self.gopath {
            cmd.env("GOPATH", gopath);
        }
        cmd
    }

    fn run(&self, target: &str, timeout: Duration) -> ProxyResult<RunOutput> {
        let deadline = Instant::now() + timeout;
        let mut child = self.command(target).spawn().map_err(|e| {
            ProxyError::OriginFailure(format!("failed to start {}: {}", self.go, e))
        })?;

        // Drain both pipes while waiting so a chatty child cannot block on a
        // full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_timeout(&mut child, timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                // Reader threads are left behind: grandchildren (git, hg) may
                // still hold the pipes open.
                tracing::warn!(fetch = %target, timeout_secs = timeout.as_secs(), "origin fetch killed");
                return Err(ProxyError::FetchTimeout {
                    target: target.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            Err(e) => {
                let _ = child.kill();
                return Err(ProxyError::OriginFailure(format!(
                    "failed to wait for {}: {}",
                    self.go, e
                )));
            }
        };

        // Grandchildren that outlive go can keep the pipes open; take what
        // arrived before the deadline instead of waiting for EOF.
        Ok(RunOutput {
            status,
            stdout: collect(&stdout, deadline, target),
            stderr: collect(&stderr, deadline, target),
        })
    }

    fn report(&self, module: &ModuleKey, output: RunOutput) -> ProxyResult<OriginReport> {
        match self.mode {
            OriginMode::Download => {
                let parsed: Option<DownloadJson> = serde_json::from_str(output.stdout.trim()).ok();
                if let Some(json) = &parsed {
                    if !json.error.is_empty() {
                        return Err(progress::failure(&json.error));
                    }
                }
                if !output.status.success() {
                    return Err(progress::failure(&diagnostic(&output)));
                }
                match parsed {
                    Some(json) if !json.version.is_empty() => Ok(OriginReport {
                        resolved: Some(json.version),
                        progress: output.stderr,
                    }),
                    _ => {
                        tracing::debug!(module = %module, "no structured version in go output");
                        Ok(OriginReport::progress(output.stderr))
                    }
                }
            }
            OriginMode::Get => {
                if !output.status.success() {
                    return Err(progress::failure(&diagnostic(&output)));
                }
                Ok(OriginReport::progress(output.stderr))
            }
        }
    }
}

impl Origin for GoOrigin {
    fn fetch(&self, module: &ModuleKey, token: &str, timeout: Duration) -> ProxyResult<OriginReport> {
        let target = format!("{}@{}", module, token);
        let start = Instant::now();
        tracing::debug!(fetch = %target, mode = ?self.mode, "running go");

        let output = self.run(&target, timeout)?;
        tracing::debug!(
            fetch = %target,
            exit_code = ?output.status.code(),
            duration_ms = start.elapsed().as_millis() as u64,
            "go finished"
        );
        self.report(module, output)
    }
}

/// Poll `child` until it exits or `timeout` passes. `Ok(None)` means timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Forward everything read from `pipe` in chunks until EOF.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    rx
}

/// Gather chunks until the pipe closes or `deadline` passes.
fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant, target: &str) -> String {
    let mut out = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(chunk) => out.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                // Drain anything already buffered before giving up.
                out.extend(rx.try_iter().flatten());
                tracing::debug!(fetch = %target, "output still open at deadline");
                break;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Diagnostic text for a failed run: stderr, or stdout when stderr is empty.
fn diagnostic(output: &RunOutput) -> String {
    if output.stderr.trim().is_empty() {
        output.stdout.clone()
    } else {
        output.stderr.clone()
    }
}
