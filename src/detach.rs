//! Detached worker processes.
//!
//! A worker must outlive the producer that started it, so it runs as a
//! separate OS process rather than a thread. On unix the child starts a new
//! session (no controlling terminal, no signals from the parent's shell).
//! It gets no stdin or stdout, and stderr goes to a log file or is
//! discarded. The parent does not wait for it; a background thread reaps it
//! once it exits.

use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::Result;

/// Everything needed to launch one detached worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    log_file: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            log_file: None,
        }
    }

    /// A command that re-runs the current executable.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Append the child's stderr to `path` instead of discarding it.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Value the child will see for `key`, if this command sets it.
    pub fn get_env(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key.as_ref())
            .map(|(_, v)| v.as_os_str())
    }

    /// Launch the child and return its pid without waiting for it.
    pub fn spawn(&self) -> Result<u32> {
        let stderr = match &self.log_file {
            Some(path) => Stdio::from(OpenOptions::new().create(true).append(true).open(path)?),
            None => Stdio::null(),
        };

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            // SAFETY: setsid is async-signal-safe and touches no memory
            // shared with the parent.
            unsafe {
                command.pre_exec(|| {
                    nix::unistd::setsid()?;
                    Ok(())
                });
            }
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        info!(pid, program = %self.program.display(), "worker detached");

        // If this process exits first the child is reparented and reaped by
        // init instead.
        let reaper = std::thread::Builder::new()
            .name(format!("lowq-reap-{pid}"))
            .spawn(move || {
                if let Err(e) = child.wait() {
                    warn!(pid, error = %e, "failed to reap worker");
                }
            });
        if let Err(e) = reaper {
            warn!(pid, error = %e, "cannot reap worker, it stays a zombie until exit");
        }
        Ok(pid)
    }
}
