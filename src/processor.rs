//! The processing callback.
//!
//! A worker hands each decoded item to a [`Processor`]. Any closure of the
//! form `FnMut(T) -> Result<(), E>` is one. Delivery is at-least-once: an
//! item whose processing failed, or whose worker died mid-item, is handed
//! out again by a later worker, so processors must tolerate repeats.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::ENV_WORKER;

/// Error returned by a processor. Opaque to the queue; only logged.
pub type ProcessError = Box<dyn std::error::Error + Send + Sync>;

/// Handles one work item at a time, synchronously.
pub trait Processor<T> {
    fn process(&mut self, item: T) -> Result<(), ProcessError>;
}

impl<T, F, E> Processor<T> for F
where
    F: FnMut(T) -> Result<(), E>,
    E: Into<ProcessError>,
{
    fn process(&mut self, item: T) -> Result<(), ProcessError> {
        self(item).map_err(Into::into)
    }
}

/// Runs a shell command once per item.
///
/// The item is exposed to the command as `LOWQ_ITEM`, the queue database as
/// `LOWQ_DB`. A non-zero exit status fails the item.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    command: String,
    db: PathBuf,
}

impl CommandProcessor {
    pub fn new(command: impl Into<String>, db: &Path) -> Self {
        Self {
            command: command.into(),
            db: db.to_path_buf(),
        }
    }
}

impl Processor<String> for CommandProcessor {
    fn process(&mut self, item: String) -> Result<(), ProcessError> {
        debug!(command = %self.command, "running item command");

        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("LOWQ_ITEM", &item)
            .env("LOWQ_DB", &self.db)
            .env_remove(ENV_WORKER)
            .stdin(Stdio::null())
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(format!(
                "command exited with status {}",
                status.code().unwrap_or(-1)
            )
            .into())
        }
    }
}
