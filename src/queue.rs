//! Producer-side API: push work, start a worker, inspect the backlog.

use opentelemetry::KeyValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::codec::Codec;
use crate::config::{self, QueueConfig};
use crate::detach::WorkerCommand;
use crate::error::{Error, Result};
use crate::model::{EntryId, PushReport, QueueStatus};
use crate::storage::Storage;
use crate::telemetry::metrics;
use crate::telemetry::work::start_push_span;
use crate::worker::WORKER_ARG;

/// Handle on one queue database. Cheap to construct; holds no connection.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append items to the backlog, skipping any whose encoding is already
    /// pending.
    ///
    /// Does not start a worker; call [`TaskQueue::start`] afterwards.
    pub fn push<I, T>(&self, items: I) -> Result<PushReport>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let span = start_push_span(&self.config.path);
        let _enter = span.enter();

        let storage = Storage::open(&self.config.path, self.config.retry)?;
        storage.ensure_backlog()?;

        let mut report = PushReport::default();
        for item in items {
            let payload = self.config.codec.encode(&item)?;
            match storage.insert_work(&payload) {
                Ok(id) => {
                    report.inserted += 1;
                    metrics::work_pushed().add(1, &[KeyValue::new("result", "ok")]);
                    info!(entry = %id, "pushed");
                }
                Err(Error::DuplicateWork) => {
                    report.duplicates += 1;
                    metrics::work_pushed().add(1, &[KeyValue::new("result", "duplicate")]);
                    info!("ignoring duplicate work");
                }
                Err(e) => return Err(e),
            }
        }

        storage.close()?;
        Ok(report)
    }

    /// The default worker launch: this executable with a `worker` argument,
    /// `LOWQ_WORKER=1`, and the queue configuration passed through `LOWQ_*`
    /// variables so [`QueueConfig::from_env`] in the child rebuilds it.
    ///
    /// The executable must hand control to the worker before doing anything
    /// else, by calling [`run_if_worker`](crate::worker::run_if_worker) first
    /// thing in `main`. Otherwise the child runs the producer code again.
    pub fn worker_command(&self) -> Result<WorkerCommand> {
        let mut command = WorkerCommand::current_exe()?
            .arg(WORKER_ARG)
            .env(config::ENV_WORKER, "1")
            .env(config::ENV_DB, &self.config.path)
            .env(config::ENV_CODEC, self.config.codec.to_string())
            .env(
                config::ENV_MAX_RETRIES,
                self.config.retry.max_retries.to_string(),
            )
            .env(
                config::ENV_BACKOFF_MS,
                self.config.retry.step.as_millis().to_string(),
            )
            .env(config::ENV_LOG, &self.config.log_level);
        if let Some(log_file) = &self.config.log_file {
            command = command
                .env(config::ENV_LOG_FILE, log_file)
                .log_file(log_file);
        }
        Ok(command)
    }

    /// Launch a detached worker and return its pid immediately.
    ///
    /// Safe to call when a worker is already running: the new one loses the
    /// claim and exits. The child is reaped by a background thread, so a
    /// long-lived producer does not collect zombies.
    pub fn start(&self, command: &WorkerCommand) -> Result<u32> {
        command.spawn()
    }

    /// Push, then start a worker for the new backlog.
    pub fn submit<I, T>(&self, items: I, command: &WorkerCommand) -> Result<PushReport>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let report = self.push(items)?;
        self.start(command)?;
        Ok(report)
    }

    /// Whether a worker is active and how much work is pending.
    pub fn status(&self) -> Result<QueueStatus> {
        let storage = self.open_read()?;
        let status = QueueStatus {
            active: storage.is_active()?,
            pending: storage.pending()?,
        };
        storage.close()?;
        Ok(status)
    }

    /// Up to `limit` pending items, oldest first, decoded.
    pub fn peek<T: DeserializeOwned>(&self, limit: usize) -> Result<Vec<(EntryId, T)>> {
        let storage = self.open_read()?;
        let entries = storage
            .backlog(limit)?
            .into_iter()
            .map(|entry| Ok((entry.id, self.config.codec.decode(&entry.payload)?)))
            .collect::<Result<Vec<_>>>()?;
        storage.close()?;
        Ok(entries)
    }

    fn open_read(&self) -> Result<Storage> {
        let storage = Storage::open(&self.config.path, self.config.retry)?;
        storage.ensure_backlog()?;
        storage.ensure_status()?;
        Ok(storage)
    }
}
