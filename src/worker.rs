//! Worker lifecycle: claim the status marker, drain, release, exit.
//!
//! [`Worker::run`] is the body of a detached worker process. It opens its
//! own storage handle, tries to insert the status marker, and drains the
//! backlog only if that insert succeeded. Losing the claim is a normal
//! outcome when two workers are started at once.
//!
//! The default launch re-runs the producer's own executable, so a program
//! that starts workers calls [`run_if_worker`] at the top of `main`.

use std::ffi::OsStr;
use std::marker::PhantomData;

use opentelemetry::KeyValue;
use serde::de::DeserializeOwned;
use tracing::{Span, error, info};

use crate::codec::CodecKind;
use crate::config::{self, QueueConfig};
use crate::drain::drain;
use crate::error::{Error, Result};
use crate::model::{WorkerExit, WorkerState};
use crate::processor::Processor;
use crate::storage::Storage;
use crate::telemetry::work::{record_transition, start_worker_span};
use crate::telemetry::{init_logging, metrics};

/// First argument of a detached worker process.
pub const WORKER_ARG: &str = "worker";

/// Whether this process was launched by [`TaskQueue::worker_command`].
///
/// [`TaskQueue::worker_command`]: crate::TaskQueue::worker_command
pub fn is_worker_process() -> bool {
    let marked = std::env::var_os(config::ENV_WORKER).is_some_and(|v| v == "1");
    marked && std::env::args_os().nth(1).as_deref() == Some(OsStr::new(WORKER_ARG))
}

/// Worker entry point for programs that push and start their own work.
///
/// In a detached worker process this rebuilds the config from `LOWQ_*`,
/// runs the worker with `processor` and exits the process with status 0.
/// Anywhere else it returns immediately.
///
/// ```no_run
/// fn main() -> lowq::Result<()> {
///     lowq::worker::run_if_worker(|path: String| -> std::io::Result<()> {
///         println!("thumbnailing {path}");
///         Ok(())
///     });
///
///     let queue = lowq::TaskQueue::new(lowq::QueueConfig::new("thumbs.db"))?;
///     queue.push(["img/1.png"])?;
///     queue.start(&queue.worker_command()?)?;
///     Ok(())
/// }
/// ```
pub fn run_if_worker<T, P>(processor: P)
where
    T: DeserializeOwned,
    P: Processor<T>,
{
    if !is_worker_process() {
        return;
    }

    match QueueConfig::from_env() {
        Ok(config) => {
            // A second subscriber can only fail to install; keep going without it.
            let _ = init_logging(&config.log_level);
            let result = Worker::<T, P>::new(config, processor).and_then(|worker| worker.run());
            if let Err(e) = result {
                error!(error = %e, "worker failed");
            }
        }
        // No config means no log level either; stderr is the log file.
        Err(e) => eprintln!("lowq worker: {e}"),
    }
    std::process::exit(0);
}

/// A single worker run over one queue database.
pub struct Worker<T, P> {
    config: QueueConfig,
    processor: P,
    _item: PhantomData<fn() -> T>,
}

impl<T, P> Worker<T, P>
where
    T: DeserializeOwned,
    P: Processor<T>,
{
    pub fn new(config: QueueConfig, processor: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            processor,
            _item: PhantomData,
        })
    }

    /// Claim, drain and release. Blocks until the worker is done.
    ///
    /// `Err` means the store failed underneath the worker; a best-effort
    /// release has already been attempted.
    pub fn run(mut self) -> Result<WorkerExit> {
        let span = start_worker_span(&self.config.path);
        let _enter = span.enter();
        let mut lifecycle = Lifecycle::new(span.clone());

        let storage = match open_storage(&self.config) {
            Ok(storage) => storage,
            Err(e) => {
                lifecycle.advance(WorkerState::Exited)?;
                return Err(e);
            }
        };

        let result = run_claimed(&storage, self.config.codec, &mut self.processor, &mut lifecycle);

        if let Err(e) = storage.close() {
            error!(error = %e, "failed to close storage");
        }
        lifecycle.advance(WorkerState::Exited)?;
        info!("exiting");
        result
    }
}

fn open_storage(config: &QueueConfig) -> Result<Storage> {
    let storage = Storage::open(&config.path, config.retry)?;
    storage.ensure_backlog()?;
    storage.ensure_status()?;
    Ok(storage)
}

fn run_claimed<T, P>(
    storage: &Storage,
    codec: CodecKind,
    processor: &mut P,
    lifecycle: &mut Lifecycle,
) -> Result<WorkerExit>
where
    T: DeserializeOwned,
    P: Processor<T>,
{
    info!("activating");
    match storage.claim_active() {
        Ok(()) => {
            metrics::worker_claims().add(1, &[KeyValue::new("result", "active")]);
            lifecycle.advance(WorkerState::Active)?;
        }
        Err(Error::AlreadyActive) => {
            metrics::worker_claims().add(1, &[KeyValue::new("result", "lost_race")]);
            info!("another worker is already active");
            lifecycle.advance(WorkerState::LostRace)?;
            return Ok(WorkerExit::LostRace);
        }
        Err(e) => return Err(e),
    }

    lifecycle.advance(WorkerState::Draining)?;
    match drain(storage, &codec, processor) {
        Ok(exit @ WorkerExit::Released { .. }) => {
            lifecycle.advance(WorkerState::ErrorRelease)?;
            Ok(exit)
        }
        Ok(exit @ WorkerExit::MarkerLost { .. }) => {
            lifecycle.advance(WorkerState::MarkerLost)?;
            Ok(exit)
        }
        Ok(exit) => {
            lifecycle.advance(WorkerState::IdleRelease)?;
            Ok(exit)
        }
        Err(e) => {
            error!(error = %e, "storage failure while draining, deactivating");
            if let Err(release) = storage.release_all() {
                error!(error = %release, "could not release status marker");
            }
            lifecycle.advance(WorkerState::ErrorRelease)?;
            Err(e)
        }
    }
}

/// Tracks the worker's state and rejects transitions the lifecycle forbids.
struct Lifecycle {
    state: WorkerState,
    span: Span,
}

impl Lifecycle {
    fn new(span: Span) -> Self {
        Self {
            state: WorkerState::Spawned,
            span,
        }
    }

    fn advance(&mut self, to: WorkerState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        record_transition(&self.span, self.state, to);
        self.state = to;
        Ok(())
    }
}
